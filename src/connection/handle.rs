//! Local and remote handles of a connection.
//!
//! The [`LocalHandle`] serves incoming calls from a [`MethodTable`]; the
//! [`RemoteHandle`] issues outgoing calls and listens to remote events.

// ============================================================================
// Imports
// ============================================================================

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::error::{Error, RemoteError, Result};
use crate::identifiers::{CallbackId, ListenerId, RequestId, SessionId};
use crate::protocol::argument::sanitize;
use crate::protocol::{Argument, CallbackProxy};

use super::dispatcher::{Dispatcher, EventListener, IncomingCall};

// ============================================================================
// Types
// ============================================================================

/// An exposed method.
///
/// Errors are reduced to a [`RemoteError`] before they reach the caller.
pub type Method = Arc<dyn Fn(Args) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

// ============================================================================
// MethodTable
// ============================================================================

/// Methods exposed to the remote side, keyed by name.
#[derive(Clone, Default)]
pub struct MethodTable {
    methods: FxHashMap<String, Method>,
}

impl MethodTable {
    /// Creates an empty table.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an async method and returns the table.
    #[must_use]
    pub fn with<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.insert(name, f);
        self
    }

    /// Adds or replaces an async method.
    pub fn insert<F, Fut>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let method: Method = Arc::new(move |args| Box::pin(f(args)));
        self.methods.insert(name.into(), method);
    }

    /// Adds or replaces an already boxed method.
    pub fn insert_method(&mut self, name: impl Into<String>, method: Method) {
        self.methods.insert(name.into(), method);
    }

    /// Returns the method registered under `name`.
    #[inline]
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Method> {
        self.methods.get(name).cloned()
    }

    /// Returns `true` if `name` is registered.
    #[inline]
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    /// Returns the registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.methods.keys().cloned().collect();
        names.sort();
        names
    }

    /// Returns the number of methods.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// Returns `true` if the table is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// Copies every method of `other` into this table, replacing duplicates.
    pub fn extend(&mut self, other: MethodTable) {
        self.methods.extend(other.methods);
    }
}

impl fmt::Debug for MethodTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodTable")
            .field("methods", &self.names())
            .finish()
    }
}

// ============================================================================
// RemoteCallback
// ============================================================================

/// Callee-side handle for a callback argument.
///
/// Each [`RemoteCallback::invoke`] becomes a `Callback` message to the caller.
#[derive(Clone)]
pub struct RemoteCallback {
    dispatcher: Dispatcher,
    request_id: RequestId,
    callback_id: CallbackId,
}

impl RemoteCallback {
    /// Fires the callback on the caller's side.
    ///
    /// # Errors
    ///
    /// Returns any messenger error while posting.
    pub fn invoke(&self, args: Vec<Value>) -> Result<()> {
        trace!(request_id = %self.request_id, callback_id = %self.callback_id, "Invoking remote callback");
        self.dispatcher
            .callback_to_remote(self.request_id, self.callback_id, args)
    }
}

impl fmt::Debug for RemoteCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteCallback")
            .field("request_id", &self.request_id)
            .field("callback_id", &self.callback_id)
            .finish()
    }
}

// ============================================================================
// Args
// ============================================================================

/// Arguments received by an exposed method.
#[derive(Debug, Default)]
pub struct Args {
    values: Vec<Value>,
    callbacks: FxHashMap<usize, RemoteCallback>,
}

impl Args {
    /// Wraps plain values; no argument is a callback.
    #[inline]
    #[must_use]
    pub fn from_values(values: Vec<Value>) -> Self {
        Self {
            values,
            callbacks: FxHashMap::default(),
        }
    }

    /// Restores callback markers of a received call as remote callbacks.
    pub(crate) fn decode(dispatcher: &Dispatcher, request_id: RequestId, values: Vec<Value>) -> Self {
        let callbacks = values
            .iter()
            .enumerate()
            .filter_map(|(position, value)| {
                let callback_id = CallbackProxy::detect(value)?;
                Some((
                    position,
                    RemoteCallback {
                        dispatcher: dispatcher.clone(),
                        request_id,
                        callback_id,
                    },
                ))
            })
            .collect();

        Self { values, callbacks }
    }

    /// Returns the number of arguments.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if no argument was passed.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns the raw argument at `index`.
    #[inline]
    #[must_use]
    pub fn value(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Deserializes the argument at `index`.
    ///
    /// A missing argument deserializes from `null`, so `Option<T>` accepts
    /// omitted trailing arguments.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the value has the wrong shape.
    pub fn get<T: DeserializeOwned>(&self, index: usize) -> Result<T> {
        let value = self.values.get(index).cloned().unwrap_or(Value::Null);
        serde_json::from_value(value)
            .map_err(|e| Error::invalid_argument(format!("argument {index}: {e}")))
    }

    /// Returns the callback passed at `index`, if any.
    #[inline]
    #[must_use]
    pub fn callback(&self, index: usize) -> Option<RemoteCallback> {
        self.callbacks.get(&index).cloned()
    }

    /// Returns the arguments from `from` onwards.
    #[must_use]
    pub fn rest(&self, from: usize) -> Vec<Value> {
        self.values.iter().skip(from).cloned().collect()
    }

    /// Consumes the arguments and returns the raw values.
    #[inline]
    #[must_use]
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

// ============================================================================
// LocalHandle
// ============================================================================

/// Serves incoming calls and emits events.
#[derive(Clone)]
pub struct LocalHandle {
    dispatcher: Dispatcher,
    methods: Arc<RwLock<MethodTable>>,
}

impl LocalHandle {
    /// Starts serving calls from `calls_rx` with `methods`.
    pub(crate) fn spawn(
        dispatcher: Dispatcher,
        methods: MethodTable,
        calls_rx: mpsc::UnboundedReceiver<IncomingCall>,
    ) -> Self {
        let methods = Arc::new(RwLock::new(methods));

        tokio::spawn(Self::run_call_loop(
            dispatcher.clone(),
            Arc::clone(&methods),
            calls_rx,
        ));

        Self {
            dispatcher,
            methods,
        }
    }

    /// Exposes or replaces one method.
    pub fn set_method(&self, name: impl Into<String>, method: Method) {
        self.methods.write().insert_method(name, method);
    }

    /// Replaces the whole method table.
    pub fn set_methods(&self, methods: MethodTable) {
        *self.methods.write() = methods;
    }

    /// Returns the exposed method names, sorted.
    #[must_use]
    pub fn method_names(&self) -> Vec<String> {
        self.methods.read().names()
    }

    /// Sends an event to the remote side.
    ///
    /// # Errors
    ///
    /// Returns any messenger error while posting.
    pub fn emit(&self, event_name: &str, payload: Value) -> Result<()> {
        debug!(event = event_name, "Emitting event");
        self.dispatcher.emit_to_remote(event_name, payload)
    }

    /// Runs every incoming call in its own task and sends one response each.
    async fn run_call_loop(
        dispatcher: Dispatcher,
        methods: Arc<RwLock<MethodTable>>,
        mut calls_rx: mpsc::UnboundedReceiver<IncomingCall>,
    ) {
        while let Some(call) = calls_rx.recv().await {
            let IncomingCall {
                request_id,
                method_name,
                args,
            } = call;

            let method = methods.read().get(&method_name);
            let Some(method) = method else {
                warn!(%request_id, method = %method_name, "Call to unknown method");
                if let Err(e) =
                    dispatcher.respond_to_remote(request_id, Err(RemoteError::not_implemented(&method_name)))
                {
                    debug!(%request_id, error = %e, "Failed to send response");
                }
                continue;
            };

            trace!(%request_id, method = %method_name, "Serving call");
            let args = Args::decode(&dispatcher, request_id, args);
            let task = tokio::spawn(method(args));
            let dispatcher = dispatcher.clone();

            tokio::spawn(async move {
                let outcome = match task.await {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(e)) => {
                        debug!(%request_id, method = %method_name, error = %e, "Method failed");
                        Err(RemoteError::from(e))
                    }
                    Err(join_error) => {
                        let message = if join_error.is_panic() {
                            panic_message(join_error.into_panic())
                        } else {
                            "Method was cancelled".to_string()
                        };
                        warn!(%request_id, method = %method_name, panic = %message, "Method panicked");
                        Err(RemoteError::message(message))
                    }
                };

                if let Err(e) = dispatcher.respond_to_remote(request_id, outcome) {
                    debug!(%request_id, error = %e, "Failed to send response");
                }
            });
        }

        trace!(session_id = %dispatcher.session_id(), "Call loop terminated");
    }
}

/// Extracts the message of a panic payload.
fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => payload
            .downcast_ref::<&str>()
            .map_or_else(|| "Method panicked".to_string(), |s| (*s).to_string()),
    }
}

// ============================================================================
// RemoteHandle
// ============================================================================

/// Calls methods exposed by the remote side.
#[derive(Clone)]
pub struct RemoteHandle {
    dispatcher: Dispatcher,
}

impl RemoteHandle {
    pub(crate) fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }

    /// Returns the session this handle talks to.
    #[inline]
    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        self.dispatcher.session_id()
    }

    /// Calls a remote method and waits for its result.
    ///
    /// Callback arguments are invoked locally, in arrival order, whenever
    /// the callee fires them, up to the response.
    ///
    /// # Errors
    ///
    /// - [`Error::Remote`] if the remote method failed
    /// - [`Error::ConnectionClosed`] if the connection closed first
    pub async fn call(&self, method_name: &str, args: Vec<Argument>) -> Result<Value> {
        let (values, callbacks) = sanitize(args);
        let pending = self.dispatcher.call_on_remote(method_name, values)?;

        pending
            .resolve(|invocation| match callbacks.get(&invocation.callback_id) {
                Some(callback) => callback(invocation.args),
                None => warn!(callback_id = %invocation.callback_id, "Callback not found"),
            })
            .await
    }

    /// Calls a remote method with plain values.
    ///
    /// # Errors
    ///
    /// Same as [`RemoteHandle::call`].
    pub async fn call_values(&self, method_name: &str, args: Vec<Value>) -> Result<Value> {
        self.call(method_name, args.into_iter().map(Argument::from).collect())
            .await
    }

    /// Calls a remote method, giving up after `timeout`.
    ///
    /// A late response is discarded.
    ///
    /// # Errors
    ///
    /// - [`Error::RequestTimeout`] if no response arrived in time
    /// - Same as [`RemoteHandle::call`] otherwise
    pub async fn call_with_timeout(
        &self,
        method_name: &str,
        args: Vec<Argument>,
        timeout: Duration,
    ) -> Result<Value> {
        let (values, callbacks) = sanitize(args);
        let pending = self.dispatcher.call_on_remote(method_name, values)?;
        let request_id = pending.request_id();

        let resolution = pending.resolve(|invocation| {
            if let Some(callback) = callbacks.get(&invocation.callback_id) {
                callback(invocation.args);
            }
        });

        match tokio::time::timeout(timeout, resolution).await {
            Ok(result) => result,
            Err(_) => {
                warn!(%request_id, method = method_name, "Call timed out");
                Err(Error::request_timeout(request_id, timeout))
            }
        }
    }

    /// Registers a listener for remote events named `event_name`.
    pub fn add_event_listener<F>(&self, event_name: &str, listener: F) -> ListenerId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let listener: EventListener = Arc::new(listener);
        self.dispatcher.add_event_listener(event_name, listener)
    }

    /// Removes a listener. Returns `true` if it was registered.
    pub fn remove_event_listener(&self, event_name: &str, id: ListenerId) -> bool {
        self.dispatcher.remove_event_listener(event_name, id)
    }
}

// ============================================================================
// Tests
// ============================================================================
