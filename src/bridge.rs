//! High-level facade over one connection.
//!
//! A [`Bridge`] starts empty and is bound by [`Bridge::init`], which runs a
//! [`Handshake`] and keeps the resulting [`Connection`]. Every other method
//! fails with [`Error::BridgeNotInitialized`] until then.
//!
//! # Example
//!
//! ```ignore
//! use konnector_bridge::{Bridge, ChannelMessenger, Initiator, MethodTable};
//!
//! let (pilot_side, _launcher_side) = ChannelMessenger::pair();
//! let bridge = Bridge::new();
//! bridge.init(&Initiator::new(pilot_side), MethodTable::new()).await?;
//!
//! let value = bridge.call_values("double", vec![json!(21)]).await?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use parking_lot::RwLock;
use serde_json::Value;
use tracing::debug;

use crate::connection::{Connection, Handshake, Method, MethodTable};
use crate::error::{Error, Result};
use crate::identifiers::{ListenerId, SessionId};
use crate::protocol::Argument;

// ============================================================================
// Bridge
// ============================================================================

/// Application-facing wrapper around a [`Connection`].
#[derive(Default)]
pub struct Bridge {
    connection: RwLock<Option<Connection>>,
}

impl Bridge {
    /// Creates an uninitialized bridge.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `handshake` and binds the resulting connection, exposing `methods`.
    ///
    /// A previously bound connection is closed.
    ///
    /// # Errors
    ///
    /// Returns the handshake error; the bridge stays uninitialized.
    pub async fn init(&self, handshake: &dyn Handshake, methods: MethodTable) -> Result<()> {
        let connection = handshake.establish(methods).await?;
        debug!(session_id = %connection.session_id(), "Bridge initialized");

        if let Some(previous) = self.connection.write().replace(connection) {
            previous.close();
        }
        Ok(())
    }

    /// Returns `true` once [`Bridge::init`] succeeded.
    #[inline]
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.connection.read().is_some()
    }

    /// Returns the session ID of the bound connection.
    #[must_use]
    pub fn session_id(&self) -> Option<SessionId> {
        self.connection
            .read()
            .as_ref()
            .map(|connection| connection.session_id().clone())
    }

    /// Returns the bound connection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BridgeNotInitialized`] naming `operation`.
    pub fn connection(&self, operation: &str) -> Result<Connection> {
        self.connection
            .read()
            .clone()
            .ok_or_else(|| Error::bridge_not_initialized(operation))
    }

    // ========================================================================
    // Calls
    // ========================================================================

    /// Calls a remote method.
    ///
    /// # Errors
    ///
    /// - [`Error::BridgeNotInitialized`] before [`Bridge::init`]
    /// - [`Error::Remote`] if the remote method failed
    pub async fn call(&self, method: &str, args: Vec<Argument>) -> Result<Value> {
        let connection = self.connection(method)?;
        connection.remote_handle().call(method, args).await
    }

    /// Calls a remote method with plain values.
    ///
    /// # Errors
    ///
    /// Same as [`Bridge::call`].
    pub async fn call_values(&self, method: &str, args: Vec<Value>) -> Result<Value> {
        let connection = self.connection(method)?;
        connection.remote_handle().call_values(method, args).await
    }

    /// Calls a remote method, giving up after `timeout`.
    ///
    /// # Errors
    ///
    /// [`Error::RequestTimeout`] on expiry, otherwise same as [`Bridge::call`].
    pub async fn call_with_timeout(
        &self,
        method: &str,
        args: Vec<Argument>,
        timeout: Duration,
    ) -> Result<Value> {
        let connection = self.connection(method)?;
        connection
            .remote_handle()
            .call_with_timeout(method, args, timeout)
            .await
    }

    // ========================================================================
    // Events
    // ========================================================================

    /// Emits an event to the remote side.
    ///
    /// # Errors
    ///
    /// [`Error::BridgeNotInitialized`] or a messenger error.
    pub fn emit(&self, event_name: &str, payload: Value) -> Result<()> {
        self.connection(event_name)?
            .local_handle()
            .emit(event_name, payload)
    }

    /// Listens to remote events named `event_name`.
    ///
    /// # Errors
    ///
    /// [`Error::BridgeNotInitialized`] before [`Bridge::init`].
    pub fn add_event_listener<F>(&self, event_name: &str, listener: F) -> Result<ListenerId>
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        Ok(self
            .connection(event_name)?
            .remote_handle()
            .add_event_listener(event_name, listener))
    }

    /// Removes an event listener. Returns `Ok(true)` if it was registered.
    ///
    /// # Errors
    ///
    /// [`Error::BridgeNotInitialized`] before [`Bridge::init`].
    pub fn remove_event_listener(&self, event_name: &str, id: ListenerId) -> Result<bool> {
        Ok(self
            .connection(event_name)?
            .remote_handle()
            .remove_event_listener(event_name, id))
    }

    // ========================================================================
    // Methods
    // ========================================================================

    /// Exposes or replaces one method on the bound connection.
    ///
    /// # Errors
    ///
    /// [`Error::BridgeNotInitialized`] before [`Bridge::init`].
    pub fn expose(&self, name: &str, method: Method) -> Result<()> {
        self.connection(name)?.local_handle().set_method(name, method);
        Ok(())
    }

    /// Replaces the exposed method table of the bound connection.
    ///
    /// # Errors
    ///
    /// [`Error::BridgeNotInitialized`] before [`Bridge::init`].
    pub fn set_methods(&self, methods: MethodTable) -> Result<()> {
        self.connection("setMethods")?.local_handle().set_methods(methods);
        Ok(())
    }

    /// Closes and unbinds the connection. No-op when uninitialized.
    pub fn close(&self) {
        if let Some(connection) = self.connection.write().take() {
            connection.close();
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use futures_util::future::join_all;
    use parking_lot::Mutex;
    use serde_json::json;

    use crate::connection::{Acceptor, HandshakeOptions, Initiator};
    use crate::error::RemoteError;
    use crate::transport::{ChannelMessenger, Messenger, WebSocketListener, WebSocketMessenger};

    fn callee_methods() -> MethodTable {
        MethodTable::new()
            .with("double", |args| async move {
                let x: i64 = args.get(0)?;
                Ok(json!(x * 2))
            })
            .with("fail", |_| async { Err(Error::Remote(RemoteError::message("boom"))) })
            .with("delayed", |args| async move {
                let n: u64 = args.get(0)?;
                let total: u64 = args.get(1)?;
                // Later arguments finish first
                tokio::time::sleep(Duration::from_millis((total - n) * 15)).await;
                Ok(json!(format!("result-{n}")))
            })
            .with("progress", |args| async move {
                let callback = args
                    .callback(0)
                    .ok_or_else(|| Error::invalid_argument("callback expected"))?;
                callback.invoke(vec![json!(1)])?;
                callback.invoke(vec![json!(2), json!("b")])?;
                Ok(json!("done"))
            })
    }

    async fn connected(messengers: (impl Messenger, impl Messenger)) -> (Bridge, Bridge) {
        let (a, b) = messengers;
        let caller = Bridge::new();
        let callee = Bridge::new();

        let initiator =
            Initiator::new(a).with_options(HandshakeOptions::new().with_interval(Duration::from_millis(10)));
        let acceptor = Acceptor::new(b);

        let (left, right) = tokio::join!(
            caller.init(&initiator, MethodTable::new()),
            callee.init(&acceptor, callee_methods())
        );
        left.expect("initiator");
        right.expect("acceptor");
        (caller, callee)
    }

    #[tokio::test]
    async fn test_uninitialized_bridge_fails_fast() {
        let bridge = Bridge::new();

        assert!(!bridge.is_initialized());
        let err = bridge.call_values("double", vec![json!(1)]).await.unwrap_err();
        assert!(matches!(err, Error::BridgeNotInitialized { ref method } if method == "double"));
        assert!(bridge.emit("x", Value::Null).is_err());
        bridge.close();
    }

    #[tokio::test]
    async fn test_end_to_end_double_and_triple() {
        let (caller, callee) = connected(ChannelMessenger::pair()).await;
        assert_eq!(caller.session_id(), callee.session_id());

        let value = caller.call_values("double", vec![json!(21)]).await.expect("double");
        assert_eq!(value, json!(42));

        let err = caller.call_values("triple", vec![json!(21)]).await.unwrap_err();
        let message = &err.as_remote().expect("remote").message;
        assert!(message.contains("triple"));
        assert!(message.contains("not been implemented"));
    }

    #[tokio::test]
    async fn test_error_shape_round_trip() {
        let (caller, _callee) = connected(ChannelMessenger::pair()).await;

        let err = caller.call_values("fail", vec![]).await.unwrap_err();
        let remote = err.as_remote().expect("remote");
        assert_eq!(remote.name, "Error");
        assert_eq!(remote.message, "boom");
    }

    #[tokio::test]
    async fn test_concurrent_calls_keep_their_results() {
        let (caller, _callee) = connected(ChannelMessenger::pair()).await;
        let total = 6_u64;

        let calls = (0..total).map(|n| caller.call_values("delayed", vec![json!(n), json!(total)]));
        let results = join_all(calls).await;

        for (n, result) in results.into_iter().enumerate() {
            assert_eq!(result.expect("delayed"), json!(format!("result-{n}")));
        }
    }

    #[tokio::test]
    async fn test_callback_invoked_twice_in_order() {
        let (caller, _callee) = connected(ChannelMessenger::pair()).await;

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let value = caller
            .call(
                "progress",
                vec![Argument::callback(move |args| sink.lock().push(args))],
            )
            .await
            .expect("progress");

        assert_eq!(value, json!("done"));
        assert_eq!(
            *seen.lock(),
            vec![vec![json!(1)], vec![json!(2), json!("b")]]
        );
    }

    #[tokio::test]
    async fn test_sessions_sharing_a_messenger_stay_isolated() {
        let (a, b) = ChannelMessenger::pair();
        let a: Arc<dyn Messenger> = Arc::new(a);
        let b: Arc<dyn Messenger> = Arc::new(b);

        let whoami = |name: &'static str| MethodTable::new().with("whoami", move |_| async move { Ok(json!(name)) });

        let session_a = SessionId::new("A");
        let session_b = SessionId::new("B");
        let caller_a = Connection::new(Arc::clone(&a), session_a.clone(), MethodTable::new());
        let caller_b = Connection::new(Arc::clone(&a), session_b.clone(), MethodTable::new());
        let callee_a = Connection::new(Arc::clone(&b), session_a, whoami("A"));
        let callee_b = Connection::new(Arc::clone(&b), session_b, whoami("B"));

        let events_b = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&events_b);
        caller_b.remote_handle().add_event_listener("ping", move |_| *sink.lock() += 1);

        callee_a.local_handle().emit("ping", json!(null)).expect("emit");

        let (left, right) = tokio::join!(
            caller_a.remote_handle().call_values("whoami", vec![]),
            caller_b.remote_handle().call_values("whoami", vec![])
        );
        assert_eq!(left.expect("A"), json!("A"));
        assert_eq!(right.expect("B"), json!("B"));
        assert_eq!(*events_b.lock(), 0);
        drop(callee_b);
    }

    #[tokio::test]
    async fn test_end_to_end_over_websocket() {
        let listener = WebSocketListener::bind_localhost().await.expect("bind");
        let url = listener.ws_url();

        let (client, server) = tokio::join!(WebSocketMessenger::connect(&url), listener.accept());
        let (caller, _callee) =
            connected((client.expect("connect"), server.expect("accept"))).await;

        let value = caller.call_values("double", vec![json!(50)]).await.expect("double");
        assert_eq!(value, json!(100));
    }

    #[tokio::test]
    async fn test_close_unbinds() {
        let (caller, _callee) = connected(ChannelMessenger::pair()).await;
        caller.close();

        assert!(!caller.is_initialized());
        assert!(matches!(
            caller.call_values("double", vec![json!(1)]).await,
            Err(Error::BridgeNotInitialized { .. })
        ));
    }
}
