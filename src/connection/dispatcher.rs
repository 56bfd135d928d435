//! Per-session message router.
//!
//! The dispatcher owns the messenger subscription of one session. It filters
//! incoming traffic by marker and session ID, correlates responses and
//! callbacks with pending calls by request ID, queues incoming calls for the
//! local handle and fans events out to registered listeners.

// ============================================================================
// Imports
// ============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

use crate::error::{Error, RemoteError, Result};
use crate::identifiers::{CallbackId, ListenerId, RequestId, RequestIdGenerator, SessionId};
use crate::protocol::{Message, MessageBody};
use crate::transport::{Messenger, Subscription};

// ============================================================================
// Types
// ============================================================================

/// Map of request IDs to response slots.
type PendingMap = FxHashMap<RequestId, oneshot::Sender<Result<Value>>>;

/// Map of request IDs to callback streams.
type CallbackMap = FxHashMap<RequestId, mpsc::UnboundedSender<CallbackInvocation>>;

/// Event listener callback type.
pub type EventListener = Arc<dyn Fn(&Value) + Send + Sync>;

/// Event listeners keyed by event name.
type EventMap = FxHashMap<String, Vec<(ListenerId, EventListener)>>;

/// A call received from the remote side.
#[derive(Debug)]
pub(crate) struct IncomingCall {
    pub request_id: RequestId,
    pub method_name: String,
    pub args: Vec<Value>,
}

/// One relayed invocation of a callback argument.
#[derive(Debug, Clone, PartialEq)]
pub struct CallbackInvocation {
    /// Argument position of the callback.
    pub callback_id: CallbackId,
    /// Arguments the callee passed.
    pub args: Vec<Value>,
}

// ============================================================================
// Dispatcher
// ============================================================================

struct DispatcherInner {
    messenger: Arc<dyn Messenger>,
    session_id: SessionId,
    request_ids: RequestIdGenerator,
    pending: Mutex<PendingMap>,
    callbacks: Mutex<CallbackMap>,
    events: Mutex<EventMap>,
    calls_tx: Mutex<Option<mpsc::UnboundedSender<IncomingCall>>>,
    subscriptions: Mutex<Vec<Subscription>>,
    closed: AtomicBool,
}

/// Message router for one session.
///
/// Cheap to clone; all clones share the same state.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

impl Dispatcher {
    /// Creates a dispatcher and subscribes it to `messenger`.
    ///
    /// Returns the receiver of incoming calls for the local handle.
    pub(crate) fn new(
        messenger: Arc<dyn Messenger>,
        session_id: SessionId,
    ) -> (Self, mpsc::UnboundedReceiver<IncomingCall>) {
        let (calls_tx, calls_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(DispatcherInner {
            messenger: Arc::clone(&messenger),
            session_id,
            request_ids: RequestIdGenerator::new(),
            pending: Mutex::new(PendingMap::default()),
            callbacks: Mutex::new(CallbackMap::default()),
            events: Mutex::new(EventMap::default()),
            calls_tx: Mutex::new(Some(calls_tx)),
            subscriptions: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });

        let weak = Arc::downgrade(&inner);
        let subscription = messenger.add_message_listener(Arc::new(move |raw| {
            Self::handle_incoming_message(&weak, raw);
        }));
        inner.subscriptions.lock().push(subscription);

        (Self { inner }, calls_rx)
    }

    /// Returns the session this dispatcher is bound to.
    #[inline]
    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        &self.inner.session_id
    }

    /// Returns `true` once [`Dispatcher::close`] ran.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Returns the number of calls awaiting a response.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// Keeps `subscription` alive until the dispatcher closes.
    pub(crate) fn retain_subscription(&self, subscription: Subscription) {
        if self.is_closed() {
            subscription.unsubscribe();
            return;
        }
        self.inner.subscriptions.lock().push(subscription);
    }

    // ========================================================================
    // Outgoing
    // ========================================================================

    /// Sends a Call and registers its response slot and callback stream.
    ///
    /// Does not wait for the reply; await the returned [`PendingCall`].
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] if the dispatcher is closed
    /// - Any messenger error while posting
    pub fn call_on_remote(&self, method_name: &str, args: Vec<Value>) -> Result<PendingCall> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }

        let request_id = self.inner.request_ids.next();
        let (response_tx, response_rx) = oneshot::channel();
        let (callback_tx, callback_rx) = mpsc::unbounded_channel();

        // Register before sending so a fast reply cannot be missed
        self.inner.pending.lock().insert(request_id, response_tx);
        self.inner.callbacks.lock().insert(request_id, callback_tx);

        let pending = PendingCall {
            request_id,
            response: response_rx,
            callbacks: callback_rx,
            dispatcher: Arc::downgrade(&self.inner),
        };

        self.post(MessageBody::Call {
            request_id,
            method_name: method_name.to_string(),
            args,
        })?;

        trace!(%request_id, method = method_name, "Call sent");
        Ok(pending)
    }

    /// Sends the single Response for `request_id`.
    ///
    /// # Errors
    ///
    /// Returns any messenger error while posting.
    pub fn respond_to_remote(
        &self,
        request_id: RequestId,
        outcome: std::result::Result<Value, RemoteError>,
    ) -> Result<()> {
        let body = match outcome {
            Ok(result) => MessageBody::Response {
                request_id,
                result: Some(result),
                error: None,
            },
            Err(error) => MessageBody::Response {
                request_id,
                result: None,
                error: Some(error),
            },
        };
        self.post(body)
    }

    /// Relays an invocation of the callback at `callback_id` of `request_id`.
    ///
    /// # Errors
    ///
    /// Returns any messenger error while posting.
    pub fn callback_to_remote(
        &self,
        request_id: RequestId,
        callback_id: CallbackId,
        args: Vec<Value>,
    ) -> Result<()> {
        self.post(MessageBody::Callback {
            request_id,
            callback_id,
            args,
        })
    }

    /// Sends an Event.
    ///
    /// # Errors
    ///
    /// Returns any messenger error while posting.
    pub fn emit_to_remote(&self, event_name: &str, payload: Value) -> Result<()> {
        self.post(MessageBody::Event {
            event_name: event_name.to_string(),
            payload,
        })
    }

    fn post(&self, body: MessageBody) -> Result<()> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }
        let message = Message::new(self.inner.session_id.clone(), body);
        self.inner.messenger.post_message(message.to_value()?)
    }

    // ========================================================================
    // Events
    // ========================================================================

    /// Registers a listener for remote events named `event_name`.
    pub fn add_event_listener(&self, event_name: &str, listener: EventListener) -> ListenerId {
        let id = ListenerId::next();
        self.inner
            .events
            .lock()
            .entry(event_name.to_string())
            .or_default()
            .push((id, listener));
        id
    }

    /// Removes a listener. Returns `true` if it was registered.
    pub fn remove_event_listener(&self, event_name: &str, id: ListenerId) -> bool {
        let mut events = self.inner.events.lock();
        let Some(listeners) = events.get_mut(event_name) else {
            return false;
        };
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        let removed = listeners.len() != before;
        if listeners.is_empty() {
            events.remove(event_name);
        }
        removed
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Unsubscribes from the messenger and drops all listeners.
    ///
    /// Pending calls fail with [`Error::ConnectionClosed`]. Idempotent.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let subscriptions: Vec<Subscription> = self.inner.subscriptions.lock().drain(..).collect();
        for subscription in subscriptions {
            subscription.unsubscribe();
        }

        let pending: Vec<_> = self.inner.pending.lock().drain().collect();
        let count = pending.len();
        for (_, tx) in pending {
            let _ = tx.send(Err(Error::ConnectionClosed));
        }

        self.inner.callbacks.lock().clear();
        self.inner.events.lock().clear();
        self.inner.calls_tx.lock().take();

        debug!(session_id = %self.inner.session_id, failed = count, "Dispatcher closed");
    }

    // ========================================================================
    // Incoming
    // ========================================================================

    fn handle_incoming_message(inner: &Weak<DispatcherInner>, raw: &Value) {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        if inner.closed.load(Ordering::Acquire) {
            return;
        }

        let Some(message) = Message::from_value(raw) else {
            return;
        };
        if !message.is_for(&inner.session_id) {
            trace!(session_id = %inner.session_id, "Message for another session ignored");
            return;
        }

        match message.body {
            MessageBody::Call {
                request_id,
                method_name,
                args,
            } => {
                let calls_tx = inner.calls_tx.lock().clone();
                if let Some(calls_tx) = calls_tx {
                    let _ = calls_tx.send(IncomingCall {
                        request_id,
                        method_name,
                        args,
                    });
                }
            }

            MessageBody::Response {
                request_id,
                result,
                error,
            } => {
                let outcome = match error {
                    Some(error) => Err(Error::Remote(error)),
                    None => Ok(result.unwrap_or(Value::Null)),
                };
                Self::resolve(&inner, request_id, outcome);
            }

            MessageBody::Error { request_id, error } => {
                Self::resolve(&inner, request_id, Err(Error::Remote(error)));
            }

            MessageBody::Callback {
                request_id,
                callback_id,
                args,
            } => {
                let callbacks = inner.callbacks.lock();
                match callbacks.get(&request_id) {
                    Some(tx) => {
                        let _ = tx.send(CallbackInvocation { callback_id, args });
                    }
                    None => trace!(%request_id, "Callback for unknown request"),
                }
            }

            MessageBody::Event {
                event_name,
                payload,
            } => {
                let listeners: Vec<EventListener> = inner
                    .events
                    .lock()
                    .get(&event_name)
                    .map(|listeners| listeners.iter().map(|(_, l)| Arc::clone(l)).collect())
                    .unwrap_or_default();

                trace!(event = %event_name, listeners = listeners.len(), "Event received");
                for listener in listeners {
                    listener(&payload);
                }
            }

            MessageBody::HandshakeRequest | MessageBody::HandshakeResponse => {}
        }
    }

    fn resolve(inner: &DispatcherInner, request_id: RequestId, outcome: Result<Value>) {
        inner.callbacks.lock().remove(&request_id);
        let tx = inner.pending.lock().remove(&request_id);

        match tx {
            Some(tx) => {
                let _ = tx.send(outcome);
            }
            None => warn!(%request_id, "Response for unknown request"),
        }
    }
}

// ============================================================================
// PendingCall
// ============================================================================

/// An in-flight call awaiting its response.
///
/// Dropping it before the response arrives removes its correlation entry.
pub struct PendingCall {
    request_id: RequestId,
    response: oneshot::Receiver<Result<Value>>,
    callbacks: mpsc::UnboundedReceiver<CallbackInvocation>,
    dispatcher: Weak<DispatcherInner>,
}

impl PendingCall {
    /// Returns the request ID of the call.
    #[inline]
    #[must_use]
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Waits for the response, handing every relayed callback to
    /// `on_callback` in arrival order.
    ///
    /// # Errors
    ///
    /// - [`Error::Remote`] if the remote method failed
    /// - [`Error::ConnectionClosed`] if the dispatcher closed first
    pub async fn resolve<F>(mut self, mut on_callback: F) -> Result<Value>
    where
        F: FnMut(CallbackInvocation),
    {
        loop {
            tokio::select! {
                biased;

                Some(invocation) = self.callbacks.recv() => on_callback(invocation),

                response = &mut self.response => {
                    while let Ok(invocation) = self.callbacks.try_recv() {
                        on_callback(invocation);
                    }
                    return response.unwrap_or(Err(Error::ConnectionClosed));
                }
            }
        }
    }
}

impl Drop for PendingCall {
    fn drop(&mut self) {
        if let Some(inner) = self.dispatcher.upgrade() {
            inner.pending.lock().remove(&self.request_id);
            inner.callbacks.lock().remove(&self.request_id);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use serde_json::json;
    use tokio::time::sleep;

    use crate::protocol::MARKER;
    use crate::transport::ChannelMessenger;

    fn raw(session: &str, body: MessageBody) -> Value {
        Message::new(SessionId::new(session), body)
            .to_value()
            .expect("serialize")
    }

    #[tokio::test]
    async fn test_response_resolves_pending_call() {
        let (local, remote) = ChannelMessenger::pair();
        let (dispatcher, _calls) = Dispatcher::new(Arc::new(local), SessionId::new("s1"));

        let pending = dispatcher.call_on_remote("double", vec![json!(21)]).expect("call");
        let request_id = pending.request_id();
        assert_eq!(dispatcher.pending_count(), 1);

        remote
            .post_message(raw(
                "s1",
                MessageBody::Response {
                    request_id,
                    result: Some(json!(42)),
                    error: None,
                },
            ))
            .expect("post");

        let value = pending.resolve(|_| {}).await.expect("resolve");
        assert_eq!(value, json!(42));
        assert_eq!(dispatcher.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_other_session_is_ignored() {
        let (local, remote) = ChannelMessenger::pair();
        let (dispatcher, mut calls) = Dispatcher::new(Arc::new(local), SessionId::new("mine"));

        remote
            .post_message(raw(
                "theirs",
                MessageBody::Call {
                    request_id: RequestId::new(1),
                    method_name: "double".to_string(),
                    args: vec![],
                },
            ))
            .expect("post");
        remote
            .post_message(json!({"marker": MARKER, "action": "Call", "requestId": 2, "methodName": "x"}))
            .expect("post");
        sleep(Duration::from_millis(30)).await;

        assert!(calls.try_recv().is_err());
        drop(dispatcher);
    }

    #[tokio::test]
    async fn test_events_reach_named_listeners() {
        let (local, remote) = ChannelMessenger::pair();
        let (dispatcher, _calls) = Dispatcher::new(Arc::new(local), SessionId::new("s1"));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let id = dispatcher.add_event_listener(
            "loginSubmit",
            Arc::new(move |payload| sink.lock().push(payload.clone())),
        );

        let event = |payload: Value| {
            raw(
                "s1",
                MessageBody::Event {
                    event_name: "loginSubmit".to_string(),
                    payload,
                },
            )
        };

        remote.post_message(event(json!({"login": "a"}))).expect("post");
        sleep(Duration::from_millis(30)).await;
        assert!(dispatcher.remove_event_listener("loginSubmit", id));
        assert!(!dispatcher.remove_event_listener("loginSubmit", id));

        remote.post_message(event(json!({"login": "b"}))).expect("post");
        sleep(Duration::from_millis(30)).await;

        assert_eq!(*seen.lock(), vec![json!({"login": "a"})]);
    }

    #[tokio::test]
    async fn test_close_fails_pending_and_is_idempotent() {
        let (local, _remote) = ChannelMessenger::pair();
        let (dispatcher, _calls) = Dispatcher::new(Arc::new(local), SessionId::new("s1"));

        let pending = dispatcher.call_on_remote("slow", vec![]).expect("call");
        dispatcher.close();
        dispatcher.close();

        let err = pending.resolve(|_| {}).await.unwrap_err();
        assert!(matches!(err, Error::ConnectionClosed));
        assert!(dispatcher.is_closed());
        assert!(matches!(
            dispatcher.call_on_remote("late", vec![]),
            Err(Error::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_dropping_pending_call_removes_entry() {
        let (local, _remote) = ChannelMessenger::pair();
        let (dispatcher, _calls) = Dispatcher::new(Arc::new(local), SessionId::new("s1"));

        let pending = dispatcher.call_on_remote("never", vec![]).expect("call");
        assert_eq!(dispatcher.pending_count(), 1);
        drop(pending);
        assert_eq!(dispatcher.pending_count(), 0);
    }
}
