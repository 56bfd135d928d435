//! Session-scoped connection.
//!
//! A [`Connection`] pairs a [`LocalHandle`] (serving our methods) with a
//! [`RemoteHandle`] (calling theirs) over one [`Dispatcher`].
//!
//! # Layers
//!
//! | Module | Role |
//! |--------|------|
//! | [`handshake`] | Agree on a session ID, then build the connection |
//! | [`dispatcher`] | Route messages of one session, correlate by request ID |
//! | [`handle`] | Serve exposed methods, issue calls, proxy callbacks |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use crate::identifiers::SessionId;
use crate::transport::Messenger;

// ============================================================================
// Submodules
// ============================================================================

/// Per-session message router.
pub mod dispatcher;

/// Local and remote handles.
pub mod handle;

/// Initiator and acceptor.
pub mod handshake;

// ============================================================================
// Re-exports
// ============================================================================

pub use dispatcher::{CallbackInvocation, Dispatcher, EventListener, PendingCall};
pub use handle::{Args, LocalHandle, Method, MethodTable, RemoteCallback, RemoteHandle};
pub use handshake::{Acceptor, Handshake, HandshakeOptions, Initiator};

// ============================================================================
// Connection
// ============================================================================

/// An established session.
///
/// Cheap to clone; all clones share the same session.
#[derive(Clone)]
pub struct Connection {
    dispatcher: Dispatcher,
    local: LocalHandle,
    remote: RemoteHandle,
}

impl Connection {
    /// Binds a connection to `session_id` on `messenger`.
    ///
    /// Must be called inside a tokio runtime; spawns the call loop.
    pub(crate) fn new(
        messenger: Arc<dyn Messenger>,
        session_id: SessionId,
        methods: MethodTable,
    ) -> Self {
        let (dispatcher, calls_rx) = Dispatcher::new(messenger, session_id);
        let local = LocalHandle::spawn(dispatcher.clone(), methods, calls_rx);
        let remote = RemoteHandle::new(dispatcher.clone());

        Self {
            dispatcher,
            local,
            remote,
        }
    }

    /// Returns the session ID.
    #[inline]
    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        self.dispatcher.session_id()
    }

    /// Returns the handle serving our methods.
    #[inline]
    #[must_use]
    pub fn local_handle(&self) -> &LocalHandle {
        &self.local
    }

    /// Returns the handle calling remote methods.
    #[inline]
    #[must_use]
    pub fn remote_handle(&self) -> &RemoteHandle {
        &self.remote
    }

    /// Returns the underlying dispatcher.
    #[inline]
    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Closes the session. Pending calls fail; later calls are rejected.
    pub fn close(&self) {
        self.dispatcher.close();
    }

    /// Returns `true` once closed.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.dispatcher.is_closed()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("session_id", self.session_id())
            .field("closed", &self.is_closed())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use serde_json::{Value, json};

    use crate::error::{Error, RemoteError};
    use crate::protocol::Argument;
    use crate::transport::ChannelMessenger;

    fn pair(session: &str, left: MethodTable, right: MethodTable) -> (Connection, Connection) {
        let (a, b) = ChannelMessenger::pair();
        let session = SessionId::new(session);
        (
            Connection::new(Arc::new(a), session.clone(), left),
            Connection::new(Arc::new(b), session, right),
        )
    }

    #[tokio::test]
    async fn test_call_and_not_implemented() {
        let methods = MethodTable::new().with("double", |args| async move {
            let x: i64 = args.get(0)?;
            Ok(json!(x * 2))
        });
        let (caller, _callee) = pair("s", MethodTable::new(), methods);

        let value = caller
            .remote_handle()
            .call_values("double", vec![json!(21)])
            .await
            .expect("double");
        assert_eq!(value, json!(42));

        let err = caller
            .remote_handle()
            .call_values("triple", vec![json!(21)])
            .await
            .unwrap_err();
        let remote = err.as_remote().expect("remote error");
        assert!(remote.message.contains("triple"));
        assert!(remote.message.contains("not been implemented"));
    }

    #[tokio::test]
    async fn test_error_and_panic_shapes() {
        let methods = MethodTable::new()
            .with("fail", |_| async { Err(Error::Remote(RemoteError::message("boom"))) })
            .with("explode", |_| async {
                if true {
                    panic!("boom");
                }
                Ok(Value::Null)
            });
        let (caller, _callee) = pair("s", MethodTable::new(), methods);

        for method in ["fail", "explode"] {
            let err = caller.remote_handle().call_values(method, vec![]).await.unwrap_err();
            let remote = err.as_remote().expect("remote error");
            assert_eq!(remote.name, "Error");
            assert_eq!(remote.message, "boom");
        }
    }

    #[tokio::test]
    async fn test_set_method_after_connect() {
        let (caller, callee) = pair("s", MethodTable::new(), MethodTable::new());

        let method: Method = Arc::new(|_| Box::pin(async { Ok(json!("late")) }));
        callee.local_handle().set_method("late", method);

        let value = caller.remote_handle().call_values("late", vec![]).await.expect("late");
        assert_eq!(value, json!("late"));
        assert_eq!(callee.local_handle().method_names(), vec!["late".to_string()]);
    }

    #[tokio::test]
    async fn test_call_with_timeout_cleans_up() {
        let methods = MethodTable::new().with("slow", |_| async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(Value::Null)
        });
        let (caller, _callee) = pair("s", MethodTable::new(), methods);

        let err = caller
            .remote_handle()
            .call_with_timeout("slow", vec![Argument::from(json!(1))], Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(caller.dispatcher().pending_count(), 0);
    }

    #[tokio::test]
    async fn test_events_both_ways() {
        let (left, right) = pair("s", MethodTable::new(), MethodTable::new());

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        right.remote_handle().add_event_listener("loginSubmit", move |payload| {
            let _ = tx.send(payload.clone());
        });

        left.local_handle()
            .emit("loginSubmit", json!({"login": "user"}))
            .expect("emit");

        let payload = rx.recv().await.expect("event");
        assert_eq!(payload, json!({"login": "user"}));
    }

    #[tokio::test]
    async fn test_close_rejects_calls() {
        let (caller, _callee) = pair("s", MethodTable::new(), MethodTable::new());
        caller.close();

        assert!(caller.is_closed());
        let err = caller.remote_handle().call_values("any", vec![]).await.unwrap_err();
        assert!(matches!(err, Error::ConnectionClosed));
    }
}
