//! Session handshake.
//!
//! Either side may start first, and the channel gives no ordering guarantee
//! across the boundary, so the [`Initiator`] keeps re-sending its request
//! until the [`Acceptor`] echoes the session ID back.
//!
//! ```text
//! Initiator                          Acceptor
//!     |-- HandshakeRequest(s) -------->|  (repeated every interval)
//!     |<------- HandshakeResponse(s) --|  (one per request received)
//!     |            Connection(s)       |
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::SessionId;
use crate::protocol::{Message, MessageBody};
use crate::transport::Messenger;

use super::Connection;
use super::handle::MethodTable;

// ============================================================================
// Constants
// ============================================================================

/// Default number of handshake requests before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default delay between handshake requests.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(100);

// ============================================================================
// Handshake
// ============================================================================

/// Session establishment capability.
#[async_trait]
pub trait Handshake: Send + Sync {
    /// Establishes a session and returns a connection exposing `methods`.
    ///
    /// # Errors
    ///
    /// Implementation specific; see [`Initiator`] and [`Acceptor`].
    async fn establish(&self, methods: MethodTable) -> Result<Connection>;
}

// ============================================================================
// HandshakeOptions
// ============================================================================

/// Retry budget of an [`Initiator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeOptions {
    /// Requests sent before failing.
    pub max_attempts: u32,
    /// Delay between requests.
    pub interval: Duration,
}

impl Default for HandshakeOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl HandshakeOptions {
    /// Creates options with the default budget (5 × 100ms).
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            interval: DEFAULT_INTERVAL,
        }
    }

    /// Sets the number of requests.
    #[inline]
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Sets the delay between requests.
    #[inline]
    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

// ============================================================================
// Initiator
// ============================================================================

/// Active side of the handshake.
///
/// Generates a fresh session ID per [`Handshake::establish`].
pub struct Initiator {
    messenger: Arc<dyn Messenger>,
    options: HandshakeOptions,
}

impl Initiator {
    /// Creates an initiator over `messenger` with default options.
    #[must_use]
    pub fn new(messenger: impl Messenger) -> Self {
        Self::from_arc(Arc::new(messenger))
    }

    /// Creates an initiator over a shared messenger.
    #[must_use]
    pub fn from_arc(messenger: Arc<dyn Messenger>) -> Self {
        Self {
            messenger,
            options: HandshakeOptions::new(),
        }
    }

    /// Replaces the retry budget.
    #[inline]
    #[must_use]
    pub fn with_options(mut self, options: HandshakeOptions) -> Self {
        self.options = options;
        self
    }
}

#[async_trait]
impl Handshake for Initiator {
    /// # Errors
    ///
    /// - [`Error::HandshakeFailed`] if no response arrived within the budget
    /// - Any messenger error while posting a request
    async fn establish(&self, methods: MethodTable) -> Result<Connection> {
        let session_id = SessionId::generate();

        // Subscribe before the first request so the first calls are not lost
        let connection = Connection::new(Arc::clone(&self.messenger), session_id.clone(), methods);

        let (ready_tx, mut ready_rx) = oneshot::channel::<()>();
        let ready_tx = Mutex::new(Some(ready_tx));
        let expected = session_id.clone();

        let subscription = self.messenger.add_message_listener(Arc::new(move |raw| {
            let Some(message) = Message::from_value(raw) else {
                return;
            };
            if matches!(message.body, MessageBody::HandshakeResponse)
                && message.is_for(&expected)
                && let Some(tx) = ready_tx.lock().take()
            {
                let _ = tx.send(());
            }
        }));

        let request = Message::handshake_request(session_id.clone()).to_value()?;
        let mut ticker = tokio::time::interval(self.options.interval);
        let mut attempts = 0_u32;

        let outcome = loop {
            tokio::select! {
                biased;

                ready = &mut ready_rx => {
                    break ready.map_err(|_| Error::ConnectionClosed);
                }

                _ = ticker.tick() => {
                    if attempts >= self.options.max_attempts {
                        break Err(Error::HandshakeFailed { attempts });
                    }
                    attempts += 1;
                    trace!(%session_id, attempt = attempts, "Sending handshake request");

                    if let Err(e) = self.messenger.post_message(request.clone()) {
                        break Err(e);
                    }
                }
            }
        };

        subscription.unsubscribe();

        match outcome {
            Ok(()) => {
                info!(%session_id, attempts, "Handshake completed as initiator");
                Ok(connection)
            }
            Err(e) => {
                warn!(%session_id, attempts, error = %e, "Handshake failed");
                connection.close();
                Err(e)
            }
        }
    }
}

// ============================================================================
// Acceptor
// ============================================================================

#[derive(Default)]
struct AcceptorState {
    session_id: Option<SessionId>,
    ready: bool,
    deferred: u32,
    notify: Option<oneshot::Sender<SessionId>>,
}

/// Passive side of the handshake.
///
/// Adopts the session ID of the first request it sees. Later requests with
/// that ID each get one more response; requests with another ID are ignored.
pub struct Acceptor {
    messenger: Arc<dyn Messenger>,
    timeout: Option<Duration>,
}

impl Acceptor {
    /// Creates an acceptor over `messenger` that waits indefinitely.
    #[must_use]
    pub fn new(messenger: impl Messenger) -> Self {
        Self::from_arc(Arc::new(messenger))
    }

    /// Creates an acceptor over a shared messenger.
    #[must_use]
    pub fn from_arc(messenger: Arc<dyn Messenger>) -> Self {
        Self {
            messenger,
            timeout: None,
        }
    }

    /// Gives up when no request arrives within `timeout`.
    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl Handshake for Acceptor {
    /// # Errors
    ///
    /// - [`Error::Timeout`] if a timeout is set and no request arrived
    /// - Any messenger error while posting the response
    async fn establish(&self, methods: MethodTable) -> Result<Connection> {
        let (notify_tx, notify_rx) = oneshot::channel();
        let state = Arc::new(Mutex::new(AcceptorState {
            notify: Some(notify_tx),
            ..AcceptorState::default()
        }));

        let listener_state = Arc::clone(&state);
        let messenger = Arc::downgrade(&self.messenger);

        let subscription = self.messenger.add_message_listener(Arc::new(move |raw| {
            let Some(message) = Message::from_value(raw) else {
                return;
            };
            if !matches!(message.body, MessageBody::HandshakeRequest) {
                return;
            }
            let Some(session_id) = message.session_id else {
                return;
            };

            let mut state = listener_state.lock();
            match state.session_id.clone() {
                None => {
                    state.session_id = Some(session_id.clone());
                    if let Some(tx) = state.notify.take() {
                        let _ = tx.send(session_id);
                    }
                }
                Some(current) if current == session_id => {
                    if !state.ready {
                        state.deferred += 1;
                        return;
                    }
                    drop(state);

                    let response = Message::handshake_response(session_id).to_value();
                    if let (Some(messenger), Ok(response)) = (messenger.upgrade(), response) {
                        let _ = messenger.post_message(response);
                    }
                }
                Some(_) => trace!("Handshake request for another session ignored"),
            }
        }));

        let received = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, notify_rx).await.map_err(|_| {
                Error::timeout("waiting for handshake request", timeout)
            })?,
            None => notify_rx.await,
        };
        let session_id = received.map_err(|_| Error::ConnectionClosed)?;

        let connection = Connection::new(Arc::clone(&self.messenger), session_id.clone(), methods);

        let responses = {
            let mut state = state.lock();
            state.ready = true;
            1 + state.deferred
        };

        let response = Message::handshake_response(session_id.clone()).to_value()?;
        for _ in 0..responses {
            self.messenger.post_message(response.clone())?;
        }

        connection.dispatcher().retain_subscription(subscription);

        debug!(%session_id, responses, "Handshake responses sent");
        info!(%session_id, "Handshake completed as acceptor");
        Ok(connection)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::Value;
    use tokio::time::sleep;

    use crate::transport::ChannelMessenger;

    fn fast() -> HandshakeOptions {
        HandshakeOptions::new().with_interval(Duration::from_millis(10))
    }

    #[test]
    fn test_options_defaults() {
        let options = HandshakeOptions::default();
        assert_eq!(options.max_attempts, 5);
        assert_eq!(options.interval, Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_initiator_and_acceptor_agree_on_session() {
        let (a, b) = ChannelMessenger::pair();
        let initiator = Initiator::new(a).with_options(fast());
        let acceptor = Acceptor::new(b);

        let (left, right) = tokio::join!(
            initiator.establish(MethodTable::new()),
            acceptor.establish(MethodTable::new())
        );
        let left = left.expect("initiator");
        let right = right.expect("acceptor");

        assert_eq!(left.session_id(), right.session_id());
    }

    #[tokio::test]
    async fn test_initiator_fails_after_budget() {
        let (a, _b) = ChannelMessenger::pair();
        let initiator = Initiator::new(a).with_options(fast().with_max_attempts(3));

        let err = initiator.establish(MethodTable::new()).await.unwrap_err();
        assert!(matches!(err, Error::HandshakeFailed { attempts: 3 }));
        assert!(err.is_connection_error());
    }

    #[tokio::test]
    async fn test_acceptor_timeout() {
        let (_a, b) = ChannelMessenger::pair();
        let acceptor = Acceptor::new(b).with_timeout(Duration::from_millis(30));

        let err = acceptor.establish(MethodTable::new()).await.unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_acceptor_answers_each_duplicate_once() {
        let (a, b) = ChannelMessenger::pair();
        let responses = Arc::new(Mutex::new(Vec::<Value>::new()));
        let sink = Arc::clone(&responses);
        let _subscription = a.add_message_listener(Arc::new(move |raw| {
            sink.lock().push(raw.clone());
        }));

        let session_id = SessionId::new("dup");
        let request = Message::handshake_request(session_id.clone())
            .to_value()
            .expect("serialize");
        let foreign = Message::handshake_request(SessionId::new("other"))
            .to_value()
            .expect("serialize");

        let acceptor = Acceptor::new(b);
        let establish = tokio::spawn(async move { acceptor.establish(MethodTable::new()).await });

        sleep(Duration::from_millis(10)).await;
        a.post_message(request.clone()).expect("post");
        let connection = establish.await.expect("join").expect("accept");
        assert_eq!(connection.session_id(), &session_id);

        a.post_message(request.clone()).expect("post");
        a.post_message(foreign).expect("post");
        a.post_message(request).expect("post");
        sleep(Duration::from_millis(50)).await;

        let expected = Message::handshake_response(session_id).to_value().expect("serialize");
        let received = responses.lock().clone();
        assert_eq!(received.len(), 3);
        assert!(received.iter().all(|raw| *raw == expected));
    }
}
