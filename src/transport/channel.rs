//! In-process bare postable channel.
//!
//! Models a worker or message port: no origin, no source, just two connected
//! endpoints. Each endpoint owns a pump task that delivers inbound messages
//! to its listeners in FIFO order.

// ============================================================================
// Imports
// ============================================================================

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

use crate::error::{Error, Result};

use super::{ListenerSet, MessageListener, Messenger, Subscription};

// ============================================================================
// ChannelMessenger
// ============================================================================

/// One endpoint of an in-process channel pair.
///
/// # Example
///
/// ```ignore
/// let (pilot_side, launcher_side) = ChannelMessenger::pair();
/// ```
pub struct ChannelMessenger {
    /// Sender into the remote endpoint's pump.
    outbound: mpsc::UnboundedSender<Value>,
    /// Local listeners fed by this endpoint's pump.
    listeners: ListenerSet,
    /// Pump task, aborted when the endpoint is dropped.
    pump: JoinHandle<()>,
}

impl ChannelMessenger {
    /// Creates two connected endpoints.
    ///
    /// Must be called inside a tokio runtime; each endpoint spawns its pump.
    #[must_use]
    pub fn pair() -> (Self, Self) {
        let (to_a, from_b) = mpsc::unbounded_channel();
        let (to_b, from_a) = mpsc::unbounded_channel();

        (Self::spawn(to_b, from_b), Self::spawn(to_a, from_a))
    }

    fn spawn(outbound: mpsc::UnboundedSender<Value>, inbound: mpsc::UnboundedReceiver<Value>) -> Self {
        let listeners = ListenerSet::new();
        let pump = tokio::spawn(Self::pump(inbound, listeners.clone()));
        Self {
            outbound,
            listeners,
            pump,
        }
    }

    async fn pump(mut inbound: mpsc::UnboundedReceiver<Value>, listeners: ListenerSet) {
        while let Some(message) = inbound.recv().await {
            listeners.dispatch(&message);
        }
        trace!("Channel messenger pump terminated");
    }
}

impl Drop for ChannelMessenger {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

impl Messenger for ChannelMessenger {
    fn post_message(&self, message: Value) -> Result<()> {
        self.outbound
            .send(message)
            .map_err(|_| Error::ConnectionClosed)
    }

    fn add_message_listener(&self, listener: MessageListener) -> Subscription {
        self.listeners.add(listener)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::time::Duration;

    use parking_lot::Mutex;
    use serde_json::json;
    use tokio::time::sleep;

    #[tokio::test]
    async fn test_messages_cross_in_order() {
        let (a, b) = ChannelMessenger::pair();
        let received = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&received);
        let _subscription = b.add_message_listener(Arc::new(move |message| {
            sink.lock().push(message.clone());
        }));

        for i in 0..5 {
            a.post_message(json!(i)).expect("post");
        }
        sleep(Duration::from_millis(50)).await;

        assert_eq!(*received.lock(), (0..5).map(|i| json!(i)).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_poster_does_not_hear_itself() {
        let (a, _b) = ChannelMessenger::pair();
        let received = Arc::new(Mutex::new(0));

        let sink = Arc::clone(&received);
        let _subscription = a.add_message_listener(Arc::new(move |_| {
            *sink.lock() += 1;
        }));

        a.post_message(json!("ping")).expect("post");
        sleep(Duration::from_millis(20)).await;
        assert_eq!(*received.lock(), 0);
    }

    #[tokio::test]
    async fn test_post_after_peer_dropped_fails() {
        let (a, b) = ChannelMessenger::pair();
        drop(b);
        sleep(Duration::from_millis(20)).await;

        let err = a.post_message(json!("late")).unwrap_err();
        assert!(matches!(err, Error::ConnectionClosed));
    }
}
