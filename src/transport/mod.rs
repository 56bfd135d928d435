//! Messenger transport layer.
//!
//! A [`Messenger`] delivers opaque JSON messages to the remote endpoint and
//! notifies local listeners of incoming ones. It knows nothing about
//! sessions or calls; that is the dispatcher's job.
//!
//! # Variants
//!
//! | Type | Description |
//! |------|-------------|
//! | [`ChannelMessenger`] | In-process bare postable (worker / port), no origin checks |
//! | [`WindowMessenger`] | Window-to-window messaging with source and origin checks |
//! | [`DebugMessenger`] | Wraps any messenger and logs traffic both ways |
//! | [`WebSocketMessenger`] | JSON text frames over WebSocket |
//!
//! Delivery is always asynchronous: posting never re-enters the poster's
//! own listeners, and listeners may post from inside their callback.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use crate::error::Result;
use crate::identifiers::ListenerId;

// ============================================================================
// Submodules
// ============================================================================

/// In-process channel pair.
pub mod channel;

/// Debug wrapper.
pub mod debug;

/// WebSocket messenger and listener.
pub mod websocket;

/// Origin-checked window messaging.
pub mod window;

// ============================================================================
// Re-exports
// ============================================================================

pub use channel::ChannelMessenger;
pub use debug::DebugMessenger;
pub use websocket::{WebSocketListener, WebSocketMessenger};
pub use window::{MessageEvent, Window, WindowId, WindowMessenger};

// ============================================================================
// Types
// ============================================================================

/// Raw message listener.
pub type MessageListener = Arc<dyn Fn(&Value) + Send + Sync>;

// ============================================================================
// Messenger
// ============================================================================

/// Transport capability: post messages, subscribe to incoming ones.
pub trait Messenger: Send + Sync + 'static {
    /// Sends one message to the remote endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::ConnectionClosed`] if the channel is gone.
    fn post_message(&self, message: Value) -> Result<()>;

    /// Registers a listener for incoming messages.
    ///
    /// The listener stays registered until the returned [`Subscription`]
    /// is unsubscribed or dropped.
    fn add_message_listener(&self, listener: MessageListener) -> Subscription;
}

impl<M: Messenger + ?Sized> Messenger for Arc<M> {
    fn post_message(&self, message: Value) -> Result<()> {
        (**self).post_message(message)
    }

    fn add_message_listener(&self, listener: MessageListener) -> Subscription {
        (**self).add_message_listener(listener)
    }
}

// ============================================================================
// Subscription
// ============================================================================

/// Registration handle returned by [`Messenger::add_message_listener`].
///
/// Removes the listener on [`Subscription::unsubscribe`] or on drop.
#[must_use = "dropping a Subscription removes the listener"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Creates a subscription running `cancel` once on removal.
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Creates a subscription that removes nothing.
    #[inline]
    pub fn noop() -> Self {
        Self { cancel: None }
    }

    /// Removes the listener.
    #[inline]
    pub fn unsubscribe(mut self) {
        self.cancel();
    }

    fn cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

// ============================================================================
// ListenerSet
// ============================================================================

/// Registered listeners of one messenger endpoint, in registration order.
#[derive(Clone, Default)]
pub struct ListenerSet {
    listeners: Arc<Mutex<Vec<(ListenerId, MessageListener)>>>,
}

impl ListenerSet {
    /// Creates an empty set.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a listener and returns its subscription.
    pub fn add(&self, listener: MessageListener) -> Subscription {
        let id = ListenerId::next();
        self.listeners.lock().push((id, listener));

        let listeners = Arc::downgrade(&self.listeners);
        Subscription::new(move || {
            if let Some(listeners) = listeners.upgrade() {
                listeners.lock().retain(|(existing, _)| *existing != id);
            }
        })
    }

    /// Delivers a message to every listener.
    ///
    /// The lock is released before listeners run, so they may add or remove
    /// listeners themselves.
    pub fn dispatch(&self, message: &Value) {
        let snapshot: Vec<MessageListener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in snapshot {
            listener(message);
        }
    }

    /// Returns the number of registered listeners.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Returns `true` if no listener is registered.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// Tests
// ============================================================================
