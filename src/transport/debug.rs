//! Debug wrapper logging every message both ways.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::error::Result;

use super::{MessageListener, Messenger, Subscription};

// ============================================================================
// DebugMessenger
// ============================================================================

/// Wraps a messenger and logs outgoing and incoming traffic at debug level.
///
/// Behavior of the wrapped messenger is unchanged.
pub struct DebugMessenger<M> {
    inner: M,
    name: Arc<str>,
}

impl<M: Messenger> DebugMessenger<M> {
    /// Wraps `inner`, tagging log lines with `name`.
    #[inline]
    #[must_use]
    pub fn new(inner: M, name: impl Into<String>) -> Self {
        Self {
            inner,
            name: Arc::from(name.into()),
        }
    }

    /// Returns the wrapped messenger.
    #[inline]
    #[must_use]
    pub fn into_inner(self) -> M {
        self.inner
    }
}

impl<M: Messenger> Messenger for DebugMessenger<M> {
    fn post_message(&self, message: Value) -> Result<()> {
        debug!(messenger = %self.name, direction = "out", %message, "Posting message");
        self.inner.post_message(message)
    }

    fn add_message_listener(&self, listener: MessageListener) -> Subscription {
        let name = Arc::clone(&self.name);
        self.inner.add_message_listener(Arc::new(move |message| {
            debug!(messenger = %name, direction = "in", %message, "Received message");
            listener(message);
        }))
    }
}

// ============================================================================
// Tests
// ============================================================================
