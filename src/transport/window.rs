//! Origin-checked window messaging.
//!
//! A [`Window`] is an in-process browsing context with an origin and a
//! message event queue. [`WindowMessenger`] binds a local window to one
//! remote window and only accepts events whose source is that window and
//! whose origin matches the expected origin (or the expected origin is
//! `"*"`). This check is the sole access-control boundary of the bridge.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::trace;
use url::Url;

use crate::error::{Error, Result};
use crate::identifiers::ListenerId;

use super::{MessageListener, Messenger, Subscription};

// ============================================================================
// Constants
// ============================================================================

/// Origin accepting any sender.
pub const ANY_ORIGIN: &str = "*";

// ============================================================================
// Types
// ============================================================================

/// Identity of a window, compared as `event.source`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowId(u64);

impl WindowId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "window-{}", self.0)
    }
}

/// A message event as seen by the receiving window.
#[derive(Debug, Clone)]
pub struct MessageEvent {
    /// Window that posted the message.
    pub source: WindowId,
    /// Origin of the posting window.
    pub origin: String,
    /// Message payload.
    pub data: Value,
}

type EventListener = Arc<dyn Fn(&MessageEvent) + Send + Sync>;

// ============================================================================
// Window
// ============================================================================

struct WindowInner {
    id: WindowId,
    origin: String,
    inbox: mpsc::UnboundedSender<MessageEvent>,
    listeners: Mutex<Vec<(ListenerId, EventListener)>>,
}

/// An in-process browsing context.
#[derive(Clone)]
pub struct Window {
    inner: Arc<WindowInner>,
}

impl Window {
    /// Opens a window loaded from `url`.
    ///
    /// Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `url` cannot be parsed.
    pub fn open(url: &str) -> Result<Self> {
        let origin = origin_of(url)?;
        let (inbox, rx) = mpsc::unbounded_channel();

        let inner = Arc::new(WindowInner {
            id: WindowId::next(),
            origin,
            inbox,
            listeners: Mutex::new(Vec::new()),
        });

        tokio::spawn(Self::pump(rx, Arc::downgrade(&inner)));
        Ok(Self { inner })
    }

    /// Returns the window identity.
    #[inline]
    #[must_use]
    pub fn id(&self) -> WindowId {
        self.inner.id
    }

    /// Returns the serialized origin, e.g. `https://www.sncf-connect.com`.
    #[inline]
    #[must_use]
    pub fn origin(&self) -> &str {
        &self.inner.origin
    }

    /// Posts `data` to this window on behalf of `sender`.
    ///
    /// Like the browser API, the message is silently discarded when this
    /// window's origin does not match `target_origin`.
    pub fn post_message(&self, data: Value, target_origin: &str, sender: &Window) -> Result<()> {
        if target_origin != ANY_ORIGIN && target_origin != self.inner.origin {
            trace!(target = %self.inner.id, target_origin, "Target origin mismatch, message discarded");
            return Ok(());
        }

        self.inner
            .inbox
            .send(MessageEvent {
                source: sender.id(),
                origin: sender.origin().to_string(),
                data,
            })
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Registers a raw message event listener.
    pub fn add_event_listener(&self, listener: EventListener) -> Subscription {
        let id = ListenerId::next();
        self.inner.listeners.lock().push((id, listener));

        let inner = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = inner.upgrade() {
                inner.listeners.lock().retain(|(existing, _)| *existing != id);
            }
        })
    }

    async fn pump(
        mut rx: mpsc::UnboundedReceiver<MessageEvent>,
        inner: std::sync::Weak<WindowInner>,
    ) {
        while let Some(event) = rx.recv().await {
            let Some(inner) = inner.upgrade() else {
                break;
            };
            let snapshot: Vec<EventListener> = inner
                .listeners
                .lock()
                .iter()
                .map(|(_, listener)| Arc::clone(listener))
                .collect();
            drop(inner);

            for listener in snapshot {
                listener(&event);
            }
        }
    }
}

impl fmt::Debug for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Window")
            .field("id", &self.inner.id)
            .field("origin", &self.inner.origin)
            .finish()
    }
}

// ============================================================================
// WindowMessenger
// ============================================================================

/// Messenger between a local window and one remote window.
pub struct WindowMessenger {
    local: Window,
    remote: Window,
    remote_origin: String,
}

impl WindowMessenger {
    /// Binds `local` to `remote`, accepting messages from `remote_origin`.
    ///
    /// `remote_origin` may be a full URL, a bare origin, or `"*"`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `remote_origin` is not a URL.
    pub fn new(local: Window, remote: Window, remote_origin: &str) -> Result<Self> {
        let remote_origin = if remote_origin == ANY_ORIGIN {
            ANY_ORIGIN.to_string()
        } else {
            origin_of(remote_origin)?
        };

        Ok(Self {
            local,
            remote,
            remote_origin,
        })
    }

    /// Returns `true` if an event passes the source and origin check.
    #[must_use]
    pub fn accepts(&self, event: &MessageEvent) -> bool {
        accepts(self.remote.id(), &self.remote_origin, event)
    }
}

fn accepts(remote: WindowId, remote_origin: &str, event: &MessageEvent) -> bool {
    event.source == remote && (remote_origin == ANY_ORIGIN || event.origin == remote_origin)
}

impl Messenger for WindowMessenger {
    fn post_message(&self, message: Value) -> Result<()> {
        self.remote
            .post_message(message, &self.remote_origin, &self.local)
    }

    fn add_message_listener(&self, listener: MessageListener) -> Subscription {
        let remote = self.remote.id();
        let remote_origin = self.remote_origin.clone();

        self.local.add_event_listener(Arc::new(move |event| {
            if accepts(remote, &remote_origin, event) {
                listener(&event.data);
            } else {
                trace!(source = %event.source, origin = %event.origin, "Message failed origin check");
            }
        }))
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Serializes the origin of a URL (`scheme://host[:port]`).
fn origin_of(url: &str) -> Result<String> {
    let parsed = Url::parse(url)
        .map_err(|e| Error::invalid_argument(format!("invalid origin {url}: {e}")))?;
    Ok(parsed.origin().ascii_serialization())
}

// ============================================================================
// Tests
// ============================================================================
