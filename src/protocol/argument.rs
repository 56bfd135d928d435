//! Call arguments and callback proxies.
//!
//! Closures cannot cross the message boundary. Before a call is sent, every
//! [`Argument::Callback`] is swapped for a serializable marker that names
//! its position in the argument list; the callee turns the marker back into
//! a handle that relays invocations as `Callback` messages.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::identifiers::CallbackId;

use super::message::MARKER;

// ============================================================================
// Types
// ============================================================================

/// Local closure passed as a call argument.
pub type CallbackFn = Arc<dyn Fn(Vec<Value>) + Send + Sync>;

/// Callbacks of one outgoing call, keyed by argument position.
pub(crate) type CallbackTable = FxHashMap<CallbackId, CallbackFn>;

// ============================================================================
// Argument
// ============================================================================

/// An outgoing call argument.
#[derive(Clone)]
pub enum Argument {
    /// Plain JSON value.
    Value(Value),
    /// Closure invoked whenever the callee fires the callback.
    Callback(CallbackFn),
}

impl Argument {
    /// Wraps a closure as a callback argument.
    #[inline]
    #[must_use]
    pub fn callback<F>(f: F) -> Self
    where
        F: Fn(Vec<Value>) + Send + Sync + 'static,
    {
        Self::Callback(Arc::new(f))
    }
}

impl From<Value> for Argument {
    #[inline]
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl fmt::Debug for Argument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Callback(_) => f.write_str("Callback(..)"),
        }
    }
}

// ============================================================================
// CallbackProxy
// ============================================================================

/// Wire stand-in for a callback argument.
///
/// # Format
///
/// ```json
/// { "marker": "@konnector-bridge", "proxy": "callback", "callbackId": 1 }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackProxy {
    /// Always [`MARKER`].
    pub marker: String,
    /// Always `"callback"`.
    pub proxy: String,
    /// Argument position.
    pub callback_id: CallbackId,
}

impl CallbackProxy {
    /// Creates the marker for the argument at `callback_id`.
    #[must_use]
    pub fn new(callback_id: CallbackId) -> Self {
        Self {
            marker: MARKER.to_string(),
            proxy: "callback".to_string(),
            callback_id,
        }
    }

    /// Recognizes a callback marker in a received argument.
    #[must_use]
    pub fn detect(value: &Value) -> Option<CallbackId> {
        let object = value.as_object()?;
        if object.get("marker").and_then(Value::as_str) != Some(MARKER)
            || object.get("proxy").and_then(Value::as_str) != Some("callback")
        {
            return None;
        }
        object
            .get("callbackId")
            .and_then(Value::as_u64)
            .map(|id| CallbackId::new(id as usize))
    }

    pub(crate) fn to_value(&self) -> Value {
        serde_json::json!({
            "marker": self.marker,
            "proxy": self.proxy,
            "callbackId": self.callback_id,
        })
    }
}

// ============================================================================
// Sanitizing
// ============================================================================

/// Splits arguments into wire values and the callbacks they stand for.
pub(crate) fn sanitize(args: Vec<Argument>) -> (Vec<Value>, CallbackTable) {
    let mut callbacks = CallbackTable::default();
    let values = args
        .into_iter()
        .enumerate()
        .map(|(position, arg)| match arg {
            Argument::Value(value) => value,
            Argument::Callback(callback) => {
                let id = CallbackId::new(position);
                callbacks.insert(id, callback);
                CallbackProxy::new(id).to_value()
            }
        })
        .collect();
    (values, callbacks)
}

// ============================================================================
// Tests
// ============================================================================
