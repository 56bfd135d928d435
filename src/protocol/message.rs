//! Wire envelope exchanged between pilot, worker and launcher.
//!
//! Every message is a JSON object carrying the bridge marker, an `action`
//! tag and the session ID. This is the only artifact that must stay
//! compatible across independently deployed sides.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{RemoteError, Result};
use crate::identifiers::{CallbackId, RequestId, SessionId};

// ============================================================================
// Constants
// ============================================================================

/// Marker identifying bridge traffic on a shared channel.
pub const MARKER: &str = "@konnector-bridge";

// ============================================================================
// Message
// ============================================================================

/// A bridge message.
///
/// # Format
///
/// ```json
/// {
///   "marker": "@konnector-bridge",
///   "action": "Call",
///   "sessionId": "6f1c...",
///   "requestId": 3,
///   "methodName": "double",
///   "args": [21]
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Always [`MARKER`].
    pub marker: String,

    /// Session the message belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,

    /// Action and its fields.
    #[serde(flatten)]
    pub body: MessageBody,
}

/// Action-specific part of a [`Message`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum MessageBody {
    /// Initiator proposes a session.
    HandshakeRequest,

    /// Acceptor confirms a session.
    HandshakeResponse,

    /// Invoke an exposed method.
    #[serde(rename_all = "camelCase")]
    Call {
        /// Correlation ID.
        request_id: RequestId,
        /// Method to invoke.
        method_name: String,
        /// Sanitized arguments.
        #[serde(default)]
        args: Vec<Value>,
    },

    /// Outcome of a call.
    #[serde(rename_all = "camelCase")]
    Response {
        /// Correlation ID.
        request_id: RequestId,
        /// Result on success.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        /// Error on failure.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<RemoteError>,
    },

    /// Failure outcome of a call, accepted from older peers.
    #[serde(rename_all = "camelCase")]
    Error {
        /// Correlation ID.
        request_id: RequestId,
        /// Error record.
        error: RemoteError,
    },

    /// Spontaneous notification.
    #[serde(rename_all = "camelCase")]
    Event {
        /// Event name.
        event_name: String,
        /// Event data.
        #[serde(default)]
        payload: Value,
    },

    /// Invocation of a callback argument of a pending call.
    #[serde(rename_all = "camelCase")]
    Callback {
        /// Call the callback belongs to.
        request_id: RequestId,
        /// Argument position of the callback.
        callback_id: CallbackId,
        /// Callback arguments.
        #[serde(default)]
        args: Vec<Value>,
    },
}

impl MessageBody {
    /// Returns the action tag.
    #[must_use]
    pub const fn action(&self) -> &'static str {
        match self {
            Self::HandshakeRequest => "HandshakeRequest",
            Self::HandshakeResponse => "HandshakeResponse",
            Self::Call { .. } => "Call",
            Self::Response { .. } => "Response",
            Self::Error { .. } => "Error",
            Self::Event { .. } => "Event",
            Self::Callback { .. } => "Callback",
        }
    }
}

impl Message {
    /// Creates a message for a session.
    #[inline]
    #[must_use]
    pub fn new(session_id: SessionId, body: MessageBody) -> Self {
        Self {
            marker: MARKER.to_string(),
            session_id: Some(session_id),
            body,
        }
    }

    /// Creates a handshake request proposing `session_id`.
    #[inline]
    #[must_use]
    pub fn handshake_request(session_id: SessionId) -> Self {
        Self::new(session_id, MessageBody::HandshakeRequest)
    }

    /// Creates a handshake response confirming `session_id`.
    #[inline]
    #[must_use]
    pub fn handshake_response(session_id: SessionId) -> Self {
        Self::new(session_id, MessageBody::HandshakeResponse)
    }

    /// Decodes a raw message.
    ///
    /// Returns `None` for anything that is not bridge traffic: other JSON,
    /// a foreign marker, or an unknown action.
    #[must_use]
    pub fn from_value(raw: &Value) -> Option<Self> {
        if raw.get("marker").and_then(Value::as_str) != Some(MARKER) {
            return None;
        }
        Self::deserialize(raw).ok()
    }

    /// Encodes the message for a messenger.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Json`] if a payload cannot be serialized.
    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Returns `true` if the message belongs to `session_id`.
    #[inline]
    #[must_use]
    pub fn is_for(&self, session_id: &SessionId) -> bool {
        self.session_id.as_ref() == Some(session_id)
    }
}

// ============================================================================
// Tests
// ============================================================================
