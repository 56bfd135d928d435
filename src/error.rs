//! Error types for the konnector bridge.
//!
//! This module defines all error types used throughout the crate, plus the
//! [`RemoteError`] record that crosses the pilot/worker boundary.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use konnector_bridge::{Result, Error};
//!
//! async fn example(script: &ContentScript) -> Result<()> {
//!     script.wait_for_element_in_worker("#login", None).await?;
//!     script.run_in_worker("click", vec![json!("#login")]).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Handshake | [`Error::HandshakeFailed`] |
//! | Integration | [`Error::RoleViolation`], [`Error::RoleAlreadyAssigned`], [`Error::RoleNotAssigned`], [`Error::BridgeNotInitialized`] |
//! | Connection | [`Error::Connection`], [`Error::ConnectionClosed`] |
//! | Protocol | [`Error::Protocol`], [`Error::InvalidArgument`], [`Error::Remote`] |
//! | Execution | [`Error::Timeout`], [`Error::RequestTimeout`], [`Error::ElementNotFound`], [`Error::UnknownEvaluation`] |
//! | Konnector | [`Error::Konnector`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`] |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::io::Error as IoError;
use std::result::Result as StdResult;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::content_script::ContentScriptRole;
use crate::identifiers::RequestId;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// RemoteError
// ============================================================================

/// Error record exchanged between the two sides of a connection.
///
/// Only the name and message travel; stack traces never cross the boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    /// Error kind, e.g. `"Error"` or `"TimeoutError"`.
    pub name: String,
    /// Human readable message.
    pub message: String,
}

impl RemoteError {
    /// Creates a remote error record.
    #[inline]
    #[must_use]
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Creates a generic `Error`-named record.
    #[inline]
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::new("Error", message)
    }

    /// Creates the record sent back for an unknown method name.
    #[must_use]
    pub fn not_implemented(method: &str) -> Self {
        Self::message(format!("The method \"{method}\" has not been implemented."))
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

impl From<Error> for RemoteError {
    fn from(err: Error) -> Self {
        match err {
            Error::Remote(remote) => remote,
            other => Self::new(other.kind_name(), other.to_string()),
        }
    }
}

impl From<serde_json::Error> for RemoteError {
    fn from(err: serde_json::Error) -> Self {
        Self::new("TypeError", err.to_string())
    }
}

// ============================================================================
// KonnectorErrorCode
// ============================================================================

/// Domain error codes a konnector maps its vendor failures to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KonnectorErrorCode {
    /// Credentials were rejected by the vendor.
    LoginFailed,
    /// The vendor website is unavailable.
    VendorDown,
    /// The user must act on the vendor website before continuing.
    UserActionNeeded,
    /// The vendor asked for a challenge (captcha, 2FA).
    ChallengeAsked,
    /// Anything else.
    UnknownError,
}

impl KonnectorErrorCode {
    /// Returns the wire name of the code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LoginFailed => "LOGIN_FAILED",
            Self::VendorDown => "VENDOR_DOWN",
            Self::UserActionNeeded => "USER_ACTION_NEEDED",
            Self::ChallengeAsked => "CHALLENGE_ASKED",
            Self::UnknownError => "UNKNOWN_ERROR",
        }
    }
}

impl fmt::Display for KonnectorErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Handshake Errors
    // ========================================================================
    /// No handshake response arrived before the attempts ran out.
    #[error("Handshake failed after {attempts} attempts")]
    HandshakeFailed {
        /// Number of handshake requests sent.
        attempts: u32,
    },

    // ========================================================================
    // Integration Errors
    // ========================================================================
    /// A role-restricted method was called from the other role.
    #[error("{method} can only be called in the {required} context (current: {actual})")]
    RoleViolation {
        /// Offending method.
        method: String,
        /// Role the method requires.
        required: ContentScriptRole,
        /// Role of the calling context.
        actual: ContentScriptRole,
    },

    /// The role of a content script was already assigned.
    #[error("Content script type already set to {current}, cannot switch to {requested}")]
    RoleAlreadyAssigned {
        /// Role in place.
        current: ContentScriptRole,
        /// Role that was requested.
        requested: ContentScriptRole,
    },

    /// A role was required but none was assigned yet.
    #[error("Content script type is not set, call setContentScriptType first ({method})")]
    RoleNotAssigned {
        /// Method that needed a role.
        method: String,
    },

    /// Bridge used before `init`.
    #[error("Bridge is not initialized: {method}")]
    BridgeNotInitialized {
        /// Operation that needed the bridge.
        method: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// Transport failure.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// Connection closed while an operation was in flight.
    #[error("Connection closed")]
    ConnectionClosed,

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Malformed or unexpected message.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    /// Invalid argument passed to an exposed method or primitive.
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Description of the invalid argument.
        message: String,
    },

    /// The remote side answered a call with an error.
    #[error("Remote error: {0}")]
    Remote(RemoteError),

    // ========================================================================
    // Execution Errors
    // ========================================================================
    /// A polling or waiting primitive ran out of time.
    #[error("Timeout after {timeout_ms}ms: {operation}")]
    Timeout {
        /// Description of the operation that timed out.
        operation: String,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// A single remote call ran out of time.
    #[error("Request {request_id} timed out after {timeout_ms}ms")]
    RequestTimeout {
        /// The request that timed out.
        request_id: RequestId,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Selector matched nothing on the worker page.
    #[error("Element not found: {selector}")]
    ElementNotFound {
        /// Selector used.
        selector: String,
    },

    /// No evaluation registered under that name.
    #[error("Unknown evaluation: {name}")]
    UnknownEvaluation {
        /// Requested evaluation name.
        name: String,
    },

    // ========================================================================
    // Konnector Errors
    // ========================================================================
    /// Vendor failure mapped to a domain code.
    #[error("{code}: {message}")]
    Konnector {
        /// Domain code.
        code: KonnectorErrorCode,
        /// Details.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a role violation error.
    ///
    /// Returns [`Error::RoleNotAssigned`] when the context has no role yet.
    #[inline]
    pub fn role_violation(
        method: impl Into<String>,
        required: ContentScriptRole,
        actual: Option<ContentScriptRole>,
    ) -> Self {
        match actual {
            Some(actual) => Self::RoleViolation {
                method: method.into(),
                required,
                actual,
            },
            None => Self::RoleNotAssigned {
                method: method.into(),
            },
        }
    }

    /// Creates a bridge not initialized error.
    #[inline]
    pub fn bridge_not_initialized(method: impl Into<String>) -> Self {
        Self::BridgeNotInitialized {
            method: method.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    #[inline]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a timeout error.
    #[inline]
    pub fn timeout(operation: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms: saturating_millis(timeout),
        }
    }

    /// Creates a request timeout error.
    #[inline]
    pub fn request_timeout(request_id: RequestId, timeout: Duration) -> Self {
        Self::RequestTimeout {
            request_id,
            timeout_ms: saturating_millis(timeout),
        }
    }

    /// Creates an element not found error.
    #[inline]
    pub fn element_not_found(selector: impl Into<String>) -> Self {
        Self::ElementNotFound {
            selector: selector.into(),
        }
    }

    /// Creates a konnector error with a domain code.
    #[inline]
    pub fn konnector(code: KonnectorErrorCode, message: impl Into<String>) -> Self {
        Self::Konnector {
            code,
            message: message.into(),
        }
    }

    /// Name used when this error is reduced to a [`RemoteError`].
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Timeout { .. } | Self::RequestTimeout { .. } => "TimeoutError",
            Self::RoleViolation { .. }
            | Self::RoleAlreadyAssigned { .. }
            | Self::RoleNotAssigned { .. } => "RoleError",
            Self::InvalidArgument { .. } | Self::Json(_) => "TypeError",
            Self::Konnector { code, .. } => code.as_str(),
            _ => "Error",
        }
    }
}

/// Milliseconds of `duration`, clamped to `u64::MAX`.
fn saturating_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error, local or remote.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::RequestTimeout { .. } => true,
            Self::Remote(remote) => remote.name == "TimeoutError",
            _ => false,
        }
    }

    /// Returns `true` if this is a role error.
    #[inline]
    #[must_use]
    pub fn is_role_violation(&self) -> bool {
        matches!(
            self,
            Self::RoleViolation { .. } | Self::RoleAlreadyAssigned { .. } | Self::RoleNotAssigned { .. }
        )
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::ConnectionClosed
                | Self::HandshakeFailed { .. }
                | Self::WebSocket(_)
        )
    }

    /// Returns the remote error record if the remote side failed the call.
    #[inline]
    #[must_use]
    pub fn as_remote(&self) -> Option<&RemoteError> {
        match self {
            Self::Remote(remote) => Some(remote),
            _ => None,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
