//! Konnector Bridge - Pilot/worker remote calls for SNCF Connect automation.
//!
//! This library lets two content scripts and a launcher call each other's
//! methods over any message channel, and builds the konnector workflow on
//! top of that.
//!
//! # Architecture
//!
//! A konnector runs in two contexts:
//!
//! - **Pilot**: orchestrates the workflow, talks to the launcher
//! - **Worker**: automates the vendor website
//!
//! The launcher sits in between. It relays `runInWorker` from the pilot to
//! the worker and `sendToPilot` from the worker back to the pilot.
//!
//! Key design principles:
//!
//! - Messages are plain JSON, tagged with a marker and a session id
//! - Both sides of a connection are symmetric once the handshake completes
//! - Callbacks travel as proxy markers and may be invoked any number of times
//! - Pilot code runs in the worker only through named, registered evaluations
//!
//! # Quick Start
//!
//! ```no_run
//! use konnector_bridge::{ChannelMessenger, Initiator, Acceptor, MethodTable, Connection, Result};
//! use konnector_bridge::connection::Handshake;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let (a, b) = ChannelMessenger::pair();
//!
//!     let methods = MethodTable::new().with("double", |args| async move {
//!         let n: i64 = args.get(0)?;
//!         Ok(json!(n * 2))
//!     });
//!
//!     let (initiator, acceptor) = (Initiator::new(a), Acceptor::new(b));
//!     let (child, parent) = tokio::join!(
//!         initiator.establish(methods),
//!         acceptor.establish(MethodTable::new()),
//!     );
//!     let (_child, parent): (Connection, Connection) = (child?, parent?);
//!
//!     let value = parent.remote_handle().call_values("double", vec![json!(21)]).await?;
//!     assert_eq!(value, json!(42));
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`bridge`] | Late-bound connection holder |
//! | [`connection`] | Handshake, correlation, local and remote handles |
//! | [`content_script`] | Role-aware konnector automation |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`launcher`] | Relay between pilot and worker |
//! | [`protocol`] | Wire messages and arguments |
//! | [`transport`] | Messenger implementations |

// ============================================================================
// Modules
// ============================================================================

/// Late-bound connection holder.
pub mod bridge;

/// Handshake, call correlation and method dispatch.
///
/// A [`Connection`] is produced by a [`connection::Handshake`] and owns a
/// [`LocalHandle`] and a [`RemoteHandle`].
pub mod connection;

/// Role-aware konnector automation.
pub mod content_script;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers for sessions, requests, callbacks and listeners.
pub mod identifiers;

/// Launcher side of the konnector.
pub mod launcher;

/// Wire message types.
pub mod protocol;

/// Message channels.
pub mod transport;

#[cfg(test)]
mod test_support;

// ============================================================================
// Re-exports
// ============================================================================

// Bridge
pub use bridge::Bridge;

// Connection types
pub use connection::{
    Acceptor, Args, Connection, Handshake, HandshakeOptions, Initiator, LocalHandle, Method,
    MethodTable, RemoteCallback, RemoteHandle,
};

// Content script types
pub use content_script::{
    ContentScript, ContentScriptBuilder, ContentScriptOptions, ContentScriptRole,
    ContentScriptState, Cookie, ExposedMethod, FetchedResource, FileEntry, Konnector, Page,
    SaveBillsOptions, UntilTrueOptions, WorkerState,
};

// Error types
pub use error::{Error, KonnectorErrorCode, RemoteError, Result};

// Identifier types
pub use identifiers::{CallbackId, ListenerId, RequestId, SessionId};

// Launcher types
pub use launcher::{Launcher, LauncherHost, RunOutcome};

// Protocol types
pub use protocol::{Argument, Message};

// Transport types
pub use transport::{
    ChannelMessenger, DebugMessenger, Messenger, WebSocketListener, WebSocketMessenger,
    WindowMessenger,
};
