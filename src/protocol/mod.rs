//! Bridge protocol message types.
//!
//! This module defines the message format exchanged over a messenger
//! between two bridge endpoints.
//!
//! # Protocol Overview
//!
//! | Action | Direction | Purpose |
//! |--------|-----------|---------|
//! | `HandshakeRequest` | Initiator → Acceptor | Propose a session ID |
//! | `HandshakeResponse` | Acceptor → Initiator | Confirm the session ID |
//! | `Call` | Caller → Callee | Invoke an exposed method |
//! | `Response` / `Error` | Callee → Caller | Outcome of a call |
//! | `Callback` | Callee → Caller | Fire a callback argument |
//! | `Event` | Either way | Spontaneous notification |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `argument` | Call arguments and callback proxies |
//! | `message` | Wire envelope |

// ============================================================================
// Submodules
// ============================================================================

/// Call arguments and callback proxies.
pub mod argument;

/// Wire envelope.
pub mod message;

// ============================================================================
// Re-exports
// ============================================================================

pub use argument::{Argument, CallbackFn, CallbackProxy};
pub use message::{MARKER, Message, MessageBody};
