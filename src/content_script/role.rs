//! Execution roles and workflow states.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ============================================================================
// ContentScriptRole
// ============================================================================

/// Context a content script runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentScriptRole {
    /// Controller talking to the launcher.
    Pilot,
    /// Page automation sandbox on the vendor website.
    Worker,
}

impl ContentScriptRole {
    /// Returns the wire name.
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pilot => "pilot",
            Self::Worker => "worker",
        }
    }
}

impl fmt::Display for ContentScriptRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentScriptRole {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pilot" => Ok(Self::Pilot),
            "worker" => Ok(Self::Worker),
            other => Err(Error::invalid_argument(format!(
                "unknown content script type: {other}"
            ))),
        }
    }
}

// ============================================================================
// ContentScriptState
// ============================================================================

/// Progress of the login / scrape / save workflow.
///
/// ```text
/// Uninitialized -> RoleAssigned -> Authenticating -> Authenticated
///                                                 -> Fetching -> Done | Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ContentScriptState {
    /// No role yet.
    #[default]
    Uninitialized,
    /// Role set, workflow not started.
    RoleAssigned,
    /// `ensureAuthenticated` in progress.
    Authenticating,
    /// User is logged in.
    Authenticated,
    /// `fetch` in progress.
    Fetching,
    /// `fetch` completed.
    Done,
    /// A workflow step failed.
    Failed,
}

// ============================================================================
// Tests
// ============================================================================
