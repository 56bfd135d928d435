//! Data exchanged with the launcher.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ============================================================================
// FileEntry
// ============================================================================

/// A document to download and save, usually a bill.
///
/// Unknown fields are kept in `extra` and sent back untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    /// Remote URL of the document.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fileurl: Option<String>,
    /// Target file name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    /// Options for fetching `fileurl` (headers, method, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_options: Option<Value>,
    /// Downloaded content as a `data:` URI.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_uri: Option<String>,
    /// Bill date, ISO 8601.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    /// Bill amount.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    /// Vendor name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
    /// Bill type, e.g. `"transport"`.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Inline text content, when there is no `fileurl`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Vendor specific fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl FileEntry {
    /// Creates an entry downloading `fileurl` into `filename`.
    #[must_use]
    pub fn remote(fileurl: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            fileurl: Some(fileurl.into()),
            filename: Some(filename.into()),
            ..Self::default()
        }
    }
}

// ============================================================================
// SaveBillsOptions
// ============================================================================

/// Deduplication settings for `saveBills`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveBillsOptions {
    /// Vendor identifiers matched against bank operations.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub identifiers: Vec<String>,
    /// Accepted date gap in days when matching operations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_delta: Option<u32>,
    /// Accepted amount gap when matching operations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount_delta: Option<f64>,
    /// Entry fields identifying a bill as already saved.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keys: Vec<String>,
}

// ============================================================================
// WorkerState
// ============================================================================

/// Requested state of the worker webview.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerState {
    /// URL to load.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Whether the user can see the worker.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visible: Option<bool>,
}

impl WorkerState {
    /// Navigates the worker to `url`.
    #[inline]
    #[must_use]
    pub fn url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            visible: None,
        }
    }

    /// Shows or hides the worker.
    #[inline]
    #[must_use]
    pub fn visible(visible: bool) -> Self {
        Self {
            url: None,
            visible: Some(visible),
        }
    }
}

// ============================================================================
// Cookie
// ============================================================================

/// A browser cookie as the launcher reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cookie {
    /// Cookie name.
    pub name: String,
    /// Cookie value.
    pub value: String,
    /// Domain.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    /// Path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Secure flag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secure: Option<bool>,
    /// HttpOnly flag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_only: Option<bool>,
    /// Expiration timestamp (seconds).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiration_date: Option<f64>,
}

impl Cookie {
    /// Creates a cookie with name and value.
    #[inline]
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: None,
            path: None,
            secure: None,
            http_only: None,
            expiration_date: None,
        }
    }

    /// Sets the domain.
    #[inline]
    #[must_use]
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }
}

// ============================================================================
// Tests
// ============================================================================
