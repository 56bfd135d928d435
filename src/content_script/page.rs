//! Worker page capability.
//!
//! The worker drives the vendor website through a [`Page`]: element lookup,
//! clicks, form filling and authenticated resource fetches. Selector strings
//! and page structure belong to the konnector.

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::Value;

use crate::error::Result;

// ============================================================================
// Constants
// ============================================================================

/// MIME type used when the server sent none.
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

// ============================================================================
// Page
// ============================================================================

/// DOM access of the worker context.
#[async_trait]
pub trait Page: Send + Sync {
    /// Returns the current page URL.
    fn url(&self) -> String;

    /// Returns `true` if `selector` matches at least one element.
    async fn element_exists(&self, selector: &str) -> Result<bool>;

    /// Clicks the first element matching `selector`.
    ///
    /// # Errors
    ///
    /// [`crate::Error::ElementNotFound`] if nothing matches.
    async fn click(&self, selector: &str) -> Result<()>;

    /// Types `text` into the first element matching `selector`.
    ///
    /// # Errors
    ///
    /// [`crate::Error::ElementNotFound`] if nothing matches.
    async fn fill_text(&self, selector: &str, text: &str) -> Result<()>;

    /// Fetches `url` with the page's cookies, applying `request_options`.
    async fn fetch_resource(&self, url: &str, request_options: Option<&Value>) -> Result<FetchedResource>;
}

// ============================================================================
// FetchedResource
// ============================================================================

/// Binary payload fetched by the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedResource {
    /// MIME type, possibly empty.
    pub content_type: String,
    /// Raw body.
    pub body: Vec<u8>,
}

impl FetchedResource {
    /// Creates a resource.
    #[inline]
    #[must_use]
    pub fn new(content_type: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            content_type: content_type.into(),
            body: body.into(),
        }
    }

    /// Encodes the payload as `data:<mime>;base64,<body>`.
    ///
    /// Binary data cannot cross the bridge as is.
    #[must_use]
    pub fn to_data_uri(&self) -> String {
        let mime = match self.content_type.trim() {
            "" => DEFAULT_CONTENT_TYPE,
            mime => mime,
        };
        format!("data:{mime};base64,{}", STANDARD.encode(&self.body))
    }
}

// ============================================================================
// Tests
// ============================================================================
