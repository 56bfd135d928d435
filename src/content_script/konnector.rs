//! Vendor-specific workflow hooks.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

use super::ContentScript;

/// Login, scraping and saving logic of one vendor.
///
/// The same implementation runs in both contexts; each hook is only ever
/// invoked in the context noted on it, and reaches the other context
/// through the `script` it receives.
#[async_trait]
pub trait Konnector: Send + Sync + 'static {
    /// Pilot: makes sure the user is logged in. Returns `true` on success.
    async fn ensure_authenticated(&self, script: &ContentScript) -> Result<bool>;

    /// Pilot: makes sure no user is logged in.
    async fn ensure_not_authenticated(&self, _script: &ContentScript) -> Result<bool> {
        Ok(true)
    }

    /// Either context: returns `true` if the user is logged in.
    async fn check_authenticated(&self, _script: &ContentScript) -> Result<bool> {
        Ok(false)
    }

    /// Pilot: returns data identifying the account, such as
    /// `{"sourceAccountIdentifier": ...}`.
    async fn get_user_data_from_website(&self, script: &ContentScript) -> Result<Value>;

    /// Pilot: downloads and saves documents.
    async fn fetch(&self, script: &ContentScript, context: Value) -> Result<()>;
}
