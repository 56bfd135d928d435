//! Method table exposed over the bridge.
//!
//! Both contexts expose the same table; role checks inside each operation
//! decide which calls succeed.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use serde_json::{Value, json};

use crate::connection::{Args, MethodTable};
use crate::error::{Error, Result};

use super::ContentScript;
use super::role::ContentScriptRole;
use super::types::FileEntry;

// ============================================================================
// ExposedMethod
// ============================================================================

/// Built-in methods a content script answers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExposedMethod {
    /// `setContentScriptType(role)`
    SetContentScriptType,
    /// `ensureAuthenticated()`
    EnsureAuthenticated,
    /// `ensureNotAuthenticated()`
    EnsureNotAuthenticated,
    /// `checkAuthenticated()`
    CheckAuthenticated,
    /// `waitForAuthenticated()`
    WaitForAuthenticated,
    /// `waitForElementNoReload(selector)`
    WaitForElementNoReload,
    /// `getUserDataFromWebsite()`
    GetUserDataFromWebsite,
    /// `fetch(context)`
    Fetch,
    /// `click(selector)`
    Click,
    /// `fillText(selector, text)`
    FillText,
    /// `storeFromWorker(object)`
    StoreFromWorker,
    /// `clickAndWait(toClick, toWait)`
    ClickAndWait,
    /// `getCookiesByDomain(domain)`
    GetCookiesByDomain,
    /// `getCookieByDomainAndName(domain, name)`
    GetCookieByDomainAndName,
    /// `downloadFileInWorker(entry)`
    DownloadFileInWorker,
    /// `getCliskVersion()`
    GetCliskVersion,
    /// `checkForElement(selector)`
    CheckForElement,
    /// `evaluate(name, ...args)`
    Evaluate,
}

impl ExposedMethod {
    /// Every built-in method.
    pub const ALL: [Self; 18] = [
        Self::SetContentScriptType,
        Self::EnsureAuthenticated,
        Self::EnsureNotAuthenticated,
        Self::CheckAuthenticated,
        Self::WaitForAuthenticated,
        Self::WaitForElementNoReload,
        Self::GetUserDataFromWebsite,
        Self::Fetch,
        Self::Click,
        Self::FillText,
        Self::StoreFromWorker,
        Self::ClickAndWait,
        Self::GetCookiesByDomain,
        Self::GetCookieByDomainAndName,
        Self::DownloadFileInWorker,
        Self::GetCliskVersion,
        Self::CheckForElement,
        Self::Evaluate,
    ];

    /// Returns the wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SetContentScriptType => "setContentScriptType",
            Self::EnsureAuthenticated => "ensureAuthenticated",
            Self::EnsureNotAuthenticated => "ensureNotAuthenticated",
            Self::CheckAuthenticated => "checkAuthenticated",
            Self::WaitForAuthenticated => "waitForAuthenticated",
            Self::WaitForElementNoReload => "waitForElementNoReload",
            Self::GetUserDataFromWebsite => "getUserDataFromWebsite",
            Self::Fetch => "fetch",
            Self::Click => "click",
            Self::FillText => "fillText",
            Self::StoreFromWorker => "storeFromWorker",
            Self::ClickAndWait => "clickAndWait",
            Self::GetCookiesByDomain => "getCookiesByDomain",
            Self::GetCookieByDomainAndName => "getCookieByDomainAndName",
            Self::DownloadFileInWorker => "downloadFileInWorker",
            Self::GetCliskVersion => "getCliskVersion",
            Self::CheckForElement => "checkForElement",
            Self::Evaluate => "evaluate",
        }
    }
}

impl fmt::Display for ExposedMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// ContentScript - Exposed Methods
// ============================================================================

impl ContentScript {
    /// Builds the table of built-in methods plus vendor additions.
    ///
    /// Handlers hold a weak reference, so the table does not keep the
    /// content script alive.
    #[must_use]
    pub fn exposed_methods(&self) -> MethodTable {
        let mut table = MethodTable::new();

        for method in ExposedMethod::ALL {
            let inner = Arc::downgrade(&self.inner);
            table.insert(method.as_str(), move |args| {
                let script = inner.upgrade().map(|inner| ContentScript { inner });
                async move {
                    let script =
                        script.ok_or_else(|| Error::protocol("content script was dropped"))?;
                    script.invoke(method, args).await
                }
            });
        }

        table.extend(self.inner.extra_methods.read().clone());
        table
    }

    /// Runs a built-in method with received arguments.
    async fn invoke(&self, method: ExposedMethod, args: Args) -> Result<Value> {
        match method {
            ExposedMethod::SetContentScriptType => {
                let role: String = args.get(0)?;
                self.set_content_script_type(role.parse::<ContentScriptRole>()?)?;
                Ok(Value::Null)
            }
            ExposedMethod::EnsureAuthenticated => Ok(json!(self.ensure_authenticated().await?)),
            ExposedMethod::EnsureNotAuthenticated => {
                Ok(json!(self.ensure_not_authenticated().await?))
            }
            ExposedMethod::CheckAuthenticated => Ok(json!(self.check_authenticated().await?)),
            ExposedMethod::WaitForAuthenticated => Ok(json!(self.wait_for_authenticated().await?)),
            ExposedMethod::WaitForElementNoReload => {
                let selector: String = args.get(0)?;
                Ok(json!(self.wait_for_element_no_reload(&selector).await?))
            }
            ExposedMethod::GetUserDataFromWebsite => self.get_user_data_from_website().await,
            ExposedMethod::Fetch => {
                let context: Value = args.get(0)?;
                self.fetch(context).await?;
                Ok(Value::Null)
            }
            ExposedMethod::Click => {
                let selector: String = args.get(0)?;
                self.click(&selector).await?;
                Ok(Value::Null)
            }
            ExposedMethod::FillText => {
                let selector: String = args.get(0)?;
                let text: String = args.get(1)?;
                self.fill_text(&selector, &text).await?;
                Ok(Value::Null)
            }
            ExposedMethod::StoreFromWorker => {
                self.store_from_worker(args.get(0)?)?;
                Ok(Value::Null)
            }
            ExposedMethod::ClickAndWait => {
                let to_click: String = args.get(0)?;
                let to_wait: String = args.get(1)?;
                self.click_and_wait(&to_click, &to_wait).await?;
                Ok(Value::Null)
            }
            ExposedMethod::GetCookiesByDomain => {
                let domain: String = args.get(0)?;
                Ok(serde_json::to_value(self.get_cookies_by_domain(&domain).await?)?)
            }
            ExposedMethod::GetCookieByDomainAndName => {
                let domain: String = args.get(0)?;
                let name: String = args.get(1)?;
                let cookie = self.get_cookie_by_domain_and_name(&domain, &name).await?;
                Ok(serde_json::to_value(cookie)?)
            }
            ExposedMethod::DownloadFileInWorker => {
                let entry: FileEntry = args.get(0)?;
                Ok(json!(self.download_file_in_worker(&entry).await?))
            }
            ExposedMethod::GetCliskVersion => Ok(json!(self.get_clisk_version())),
            ExposedMethod::CheckForElement => {
                let selector: String = args.get(0)?;
                Ok(json!(self.check_for_element(&selector).await?))
            }
            ExposedMethod::Evaluate => {
                let name: String = args.get(0)?;
                self.evaluate(&name, args.rest(1)).await
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
