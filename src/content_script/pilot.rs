//! Pilot-side operations.
//!
//! Every method here runs in the pilot context. Most of them are thin
//! passthroughs to the launcher; the waiting primitives drive the worker
//! through `runInWorker`.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use serde_json::{Value, json};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::{Error, Result};

use super::core::is_truthy;
use super::role::{ContentScriptRole, ContentScriptState};
use super::types::{Cookie, FileEntry, SaveBillsOptions, WorkerState};
use super::ContentScript;

// ============================================================================
// UntilTrueOptions
// ============================================================================

/// Arguments of [`ContentScript::run_in_worker_until_true`].
#[derive(Debug, Clone, PartialEq)]
pub struct UntilTrueOptions {
    /// Worker method to call.
    pub method: String,
    /// Deadline checked before each attempt; `None` waits forever.
    pub timeout: Option<Duration>,
    /// Arguments of every attempt.
    pub args: Vec<Value>,
}

impl UntilTrueOptions {
    /// Calls `method` without arguments and without deadline.
    #[must_use]
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            timeout: None,
            args: Vec::new(),
        }
    }

    /// Sets the deadline.
    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the arguments.
    #[inline]
    #[must_use]
    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }
}

// ============================================================================
// ContentScript - Workflow
// ============================================================================

impl ContentScript {
    /// Runs the konnector login flow.
    ///
    /// # Errors
    ///
    /// Role errors, or whatever the konnector fails with.
    pub async fn ensure_authenticated(&self) -> Result<bool> {
        self.only_in(ContentScriptRole::Pilot, "ensureAuthenticated")?;
        self.set_state(ContentScriptState::Authenticating);

        match self.inner.konnector.ensure_authenticated(self).await {
            Ok(true) => {
                self.set_state(ContentScriptState::Authenticated);
                info!("User authenticated");
                Ok(true)
            }
            Ok(false) => {
                self.set_state(ContentScriptState::RoleAssigned);
                Ok(false)
            }
            Err(e) => {
                self.set_state(ContentScriptState::Failed);
                Err(e)
            }
        }
    }

    /// Runs the konnector logout flow.
    ///
    /// # Errors
    ///
    /// Role errors, or whatever the konnector fails with.
    pub async fn ensure_not_authenticated(&self) -> Result<bool> {
        self.only_in(ContentScriptRole::Pilot, "ensureNotAuthenticated")?;

        let logged_out = self.inner.konnector.ensure_not_authenticated(self).await?;
        if logged_out {
            self.set_state(ContentScriptState::RoleAssigned);
        }
        Ok(logged_out)
    }

    /// Returns account data scraped by the konnector.
    ///
    /// # Errors
    ///
    /// Role errors, or whatever the konnector fails with.
    pub async fn get_user_data_from_website(&self) -> Result<Value> {
        self.only_in(ContentScriptRole::Pilot, "getUserDataFromWebsite")?;
        self.inner.konnector.get_user_data_from_website(self).await
    }

    /// Runs the konnector document collection.
    ///
    /// # Errors
    ///
    /// Role errors, or whatever the konnector fails with.
    pub async fn fetch(&self, context: Value) -> Result<()> {
        self.only_in(ContentScriptRole::Pilot, "fetch")?;
        self.set_state(ContentScriptState::Fetching);

        match self.inner.konnector.fetch(self, context).await {
            Ok(()) => {
                self.set_state(ContentScriptState::Done);
                info!("Fetch completed");
                Ok(())
            }
            Err(e) => {
                self.set_state(ContentScriptState::Failed);
                Err(e)
            }
        }
    }
}

// ============================================================================
// ContentScript - Worker Control
// ============================================================================

impl ContentScript {
    /// Runs an exposed method in the worker and returns its result.
    ///
    /// # Errors
    ///
    /// - [`Error::RoleViolation`] outside the pilot
    /// - [`Error::BridgeNotInitialized`] before `init_bridge`
    /// - [`Error::Remote`] if the worker method failed
    pub async fn run_in_worker(&self, method: &str, args: Vec<Value>) -> Result<Value> {
        self.only_in(ContentScriptRole::Pilot, "runInWorker")?;
        debug!(method, "runInWorker");

        let mut call_args = Vec::with_capacity(args.len() + 1);
        call_args.push(Value::String(method.to_string()));
        call_args.extend(args);

        self.bridge().call_values("runInWorker", call_args).await
    }

    /// Calls a worker method until it returns a truthy value.
    ///
    /// The deadline is checked before each attempt, so the last attempt may
    /// overrun it by its own duration. Worker errors end the loop.
    ///
    /// # Errors
    ///
    /// [`Error::Timeout`] if the deadline passed first, or any
    /// [`ContentScript::run_in_worker`] error.
    pub async fn run_in_worker_until_true(&self, options: UntilTrueOptions) -> Result<Value> {
        self.only_in(ContentScriptRole::Pilot, "runInWorkerUntilTrue")?;

        let start = Instant::now();
        let mut attempts = 0_u32;
        loop {
            if let Some(timeout) = options.timeout
                && start.elapsed() >= timeout
            {
                return Err(Error::timeout(
                    format!("runInWorkerUntilTrue {}", options.method),
                    timeout,
                ));
            }

            attempts += 1;
            let result = self
                .run_in_worker(&options.method, options.args.clone())
                .await?;
            debug!(method = %options.method, attempts, %result, "runInWorkerUntilTrue attempt");

            if is_truthy(&result) {
                return Ok(result);
            }
        }
    }

    /// Waits until `selector` exists in the worker page.
    ///
    /// # Errors
    ///
    /// Same as [`ContentScript::run_in_worker_until_true`].
    pub async fn wait_for_element_in_worker(
        &self,
        selector: &str,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let mut options = UntilTrueOptions::new("waitForElementNoReload")
            .with_args(vec![Value::String(selector.to_string())]);
        options.timeout = timeout;

        self.run_in_worker_until_true(options).await?;
        Ok(())
    }

    /// Clicks `to_click` in the worker, then waits for `to_wait`.
    ///
    /// # Errors
    ///
    /// The first failing step's error.
    pub async fn click_and_wait(&self, to_click: &str, to_wait: &str) -> Result<()> {
        self.only_in(ContentScriptRole::Pilot, "clickAndWait")?;
        self.run_in_worker("click", vec![Value::String(to_click.to_string())])
            .await?;
        self.wait_for_element_in_worker(to_wait, None).await
    }

    /// Runs the named evaluation in the worker.
    ///
    /// # Errors
    ///
    /// Role errors, or the worker's [`Error::UnknownEvaluation`] as a remote
    /// error.
    pub async fn evaluate_in_worker(&self, name: &str, args: Vec<Value>) -> Result<Value> {
        self.only_in(ContentScriptRole::Pilot, "evaluateInWorker")?;

        let mut call_args = Vec::with_capacity(args.len() + 1);
        call_args.push(Value::String(name.to_string()));
        call_args.extend(args);

        self.run_in_worker("evaluate", call_args).await
    }

    /// Navigates the worker to `url`.
    ///
    /// # Errors
    ///
    /// Same as [`ContentScript::set_worker_state`].
    pub async fn goto(&self, url: &str) -> Result<()> {
        self.only_in(ContentScriptRole::Pilot, "goto")?;
        self.set_worker_state(WorkerState::url(url)).await
    }

    /// Asks the launcher to change the worker's URL or visibility.
    ///
    /// # Errors
    ///
    /// Role, bridge or launcher errors.
    pub async fn set_worker_state(&self, state: WorkerState) -> Result<()> {
        self.only_in(ContentScriptRole::Pilot, "setWorkerState")?;
        self.bridge()
            .call_values("setWorkerState", vec![serde_json::to_value(state)?])
            .await?;
        Ok(())
    }

    /// Prevents the user from interacting with the worker.
    ///
    /// # Errors
    ///
    /// Role, bridge or launcher errors.
    pub async fn block_worker_interactions(&self) -> Result<()> {
        self.only_in(ContentScriptRole::Pilot, "blockWorkerInteractions")?;
        self.bridge()
            .call_values("blockWorkerInteractions", Vec::new())
            .await?;
        Ok(())
    }

    /// Lets the user interact with the worker again.
    ///
    /// # Errors
    ///
    /// Role, bridge or launcher errors.
    pub async fn unblock_worker_interactions(&self) -> Result<()> {
        self.only_in(ContentScriptRole::Pilot, "unblockWorkerInteractions")?;
        self.bridge()
            .call_values("unblockWorkerInteractions", Vec::new())
            .await?;
        Ok(())
    }
}

// ============================================================================
// ContentScript - Launcher Passthroughs
// ============================================================================

impl ContentScript {
    /// Saves files through the launcher.
    ///
    /// # Errors
    ///
    /// Role, bridge or launcher errors.
    pub async fn save_files(&self, entries: &[FileEntry], options: Value) -> Result<Value> {
        self.only_in(ContentScriptRole::Pilot, "saveFiles")?;
        self.bridge()
            .call_values("saveFiles", vec![serde_json::to_value(entries)?, options])
            .await
    }

    /// Saves bills through the launcher.
    ///
    /// # Errors
    ///
    /// Role, bridge or launcher errors.
    pub async fn save_bills(&self, entries: &[FileEntry], options: &SaveBillsOptions) -> Result<Value> {
        self.only_in(ContentScriptRole::Pilot, "saveBills")?;
        self.bridge()
            .call_values(
                "saveBills",
                vec![serde_json::to_value(entries)?, serde_json::to_value(options)?],
            )
            .await
    }

    /// Returns stored credentials, if any.
    ///
    /// # Errors
    ///
    /// Role, bridge or launcher errors.
    pub async fn get_credentials(&self) -> Result<Option<Value>> {
        self.only_in(ContentScriptRole::Pilot, "getCredentials")?;
        let credentials = self.bridge().call_values("getCredentials", Vec::new()).await?;
        Ok((!credentials.is_null()).then_some(credentials))
    }

    /// Stores credentials.
    ///
    /// # Errors
    ///
    /// Role, bridge or launcher errors.
    pub async fn save_credentials(&self, credentials: Value) -> Result<()> {
        self.only_in(ContentScriptRole::Pilot, "saveCredentials")?;
        self.bridge()
            .call_values("saveCredentials", vec![credentials])
            .await?;
        Ok(())
    }

    /// Stores the account identity.
    ///
    /// # Errors
    ///
    /// Role, bridge or launcher errors.
    pub async fn save_identity(&self, identity: Value) -> Result<()> {
        self.only_in(ContentScriptRole::Pilot, "saveIdentity")?;
        self.bridge()
            .call_values("saveIdentity", vec![identity])
            .await?;
        Ok(())
    }

    /// Reads a cookie saved in the launcher keychain.
    ///
    /// # Errors
    ///
    /// Role, bridge or launcher errors.
    pub async fn get_cookie_from_keychain_by_name(&self, name: &str) -> Result<Option<Value>> {
        self.only_in(ContentScriptRole::Pilot, "getCookieFromKeychainByName")?;
        let cookie = self
            .bridge()
            .call_values("getCookieFromKeychainByName", vec![json!(name)])
            .await?;
        Ok((!cookie.is_null()).then_some(cookie))
    }

    /// Saves a cookie in the launcher keychain.
    ///
    /// # Errors
    ///
    /// Role, bridge or launcher errors.
    pub async fn save_cookie_to_keychain(&self, cookie: Value) -> Result<()> {
        self.only_in(ContentScriptRole::Pilot, "saveCookieToKeychain")?;
        self.bridge()
            .call_values("saveCookieToKeychain", vec![cookie])
            .await?;
        Ok(())
    }

    /// Runs a query against the launcher's document store.
    ///
    /// # Errors
    ///
    /// Role, bridge or launcher errors.
    pub async fn query_all(&self, definition: Value, options: Value) -> Result<Value> {
        self.only_in(ContentScriptRole::Pilot, "queryAll")?;
        self.bridge()
            .call_values("queryAll", vec![definition, options])
            .await
    }
}

// ============================================================================
// ContentScript - Any Role
// ============================================================================

impl ContentScript {
    /// Asks the konnector whether the user is logged in.
    ///
    /// # Errors
    ///
    /// Whatever the konnector fails with.
    pub async fn check_authenticated(&self) -> Result<bool> {
        self.inner.konnector.check_authenticated(self).await
    }

    /// Merges an object sent by the worker into the store.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] if `value` is not an object.
    pub fn store_from_worker(&self, value: Value) -> Result<()> {
        let Value::Object(object) = value else {
            return Err(Error::invalid_argument("storeFromWorker expects an object"));
        };
        debug!(keys = ?object.keys().collect::<Vec<_>>(), "Storing data from worker");
        self.store().merge(object);
        Ok(())
    }

    /// Returns the cookies the launcher holds for `domain`.
    ///
    /// # Errors
    ///
    /// Bridge or launcher errors.
    pub async fn get_cookies_by_domain(&self, domain: &str) -> Result<Vec<Cookie>> {
        let cookies = self
            .bridge()
            .call_values("getCookiesByDomain", vec![json!(domain)])
            .await?;
        if cookies.is_null() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_value(cookies)?)
    }

    /// Returns the version of this library.
    #[inline]
    #[must_use]
    pub fn get_clisk_version(&self) -> &'static str {
        env!("CARGO_PKG_VERSION")
    }
}

// ============================================================================
// Tests
// ============================================================================
