//! Launcher-side relay between pilot and worker.
//!
//! The launcher holds one connection per content script. It serves the
//! pilot's passthrough calls from a [`LauncherHost`], relays `runInWorker`
//! to the worker and `sendToPilot` back to the pilot, and drives a full
//! konnector run.
//!
//! ```text
//!   pilot  <--- connection --->  Launcher  <--- connection --->  worker
//!                                   |
//!                             LauncherHost
//!                  (files, credentials, cookies, webview)
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::connection::{Args, Connection, Handshake, MethodTable};
use crate::content_script::{ContentScriptRole, Cookie, FileEntry, SaveBillsOptions, WorkerState};
use crate::error::{Error, KonnectorErrorCode, Result};
use crate::identifiers::ListenerId;

// ============================================================================
// LauncherHost
// ============================================================================

/// Services the launcher offers to content scripts.
#[async_trait]
pub trait LauncherHost: Send + Sync + 'static {
    /// Saves downloaded files. Returns the saved file records.
    async fn save_files(&self, entries: Vec<FileEntry>, options: Value) -> Result<Value>;

    /// Saves bills with deduplication.
    async fn save_bills(&self, entries: Vec<FileEntry>, options: SaveBillsOptions) -> Result<Value>;

    /// Returns stored credentials.
    async fn get_credentials(&self) -> Result<Option<Value>>;

    /// Stores credentials.
    async fn save_credentials(&self, credentials: Value) -> Result<()>;

    /// Stores the account identity.
    async fn save_identity(&self, identity: Value) -> Result<()>;

    /// Returns the cookies of `domain`.
    async fn get_cookies_by_domain(&self, domain: &str) -> Result<Vec<Cookie>>;

    /// Reads a cookie from the keychain.
    async fn get_cookie_from_keychain_by_name(&self, name: &str) -> Result<Option<Value>>;

    /// Saves a cookie to the keychain.
    async fn save_cookie_to_keychain(&self, cookie: Value) -> Result<()>;

    /// Returns one cookie of `domain`.
    async fn get_cookie_by_domain_and_name(&self, domain: &str, name: &str) -> Result<Option<Cookie>>;

    /// Changes the worker's URL or visibility.
    async fn set_worker_state(&self, state: WorkerState) -> Result<()>;

    /// Prevents user interaction with the worker.
    async fn block_worker_interactions(&self) -> Result<()>;

    /// Allows user interaction with the worker.
    async fn unblock_worker_interactions(&self) -> Result<()>;

    /// Queries the document store.
    async fn query_all(&self, definition: Value, options: Value) -> Result<Value>;
}

// ============================================================================
// RunOutcome
// ============================================================================

/// Result of [`Launcher::run`].
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    /// Value returned by `getUserDataFromWebsite`.
    pub user_data: Value,
}

// ============================================================================
// Launcher
// ============================================================================

/// Relay between a pilot and a worker content script.
pub struct Launcher {
    host: Arc<dyn LauncherHost>,
    pilot: RwLock<Option<Connection>>,
    worker: RwLock<Option<Connection>>,
}

impl fmt::Debug for Launcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Launcher")
            .field("pilot", &self.pilot.read().is_some())
            .field("worker", &self.worker.read().is_some())
            .finish_non_exhaustive()
    }
}

impl Launcher {
    /// Creates a launcher serving `host`.
    #[must_use]
    pub fn new(host: Arc<dyn LauncherHost>) -> Arc<Self> {
        Arc::new(Self {
            host,
            pilot: RwLock::new(None),
            worker: RwLock::new(None),
        })
    }

    /// Accepts the pilot's handshake and binds its connection.
    ///
    /// # Errors
    ///
    /// Returns the handshake error.
    pub async fn connect_pilot(self: &Arc<Self>, handshake: &dyn Handshake) -> Result<()> {
        let connection = handshake.establish(self.pilot_methods()).await?;
        info!(session_id = %connection.session_id(), "Pilot connected");
        if let Some(previous) = self.pilot.write().replace(connection) {
            previous.close();
        }
        Ok(())
    }

    /// Accepts the worker's handshake and binds its connection.
    ///
    /// # Errors
    ///
    /// Returns the handshake error.
    pub async fn connect_worker(self: &Arc<Self>, handshake: &dyn Handshake) -> Result<()> {
        let connection = handshake.establish(self.worker_methods()).await?;
        info!(session_id = %connection.session_id(), "Worker connected");
        if let Some(previous) = self.worker.write().replace(connection) {
            previous.close();
        }
        Ok(())
    }

    fn pilot(&self) -> Result<Connection> {
        self.pilot
            .read()
            .clone()
            .ok_or_else(|| Error::bridge_not_initialized("pilot connection"))
    }

    fn worker(&self) -> Result<Connection> {
        self.worker
            .read()
            .clone()
            .ok_or_else(|| Error::bridge_not_initialized("worker connection"))
    }

    /// Closes both connections.
    pub fn close(&self) {
        for slot in [&self.pilot, &self.worker] {
            if let Some(connection) = slot.write().take() {
                connection.close();
            }
        }
    }
}

// ============================================================================
// Launcher - Workflow
// ============================================================================

impl Launcher {
    /// Runs a konnector: assigns roles, authenticates, reads the user
    /// data and fetches documents.
    ///
    /// # Errors
    ///
    /// - [`Error::Konnector`] with `LOGIN_FAILED` if authentication fails
    /// - Any error of the individual steps
    pub async fn run(&self, context: Value) -> Result<RunOutcome> {
        let pilot = self.pilot()?;
        let worker = self.worker()?;

        worker
            .remote_handle()
            .call_values("setContentScriptType", vec![json!(ContentScriptRole::Worker)])
            .await?;
        pilot
            .remote_handle()
            .call_values("setContentScriptType", vec![json!(ContentScriptRole::Pilot)])
            .await?;

        info!("Konnector run started");

        let authenticated = pilot
            .remote_handle()
            .call_values("ensureAuthenticated", Vec::new())
            .await?;
        if authenticated != Value::Bool(true) {
            warn!(%authenticated, "Authentication failed");
            return Err(Error::konnector(
                KonnectorErrorCode::LoginFailed,
                "ensureAuthenticated did not succeed",
            ));
        }

        let user_data = pilot
            .remote_handle()
            .call_values("getUserDataFromWebsite", Vec::new())
            .await?;
        debug!(%user_data, "User data received");

        pilot
            .remote_handle()
            .call_values("fetch", vec![context])
            .await?;

        info!("Konnector run completed");
        Ok(RunOutcome { user_data })
    }

    /// Relays worker events named `event_name` to the pilot.
    ///
    /// # Errors
    ///
    /// [`Error::BridgeNotInitialized`] unless the worker is connected.
    pub fn forward_worker_event(self: &Arc<Self>, event_name: &str) -> Result<ListenerId> {
        let launcher = Arc::downgrade(self);
        let name = event_name.to_string();

        Ok(self
            .worker()?
            .remote_handle()
            .add_event_listener(event_name, move |payload| {
                let Some(pilot) = launcher.upgrade().and_then(|l| l.pilot().ok()) else {
                    return;
                };
                if let Err(e) = pilot.local_handle().emit(&name, payload.clone()) {
                    debug!(event = %name, error = %e, "Failed to forward event");
                }
            }))
    }
}

// ============================================================================
// Launcher - Exposed Methods
// ============================================================================

impl Launcher {
    /// Methods the pilot may call.
    #[must_use]
    pub fn pilot_methods(self: &Arc<Self>) -> MethodTable {
        let mut table = MethodTable::new();

        self.relay(&mut table, "runInWorker", |launcher, args| async move {
            let method: String = args.get(0)?;
            debug!(%method, "Relaying runInWorker");
            launcher
                .worker()?
                .remote_handle()
                .call_values(&method, args.rest(1))
                .await
        });
        self.relay(&mut table, "saveFiles", |launcher, args| async move {
            launcher.host.save_files(args.get(0)?, args.get(1)?).await
        });
        self.relay(&mut table, "saveBills", |launcher, args| async move {
            let options: Option<SaveBillsOptions> = args.get(1)?;
            launcher
                .host
                .save_bills(args.get(0)?, options.unwrap_or_default())
                .await
        });
        self.relay(&mut table, "getCredentials", |launcher, _| async move {
            Ok(launcher.host.get_credentials().await?.unwrap_or(Value::Null))
        });
        self.relay(&mut table, "saveCredentials", |launcher, args| async move {
            launcher.host.save_credentials(args.get(0)?).await?;
            Ok(Value::Null)
        });
        self.relay(&mut table, "saveIdentity", |launcher, args| async move {
            launcher.host.save_identity(args.get(0)?).await?;
            Ok(Value::Null)
        });
        self.relay(&mut table, "getCookiesByDomain", |launcher, args| async move {
            let domain: String = args.get(0)?;
            Ok(serde_json::to_value(launcher.host.get_cookies_by_domain(&domain).await?)?)
        });
        self.relay(&mut table, "getCookieFromKeychainByName", |launcher, args| async move {
            let name: String = args.get(0)?;
            Ok(launcher
                .host
                .get_cookie_from_keychain_by_name(&name)
                .await?
                .unwrap_or(Value::Null))
        });
        self.relay(&mut table, "saveCookieToKeychain", |launcher, args| async move {
            launcher.host.save_cookie_to_keychain(args.get(0)?).await?;
            Ok(Value::Null)
        });
        self.relay(&mut table, "getCookieByDomainAndName", get_cookie_by_domain_and_name);
        self.relay(&mut table, "setWorkerState", set_worker_state);
        self.relay(&mut table, "blockWorkerInteractions", |launcher, _| async move {
            launcher.host.block_worker_interactions().await?;
            Ok(Value::Null)
        });
        self.relay(&mut table, "unblockWorkerInteractions", |launcher, _| async move {
            launcher.host.unblock_worker_interactions().await?;
            Ok(Value::Null)
        });
        self.relay(&mut table, "queryAll", |launcher, args| async move {
            launcher.host.query_all(args.get(0)?, args.get(1)?).await
        });

        table
    }

    /// Methods the worker may call.
    #[must_use]
    pub fn worker_methods(self: &Arc<Self>) -> MethodTable {
        let mut table = MethodTable::new();

        self.relay(&mut table, "sendToPilot", |launcher, args| async move {
            let object: Value = args.get(0)?;
            launcher
                .pilot()?
                .remote_handle()
                .call_values("storeFromWorker", vec![object])
                .await
        });
        self.relay(&mut table, "getCookieByDomainAndName", get_cookie_by_domain_and_name);
        self.relay(&mut table, "setWorkerState", set_worker_state);

        table
    }

    /// Registers a handler receiving a strong launcher reference.
    fn relay<F, Fut>(self: &Arc<Self>, table: &mut MethodTable, name: &'static str, f: F)
    where
        F: Fn(Arc<Launcher>, Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let launcher: Weak<Launcher> = Arc::downgrade(self);
        let f = Arc::new(f);

        table.insert(name, move |args| {
            let launcher = launcher.upgrade();
            let f = Arc::clone(&f);
            async move {
                let launcher = launcher.ok_or_else(|| Error::protocol("launcher was dropped"))?;
                f(launcher, args).await
            }
        });
    }
}

async fn get_cookie_by_domain_and_name(launcher: Arc<Launcher>, args: Args) -> Result<Value> {
    let domain: String = args.get(0)?;
    let name: String = args.get(1)?;
    let cookie = launcher
        .host
        .get_cookie_by_domain_and_name(&domain, &name)
        .await?;
    Ok(serde_json::to_value(cookie)?)
}

async fn set_worker_state(launcher: Arc<Launcher>, args: Args) -> Result<Value> {
    let state: WorkerState = args.get(0)?;
    launcher.host.set_worker_state(state).await?;
    Ok(Value::Null)
}

// ============================================================================
// Tests
// ============================================================================
