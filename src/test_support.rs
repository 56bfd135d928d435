//! In-process fakes shared by the unit tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::{Value, json};
use tracing_subscriber::EnvFilter;

use crate::connection::{Acceptor, HandshakeOptions, Initiator};
use crate::content_script::{
    ContentScript, ContentScriptOptions, ContentScriptRole, Cookie, FetchedResource, FileEntry,
    Konnector, Page, SaveBillsOptions, WorkerState,
};
use crate::error::{Error, Result};
use crate::launcher::{Launcher, LauncherHost};
use crate::transport::ChannelMessenger;

pub(crate) const ACCOUNT_URL: &str = "https://www.sncf-connect.com/app/account";
pub(crate) const BILL_URL: &str = "https://www.sncf-connect.com/bill/1.pdf";

/// Installs a test subscriber once; `RUST_LOG` overrides the default filter.
pub(crate) fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("konnector_bridge=debug"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_test_writer()
        .try_init();
}

// ============================================================================
// FakePage
// ============================================================================

/// Scriptable page: elements, delayed elements, click effects, resources.
#[derive(Default)]
pub(crate) struct FakePage {
    url: Mutex<String>,
    elements: Mutex<FxHashSet<String>>,
    /// Selector -> remaining polls before it appears.
    delayed: Mutex<FxHashMap<String, u32>>,
    /// Clicked selector -> selector it reveals.
    reveals: Mutex<FxHashMap<String, String>>,
    resources: Mutex<FxHashMap<String, FetchedResource>>,
    clicks: Mutex<Vec<String>>,
    fills: Mutex<Vec<(String, String)>>,
}

impl FakePage {
    pub(crate) fn new(url: &str) -> Self {
        Self {
            url: Mutex::new(url.to_string()),
            ..Self::default()
        }
    }

    pub(crate) fn add_element(&self, selector: &str) {
        self.elements.lock().insert(selector.to_string());
    }

    /// `selector` exists from the `polls`-th lookup on.
    pub(crate) fn add_element_later(&self, selector: &str, polls: u32) {
        self.delayed.lock().insert(selector.to_string(), polls);
    }

    pub(crate) fn on_click(&self, selector: &str, reveals: &str) {
        self.reveals
            .lock()
            .insert(selector.to_string(), reveals.to_string());
    }

    pub(crate) fn add_resource(&self, url: &str, content_type: &str, body: &[u8]) {
        self.resources
            .lock()
            .insert(url.to_string(), FetchedResource::new(content_type, body));
    }

    pub(crate) fn clicks(&self) -> Vec<String> {
        self.clicks.lock().clone()
    }

    pub(crate) fn fills(&self) -> Vec<(String, String)> {
        self.fills.lock().clone()
    }

    /// Last text typed into `selector`.
    pub(crate) fn filled_value(&self, selector: &str) -> Option<String> {
        self.fills
            .lock()
            .iter()
            .rev()
            .find(|(s, _)| s == selector)
            .map(|(_, text)| text.clone())
    }

    fn exists(&self, selector: &str) -> bool {
        if self.elements.lock().contains(selector) {
            return true;
        }

        let mut delayed = self.delayed.lock();
        let Some(remaining) = delayed.get_mut(selector) else {
            return false;
        };
        *remaining = remaining.saturating_sub(1);
        if *remaining > 0 {
            return false;
        }
        delayed.remove(selector);
        self.elements.lock().insert(selector.to_string());
        true
    }
}

#[async_trait]
impl Page for FakePage {
    fn url(&self) -> String {
        self.url.lock().clone()
    }

    async fn element_exists(&self, selector: &str) -> Result<bool> {
        Ok(self.exists(selector))
    }

    async fn click(&self, selector: &str) -> Result<()> {
        if !self.exists(selector) {
            return Err(Error::element_not_found(selector));
        }
        self.clicks.lock().push(selector.to_string());
        if let Some(revealed) = self.reveals.lock().get(selector) {
            self.elements.lock().insert(revealed.clone());
        }
        Ok(())
    }

    async fn fill_text(&self, selector: &str, text: &str) -> Result<()> {
        if !self.exists(selector) {
            return Err(Error::element_not_found(selector));
        }
        self.fills
            .lock()
            .push((selector.to_string(), text.to_string()));
        Ok(())
    }

    async fn fetch_resource(&self, url: &str, _request_options: Option<&Value>) -> Result<FetchedResource> {
        self.resources
            .lock()
            .get(url)
            .cloned()
            .ok_or_else(|| Error::protocol(format!("404 {url}")))
    }
}

// ============================================================================
// FakeHost
// ============================================================================

/// Launcher services recording every call.
#[derive(Default)]
pub(crate) struct FakeHost {
    calls: Mutex<Vec<String>>,
    credentials: Mutex<Option<Value>>,
    worker_states: Mutex<Vec<WorkerState>>,
    bills: Mutex<Vec<FileEntry>>,
    keychain: Mutex<FxHashMap<String, Value>>,
}

impl FakeHost {
    pub(crate) fn set_credentials(&self, credentials: Value) {
        *self.credentials.lock() = Some(credentials);
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub(crate) fn worker_states(&self) -> Vec<WorkerState> {
        self.worker_states.lock().clone()
    }

    pub(crate) fn saved_bills(&self) -> Vec<FileEntry> {
        self.bills.lock().clone()
    }

    fn record(&self, call: &str) {
        self.calls.lock().push(call.to_string());
    }
}

#[async_trait]
impl LauncherHost for FakeHost {
    async fn save_files(&self, entries: Vec<FileEntry>, _options: Value) -> Result<Value> {
        self.record("saveFiles");
        Ok(json!(entries.len()))
    }

    async fn save_bills(&self, entries: Vec<FileEntry>, _options: SaveBillsOptions) -> Result<Value> {
        self.record("saveBills");
        let saved = entries.len();
        self.bills.lock().extend(entries);
        Ok(json!(saved))
    }

    async fn get_credentials(&self) -> Result<Option<Value>> {
        self.record("getCredentials");
        Ok(self.credentials.lock().clone())
    }

    async fn save_credentials(&self, credentials: Value) -> Result<()> {
        self.record("saveCredentials");
        *self.credentials.lock() = Some(credentials);
        Ok(())
    }

    async fn save_identity(&self, _identity: Value) -> Result<()> {
        self.record("saveIdentity");
        Ok(())
    }

    async fn get_cookies_by_domain(&self, domain: &str) -> Result<Vec<Cookie>> {
        self.record("getCookiesByDomain");
        Ok(vec![Cookie::new("session", "abc").with_domain(domain)])
    }

    async fn get_cookie_from_keychain_by_name(&self, name: &str) -> Result<Option<Value>> {
        self.record("getCookieFromKeychainByName");
        Ok(self.keychain.lock().get(name).cloned())
    }

    async fn save_cookie_to_keychain(&self, cookie: Value) -> Result<()> {
        self.record("saveCookieToKeychain");
        let name = cookie
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        self.keychain.lock().insert(name, cookie);
        Ok(())
    }

    async fn get_cookie_by_domain_and_name(&self, domain: &str, name: &str) -> Result<Option<Cookie>> {
        self.record("getCookieByDomainAndName");
        Ok((name == "session").then(|| Cookie::new("session", "abc").with_domain(domain)))
    }

    async fn set_worker_state(&self, state: WorkerState) -> Result<()> {
        self.record("setWorkerState");
        self.worker_states.lock().push(state);
        Ok(())
    }

    async fn block_worker_interactions(&self) -> Result<()> {
        self.record("blockWorkerInteractions");
        Ok(())
    }

    async fn unblock_worker_interactions(&self) -> Result<()> {
        self.record("unblockWorkerInteractions");
        Ok(())
    }

    async fn query_all(&self, _definition: Value, _options: Value) -> Result<Value> {
        self.record("queryAll");
        Ok(json!([]))
    }
}

// ============================================================================
// DemoKonnector
// ============================================================================

/// Minimal SNCF-shaped konnector driving the fake page.
pub(crate) struct DemoKonnector;

#[async_trait]
impl Konnector for DemoKonnector {
    async fn ensure_authenticated(&self, script: &ContentScript) -> Result<bool> {
        script.goto(ACCOUNT_URL).await?;

        let Some(credentials) = script.get_credentials().await? else {
            return Ok(false);
        };
        let login = credentials.get("login").cloned().unwrap_or(Value::Null);
        let password = credentials.get("password").cloned().unwrap_or(Value::Null);

        script.run_in_worker("fillText", vec![json!("#email"), login]).await?;
        script
            .run_in_worker("fillText", vec![json!("#password"), password])
            .await?;
        script.run_in_worker("click", vec![json!("#submit")]).await?;
        script
            .wait_for_element_in_worker("#logout", Some(Duration::from_secs(5)))
            .await?;
        Ok(true)
    }

    async fn check_authenticated(&self, script: &ContentScript) -> Result<bool> {
        script.check_for_element("#logout").await
    }

    async fn get_user_data_from_website(&self, script: &ContentScript) -> Result<Value> {
        script.evaluate_in_worker("readIdentity", Vec::new()).await?;

        let email = script
            .store()
            .get("identity")
            .and_then(|identity| identity.get("email").cloned())
            .ok_or_else(|| Error::invalid_argument("identity missing from store"))?;
        Ok(json!({"sourceAccountIdentifier": email}))
    }

    async fn fetch(&self, script: &ContentScript, _context: Value) -> Result<()> {
        let entry = FileEntry::remote(BILL_URL, "1.pdf");
        let data_uri = script
            .run_in_worker("downloadFileInWorker", vec![serde_json::to_value(&entry)?])
            .await?;

        let bill = FileEntry {
            data_uri: data_uri.as_str().map(str::to_string),
            ..entry
        };
        script
            .save_bills(&[bill], &SaveBillsOptions::default())
            .await?;
        Ok(())
    }
}

// ============================================================================
// Harness
// ============================================================================

/// Pilot and worker wired to a launcher over in-process channels.
pub(crate) struct Harness {
    pub(crate) pilot: ContentScript,
    pub(crate) worker: ContentScript,
    pub(crate) page: Arc<FakePage>,
    pub(crate) host: Arc<FakeHost>,
    pub(crate) launcher: Arc<Launcher>,
}

impl Harness {
    pub(crate) async fn start() -> Self {
        init_logging();

        let options = ContentScriptOptions::new()
            .with_element_poll_interval(Duration::from_millis(5))
            .with_element_timeout(Duration::from_secs(1))
            .with_auth_poll_interval(Duration::from_millis(5))
            .with_auth_timeout(Duration::from_secs(1));
        let handshake = HandshakeOptions::new().with_interval(Duration::from_millis(10));

        let page = Arc::new(FakePage::new(ACCOUNT_URL));
        for selector in ["#email", "#password", "#submit"] {
            page.add_element(selector);
        }
        page.on_click("#submit", "#logout");
        page.add_resource(BILL_URL, "application/pdf", b"%PDF");

        let host = Arc::new(FakeHost::default());
        let launcher = Launcher::new(host.clone());

        let pilot = ContentScript::builder(DemoKonnector).options(options).build();
        let worker = ContentScript::builder(DemoKonnector)
            .page(page.clone())
            .options(options)
            .build();

        let identity_page = Arc::clone(&page);
        worker.register_evaluation("readIdentity", move |script, _args| {
            let email = identity_page.filled_value("#email");
            async move {
                script
                    .send_to_pilot(json!({"identity": {"email": email}}))
                    .await?;
                Ok(Value::Null)
            }
        });

        let (pilot_side, launcher_pilot_side) = ChannelMessenger::pair();
        let (worker_side, launcher_worker_side) = ChannelMessenger::pair();

        let initiator = Initiator::new(pilot_side).with_options(handshake);
        let acceptor = Acceptor::new(launcher_pilot_side);
        let (pilot_bound, launcher_pilot) = tokio::join!(
            pilot.init_bridge(&initiator),
            launcher.connect_pilot(&acceptor),
        );
        pilot_bound.expect("pilot handshake");
        launcher_pilot.expect("launcher pilot handshake");

        let initiator = Initiator::new(worker_side).with_options(handshake);
        let acceptor = Acceptor::new(launcher_worker_side);
        let (worker_bound, launcher_worker) = tokio::join!(
            worker.init_bridge(&initiator),
            launcher.connect_worker(&acceptor),
        );
        worker_bound.expect("worker handshake");
        launcher_worker.expect("launcher worker handshake");

        pilot
            .set_content_script_type(ContentScriptRole::Pilot)
            .expect("pilot role");
        worker
            .set_content_script_type(ContentScriptRole::Worker)
            .expect("worker role");

        Self {
            pilot,
            worker,
            page,
            host,
            launcher,
        }
    }
}
