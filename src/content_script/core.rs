//! Core ContentScript struct, builder and role gating.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use crate::bridge::Bridge;
use crate::connection::{Handshake, Method, MethodTable};
use crate::error::{Error, Result};

use super::konnector::Konnector;
use super::options::ContentScriptOptions;
use super::page::Page;
use super::role::{ContentScriptRole, ContentScriptState};
use super::store::Store;

// ============================================================================
// Types
// ============================================================================

/// A named function the pilot may run inside the worker.
pub type Evaluation =
    Arc<dyn Fn(ContentScript, Vec<Value>) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// Internal shared state for a content script.
pub(crate) struct ContentScriptInner {
    /// Vendor workflow.
    pub konnector: Arc<dyn Konnector>,
    /// Worker page, absent in the pilot.
    pub page: Option<Arc<dyn Page>>,
    /// Polling timings.
    pub options: ContentScriptOptions,
    /// Role, set once.
    pub role: Mutex<Option<ContentScriptRole>>,
    /// Workflow progress.
    pub state: Mutex<ContentScriptState>,
    /// Connection to the launcher.
    pub bridge: Bridge,
    /// Data relayed from the worker.
    pub store: Store,
    /// Named evaluations callable through `evaluate`.
    pub evaluations: RwLock<FxHashMap<String, Evaluation>>,
    /// Vendor methods exposed next to the built-in ones.
    pub extra_methods: RwLock<MethodTable>,
}

// ============================================================================
// ContentScript
// ============================================================================

/// Role-aware automation running the same konnector in pilot and worker.
///
/// Cheap to clone; all clones share the same state.
#[derive(Clone)]
pub struct ContentScript {
    pub(crate) inner: Arc<ContentScriptInner>,
}

impl fmt::Debug for ContentScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentScript")
            .field("role", &self.role())
            .field("state", &self.state())
            .field("bridge", &self.inner.bridge.is_initialized())
            .finish_non_exhaustive()
    }
}

impl ContentScript {
    /// Starts building a content script around `konnector`.
    #[must_use]
    pub fn builder(konnector: impl Konnector) -> ContentScriptBuilder {
        ContentScriptBuilder::new(Arc::new(konnector))
    }
}

// ============================================================================
// ContentScript - Accessors
// ============================================================================

impl ContentScript {
    /// Returns the assigned role.
    #[inline]
    #[must_use]
    pub fn role(&self) -> Option<ContentScriptRole> {
        *self.inner.role.lock()
    }

    /// Returns the workflow state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ContentScriptState {
        *self.inner.state.lock()
    }

    /// Returns the store filled by `storeFromWorker`.
    #[inline]
    #[must_use]
    pub fn store(&self) -> &Store {
        &self.inner.store
    }

    /// Returns the bridge to the launcher.
    #[inline]
    #[must_use]
    pub fn bridge(&self) -> &Bridge {
        &self.inner.bridge
    }

    /// Returns the polling timings.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &ContentScriptOptions {
        &self.inner.options
    }
}

// ============================================================================
// ContentScript - Lifecycle
// ============================================================================

impl ContentScript {
    /// Assigns the role of this context.
    ///
    /// Assigning the same role again is a no-op.
    ///
    /// # Errors
    ///
    /// [`Error::RoleAlreadyAssigned`] if another role is already set.
    pub fn set_content_script_type(&self, role: ContentScriptRole) -> Result<()> {
        let mut current = self.inner.role.lock();
        match *current {
            Some(existing) if existing == role => Ok(()),
            Some(existing) => Err(Error::RoleAlreadyAssigned {
                current: existing,
                requested: role,
            }),
            None => {
                *current = Some(role);
                drop(current);
                self.set_state(ContentScriptState::RoleAssigned);
                info!(%role, "Content script type set");
                Ok(())
            }
        }
    }

    /// Binds the bridge through `handshake`, exposing the built-in methods.
    ///
    /// # Errors
    ///
    /// Returns the handshake error.
    pub async fn init_bridge(&self, handshake: &dyn Handshake) -> Result<()> {
        self.inner
            .bridge
            .init(handshake, self.exposed_methods())
            .await
    }

    /// Exposes a vendor method next to the built-in ones.
    ///
    /// Takes effect immediately when the bridge is already bound.
    pub fn expose(&self, name: &str, method: Method) {
        self.inner
            .extra_methods
            .write()
            .insert_method(name, Arc::clone(&method));

        if self.inner.bridge.is_initialized()
            && let Err(e) = self.inner.bridge.expose(name, method)
        {
            warn!(method = name, error = %e, "Bridge closed before method could be exposed");
        }
    }

    /// Registers a named evaluation callable through `evaluate`.
    pub fn register_evaluation<F, Fut>(&self, name: impl Into<String>, f: F)
    where
        F: Fn(ContentScript, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let name = name.into();
        debug!(evaluation = %name, "Evaluation registered");
        let evaluation: Evaluation = Arc::new(move |script, args| Box::pin(f(script, args)));
        self.inner.evaluations.write().insert(name, evaluation);
    }

    /// Closes the bridge.
    pub fn close(&self) {
        self.inner.bridge.close();
    }
}

// ============================================================================
// ContentScript - Internal
// ============================================================================

impl ContentScript {
    /// Fails unless this context has `role`.
    pub(crate) fn only_in(&self, role: ContentScriptRole, method: &str) -> Result<()> {
        let actual = self.role();
        if actual == Some(role) {
            Ok(())
        } else {
            Err(Error::role_violation(method, role, actual))
        }
    }

    pub(crate) fn set_state(&self, state: ContentScriptState) {
        let previous = std::mem::replace(&mut *self.inner.state.lock(), state);
        if previous != state {
            debug!(?previous, ?state, "Content script state changed");
        }
    }

    /// Returns the worker page.
    pub(crate) fn page(&self) -> Result<Arc<dyn Page>> {
        self.inner
            .page
            .clone()
            .ok_or_else(|| Error::protocol("no page attached to this content script"))
    }

    pub(crate) fn evaluation(&self, name: &str) -> Result<Evaluation> {
        self.inner
            .evaluations
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownEvaluation {
                name: name.to_string(),
            })
    }
}

// ============================================================================
// ContentScriptBuilder
// ============================================================================

/// Builder for [`ContentScript`].
///
/// # Example
///
/// ```ignore
/// let worker = ContentScript::builder(SncfKonnector::default())
///     .page(page)
///     .options(ContentScriptOptions::new().with_element_timeout(Duration::from_secs(10)))
///     .build();
/// ```
pub struct ContentScriptBuilder {
    konnector: Arc<dyn Konnector>,
    page: Option<Arc<dyn Page>>,
    options: ContentScriptOptions,
}

impl ContentScriptBuilder {
    pub(crate) fn new(konnector: Arc<dyn Konnector>) -> Self {
        Self {
            konnector,
            page: None,
            options: ContentScriptOptions::new(),
        }
    }

    /// Attaches the worker page.
    #[must_use]
    pub fn page(mut self, page: Arc<dyn Page>) -> Self {
        self.page = Some(page);
        self
    }

    /// Sets the polling timings.
    #[must_use]
    pub fn options(mut self, options: ContentScriptOptions) -> Self {
        self.options = options;
        self
    }

    /// Builds the content script. No role is assigned yet.
    #[must_use]
    pub fn build(self) -> ContentScript {
        ContentScript {
            inner: Arc::new(ContentScriptInner {
                konnector: self.konnector,
                page: self.page,
                options: self.options,
                role: Mutex::new(None),
                state: Mutex::new(ContentScriptState::Uninitialized),
                bridge: Bridge::new(),
                store: Store::new(),
                evaluations: RwLock::new(FxHashMap::default()),
                extra_methods: RwLock::new(MethodTable::new()),
            }),
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Polls `predicate` every `interval` until it returns `true`.
///
/// # Errors
///
/// [`Error::Timeout`] naming `operation` once `timeout` has elapsed, or the
/// first predicate error.
pub(crate) async fn wait_for<F, Fut>(
    operation: &str,
    interval: Duration,
    timeout: Duration,
    mut predicate: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let start = Instant::now();
    loop {
        if predicate().await? {
            return Ok(());
        }
        if start.elapsed() >= timeout {
            return Err(Error::timeout(operation, timeout));
        }
        sleep(interval).await;
    }
}

/// JavaScript truthiness of a JSON value.
pub(crate) fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicU32, Ordering};

    use serde_json::json;

    use crate::test_support::{DemoKonnector, FakePage};

    #[test]
    fn test_content_script_is_clone_and_debug() {
        fn assert_clone<T: Clone>() {}
        fn assert_debug<T: fmt::Debug>() {}
        assert_clone::<ContentScript>();
        assert_debug::<ContentScript>();
    }

    #[test]
    fn test_role_is_set_once() {
        let script = ContentScript::builder(DemoKonnector).build();
        assert_eq!(script.state(), ContentScriptState::Uninitialized);

        script
            .set_content_script_type(ContentScriptRole::Pilot)
            .expect("first assignment");
        script
            .set_content_script_type(ContentScriptRole::Pilot)
            .expect("same role again");
        let err = script
            .set_content_script_type(ContentScriptRole::Worker)
            .unwrap_err();

        assert!(err.is_role_violation());
        assert_eq!(script.role(), Some(ContentScriptRole::Pilot));
        assert_eq!(script.state(), ContentScriptState::RoleAssigned);
    }

    #[test]
    fn test_only_in() {
        let script = ContentScript::builder(DemoKonnector).build();
        assert!(matches!(
            script.only_in(ContentScriptRole::Pilot, "runInWorker"),
            Err(Error::RoleNotAssigned { .. })
        ));

        script
            .set_content_script_type(ContentScriptRole::Worker)
            .expect("role");
        let err = script
            .only_in(ContentScriptRole::Pilot, "runInWorker")
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("runInWorker"));
        assert!(message.contains("pilot"));
        assert!(script.only_in(ContentScriptRole::Worker, "click").is_ok());
    }

    #[test]
    fn test_is_truthy() {
        for falsy in [json!(null), json!(false), json!(0), json!(0.0), json!("")] {
            assert!(!is_truthy(&falsy), "{falsy} should be falsy");
        }
        for truthy in [json!(true), json!(1), json!("x"), json!([]), json!({})] {
            assert!(is_truthy(&truthy), "{truthy} should be truthy");
        }
    }

    #[tokio::test]
    async fn test_wait_for_succeeds_after_polls() {
        let polls = AtomicU32::new(0);
        wait_for("counter", Duration::from_millis(1), Duration::from_secs(1), || {
            let n = polls.fetch_add(1, Ordering::SeqCst);
            async move { Ok(n >= 3) }
        })
        .await
        .expect("wait");

        assert_eq!(polls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_wait_for_times_out() {
        let err = wait_for("never", Duration::from_millis(5), Duration::from_millis(20), || async {
            Ok(false)
        })
        .await
        .unwrap_err();

        assert!(err.is_timeout());
        assert!(err.to_string().contains("never"));
    }

    #[tokio::test]
    async fn test_wait_for_unbounded_timeout() {
        let polls = AtomicU32::new(0);
        wait_for("forever", Duration::from_millis(1), Duration::MAX, || {
            let n = polls.fetch_add(1, Ordering::SeqCst);
            async move { Ok(n >= 2) }
        })
        .await
        .expect("wait");

        assert_eq!(polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_wait_for_element_with_unbounded_timeout() {
        let page = Arc::new(FakePage::new("https://www.sncf-connect.com/"));
        page.add_element_later("#account", 2);
        let script = ContentScript::builder(DemoKonnector)
            .page(page)
            .options(
                ContentScriptOptions::new()
                    .with_element_poll_interval(Duration::from_millis(1))
                    .with_element_timeout(Duration::MAX),
            )
            .build();
        script
            .set_content_script_type(ContentScriptRole::Worker)
            .expect("role");

        assert!(script.wait_for_element_no_reload("#account").await.expect("found"));
    }

    #[test]
    fn test_expose_after_bridge_closed_keeps_method() {
        let script = ContentScript::builder(DemoKonnector).build();
        script.close();
        script.expose("getTrips", Arc::new(|_| Box::pin(async { Ok(json!([])) })));

        assert!(!script.bridge().is_initialized());
        assert!(script.exposed_methods().contains("getTrips"));
    }

    #[tokio::test]
    async fn test_unknown_evaluation() {
        let script = ContentScript::builder(DemoKonnector).build();
        script.register_evaluation("known", |_, _| async { Ok(json!(1)) });

        assert!(script.evaluation("known").is_ok());
        assert!(matches!(
            script.evaluation("other"),
            Err(Error::UnknownEvaluation { ref name }) if name == "other"
        ));
    }
}
