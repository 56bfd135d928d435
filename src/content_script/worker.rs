//! Worker-side operations.

use serde_json::{Value, json};
use tracing::{debug, info};

use crate::error::Result;

use super::core::wait_for;
use super::role::ContentScriptRole;
use super::types::{Cookie, FileEntry};
use super::ContentScript;

// ============================================================================
// ContentScript - Waiting
// ============================================================================

impl ContentScript {
    /// Polls `checkAuthenticated` until the user is logged in.
    ///
    /// # Errors
    ///
    /// [`crate::Error::Timeout`] after the authentication timeout (5 minutes
    /// by default).
    pub async fn wait_for_authenticated(&self) -> Result<bool> {
        self.only_in(ContentScriptRole::Worker, "waitForAuthenticated")?;
        let options = *self.options();

        wait_for(
            "waitForAuthenticated",
            options.auth_poll_interval,
            options.auth_timeout,
            || self.check_authenticated(),
        )
        .await?;
        Ok(true)
    }

    /// Polls the page until `selector` exists.
    ///
    /// The poll does not survive a page reload: a navigation ends this
    /// worker context together with the loop.
    ///
    /// # Errors
    ///
    /// [`crate::Error::Timeout`] after the element timeout (30 seconds by
    /// default).
    pub async fn wait_for_element_no_reload(&self, selector: &str) -> Result<bool> {
        self.only_in(ContentScriptRole::Worker, "waitForElementNoReload")?;
        let page = self.page()?;
        let options = *self.options();

        wait_for(
            &format!("waitForElementNoReload {selector}"),
            options.element_poll_interval,
            options.element_timeout,
            || page.element_exists(selector),
        )
        .await?;
        Ok(true)
    }

    /// Returns `true` if `selector` currently exists.
    ///
    /// # Errors
    ///
    /// Role errors or page errors.
    pub async fn check_for_element(&self, selector: &str) -> Result<bool> {
        self.only_in(ContentScriptRole::Worker, "checkForElement")?;
        self.page()?.element_exists(selector).await
    }
}

// ============================================================================
// ContentScript - Interaction
// ============================================================================

impl ContentScript {
    /// Clicks the first element matching `selector`.
    ///
    /// # Errors
    ///
    /// Role errors or [`crate::Error::ElementNotFound`].
    pub async fn click(&self, selector: &str) -> Result<()> {
        self.only_in(ContentScriptRole::Worker, "click")?;
        debug!(selector, "click");
        self.page()?.click(selector).await
    }

    /// Types `text` into the first element matching `selector`.
    ///
    /// # Errors
    ///
    /// Role errors or [`crate::Error::ElementNotFound`].
    pub async fn fill_text(&self, selector: &str, text: &str) -> Result<()> {
        self.only_in(ContentScriptRole::Worker, "fillText")?;
        debug!(selector, "fillText");
        self.page()?.fill_text(selector, text).await
    }

    /// Downloads `entry.fileurl` and returns it as a `data:` URI.
    ///
    /// Returns `None` when the entry has no `fileurl`.
    ///
    /// # Errors
    ///
    /// Role errors or fetch errors.
    pub async fn download_file_in_worker(&self, entry: &FileEntry) -> Result<Option<String>> {
        self.only_in(ContentScriptRole::Worker, "downloadFileInWorker")?;
        let Some(url) = entry.fileurl.as_deref() else {
            return Ok(None);
        };

        debug!(url, "Downloading file in worker");
        let resource = self
            .page()?
            .fetch_resource(url, entry.request_options.as_ref())
            .await?;
        Ok(Some(resource.to_data_uri()))
    }

    /// Runs the evaluation registered under `name`.
    ///
    /// Evaluations are the only way the pilot runs its own logic in the
    /// worker page; each invocation is logged.
    ///
    /// # Errors
    ///
    /// [`crate::Error::UnknownEvaluation`] for an unregistered name, or the
    /// evaluation's own error.
    pub async fn evaluate(&self, name: &str, args: Vec<Value>) -> Result<Value> {
        self.only_in(ContentScriptRole::Worker, "evaluate")?;
        let evaluation = self.evaluation(name)?;

        info!(evaluation = name, args = args.len(), "Running evaluation in worker");
        evaluation(self.clone(), args).await
    }
}

// ============================================================================
// ContentScript - Pilot Relay
// ============================================================================

impl ContentScript {
    /// Sends an object to the pilot's store through the launcher.
    ///
    /// # Errors
    ///
    /// Role, bridge or relay errors.
    pub async fn send_to_pilot(&self, object: Value) -> Result<()> {
        self.only_in(ContentScriptRole::Worker, "sendToPilot")?;
        self.bridge().call_values("sendToPilot", vec![object]).await?;
        Ok(())
    }

    /// Reads one cookie of `domain` from the launcher.
    ///
    /// # Errors
    ///
    /// Role, bridge or launcher errors.
    pub async fn get_cookie_by_domain_and_name(
        &self,
        domain: &str,
        name: &str,
    ) -> Result<Option<Cookie>> {
        self.only_in(ContentScriptRole::Worker, "getCookieByDomainAndName")?;
        let cookie = self
            .bridge()
            .call_values("getCookieByDomainAndName", vec![json!(domain), json!(name)])
            .await?;
        if cookie.is_null() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_value(cookie)?))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::time::Duration;

    use crate::content_script::ContentScriptOptions;
    use crate::error::Error;
    use crate::test_support::{DemoKonnector, FakePage, Harness};

    fn worker(page: Arc<FakePage>) -> ContentScript {
        let script = ContentScript::builder(DemoKonnector)
            .page(page)
            .options(
                ContentScriptOptions::new()
                    .with_element_poll_interval(Duration::from_millis(5))
                    .with_element_timeout(Duration::from_millis(60))
                    .with_auth_poll_interval(Duration::from_millis(5))
                    .with_auth_timeout(Duration::from_millis(60)),
            )
            .build();
        script
            .set_content_script_type(ContentScriptRole::Worker)
            .expect("role");
        script
    }

    #[tokio::test]
    async fn test_worker_methods_rejected_in_pilot() {
        let script = ContentScript::builder(DemoKonnector).build();
        script
            .set_content_script_type(ContentScriptRole::Pilot)
            .expect("role");

        let err = script.click("#a").await.unwrap_err();
        assert!(matches!(
            err,
            Error::RoleViolation { ref method, required: ContentScriptRole::Worker, .. } if method == "click"
        ));
        assert!(script.evaluate("x", vec![]).await.unwrap_err().is_role_violation());
    }

    #[tokio::test]
    async fn test_wait_for_element_no_reload() {
        let page = Arc::new(FakePage::new("https://www.sncf-connect.com/"));
        let script = worker(Arc::clone(&page));

        page.add_element_later("#account", 2);
        assert!(script.wait_for_element_no_reload("#account").await.expect("found"));

        let err = script.wait_for_element_no_reload("#never").await.unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_wait_for_authenticated() {
        let page = Arc::new(FakePage::new("https://www.sncf-connect.com/"));
        let script = worker(Arc::clone(&page));

        assert!(script.wait_for_authenticated().await.unwrap_err().is_timeout());

        page.add_element("#logout");
        assert!(script.wait_for_authenticated().await.expect("authenticated"));
    }

    #[tokio::test]
    async fn test_click_and_fill_text() {
        let page = Arc::new(FakePage::new("https://www.sncf-connect.com/"));
        let script = worker(Arc::clone(&page));
        page.add_element("#login");

        script.fill_text("#login", "user@example.com").await.expect("fill");
        script.click("#login").await.expect("click");
        assert!(matches!(
            script.click("#missing").await,
            Err(Error::ElementNotFound { .. })
        ));

        assert_eq!(page.fills(), vec![("#login".to_string(), "user@example.com".to_string())]);
        assert_eq!(page.clicks(), vec!["#login".to_string()]);
    }

    #[tokio::test]
    async fn test_download_file_in_worker() {
        let page = Arc::new(FakePage::new("https://www.sncf-connect.com/"));
        page.add_resource("https://www.sncf-connect.com/bill/1.pdf", "application/pdf", b"%PDF");
        let script = worker(Arc::clone(&page));

        let entry = FileEntry::remote("https://www.sncf-connect.com/bill/1.pdf", "1.pdf");
        let uri = script.download_file_in_worker(&entry).await.expect("download");
        assert_eq!(uri.as_deref(), Some("data:application/pdf;base64,JVBERg=="));

        let inline = FileEntry {
            content: Some("text".to_string()),
            ..FileEntry::default()
        };
        assert_eq!(script.download_file_in_worker(&inline).await.expect("none"), None);
    }

    #[tokio::test]
    async fn test_evaluate_registered_function() {
        let page = Arc::new(FakePage::new("https://www.sncf-connect.com/app/account"));
        let script = worker(page);
        script.register_evaluation("pageUrl", |script, args| async move {
            let url = script.page()?.url();
            Ok(json!({"url": url, "args": args}))
        });

        let value = script.evaluate("pageUrl", vec![json!(1)]).await.expect("evaluate");
        assert_eq!(
            value,
            json!({"url": "https://www.sncf-connect.com/app/account", "args": [1]})
        );
        assert!(matches!(
            script.evaluate("missing", vec![]).await,
            Err(Error::UnknownEvaluation { .. })
        ));
    }

    #[tokio::test]
    async fn test_send_to_pilot_fills_pilot_store() {
        let harness = Harness::start().await;

        harness
            .worker
            .send_to_pilot(json!({"identity": {"email": "user@example.com"}}))
            .await
            .expect("send");

        assert_eq!(
            harness.pilot.store().get("identity"),
            Some(json!({"email": "user@example.com"}))
        );
    }

    #[tokio::test]
    async fn test_get_cookie_by_domain_and_name() {
        let harness = Harness::start().await;

        let cookie = harness
            .worker
            .get_cookie_by_domain_and_name("sncf-connect.com", "session")
            .await
            .expect("cookie");
        assert_eq!(cookie.map(|c| c.name), Some("session".to_string()));

        let missing = harness
            .worker
            .get_cookie_by_domain_and_name("sncf-connect.com", "other")
            .await
            .expect("cookie");
        assert!(missing.is_none());
    }
}
