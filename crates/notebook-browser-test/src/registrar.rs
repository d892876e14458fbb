//! Test groups and notebook-backed test cases.
//!
//! A group owns the browser (launched on first use) and the artifact
//! cleanup lifecycle: artifacts are removed before every test and once after
//! the group body, including when the body fails or panics. Each test gets
//! its own generated notebook and its own page; nothing else is shared.
//!
//! ```ignore
//! describe_group(GroupOptions::new("widget renders"), |group| async move {
//!     group
//!         .register_test("renders a table", [["w = perspective.PerspectiveWidget(arrow_data)\n", "w"]], |session| async move {
//!             session.default_body().await?;
//!             Ok(())
//!         })
//!         .await
//! })
//! .await?;
//! ```

use crate::browser::{TestBrowser, TestBrowserConfig};
use crate::cleaner::ArtifactCleaner;
use crate::config::HarnessConfig;
use crate::error::{BrowserError, HarnessError, HarnessResult};
use crate::notebook::{NotebookSynthesizer, notebook_filename};
use crate::page::Page;
use crate::server::{JupyterLabServer, NotebookServer};
use crate::session::NotebookSession;
use crate::wait::LoadState;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Options for [`describe_group`].
#[derive(Debug, Clone)]
pub struct GroupOptions {
    /// Name used in logs and the report.
    pub name: String,
    /// Package root that relative config paths are resolved against.
    pub root: Option<PathBuf>,
}

impl GroupOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            root: None,
        }
    }

    #[must_use]
    pub fn root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }
}

/// Result of one registered test.
#[derive(Debug, Clone)]
pub struct TestOutcome {
    pub name: String,
    /// Generated notebook, left on disk for inspection.
    pub notebook: PathBuf,
    pub duration: Duration,
    pub passed: bool,
}

/// Removes artifacts when the group ends, however it ends.
struct AfterAll(ArtifactCleaner);

impl Drop for AfterAll {
    fn drop(&mut self) {
        self.0.remove_artifacts();
    }
}

struct GroupInner {
    name: String,
    config: HarnessConfig,
    synthesizer: NotebookSynthesizer,
    cleaner: ArtifactCleaner,
    browser: tokio::sync::Mutex<Option<TestBrowser>>,
    registered: Mutex<HashMap<String, String>>,
    outcomes: Mutex<Vec<TestOutcome>>,
}

/// A group of notebook tests sharing one browser and one cleanup lifecycle.
#[derive(Clone)]
pub struct TestGroup {
    inner: Arc<GroupInner>,
}

impl std::fmt::Debug for TestGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestGroup")
            .field("name", &self.inner.name)
            .finish_non_exhaustive()
    }
}

/// Runs `body` as a test group, with configuration loaded from the
/// environment and `notebook-harness.toml`.
///
/// # Errors
///
/// Returns configuration errors, the body's error, or a browser shutdown error.
pub async fn describe_group<F, Fut>(options: GroupOptions, body: F) -> HarnessResult<()>
where
    F: FnOnce(TestGroup) -> Fut,
    Fut: Future<Output = HarnessResult<()>>,
{
    describe_group_with(HarnessConfig::load()?, options, body).await
}

/// Runs `body` as a test group with an explicit configuration.
///
/// # Errors
///
/// Returns the body's error, or a browser shutdown error if the body passed.
pub async fn describe_group_with<F, Fut>(
    config: HarnessConfig,
    options: GroupOptions,
    body: F,
) -> HarnessResult<()>
where
    F: FnOnce(TestGroup) -> Fut,
    Fut: Future<Output = HarnessResult<()>>,
{
    let config = match &options.root {
        Some(root) => config.rooted_at(root),
        None => config,
    };
    let group = TestGroup::new(options.name, config)?;
    let _after_all = AfterAll(group.inner.cleaner.clone());

    info!("group '{}' started", group.name());
    let result = body(group.clone()).await;
    let shutdown = group.close_browser().await;

    let report = group.report();
    info!(
        "group '{}' finished: {}/{} passed",
        group.name(),
        report.iter().filter(|o| o.passed).count(),
        report.len()
    );

    result.and(shutdown)
}

impl TestGroup {
    /// Creates a group. The browser is not launched until a test needs it.
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::Template` if a configured template is invalid.
    pub fn new(name: impl Into<String>, config: HarnessConfig) -> HarnessResult<Self> {
        let synthesizer = NotebookSynthesizer::from_config(&config)?;
        let cleaner = ArtifactCleaner::from_config(&config);

        Ok(Self {
            inner: Arc::new(GroupInner {
                name: name.into(),
                config,
                synthesizer,
                cleaner,
                browser: tokio::sync::Mutex::new(None),
                registered: Mutex::new(HashMap::new()),
                outcomes: Mutex::new(Vec::new()),
            }),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    #[must_use]
    pub fn config(&self) -> &HarnessConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn synthesizer(&self) -> &NotebookSynthesizer {
        &self.inner.synthesizer
    }

    #[must_use]
    pub fn cleaner(&self) -> &ArtifactCleaner {
        &self.inner.cleaner
    }

    /// Outcomes of the tests run so far, in completion order.
    #[must_use]
    pub fn report(&self) -> Vec<TestOutcome> {
        self.inner.outcomes.lock().clone()
    }

    /// Claims the notebook filename for `name`, rejecting collisions with
    /// earlier tests in this group.
    fn claim(&self, name: &str) -> HarnessResult<String> {
        let filename = notebook_filename(name)?;
        let mut registered = self.inner.registered.lock();
        if let Some(existing) = registered.get(&filename) {
            return Err(HarnessError::DuplicateNotebook {
                filename,
                existing: existing.clone(),
            });
        }
        registered.insert(filename.clone(), name.to_string());
        Ok(filename)
    }

    /// Cleans artifacts and writes the notebook for `name`. The first half
    /// of [`Self::register_test`], usable without a browser.
    ///
    /// # Errors
    ///
    /// Returns name, duplicate or synthesis errors.
    pub fn prepare<C, L>(&self, name: &str, cells: C) -> HarnessResult<(String, PathBuf)>
    where
        C: IntoIterator<Item = L>,
        L: IntoIterator,
        L::Item: Into<String>,
    {
        let filename = self.claim(name)?;
        self.inner.cleaner.remove_artifacts();
        let path = self.inner.synthesizer.generate(name, cells)?;
        Ok((filename, path))
    }

    async fn new_page(&self) -> HarnessResult<Page> {
        let mut guard = self.inner.browser.lock().await;
        if guard.is_none() {
            let config = TestBrowserConfig::from(&self.inner.config.browser);
            *guard = Some(TestBrowser::launch(config).await?);
        }
        let browser = guard.as_ref().ok_or(BrowserError::AlreadyClosed)?;
        Ok(browser.new_page().await?)
    }

    async fn close_browser(&self) -> HarnessResult<()> {
        if let Some(browser) = self.inner.browser.lock().await.take() {
            browser.close().await?;
        }
        Ok(())
    }

    /// Navigates a fresh page to `filename` and runs `body` on it. The page is
    /// closed on every path once it exists.
    async fn run_in_page<F, Fut>(&self, name: &str, filename: &str, body: F) -> HarnessResult<()>
    where
        F: FnOnce(NotebookSession) -> Fut,
        Fut: Future<Output = HarnessResult<()>>,
    {
        let server = JupyterLabServer::from_config(&self.inner.config)?;
        server.health_check().await?;
        let url = server.notebook_url(filename);

        let page = self.new_page().await?;
        if let Err(e) = page.navigate(&url, LoadState::DomContentLoaded).await {
            if let Err(close) = page.close().await {
                warn!("could not close page for '{}': {}", name, close);
            }
            return Err(e.into());
        }

        let session = NotebookSession::new(
            page,
            url,
            self.inner.config.selectors.clone(),
            self.inner.config.timings,
        );
        let result = body(session.clone()).await;
        if let Err(e) = session.close().await {
            warn!("could not close page for '{}': {}", name, e);
        }
        result
    }

    /// Generates a notebook for `cells`, opens it in a fresh page and runs
    /// `body` against it.
    ///
    /// # Errors
    ///
    /// Name and synthesis errors fail the test before anything is recorded.
    /// Server, navigation and readiness errors, and the body's own error, are
    /// recorded as a failed outcome and returned unchanged.
    pub async fn register_test<C, L, F, Fut>(
        &self,
        name: &str,
        cells: C,
        body: F,
    ) -> HarnessResult<()>
    where
        C: IntoIterator<Item = L>,
        L: IntoIterator,
        L::Item: Into<String>,
        F: FnOnce(NotebookSession) -> Fut,
        Fut: Future<Output = HarnessResult<()>>,
    {
        let started = Instant::now();
        info!("test '{}' started", name);

        let (filename, notebook) = self.prepare(name, cells)?;
        let result = self.run_in_page(name, &filename, body).await;

        let outcome = TestOutcome {
            name: name.to_string(),
            notebook,
            duration: started.elapsed(),
            passed: result.is_ok(),
        };
        info!(
            "test '{}' {} in {:?}",
            name,
            if outcome.passed { "passed" } else { "failed" },
            outcome.duration
        );
        self.inner.outcomes.lock().push(outcome);

        result
    }
}
