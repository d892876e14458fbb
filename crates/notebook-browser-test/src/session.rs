//! Driving one notebook page through kernel readiness and execution.
//!
//! JupyterLab publishes no "kernel attached and idle" event the harness can
//! subscribe to, so readiness is modelled as an explicit state machine that
//! is walked by polling the DOM:
//!
//! ```text
//! Loading -> UiReady -> KernelIdle -> Executing -> Idle
//!                                        ^          |
//!                                        +----------+
//! ```
//!
//! The `UiReady -> KernelIdle` step sleeps before it trusts the execution
//! indicator: right after the UI renders, the indicator reports a stale
//! `idle` before any kernel is attached. All fixed delays come from
//! [`Timings`], so a future push signal can replace them in one place.

use crate::config::{Selectors, Timings};
use crate::error::{BrowserError, HarnessError, HarnessResult, Result};
use crate::page::{FocusTarget, Page};
use crate::wait::{WaitConfig, settle};
use crate::widget::WidgetHandle;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Where a notebook page is in its load and execution lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ReadinessState {
    /// Navigation issued, UI not yet rendered.
    Loading,
    /// Title set and notebook shell and toolbar are visible.
    UiReady,
    /// The execution indicator reports an idle kernel.
    KernelIdle,
    /// A run command has been submitted.
    Executing,
    /// Output has been observed and the widget has settled.
    Idle,
}

impl ReadinessState {
    /// Whether `next` is a legal successor of `self`.
    #[must_use]
    pub fn can_advance_to(self, next: ReadinessState) -> bool {
        use ReadinessState::{Executing, Idle, KernelIdle, Loading, UiReady};
        matches!(
            (self, next),
            (Loading, UiReady)
                | (UiReady, KernelIdle)
                | (KernelIdle | Executing | Idle, Executing)
                | (Executing, Idle)
        )
    }

    /// Returns `next` if the transition is legal.
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::InvalidTransition` otherwise.
    pub fn advance(self, next: ReadinessState) -> HarnessResult<ReadinessState> {
        if self.can_advance_to(next) {
            Ok(next)
        } else {
            Err(HarnessError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }
}

/// Resolves to `false` if `error` completes first and `true` if `passed`
/// does, bounded by `limit`.
pub(crate) async fn race_outcome<E, P>(error: E, passed: P, limit: Duration) -> Result<bool>
where
    E: Future<Output = Result<()>>,
    P: Future<Output = Result<()>>,
{
    let race = async {
        tokio::select! {
            r = error => r.map(|()| false),
            r = passed => r.map(|()| true),
        }
    };

    tokio::time::timeout(limit, race)
        .await
        .unwrap_or_else(|_| {
            Err(BrowserError::WaitTimeout {
                condition: "cell outcome (error output or success token)".to_string(),
                timeout: limit,
            })
        })
}

struct SessionInner {
    page: Page,
    url: String,
    selectors: Selectors,
    timings: Timings,
    state: Mutex<ReadinessState>,
}

/// A notebook open in a browser page, owned by a single test.
///
/// Cloning is cheap and shares the page; operations on one session are meant
/// to be awaited one after another.
#[derive(Clone)]
pub struct NotebookSession {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for NotebookSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotebookSession")
            .field("url", &self.inner.url)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl NotebookSession {
    /// Wraps a page that has already navigated to `url`.
    #[must_use]
    pub fn new(page: Page, url: impl Into<String>, selectors: Selectors, timings: Timings) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                page,
                url: url.into(),
                selectors,
                timings,
                state: Mutex::new(ReadinessState::Loading),
            }),
        }
    }

    /// The underlying page.
    #[must_use]
    pub fn page(&self) -> &Page {
        &self.inner.page
    }

    /// URL of the notebook document.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// Current readiness state.
    #[must_use]
    pub fn state(&self) -> ReadinessState {
        *self.inner.state.lock()
    }

    fn transition(&self, next: ReadinessState) -> HarnessResult<()> {
        let mut state = self.inner.state.lock();
        *state = state.advance(next)?;
        debug!("{}: {:?}", self.inner.url, next);
        Ok(())
    }

    fn wait_config(&self, timeout: Duration) -> WaitConfig {
        WaitConfig::new(timeout, self.inner.timings.poll_interval())
    }

    /// Walks `Loading -> UiReady -> KernelIdle`. Returns immediately if the
    /// kernel has already been seen idle.
    ///
    /// # Errors
    ///
    /// Returns `WaitTimeout` if the UI or kernel never becomes ready. This
    /// means the environment is unhealthy and is not retried.
    pub async fn wait_until_ready(&self) -> HarnessResult<()> {
        let page = &self.inner.page;
        let selectors = &self.inner.selectors;
        let timings = &self.inner.timings;

        if self.state() == ReadinessState::Loading {
            let ui = self.wait_config(timings.ui_ready_timeout());
            page.wait_for_function("document.title", ui, "non-empty document title")
                .await?;
            page.wait_for_visible(&selectors.shell, ui).await?;
            page.wait_for_visible(&selectors.toolbar, ui).await?;
            self.transition(ReadinessState::UiReady)?;
        }

        if self.state() == ReadinessState::UiReady {
            settle(timings.kernel_settle(), "stale execution indicator").await;
            page.wait_for_selector(
                &selectors.execution_indicator_idle,
                self.wait_config(timings.kernel_idle_timeout()),
            )
            .await?;
            self.transition(ReadinessState::KernelIdle)?;
        }

        Ok(())
    }

    /// Submits every cell for execution via the run-all shortcut.
    ///
    /// The shortcut is pressed twice; a single press is occasionally lost
    /// when the page has not yet taken keyboard focus. Completion is not
    /// awaited: wait for rendered output, or call [`Self::wait_for_idle`].
    ///
    /// # Errors
    ///
    /// Returns readiness or input errors.
    pub async fn execute_all_cells(&self) -> HarnessResult<()> {
        self.wait_until_ready().await?;

        let page = &self.inner.page;
        let shortcut = &self.inner.selectors.run_all_shortcut;
        page.press_key(shortcut).await?;
        page.press_key(shortcut).await?;
        page.run("document.scrollTop = 0").await?;

        self.transition(ReadinessState::Executing)
    }

    /// Waits for the kernel to report idle again after execution.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` if nothing is executing, or `WaitTimeout`.
    pub async fn wait_for_idle(&self) -> HarnessResult<()> {
        if self.state() == ReadinessState::Idle {
            return Ok(());
        }
        self.state().advance(ReadinessState::Idle)?;

        let timings = &self.inner.timings;
        settle(timings.kernel_settle(), "execution indicator catching up").await;
        self.inner
            .page
            .wait_for_selector(
                &self.inner.selectors.execution_indicator_idle,
                self.wait_config(timings.kernel_idle_timeout()),
            )
            .await?;

        self.transition(ReadinessState::Idle)
    }

    /// Inserts a new cell below the first code cell, types `source` into it
    /// and runs it.
    ///
    /// Returns the element that had focus when typing began. Execution is
    /// submitted but not awaited.
    ///
    /// # Errors
    ///
    /// Returns readiness, wait or input errors.
    pub async fn insert_and_run_cell(&self, source: &str) -> HarnessResult<FocusTarget> {
        self.wait_until_ready().await?;

        let page = &self.inner.page;
        let selectors = &self.inner.selectors;
        let timings = &self.inner.timings;
        let pause = timings.action_settle();

        page.wait_for_visible(
            &selectors.code_cell,
            self.wait_config(timings.selector_timeout()),
        )
        .await?;

        page.click(&selectors.code_cell).await?;
        settle(pause, "cell selection").await;

        page.click(&selectors.insert_cell_below).await?;
        settle(pause, "cell insertion").await;

        // the new cell's editor takes focus as soon as it is inserted
        let focus = page.active_element().await?;
        if focus.is_body {
            warn!(
                "no editor focused after inserting a cell in {}; typing into <body>",
                self.inner.url
            );
        }
        page.type_text(source).await?;
        settle(pause, "typing").await;

        page.click(&selectors.run_cell).await?;
        settle(pause, "run command").await;

        self.transition(ReadinessState::Executing)?;
        Ok(focus)
    }

    /// Runs `source` in a new cell and reports whether it printed the success
    /// token (`true`) or rendered an error output (`false`).
    ///
    /// Only outputs that appear after the cell was submitted count, so an
    /// earlier failing or passing cell does not decide the result.
    ///
    /// # Errors
    ///
    /// Returns `WaitTimeout` if neither outcome appears within
    /// `timings.outcome_timeout_ms`.
    pub async fn assert_no_error_in_cell(&self, source: &str) -> HarnessResult<bool> {
        self.wait_until_ready().await?;

        let page = &self.inner.page;
        let selectors = &self.inner.selectors;

        let error_count = page.count_selector(&selectors.error_output).await?;
        let passed_count = page.count_xpath(&selectors.success_output).await?;

        self.insert_and_run_cell(source).await?;

        let new_error = format!(
            "{} > {error_count}",
            Page::count_selector_expression(&selectors.error_output)?
        );
        let new_passed = format!(
            "{} > {passed_count}",
            Page::count_xpath_expression(&selectors.success_output)?
        );

        // the outer timeout in race_outcome is the only bound
        let unbounded = self.wait_config(Duration::MAX);
        let error = page.wait_for_function(&new_error, unbounded, "error output");
        let passed = page.wait_for_function(&new_passed, unbounded, "success token");

        let outcome = race_outcome(error, passed, self.inner.timings.outcome_timeout()).await?;
        debug!("cell outcome in {}: passed={}", self.inner.url, outcome);
        Ok(outcome)
    }

    /// Handle to the rendered widget. The element is resolved on each call.
    #[must_use]
    pub fn widget(&self) -> WidgetHandle<'_> {
        WidgetHandle::new(&self.inner.page, &self.inner.selectors)
    }

    /// Runs every cell, waits for the widget to render in an output area and
    /// flushes it.
    ///
    /// # Errors
    ///
    /// Returns readiness, wait or widget errors.
    pub async fn default_body(&self) -> HarnessResult<WidgetHandle<'_>> {
        self.execute_all_cells().await?;

        let widget = self.widget();
        self.inner
            .page
            .wait_for_visible(
                widget.selector(),
                self.wait_config(self.inner.timings.selector_timeout()),
            )
            .await?;
        widget.flush().await?;

        self.transition(ReadinessState::Idle)?;
        Ok(widget)
    }

    /// Closes the page if this is the last handle to it.
    pub(crate) async fn close(self) -> Result<()> {
        match Arc::try_unwrap(self.inner) {
            Ok(inner) => inner.page.close().await,
            Err(_) => {
                warn!("session still shared after the test body; leaving the page to the browser");
                Ok(())
            }
        }
    }
}
