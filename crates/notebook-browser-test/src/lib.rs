//! # notebook-browser-test
//!
//! Browser-driven integration tests for a visualization widget running
//! inside a live JupyterLab, built on chromiumoxide.
//!
//! The harness generates a throwaway notebook per test, opens it in headless
//! Chrome against an already running JupyterLab server, waits for the kernel
//! to become usable, executes cells and reads back either the rendered
//! widget markup or an explicit pass/fail marker from a cell's output.
//!
//! ## Architecture
//!
//! - **ArtifactCleaner**: Removes JupyterLab workspaces and checkpoints
//! - **NotebookSynthesizer**: Template clone + setup cell + test cells, written as `.ipynb`
//! - **NotebookSession**: Readiness state machine, run-all, insert-and-run, outcome race
//! - **WidgetHandle**: Page-evaluated calls into the widget (flush, resize, restore)
//! - **TestGroup**: Per-group browser and cleanup lifecycle, one notebook per test
//!
//! ## Example
//!
//! ```ignore
//! use notebook_browser_test::{GroupOptions, describe_group};
//!
//! #[tokio::test]
//! #[ignore] // needs Chrome and a JupyterLab server on $__JUPYTERLAB_PORT__
//! async fn widget_renders() -> Result<(), Box<dyn std::error::Error>> {
//!     describe_group(GroupOptions::new("Blank Notebook"), |group| async move {
//!         group
//!             .register_test(
//!                 "Loads a table",
//!                 [["w = perspective.PerspectiveWidget(arrow_data)\n", "w"]],
//!                 |session| async move {
//!                     session.default_body().await?;
//!                     assert!(session.assert_no_error_in_cell("print('Passed')").await?);
//!                     Ok(())
//!                 },
//!             )
//!             .await
//!     })
//!     .await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Environment
//!
//! The notebook server port is read from `__JUPYTERLAB_PORT__`. Everything
//! else has defaults that can be overridden from `notebook-harness.toml` or
//! `NOTEBOOK_HARNESS_*` variables (see [`config`]).
//!
//! Unit tests run with `cargo test`; tests that need Chrome and a live
//! server are `#[ignore]` and run with `cargo test -- --ignored`.

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod browser;
pub mod cleaner;
pub mod config;
pub mod error;
pub mod logging;
pub mod notebook;
pub mod page;
pub mod registrar;
pub mod server;
pub mod session;
pub mod wait;
pub mod widget;

pub use browser::{TestBrowser, TestBrowserConfig};
pub use cleaner::{ArtifactCleaner, CleanupReport};
pub use config::{BrowserSettings, HarnessConfig, Selectors, Timings};
pub use error::{BrowserError, HarnessError, HarnessResult, Result};
pub use notebook::{Cell, Notebook, NotebookSynthesizer, NotebookTemplate, sanitize_name};
pub use page::{FocusTarget, Page};
pub use registrar::{GroupOptions, TestGroup, TestOutcome, describe_group, describe_group_with};
pub use server::{JupyterLabServer, NotebookServer};
pub use session::{NotebookSession, ReadinessState};
pub use wait::{DEFAULT_POLL_INTERVAL, DEFAULT_TIMEOUT, LoadState, WaitConfig};
pub use widget::WidgetHandle;
