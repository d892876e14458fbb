//! Browser lifecycle management.
//!
//! One `TestBrowser` serves a whole test group; every test opens its own
//! `Page` on it, so browser sessions are never shared between tests.
//!
//! `TestBrowser` relies on chromiumoxide's `Drop` to kill Chrome if a test
//! panics, but `close()` is the graceful path and the registrar always calls it.

use crate::config::BrowserSettings;
use crate::error::{BrowserError, Result};
use crate::page::Page;
use chromiumoxide::browser::{Browser, BrowserConfig};
use futures::StreamExt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Configuration for launching a test browser.
#[derive(Debug, Clone)]
pub struct TestBrowserConfig {
    /// Run in headless mode (default: true).
    pub headless: bool,

    /// Browser window size.
    pub window_size: (u32, u32),

    /// Additional Chrome arguments.
    pub args: Vec<String>,

    /// Chrome executable path (None = auto-detect).
    pub chrome_path: Option<String>,
}

impl TestBrowserConfig {
    /// Creates a new config with defaults for headless testing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables visible mode for debugging.
    #[must_use]
    pub fn visible(mut self) -> Self {
        self.headless = false;
        self
    }

    /// Sets a custom window size.
    #[must_use]
    pub fn with_window_size(mut self, width: u32, height: u32) -> Self {
        self.window_size = (width, height);
        self
    }

    /// Adds additional Chrome arguments.
    #[must_use]
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args.extend(args);
        self
    }

    #[allow(clippy::result_large_err)]
    fn to_browser_config(&self, user_data_dir: &Path) -> Result<BrowserConfig> {
        let mut config = BrowserConfig::builder();

        if !self.headless {
            config = config.with_head();
        }

        config = config.window_size(self.window_size.0, self.window_size.1);

        config = config.user_data_dir(user_data_dir);

        for arg in &self.args {
            config = config.arg(arg.clone());
        }

        if let Some(path) = &self.chrome_path {
            config = config.chrome_executable(path.clone());
        }

        config.build().map_err(|e| BrowserError::LaunchFailed {
            reason: format!("invalid browser configuration: {e}"),
            source: None,
        })
    }
}

impl Default for TestBrowserConfig {
    fn default() -> Self {
        Self::from(&BrowserSettings::default())
    }
}

impl From<&BrowserSettings> for TestBrowserConfig {
    fn from(settings: &BrowserSettings) -> Self {
        Self {
            headless: settings.headless,
            window_size: (settings.window_width, settings.window_height),
            args: vec![
                // Containers and CI runners rarely have user namespaces.
                "--no-sandbox".to_string(),
                "--disable-dev-shm-usage".to_string(),
            ],
            chrome_path: settings.chrome_path.clone(),
        }
    }
}

/// Deletes a Chrome profile directory. A missing directory is fine.
fn remove_profile(dir: &Path) {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => debug!("removed browser profile {}", dir.display()),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!("could not remove browser profile {}: {}", dir.display(), e),
    }
}

/// A managed browser instance.
pub struct TestBrowser {
    inner: Arc<Mutex<Option<Browser>>>,
    handler_task: JoinHandle<()>,
    profile_dir: PathBuf,
}

impl TestBrowser {
    /// Launches Chrome and starts driving its CDP event stream.
    ///
    /// # Errors
    ///
    /// Returns `LaunchFailed` if Chrome is not installed or fails to start.
    pub async fn launch(config: TestBrowserConfig) -> Result<Self> {
        debug!("launching browser with config: {:?}", config);

        // A private profile per launch keeps parallel test processes from
        // tripping over Chrome's ProcessSingleton lock.
        let profile_dir =
            std::env::temp_dir().join(format!("notebook-browser-test-{}", uuid::Uuid::new_v4()));
        let browser_config = config.to_browser_config(&profile_dir)?;

        let (browser, mut handler) = match Browser::launch(browser_config).await {
            Ok(launched) => launched,
            Err(e) => {
                remove_profile(&profile_dir);
                return Err(BrowserError::LaunchFailed {
                    reason: "failed to launch Chrome process".to_string(),
                    source: Some(Box::new(e)),
                });
            }
        };

        // chromiumoxide only makes progress while its handler is polled
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    warn!("browser handler error: {}", e);
                }
            }
        });

        Ok(Self {
            inner: Arc::new(Mutex::new(Some(browser))),
            handler_task,
            profile_dir,
        })
    }

    /// Opens a new blank page.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyClosed` if the browser has been closed.
    pub async fn new_page(&self) -> Result<Page> {
        let browser = self.inner.lock().await;
        let browser = browser.as_ref().ok_or(BrowserError::AlreadyClosed)?;

        let chrome_page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| BrowserError::ConnectionFailed(e.to_string()))?;

        Ok(Page::new(chrome_page))
    }

    /// Profile directory Chrome was started with. Removed by [`Self::close`].
    #[must_use]
    pub fn profile_dir(&self) -> &Path {
        &self.profile_dir
    }

    /// Closes the browser, waits for the Chrome process to exit and deletes
    /// its profile directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the browser fails to close gracefully.
    pub async fn close(self) -> Result<()> {
        let mut guard = self.inner.lock().await;

        let mut result = Ok(());
        if let Some(mut browser) = guard.take() {
            debug!("closing browser");
            result = browser
                .close()
                .await
                .map(drop)
                .map_err(|e| BrowserError::ConnectionFailed(e.to_string()));
            // dropping an unclosed Browser kills the process instead
            if result.is_ok() {
                if let Err(e) = browser.wait().await {
                    warn!("browser process did not exit cleanly: {}", e);
                }
            }
        }

        self.handler_task.abort();
        remove_profile(&self.profile_dir);
        result
    }

    /// Returns true if the browser has been closed.
    pub async fn is_closed(&self) -> bool {
        self.inner.lock().await.is_none()
    }
}
