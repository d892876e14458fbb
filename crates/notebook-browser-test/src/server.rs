//! The running notebook server, seen from the harness.
//!
//! The harness never starts JupyterLab; it only needs to know where the
//! server listens and how a notebook filename maps to a document URL.

use crate::config::HarnessConfig;
use crate::error::{BrowserError, HarnessResult, Result};
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;

/// A notebook server the browser can navigate to.
#[async_trait]
pub trait NotebookServer: Send + Sync {
    /// Base URL of the server, without a trailing slash.
    fn base_url(&self) -> &str;

    /// Checks that the server is reachable before navigating.
    ///
    /// The default implementation assumes it is.
    async fn health_check(&self) -> Result<()> {
        Ok(())
    }

    /// Joins `path` to the base URL.
    fn url(&self, path: &str) -> String {
        let base = self.base_url().trim_end_matches('/');
        let path = path.trim_start_matches('/');
        format!("{base}/{path}")
    }

    /// URL that opens `filename` as a single document. The filename is
    /// percent-encoded so `#`, `?` and `%` stay part of the path.
    fn notebook_url(&self, filename: &str) -> String {
        self.url(&format!("doc/tree/{}", urlencoding::encode(filename)))
    }
}

impl fmt::Debug for dyn NotebookServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotebookServer")
            .field("base_url", &self.base_url())
            .finish()
    }
}

/// A JupyterLab server started outside the harness, located by host and port.
#[derive(Debug, Clone)]
pub struct JupyterLabServer {
    host: String,
    port: u16,
    base_url: String,
}

impl JupyterLabServer {
    /// Creates a handle for `http://{host}:{port}`.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        let base_url = format!("http://{host}:{port}");
        Self {
            host,
            port,
            base_url,
        }
    }

    /// Resolves the server from the configured host and the port variable.
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::MissingPort` if the port variable is unset.
    pub fn from_config(config: &HarnessConfig) -> HarnessResult<Self> {
        Ok(Self::new(config.host.clone(), config.port()?))
    }

    /// The server port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }
}

#[async_trait]
impl NotebookServer for JupyterLabServer {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn health_check(&self) -> Result<()> {
        let address = format!("{}:{}", self.host, self.port);
        match timeout(Duration::from_secs(5), TcpStream::connect(&address)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(BrowserError::ServerUnavailable {
                address,
                reason: e.to_string(),
            }),
            Err(_) => Err(BrowserError::ServerUnavailable {
                address,
                reason: "connection attempt timed out".to_string(),
            }),
        }
    }
}
