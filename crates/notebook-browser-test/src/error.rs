//! Error types for the notebook harness.
//!
//! Two layers are kept apart. `BrowserError` covers the automation layer
//! (launch, CDP, navigation, waits, input) and is propagated unmodified so a
//! failing test reports the underlying automation error verbatim.
//! `HarnessError` covers everything the harness itself decides: notebook
//! synthesis, configuration, readiness bookkeeping.
//!
//! A cell that renders an error output is *not* an error here; it is reported
//! as `Ok(false)` by `NotebookSession::assert_no_error_in_cell`.

use crate::session::ReadinessState;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while driving the browser.
#[derive(Debug, Error)]
pub enum BrowserError {
    /// Failed to launch the browser process.
    ///
    /// This typically occurs when Chrome/Chromium is not installed,
    /// or when there are permission issues with the executable.
    #[error("failed to launch browser: {reason}")]
    LaunchFailed {
        /// Human-readable reason for the launch failure
        reason: String,
        /// Optional underlying error that caused the failure
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Failed to establish or use the Chrome DevTools Protocol connection.
    #[error("CDP connection failed: {0}")]
    ConnectionFailed(String),

    /// Navigation to a URL failed or timed out.
    #[error("navigation to '{url}' failed: {reason}")]
    NavigationFailed {
        /// The URL that failed to load
        url: String,
        /// Reason for the navigation failure
        reason: String,
    },

    /// A wait condition was not satisfied within the timeout.
    #[error("wait condition '{condition}' timed out after {timeout:?}")]
    WaitTimeout {
        /// Description of the condition that timed out
        condition: String,
        /// How long we waited before timing out
        timeout: Duration,
    },

    /// JavaScript execution in the page context failed.
    #[error("JavaScript execution failed: {0}")]
    ScriptExecutionFailed(String),

    /// A click, key press or text insertion could not be dispatched.
    #[error("input dispatch to '{target}' failed: {reason}")]
    InputFailed {
        /// Selector or key the input was aimed at
        target: String,
        /// Reason reported by the browser
        reason: String,
    },

    /// The notebook server did not accept connections.
    #[error("notebook server at {address} is not reachable: {reason}")]
    ServerUnavailable {
        /// Address that was probed
        address: String,
        /// Reason for the failure
        reason: String,
    },

    /// An operation was attempted on a closed browser instance.
    #[error("browser instance is already closed")]
    AlreadyClosed,

    /// Wraps errors from the chromiumoxide library.
    #[error("chromiumoxide error: {0}")]
    ChromiumOxide(#[from] chromiumoxide::error::CdpError),
}

/// Errors raised by the harness itself.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Automation failures, passed through untouched.
    #[error(transparent)]
    Browser(#[from] BrowserError),

    /// The generated notebook could not be written.
    #[error("failed to write notebook '{}': {source}", path.display())]
    Synthesis {
        /// Target path of the notebook
        path: PathBuf,
        /// Underlying I/O failure
        #[source]
        source: std::io::Error,
    },

    /// A test name that cannot become a notebook filename.
    #[error("test name {0:?} does not produce a usable notebook filename")]
    InvalidNotebookName(String),

    /// Two tests in one group map to the same notebook file.
    #[error("notebook '{filename}' is already owned by test {existing:?}")]
    DuplicateNotebook {
        /// Sanitized filename both tests map to
        filename: String,
        /// Name of the test that registered it first
        existing: String,
    },

    /// The notebook server port variable is missing or not a port.
    #[error("environment variable {var} must hold the notebook server port")]
    MissingPort {
        /// Name of the environment variable
        var: String,
    },

    /// The notebook template could not be read or parsed.
    #[error("invalid notebook template '{}': {reason}", path.display())]
    Template {
        /// Where the template was loaded from
        path: PathBuf,
        /// Why it was rejected
        reason: String,
    },

    /// A readiness transition that skips or rewinds the state machine.
    #[error("invalid readiness transition {from:?} -> {to:?}")]
    InvalidTransition {
        /// Current state
        from: ReadinessState,
        /// Requested state
        to: ReadinessState,
    },

    /// Configuration extraction failed.
    #[error("configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// JSON (de)serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<figment::Error> for HarnessError {
    fn from(err: figment::Error) -> Self {
        HarnessError::Config(Box::new(err))
    }
}

/// Result type for browser operations.
pub type Result<T> = std::result::Result<T, BrowserError>;

/// Result type for harness operations.
pub type HarnessResult<T> = std::result::Result<T, HarnessError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;
    use std::io;

    #[test]
    fn io_failures_always_carry_the_notebook_path() {
        let err = HarnessError::Synthesis {
            path: PathBuf::from("dist/umd/blocked.ipynb"),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "read-only"),
        };

        assert_eq!(
            err.to_string(),
            "failed to write notebook 'dist/umd/blocked.ipynb': read-only"
        );
        let source = err.source().unwrap().downcast_ref::<io::Error>().unwrap();
        assert_eq!(source.kind(), io::ErrorKind::PermissionDenied);
    }

    #[test]
    fn browser_errors_pass_through_unchanged() {
        let err = HarnessError::from(BrowserError::WaitTimeout {
            condition: "cell outcome".to_string(),
            timeout: Duration::from_secs(1),
        });

        assert_eq!(err.to_string(), "wait condition 'cell outcome' timed out after 1s");
        assert!(matches!(err, HarnessError::Browser(BrowserError::WaitTimeout { .. })));
    }
}
