//! Harness configuration.
//!
//! Values are layered with figment. Priority: environment variables >
//! `notebook-harness.toml` > defaults. Nested keys are addressed with a double
//! underscore, e.g. `NOTEBOOK_HARNESS_TIMINGS__KERNEL_SETTLE_MS=3000`.
//!
//! The notebook server port is deliberately not part of the layered config:
//! it is read from the environment variable named by `port_env` when a test
//! actually needs to navigate, so pure synthesis tests run without a server.

use crate::error::{HarnessError, HarnessResult};
use figment::{
    Figment,
    providers::{Env, Format as _, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File name looked up in the working directory by [`HarnessConfig::load`].
pub const CONFIG_FILE: &str = "notebook-harness.toml";

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "NOTEBOOK_HARNESS_";

/// Environment variable the notebook server publishes its port in.
pub const DEFAULT_PORT_ENV: &str = "__JUPYTERLAB_PORT__";

/// Top-level harness configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Server working directory; generated notebooks are written here.
    pub notebook_dir: PathBuf,

    /// Root of the JupyterLab test configuration (holds the `lab` workspaces dir).
    pub config_root: PathBuf,

    /// Name of the environment variable holding the server port.
    pub port_env: String,

    /// Host the notebook server listens on.
    pub host: String,

    /// Notebook template to clone. `None` uses the embedded template.
    pub template_path: Option<PathBuf>,

    /// Source lines of the setup cell prepended to every notebook.
    pub setup_source: Vec<String>,

    pub selectors: Selectors,

    pub timings: Timings,

    pub browser: BrowserSettings,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            notebook_dir: PathBuf::from("dist/umd"),
            config_root: PathBuf::from("test/config/jupyter"),
            port_env: DEFAULT_PORT_ENV.to_string(),
            host: "127.0.0.1".to_string(),
            template_path: None,
            setup_source: default_setup_source(),
            selectors: Selectors::default(),
            timings: Timings::default(),
            browser: BrowserSettings::default(),
        }
    }
}

fn default_setup_source() -> Vec<String> {
    vec![
        "import perspective\n".to_string(),
        "import pandas as pd\n".to_string(),
        "import numpy as np\n".to_string(),
        "arrow_data = None\n".to_string(),
        "with open('test.arrow', 'rb') as arrow: \n    arrow_data = arrow.read()".to_string(),
    ]
}

impl HarnessConfig {
    /// Loads configuration from defaults, `notebook-harness.toml` in the
    /// current directory (if present) and the environment.
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::Config` if a layer holds a value of the wrong type.
    pub fn load() -> HarnessResult<Self> {
        Self::load_from(Some(Path::new(CONFIG_FILE)))
    }

    /// Loads configuration using an explicit config file path.
    ///
    /// A missing file is skipped, matching figment's `Toml::file` semantics.
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::Config` if extraction fails.
    pub fn load_from(config_file: Option<&Path>) -> HarnessResult<Self> {
        let mut figment = Figment::new().merge(Serialized::defaults(Self::default()));

        if let Some(path) = config_file {
            figment = figment.merge(Toml::file(path));
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        Ok(figment.extract()?)
    }

    /// Resolves relative directories against `root`.
    #[must_use]
    pub fn rooted_at(mut self, root: &Path) -> Self {
        if self.notebook_dir.is_relative() {
            self.notebook_dir = root.join(&self.notebook_dir);
        }
        if self.config_root.is_relative() {
            self.config_root = root.join(&self.config_root);
        }
        if let Some(template) = &self.template_path {
            if template.is_relative() {
                self.template_path = Some(root.join(template));
            }
        }
        self
    }

    /// Reads the notebook server port from the environment.
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::MissingPort` if the variable is unset or not a
    /// valid port number.
    pub fn port(&self) -> HarnessResult<u16> {
        std::env::var(&self.port_env)
            .ok()
            .and_then(|raw| raw.trim().parse::<u16>().ok())
            .filter(|port| *port != 0)
            .ok_or_else(|| HarnessError::MissingPort {
                var: self.port_env.clone(),
            })
    }
}

/// DOM selectors the session driver relies on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Selectors {
    pub shell: String,
    pub toolbar: String,
    pub execution_indicator_idle: String,
    pub code_cell: String,
    pub insert_cell_below: String,
    pub run_cell: String,
    pub error_output: String,
    /// XPath matched against rendered output for the success token.
    pub success_output: String,
    pub widget: String,
    pub widget_container: String,
    /// JS expression evaluating to the widget model object.
    pub widget_model: String,
    /// Key bound to the "run all cells" command.
    pub run_all_shortcut: String,
}

impl Default for Selectors {
    fn default() -> Self {
        Self {
            shell: ".p-Widget".to_string(),
            toolbar: ".jp-NotebookPanel-toolbar".to_string(),
            execution_indicator_idle: r#".jp-Notebook-ExecutionIndicator[data-status="idle"]"#
                .to_string(),
            code_cell: ".jp-CodeCell".to_string(),
            insert_cell_below: r#".jp-Button[data-command="notebook:insert-cell-below"]"#
                .to_string(),
            run_cell: r#".jp-Button[data-command="runmenu:run"]"#.to_string(),
            error_output: r#"div[data-mime-type="application/vnd.jupyter.stderr"]"#.to_string(),
            success_output: r#"//div//pre[contains(text(),"'Passed'")]"#.to_string(),
            widget: ".jp-OutputArea-output perspective-viewer".to_string(),
            widget_container: ".PSPContainer".to_string(),
            widget_model: "window.__WIDGET__".to_string(),
            run_all_shortcut: "R".to_string(),
        }
    }
}

/// Delays and timeouts, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timings {
    /// Bound on `Loading -> UiReady`.
    pub ui_ready_timeout_ms: u64,
    /// Unconditional delay before trusting the execution indicator.
    pub kernel_settle_ms: u64,
    /// Bound on waiting for the indicator to report idle.
    pub kernel_idle_timeout_ms: u64,
    /// Delay after each UI action in `insert_and_run_cell`.
    pub action_settle_ms: u64,
    /// Bound on the success/error race.
    pub outcome_timeout_ms: u64,
    /// Bound on widget visibility and other DOM waits.
    pub selector_timeout_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            ui_ready_timeout_ms: 30_000,
            kernel_settle_ms: 2_000,
            kernel_idle_timeout_ms: 30_000,
            action_settle_ms: 100,
            outcome_timeout_ms: 60_000,
            selector_timeout_ms: 30_000,
            poll_interval_ms: 100,
        }
    }
}

impl Timings {
    #[must_use]
    pub fn ui_ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ui_ready_timeout_ms)
    }

    #[must_use]
    pub fn kernel_settle(&self) -> Duration {
        Duration::from_millis(self.kernel_settle_ms)
    }

    #[must_use]
    pub fn kernel_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.kernel_idle_timeout_ms)
    }

    #[must_use]
    pub fn action_settle(&self) -> Duration {
        Duration::from_millis(self.action_settle_ms)
    }

    #[must_use]
    pub fn outcome_timeout(&self) -> Duration {
        Duration::from_millis(self.outcome_timeout_ms)
    }

    #[must_use]
    pub fn selector_timeout(&self) -> Duration {
        Duration::from_millis(self.selector_timeout_ms)
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Browser launch settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    pub headless: bool,
    pub window_width: u32,
    pub window_height: u32,
    /// Chrome executable path (None = auto-detect).
    pub chrome_path: Option<String>,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless: !cfg!(feature = "visible"),
            window_width: 1280,
            window_height: 1024,
            chrome_path: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_jupyterlab_layout() {
        let config = HarnessConfig::default();
        assert_eq!(config.notebook_dir, PathBuf::from("dist/umd"));
        assert_eq!(config.config_root, PathBuf::from("test/config/jupyter"));
        assert_eq!(config.port_env, "__JUPYTERLAB_PORT__");
        assert_eq!(config.timings.kernel_settle(), Duration::from_secs(2));
        assert_eq!(config.timings.action_settle(), Duration::from_millis(100));
        assert_eq!(config.setup_source.len(), 5);
    }

    #[test]
    fn rooted_at_only_touches_relative_paths() {
        let config = HarnessConfig {
            config_root: PathBuf::from("/abs/config"),
            template_path: Some(PathBuf::from("tpl.json")),
            ..HarnessConfig::default()
        }
        .rooted_at(Path::new("/pkg"));

        assert_eq!(config.notebook_dir, PathBuf::from("/pkg/dist/umd"));
        assert_eq!(config.config_root, PathBuf::from("/abs/config"));
        assert_eq!(config.template_path, Some(PathBuf::from("/pkg/tpl.json")));
    }
}
