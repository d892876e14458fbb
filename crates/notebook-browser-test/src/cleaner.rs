//! Removal of per-run JupyterLab artifacts.
//!
//! JupyterLab persists workspaces under its config root and redirects
//! single-document URLs to the last opened document when one exists, and it
//! writes checkpoints next to every notebook it opens. Both directories are
//! removed before each test and once after a group so a crashed run cannot
//! leak state into the next.

use crate::config::HarnessConfig;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Directory JupyterLab stores generated workspaces in, under the config root.
pub const WORKSPACES_DIR: &str = "lab";

/// Directory JupyterLab stores notebook checkpoints in, under the notebook dir.
pub const CHECKPOINTS_DIR: &str = ".ipynb_checkpoints";

/// What a cleanup pass did.
#[derive(Debug, Default, Clone)]
pub struct CleanupReport {
    /// Directories that existed and were removed.
    pub removed: Vec<PathBuf>,
    /// Directories that could not be removed, with the reason.
    pub failed: Vec<(PathBuf, String)>,
}

impl CleanupReport {
    /// True if every target is gone.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Best-effort remover for the shared artifact directories.
#[derive(Debug, Clone)]
pub struct ArtifactCleaner {
    targets: Vec<PathBuf>,
}

impl ArtifactCleaner {
    /// Creates a cleaner for the given roots.
    pub fn new(config_root: impl AsRef<Path>, notebook_dir: impl AsRef<Path>) -> Self {
        Self {
            targets: vec![
                config_root.as_ref().join(WORKSPACES_DIR),
                notebook_dir.as_ref().join(CHECKPOINTS_DIR),
            ],
        }
    }

    /// Creates a cleaner for the roots named in `config`.
    #[must_use]
    pub fn from_config(config: &HarnessConfig) -> Self {
        Self::new(&config.config_root, &config.notebook_dir)
    }

    /// The directories this cleaner deletes.
    #[must_use]
    pub fn targets(&self) -> &[PathBuf] {
        &self.targets
    }

    /// Deletes every target directory recursively.
    ///
    /// Never fails: a missing target is skipped, and any other error is
    /// logged and recorded in the report.
    pub fn remove_artifacts(&self) -> CleanupReport {
        let mut report = CleanupReport::default();

        for target in &self.targets {
            match std::fs::remove_dir_all(target) {
                Ok(()) => {
                    debug!("removed artifact directory {}", target.display());
                    report.removed.push(target.clone());
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    warn!("could not remove {}: {}", target.display(), e);
                    report.failed.push((target.clone(), e.to_string()));
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn populated() -> (TempDir, ArtifactCleaner) {
        let temp = TempDir::new().unwrap();
        let config_root = temp.path().join("config");
        let notebook_dir = temp.path().join("dist");

        std::fs::create_dir_all(config_root.join("lab/workspaces")).unwrap();
        std::fs::write(config_root.join("lab/workspaces/default.json"), "{}").unwrap();
        std::fs::create_dir_all(notebook_dir.join(".ipynb_checkpoints")).unwrap();
        std::fs::write(notebook_dir.join("kept.ipynb"), "{}").unwrap();

        let cleaner = ArtifactCleaner::new(&config_root, &notebook_dir);
        (temp, cleaner)
    }

    #[test]
    fn removes_workspaces_and_checkpoints() {
        let (temp, cleaner) = populated();

        let report = cleaner.remove_artifacts();

        assert_eq!(report.removed.len(), 2);
        assert!(report.is_clean());
        assert!(!temp.path().join("config/lab").exists());
        assert!(!temp.path().join("dist/.ipynb_checkpoints").exists());
        // notebooks themselves are left for inspection
        assert!(temp.path().join("dist/kept.ipynb").exists());
    }

    #[test]
    fn second_pass_is_a_no_op() {
        let (_temp, cleaner) = populated();

        cleaner.remove_artifacts();
        let report = cleaner.remove_artifacts();

        assert!(report.removed.is_empty());
        assert!(report.is_clean());
    }

    #[test]
    fn missing_roots_are_not_an_error() {
        let cleaner = ArtifactCleaner::new("/nonexistent/config", "/nonexistent/dist");
        let report = cleaner.remove_artifacts();
        assert!(report.removed.is_empty());
        assert!(report.is_clean());
    }
}
