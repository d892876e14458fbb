//! Cleanup lifecycle of test groups. None of these launch a browser.

use notebook_browser_test::{
    ArtifactCleaner, BrowserError, GroupOptions, HarnessConfig, HarnessError, describe_group_with,
};
use serial_test::serial;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tempfile::TempDir;

const LIFECYCLE_PORT_VAR: &str = "LIFECYCLE_TEST_JUPYTERLAB_PORT";

fn seed_artifacts(config: &HarnessConfig) {
    fs::create_dir_all(config.config_root.join("lab/workspaces")).unwrap();
    fs::write(
        config.config_root.join("lab/workspaces/auto-x.jupyterlab-workspace"),
        "{}",
    )
    .unwrap();
    fs::create_dir_all(config.notebook_dir.join(".ipynb_checkpoints")).unwrap();
}

fn assert_no_artifacts(root: &Path) {
    assert!(!root.join("test/config/jupyter/lab").exists());
    assert!(!root.join("dist/umd/.ipynb_checkpoints").exists());
}

#[tokio::test]
async fn group_leaves_no_artifacts_behind() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().to_path_buf();

    describe_group_with(
        HarnessConfig::default(),
        GroupOptions::new("cleanup").root(&root),
        |group| async move {
            let (_, notebook) = group.prepare("first test", [["x = 1"]])?;
            assert!(notebook.exists());

            // JupyterLab writes these while a test runs
            seed_artifacts(group.config());
            Ok(())
        },
    )
    .await
    .unwrap();

    assert_no_artifacts(&root);
    // notebooks are not the cleaner's business
    assert!(root.join("dist/umd/first_test.ipynb").exists());
}

#[tokio::test]
async fn failing_group_still_cleans_up() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().to_path_buf();

    let result = describe_group_with(
        HarnessConfig::default(),
        GroupOptions::new("failing").root(&root),
        |group| async move {
            seed_artifacts(group.config());
            group.prepare("", [["x"]])?;
            Ok(())
        },
    )
    .await;

    assert!(matches!(result, Err(HarnessError::InvalidNotebookName(_))));
    assert_no_artifacts(&root);
}

#[tokio::test]
async fn stale_artifacts_are_removed_before_each_test() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().to_path_buf();
    let inner_root = root.clone();

    describe_group_with(
        HarnessConfig::default(),
        GroupOptions::new("before each").root(&root),
        |group| async move {
            for name in ["one", "two"] {
                // a crashed previous test left these behind
                seed_artifacts(group.config());
                group.prepare(name, [["pass"]])?;
                assert_no_artifacts(&inner_root);
            }
            Ok(())
        },
    )
    .await
    .unwrap();
}

#[test]
fn cleanup_twice_in_a_row_never_errors() {
    let temp = TempDir::new().unwrap();
    let config = HarnessConfig::default().rooted_at(temp.path());
    seed_artifacts(&config);

    let cleaner = ArtifactCleaner::from_config(&config);
    let first = cleaner.remove_artifacts();
    let second = cleaner.remove_artifacts();

    assert_eq!(first.removed.len(), 2);
    assert!(second.removed.is_empty());
    assert!(first.is_clean() && second.is_clean());
}

fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

#[tokio::test]
#[serial]
async fn unreachable_server_is_reported_as_a_failed_test() {
    let temp = TempDir::new().unwrap();
    unsafe {
        std::env::set_var(LIFECYCLE_PORT_VAR, closed_port().to_string());
    }
    let config = HarnessConfig {
        port_env: LIFECYCLE_PORT_VAR.to_string(),
        ..HarnessConfig::default()
    };

    let body_ran = Arc::new(AtomicBool::new(false));
    let ran = Arc::clone(&body_ran);

    let result = describe_group_with(
        config,
        GroupOptions::new("unreachable").root(temp.path()),
        |group| async move {
            let outcome = group
                .register_test("never navigates", [["1"]], |_session| async move {
                    ran.store(true, Ordering::SeqCst);
                    Ok(())
                })
                .await;
            assert!(matches!(
                outcome,
                Err(HarnessError::Browser(BrowserError::ServerUnavailable { .. }))
            ));

            let report = group.report();
            assert_eq!(report.len(), 1);
            assert_eq!(report[0].name, "never navigates");
            assert!(!report[0].passed);
            assert!(report[0].notebook.exists());
            Ok(())
        },
    )
    .await;

    unsafe {
        std::env::remove_var(LIFECYCLE_PORT_VAR);
    }
    result.unwrap();
    assert!(!body_ran.load(Ordering::SeqCst));
}

#[tokio::test]
#[serial]
async fn missing_port_is_reported_as_a_failed_test() {
    let temp = TempDir::new().unwrap();
    unsafe {
        std::env::remove_var(LIFECYCLE_PORT_VAR);
    }
    let config = HarnessConfig {
        port_env: LIFECYCLE_PORT_VAR.to_string(),
        ..HarnessConfig::default()
    };

    describe_group_with(
        config,
        GroupOptions::new("no port").root(temp.path()),
        |group| async move {
            let outcome = group
                .register_test("no server", [["1"]], |_session| async move { Ok(()) })
                .await;
            assert!(matches!(outcome, Err(HarnessError::MissingPort { .. })));

            let report = group.report();
            assert_eq!(report.len(), 1);
            assert!(!report[0].passed);
            Ok(())
        },
    )
    .await
    .unwrap();
}
