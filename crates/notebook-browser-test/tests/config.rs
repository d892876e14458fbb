//! Layered configuration loading.
//!
//! Priority: environment > notebook-harness.toml > defaults. These tests
//! mutate process environment and run serially.

use notebook_browser_test::{HarnessConfig, HarnessError};
use serial_test::serial;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

const SETTLE_VAR: &str = "NOTEBOOK_HARNESS_TIMINGS__KERNEL_SETTLE_MS";
const DIR_VAR: &str = "NOTEBOOK_HARNESS_NOTEBOOK_DIR";
const PORT_VAR: &str = "__JUPYTERLAB_PORT__";

fn set(var: &str, value: &str) {
    unsafe {
        std::env::set_var(var, value);
    }
}

fn clear(vars: &[&str]) {
    for var in vars {
        unsafe {
            std::env::remove_var(var);
        }
    }
}

fn write_config(dir: &TempDir) -> PathBuf {
    let path = dir.path().join("notebook-harness.toml");
    fs::write(
        &path,
        r#"
notebook_dir = "file/out"

[selectors]
run_all_shortcut = "A"

[timings]
kernel_settle_ms = 500
outcome_timeout_ms = 1000
"#,
    )
    .unwrap();
    path
}

#[test]
#[serial]
fn defaults_without_file_or_env() {
    clear(&[SETTLE_VAR, DIR_VAR]);

    let config = HarnessConfig::load_from(None).unwrap();
    assert_eq!(config, HarnessConfig::default());
}

#[test]
#[serial]
fn missing_file_falls_back_to_defaults() {
    clear(&[SETTLE_VAR, DIR_VAR]);
    let temp = TempDir::new().unwrap();

    let config = HarnessConfig::load_from(Some(&temp.path().join("absent.toml"))).unwrap();
    assert_eq!(config, HarnessConfig::default());
}

#[test]
#[serial]
fn file_overrides_defaults() {
    clear(&[SETTLE_VAR, DIR_VAR]);
    let temp = TempDir::new().unwrap();
    let path = write_config(&temp);

    let config = HarnessConfig::load_from(Some(&path)).unwrap();
    assert_eq!(config.notebook_dir, PathBuf::from("file/out"));
    assert_eq!(config.selectors.run_all_shortcut, "A");
    assert_eq!(config.timings.kernel_settle_ms, 500);
    assert_eq!(config.timings.outcome_timeout_ms, 1000);
    // untouched keys keep their defaults
    assert_eq!(config.timings.action_settle_ms, 100);
    assert_eq!(config.selectors.code_cell, ".jp-CodeCell");
}

#[test]
#[serial]
fn environment_overrides_file() {
    let temp = TempDir::new().unwrap();
    let path = write_config(&temp);
    set(SETTLE_VAR, "3000");
    set(DIR_VAR, "env/out");

    let config = HarnessConfig::load_from(Some(&path));
    clear(&[SETTLE_VAR, DIR_VAR]);

    let config = config.unwrap();
    assert_eq!(config.timings.kernel_settle_ms, 3000);
    assert_eq!(config.notebook_dir, PathBuf::from("env/out"));
    assert_eq!(config.selectors.run_all_shortcut, "A");
}

#[test]
#[serial]
fn wrongly_typed_values_are_rejected() {
    set(SETTLE_VAR, "soon");

    let result = HarnessConfig::load_from(None);
    clear(&[SETTLE_VAR]);

    assert!(matches!(result, Err(HarnessError::Config(_))));
}

#[test]
#[serial]
fn port_comes_from_the_server_variable() {
    let config = HarnessConfig::default();

    clear(&[PORT_VAR]);
    assert!(matches!(
        config.port(),
        Err(HarnessError::MissingPort { ref var }) if var == PORT_VAR
    ));

    set(PORT_VAR, "not-a-port");
    assert!(matches!(config.port(), Err(HarnessError::MissingPort { .. })));

    set(PORT_VAR, "8888");
    assert_eq!(config.port().unwrap(), 8888);

    clear(&[PORT_VAR]);
}
