//! A registered test end to end: synthesis, server lookup, navigation,
//! body, page close and the group report.
//!
//! A tiny HTTP listener stands in for JupyterLab and answers every request
//! with the fake lab page. Requires Chrome; run with `cargo test -- --ignored`.

use notebook_browser_test::{
    GroupOptions, HarnessConfig, Timings, describe_group_with, logging::init_test_logging,
};
use parking_lot::Mutex;
use serial_test::serial;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

const FAKE_LAB: &str = include_str!("support/fake_lab.html");
const PORT_VAR: &str = "__JUPYTERLAB_PORT__";

struct FakeLabServer {
    port: u16,
    paths: Arc<Mutex<Vec<String>>>,
    task: JoinHandle<()>,
}

impl FakeLabServer {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let paths = Arc::new(Mutex::new(Vec::new()));

        let seen = Arc::clone(&paths);
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(answer(stream, Arc::clone(&seen)));
            }
        });

        Self { port, paths, task }
    }

    /// Request paths seen so far, without favicon lookups.
    fn document_paths(&self) -> Vec<String> {
        self.paths
            .lock()
            .iter()
            .filter(|p| !p.contains("favicon"))
            .cloned()
            .collect()
    }
}

impl Drop for FakeLabServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn answer(mut stream: TcpStream, seen: Arc<Mutex<Vec<String>>>) {
    let mut buf = vec![0u8; 16 * 1024];
    let mut len = 0;
    loop {
        match stream.read(&mut buf[len..]).await {
            // health checks connect and hang up
            Ok(0) | Err(_) => return,
            Ok(n) => {
                len += n;
                if buf[..len].windows(4).any(|w| w == b"\r\n\r\n") || len == buf.len() {
                    break;
                }
            }
        }
    }

    let head = String::from_utf8_lossy(&buf[..len]);
    let path = head.split_whitespace().nth(1).unwrap_or("/").to_string();
    seen.lock().push(path);

    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/html; charset=utf-8\r\n\
         Content-Length: {}\r\nConnection: close\r\n\r\n{}",
        FAKE_LAB.len(),
        FAKE_LAB
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}

fn fast_config() -> HarnessConfig {
    HarnessConfig {
        timings: Timings {
            ui_ready_timeout_ms: 5_000,
            kernel_settle_ms: 10,
            kernel_idle_timeout_ms: 5_000,
            action_settle_ms: 20,
            outcome_timeout_ms: 3_000,
            selector_timeout_ms: 5_000,
            poll_interval_ms: 20,
        },
        ..HarnessConfig::default()
    }
}

#[tokio::test]
#[serial]
#[ignore = "requires Chrome"]
async fn registered_test_navigates_runs_and_records() {
    init_test_logging();
    let temp = TempDir::new().unwrap();
    let server = FakeLabServer::start().await;
    unsafe {
        std::env::set_var(PORT_VAR, server.port.to_string());
    }

    let body_ran = Arc::new(AtomicBool::new(false));
    let ran = Arc::clone(&body_ran);
    let expected_url = format!(
        "http://127.0.0.1:{}/doc/tree/Runs_through_the_registrar.ipynb",
        server.port
    );

    let result = describe_group_with(
        fast_config(),
        GroupOptions::new("registrar").root(temp.path()),
        |group| async move {
            group
                .register_test(
                    "Runs through the registrar",
                    [["x = 1"]],
                    |session| async move {
                        assert_eq!(session.url(), expected_url);
                        session.wait_until_ready().await?;
                        assert!(session.assert_no_error_in_cell("print('Passed')").await?);
                        ran.store(true, Ordering::SeqCst);
                        Ok(())
                    },
                )
                .await?;

            let report = group.report();
            assert_eq!(report.len(), 1);
            assert_eq!(report[0].name, "Runs through the registrar");
            assert!(report[0].passed);
            assert!(report[0].notebook.ends_with("Runs_through_the_registrar.ipynb"));
            assert!(report[0].notebook.exists());
            Ok(())
        },
    )
    .await;

    unsafe {
        std::env::remove_var(PORT_VAR);
    }
    result.unwrap();

    assert!(body_ran.load(Ordering::SeqCst));
    let paths = server.document_paths();
    assert!(!paths.is_empty());
    assert!(
        paths
            .iter()
            .all(|p| p == "/doc/tree/Runs_through_the_registrar.ipynb"),
        "unexpected requests: {paths:?}"
    );
}
