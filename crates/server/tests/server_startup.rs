use std::io::Write;
use std::net::TcpListener;
use std::time::Duration;

use tempfile::{NamedTempFile, TempDir};
use tokio::time::{sleep, timeout};

/// An address nothing listens on; the analysis engine is never contacted
/// unless a report is submitted.
fn unused_engine_url() -> String {
    let port = TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    format!("http://127.0.0.1:{}/analyze", port)
}

/// Create a minimal valid config
fn minimal_config(dir: &TempDir) -> String {
    format!(
        r#"
[dispatcher]
url = "{}"

[database]
path = "{}"

[metrics]
textfile_path = "{}"
"#,
        unused_engine_url(),
        dir.path().join("exploitiq.db").display(),
        dir.path().join("exploitiq.prom").display(),
    )
}

fn write_config(contents: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(contents.as_bytes()).unwrap();
    temp_file.flush().unwrap();
    temp_file
}

/// Run the binary to completion with the given config path
async fn run_to_exit(config_path: &std::path::Path) -> std::process::Output {
    timeout(
        Duration::from_secs(5),
        tokio::process::Command::new(env!("CARGO_BIN_EXE_exploitiq"))
            .env("EXPLOITIQ_CONFIG", config_path)
            .env("RUST_LOG", "error")
            .output(),
    )
    .await
    .expect("Command timed out")
    .expect("Failed to execute command")
}

#[tokio::test]
async fn test_server_starts_with_minimal_config() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&minimal_config(&dir));

    let mut server = tokio::process::Command::new(env!("CARGO_BIN_EXE_exploitiq"))
        .env("EXPLOITIQ_CONFIG", config.path())
        .env("RUST_LOG", "error") // Quiet logs during tests
        .kill_on_drop(true)
        .spawn()
        .expect("Failed to spawn server");

    // The database and the first metrics snapshot appear once startup completes
    let metrics_path = dir.path().join("exploitiq.prom");
    let mut ready = false;
    for _ in 0..100 {
        if metrics_path.exists() {
            ready = true;
            break;
        }
        sleep(Duration::from_millis(50)).await;
    }
    assert!(ready, "Server did not write metrics in time");
    assert!(dir.path().join("exploitiq.db").exists());

    let metrics = std::fs::read_to_string(&metrics_path).unwrap();
    assert!(metrics.contains("exploitiq_lifecycle_running 1"));
    assert!(metrics.contains("exploitiq_queue_max_active 5"));

    // Still running
    assert!(server.try_wait().unwrap().is_none());

    // Cleanup
    server.kill().await.ok();
}

#[tokio::test]
async fn test_missing_config_file_exits_with_error() {
    let result = run_to_exit(std::path::Path::new("/nonexistent/config.toml")).await;
    assert!(!result.status.success());
}

#[tokio::test]
async fn test_missing_dispatcher_section_exits_with_error() {
    let config = write_config(
        r#"
[queue]
max_active = 2
"#,
    );

    let result = run_to_exit(config.path()).await;
    assert!(!result.status.success());
}

#[tokio::test]
async fn test_invalid_queue_config_exits_with_error() {
    let config = write_config(
        r#"
[dispatcher]
url = "http://127.0.0.1:9/analyze"

[queue]
max_active = 0
"#,
    );

    let result = run_to_exit(config.path()).await;
    assert!(!result.status.success());
}
