//! End-to-end launches with `fake-worker` standing in for the interpreter.

use std::fs;

use pyserve::{JsonRpcConnector, ServiceError, ServiceOptions, WorkerService};
use pyserve_test_utils::{closed_port, scripts_home};
use serde_json::{Map, json};

const FAKE_WORKER: &str = env!("CARGO_BIN_EXE_fake-worker");

fn options(home: &std::path::Path) -> ServiceOptions {
    ServiceOptions {
        scripts_home: Some(home.to_path_buf()),
        scratch_home: Some(home.join("scratch")),
        free_start_port: closed_port(),
        connect_timeout_ms: 10_000,
        install_signal_handlers: false,
        ..ServiceOptions::default()
    }
}

#[tokio::test]
async fn test_launch_run_and_stop() {
    let home = scripts_home().unwrap();
    let script = home.path().join("echo.py");
    fs::write(&script, "def run(**kw):\n    return kw\n").unwrap();

    let service = WorkerService::launch_with(FAKE_WORKER, &options(home.path()), &JsonRpcConnector::new())
        .await
        .unwrap();
    assert!(service.is_running());
    assert!(service.pid().is_some());

    let mut input = Map::new();
    input.insert("x".into(), json!(21));
    let output = service.run_script(&script, &input).await.unwrap();

    assert_eq!(output.get("x"), Some(&json!(21)));
    assert_eq!(output.get("script"), Some(&json!(script.display().to_string())));
    let search_path = output.get("search_path").and_then(|v| v.as_str()).unwrap();
    assert!(search_path.ends_with(&home.path().display().to_string()));

    service.stop();
    service.stop();
    assert!(!service.is_running());
}

#[tokio::test]
async fn test_drop_stops_worker_and_releases_hook() {
    let home = scripts_home().unwrap();

    let service = WorkerService::launch_with(FAKE_WORKER, &options(home.path()), &JsonRpcConnector::new())
        .await
        .unwrap();
    let port = service.port();
    drop(service);

    // Nothing answers on the port once the worker is gone
    let err = WorkerService::attach_with(
        pyserve::Endpoint::local(port),
        &ServiceOptions {
            connect_timeout_ms: 300,
            ..ServiceOptions::default()
        },
        &JsonRpcConnector::new(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ServiceError::ConnectTimeout { .. }));
}

#[tokio::test]
async fn test_missing_entry_script_reports_exit() {
    let home = tempfile::TempDir::new().unwrap();

    let err = WorkerService::launch_with(FAKE_WORKER, &options(home.path()), &JsonRpcConnector::new())
        .await
        .unwrap_err();

    match err {
        ServiceError::WorkerNotRunning { status } => assert_eq!(status, Some(2)),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_missing_interpreter_is_spawn_error() {
    let home = scripts_home().unwrap();
    let err = WorkerService::launch_with(
        "/nonexistent/python3",
        &options(home.path()),
        &JsonRpcConnector::new(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, ServiceError::ProcessSpawn { .. }));
}
