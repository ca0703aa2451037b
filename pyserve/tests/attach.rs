//! Service facade against an in-process fake worker.

use std::fs;
use std::path::PathBuf;

use pyserve::{Endpoint, JsonRpcConnector, ServiceError, ServiceOptions, WorkerService};
use pyserve_test_utils::{FakeWorker, closed_port};
use serde_json::{Map, Value, json};
use tempfile::TempDir;

fn options(temp: &TempDir) -> ServiceOptions {
    ServiceOptions {
        scratch_home: Some(temp.path().join("fallback")),
        connect_timeout_ms: 2_000,
        ..ServiceOptions::default()
    }
}

async fn attach(worker: &FakeWorker, temp: &TempDir) -> WorkerService {
    WorkerService::attach_with(
        Endpoint::local(worker.port()),
        &options(temp),
        &JsonRpcConnector::new(),
    )
    .await
    .unwrap()
}

fn script(temp: &TempDir, name: &str) -> PathBuf {
    let path = temp.path().join(name);
    fs::write(&path, "def run(**kw):\n    return kw\n").unwrap();
    path
}

#[tokio::test]
async fn test_attach_and_run_script() {
    let worker = FakeWorker::start().await.unwrap();
    let temp = TempDir::new().unwrap();
    let service = attach(&worker, &temp).await;
    let script = script(&temp, "echo.py");

    let mut input = Map::new();
    input.insert("name".into(), json!("pyserve"));
    input.insert("values".into(), json!([1, 2, 3]));
    let output = service.run_script(&script, &input).await.unwrap();

    assert_eq!(output.get("name"), Some(&json!("pyserve")));
    assert_eq!(output.get("values"), Some(&json!([1, 2, 3])));
    assert_eq!(worker.state().calls(), vec!["runScript".to_string()]);
    assert!(service.is_running());
    assert_eq!(service.pid(), None);
}

#[tokio::test]
async fn test_attach_waits_for_readiness() {
    let worker = FakeWorker::builder().not_ready_for(3).start().await.unwrap();
    let temp = TempDir::new().unwrap();

    let _service = attach(&worker, &temp).await;

    assert_eq!(worker.state().liveness_calls(), 4);
}

#[tokio::test]
async fn test_remote_exception_formats_user_frames() {
    let worker = FakeWorker::start().await.unwrap();
    let temp = TempDir::new().unwrap();
    let service = attach(&worker, &temp).await;
    let script = script(&temp, "fails.py");

    let mut input = Map::new();
    input.insert("raise".into(), json!("bad threshold"));
    let err = service.run_script(&script, &input).await.unwrap_err();

    let exception = err.remote_exception().unwrap();
    assert_eq!(exception.kind, "ValueError");

    let formatted = WorkerService::format_exception(exception);
    assert!(formatted.starts_with("Traceback (most recent call last):"));
    assert!(formatted.contains("fails.py"));
    assert!(!formatted.contains("pyrpc.py"));
    assert!(formatted.ends_with("ValueError: bad threshold"));
}

#[tokio::test]
async fn test_scratch_removed_after_success_and_failure() {
    let worker = FakeWorker::start().await.unwrap();
    let temp = TempDir::new().unwrap();
    let service = attach(&worker, &temp).await;
    let script = script(&temp, "job.py");

    service.run_script(&script, &Map::new()).await.unwrap();
    assert!(!temp.path().join("python_tmp1").exists());

    let mut input = Map::new();
    input.insert("raise".into(), json!("boom"));
    service.run_script(&script, &input).await.unwrap_err();
    assert!(!temp.path().join("python_tmp1").exists());
    assert_eq!(service.working_dir(), Some(temp.path().join("python_tmp1")));
}

#[tokio::test]
async fn test_missing_script_is_remote_error() {
    let worker = FakeWorker::start().await.unwrap();
    let temp = TempDir::new().unwrap();
    let service = attach(&worker, &temp).await;

    let err = service
        .run_script(temp.path().join("missing.py"), &Map::new())
        .await
        .unwrap_err();

    match err {
        ServiceError::RemoteCall { method, .. } => assert_eq!(method, "runScript"),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_add_handlers_then_request() {
    let worker = FakeWorker::start().await.unwrap();
    let temp = TempDir::new().unwrap();
    let service = attach(&worker, &temp).await;

    service
        .add_handlers("def square(x):\n    return x * x\n", &["square"])
        .await
        .unwrap();
    let result = service.request("square", vec![json!(7)]).await.unwrap();

    assert_eq!(result, json!({"handler": "square", "args": [7]}));
}

#[tokio::test]
async fn test_unknown_method_is_remote_error() {
    let worker = FakeWorker::start().await.unwrap();
    let temp = TempDir::new().unwrap();
    let service = attach(&worker, &temp).await;

    let err = service.request("noSuchMethod", Vec::<Value>::new()).await.unwrap_err();

    assert!(err.remote_exception().is_some());
}

#[tokio::test]
async fn test_attach_to_closed_port_times_out() {
    let temp = TempDir::new().unwrap();
    let port = closed_port();
    let options = ServiceOptions {
        connect_timeout_ms: 300,
        ..options(&temp)
    };

    let started = std::time::Instant::now();
    let err = WorkerService::attach_with(Endpoint::local(port), &options, &JsonRpcConnector::new())
        .await
        .unwrap_err();

    assert!(started.elapsed() >= std::time::Duration::from_millis(300));
    match err {
        ServiceError::ConnectTimeout { port: p, timeout_ms } => {
            assert_eq!(p, port);
            assert_eq!(timeout_ms, 300);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_worker_going_away_surfaces_transport_error() {
    let worker = FakeWorker::start().await.unwrap();
    let temp = TempDir::new().unwrap();
    let service = attach(&worker, &temp).await;
    let script = script(&temp, "late.py");

    worker.shutdown().await;
    let err = service.run_script(&script, &Map::new()).await.unwrap_err();

    assert!(matches!(
        err,
        ServiceError::RemoteCall {
            source: pyserve::RemoteCallError::Transport(_),
            ..
        }
    ));
}
