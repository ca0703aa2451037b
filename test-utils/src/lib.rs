//! Test fixtures for pyserve.
//!
//! [`FakeWorker`] serves the worker's JSON-RPC protocol in-process, so the
//! host side can be exercised without a Python interpreter. The
//! `fake-worker` binary wraps the same server behind the interpreter's
//! command line (`[-u] <script> <port> <debug>`) for end-to-end launches.

use std::collections::HashSet;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use axum::{Json, Router, body::Bytes, extract::State, routing::post};
use parking_lot::Mutex;
use pyserve_shared::constants::{methods, worker};
use pyserve_shared::protocol::{METHOD_NOT_FOUND, RpcErrorObject, RpcRequest, RpcResponse};
use pyserve_shared::{RemoteException, TraceFrame};
use serde_json::{Map, Value, json};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// JSON-RPC parse error code.
const PARSE_ERROR: i64 = -32700;

/// Observable state of a fake worker.
#[derive(Debug, Default)]
pub struct WorkerState {
    not_ready_for: u32,
    liveness_calls: AtomicU32,
    handlers: Mutex<HashSet<String>>,
    calls: Mutex<Vec<String>>,
}

impl WorkerState {
    /// Number of liveness probes answered so far.
    pub fn liveness_calls(&self) -> u32 {
        self.liveness_calls.load(Ordering::SeqCst)
    }

    /// Methods called so far, liveness probes excluded.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn handle(&self, request: RpcRequest) -> RpcResponse {
        let id = request.id;
        let outcome = match request.method.as_str() {
            methods::IS_ACTIVE => {
                let seen = self.liveness_calls.fetch_add(1, Ordering::SeqCst);
                Ok(Value::Bool(seen >= self.not_ready_for))
            }
            method => {
                self.calls.lock().push(method.to_string());
                self.dispatch(method, request.params)
            }
        };

        match outcome {
            Ok(result) => RpcResponse::success(id, result),
            Err(error) => RpcResponse::failure(Some(id), error),
        }
    }

    fn dispatch(&self, method: &str, params: Vec<Value>) -> Result<Value, RpcErrorObject> {
        match method {
            methods::RUN_SCRIPT => run_script(&params),
            methods::ADD_HANDLERS => {
                let names = params
                    .get(1)
                    .and_then(Value::as_array)
                    .map(|names| names.iter().filter_map(Value::as_str).map(str::to_string))
                    .into_iter()
                    .flatten();
                self.handlers.lock().extend(names);
                Ok(Value::Null)
            }
            other if self.handlers.lock().contains(other) => Ok(json!({
                "handler": other,
                "args": params,
            })),
            other => Err(RpcErrorObject {
                code: METHOD_NOT_FOUND,
                message: format!("method \"{}\" is not supported", other),
                data: None,
            }),
        }
    }
}

/// `runScript(path, input)`: echoes `input` plus what the script would see.
///
/// The script must exist. An input key `raise` makes the call fail with a
/// `ValueError` carrying that message and a bridge-plus-user traceback.
fn run_script(params: &[Value]) -> Result<Value, RpcErrorObject> {
    let script = params.first().and_then(Value::as_str).unwrap_or_default();
    let input = params
        .get(1)
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    let entry_frame = TraceFrame {
        file: worker::SERVICE_SCRIPT.to_string(),
        line: 42,
        function: methods::RUN_SCRIPT.to_string(),
        text: Some("result = run_script(script_path, input_data)".to_string()),
    };

    if !Path::new(script).is_file() {
        let exception = RemoteException::new(
            "FileNotFoundError",
            format!("[Errno 2] No such file or directory: '{}'", script),
        )
        .with_frame(entry_frame);
        return Err(RpcErrorObject::from_exception(&exception));
    }

    if let Some(message) = input.get("raise").and_then(Value::as_str) {
        let exception = RemoteException::new("ValueError", message)
            .with_frame(entry_frame)
            .with_frame(TraceFrame {
                file: "pyrpc.py".to_string(),
                line: 88,
                function: "_dispatch".to_string(),
                text: None,
            })
            .with_frame(TraceFrame {
                file: script.to_string(),
                line: 1,
                function: "run".to_string(),
                text: Some(format!("raise ValueError({:?})", message)),
            });
        return Err(RpcErrorObject::from_exception(&exception));
    }

    let mut output: Map<String, Value> = input;
    output.insert("script".into(), Value::from(script));
    if let Ok(cwd) = std::env::current_dir() {
        output.insert("cwd".into(), Value::from(cwd.display().to_string()));
    }
    if let Ok(search_path) = std::env::var(worker::SEARCH_PATH_ENV) {
        output.insert("search_path".into(), Value::from(search_path));
    }
    Ok(Value::Object(output))
}

async fn rpc(State(state): State<Arc<WorkerState>>, body: Bytes) -> Json<RpcResponse> {
    let response = match serde_json::from_slice::<RpcRequest>(&body) {
        Ok(request) => state.handle(request),
        Err(e) => RpcResponse::failure(
            None,
            RpcErrorObject {
                code: PARSE_ERROR,
                message: format!("parse error: {}", e),
                data: None,
            },
        ),
    };
    Json(response)
}

fn router(state: Arc<WorkerState>) -> Router {
    Router::new().route("/", post(rpc)).with_state(state)
}

/// Configures a [`FakeWorker`].
#[derive(Debug, Default)]
pub struct FakeWorkerBuilder {
    not_ready_for: u32,
}

impl FakeWorkerBuilder {
    /// Answer the first `n` liveness probes with `false`.
    pub fn not_ready_for(mut self, n: u32) -> Self {
        self.not_ready_for = n;
        self
    }

    fn state(self) -> Arc<WorkerState> {
        Arc::new(WorkerState {
            not_ready_for: self.not_ready_for,
            ..WorkerState::default()
        })
    }

    /// Serve on an ephemeral loopback port in a background task.
    pub async fn start(self) -> std::io::Result<FakeWorker> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await?;
        let port = listener.local_addr()?.port();
        let state = self.state();
        let (tx, rx) = oneshot::channel::<()>();

        let app = router(Arc::clone(&state));
        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = rx.await;
                })
                .await;
        });

        Ok(FakeWorker {
            port,
            state,
            shutdown: Some(tx),
            task: Some(task),
        })
    }

    /// Serve on `port` until the process is killed.
    pub async fn serve_forever(self, port: u16) -> std::io::Result<()> {
        let listener = TcpListener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, port))).await?;
        axum::serve(listener, router(self.state())).await
    }
}

/// In-process worker server on an ephemeral loopback port.
pub struct FakeWorker {
    port: u16,
    state: Arc<WorkerState>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl FakeWorker {
    pub fn builder() -> FakeWorkerBuilder {
        FakeWorkerBuilder::default()
    }

    /// Start a worker that is ready immediately.
    pub async fn start() -> std::io::Result<Self> {
        Self::builder().start().await
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn state(&self) -> &WorkerState {
        &self.state
    }

    /// Stop serving and wait for the server task to finish.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for FakeWorker {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// A loopback port that was free a moment ago and is not listened on.
pub fn closed_port() -> u16 {
    std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
        .and_then(|l| l.local_addr())
        .map(|addr| addr.port())
        .unwrap_or(1)
}

/// A scripts home containing an (empty) worker entry script, as launch
/// expects to find it.
pub fn scripts_home() -> std::io::Result<tempfile::TempDir> {
    let dir = tempfile::TempDir::new()?;
    std::fs::write(dir.path().join(worker::SERVICE_SCRIPT), "# fake worker entry\n")?;
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(method: &str, params: Vec<Value>) -> RpcRequest {
        RpcRequest::new(1, method, params)
    }

    #[test]
    fn test_not_ready_then_ready() {
        let state = FakeWorker::builder().not_ready_for(2).state();

        let answers: Vec<Value> = (0..3)
            .map(|_| {
                state
                    .handle(request("isActive", vec![json!("unused")]))
                    .result
                    .unwrap()
            })
            .collect();

        assert_eq!(answers, vec![json!(false), json!(false), json!(true)]);
        assert_eq!(state.liveness_calls(), 3);
    }

    #[test]
    fn test_missing_script_is_file_not_found() {
        let state = FakeWorker::builder().state();

        let resp = state.handle(request("runScript", vec![json!("/no/such/script.py"), json!({})]));

        let exception = resp.error.unwrap().into_exception();
        assert_eq!(exception.kind, "FileNotFoundError");
    }

    #[test]
    fn test_added_handler_becomes_callable() {
        let state = FakeWorker::builder().state();

        state.handle(request("addHandlers", vec![json!("def ping(): pass"), json!(["ping"])]));
        let resp = state.handle(request("ping", vec![json!(1)]));

        assert_eq!(resp.result.unwrap(), json!({"handler": "ping", "args": [1]}));
        assert_eq!(state.calls(), vec!["addHandlers".to_string(), "ping".to_string()]);
    }

    #[test]
    fn test_unknown_method() {
        let state = FakeWorker::builder().state();
        let resp = state.handle(request("nope", vec![]));
        assert_eq!(resp.error.unwrap().code, METHOD_NOT_FOUND);
    }
}
