//! WorkerService - the host-facing handle to one worker.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use pyserve_shared::constants::{methods, worker};
use pyserve_shared::{
    Endpoint, RemoteCallError, RemoteException, ServiceError, ServiceResult,
};
use serde_json::{Map, Value};

use crate::controller::WorkerProcess;
use crate::net::find_free_port;
use crate::options::ServiceOptions;
use crate::portal::{ConnectOptions, JsonRpcConnector, RpcClient, RpcConnector, establish};
use crate::shutdown;
use crate::staging::DirectoryStager;
use crate::util::extend_search_path;

/// A connected worker, spawned by this handle or attached to.
///
/// The handle exclusively owns its remote-call client. When it spawned the
/// worker it also owns the process, which is killed by [`stop`] or when the
/// handle is dropped. An attached handle owns no process and always reports
/// itself running.
///
/// Calls are not serialized: concurrent `run_script` calls each get their
/// own scratch directory, and racing one against `stop` is the caller's
/// business.
///
/// [`stop`]: WorkerService::stop
pub struct WorkerService {
    endpoint: Endpoint,
    process: Option<WorkerProcess>,
    client: Box<dyn RpcClient>,
    stager: DirectoryStager,
    working_dir: Mutex<Option<PathBuf>>,
}

impl WorkerService {
    /// Spawn a worker with `interpreter` using options from the environment.
    pub async fn launch(interpreter: &str) -> ServiceResult<Self> {
        let options = ServiceOptions::from_env()?;
        Self::launch_with(interpreter, &options, &JsonRpcConnector::new()).await
    }

    /// Spawn a worker and wait until it answers its liveness method.
    ///
    /// The worker runs `<interpreter> -u <scripts_home>/python_service_runscript.py <port> -1`
    /// with `scripts_home` appended to its `PYTHONPATH`. If it never becomes
    /// ready the process is killed before the error is returned.
    pub async fn launch_with(
        interpreter: &str,
        options: &ServiceOptions,
        connector: &dyn RpcConnector,
    ) -> ServiceResult<Self> {
        let scripts_home = options.require_scripts_home()?;

        if options.install_signal_handlers
            && let Err(e) = shutdown::install_signal_handlers()
        {
            tracing::warn!("Failed to install signal handlers, relying on exit hooks: {}", e);
        }

        let port = find_free_port(options.free_start_port)?;
        let endpoint = Endpoint::local(port);

        let entry_script = scripts_home.join(worker::SERVICE_SCRIPT);
        let args = vec![
            worker::UNBUFFERED_FLAG.to_string(),
            entry_script.display().to_string(),
            port.to_string(),
            worker::NO_DEBUG.to_string(),
        ];

        let existing = std::env::var(worker::SEARCH_PATH_ENV).ok();
        let mut env = HashMap::new();
        env.insert(
            worker::SEARCH_PATH_ENV.to_string(),
            extend_search_path(existing.as_deref(), scripts_home),
        );

        let process = WorkerProcess::launch(interpreter, &args, &env)?;

        let connect = ConnectOptions::with_timeout_ms(options.connect_timeout_ms);
        let client = match establish(connector, &endpoint, &connect, Some(&process)).await {
            Ok(client) => client,
            Err(e) => {
                process.stop();
                return Err(e);
            }
        };

        tracing::info!(port, pid = process.pid(), "Worker service started");

        Ok(Self {
            endpoint,
            process: Some(process),
            client,
            stager: DirectoryStager::new(options.scratch_root()),
            working_dir: Mutex::new(None),
        })
    }

    /// Attach to a worker already listening on `port`.
    pub async fn attach(port: u16) -> ServiceResult<Self> {
        let options = ServiceOptions::from_env()?;
        Self::attach_with(Endpoint::local(port), &options, &JsonRpcConnector::new()).await
    }

    /// Attach to a worker started under a debugger on the debug port.
    ///
    /// Uses the same connect timeout as any other attach.
    pub async fn attach_debug() -> ServiceResult<Self> {
        let options = ServiceOptions::from_env()?;
        Self::attach_debug_with(&options, &JsonRpcConnector::new()).await
    }

    /// Attach to `options.debug_port`.
    pub async fn attach_debug_with(
        options: &ServiceOptions,
        connector: &dyn RpcConnector,
    ) -> ServiceResult<Self> {
        tracing::info!(port = options.debug_port, "Attaching to debug worker");
        Self::attach_with(Endpoint::local(options.debug_port), options, connector).await
    }

    /// Attach to a worker at `endpoint`. No process is spawned or supervised.
    pub async fn attach_with(
        endpoint: Endpoint,
        options: &ServiceOptions,
        connector: &dyn RpcConnector,
    ) -> ServiceResult<Self> {
        let connect = ConnectOptions::with_timeout_ms(options.connect_timeout_ms);
        let client = establish(connector, &endpoint, &connect, None).await?;

        tracing::info!(endpoint = %endpoint, "Attached to worker");

        Ok(Self {
            endpoint,
            process: None,
            client,
            stager: DirectoryStager::new(options.scratch_root()),
            working_dir: Mutex::new(None),
        })
    }

    /// Run `script_path` in the worker with `input` as its keyword data.
    ///
    /// A scratch directory is staged for the call and removed afterwards if
    /// the script left nothing in it, whether or not the call succeeded.
    pub async fn run_script(
        &self,
        script_path: impl AsRef<Path>,
        input: &Map<String, Value>,
    ) -> ServiceResult<Map<String, Value>> {
        let script_path = script_path.as_ref();
        let scratch = self.stager.stage(script_path);
        self.record_working_dir(scratch.path());

        tracing::debug!(
            script = %script_path.display(),
            scratch = %scratch.path().display(),
            "Running script"
        );

        let result = self
            .client
            .request(
                methods::RUN_SCRIPT,
                vec![
                    Value::String(script_path.display().to_string()),
                    Value::Object(input.clone()),
                ],
            )
            .await;

        scratch.cleanup();

        match result {
            Ok(Value::Object(output)) => Ok(output),
            Ok(other) => Err(ServiceError::remote(
                methods::RUN_SCRIPT,
                RemoteCallError::Malformed(format!("expected an object, got {}", json_kind(&other))),
            )),
            Err(e) => {
                tracing::debug!(script = %script_path.display(), "Script failed: {}", e);
                Err(ServiceError::remote(methods::RUN_SCRIPT, e))
            }
        }
    }

    /// Invoke any worker method directly.
    pub async fn request(&self, method: &str, args: Vec<Value>) -> ServiceResult<Value> {
        self.client
            .request(method, args)
            .await
            .map_err(|e| ServiceError::remote(method, e))
    }

    /// Install new handlers in the running worker.
    ///
    /// `code` is executed in the worker and must define every name in
    /// `names`; each becomes callable through [`WorkerService::request`].
    pub async fn add_handlers(&self, code: &str, names: &[&str]) -> ServiceResult<()> {
        let names = names.iter().map(|n| Value::from(*n)).collect::<Vec<_>>();
        self.request(methods::ADD_HANDLERS, vec![Value::from(code), Value::Array(names)])
            .await?;
        Ok(())
    }

    /// Stop the worker if this handle spawned it. Idempotent.
    pub fn stop(&self) {
        if let Some(process) = &self.process {
            process.stop();
            tracing::info!(port = self.endpoint.port, "Worker service stopped");
        }
    }

    /// Whether the worker process is alive; always true when attached.
    pub fn is_running(&self) -> bool {
        self.process.as_ref().is_none_or(WorkerProcess::is_running)
    }

    pub fn port(&self) -> u16 {
        self.endpoint.port
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Pid of the spawned worker; `None` when attached.
    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().map(WorkerProcess::pid)
    }

    /// Scratch directory of the current (or most recent) script call.
    pub fn working_dir(&self) -> Option<PathBuf> {
        self.working_dir.lock().clone()
    }

    /// Render a worker exception as a Python traceback attributed to the
    /// worker entry script, without the RPC bridge frames.
    pub fn format_exception(exception: &RemoteException) -> String {
        format_exception(exception)
    }

    fn record_working_dir(&self, dir: &Path) {
        if let Some(process) = &self.process {
            process.set_working_dir(dir);
        }
        *self.working_dir.lock() = Some(dir.to_path_buf());
    }
}

impl std::fmt::Debug for WorkerService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerService")
            .field("endpoint", &self.endpoint)
            .field("process", &self.process)
            .finish_non_exhaustive()
    }
}

/// See [`WorkerService::format_exception`].
pub fn format_exception(exception: &RemoteException) -> String {
    exception.python_formatted_traceback(worker::SERVICE_SCRIPT)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// Compile-time assertion that handles can be shared across tasks
const _: () = {
    const fn assert_send_sync<T: Send + Sync>() {}
    let _ = assert_send_sync::<WorkerService>;
};
