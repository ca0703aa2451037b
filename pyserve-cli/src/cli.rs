use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use pyserve::{Endpoint, JsonRpcConnector, ServiceOptions, WorkerService};

use crate::commands::{call::CallArgs, port::PortArgs, run::RunArgs};

#[derive(Parser, Debug)]
#[command(
    name = "pyserve",
    version,
    about = "Run Python scripts in a supervised worker process"
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalFlags,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a script in the worker and print its result
    Run(RunArgs),
    /// Start (or attach to) a worker and report the port it is ready on
    Ping,
    /// Print the next free port
    Port(PortArgs),
    /// Call a worker method directly
    Call(CallArgs),
}

#[derive(Args, Debug, Clone)]
pub struct GlobalFlags {
    /// Python interpreter used to launch the worker
    #[arg(long, global = true, env = "PYSERVE_PYTHON", default_value = "python3")]
    pub python: String,

    /// Directory containing the worker entry script
    #[arg(long, global = true, env = "PYSERVE_SCRIPTS_HOME")]
    pub scripts_home: Option<PathBuf>,

    /// Attach to a worker already listening on PORT or HOST:PORT instead of launching one
    #[arg(long, global = true, value_name = "ENDPOINT", conflicts_with = "debug")]
    pub attach: Option<Endpoint>,

    /// Attach to a worker started under a debugger on the debug port
    #[arg(long, global = true)]
    pub debug: bool,

    /// Port of the debug worker
    #[arg(long, global = true, env = "PYSERVE_DEBUG_PORT")]
    pub debug_port: Option<u16>,

    /// Milliseconds to wait for the worker to become ready
    #[arg(long, global = true, env = "PYSERVE_TIMEOUT_MS")]
    pub timeout_ms: Option<u64>,

    /// First port tried when launching a worker
    #[arg(long, global = true, env = "PYSERVE_FREE_PORT")]
    pub free_port: Option<u16>,

    /// Root for scratch directories when the script directory is not writable
    #[arg(long, global = true, env = "PYSERVE_SCRATCH_HOME")]
    pub scratch_home: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Write logs to a daily rolling file in DIR instead of stderr
    #[arg(long, global = true, value_name = "DIR", env = "PYSERVE_LOG_DIR")]
    pub log_dir: Option<PathBuf>,
}

impl GlobalFlags {
    /// Service options from the environment, overridden by flags.
    ///
    /// The CLI owns the process, so a Ctrl-C also kills the worker.
    pub fn options(&self) -> anyhow::Result<ServiceOptions> {
        let mut options = ServiceOptions::from_env()?;
        options.install_signal_handlers = true;
        if let Some(home) = &self.scripts_home {
            options.scripts_home = Some(home.clone());
        }
        if let Some(home) = &self.scratch_home {
            options.scratch_home = Some(home.clone());
        }
        if let Some(port) = self.debug_port {
            options.debug_port = port;
        }
        if let Some(port) = self.free_port {
            options.free_start_port = port;
        }
        if let Some(timeout) = self.timeout_ms {
            options.connect_timeout_ms = timeout;
        }
        Ok(options)
    }

    /// Launch a worker, or attach to one with `--attach`/`--debug`.
    pub async fn create_service(&self) -> anyhow::Result<WorkerService> {
        let options = self.options()?;
        let connector = JsonRpcConnector::new();

        let service = if let Some(endpoint) = &self.attach {
            WorkerService::attach_with(endpoint.clone(), &options, &connector).await?
        } else if self.debug {
            WorkerService::attach_debug_with(&options, &connector).await?
        } else {
            WorkerService::launch_with(&self.python, &options, &connector).await?
        };

        Ok(service)
    }
}
