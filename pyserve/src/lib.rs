//! pyserve - supervise a Python worker process and call into it over RPC.
//!
//! A [`WorkerService`] owns exactly one worker: it finds a free port, spawns
//! the interpreter with the worker bootstrap script, polls the worker's
//! liveness method until it answers, and then forwards `runScript` calls
//! with a freshly staged scratch directory per call. Stopping (explicitly,
//! on drop, or from the process-wide shutdown hooks) kills the worker.
//!
//! ```no_run
//! use pyserve::WorkerService;
//! use serde_json::{Map, json};
//!
//! # async fn demo() -> pyserve::ServiceResult<()> {
//! let service = WorkerService::launch("python3").await?;
//! let mut input = Map::new();
//! input.insert("x".into(), json!(1));
//! let output = service.run_script("/data/scripts/double.py", &input).await?;
//! println!("{:?}", output);
//! service.stop();
//! # Ok(())
//! # }
//! ```

pub mod controller;
pub mod net;
pub mod options;
pub mod portal;
pub mod service;
pub mod shutdown;
pub mod staging;
pub mod util;

pub use controller::WorkerProcess;
pub use options::ServiceOptions;
pub use portal::{JsonRpcConnector, RpcClient, RpcConnector};
pub use service::WorkerService;
pub use staging::{DirectoryStager, ScratchDir};

pub use pyserve_shared::{
    Endpoint, RemoteCallError, RemoteException, ServiceError, ServiceResult, TraceFrame,
};
