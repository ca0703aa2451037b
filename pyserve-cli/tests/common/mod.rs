#![allow(dead_code)]

use assert_cmd::Command;
use pyserve_test_utils::FakeWorker;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

const PYSERVE_VARS: &[&str] = &[
    "PYSERVE_PYTHON",
    "PYSERVE_SCRIPTS_HOME",
    "PYSERVE_DEBUG_PORT",
    "PYSERVE_TIMEOUT_MS",
    "PYSERVE_FREE_PORT",
    "PYSERVE_SCRATCH_HOME",
    "PYSERVE_LOG_DIR",
];

/// A fake worker served from a background runtime, plus a scratch area.
pub struct TestContext {
    pub worker: FakeWorker,
    pub temp: TempDir,
    // Keep the runtime alive so the worker keeps serving
    _runtime: tokio::runtime::Runtime,
}

impl TestContext {
    /// `pyserve` attached to the fake worker.
    pub fn attached_cmd(&self) -> Command {
        let mut cmd = pyserve();
        cmd.arg("--attach").arg(self.worker.port().to_string());
        cmd.arg("--scratch-home").arg(self.temp.path().join("fallback"));
        cmd
    }

    /// Write a script into the scratch area.
    pub fn script(&self, name: &str) -> PathBuf {
        let path = self.temp.path().join(name);
        std::fs::write(&path, "def run(**kw):\n    return kw\n").expect("Failed to write script");
        path
    }
}

pub fn context() -> TestContext {
    let runtime = tokio::runtime::Runtime::new().expect("Failed to build runtime");
    let worker = runtime
        .block_on(FakeWorker::start())
        .expect("Failed to start fake worker");
    let temp = TempDir::new().expect("Failed to create temp dir");

    TestContext {
        worker,
        temp,
        _runtime: runtime,
    }
}

/// `pyserve` with a clean `PYSERVE_*` environment.
pub fn pyserve() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_pyserve"));
    cmd.timeout(Duration::from_secs(30));
    for var in PYSERVE_VARS {
        cmd.env_remove(var);
    }
    cmd
}
