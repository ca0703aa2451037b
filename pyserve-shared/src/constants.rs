//! Shared constants between host and worker
//!
//! These constants must be identical on both sides of the remote-call boundary.

/// Remote-call method names exposed by the worker script.
pub mod methods {
    /// Liveness probe; returns `true` once the worker can accept calls.
    pub const IS_ACTIVE: &str = "isActive";

    /// Runs a script file with an input mapping and returns a result mapping.
    pub const RUN_SCRIPT: &str = "runScript";

    /// Execs handler source in the worker and registers the named functions.
    pub const ADD_HANDLERS: &str = "addHandlers";

    /// Placeholder argument passed to the liveness probe.
    pub const LIVENESS_PLACEHOLDER: &str = "unused";
}

/// Network constants
pub mod network {
    /// Baseline for free-port scanning and the default debug port.
    pub const DEFAULT_PORT: u16 = 8613;

    /// Number of ports probed upward from the baseline before giving up.
    pub const PORT_SCAN_WINDOW: u16 = 1000;

    /// Loopback host the worker binds its server to.
    pub const LOCALHOST: &str = "127.0.0.1";
}

/// Connection establishment timings
pub mod timing {
    /// Default upper bound for the liveness polling loop.
    pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5000;

    /// Fixed sleep between two liveness attempts.
    pub const POLL_INTERVAL_MS: u64 = 100;

    /// How long stopping a worker waits for its output pipes to close.
    pub const OUTPUT_DRAIN_MS: u64 = 500;
}

/// Worker launch contract
pub mod worker {
    /// Bootstrap script expected in the scripts home directory.
    pub const SERVICE_SCRIPT: &str = "python_service_runscript.py";

    /// Interpreter flag forcing unbuffered stdout/stderr.
    pub const UNBUFFERED_FLAG: &str = "-u";

    /// Debug flag value for normal (non-debug) launches.
    pub const NO_DEBUG: i32 = -1;

    /// Module search path variable of the interpreter.
    pub const SEARCH_PATH_ENV: &str = "PYTHONPATH";

    /// Modules of the RPC bridge itself; their frames are hidden from
    /// formatted tracebacks.
    pub const BRIDGE_MODULES: &[&str] = &["rpc.py", "pyrpc.py", "pyflatten.py", "pywrapper.py"];
}

/// Scratch directory naming
pub mod scratch {
    /// Prefix of per-call working directories (`python_tmp1`, `python_tmp2`, ...).
    pub const DIR_PREFIX: &str = "python_tmp";

    /// Name of the file used by the write probe.
    pub const TOUCH_FILE: &str = "touch";

    /// Fallback root, relative to the user's home directory.
    pub const FALLBACK_DIR: &str = ".pyserve";
}

/// Environment variables recognised by `ServiceOptions::from_env`.
pub mod envs {
    pub const DEBUG_PORT: &str = "PYSERVE_DEBUG_PORT";
    pub const FREE_PORT: &str = "PYSERVE_FREE_PORT";
    pub const TIMEOUT_MS: &str = "PYSERVE_TIMEOUT_MS";
    pub const SCRIPTS_HOME: &str = "PYSERVE_SCRIPTS_HOME";
    pub const SCRATCH_HOME: &str = "PYSERVE_SCRATCH_HOME";
}
