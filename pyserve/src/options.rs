//! Configuration for a worker service.

use std::path::PathBuf;
use std::str::FromStr;

use pyserve_shared::constants::{envs, network, timing};
use pyserve_shared::errors::{ServiceError, ServiceResult};
use serde::{Deserialize, Serialize};

use crate::staging::default_fallback_root;

/// Options used when launching or attaching to a worker.
///
/// Create it with defaults and modify fields as needed, or start from
/// [`ServiceOptions::from_env`] to pick up the `PYSERVE_*` variables.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServiceOptions {
    /// Port of an externally started worker, used by `attach_debug`.
    #[serde(default = "default_port")]
    pub debug_port: u16,

    /// First port tried when allocating a port for a launched worker.
    #[serde(default = "default_port")]
    pub free_start_port: u16,

    /// Budget for the worker to answer its liveness method.
    ///
    /// Applies to launch and attach alike, including debug attach.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Directory holding the worker entry script and its bridge modules.
    ///
    /// Required for launch; also appended to the worker's module search path.
    #[serde(default)]
    pub scripts_home: Option<PathBuf>,

    /// Root for scratch directories when the script's own directory is not
    /// writable. Defaults to `~/.pyserve`.
    #[serde(default)]
    pub scratch_home: Option<PathBuf>,

    /// Kill workers on SIGINT/SIGTERM/SIGHUP, then let the signal take its
    /// default action. Off by default: a host with its own signal handling
    /// calls [`crate::shutdown::run_hooks`] from its shutdown path instead.
    #[serde(default)]
    pub install_signal_handlers: bool,
}

fn default_port() -> u16 {
    network::DEFAULT_PORT
}

fn default_connect_timeout_ms() -> u64 {
    timing::DEFAULT_CONNECT_TIMEOUT_MS
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            debug_port: default_port(),
            free_start_port: default_port(),
            connect_timeout_ms: default_connect_timeout_ms(),
            scripts_home: None,
            scratch_home: None,
            install_signal_handlers: false,
        }
    }
}

impl ServiceOptions {
    /// Defaults overlaid with the `PYSERVE_*` environment variables.
    pub fn from_env() -> ServiceResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with values from `lookup`, keyed by variable name.
    ///
    /// Empty values are treated as unset. Unparsable values are a
    /// `Config` error naming the variable.
    pub fn from_lookup<F>(lookup: F) -> ServiceResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut options = Self::default();

        if let Some(value) = get(envs::DEBUG_PORT) {
            options.debug_port = parse_var(envs::DEBUG_PORT, &value)?;
        }
        if let Some(value) = get(envs::FREE_PORT) {
            options.free_start_port = parse_var(envs::FREE_PORT, &value)?;
        }
        if let Some(value) = get(envs::TIMEOUT_MS) {
            options.connect_timeout_ms = parse_var(envs::TIMEOUT_MS, &value)?;
        }
        if let Some(value) = get(envs::SCRIPTS_HOME) {
            options.scripts_home = Some(PathBuf::from(value));
        }
        if let Some(value) = get(envs::SCRATCH_HOME) {
            options.scratch_home = Some(PathBuf::from(value));
        }

        Ok(options)
    }

    /// The scripts home, or a `Config` error when it is not set.
    pub fn require_scripts_home(&self) -> ServiceResult<&PathBuf> {
        self.scripts_home.as_ref().ok_or_else(|| {
            ServiceError::Config(format!(
                "scripts home is not set; configure scripts_home or {}",
                envs::SCRIPTS_HOME
            ))
        })
    }

    /// Fallback root for scratch directories.
    pub fn scratch_root(&self) -> PathBuf {
        self.scratch_home.clone().unwrap_or_else(default_fallback_root)
    }
}

fn parse_var<T>(key: &str, value: &str) -> ServiceResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| ServiceError::Config(format!("invalid {}='{}': {}", key, value, e)))
}
