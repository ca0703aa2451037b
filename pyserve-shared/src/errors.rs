//! Error types shared by the host library and the worker side.
//!
//! Errors are categorized by what the caller can do about them:
//! - [`ServiceError`]: every failure surfaced by the service API
//! - [`RemoteCallError`]: failures of a single remote call (transport,
//!   worker-side exception, malformed response)
//! - [`RemoteException`]: the structured exception a worker reports

use std::fmt;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::worker::BRIDGE_MODULES;

/// Result type for service operations.
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Errors that can occur while supervising or calling the worker.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Port scan exhausted without finding a bindable port.
    #[error("no free port available in {start}..={end}")]
    NoPortAvailable { start: u16, end: u16 },

    /// The OS refused to spawn the worker process.
    #[error("failed to spawn worker `{command}`: {source}")]
    ProcessSpawn {
        command: String,
        #[source]
        source: io::Error,
    },

    /// The supervised process exited before the connection was established.
    #[error("the remote worker process is not running{}", fmt_status(.status))]
    WorkerNotRunning { status: Option<i32> },

    /// Liveness was never confirmed within the configured window.
    #[error(
        "RPC connect to worker on port {port} timed out after {timeout_ms}ms, is the worker server running?"
    )]
    ConnectTimeout { port: u16, timeout_ms: u64 },

    /// A remote call failed.
    #[error("remote call `{method}` failed: {source}")]
    RemoteCall {
        method: String,
        #[source]
        source: RemoteCallError,
    },

    /// Invalid or missing configuration.
    #[error("config: {0}")]
    Config(String),

    /// Filesystem failure.
    #[error("storage: {0}")]
    Storage(String),

    /// Unexpected internal state.
    #[error("internal: {0}")]
    Internal(String),
}

fn fmt_status(status: &Option<i32>) -> String {
    match status {
        Some(code) => format!(" (exit code {})", code),
        None => String::new(),
    }
}

impl ServiceError {
    /// Wraps a remote-call failure with the method it came from.
    pub fn remote(method: impl Into<String>, source: RemoteCallError) -> Self {
        Self::RemoteCall {
            method: method.into(),
            source,
        }
    }

    /// Returns the worker-side exception, if this error carries one.
    pub fn remote_exception(&self) -> Option<&RemoteException> {
        match self {
            Self::RemoteCall {
                source: RemoteCallError::Remote(exception),
                ..
            } => Some(exception),
            _ => None,
        }
    }
}

/// Failure of a single remote call.
#[derive(Debug, Clone, Error)]
pub enum RemoteCallError {
    /// Connection refused, HTTP failure, timeout.
    #[error("transport: {0}")]
    Transport(String),

    /// The worker raised an exception while handling the call.
    #[error("{0}")]
    Remote(RemoteException),

    /// The response did not have the expected shape.
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// One frame of a worker-side traceback, outermost first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceFrame {
    pub file: String,
    pub line: u32,
    pub function: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl TraceFrame {
    fn file_name(&self) -> &str {
        Path::new(&self.file)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&self.file)
    }

    fn is_bridge_frame(&self, entry_script: &str) -> bool {
        let name = self.file_name();
        name == entry_script || BRIDGE_MODULES.contains(&name)
    }
}

/// Exception reported by the worker, as carried in the error `data` of a
/// remote-call response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteException {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    #[serde(default)]
    pub traceback: Vec<TraceFrame>,
}

impl RemoteException {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            traceback: Vec::new(),
        }
    }

    pub fn with_frame(mut self, frame: TraceFrame) -> Self {
        self.traceback.push(frame);
        self
    }

    /// Formats the exception the way the interpreter prints it, limited to
    /// user code.
    ///
    /// Frames belonging to `entry_script` or the RPC bridge modules that
    /// precede the first user frame are dropped. When the traceback contains
    /// only bridge frames they are kept and attributed to `entry_script`.
    pub fn python_formatted_traceback(&self, entry_script: &str) -> String {
        let first_user = self
            .traceback
            .iter()
            .position(|f| !f.is_bridge_frame(entry_script));

        let frames: Vec<(String, &TraceFrame)> = match first_user {
            Some(idx) => self.traceback[idx..]
                .iter()
                .map(|f| (f.file.clone(), f))
                .collect(),
            None => self
                .traceback
                .iter()
                .map(|f| (entry_script.to_string(), f))
                .collect(),
        };

        let mut out = String::new();
        if !frames.is_empty() {
            out.push_str("Traceback (most recent call last):\n");
            for (file, frame) in frames {
                out.push_str(&format!(
                    "  File \"{}\", line {}, in {}\n",
                    file, frame.line, frame.function
                ));
                if let Some(text) = frame.text.as_deref().map(str::trim)
                    && !text.is_empty()
                {
                    out.push_str(&format!("    {}\n", text));
                }
            }
        }
        out.push_str(&format!("{}: {}", self.kind, self.message));
        out
    }
}

impl fmt::Display for RemoteException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}
