//! Subprocess spawning for the worker interpreter.

use std::collections::HashMap;
use std::process::{Child, Command, Stdio};

use pyserve_shared::errors::{ServiceError, ServiceResult};

/// Spawns the worker with piped stdout and stderr for controlled logging.
///
/// The child inherits the host environment, overlaid with `env`. On Unix it
/// leads a new process group, so anything the script starts in the
/// background can be killed together with the interpreter.
///
/// # Arguments
/// * `program` - Interpreter command (`python3`, a full path, ...)
/// * `args` - Arguments after the program name
/// * `env` - Variables to set or override in the child
pub(super) fn spawn_subprocess(
    program: &str,
    args: &[String],
    env: &HashMap<String, String>,
) -> ServiceResult<Child> {
    let mut cmd = Command::new(program);
    cmd.args(args).envs(env);

    // Stdin is unused by the worker; keep it away from the host's terminal
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    cmd.spawn().map_err(|source| ServiceError::ProcessSpawn {
        command: command_line(program, args),
        source,
    })
}

/// Human-readable command line for logs and errors.
pub(super) fn command_line(program: &str, args: &[String]) -> String {
    std::iter::once(program)
        .chain(args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ")
}
