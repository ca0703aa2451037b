//! WorkerProcess - owns one spawned interpreter and guarantees its termination.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    process::{Child, ExitStatus},
    sync::Arc,
    time::Duration,
};

use parking_lot::Mutex;
use pyserve_shared::constants::timing::OUTPUT_DRAIN_MS;
use pyserve_shared::errors::{ServiceError, ServiceResult};

use super::{
    log_stream::OutputForwarder,
    spawn::{command_line, spawn_subprocess},
};
use crate::shutdown::{self, HookId};

/// Child handle plus the exit status once it has been observed.
///
/// Shared between the [`WorkerProcess`] and its shutdown hook so either side
/// can terminate the child, and the other then sees nothing left to kill.
struct ChildSlot {
    child: Option<Child>,
    status: Option<ExitStatus>,
}

impl ChildSlot {
    /// Poll the child, reaping it if it has exited.
    fn is_running(&mut self) -> bool {
        let Some(child) = self.child.as_mut() else {
            return false;
        };
        match child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                self.status = Some(status);
                self.child = None;
                false
            }
            Err(e) => {
                tracing::warn!(pid = child.id(), "Failed to poll worker process: {}", e);
                false
            }
        }
    }

    /// Kill the child's process group and reap the child, unless it has
    /// already exited.
    ///
    /// A child that cannot be polled is killed anyway. Returns `true` if
    /// this call killed it.
    fn terminate(&mut self) -> bool {
        let Some(child) = self.child.as_mut() else {
            return false;
        };
        match child.try_wait() {
            Ok(Some(status)) => {
                self.status = Some(status);
                self.child = None;
                return false;
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(pid = child.id(), "Failed to poll worker process, killing it: {}", e);
            }
        }
        let Some(mut child) = self.child.take() else {
            return false;
        };

        let pid = child.id();
        if let Err(e) = kill_group(&mut child) {
            tracing::warn!(pid, "Failed to kill worker process: {}", e);
        }
        match child.wait() {
            Ok(status) => self.status = Some(status),
            Err(e) => tracing::warn!(pid, "Failed to reap worker process: {}", e),
        }
        true
    }
}

/// SIGKILL the group the worker leads, taking its background children with
/// it. Only called on an unreaped child, so the group id is still ours.
#[cfg(unix)]
fn kill_group(child: &mut Child) -> std::io::Result<()> {
    let pgid = child.id() as libc::pid_t;
    // SAFETY: killpg only takes integer arguments.
    if unsafe { libc::killpg(pgid, libc::SIGKILL) } == 0 {
        return Ok(());
    }
    let e = std::io::Error::last_os_error();
    tracing::debug!(pid = pgid, "Failed to kill process group, killing worker only: {}", e);
    child.kill()
}

#[cfg(not(unix))]
fn kill_group(child: &mut Child) -> std::io::Result<()> {
    child.kill()
}

/// A running worker interpreter.
///
/// Output is forwarded to `tracing`, and a process-wide shutdown hook kills
/// the child if the host exits without dropping this handle. [`stop`]
/// (also run on drop) kills the child together with anything it started in
/// its process group, and removes that hook.
///
/// [`stop`]: WorkerProcess::stop
pub struct WorkerProcess {
    pid: u32,
    command: String,
    slot: Arc<Mutex<ChildSlot>>,
    output: Mutex<Option<OutputForwarder>>,
    hook: Mutex<Option<HookId>>,
    working_dir: Mutex<Option<PathBuf>>,
}

impl WorkerProcess {
    /// Spawn `program` with `args`, with `env` overlaid on the host environment.
    ///
    /// # Returns
    /// * `Ok(WorkerProcess)` - Child spawned, output streaming, hook registered
    /// * `Err(ServiceError::ProcessSpawn)` - The program could not be started
    pub fn launch(program: &str, args: &[String], env: &HashMap<String, String>) -> ServiceResult<Self> {
        let command = command_line(program, args);
        tracing::info!(command = %command, "Starting worker process");
        tracing::trace!(env = ?env, "Worker environment overrides");

        let mut child = spawn_subprocess(program, args, env)?;
        let pid = child.id();

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(ServiceError::Internal(
                "Failed to capture worker stdout/stderr (pipe not available)".into(),
            ));
        };

        let output = OutputForwarder::start(pid, stdout, stderr).inspect_err(|_| {
            let _ = child.kill();
            let _ = child.wait();
        })?;

        let slot = Arc::new(Mutex::new(ChildSlot {
            child: Some(child),
            status: None,
        }));

        let hook_slot = Arc::clone(&slot);
        let hook = shutdown::register(format!("kill worker {}", pid), move || {
            if hook_slot.lock().terminate() {
                tracing::info!(pid, "Worker process killed by shutdown hook");
            }
        });

        tracing::info!(pid, "Worker process spawned");

        Ok(Self {
            pid,
            command,
            slot,
            output: Mutex::new(Some(output)),
            hook: Mutex::new(Some(hook)),
            working_dir: Mutex::new(None),
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Whether the child is still alive. Reaps it if it has exited.
    pub fn is_running(&self) -> bool {
        self.slot.lock().is_running()
    }

    /// Exit status of the child once it has been observed to exit.
    pub fn exit_status(&self) -> Option<ExitStatus> {
        let mut slot = self.slot.lock();
        slot.is_running();
        slot.status
    }

    /// Exit code, `None` while running or after death by signal.
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_status().and_then(|s| s.code())
    }

    /// The scratch directory of the call in progress (or most recent call).
    pub fn working_dir(&self) -> Option<PathBuf> {
        self.working_dir.lock().clone()
    }

    pub fn set_working_dir(&self, dir: &Path) {
        *self.working_dir.lock() = Some(dir.to_path_buf());
    }

    /// Kill the child and release its resources. Idempotent.
    ///
    /// A child that already exited is reaped, not killed. Output still
    /// buffered in the pipes is forwarded for a short while, then the
    /// readers are left to finish alone. The shutdown hook is removed.
    pub fn stop(&self) {
        if self.slot.lock().terminate() {
            tracing::info!(pid = self.pid, "Worker process stopped");
        }

        if let Some(output) = self.output.lock().take() {
            output.finish(Duration::from_millis(OUTPUT_DRAIN_MS));
        }

        if let Some(hook) = self.hook.lock().take() {
            shutdown::deregister(hook);
        }
    }
}

impl Drop for WorkerProcess {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for WorkerProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerProcess")
            .field("pid", &self.pid)
            .field("command", &self.command)
            .finish_non_exhaustive()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Instant;

    use crate::shutdown::TEST_SERIAL;

    fn sleeper() -> WorkerProcess {
        WorkerProcess::launch("sleep", &["30".to_string()], &HashMap::new()).unwrap()
    }

    fn shell(script: &str) -> WorkerProcess {
        WorkerProcess::launch("sh", &["-c".to_string(), script.to_string()], &HashMap::new()).unwrap()
    }

    fn wait_until_exited(process: &WorkerProcess) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while process.is_running() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    /// Alive and not a zombie.
    #[cfg(target_os = "linux")]
    fn is_live(pid: i32) -> bool {
        match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            Ok(stat) => !stat
                .rsplit_once(") ")
                .is_some_and(|(_, rest)| rest.starts_with(['Z', 'X'])),
            Err(_) => false,
        }
    }

    #[test]
    fn test_launch_and_stop() {
        let _serial = TEST_SERIAL.lock();
        let process = sleeper();
        assert!(process.is_running());
        assert!(process.pid() > 0);

        process.stop();
        assert!(!process.is_running());
        assert!(process.exit_status().is_some());
        assert_eq!(process.exit_code(), None);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let _serial = TEST_SERIAL.lock();
        let process = sleeper();

        process.stop();
        process.stop();

        assert!(!process.is_running());
        assert!(process.hook.lock().is_none());
    }

    #[test]
    fn test_stop_deregisters_hook() {
        let _serial = TEST_SERIAL.lock();
        let before = shutdown::registered();

        let process = sleeper();
        assert_eq!(shutdown::registered(), before + 1);

        process.stop();
        assert_eq!(shutdown::registered(), before);
    }

    #[test]
    fn test_run_hooks_kills_worker() {
        let _serial = TEST_SERIAL.lock();
        let process = sleeper();

        shutdown::run_hooks();

        assert!(!process.is_running());
        let status = process.exit_status();
        assert!(status.is_some());

        // The hook already ran; stop has nothing left to kill or deregister
        process.stop();
        assert_eq!(process.exit_status(), status);
        assert!(process.hook.lock().is_none());
    }

    #[test]
    fn test_stop_with_background_child_returns_promptly() {
        let _serial = TEST_SERIAL.lock();
        let temp = tempfile::TempDir::new().unwrap();
        let pid_file = temp.path().join("bg.pid");
        let process = shell(&format!("sleep 30 & echo $! > '{}'; sleep 30", pid_file.display()));

        let deadline = Instant::now() + Duration::from_secs(5);
        let bg_pid = loop {
            if let Some(pid) = std::fs::read_to_string(&pid_file)
                .ok()
                .and_then(|s| s.trim().parse::<i32>().ok())
            {
                break pid;
            }
            assert!(Instant::now() < deadline, "background pid never written");
            std::thread::sleep(Duration::from_millis(10));
        };

        let started = Instant::now();
        process.stop();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(!process.is_running());

        #[cfg(target_os = "linux")]
        {
            let deadline = Instant::now() + Duration::from_secs(2);
            while is_live(bg_pid) && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(10));
            }
            assert!(!is_live(bg_pid));
        }
        #[cfg(not(target_os = "linux"))]
        let _ = bg_pid;
    }

    #[test]
    fn test_terminate_kills_when_poll_fails() {
        let child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        let pid = child.id() as libc::pid_t;

        // Reap it behind the Child's back so try_wait fails with ECHILD
        let mut raw_status = 0;
        // SAFETY: plain integer arguments and a valid out-pointer.
        unsafe {
            libc::kill(pid, libc::SIGKILL);
            libc::waitpid(pid, &mut raw_status, 0);
        }

        let mut slot = ChildSlot {
            child: Some(child),
            status: None,
        };
        assert!(slot.terminate());
        assert!(slot.child.is_none());
        assert!(!slot.terminate());
    }

    #[test]
    fn test_exited_process_reports_code() {
        let _serial = TEST_SERIAL.lock();
        let process = shell("exit 3");

        wait_until_exited(&process);

        assert!(!process.is_running());
        assert_eq!(process.exit_code(), Some(3));
        process.stop();
        assert_eq!(process.exit_code(), Some(3));
    }

    #[test]
    fn test_env_overlay_reaches_child() {
        let _serial = TEST_SERIAL.lock();
        let mut env = HashMap::new();
        env.insert("PYSERVE_TEST_MARKER".to_string(), "42".to_string());
        let process = WorkerProcess::launch(
            "sh",
            &["-c".to_string(), "test \"$PYSERVE_TEST_MARKER\" = 42".to_string()],
            &env,
        )
        .unwrap();

        wait_until_exited(&process);
        assert_eq!(process.exit_code(), Some(0));
    }

    #[test]
    fn test_working_dir_recorded() {
        let _serial = TEST_SERIAL.lock();
        let process = sleeper();
        assert!(process.working_dir().is_none());

        process.set_working_dir(Path::new("/tmp/python_tmp1"));
        assert_eq!(process.working_dir(), Some(PathBuf::from("/tmp/python_tmp1")));
    }

    #[test]
    fn test_spawn_failure() {
        let err = WorkerProcess::launch("pyserve-missing-python", &[], &HashMap::new()).unwrap_err();
        assert!(matches!(err, ServiceError::ProcessSpawn { .. }));
    }
}
