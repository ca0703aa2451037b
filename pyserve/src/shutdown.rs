//! Process-wide shutdown hooks.
//!
//! Every spawned worker registers one hook here that kills it. The hooks
//! run when the host goes down without dropping its service handles:
//! `std::process::exit` (via `atexit`), a panic under `panic = "abort"`, or
//! a termination signal once [`install_signal_handlers`] has been called.
//! Normal shutdown goes through `Drop`, which deregisters the hook first.

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{LazyLock, Once};

use parking_lot::Mutex;

type Hook = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    hooks: BTreeMap<u64, (String, Hook)>,
}

static GLOBAL: LazyLock<HookRegistry> = LazyLock::new(HookRegistry::new);
static EXIT_HANDLERS: Once = Once::new();
static SIGNAL_HANDLERS_INSTALLED: AtomicBool = AtomicBool::new(false);

/// Held by tests that touch the process-wide registry, since
/// [`run_hooks`] would kill workers owned by concurrently running tests.
#[cfg(test)]
pub(crate) static TEST_SERIAL: Mutex<()> = Mutex::new(());

/// Registration token returned by [`HookRegistry::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookId(u64);

/// A set of named cleanup closures, each run at most once.
#[derive(Default)]
pub struct HookRegistry {
    inner: Mutex<Registry>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, name: impl Into<String>, hook: F) -> HookId
    where
        F: FnOnce() + Send + 'static,
    {
        let name = name.into();
        let mut registry = self.inner.lock();
        registry.next_id += 1;
        let id = registry.next_id;
        tracing::debug!(hook_id = id, name = %name, "Registered shutdown hook");
        registry.hooks.insert(id, (name, Box::new(hook)));

        HookId(id)
    }

    /// Remove a hook. Returns `false` if it already ran or was removed.
    pub fn deregister(&self, id: HookId) -> bool {
        let removed = self.inner.lock().hooks.remove(&id.0).is_some();
        if removed {
            tracing::debug!(hook_id = id.0, "Deregistered shutdown hook");
        }
        removed
    }

    pub fn registered(&self) -> usize {
        self.inner.lock().hooks.len()
    }

    /// Run and remove every registered hook.
    ///
    /// The lock is released before the hooks run, so a hook may call
    /// [`HookRegistry::deregister`] (a no-op by then) without deadlocking.
    pub fn run_hooks(&self) {
        let hooks = std::mem::take(&mut self.inner.lock().hooks);
        if hooks.is_empty() {
            return;
        }

        tracing::info!(count = hooks.len(), "Running shutdown hooks");
        for (id, (name, hook)) in hooks {
            if panic::catch_unwind(AssertUnwindSafe(hook)).is_err() {
                tracing::error!(hook_id = id, name = %name, "Shutdown hook panicked");
            }
        }
    }
}

/// Register a hook in the process-wide registry.
///
/// The first registration also installs the `atexit` handler (and, when
/// built with `panic = "abort"`, a panic hook) that runs the registry.
pub fn register<F>(name: impl Into<String>, hook: F) -> HookId
where
    F: FnOnce() + Send + 'static,
{
    install_exit_handlers();
    GLOBAL.register(name, hook)
}

/// Remove a hook from the process-wide registry.
pub fn deregister(id: HookId) -> bool {
    GLOBAL.deregister(id)
}

/// Number of hooks in the process-wide registry.
pub fn registered() -> usize {
    GLOBAL.registered()
}

/// Run and remove every hook in the process-wide registry.
pub fn run_hooks() {
    GLOBAL.run_hooks()
}

/// Run the hooks on SIGINT, SIGTERM and SIGHUP, then let the signal take its
/// default action. Only the first call installs anything.
///
/// Hosts with their own signal handling should skip this and call
/// [`run_hooks`] from their shutdown path instead.
#[cfg(unix)]
pub fn install_signal_handlers() -> std::io::Result<()> {
    use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    if SIGNAL_HANDLERS_INSTALLED.swap(true, Ordering::SeqCst) {
        return Ok(());
    }

    let mut signals = match Signals::new([SIGINT, SIGTERM, SIGHUP]) {
        Ok(signals) => signals,
        Err(e) => {
            SIGNAL_HANDLERS_INSTALLED.store(false, Ordering::SeqCst);
            return Err(e);
        }
    };

    std::thread::Builder::new()
        .name("pyserve-signals".to_string())
        .spawn(move || {
            if let Some(signal) = signals.forever().next() {
                tracing::info!(signal, "Termination signal received, stopping workers");
                run_hooks();
                if let Err(e) = signal_hook::low_level::emulate_default_handler(signal) {
                    tracing::error!(signal, "Failed to re-raise signal: {}", e);
                    std::process::exit(128 + signal);
                }
            }
        })?;

    tracing::debug!("Signal handlers installed");
    Ok(())
}

#[cfg(not(unix))]
pub fn install_signal_handlers() -> std::io::Result<()> {
    if !SIGNAL_HANDLERS_INSTALLED.swap(true, Ordering::SeqCst) {
        tracing::debug!("Signal handlers not supported on this platform, relying on exit hooks");
    }
    Ok(())
}

extern "C" fn run_hooks_at_exit() {
    let _ = panic::catch_unwind(run_hooks);
}

fn install_exit_handlers() {
    EXIT_HANDLERS.call_once(|| {
        // SAFETY: registering a plain extern "C" function with no captured state.
        if unsafe { libc::atexit(run_hooks_at_exit) } != 0 {
            tracing::warn!("Failed to register atexit handler");
        }

        // Unwinding panics drop service handles on the way out; aborting
        // ones do not, so the hooks have to run before the abort.
        #[cfg(panic = "abort")]
        {
            let previous = panic::take_hook();
            panic::set_hook(Box::new(move |info| {
                run_hooks();
                previous(info);
            }));
        }
    });
}
