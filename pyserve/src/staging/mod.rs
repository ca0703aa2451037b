//! Per-call scratch directories for the worker.
//!
//! A scratch directory is staged next to the script being run
//! (`<script dir>/python_tmp<N>`) so that relative file output lands beside
//! the script. When that location is unusable the same naming scheme is
//! applied under a user-scoped fallback root.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use parking_lot::Mutex;
use pyserve_shared::constants::scratch::{DIR_PREFIX, FALLBACK_DIR, TOUCH_FILE};

/// Directories handed out and not yet released, process-wide.
static CLAIMED: LazyLock<Mutex<HashSet<PathBuf>>> = LazyLock::new(|| Mutex::new(HashSet::new()));

/// Default fallback root: `~/.pyserve`, or the temp dir when there is no home.
pub fn default_fallback_root() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(FALLBACK_DIR)
}

/// Stages scratch directories for script calls.
#[derive(Debug, Clone)]
pub struct DirectoryStager {
    fallback_root: PathBuf,
}

impl DirectoryStager {
    pub fn new(fallback_root: impl Into<PathBuf>) -> Self {
        Self {
            fallback_root: fallback_root.into(),
        }
    }

    /// Stage a working directory for a call running `script_path`.
    ///
    /// Never fails: if neither the script's directory nor the fallback root
    /// can be written, the fallback path is returned anyway and the call is
    /// left to fail on its own terms.
    pub fn stage(&self, script_path: &Path) -> ScratchDir {
        if let Some(parent) = script_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            match claim_unique_dir(parent) {
                Some(dir) if is_usable(&dir) => {
                    tracing::debug!(dir = %dir.display(), "Staged scratch directory beside script");
                    return ScratchDir::claimed(dir);
                }
                Some(dir) => {
                    if let Err(e) = fs::remove_dir(&dir) {
                        tracing::trace!(dir = %dir.display(), "Failed to remove unusable scratch directory: {}", e);
                    }
                    release(&dir);
                    tracing::debug!(
                        dir = %dir.display(),
                        "Script directory not writable, using fallback root"
                    );
                }
                None => {
                    tracing::debug!(
                        parent = %parent.display(),
                        "Could not create scratch directory beside script, using fallback root"
                    );
                }
            }
        }

        if let Err(e) = fs::create_dir_all(&self.fallback_root) {
            tracing::warn!(
                root = %self.fallback_root.display(),
                "Failed to create fallback scratch root: {}", e
            );
        }

        match claim_unique_dir(&self.fallback_root) {
            Some(dir) => {
                tracing::debug!(dir = %dir.display(), "Staged scratch directory under fallback root");
                ScratchDir::claimed(dir)
            }
            None => {
                let dir = self.fallback_root.join(format!("{}1", DIR_PREFIX));
                tracing::warn!(dir = %dir.display(), "Scratch directory could not be created");
                ScratchDir::unclaimed(dir)
            }
        }
    }
}

impl Default for DirectoryStager {
    fn default() -> Self {
        Self::new(default_fallback_root())
    }
}

/// A staged working directory for one call.
///
/// While alive, its path is not handed out again by any stager in this
/// process. Dropping it releases the claim but leaves the directory alone;
/// use [`ScratchDir::cleanup`] to remove it when empty.
#[derive(Debug)]
pub struct ScratchDir {
    path: PathBuf,
    claimed: bool,
}

impl ScratchDir {
    fn claimed(path: PathBuf) -> Self {
        Self {
            path,
            claimed: true,
        }
    }

    fn unclaimed(path: PathBuf) -> Self {
        Self {
            path,
            claimed: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the directory if it exists and is empty.
    ///
    /// Returns `true` if the directory was removed. Failures are logged and
    /// otherwise ignored.
    pub fn cleanup(self) -> bool {
        if !is_empty_dir(&self.path) {
            return false;
        }
        match fs::remove_dir(&self.path) {
            Ok(()) => {
                tracing::trace!(dir = %self.path.display(), "Removed empty scratch directory");
                true
            }
            Err(e) => {
                tracing::debug!(dir = %self.path.display(), "Failed to remove scratch directory: {}", e);
                false
            }
        }
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if self.claimed {
            release(&self.path);
        }
    }
}

/// Claim and create the first `<prefix><N>` under `parent` that does not
/// exist, or is an empty directory nobody else holds.
///
/// Returns `None` if the chosen directory cannot be created.
fn claim_unique_dir(parent: &Path) -> Option<PathBuf> {
    let mut claimed = CLAIMED.lock();

    let mut index: u32 = 1;
    let candidate = loop {
        let candidate = parent.join(format!("{}{}", DIR_PREFIX, index));
        if !candidate.exists() {
            break candidate;
        }
        if candidate.is_dir() && is_empty_dir(&candidate) && !claimed.contains(&candidate) {
            break candidate;
        }
        index += 1;
    };

    if let Err(e) = fs::create_dir_all(&candidate) {
        tracing::trace!(dir = %candidate.display(), "Failed to create scratch directory: {}", e);
        return None;
    }

    claimed.insert(candidate.clone());
    Some(candidate)
}

fn release(path: &Path) {
    CLAIMED.lock().remove(path);
}

fn is_empty_dir(path: &Path) -> bool {
    fs::read_dir(path)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(false)
}

/// A directory is usable when it is a directory, not read-only, and a file
/// can be created and deleted in it.
fn is_usable(dir: &Path) -> bool {
    let writable = fs::metadata(dir)
        .map(|m| m.is_dir() && !m.permissions().readonly())
        .unwrap_or(false);
    writable && can_touch(dir)
}

fn can_touch(dir: &Path) -> bool {
    let touch = dir.join(TOUCH_FILE);
    fs::File::create(&touch).is_ok() && fs::remove_file(&touch).is_ok()
}
