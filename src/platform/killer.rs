//! Process termination seam.
//!
//! Grounded directly on `examples/tumf-agent-exec/src/kill.rs`'s `send_signal`:
//! a `#[cfg(unix)]` / `#[cfg(windows)]` / `#[cfg(not(any(unix, windows)))]`
//! three-way split, with ESRCH ("no such process") and the Windows
//! already-exited error both treated as success rather than failure.

use serde::{Deserialize, Serialize};

/// Which mechanism actually terminated a single process (spec.md §4.5
/// kill-one step 5's dry-run descriptor: "method = Graceful or Forceful").
/// The tree-kill method ("JobObject" vs "Manual", spec.md §6) is a separate,
/// coarser label tracked directly on `KillTreeOutcome`/`DryRunOutcome` in
/// `termination.rs` rather than here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationMethod {
    /// Graceful signal only (SIGTERM / WM_CLOSE-equivalent) was enough.
    Graceful,
    /// Forceful kill (SIGKILL / TerminateProcess) was required.
    Forceful,
    /// The process was already gone by the time termination was attempted.
    AlreadyExited,
}

#[derive(Debug, thiserror::Error)]
pub enum KillError {
    #[error("permission denied operating on pid {0}")]
    PermissionDenied(u32),
    #[error("platform termination call failed: {0}")]
    Platform(String),
}

/// Seam for "make this process (and optionally its job/group) stop".
pub trait ProcessKiller {
    /// Send a graceful termination request. Returns `Ok(true)` if the
    /// process was already gone.
    fn terminate_graceful(&self, pid: u32) -> Result<bool, KillError>;

    /// Force-kill a single pid immediately.
    fn kill_forceful(&self, pid: u32) -> Result<bool, KillError>;

    /// Best-effort check of whether a pid is still alive.
    fn is_alive(&self, pid: u32) -> bool;
}

/// Production killer: native Windows job-object/process calls, or POSIX
/// signals on unix for developer-host parity.
pub struct SystemKiller;

impl SystemKiller {
    pub fn new() -> Self {
        SystemKiller
    }
}

impl Default for SystemKiller {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(windows)]
impl ProcessKiller for SystemKiller {
    fn terminate_graceful(&self, pid: u32) -> Result<bool, KillError> {
        crate::platform::windows_job::request_graceful_exit(pid)
    }

    fn kill_forceful(&self, pid: u32) -> Result<bool, KillError> {
        crate::platform::windows_job::terminate_process(pid)
    }

    fn is_alive(&self, pid: u32) -> bool {
        crate::platform::windows_job::is_alive(pid)
    }
}

#[cfg(unix)]
impl ProcessKiller for SystemKiller {
    fn terminate_graceful(&self, pid: u32) -> Result<bool, KillError> {
        crate::platform::unix_signal::send_signal(pid, libc::SIGTERM)
    }

    fn kill_forceful(&self, pid: u32) -> Result<bool, KillError> {
        crate::platform::unix_signal::send_signal(pid, libc::SIGKILL)
    }

    fn is_alive(&self, pid: u32) -> bool {
        crate::platform::unix_signal::send_signal(pid, 0).map(|already_gone| !already_gone).unwrap_or(false)
    }
}

#[cfg(not(any(unix, windows)))]
impl ProcessKiller for SystemKiller {
    fn terminate_graceful(&self, _pid: u32) -> Result<bool, KillError> {
        Err(KillError::Platform("unsupported platform".to_string()))
    }

    fn kill_forceful(&self, _pid: u32) -> Result<bool, KillError> {
        Err(KillError::Platform("unsupported platform".to_string()))
    }

    fn is_alive(&self, _pid: u32) -> bool {
        false
    }
}

/// In-memory fake used by termination-engine unit tests.
#[cfg(test)]
pub mod fake {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct FakeKiller {
        alive: Mutex<HashSet<u32>>,
        pub graceful_calls: Mutex<Vec<u32>>,
        pub forceful_calls: Mutex<Vec<u32>>,
        /// pids that should ignore graceful termination and only die on kill_forceful.
        pub stubborn: Mutex<HashSet<u32>>,
    }

    impl FakeKiller {
        pub fn with_alive(pids: impl IntoIterator<Item = u32>) -> Self {
            FakeKiller {
                alive: Mutex::new(pids.into_iter().collect()),
                graceful_calls: Mutex::new(Vec::new()),
                forceful_calls: Mutex::new(Vec::new()),
                stubborn: Mutex::new(HashSet::new()),
            }
        }

        pub fn mark_stubborn(&self, pid: u32) {
            self.stubborn.lock().unwrap().insert(pid);
        }
    }

    impl ProcessKiller for FakeKiller {
        fn terminate_graceful(&self, pid: u32) -> Result<bool, KillError> {
            self.graceful_calls.lock().unwrap().push(pid);
            let mut alive = self.alive.lock().unwrap();
            if !alive.contains(&pid) {
                return Ok(true);
            }
            if !self.stubborn.lock().unwrap().contains(&pid) {
                alive.remove(&pid);
            }
            Ok(false)
        }

        fn kill_forceful(&self, pid: u32) -> Result<bool, KillError> {
            self.forceful_calls.lock().unwrap().push(pid);
            let mut alive = self.alive.lock().unwrap();
            let was_alive = alive.remove(&pid);
            Ok(!was_alive)
        }

        fn is_alive(&self, pid: u32) -> bool {
            self.alive.lock().unwrap().contains(&pid)
        }
    }
}
