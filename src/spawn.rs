//! The Spawn Registry (spec.md §4.4).
//!
//! Grounded on `examples/tumf-agent-exec/src/run.rs`'s job-creation and
//! wrapper-resolution flow, and on its reaper idea (`tumf-agent-exec`
//! doesn't have a standalone reaper thread, but `jobstore`'s liveness-probe
//! pattern is the basis here): probe liveness non-blocking, capture the exit
//! code once, then remove the record after one further grace cycle so a
//! `status` read can still observe the terminal state.

use crate::platform::{ProcessEnumerator, ProcessKiller};
use crate::schema::{SpawnRecordSummary, SpawnStatus};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

#[cfg(windows)]
use crate::platform::windows_job::JobHandle;

#[derive(Debug)]
pub enum SpawnError {
    Io(String),
    InvalidCommand,
}

/// Maximum time spent resolving the real child pid behind a `cmd /c`
/// wrapper, and the poll interval used while waiting (spec.md §4.4 "On
/// spawn": "resolve the real PID by locating the first non-interpreter
/// descendant within a 1-second window").
const WRAPPER_RESOLUTION_WINDOW: Duration = Duration::from_millis(1000);
const WRAPPER_RESOLUTION_POLL: Duration = Duration::from_millis(50);

pub struct SpawnRecord {
    pub pid: u32,
    pub wrapper_pid: Option<u32>,
    pub started_at: f64,
    pub command: String,
    pub cwd: Option<String>,
    pub status: SpawnStatus,
    pub exit_code: Option<i32>,
    /// Set once the record has been observed Exited/Killed; the record is
    /// dropped on the reaper pass after this becomes `Some`.
    terminal_since: Option<std::time::Instant>,
    #[cfg(windows)]
    group: Option<JobHandle>,
    #[cfg(not(windows))]
    group: Option<u32>, // process-group id on unix
}

impl SpawnRecord {
    pub fn has_group(&self) -> bool {
        self.group.is_some()
    }

    pub fn summary(&self) -> SpawnRecordSummary {
        SpawnRecordSummary {
            pid: self.pid,
            wrapper_pid: self.wrapper_pid,
            started_at: self.started_at,
            command: self.command.clone(),
            cwd: self.cwd.clone(),
            has_group: self.has_group(),
            status: self.status,
            exit_code: self.exit_code,
        }
    }
}

/// Tracks processes the server itself spawned via the background-execute
/// path, owning whatever OS group handle was obtained for each.
pub struct SpawnRegistry {
    records: Mutex<HashMap<u32, SpawnRecord>>,
}

impl SpawnRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(SpawnRegistry { records: Mutex::new(HashMap::new()) })
    }

    #[cfg(test)]
    pub fn new_for_test() -> Arc<Self> {
        Self::new()
    }

    /// Register a freshly spawned process. `group` is present only when job
    /// assignment (or, on unix, process-group creation) succeeded; spec.md
    /// §4.4 requires falling back to `group: None` rather than failing the
    /// spawn outright.
    #[cfg(windows)]
    pub fn register(
        &self,
        pid: u32,
        wrapper_pid: Option<u32>,
        command: String,
        cwd: Option<String>,
        group: Option<JobHandle>,
    ) {
        let record = SpawnRecord {
            pid,
            wrapper_pid,
            started_at: now_unix_seconds(),
            command,
            cwd,
            status: SpawnStatus::Running,
            exit_code: None,
            terminal_since: None,
            group,
        };
        self.records.lock().unwrap().insert(pid, record);
    }

    #[cfg(not(windows))]
    pub fn register(
        &self,
        pid: u32,
        wrapper_pid: Option<u32>,
        command: String,
        cwd: Option<String>,
        group: Option<u32>,
    ) {
        let record = SpawnRecord {
            pid,
            wrapper_pid,
            started_at: now_unix_seconds(),
            command,
            cwd,
            status: SpawnStatus::Running,
            exit_code: None,
            terminal_since: None,
            group,
        };
        self.records.lock().unwrap().insert(pid, record);
    }

    /// Execute the validated `(command, cwd, background)` triple this server
    /// receives from the command-whitelist collaborator (spec.md §1, §4.4
    /// "On spawn"). Creates a process group before the child runs user code
    /// where possible, resolves the real target pid behind a `cmd /c`
    /// wrapper, and registers the result.
    #[cfg(windows)]
    pub fn spawn_background(
        &self,
        enumerator: &dyn ProcessEnumerator,
        command: &str,
        cwd: Option<&str>,
    ) -> Result<u32, SpawnError> {
        use std::os::windows::process::CommandExt;
        const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;

        if command.trim().is_empty() {
            return Err(SpawnError::InvalidCommand);
        }

        let mut cmd = std::process::Command::new("cmd");
        cmd.arg("/c").arg(command).creation_flags(CREATE_NEW_PROCESS_GROUP);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }
        let mut child = cmd.spawn().map_err(|e| SpawnError::Io(e.to_string()))?;
        let wrapper_pid = child.id();
        // Liveness is tracked by pid through the enumerator, not `Child`;
        // still `wait()` it on a detached thread so it never lingers as a
        // zombie once it exits (mirrors the teacher's `child.wait()` reap).
        std::thread::spawn(move || {
            let _ = child.wait();
        });

        let group = crate::platform::windows_job::create_job_and_assign(wrapper_pid).ok();

        let real_pid = resolve_real_pid(enumerator, wrapper_pid);
        self.register(real_pid, Some(wrapper_pid).filter(|w| *w != real_pid), command.to_string(), cwd.map(str::to_string), group);
        Ok(real_pid)
    }

    #[cfg(not(windows))]
    pub fn spawn_background(
        &self,
        enumerator: &dyn ProcessEnumerator,
        command: &str,
        cwd: Option<&str>,
    ) -> Result<u32, SpawnError> {
        use std::os::unix::process::CommandExt;

        if command.trim().is_empty() {
            return Err(SpawnError::InvalidCommand);
        }

        let mut cmd = std::process::Command::new("sh");
        cmd.arg("-c").arg(command).process_group(0);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }
        let mut child = cmd.spawn().map_err(|e| SpawnError::Io(e.to_string()))?;
        let wrapper_pid = child.id();
        std::thread::spawn(move || {
            let _ = child.wait();
        });

        // `process_group(0)` makes the child its own group leader, so its
        // pid doubles as the unix stand-in for a Windows job handle.
        let group = Some(wrapper_pid);
        let real_pid = resolve_real_pid(enumerator, wrapper_pid);
        self.register(real_pid, Some(wrapper_pid).filter(|w| *w != real_pid), command.to_string(), cwd.map(str::to_string), group);
        Ok(real_pid)
    }

    /// Atomically terminate the group (job object, or unix process group)
    /// backing `pid`'s spawn record, if one exists (spec.md §4.5 kill-tree
    /// step 5 "if the root has an associated group handle... terminate the
    /// group atomically"). Returns `false` if there is no tracked record or
    /// it has no group, leaving the caller to fall back to manual BFS kill.
    pub fn terminate_group(&self, pid: u32) -> bool {
        let mut records = self.records.lock().unwrap();
        let Some(record) = records.get_mut(&pid) else { return false };
        if !record.has_group() {
            return false;
        }
        #[cfg(windows)]
        let ok = match &record.group {
            Some(handle) => crate::platform::windows_job::terminate_job(handle).is_ok(),
            None => false,
        };
        #[cfg(not(windows))]
        let ok = match record.group {
            Some(pgid) => crate::platform::unix_signal::send_signal_to_group(pgid, libc::SIGKILL).is_ok(),
            None => false,
        };
        record.status = SpawnStatus::Killed;
        record.terminal_since.get_or_insert_with(std::time::Instant::now);
        ok
    }

    pub fn contains(&self, pid: u32) -> bool {
        self.records.lock().unwrap().contains_key(&pid)
    }

    /// Whether `pid` has a tracked group handle, without mutating or
    /// terminating anything (used to pick `"JobObject"` vs `"Manual"` for a
    /// kill-tree dry run before any termination actually happens).
    pub fn has_group(&self, pid: u32) -> bool {
        self.records.lock().unwrap().get(&pid).is_some_and(|r| r.has_group())
    }

    pub fn snapshot(&self) -> Vec<SpawnRecordSummary> {
        self.records.lock().unwrap().values().map(|r| r.summary()).collect()
    }

    pub fn mark_killed(&self, pid: u32) {
        if let Some(record) = self.records.lock().unwrap().get_mut(&pid) {
            record.status = SpawnStatus::Killed;
            record.terminal_since.get_or_insert_with(std::time::Instant::now);
        }
    }

    /// One reaper pass: probe liveness for every tracked Running record,
    /// mark terminal ones, and drop records that have been terminal for
    /// more than one probe interval (spec.md §4.4 "On query").
    pub fn reap_once(&self, enumerator: &dyn ProcessEnumerator) {
        let mut records = self.records.lock().unwrap();
        let mut to_remove = Vec::new();
        for (pid, record) in records.iter_mut() {
            match record.status {
                SpawnStatus::Running => {
                    if enumerator.snapshot_one(*pid).is_none() {
                        record.status = SpawnStatus::Exited;
                        record.exit_code = None;
                        record.terminal_since = Some(std::time::Instant::now());
                    }
                }
                SpawnStatus::Exited | SpawnStatus::Killed => {
                    if let Some(since) = record.terminal_since {
                        if since.elapsed() >= crate::config::REGISTRY_REAP_INTERVAL * 2 {
                            to_remove.push(*pid);
                        }
                    }
                }
                SpawnStatus::Unknown => {}
            }
        }
        for pid in to_remove {
            records.remove(&pid);
        }
    }

    /// Server shutdown: terminate every live record's group (or best-effort
    /// tree-terminate if it has none), per spec.md §4.4 "On server shutdown".
    pub fn shutdown_all(&self, killer: &dyn ProcessKiller) {
        let mut records = self.records.lock().unwrap();
        for record in records.values_mut() {
            if record.status != SpawnStatus::Running {
                continue;
            }
            #[cfg(windows)]
            if let Some(handle) = &record.group {
                let _ = crate::platform::windows_job::terminate_job(handle);
                record.status = SpawnStatus::Killed;
                continue;
            }
            #[cfg(not(windows))]
            if let Some(pgid) = record.group {
                let _ = crate::platform::unix_signal::send_signal_to_group(pgid, libc::SIGKILL);
                record.status = SpawnStatus::Killed;
                continue;
            }
            let _ = killer.kill_forceful(record.pid);
            record.status = SpawnStatus::Killed;
        }
    }
}

fn now_unix_seconds() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64()
}

/// Resolve the real target pid behind a `cmd /c <command>` wrapper by
/// polling the process table for the wrapper's first child within a 1s
/// window (spec.md §4.4 "On spawn"). Falls back to the wrapper pid itself
/// if no distinct child shows up in time (the command may not have spawned
/// a further descendant at all, e.g. a single-binary target on unix via `sh`).
fn resolve_real_pid(enumerator: &dyn ProcessEnumerator, wrapper_pid: u32) -> u32 {
    let deadline = Instant::now() + WRAPPER_RESOLUTION_WINDOW;
    while Instant::now() < deadline {
        if let Some(children) = enumerator.children_map().get(&wrapper_pid) {
            if let Some(&child_pid) = children.first() {
                return child_pid;
            }
        }
        std::thread::sleep(WRAPPER_RESOLUTION_POLL);
    }
    wrapper_pid
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::enumerator::fake::FakeEnumerator;
    use crate::platform::ProcessSnapshot;

    fn snap(pid: u32) -> ProcessSnapshot {
        ProcessSnapshot {
            pid,
            parent_pid: Some(1),
            name: "node.exe".to_string(),
            command_line: "node server.js".to_string(),
            cwd: None,
            created_at: 1.0,
            memory_bytes: 0,
            cpu_percent: 0.0,
            thread_count: 1,
        }
    }

    #[test]
    fn registered_pid_is_contained() {
        let registry = SpawnRegistry::new_for_test();
        #[cfg(windows)]
        registry.register(123, None, "node server.js".to_string(), None, None);
        #[cfg(not(windows))]
        registry.register(123, None, "node server.js".to_string(), None, None);
        assert!(registry.contains(123));
        assert!(!registry.contains(999));
    }

    #[test]
    fn reaper_marks_vanished_process_as_exited_then_removes_it() {
        let registry = SpawnRegistry::new_for_test();
        #[cfg(windows)]
        registry.register(55, None, "cmd".to_string(), None, None);
        #[cfg(not(windows))]
        registry.register(55, None, "cmd".to_string(), None, None);
        let enumerator = FakeEnumerator::new(vec![]);
        registry.reap_once(&enumerator);
        let summary = registry.snapshot();
        assert_eq!(summary[0].status, SpawnStatus::Exited);
    }

    #[test]
    #[cfg(unix)]
    fn spawn_background_registers_the_real_pid_and_tracks_a_group() {
        let registry = SpawnRegistry::new_for_test();
        let enumerator = crate::platform::enumerator::SystemEnumerator::new();
        let pid = registry.spawn_background(&enumerator, "sleep 5", None).unwrap();
        assert!(registry.contains(pid));
        assert!(registry.snapshot().iter().any(|s| s.pid == pid && s.has_group));
        assert!(registry.terminate_group(pid));
    }

    #[test]
    #[cfg(unix)]
    fn spawn_background_rejects_an_empty_command() {
        let registry = SpawnRegistry::new_for_test();
        let enumerator = crate::platform::enumerator::SystemEnumerator::new();
        let result = registry.spawn_background(&enumerator, "   ", None);
        assert!(matches!(result, Err(SpawnError::InvalidCommand)));
    }

    #[test]
    fn terminate_group_on_unregistered_pid_is_a_no_op() {
        let registry = SpawnRegistry::new_for_test();
        assert!(!registry.terminate_group(123456));
    }

    #[test]
    fn reaper_leaves_live_process_running() {
        let registry = SpawnRegistry::new_for_test();
        #[cfg(windows)]
        registry.register(77, None, "cmd".to_string(), None, None);
        #[cfg(not(windows))]
        registry.register(77, None, "cmd".to_string(), None, None);
        let enumerator = FakeEnumerator::new(vec![snap(77)]);
        registry.reap_once(&enumerator);
        assert!(registry.contains(77));
        assert_eq!(registry.snapshot()[0].status, SpawnStatus::Running);
    }
}
