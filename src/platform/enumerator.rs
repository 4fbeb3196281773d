//! Process enumeration seam.
//!
//! `SystemEnumerator` is the production implementation, backed by `sysinfo`
//! the same way `examples/other_examples/…process_tree.rs.rs` (mike-lead's
//! maestro) builds a parent->children map from a single `sys.processes()`
//! refresh. The Process Inspector (spec.md §4.2) and Termination Engine
//! (spec.md §4.5) never call `sysinfo` directly — only through this trait —
//! so both can be unit-tested against `FakeEnumerator` without touching the
//! real process table.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// A single process's raw attributes, before any protection/tier logic is applied.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessSnapshot {
    pub pid: u32,
    pub parent_pid: Option<u32>,
    pub name: String,
    pub command_line: String,
    pub cwd: Option<String>,
    /// Seconds since the Unix epoch.
    pub created_at: f64,
    pub memory_bytes: u64,
    pub cpu_percent: f32,
    pub thread_count: u32,
}

/// Seam for "what processes exist right now".
pub trait ProcessEnumerator {
    /// Snapshot every process currently visible to this user.
    ///
    /// `with_cpu` controls whether the cheap pass (`false`) or the sampled
    /// pass (`true`, spec.md §4.2 `Full` tier: sampled over >=100ms) is used.
    fn snapshot_all(&self, with_cpu: bool) -> Vec<ProcessSnapshot>;

    /// Snapshot a single process by pid, if it still exists.
    fn snapshot_one(&self, pid: u32) -> Option<ProcessSnapshot>;

    /// Build a pid -> direct-children-pids map from the current process table.
    fn children_map(&self) -> HashMap<u32, Vec<u32>>;
}

/// Production enumerator backed by `sysinfo`.
pub struct SystemEnumerator;

impl SystemEnumerator {
    pub fn new() -> Self {
        SystemEnumerator
    }
}

impl Default for SystemEnumerator {
    fn default() -> Self {
        Self::new()
    }
}

fn to_process_snapshot(pid: sysinfo::Pid, process: &sysinfo::Process) -> ProcessSnapshot {
    let name = process.name().to_string_lossy().to_string();
    let command_line =
        process.cmd().iter().map(|s| s.to_string_lossy().to_string()).collect::<Vec<_>>().join(" ");
    let cwd = process.cwd().map(|p| p.to_string_lossy().to_string());
    ProcessSnapshot {
        pid: pid.as_u32(),
        parent_pid: process.parent().map(|p| p.as_u32()),
        name,
        command_line,
        cwd,
        created_at: process.start_time() as f64,
        memory_bytes: process.memory(),
        cpu_percent: process.cpu_usage(),
        thread_count: thread_count(pid.as_u32()),
    }
}

impl ProcessEnumerator for SystemEnumerator {
    fn snapshot_all(&self, with_cpu: bool) -> Vec<ProcessSnapshot> {
        let mut sys = sysinfo::System::new();
        sys.refresh_processes(sysinfo::ProcessesToUpdate::All, true);
        if with_cpu {
            // CPU percentages need two samples separated by time to be
            // meaningful; spec.md §4.2 allows up to 100ms for this in the
            // `Full` tier.
            std::thread::sleep(std::time::Duration::from_millis(120));
            sys.refresh_processes(sysinfo::ProcessesToUpdate::All, true);
        }
        sys.processes().iter().map(|(pid, process)| to_process_snapshot(*pid, process)).collect()
    }

    fn snapshot_one(&self, pid: u32) -> Option<ProcessSnapshot> {
        let mut sys = sysinfo::System::new();
        let target = sysinfo::Pid::from_u32(pid);
        sys.refresh_processes(sysinfo::ProcessesToUpdate::Some(&[target]), true);
        sys.process(target).map(|p| to_process_snapshot(target, p))
    }

    fn children_map(&self) -> HashMap<u32, Vec<u32>> {
        let mut sys = sysinfo::System::new();
        sys.refresh_processes(sysinfo::ProcessesToUpdate::All, true);
        let mut map: HashMap<u32, Vec<u32>> = HashMap::new();
        for (pid, process) in sys.processes() {
            if let Some(parent) = process.parent() {
                map.entry(parent.as_u32()).or_default().push(pid.as_u32());
            }
        }
        map
    }
}

/// Best-effort thread count for a pid.
///
/// On Windows, counts `TH32CS_SNAPTHREAD` entries matching the pid
/// (the same `CreateToolhelp32Snapshot` family the Termination Engine uses
/// for its descendant walk, see `platform::windows_job`). On Linux, reads
/// `/proc/<pid>/status`. Falls back to 1 when neither is available, since
/// every live process has at least one thread.
#[cfg(windows)]
fn thread_count(pid: u32) -> u32 {
    use windows::Win32::System::Diagnostics::ToolHelp::{
        CreateToolhelp32Snapshot, Thread32First, Thread32Next, TH32CS_SNAPTHREAD, THREADENTRY32,
    };
    unsafe {
        let Ok(snapshot) = CreateToolhelp32Snapshot(TH32CS_SNAPTHREAD, 0) else {
            return 1;
        };
        let mut count = 0u32;
        let mut entry = THREADENTRY32 { dwSize: std::mem::size_of::<THREADENTRY32>() as u32, ..Default::default() };
        if Thread32First(snapshot, &mut entry).is_ok() {
            loop {
                if entry.th32OwnerProcessID == pid {
                    count += 1;
                }
                entry = THREADENTRY32 { dwSize: std::mem::size_of::<THREADENTRY32>() as u32, ..Default::default() };
                if Thread32Next(snapshot, &mut entry).is_err() {
                    break;
                }
            }
        }
        let _ = windows::Win32::Foundation::CloseHandle(snapshot);
        count.max(1)
    }
}

#[cfg(unix)]
fn thread_count(pid: u32) -> u32 {
    let path = format!("/proc/{pid}/status");
    std::fs::read_to_string(path)
        .ok()
        .and_then(|contents| {
            contents.lines().find_map(|line| {
                line.strip_prefix("Threads:").and_then(|rest| rest.trim().parse::<u32>().ok())
            })
        })
        .unwrap_or(1)
}

#[cfg(not(any(unix, windows)))]
fn thread_count(_pid: u32) -> u32 {
    1
}

pub fn now_unix_seconds() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64()
}
