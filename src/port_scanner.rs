//! The Port Scanner (spec.md §4.3).
//!
//! Bounded worker pool over plain `std::thread`, matching the teacher's
//! preference for bare threads over an async runtime or thread-pool crate
//! (`run.rs`'s `stream_to_logs`/watcher threads are the same shape: spawn,
//! `join`, no executor). Each worker claims ports from a shared queue so the
//! pool self-balances across the fixed port set instead of assigning ports
//! up front.

use crate::config;
use crate::config::Config;
use crate::platform::{PortTableReader, ProcessEnumerator};
use crate::schema::{PortEntry, PortProcessSummary, PortStatus};
use crate::spawn::SpawnRegistry;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

fn service_label(port: u16) -> &'static str {
    match port {
        3000 => "React Dev Server",
        5000 => "Flask/Node Server",
        8000 => "Django/FastAPI Server",
        8080 => "HTTP Alt/Proxy",
        5173 => "Vite Dev Server",
        4200 => "Angular Dev Server",
        _ => "Custom",
    }
}

pub struct PortScanner<'a> {
    config: &'a Config,
}

impl<'a> PortScanner<'a> {
    pub fn new(config: &'a Config) -> Self {
        PortScanner { config }
    }

    /// Scan `ports` (default: the configured watched-port set) in parallel
    /// with a bounded worker pool, within the 500ms total budget (spec.md
    /// §4.3). `port_reader` and `enumerator` must be `Sync` so they can be
    /// shared across worker threads.
    pub fn scan(
        &self,
        port_reader: &(dyn PortTableReader + Sync),
        enumerator: &(dyn ProcessEnumerator + Sync),
        ports: Option<Vec<u16>>,
    ) -> BTreeMap<String, PortEntry> {
        let targets = ports.unwrap_or_else(|| self.config.watched_ports.clone());
        let listeners = port_reader.listeners();

        // Group listener entries by port once, up front, so each worker
        // only does a cheap map lookup rather than re-scanning the table.
        let mut by_port: std::collections::HashMap<u16, Vec<u32>> = std::collections::HashMap::new();
        for entry in listeners {
            by_port.entry(entry.port).or_default().push(entry.pid);
        }
        let by_port = Arc::new(by_port);

        let queue: Arc<Mutex<Vec<u16>>> = Arc::new(Mutex::new(targets));
        let results: Arc<Mutex<BTreeMap<String, PortEntry>>> = Arc::new(Mutex::new(BTreeMap::new()));

        let worker_count = config::PORT_SCAN_MAX_WORKERS.min(queue.lock().unwrap().len().max(1));
        std::thread::scope(|scope| {
            for _ in 0..worker_count {
                let queue = Arc::clone(&queue);
                let results = Arc::clone(&results);
                let by_port = Arc::clone(&by_port);
                scope.spawn(|| loop {
                    let port = {
                        let mut q = queue.lock().unwrap();
                        match q.pop() {
                            Some(p) => p,
                            None => break,
                        }
                    };
                    let entry = build_port_entry(port, &by_port, enumerator);
                    results.lock().unwrap().insert(port.to_string(), entry);
                });
            }
        });

        match Arc::try_unwrap(results) {
            Ok(mutex) => mutex.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner()),
            Err(shared) => shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone(),
        }
    }

    /// `developer_hints` for `check_ports`/`dev_status`: surface any port
    /// bound by a process the server doesn't recognize as its own, since
    /// that's the scenario this tool exists to make visible.
    pub fn developer_hints(&self, ports: &BTreeMap<String, PortEntry>, registry: &SpawnRegistry) -> Vec<String> {
        let mut hints = Vec::new();
        for entry in ports.values() {
            if let Some(owner) = &entry.owning_process {
                if entry.status == PortStatus::Active && !registry.contains(owner.pid) {
                    hints.push(format!(
                        "port {} ({}) is bound by pid {} ({}), which this server did not spawn",
                        entry.port, entry.service_label, owner.pid, owner.name
                    ));
                }
                if owner.children_count > 0 {
                    hints.push(format!(
                        "pid {} on port {} has {} child process(es); killing it directly will orphan them — use kill_process_tree",
                        owner.pid, entry.port, owner.children_count
                    ));
                }
            }
        }
        hints
    }
}

fn build_port_entry(
    port: u16,
    by_port: &std::collections::HashMap<u16, Vec<u32>>,
    enumerator: &(dyn ProcessEnumerator + Sync),
) -> PortEntry {
    let Some(pids) = by_port.get(&port) else {
        return PortEntry {
            port,
            service_label: service_label(port).to_string(),
            status: PortStatus::Inactive,
            owning_process: None,
            extra_processes: Vec::new(),
        };
    };
    if pids.is_empty() {
        return PortEntry {
            port,
            service_label: service_label(port).to_string(),
            status: PortStatus::Inactive,
            owning_process: None,
            extra_processes: Vec::new(),
        };
    }

    let owning_pid = pids[0];
    let extra_processes = pids[1..].to_vec();
    let owning_process = enumerator.snapshot_one(owning_pid).map(|snapshot| {
        let children_count = enumerator.children_map().get(&owning_pid).map(|c| c.len()).unwrap_or(0) as u32;
        PortProcessSummary { pid: owning_pid, name: snapshot.name, children_count }
    });

    PortEntry {
        port,
        service_label: service_label(port).to_string(),
        status: PortStatus::Active,
        owning_process,
        extra_processes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::enumerator::fake::FakeEnumerator;
    use crate::platform::ports::fake::FakePortTableReader;
    use crate::platform::ListenerEntry;
    use crate::platform::ProcessSnapshot;

    fn snap(pid: u32, name: &str) -> ProcessSnapshot {
        ProcessSnapshot {
            pid,
            parent_pid: Some(1),
            name: name.to_string(),
            command_line: name.to_string(),
            cwd: None,
            created_at: 1.0,
            memory_bytes: 0,
            cpu_percent: 0.0,
            thread_count: 1,
        }
    }

    #[test]
    fn inactive_ports_are_reported_with_no_owner() {
        let config = Config::default();
        let scanner = PortScanner::new(&config);
        let port_reader = FakePortTableReader::new(vec![]);
        let enumerator = FakeEnumerator::new(vec![]);
        let result = scanner.scan(&port_reader, &enumerator, None);
        assert_eq!(result.len(), 6);
        for entry in result.values() {
            assert_eq!(entry.status, PortStatus::Inactive);
            assert!(entry.owning_process.is_none());
        }
    }

    #[test]
    fn active_port_resolves_owning_process_and_extras() {
        let config = Config::default();
        let scanner = PortScanner::new(&config);
        let port_reader = FakePortTableReader::new(vec![
            ListenerEntry { port: 8000, pid: 100 },
            ListenerEntry { port: 8000, pid: 101 },
        ]);
        let enumerator = FakeEnumerator::new(vec![snap(100, "node.exe"), snap(101, "node.exe")]);
        let result = scanner.scan(&port_reader, &enumerator, Some(vec![8000]));
        let entry = &result["8000"];
        assert_eq!(entry.status, PortStatus::Active);
        assert_eq!(entry.owning_process.as_ref().unwrap().pid, 100);
        assert_eq!(entry.extra_processes, vec![101]);
        assert_eq!(entry.service_label, "Django/FastAPI Server");
    }
}
