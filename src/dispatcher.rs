//! The Tool Dispatcher (core subset) — spec.md §4's component 6 and §6's
//! operation list, as a literal tagged-enum match (spec.md §9 "Dynamic
//! dispatch on tool name": replace string routing with a tagged variant
//! whose completeness is compile-time checked).

use crate::auditlog;
use crate::error::CoreError;
use crate::inspector::{InspectError, ProcessInspector, SearchParams};
use crate::platform::killer::TerminationMethod;
use crate::port_scanner::PortScanner;
use crate::schema::{
    CheckPortsData, CleanupUserProcessesData, DetailTier, DevStatusData, DryRunKillData,
    ErrorResponse, FindProcessByPortData, FindProcessData, KillProcessData, KillProcessTreeData,
    PidName, Response, ServerStatusData,
};
use crate::server::ServerState;
use crate::termination::{KillOneFlags, KillOneResult, KillTreeFlags, KillTreeResult, TerminationEngine};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// One variant per spec.md §6 operation. Aliases (`ps`, `kill`, `killall`,
/// `netstat`, `status`) are resolved to these variants at the CLI/transport
/// boundary, not here — the dispatcher only ever sees the canonical name.
#[derive(Debug, Deserialize)]
#[serde(tag = "tool", rename_all = "snake_case")]
pub enum ToolRequest {
    FindProcess {
        name: String,
        #[serde(default)]
        mode: DetailTier,
        #[serde(default)]
        include_args: bool,
    },
    KillProcess {
        pid: u32,
        #[serde(default)]
        force: bool,
        #[serde(default)]
        #[serde(rename = "override")]
        override_user_spawn: bool,
        #[serde(default)]
        dry_run: bool,
    },
    KillProcessTree {
        pid: u32,
        #[serde(default)]
        force: bool,
        #[serde(default)]
        dry_run: bool,
    },
    CheckPorts {
        port: Option<u16>,
    },
    DevStatus,
    ServerStatus,
    FindProcessByPort {
        port: u16,
    },
    CleanupUserProcesses {
        confirm: bool,
    },
}

pub fn dispatch(state: &ServerState, request: ToolRequest) -> String {
    let start = Instant::now();
    match run(state, request) {
        Ok((name, json, dry_run, outcome_label)) => {
            auditlog::record(name, start.elapsed().as_secs_f64(), outcome_label, dry_run);
            json
        }
        Err((name, err)) => {
            let elapsed = start.elapsed().as_secs_f64();
            let code = err.code().to_string();
            let response: ErrorResponse = err.into_response("error", elapsed);
            auditlog::record(name, elapsed, &code, false);
            serde_json::to_string(&response).expect("error envelope serialization cannot fail")
        }
    }
}

type DispatchOk = (&'static str, String, bool, &'static str);
type DispatchErr = (&'static str, CoreError);

fn run(state: &ServerState, request: ToolRequest) -> Result<DispatchOk, DispatchErr> {
    let start = Instant::now();
    match request {
        ToolRequest::FindProcess { name, mode, include_args } => {
            let inspector = ProcessInspector::new(state.config.clone());
            let result = inspector.find(
                state.enumerator.as_ref(),
                &state.classifier,
                &state.registry,
                SearchParams { query: &name, mode, include_args },
            );
            match result {
                Ok(processes) => {
                    let count = processes.len();
                    let response = Response::new("find_process", start.elapsed().as_secs_f64(), FindProcessData { processes, count });
                    Ok(("find_process", to_json(&response), false, "ok"))
                }
                Err(InspectError::QueryTooShort) => Err((
                    "find_process",
                    CoreError::InvalidArgument { message: "query must be at least 2 characters unless it is an exact pid".to_string() },
                )),
            }
        }

        ToolRequest::KillProcess { pid, force, override_user_spawn, dry_run } => {
            let engine = TerminationEngine::new(&state.config);
            let result = engine.kill_one(
                state.enumerator.as_ref(),
                &state.classifier,
                &state.registry,
                state.killer.as_ref(),
                pid,
                KillOneFlags { force, override_user_spawn, dry_run },
            );
            match result {
                Ok(KillOneResult::Killed(outcome)) => {
                    state.registry.mark_killed(outcome.pid);
                    let response = Response::new(
                        "kill_process",
                        start.elapsed().as_secs_f64(),
                        KillProcessData { pid: outcome.pid, message: outcome.message, method: method_label(outcome.method).to_string() },
                    );
                    Ok(("kill_process", to_json(&response), false, "ok"))
                }
                Ok(KillOneResult::DryRun(outcome)) => {
                    let response = Response::new(
                        "kill_process",
                        start.elapsed().as_secs_f64(),
                        DryRunKillData {
                            pid: outcome.pid,
                            would_kill: outcome.would_kill,
                            method: method_label(outcome.method).to_string(),
                            dry_run: true,
                        },
                    );
                    Ok(("kill_process", to_json(&response), true, "dry_run"))
                }
                Err(err) => Err(("kill_process", err)),
            }
        }

        ToolRequest::KillProcessTree { pid, force, dry_run } => {
            let engine = TerminationEngine::new(&state.config);
            let result = engine.kill_tree(
                state.enumerator.as_ref(),
                &state.classifier,
                &state.registry,
                state.killer.as_ref(),
                pid,
                KillTreeFlags { force, dry_run },
            );
            match result {
                Ok(KillTreeResult::Killed(outcome)) => {
                    for p in &outcome.tree {
                        state.registry.mark_killed(p.pid);
                    }
                    let response = Response::new(
                        "kill_process_tree",
                        start.elapsed().as_secs_f64(),
                        KillProcessTreeData {
                            processes_killed: outcome.processes_killed,
                            tree: outcome.tree,
                            method: outcome.method.to_string(),
                        },
                    );
                    Ok(("kill_process_tree", to_json(&response), false, "ok"))
                }
                Ok(KillTreeResult::DryRun { tree, method }) => {
                    let response = Response::new(
                        "kill_process_tree",
                        start.elapsed().as_secs_f64(),
                        KillProcessTreeData { processes_killed: tree.len(), tree, method: method.to_string() },
                    );
                    Ok(("kill_process_tree", to_json(&response), true, "dry_run"))
                }
                Err(err) => Err(("kill_process_tree", err)),
            }
        }

        ToolRequest::CheckPorts { port } => {
            let scanner = PortScanner::new(&state.config);
            let ports = scanner.scan(state.port_reader.as_ref(), state.enumerator.as_ref(), port.map(|p| vec![p]));
            let developer_hints = scanner.developer_hints(&ports, &state.registry);
            let response = Response::new("check_ports", start.elapsed().as_secs_f64(), CheckPortsData { ports, developer_hints });
            Ok(("check_ports", to_json(&response), false, "ok"))
        }

        ToolRequest::DevStatus => {
            let scanner = PortScanner::new(&state.config);
            let ports = scanner.scan(state.port_reader.as_ref(), state.enumerator.as_ref(), None);
            let user_processes = state.registry.snapshot();
            let user_process_count = user_processes.len();
            let inspector = ProcessInspector::new(state.config.clone());
            let mcp_matches = inspector.find(
                state.enumerator.as_ref(),
                &state.classifier,
                &state.registry,
                SearchParams { query: "mcp", mode: DetailTier::Quick, include_args: true },
            );
            let (mcp_healthy, mcp_server_count) = match mcp_matches {
                Ok(procs) => (!procs.is_empty(), procs.len()),
                Err(_) => (false, 0),
            };
            let response = Response::new(
                "dev_status",
                start.elapsed().as_secs_f64(),
                DevStatusData {
                    ports,
                    user_processes,
                    user_process_count,
                    mcp_healthy,
                    mcp_server_count,
                    timestamp: crate::platform::enumerator::now_unix_seconds(),
                },
            );
            Ok(("dev_status", to_json(&response), false, "ok"))
        }

        ToolRequest::ServerStatus => {
            let scanner = PortScanner::new(&state.config);
            let port_status = scanner.scan(state.port_reader.as_ref(), state.enumerator.as_ref(), None);
            let developer_hints = scanner.developer_hints(&port_status, &state.registry);
            let managed_servers = state.registry.snapshot();
            let response = Response::new(
                "server_status",
                start.elapsed().as_secs_f64(),
                ServerStatusData { managed_servers, port_status, developer_hints },
            );
            Ok(("server_status", to_json(&response), false, "ok"))
        }

        ToolRequest::FindProcessByPort { port } => {
            let scanner = PortScanner::new(&state.config);
            let ports = scanner.scan(state.port_reader.as_ref(), state.enumerator.as_ref(), Some(vec![port]));
            let process = ports
                .get(&port.to_string())
                .and_then(|entry| entry.owning_process.as_ref())
                .and_then(|summary| state.enumerator.snapshot_one(summary.pid))
                .map(|snapshot| {
                    let verdict = state.classifier.classify_snapshot(state.enumerator.as_ref(), &snapshot);
                    crate::schema::ProcessDescriptor {
                        pid: snapshot.pid,
                        name: snapshot.name.clone(),
                        command_line: snapshot.command_line.clone(),
                        cwd: snapshot.cwd.clone(),
                        parent_pid: snapshot.parent_pid,
                        created_at: snapshot.created_at,
                        memory_bytes: snapshot.memory_bytes,
                        memory_mb: crate::schema::memory_mb(snapshot.memory_bytes),
                        memory_human: crate::schema::memory_human(snapshot.memory_bytes),
                        cpu_percent: None,
                        thread_count: snapshot.thread_count,
                        children: state.enumerator.children_map().get(&snapshot.pid).cloned(),
                        protected: verdict.protected,
                        user_spawned: state.registry.contains(snapshot.pid),
                        protection_reason: verdict.reason,
                    }
                });
            let response = Response::new("find_process_by_port", start.elapsed().as_secs_f64(), FindProcessByPortData { process });
            Ok(("find_process_by_port", to_json(&response), false, "ok"))
        }

        ToolRequest::CleanupUserProcesses { confirm } => {
            if !confirm {
                let response = Response::new(
                    "cleanup_user_processes",
                    start.elapsed().as_secs_f64(),
                    CleanupUserProcessesData { confirmed: false, processes_killed: 0, killed: vec![], skipped: vec![] },
                );
                return Ok(("cleanup_user_processes", to_json(&response), false, "not_confirmed"));
            }

            let engine = TerminationEngine::new(&state.config);
            let mut killed = Vec::new();
            let mut skipped = Vec::new();
            for record in state.registry.snapshot() {
                if record.status != crate::schema::SpawnStatus::Running {
                    continue;
                }
                let name = state.enumerator.snapshot_one(record.pid).map(|s| s.name).unwrap_or_default();
                let result = engine.kill_one(
                    state.enumerator.as_ref(),
                    &state.classifier,
                    &state.registry,
                    state.killer.as_ref(),
                    record.pid,
                    KillOneFlags { force: true, override_user_spawn: true, dry_run: false },
                );
                match result {
                    Ok(KillOneResult::Killed(_)) => {
                        state.registry.mark_killed(record.pid);
                        killed.push(PidName { pid: record.pid, name });
                    }
                    _ => skipped.push(PidName { pid: record.pid, name }),
                }
            }
            let response = Response::new(
                "cleanup_user_processes",
                start.elapsed().as_secs_f64(),
                CleanupUserProcessesData { confirmed: true, processes_killed: killed.len(), killed, skipped },
            );
            Ok(("cleanup_user_processes", to_json(&response), false, "ok"))
        }
    }
}

fn method_label(method: TerminationMethod) -> &'static str {
    match method {
        TerminationMethod::Graceful => "Graceful",
        TerminationMethod::Forceful => "Forceful",
        TerminationMethod::AlreadyExited => "AlreadyExited",
    }
}

fn to_json(response: &Response<impl Serialize>) -> String {
    serde_json::to_string(response).expect("response envelope serialization cannot fail")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::enumerator::fake::FakeEnumerator;
    use crate::platform::killer::fake::FakeKiller;
    use crate::platform::ports::fake::FakePortTableReader;
    use crate::platform::ProcessSnapshot;
    use std::sync::Arc;

    fn snap(pid: u32, name: &str) -> ProcessSnapshot {
        ProcessSnapshot {
            pid,
            parent_pid: Some(1),
            name: name.to_string(),
            command_line: name.to_string(),
            cwd: None,
            created_at: 1.0,
            memory_bytes: 1024 * 1024,
            cpu_percent: 0.0,
            thread_count: 1,
        }
    }

    fn test_state(processes: Vec<ProcessSnapshot>) -> ServerState {
        ServerState::with_platform(
            crate::config::Config::default(),
            Arc::new(FakeEnumerator::new(processes)),
            Arc::new(FakeKiller::with_alive([])),
            Arc::new(FakePortTableReader::new(vec![])),
        )
    }

    #[test]
    fn find_process_round_trips_through_dispatch() {
        let state = test_state(vec![snap(10, "node.exe")]);
        let json = dispatch(
            &state,
            ToolRequest::FindProcess { name: "node".to_string(), mode: DetailTier::Quick, include_args: false },
        );
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "find_process");
        assert_eq!(value["count"], 1);
    }

    #[test]
    fn find_process_too_short_query_returns_error_envelope() {
        let state = test_state(vec![]);
        let json = dispatch(&state, ToolRequest::FindProcess { name: "a".to_string(), mode: DetailTier::Smart, include_args: false });
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["success"], false);
        assert_eq!(value["error"]["code"], "invalid_argument");
        assert!(!value["error"]["suggestion"].as_str().unwrap().is_empty());
    }

    #[test]
    fn kill_process_not_found_returns_error_envelope() {
        let state = test_state(vec![]);
        let json = dispatch(&state, ToolRequest::KillProcess { pid: 404, force: false, override_user_spawn: false, dry_run: false });
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["error"]["code"], "process_not_found");
    }

    #[test]
    fn cleanup_user_processes_without_confirm_is_a_no_op() {
        let state = test_state(vec![]);
        let json = dispatch(&state, ToolRequest::CleanupUserProcesses { confirm: false });
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["confirmed"], false);
        assert_eq!(value["processes_killed"], 0);
    }
}
