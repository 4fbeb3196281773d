//! Shared JSON output schema types for secure-dev-manager.
//!
//! All stdout output is JSON only. Tracing logs go to stderr (see
//! `main.rs`) and to the debug log file (see `auditlog.rs`). Schema version
//! is fixed at "0.1".

use serde::{Deserialize, Serialize};

pub const SCHEMA_VERSION: &str = "0.1";

/// Serialize `value` to a JSON string and print it as a single line to stdout.
///
/// Single chokepoint for stdout JSON output, so the stdout-is-JSON-only
/// contract holds uniformly across every response type.
fn print_json_to_stdout(value: &impl Serialize) {
    println!("{}", serde_json::to_string(value).expect("JSON serialization failed"));
}

/// Top-level envelope used for every successful response (spec.md §6).
#[derive(Debug, Serialize, Deserialize)]
pub struct Response<T: Serialize> {
    pub schema_version: &'static str,
    pub success: bool,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub elapsed_seconds: f64,
    #[serde(flatten)]
    pub data: T,
}

impl<T: Serialize> Response<T> {
    pub fn new(kind: &'static str, elapsed_seconds: f64, data: T) -> Self {
        Response { schema_version: SCHEMA_VERSION, success: true, kind, elapsed_seconds, data }
    }

    pub fn print(&self) {
        print_json_to_stdout(self);
    }
}

/// Top-level envelope for error responses (spec.md §6, §7).
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub schema_version: &'static str,
    pub success: bool,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub elapsed_seconds: f64,
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    /// A concrete next action the caller can take (spec.md §7 hard requirement:
    /// "no error may be returned without a concrete remediation suggestion").
    pub suggestion: String,
    /// Why the guard that produced this error exists.
    pub developer_hint: String,
}

impl ErrorResponse {
    pub fn new(
        kind: &'static str,
        elapsed_seconds: f64,
        code: impl Into<String>,
        message: impl Into<String>,
        suggestion: impl Into<String>,
        developer_hint: impl Into<String>,
    ) -> Self {
        ErrorResponse {
            schema_version: SCHEMA_VERSION,
            success: false,
            kind,
            elapsed_seconds,
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                suggestion: suggestion.into(),
                developer_hint: developer_hint.into(),
            },
        }
    }

    pub fn print(&self) {
        print_json_to_stdout(self);
    }
}

// ---------- Process data model (spec.md §3) ----------

/// Detail tier for process enumeration (spec.md §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetailTier {
    Instant,
    Quick,
    Smart,
    Full,
}

impl Default for DetailTier {
    fn default() -> Self {
        DetailTier::Smart
    }
}

/// Why the Protection Classifier protected (or didn't protect) a process
/// (spec.md §3, §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtectionReason {
    NotProtected,
    PatternMatch,
    ParentProtected,
    ChildProtected,
    ScriptContent,
    SystemCritical,
    /// Fail-safe: the classifier could not resolve the question (denied
    /// access, race with process exit) and defaulted to Protected.
    Unknown,
}

/// The Protection Classifier's verdict for one PID at a point in time
/// (spec.md §3 "Protection verdict").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtectionVerdict {
    pub protected: bool,
    pub reason: ProtectionReason,
    /// Seconds since the Unix epoch.
    pub decided_at: f64,
}

/// The canonical process snapshot exposed to callers (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessDescriptor {
    pub pid: u32,
    pub name: String,
    pub command_line: String,
    pub cwd: Option<String>,
    pub parent_pid: Option<u32>,
    /// Seconds since the Unix epoch.
    pub created_at: f64,
    pub memory_bytes: u64,
    pub memory_mb: f64,
    pub memory_human: String,
    pub cpu_percent: Option<f32>,
    pub thread_count: u32,
    pub children: Option<Vec<u32>>,
    pub protected: bool,
    pub user_spawned: bool,
    pub protection_reason: ProtectionReason,
}

/// Status of a watched development port (spec.md §3 "Port entry").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortStatus {
    Active,
    Inactive,
    Unknown,
}

/// Condensed process summary attached to a `PortEntry` (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortProcessSummary {
    pub pid: u32,
    pub name: String,
    pub children_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortEntry {
    pub port: u16,
    pub service_label: String,
    pub status: PortStatus,
    pub owning_process: Option<PortProcessSummary>,
    pub extra_processes: Vec<u32>,
}

/// Lifecycle status of a server-spawned process (spec.md §3 "Spawn record").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpawnStatus {
    Running,
    Exited,
    Killed,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpawnRecordSummary {
    pub pid: u32,
    pub wrapper_pid: Option<u32>,
    /// Seconds since the Unix epoch.
    pub started_at: f64,
    pub command: String,
    pub cwd: Option<String>,
    pub has_group: bool,
    pub status: SpawnStatus,
    pub exit_code: Option<i32>,
}

/// PID/name pair used in `kill_process_tree`'s `tree` field (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PidName {
    pub pid: u32,
    pub name: String,
}

// ---------- Per-operation payloads (spec.md §6) ----------

#[derive(Debug, Serialize, Deserialize)]
pub struct FindProcessData {
    pub processes: Vec<ProcessDescriptor>,
    pub count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct KillProcessData {
    pub pid: u32,
    pub message: String,
    pub method: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DryRunKillData {
    pub pid: u32,
    pub would_kill: Vec<PidName>,
    pub method: String,
    pub dry_run: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct KillProcessTreeData {
    pub processes_killed: usize,
    pub tree: Vec<PidName>,
    pub method: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CheckPortsData {
    pub ports: std::collections::BTreeMap<String, PortEntry>,
    pub developer_hints: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DevStatusData {
    pub ports: std::collections::BTreeMap<String, PortEntry>,
    pub user_processes: Vec<SpawnRecordSummary>,
    pub user_process_count: usize,
    pub mcp_healthy: bool,
    pub mcp_server_count: usize,
    /// Seconds since the Unix epoch.
    pub timestamp: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ServerStatusData {
    pub managed_servers: Vec<SpawnRecordSummary>,
    pub port_status: std::collections::BTreeMap<String, PortEntry>,
    pub developer_hints: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FindProcessByPortData {
    pub process: Option<ProcessDescriptor>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CleanupUserProcessesData {
    pub confirmed: bool,
    pub processes_killed: usize,
    pub killed: Vec<PidName>,
    pub skipped: Vec<PidName>,
}

/// Human-readable memory string (spec.md §6 "Memory formatting").
///
/// `< 1024 MB` -> `"<n.n> MB"`, `>= 1024 MB` -> `"<n.nn> GB"`, both computed
/// with base-2 division.
pub fn memory_human(bytes: u64) -> String {
    let mb = bytes as f64 / (1024.0 * 1024.0);
    if mb < 1024.0 {
        format!("{mb:.1} MB")
    } else {
        format!("{:.2} GB", mb / 1024.0)
    }
}

/// `memory_mb` as exposed on `ProcessDescriptor`: base-2 megabytes, two
/// decimals (spec.md §6).
pub fn memory_mb(bytes: u64) -> f64 {
    let mb = bytes as f64 / (1024.0 * 1024.0);
    (mb * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_human_below_1024_mb_uses_mb() {
        assert_eq!(memory_human(500 * 1024 * 1024), "500.0 MB");
    }

    #[test]
    fn memory_human_at_or_above_1024_mb_uses_gb() {
        assert_eq!(memory_human(1024 * 1024 * 1024), "1.00 GB");
        assert_eq!(memory_human(2 * 1024 * 1024 * 1024 + 512 * 1024 * 1024), "2.50 GB");
    }

    #[test]
    fn memory_human_is_monotonic_with_bytes() {
        // Property from spec.md §8 invariant 6.
        let samples: [u64; 5] =
            [0, 512 * 1024 * 1024, 1024 * 1024 * 1024, 3 * 1024 * 1024 * 1024, 10 * 1024 * 1024 * 1024];
        fn parse_unit(s: &str) -> f64 {
            let parts: Vec<&str> = s.split_whitespace().collect();
            let value: f64 = parts[0].parse().unwrap();
            if parts[1] == "GB" { value * 1024.0 } else { value }
        }
        let mut last = f64::MIN;
        for &b in &samples {
            let parsed = parse_unit(&memory_human(b));
            assert!(parsed >= last - 0.01, "memory_human not monotonic at {b} bytes");
            last = parsed;
        }
    }

    #[test]
    fn response_envelope_round_trips() {
        let resp = Response::new("find_process", 0.012, FindProcessData { processes: vec![], count: 0 });
        let json = serde_json::to_string(&resp).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["schema_version"], "0.1");
        assert_eq!(value["success"], true);
        assert_eq!(value["type"], "find_process");
        assert_eq!(value["count"], 0);
    }

    #[test]
    fn error_response_always_carries_suggestion_and_hint() {
        let err = ErrorResponse::new(
            "error",
            0.001,
            "process_not_found",
            "pid 123 does not exist",
            "re-check the pid with find_process before retrying",
            "the process may have already exited",
        );
        let json = serde_json::to_string(&err).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(!value["error"]["suggestion"].as_str().unwrap().is_empty());
        assert!(!value["error"]["developer_hint"].as_str().unwrap().is_empty());
    }
}
