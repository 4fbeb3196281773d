//! Append-only debug log file (spec.md §6 "Environment").
//!
//! One line per operation, matching the `tracing-appender` non-blocking
//! rolling-file pattern: a dedicated `tracing` target (`"audit"`) is routed
//! to the debug log file while everything else goes to stderr (see
//! `main.rs`). This module only defines the record shape and the helper
//! that emits it; subscriber wiring lives in `main.rs`.

use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct AuditRecord<'a> {
    pub timestamp: f64,
    pub tool: &'a str,
    pub elapsed_seconds: f64,
    pub outcome: &'a str,
    /// spec.md §9: dry-run actions are logged explicitly as dry-run so the
    /// audit trail never implies an action happened when it didn't.
    pub dry_run: bool,
}

/// Emit one audit line via `tracing`. The `audit` target is what `main.rs`'s
/// file appender filters on.
pub fn record(tool: &str, elapsed_seconds: f64, outcome: &str, dry_run: bool) {
    let entry = AuditRecord { timestamp: crate::platform::enumerator::now_unix_seconds(), tool, elapsed_seconds, outcome, dry_run };
    tracing::info!(
        target: "audit",
        timestamp = entry.timestamp,
        tool = entry.tool,
        elapsed_seconds = entry.elapsed_seconds,
        outcome = entry.outcome,
        dry_run = entry.dry_run,
        "operation completed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audit_record_serializes_with_dry_run_flag() {
        let record = AuditRecord { timestamp: 1.0, tool: "kill_process", elapsed_seconds: 0.01, outcome: "dry_run", dry_run: true };
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"dry_run\":true"));
    }
}
