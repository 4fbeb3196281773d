//! Fixed, startup-resolved configuration for the process-management core.
//!
//! Nothing here is re-read after `Config::resolve()` returns: spec.md §6
//! requires "no on-disk persisted state", so the only inputs are CLI flags
//! and environment variables, resolved once the way
//! `jobstore::resolve_root` resolves the jobs root in the teacher crate.

use std::time::Duration;

/// Development ports watched by default (spec.md §3, "Dev ports").
pub const DEFAULT_WATCHED_PORTS: &[u16] = &[3000, 5000, 8000, 8080, 5173, 4200];

/// Tier-1 infrastructure substring tokens (spec.md §4.1).
pub const DEFAULT_PROTECTED_TOKENS: &[&str] = &["mcp", "secure_mcp", "claude", "api-toolbox"];

/// System-critical process names that are always protected (spec.md §4.1).
pub const DEFAULT_SYSTEM_CRITICAL_NAMES: &[&str] =
    &["System", "csrss.exe", "winlogon.exe", "services.exe", "lsass.exe", "smss.exe"];

/// Executable base names considered "browser-like" for the `Smart` tier
/// downgrade heuristic (spec.md §4.2). Kept as configuration, not a
/// hardcoded match arm, per spec.md §9's note that the exact set is not
/// authoritative.
pub const DEFAULT_BROWSER_NAMES: &[&str] = &["chrome.exe", "msedge.exe", "firefox.exe"];

/// Match-set size above which the browser-like heuristic can fire (spec.md §4.2).
pub const BROWSER_DOWNGRADE_THRESHOLD: usize = 20;

/// Protection cache TTL (spec.md §4.1).
pub const PROTECTION_CACHE_TTL: Duration = Duration::from_secs(10);

/// Protection cache maximum entry count before LRU eviction (spec.md §4.1).
pub const PROTECTION_CACHE_CAPACITY: usize = 256;

/// Maximum ancestor hops walked during Tier-3 deep inspection (spec.md §4.1).
pub const MAX_ANCESTOR_DEPTH: usize = 8;

/// Spawn registry reaper poll interval (spec.md §5).
pub const REGISTRY_REAP_INTERVAL: Duration = Duration::from_secs(1);

/// Protection cache reaper sweep interval (spec.md §5).
pub const PROTECTION_REAP_INTERVAL: Duration = Duration::from_secs(5);

/// Port scan worker pool size cap (spec.md §4.3).
pub const PORT_SCAN_MAX_WORKERS: usize = 6;

/// Port scan total wall-clock budget (spec.md §4.3).
pub const PORT_SCAN_BUDGET: Duration = Duration::from_millis(500);

/// Graceful-termination grace period before forceful escalation, single-process
/// path (spec.md §4.5 kill-one step 6).
pub const GRACEFUL_WAIT_SINGLE: Duration = Duration::from_secs(3);

/// Forceful-termination wait, single-process path (spec.md §4.5 kill-one step 6).
pub const FORCEFUL_WAIT_SINGLE: Duration = Duration::from_secs(2);

/// Escalation delay for tree termination: graceful, then forceful if still
/// alive after this long (spec.md §4.5 kill-tree step 5).
pub const TREE_ESCALATION_WAIT: Duration = Duration::from_secs(1);

/// Maximum BFS depth when building a descendant set (spec.md §4.5 step 3).
pub const MAX_DESCENDANT_DEPTH: usize = 16;

/// Maximum descendant set size before the tree is rejected as too large
/// (spec.md §4.5 step 3, and the boundary test in spec.md §8).
pub const MAX_DESCENDANT_COUNT: usize = 1024;

/// Detail-tier latency budgets (spec.md §4.2), assuming a host with at most
/// this many processes.
pub const TIER_HOST_PROCESS_BUDGET: usize = 600;

/// Minimum length of a non-numeric search query (spec.md §4.2).
pub const MIN_QUERY_LEN: usize = 2;

/// Debug log file name (spec.md §6 "Environment").
pub const DEBUG_LOG_FILE_NAME: &str = "secure-dev-manager_debug.log";

/// Resolved, immutable configuration for one server lifetime.
#[derive(Debug, Clone)]
pub struct Config {
    pub watched_ports: Vec<u16>,
    pub protected_tokens: Vec<String>,
    pub system_critical_names: Vec<String>,
    pub browser_names: Vec<String>,
    pub debug_log_path: std::path::PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            watched_ports: DEFAULT_WATCHED_PORTS.to_vec(),
            protected_tokens: DEFAULT_PROTECTED_TOKENS.iter().map(|s| s.to_string()).collect(),
            system_critical_names: DEFAULT_SYSTEM_CRITICAL_NAMES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            browser_names: DEFAULT_BROWSER_NAMES.iter().map(|s| s.to_string()).collect(),
            debug_log_path: std::path::PathBuf::from(DEBUG_LOG_FILE_NAME),
        }
    }
}

impl Config {
    /// Resolve configuration for this process lifetime.
    ///
    /// Override chain, matching the shape of the teacher's
    /// `jobstore::resolve_root`: CLI flag wins, then environment variable,
    /// then the built-in default above.
    pub fn resolve(cli_protected_tokens: Option<Vec<String>>, cli_debug_log: Option<&str>) -> Self {
        let mut cfg = Config::default();

        if let Some(tokens) = cli_protected_tokens {
            cfg.protected_tokens = tokens;
        } else if let Ok(env_tokens) = std::env::var("SDM_PROTECTED_TOKENS") {
            cfg.protected_tokens = env_tokens
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        if let Some(path) = cli_debug_log {
            cfg.debug_log_path = std::path::PathBuf::from(path);
        } else if let Ok(env_path) = std::env::var("SDM_DEBUG_LOG") {
            cfg.debug_log_path = std::path::PathBuf::from(env_path);
        }

        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_watched_ports_match_spec() {
        assert_eq!(Config::default().watched_ports, vec![3000, 5000, 8000, 8080, 5173, 4200]);
    }

    #[test]
    fn cli_protected_tokens_override_default() {
        let cfg = Config::resolve(Some(vec!["only-this".to_string()]), None);
        assert_eq!(cfg.protected_tokens, vec!["only-this".to_string()]);
    }

    #[test]
    fn env_debug_log_used_when_no_cli_flag() {
        // SAFETY: test-only; not run in parallel with other env-mutating tests.
        unsafe {
            std::env::set_var("SDM_DEBUG_LOG", "/tmp/sdm-test-debug.log");
        }
        let cfg = Config::resolve(None, None);
        unsafe {
            std::env::remove_var("SDM_DEBUG_LOG");
        }
        assert_eq!(cfg.debug_log_path, std::path::PathBuf::from("/tmp/sdm-test-debug.log"));
    }
}
