//! The Process Inspector (spec.md §4.2).
//!
//! Two-pass enumeration is the core performance invariant: pass 1 only
//! fetches cheap fields and applies the name/PID predicate; pass 2 enriches
//! only the survivors with whatever the requested tier demands. Memory, CPU,
//! and children are never computed for processes that don't match.

use crate::config::Config;
use crate::platform::{ProcessEnumerator, ProcessSnapshot};
use crate::protection::ProtectionClassifier;
use crate::schema::{memory_human, memory_mb, DetailTier, ProcessDescriptor};
use crate::spawn::SpawnRegistry;
use std::collections::HashMap;

#[derive(Debug)]
pub enum InspectError {
    QueryTooShort,
}

pub struct SearchParams<'a> {
    pub query: &'a str,
    pub mode: DetailTier,
    pub include_args: bool,
}

/// A process matches either by exact PID equality or by substring on name
/// (or command line, if `include_args`); spec.md §4.2 "Search semantics".
fn matches(snapshot: &ProcessSnapshot, params: &SearchParams, query_is_pid: Option<u32>) -> bool {
    if let Some(pid) = query_is_pid {
        return snapshot.pid == pid;
    }
    let query_lower = params.query.to_ascii_lowercase();
    let exe_base = snapshot.name.to_ascii_lowercase();
    if exe_base.contains(&query_lower) {
        return true;
    }
    if params.include_args {
        return snapshot.command_line.to_ascii_lowercase().contains(&query_lower);
    }
    false
}

pub struct ProcessInspector {
    config: Config,
}

impl ProcessInspector {
    pub fn new(config: Config) -> Self {
        ProcessInspector { config }
    }

    /// Run `find_process` (spec.md §4.2, §6).
    pub fn find(
        &self,
        enumerator: &dyn ProcessEnumerator,
        classifier: &ProtectionClassifier,
        registry: &SpawnRegistry,
        params: SearchParams,
    ) -> Result<Vec<ProcessDescriptor>, InspectError> {
        let query_is_pid = params.query.parse::<u32>().ok();
        if query_is_pid.is_none() && params.query.chars().count() < crate::config::MIN_QUERY_LEN {
            return Err(InspectError::QueryTooShort);
        }

        // Pass 1: cheap fields only (name, cmdline already present on the
        // snapshot; children/cpu/memory are deliberately not read here).
        let all = enumerator.snapshot_all(false);
        let mut matched: Vec<ProcessSnapshot> =
            all.into_iter().filter(|p| matches(p, &params, query_is_pid)).collect();

        let effective_tier = self.resolve_effective_tier(params.mode, &matched);

        if effective_tier == DetailTier::Full {
            // Full tier needs sampled CPU usage; re-fetch with sampling for
            // just the survivors' pids by re-snapshotting with CPU enabled.
            let sampled = enumerator.snapshot_all(true);
            let by_pid: HashMap<u32, ProcessSnapshot> = sampled.into_iter().map(|p| (p.pid, p)).collect();
            for m in matched.iter_mut() {
                if let Some(fresh) = by_pid.get(&m.pid) {
                    m.cpu_percent = fresh.cpu_percent;
                }
            }
        }

        let children_map = if matches!(effective_tier, DetailTier::Smart | DetailTier::Full) {
            Some(enumerator.children_map())
        } else {
            None
        };

        let mut descriptors: Vec<ProcessDescriptor> = matched
            .into_iter()
            .map(|snapshot| {
                self.to_descriptor(enumerator, classifier, registry, &snapshot, effective_tier, &children_map)
            })
            .collect();

        // spec.md §4.2 "Output ordering": protected first, then name asc,
        // then pid asc; stable across equal keys.
        descriptors.sort_by(|a, b| {
            b.protected
                .cmp(&a.protected)
                .then_with(|| a.name.to_ascii_lowercase().cmp(&b.name.to_ascii_lowercase()))
                .then_with(|| a.pid.cmp(&b.pid))
        });

        Ok(descriptors)
    }

    /// Apply the browser-like downgrade heuristic (spec.md §4.2 "Smart heuristic").
    fn resolve_effective_tier(&self, requested: DetailTier, matched: &[ProcessSnapshot]) -> DetailTier {
        if requested != DetailTier::Smart {
            return requested;
        }
        let looks_browser_like = matched.len() > crate::config::BROWSER_DOWNGRADE_THRESHOLD
            && matched.iter().any(|p| {
                self.config.browser_names.iter().any(|b| b.eq_ignore_ascii_case(&p.name))
            });
        if looks_browser_like {
            DetailTier::Quick
        } else {
            DetailTier::Smart
        }
    }

    fn to_descriptor(
        &self,
        enumerator: &dyn ProcessEnumerator,
        classifier: &ProtectionClassifier,
        registry: &SpawnRegistry,
        snapshot: &ProcessSnapshot,
        tier: DetailTier,
        children_map: &Option<HashMap<u32, Vec<u32>>>,
    ) -> ProcessDescriptor {
        let verdict = if tier == DetailTier::Instant {
            // Instant tier's latency budget (50ms) does not afford even a
            // pattern-match classification pass across hundreds of matches;
            // the descriptor omits protection detail entirely at this tier.
            None
        } else {
            Some(classifier.classify_snapshot(enumerator, snapshot))
        };

        let children = children_map
            .as_ref()
            .and_then(|m| m.get(&snapshot.pid))
            .filter(|_| tier == DetailTier::Full || tier == DetailTier::Smart)
            .cloned();

        let (memory_bytes, cpu_percent, thread_count) = match tier {
            DetailTier::Instant => (0, None, 0),
            DetailTier::Quick => (snapshot.memory_bytes, None, snapshot.thread_count),
            DetailTier::Smart => (snapshot.memory_bytes, None, snapshot.thread_count),
            DetailTier::Full => (snapshot.memory_bytes, Some(snapshot.cpu_percent), snapshot.thread_count),
        };

        ProcessDescriptor {
            pid: snapshot.pid,
            name: snapshot.name.clone(),
            command_line: if tier == DetailTier::Instant { String::new() } else { snapshot.command_line.clone() },
            cwd: if tier == DetailTier::Full { snapshot.cwd.clone() } else { None },
            parent_pid: snapshot.parent_pid,
            created_at: snapshot.created_at,
            memory_bytes,
            memory_mb: memory_mb(memory_bytes),
            memory_human: memory_human(memory_bytes),
            cpu_percent,
            thread_count,
            children,
            protected: verdict.map(|v| v.protected).unwrap_or(false),
            user_spawned: registry.contains(snapshot.pid),
            protection_reason: verdict.map(|v| v.reason).unwrap_or(crate::schema::ProtectionReason::NotProtected),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::enumerator::fake::FakeEnumerator;

    fn snap(pid: u32, name: &str, cmd: &str) -> ProcessSnapshot {
        ProcessSnapshot {
            pid,
            parent_pid: Some(1),
            name: name.to_string(),
            command_line: cmd.to_string(),
            cwd: Some("C:\\work".to_string()),
            created_at: 500.0,
            memory_bytes: 10 * 1024 * 1024,
            cpu_percent: 1.5,
            thread_count: 4,
        }
    }

    #[test]
    fn query_shorter_than_two_chars_is_rejected() {
        let inspector = ProcessInspector::new(Config::default());
        let enumerator = FakeEnumerator::new(vec![]);
        let classifier = ProtectionClassifier::new(Config::default());
        let registry = SpawnRegistry::new_for_test();
        let result = inspector.find(
            &enumerator,
            &classifier,
            &registry,
            SearchParams { query: "a", mode: DetailTier::Smart, include_args: false },
        );
        assert!(matches!(result, Err(InspectError::QueryTooShort)));
    }

    #[test]
    fn exact_pid_query_matches_by_pid_regardless_of_name() {
        let inspector = ProcessInspector::new(Config::default());
        let enumerator = FakeEnumerator::new(vec![snap(4242, "weird.exe", "weird.exe")]);
        let classifier = ProtectionClassifier::new(Config::default());
        let registry = SpawnRegistry::new_for_test();
        let result = inspector
            .find(
                &enumerator,
                &classifier,
                &registry,
                SearchParams { query: "4242", mode: DetailTier::Quick, include_args: false },
            )
            .unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].pid, 4242);
    }

    #[test]
    fn instant_tier_only_populates_pid_and_name() {
        let inspector = ProcessInspector::new(Config::default());
        let enumerator = FakeEnumerator::new(vec![snap(10, "node.exe", "node server.js")]);
        let classifier = ProtectionClassifier::new(Config::default());
        let registry = SpawnRegistry::new_for_test();
        let result = inspector
            .find(
                &enumerator,
                &classifier,
                &registry,
                SearchParams { query: "node", mode: DetailTier::Instant, include_args: false },
            )
            .unwrap();
        assert_eq!(result[0].memory_bytes, 0);
        assert_eq!(result[0].command_line, "");
        assert!(result[0].children.is_none());
    }

    #[test]
    fn smart_tier_downgrades_for_large_browser_match_sets() {
        let inspector = ProcessInspector::new(Config::default());
        let mut snapshots: Vec<ProcessSnapshot> =
            (0..25).map(|i| snap(100 + i, "chrome.exe", "chrome.exe --tab")).collect();
        snapshots.push(snap(1, "init.exe", "init.exe"));
        let enumerator = FakeEnumerator::new(snapshots);
        let classifier = ProtectionClassifier::new(Config::default());
        let registry = SpawnRegistry::new_for_test();
        let result = inspector
            .find(
                &enumerator,
                &classifier,
                &registry,
                SearchParams { query: "chrome", mode: DetailTier::Smart, include_args: false },
            )
            .unwrap();
        assert_eq!(result.len(), 25);
        assert!(result.iter().all(|d| d.children.is_none()));
    }

    #[test]
    fn ordering_is_protected_first_then_name_then_pid() {
        let inspector = ProcessInspector::new(Config::default());
        let enumerator = FakeEnumerator::new(vec![
            snap(30, "zeta.exe", "zeta.exe"),
            snap(20, "alpha_mcp.exe", "alpha_mcp.exe"),
            snap(10, "alpha.exe", "alpha.exe"),
        ]);
        let classifier = ProtectionClassifier::new(Config::default());
        let registry = SpawnRegistry::new_for_test();
        let result = inspector
            .find(
                &enumerator,
                &classifier,
                &registry,
                SearchParams { query: "alpha", mode: DetailTier::Quick, include_args: false },
            )
            .unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].name, "alpha_mcp.exe");
        assert!(result[0].protected);
    }
}
