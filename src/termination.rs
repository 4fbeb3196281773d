//! The Termination Engine (spec.md §4.5).
//!
//! Implements `kill_one` and `kill_tree`, including their dry-run variants,
//! as the state machine described in spec.md §4.5: Resolved -> Candidates
//! -> Terminating -> Terminated, with Rejected/DryRunReported/PartialFailure
//! as the other terminal states. None of the guards here are bypassable by
//! `force` or `override` — they gate entry into step 6, not its execution.

use crate::config::{self, Config};
use crate::error::CoreError;
use crate::platform::killer::TerminationMethod;
use crate::platform::{ProcessEnumerator, ProcessKiller};
use crate::protection::ProtectionClassifier;
use crate::schema::PidName;
use crate::spawn::SpawnRegistry;
use std::collections::{HashSet, VecDeque};
use std::time::Instant;

pub struct KillOneFlags {
    pub force: bool,
    pub override_user_spawn: bool,
    pub dry_run: bool,
}

pub struct KillOneOutcome {
    pub pid: u32,
    pub message: String,
    pub method: TerminationMethod,
}

pub struct DryRunOutcome {
    pub pid: u32,
    pub would_kill: Vec<PidName>,
    pub method: TerminationMethod,
}

pub struct KillTreeFlags {
    pub force: bool,
    pub dry_run: bool,
}

pub struct KillTreeOutcome {
    pub processes_killed: usize,
    pub tree: Vec<PidName>,
    pub method: &'static str,
}

pub enum KillOneResult {
    Killed(KillOneOutcome),
    DryRun(DryRunOutcome),
}

pub enum KillTreeResult {
    Killed(KillTreeOutcome),
    DryRun { tree: Vec<PidName>, method: &'static str },
}

pub struct TerminationEngine<'a> {
    #[allow(dead_code)]
    config: &'a Config,
}

impl<'a> TerminationEngine<'a> {
    pub fn new(config: &'a Config) -> Self {
        TerminationEngine { config }
    }

    /// `kill_process` (spec.md §4.5 "Kill-one contract").
    pub fn kill_one(
        &self,
        enumerator: &dyn ProcessEnumerator,
        classifier: &ProtectionClassifier,
        registry: &SpawnRegistry,
        killer: &dyn ProcessKiller,
        pid: u32,
        flags: KillOneFlags,
    ) -> Result<KillOneResult, CoreError> {
        // Step 1: resolve.
        let Some(snapshot) = enumerator.snapshot_one(pid) else {
            return Err(CoreError::ProcessNotFound { pid });
        };

        // Step 2: protection guard, never bypassable.
        let verdict = classifier.classify_snapshot(enumerator, &snapshot);
        if verdict.protected {
            return Err(CoreError::ProtectedProcess { pid, reason: verdict.reason });
        }

        // Step 3: user-spawn guard.
        if registry.contains(pid) && !flags.override_user_spawn {
            return Err(CoreError::UserSpawnedGuard { pid });
        }

        // Step 4: orphan-prevention guard, never bypassable by `force`.
        let children = enumerator.children_map().get(&pid).cloned().unwrap_or_default();
        if !children.is_empty() {
            return Err(CoreError::HasChildren { pid, child_count: children.len(), children });
        }

        let method = if flags.force { TerminationMethod::Forceful } else { TerminationMethod::Graceful };

        // Step 5: dry-run short-circuit.
        if flags.dry_run {
            return Ok(KillOneResult::DryRun(DryRunOutcome {
                pid,
                would_kill: vec![PidName { pid, name: snapshot.name.clone() }],
                method,
            }));
        }

        // Step 6: graceful, then (if force) forceful escalation.
        let already_gone = killer.terminate_graceful(pid).map_err(|e| map_kill_error(e, pid))?;
        if already_gone {
            classifier.invalidate(pid);
            return Ok(KillOneResult::Killed(KillOneOutcome {
                pid,
                message: format!("process {pid} had already exited"),
                method: TerminationMethod::AlreadyExited,
            }));
        }

        wait_for_exit(killer, pid, config::GRACEFUL_WAIT_SINGLE);
        if !killer.is_alive(pid) {
            classifier.invalidate(pid);
            return Ok(KillOneResult::Killed(KillOneOutcome {
                pid,
                message: format!("process {pid} terminated gracefully"),
                method: TerminationMethod::Graceful,
            }));
        }

        if !flags.force {
            return Err(CoreError::TerminationFailed { pid });
        }

        killer.kill_forceful(pid).map_err(|e| map_kill_error(e, pid))?;
        wait_for_exit(killer, pid, config::FORCEFUL_WAIT_SINGLE);
        if killer.is_alive(pid) {
            return Err(CoreError::TerminationFailed { pid });
        }

        classifier.invalidate(pid);
        Ok(KillOneResult::Killed(KillOneOutcome {
            pid,
            message: format!("process {pid} terminated forcefully"),
            method: TerminationMethod::Forceful,
        }))
    }

    /// `kill_process_tree` (spec.md §4.5 "Kill-tree contract").
    pub fn kill_tree(
        &self,
        enumerator: &dyn ProcessEnumerator,
        classifier: &ProtectionClassifier,
        registry: &SpawnRegistry,
        killer: &dyn ProcessKiller,
        pid: u32,
        flags: KillTreeFlags,
    ) -> Result<KillTreeResult, CoreError> {
        // Step 1: resolve root.
        let Some(root_snapshot) = enumerator.snapshot_one(pid) else {
            return Err(CoreError::ProcessNotFound { pid });
        };

        // Step 2: protection guard applies only to the root at this point.
        let root_verdict = classifier.classify_snapshot(enumerator, &root_snapshot);
        if root_verdict.protected {
            return Err(CoreError::ProtectedProcess { pid, reason: root_verdict.reason });
        }

        // Step 3: descendant set via capped BFS, visited-set keyed by
        // (pid, creation_time) so PID reuse mid-scan can't loop forever
        // (spec.md §9 Design Notes).
        let descendants = build_descendant_set(enumerator, pid, root_snapshot.created_at)?;

        for (descendant_pid, ref snapshot) in &descendants {
            let verdict = classifier.classify_snapshot(enumerator, snapshot);
            if verdict.protected {
                return Err(CoreError::ProtectedDescendant { pid: *descendant_pid, reason: verdict.reason });
            }
        }

        let mut tree: Vec<PidName> = vec![PidName { pid, name: root_snapshot.name.clone() }];
        tree.extend(descendants.iter().map(|(p, s)| PidName { pid: *p, name: s.name.clone() }));

        // Step 4: dry-run short-circuit. If the root has a tracked group
        // handle, the real kill will go through that atomic path instead of
        // a manual bottom-up walk (spec.md §4.5 step 5).
        let via_group = registry.has_group(pid);
        if flags.dry_run {
            let method = if via_group { "JobObject" } else { "Manual" };
            return Ok(KillTreeResult::DryRun { tree, method });
        }

        // Step 5: if the root has an associated group handle in the Spawn
        // Registry, terminate the group atomically instead of walking the
        // tree by hand.
        if via_group && registry.terminate_group(pid) {
            for pn in &tree {
                classifier.invalidate(pn.pid);
            }
            return Ok(KillTreeResult::Killed(KillTreeOutcome {
                processes_killed: tree.len(),
                tree,
                method: "JobObject",
            }));
        }

        // Otherwise terminate bottom-up (depth-descending), then the root.
        // Deepest descendants first avoids a parent's exit racing a child
        // into becoming briefly unreachable before it too is signalled.
        let mut ordered: Vec<(u32, usize)> =
            descendants.iter().map(|(p, _)| (*p, descendant_depth(enumerator, pid, *p))).collect();
        ordered.sort_by(|a, b| b.1.cmp(&a.1));

        let mut killed_pids = Vec::new();
        for (descendant_pid, _) in ordered {
            if terminate_with_escalation(killer, descendant_pid, flags.force) {
                killed_pids.push(descendant_pid);
            }
        }
        if terminate_with_escalation(killer, pid, flags.force) {
            killed_pids.push(pid);
        }

        for p in &killed_pids {
            classifier.invalidate(*p);
        }

        let killed_set: HashSet<u32> = killed_pids.into_iter().collect();
        let actually_killed: Vec<PidName> = tree.iter().filter(|pn| killed_set.contains(&pn.pid)).cloned().collect();

        Ok(KillTreeResult::Killed(KillTreeOutcome {
            processes_killed: actually_killed.len(),
            tree: actually_killed,
            method: "Manual",
        }))
    }
}

fn map_kill_error(err: crate::platform::killer::KillError, pid: u32) -> CoreError {
    match err {
        crate::platform::killer::KillError::PermissionDenied(_) => CoreError::PermissionDenied { pid },
        crate::platform::killer::KillError::Platform(message) => CoreError::Internal { message },
    }
}

fn wait_for_exit(killer: &dyn ProcessKiller, pid: u32, budget: std::time::Duration) {
    let deadline = Instant::now() + budget;
    while Instant::now() < deadline {
        if !killer.is_alive(pid) {
            return;
        }
        std::thread::sleep(std::time::Duration::from_millis(50));
    }
}

/// Graceful, then forceful-if-still-alive-after-1s-or-`force` escalation for
/// one pid in a tree kill (spec.md §4.5 step 5's "1-second rule"). When
/// `force` is set the 1s grace wait is skipped entirely, since the caller has
/// already opted into forceful termination.
fn terminate_with_escalation(killer: &dyn ProcessKiller, pid: u32, force: bool) -> bool {
    let already_gone = killer.terminate_graceful(pid).unwrap_or(true);
    if already_gone {
        return true;
    }
    if !force {
        wait_for_exit(killer, pid, config::TREE_ESCALATION_WAIT);
        if !killer.is_alive(pid) {
            return true;
        }
    }
    // Still alive past the 1s window, or `force` skipped the wait entirely:
    // escalate either way, per spec.md §4.5 step 5 ("if `force` or if still
    // alive after 1s").
    let _ = killer.kill_forceful(pid);
    !killer.is_alive(pid)
}

/// BFS the parent->children relation from `root`, capped at
/// `MAX_DESCENDANT_DEPTH` / `MAX_DESCENDANT_COUNT` (spec.md §4.5 step 3).
fn build_descendant_set(
    enumerator: &dyn ProcessEnumerator,
    root: u32,
    root_created_at: f64,
) -> Result<Vec<(u32, crate::platform::ProcessSnapshot)>, CoreError> {
    let children_map = enumerator.children_map();
    let mut visited: HashSet<(u32, u64)> = HashSet::new();
    visited.insert((root, root_created_at.to_bits()));
    let mut queue: VecDeque<(u32, usize)> = VecDeque::new();
    queue.push_back((root, 0));
    let mut out = Vec::new();

    while let Some((pid, depth)) = queue.pop_front() {
        if depth >= config::MAX_DESCENDANT_DEPTH {
            continue;
        }
        let Some(children) = children_map.get(&pid) else { continue };
        for &child_pid in children {
            let Some(child_snapshot) = enumerator.snapshot_one(child_pid) else { continue };
            let key = (child_pid, child_snapshot.created_at.to_bits());
            if !visited.insert(key) {
                continue;
            }
            if out.len() >= config::MAX_DESCENDANT_COUNT {
                return Err(CoreError::InvalidArgument {
                    message: format!(
                        "process tree rooted at {root} exceeds the {} descendant limit",
                        config::MAX_DESCENDANT_COUNT
                    ),
                });
            }
            out.push((child_pid, child_snapshot));
            queue.push_back((child_pid, depth + 1));
        }
    }

    Ok(out)
}

fn descendant_depth(enumerator: &dyn ProcessEnumerator, root: u32, target: u32) -> usize {
    let children_map = enumerator.children_map();
    let mut queue: VecDeque<(u32, usize)> = VecDeque::new();
    queue.push_back((root, 0));
    let mut visited = HashSet::new();
    visited.insert(root);
    while let Some((pid, depth)) = queue.pop_front() {
        if pid == target {
            return depth;
        }
        if let Some(children) = children_map.get(&pid) {
            for &child in children {
                if visited.insert(child) {
                    queue.push_back((child, depth + 1));
                }
            }
        }
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::enumerator::fake::FakeEnumerator;
    use crate::platform::killer::fake::FakeKiller;
    use crate::platform::ProcessSnapshot;

    fn snap(pid: u32, parent: Option<u32>, name: &str) -> ProcessSnapshot {
        ProcessSnapshot {
            pid,
            parent_pid: parent,
            name: name.to_string(),
            command_line: name.to_string(),
            cwd: None,
            created_at: pid as f64,
            memory_bytes: 0,
            cpu_percent: 0.0,
            thread_count: 1,
        }
    }

    #[test]
    fn kill_one_missing_process_is_process_not_found() {
        let config = Config::default();
        let engine = TerminationEngine::new(&config);
        let enumerator = FakeEnumerator::new(vec![]);
        let classifier = ProtectionClassifier::new(Config::default());
        let registry = SpawnRegistry::new_for_test();
        let killer = FakeKiller::with_alive([]);
        let result = engine.kill_one(
            &enumerator,
            &classifier,
            &registry,
            &killer,
            999,
            KillOneFlags { force: false, override_user_spawn: false, dry_run: false },
        );
        assert!(matches!(result, Err(CoreError::ProcessNotFound { pid: 999 })));
    }

    #[test]
    fn kill_one_protected_process_is_never_killed_even_with_force() {
        let config = Config::default();
        let engine = TerminationEngine::new(&config);
        let enumerator = FakeEnumerator::new(vec![snap(10, Some(1), "claude.exe")]);
        let classifier = ProtectionClassifier::new(Config::default());
        let registry = SpawnRegistry::new_for_test();
        let killer = FakeKiller::with_alive([10]);
        let result = engine.kill_one(
            &enumerator,
            &classifier,
            &registry,
            &killer,
            10,
            KillOneFlags { force: true, override_user_spawn: true, dry_run: false },
        );
        assert!(matches!(result, Err(CoreError::ProtectedProcess { pid: 10, .. })));
        assert!(killer.is_alive(10));
    }

    #[test]
    fn kill_one_with_children_requires_kill_tree() {
        let config = Config::default();
        let engine = TerminationEngine::new(&config);
        let enumerator =
            FakeEnumerator::new(vec![snap(20, Some(1), "node.exe"), snap(21, Some(20), "node.exe")]);
        let classifier = ProtectionClassifier::new(Config::default());
        let registry = SpawnRegistry::new_for_test();
        let killer = FakeKiller::with_alive([20, 21]);
        let result = engine.kill_one(
            &enumerator,
            &classifier,
            &registry,
            &killer,
            20,
            KillOneFlags { force: true, override_user_spawn: false, dry_run: false },
        );
        assert!(matches!(result, Err(CoreError::HasChildren { pid: 20, child_count: 1, .. })));
    }

    #[test]
    fn kill_one_user_spawned_requires_override() {
        let config = Config::default();
        let engine = TerminationEngine::new(&config);
        let enumerator = FakeEnumerator::new(vec![snap(30, Some(1), "node.exe")]);
        let classifier = ProtectionClassifier::new(Config::default());
        let registry = SpawnRegistry::new_for_test();
        #[cfg(windows)]
        registry.register(30, None, "node server.js".to_string(), None, None);
        #[cfg(not(windows))]
        registry.register(30, None, "node server.js".to_string(), None, None);
        let killer = FakeKiller::with_alive([30]);

        let without_override = engine.kill_one(
            &enumerator,
            &classifier,
            &registry,
            &killer,
            30,
            KillOneFlags { force: false, override_user_spawn: false, dry_run: false },
        );
        assert!(matches!(without_override, Err(CoreError::UserSpawnedGuard { pid: 30 })));

        let with_override = engine.kill_one(
            &enumerator,
            &classifier,
            &registry,
            &killer,
            30,
            KillOneFlags { force: false, override_user_spawn: true, dry_run: false },
        );
        assert!(matches!(with_override, Ok(KillOneResult::Killed(_))));
    }

    #[test]
    fn kill_one_dry_run_does_not_call_killer() {
        let config = Config::default();
        let engine = TerminationEngine::new(&config);
        let enumerator = FakeEnumerator::new(vec![snap(40, Some(1), "node.exe")]);
        let classifier = ProtectionClassifier::new(Config::default());
        let registry = SpawnRegistry::new_for_test();
        let killer = FakeKiller::with_alive([40]);
        let result = engine.kill_one(
            &enumerator,
            &classifier,
            &registry,
            &killer,
            40,
            KillOneFlags { force: false, override_user_spawn: false, dry_run: true },
        );
        assert!(matches!(result, Ok(KillOneResult::DryRun(_))));
        assert!(killer.graceful_calls.lock().unwrap().is_empty());
        assert!(killer.forceful_calls.lock().unwrap().is_empty());
        assert!(killer.is_alive(40));
    }

    #[test]
    fn kill_tree_succeeds_and_reports_full_tree() {
        let config = Config::default();
        let engine = TerminationEngine::new(&config);
        let enumerator = FakeEnumerator::new(vec![
            snap(50, Some(1), "node.exe"),
            snap(51, Some(50), "node.exe"),
            snap(52, Some(50), "node.exe"),
        ]);
        let classifier = ProtectionClassifier::new(Config::default());
        let registry = SpawnRegistry::new_for_test();
        let killer = FakeKiller::with_alive([50, 51, 52]);
        let result = engine.kill_tree(
            &enumerator,
            &classifier,
            &registry,
            &killer,
            50,
            KillTreeFlags { force: true, dry_run: false },
        );
        match result.unwrap() {
            KillTreeResult::Killed(outcome) => {
                assert_eq!(outcome.processes_killed, 3);
                assert!(!killer.is_alive(50));
                assert!(!killer.is_alive(51));
                assert!(!killer.is_alive(52));
            }
            _ => panic!("expected Killed"),
        }
    }

    #[test]
    fn kill_tree_with_protected_descendant_is_rejected_entirely() {
        let config = Config::default();
        let engine = TerminationEngine::new(&config);
        let enumerator =
            FakeEnumerator::new(vec![snap(60, Some(1), "node.exe"), snap(61, Some(60), "claude.exe")]);
        let classifier = ProtectionClassifier::new(Config::default());
        let registry = SpawnRegistry::new_for_test();
        let killer = FakeKiller::with_alive([60, 61]);
        let result = engine.kill_tree(
            &enumerator,
            &classifier,
            &registry,
            &killer,
            60,
            KillTreeFlags { force: true, dry_run: false },
        );
        assert!(matches!(result, Err(CoreError::ProtectedDescendant { pid: 61, .. })));
        assert!(killer.is_alive(60));
        assert!(killer.is_alive(61));
    }

    #[test]
    fn kill_tree_dry_run_never_touches_the_killer() {
        let config = Config::default();
        let engine = TerminationEngine::new(&config);
        let enumerator = FakeEnumerator::new(vec![snap(70, Some(1), "node.exe"), snap(71, Some(70), "node.exe")]);
        let classifier = ProtectionClassifier::new(Config::default());
        let registry = SpawnRegistry::new_for_test();
        let killer = FakeKiller::with_alive([70, 71]);
        let result = engine.kill_tree(
            &enumerator,
            &classifier,
            &registry,
            &killer,
            70,
            KillTreeFlags { force: false, dry_run: true },
        );
        match result.unwrap() {
            KillTreeResult::DryRun { tree, .. } => assert_eq!(tree.len(), 2),
            _ => panic!("expected DryRun"),
        }
        assert!(killer.graceful_calls.lock().unwrap().is_empty());
        assert!(killer.forceful_calls.lock().unwrap().is_empty());
    }

    #[test]
    fn kill_tree_with_a_registered_group_terminates_atomically_and_reports_job_object() {
        let config = Config::default();
        let engine = TerminationEngine::new(&config);
        let enumerator = FakeEnumerator::new(vec![
            snap(80, Some(1), "node.exe"),
            snap(81, Some(80), "node.exe"),
        ]);
        let classifier = ProtectionClassifier::new(Config::default());
        let registry = SpawnRegistry::new_for_test();
        #[cfg(windows)]
        registry.register(80, None, "node server.js".to_string(), None, None);
        #[cfg(not(windows))]
        registry.register(80, None, "node server.js".to_string(), None, Some(80));
        let killer = FakeKiller::with_alive([80, 81]);

        let dry = engine
            .kill_tree(&enumerator, &classifier, &registry, &killer, 80, KillTreeFlags { force: false, dry_run: true })
            .unwrap();
        match dry {
            KillTreeResult::DryRun { tree, method } => {
                assert_eq!(tree.len(), 2);
                #[cfg(not(windows))]
                assert_eq!(method, "JobObject");
            }
            _ => panic!("expected DryRun"),
        }
        // Dry run must never touch the killer, even on the group path.
        assert!(killer.graceful_calls.lock().unwrap().is_empty());
        assert!(killer.forceful_calls.lock().unwrap().is_empty());

        let result = engine
            .kill_tree(&enumerator, &classifier, &registry, &killer, 80, KillTreeFlags { force: false, dry_run: false })
            .unwrap();
        match result {
            KillTreeResult::Killed(outcome) => {
                #[cfg(not(windows))]
                {
                    assert_eq!(outcome.method, "JobObject");
                    assert_eq!(outcome.processes_killed, 2);
                    // The group path never calls the generic killer at all.
                    assert!(killer.graceful_calls.lock().unwrap().is_empty());
                    assert!(killer.forceful_calls.lock().unwrap().is_empty());
                }
            }
            _ => panic!("expected Killed"),
        }
    }
}
