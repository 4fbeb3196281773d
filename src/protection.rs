//! The Protection Classifier (spec.md §4.1).
//!
//! Fail-safe by construction: every path that cannot positively resolve
//! "this is safe to kill" returns `Protected`. Grounded on the teacher's
//! `kill.rs` notion of a small set of signal-sending primitives behind a
//! trait seam; here the seam is `ProcessEnumerator` instead, since
//! classification only ever reads process attributes.

use crate::config::Config;
use crate::platform::{ProcessEnumerator, ProcessSnapshot};
use crate::schema::ProtectionReason;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    pub protected: bool,
    pub reason: ProtectionReason,
}

impl Verdict {
    fn not_protected() -> Self {
        Verdict { protected: false, reason: ProtectionReason::NotProtected }
    }

    fn protected(reason: ProtectionReason) -> Self {
        Verdict { protected: true, reason }
    }
}

struct CacheEntry {
    verdict: Verdict,
    decided_at: Instant,
    creation_time: f64,
}

/// TTL + LRU cache of protection verdicts, keyed by PID (spec.md §4.1
/// "Cache policy").
struct ProtectionCache {
    ttl: Duration,
    capacity: usize,
    // Simple order-of-insertion LRU: front = most recently used.
    order: Vec<u32>,
    entries: HashMap<u32, CacheEntry>,
}

impl ProtectionCache {
    fn new(ttl: Duration, capacity: usize) -> Self {
        ProtectionCache { ttl, capacity, order: Vec::new(), entries: HashMap::new() }
    }

    fn touch(&mut self, pid: u32) {
        if let Some(pos) = self.order.iter().position(|&p| p == pid) {
            self.order.remove(pos);
        }
        self.order.push(pid);
    }

    fn get(&mut self, pid: u32, creation_time: f64) -> Option<Verdict> {
        let expired_or_reused = match self.entries.get(&pid) {
            Some(entry) => {
                entry.decided_at.elapsed() >= self.ttl || entry.creation_time != creation_time
            }
            None => return None,
        };
        if expired_or_reused {
            self.entries.remove(&pid);
            self.order.retain(|&p| p != pid);
            return None;
        }
        self.touch(pid);
        self.entries.get(&pid).map(|e| e.verdict)
    }

    fn insert(&mut self, pid: u32, creation_time: f64, verdict: Verdict) {
        self.entries.insert(pid, CacheEntry { verdict, decided_at: Instant::now(), creation_time });
        self.touch(pid);
        while self.order.len() > self.capacity {
            let evict = self.order.remove(0);
            self.entries.remove(&evict);
        }
    }

    fn remove(&mut self, pid: u32) {
        self.entries.remove(&pid);
        self.order.retain(|&p| p != pid);
    }

    /// Drop every expired entry. Called by the background reaper.
    fn sweep_expired(&mut self) {
        let ttl = self.ttl;
        let expired: Vec<u32> = self
            .entries
            .iter()
            .filter(|(_, e)| e.decided_at.elapsed() >= ttl)
            .map(|(&pid, _)| pid)
            .collect();
        for pid in expired {
            self.remove(pid);
        }
    }
}

/// The Protection Classifier: pure decision logic plus its bounded cache.
pub struct ProtectionClassifier {
    config: Config,
    cache: Mutex<ProtectionCache>,
}

impl ProtectionClassifier {
    pub fn new(config: Config) -> Self {
        ProtectionClassifier {
            cache: Mutex::new(ProtectionCache::new(
                crate::config::PROTECTION_CACHE_TTL,
                crate::config::PROTECTION_CACHE_CAPACITY,
            )),
            config,
        }
    }

    /// Periodic maintenance hook for the Protection Cache reaper
    /// (spec.md §5, every 5s).
    pub fn sweep_cache(&self) {
        self.cache.lock().unwrap().sweep_expired();
    }

    fn tier1(&self, name: &str, command_line: &str, pid: u32) -> Option<Verdict> {
        if pid == 0 || pid == 4 {
            return Some(Verdict::protected(ProtectionReason::SystemCritical));
        }
        if self.config.system_critical_names.iter().any(|n| n.eq_ignore_ascii_case(name)) {
            return Some(Verdict::protected(ProtectionReason::SystemCritical));
        }
        let haystack_name = name.to_ascii_lowercase();
        let haystack_cmd = command_line.to_ascii_lowercase();
        if self
            .config
            .protected_tokens
            .iter()
            .any(|t| haystack_name.contains(&t.to_ascii_lowercase()) || haystack_cmd.contains(&t.to_ascii_lowercase()))
        {
            return Some(Verdict::protected(ProtectionReason::PatternMatch));
        }
        None
    }

    /// Known script interpreters whose first non-flag argument is a script
    /// path, for the Tier-3 `ScriptContent` check.
    fn is_script_interpreter(name: &str) -> bool {
        let lower = name.to_ascii_lowercase();
        ["python.exe", "python3.exe", "node.exe", "ruby.exe", "perl.exe", "pwsh.exe", "powershell.exe"]
            .iter()
            .any(|i| lower == *i)
    }

    /// The resolved first non-flag argument of a command line, per spec.md
    /// §9's resolution of the Tier-3 ambiguity: the check narrows to this
    /// single argument rather than re-scanning the whole command line (which
    /// Tier 1 already covers).
    fn first_non_flag_arg(command_line: &str) -> Option<&str> {
        command_line.split_whitespace().skip(1).find(|tok| !tok.starts_with('-'))
    }

    fn script_content_protected(&self, snapshot: &ProcessSnapshot) -> bool {
        if !Self::is_script_interpreter(&snapshot.name) {
            return false;
        }
        let Some(arg) = Self::first_non_flag_arg(&snapshot.command_line) else {
            return false;
        };
        let lower = arg.to_ascii_lowercase();
        self.config.protected_tokens.iter().any(|t| lower.contains(&t.to_ascii_lowercase()))
    }

    /// Evaluate the full classification for one PID, consulting the cache
    /// between tiers 1 and 3 (spec.md §4.1: "first-wins", cache sits
    /// between pattern-match and deep inspection).
    pub fn classify(&self, enumerator: &dyn ProcessEnumerator, pid: u32) -> Verdict {
        let Some(snapshot) = enumerator.snapshot_one(pid) else {
            // Caller is responsible for surfacing ProcessNotFound; from the
            // classifier's perspective a vanished process is fail-safe
            // Protected/Unknown so it is never reported as killable.
            return Verdict::protected(ProtectionReason::Unknown);
        };
        self.classify_snapshot(enumerator, &snapshot)
    }

    pub fn classify_snapshot(&self, enumerator: &dyn ProcessEnumerator, snapshot: &ProcessSnapshot) -> Verdict {
        if let Some(v) = self.tier1(&snapshot.name, &snapshot.command_line, snapshot.pid) {
            return v;
        }

        if let Some(v) = self.cache.lock().unwrap().get(snapshot.pid, snapshot.created_at) {
            return v;
        }

        let verdict = self.deep_inspect(enumerator, snapshot);
        self.cache.lock().unwrap().insert(snapshot.pid, snapshot.created_at, verdict);
        verdict
    }

    fn deep_inspect(&self, enumerator: &dyn ProcessEnumerator, snapshot: &ProcessSnapshot) -> Verdict {
        // Ancestor walk, up to MAX_ANCESTOR_DEPTH hops (spec.md §4.1 Tier 3).
        let mut current = snapshot.parent_pid;
        for _ in 0..crate::config::MAX_ANCESTOR_DEPTH {
            let Some(ancestor_pid) = current else { break };
            let Some(ancestor) = enumerator.snapshot_one(ancestor_pid) else { break };
            if self.tier1(&ancestor.name, &ancestor.command_line, ancestor.pid).is_some() {
                return Verdict::protected(ProtectionReason::ParentProtected);
            }
            current = ancestor.parent_pid;
        }

        // Immediate children.
        let children = enumerator.children_map();
        if let Some(kids) = children.get(&snapshot.pid) {
            for &child_pid in kids {
                if let Some(child) = enumerator.snapshot_one(child_pid) {
                    if self.tier1(&child.name, &child.command_line, child.pid).is_some() {
                        return Verdict::protected(ProtectionReason::ChildProtected);
                    }
                }
            }
        }

        if self.script_content_protected(snapshot) {
            return Verdict::protected(ProtectionReason::ScriptContent);
        }

        Verdict::not_protected()
    }

    /// Invalidate a cached verdict immediately, e.g. after observing the PID
    /// no longer exists (spec.md §4.1 "Cache policy").
    pub fn invalidate(&self, pid: u32) {
        self.cache.lock().unwrap().remove(pid);
    }
}
