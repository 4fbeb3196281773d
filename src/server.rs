//! `ServerState`: the explicit, test-instantiable bundle that replaces the
//! process-wide singletons the source used (spec.md §9 "Global mutable
//! state"). One `ServerState` owns a `Config`, a `ProtectionClassifier`, a
//! `SpawnRegistry`, and the two background reaper threads, so a test can
//! spin up an isolated server per test rather than sharing global state.

use crate::config::Config;
use crate::platform::{PortTableReader, ProcessEnumerator, ProcessKiller, SystemEnumerator, SystemKiller, SystemPortTableReader};
use crate::protection::ProtectionClassifier;
use crate::spawn::SpawnRegistry;
use std::sync::Arc;
use std::thread::JoinHandle;

pub struct ServerState {
    pub config: Config,
    pub classifier: Arc<ProtectionClassifier>,
    pub registry: Arc<SpawnRegistry>,
    pub enumerator: Arc<dyn ProcessEnumerator + Send + Sync>,
    pub killer: Arc<dyn ProcessKiller + Send + Sync>,
    pub port_reader: Arc<dyn PortTableReader + Send + Sync>,
    reaper_handles: Vec<JoinHandle<()>>,
    shutdown: Arc<std::sync::atomic::AtomicBool>,
}

impl ServerState {
    /// Build a production server: real OS-backed enumerator/killer/port
    /// reader, and both background reaper threads running.
    pub fn new(config: Config) -> Self {
        let enumerator: Arc<dyn ProcessEnumerator + Send + Sync> = Arc::new(SystemEnumerator::new());
        let killer: Arc<dyn ProcessKiller + Send + Sync> = Arc::new(SystemKiller::new());
        let port_reader: Arc<dyn PortTableReader + Send + Sync> = Arc::new(SystemPortTableReader::new());
        Self::with_platform(config, enumerator, killer, port_reader)
    }

    /// Build a server over injected platform implementations, so tests can
    /// supply fakes while still exercising the reaper-thread wiring.
    pub fn with_platform(
        config: Config,
        enumerator: Arc<dyn ProcessEnumerator + Send + Sync>,
        killer: Arc<dyn ProcessKiller + Send + Sync>,
        port_reader: Arc<dyn PortTableReader + Send + Sync>,
    ) -> Self {
        let classifier = Arc::new(ProtectionClassifier::new(config.clone()));
        let registry = SpawnRegistry::new();
        let shutdown = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let mut reaper_handles = Vec::new();
        reaper_handles.push(spawn_registry_reaper(registry.clone(), enumerator.clone(), shutdown.clone()));
        reaper_handles.push(spawn_protection_cache_reaper(classifier.clone(), shutdown.clone()));

        ServerState { config, classifier, registry, enumerator, killer, port_reader, reaper_handles, shutdown }
    }

    /// Server shutdown: stop background reapers and terminate every live
    /// spawn-registry record (spec.md §4.4 "On server shutdown").
    ///
    /// Reaper threads are left to exit on their own next wake tick rather
    /// than joined here — they sleep for their full interval (up to 5s for
    /// the protection-cache reaper) before observing the shutdown flag, and
    /// blocking process exit on that would make shutdown as slow as the
    /// slowest reaper interval for no benefit.
    pub fn shutdown(self) {
        self.shutdown.store(true, std::sync::atomic::Ordering::SeqCst);
        self.registry.shutdown_all(self.killer.as_ref());
        drop(self.reaper_handles);
    }
}

fn spawn_registry_reaper(
    registry: Arc<SpawnRegistry>,
    enumerator: Arc<dyn ProcessEnumerator + Send + Sync>,
    shutdown: Arc<std::sync::atomic::AtomicBool>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        while !shutdown.load(std::sync::atomic::Ordering::SeqCst) {
            std::thread::sleep(crate::config::REGISTRY_REAP_INTERVAL);
            if shutdown.load(std::sync::atomic::Ordering::SeqCst) {
                break;
            }
            registry.reap_once(enumerator.as_ref());
        }
    })
}

fn spawn_protection_cache_reaper(
    classifier: Arc<ProtectionClassifier>,
    shutdown: Arc<std::sync::atomic::AtomicBool>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        while !shutdown.load(std::sync::atomic::Ordering::SeqCst) {
            std::thread::sleep(crate::config::PROTECTION_REAP_INTERVAL);
            if shutdown.load(std::sync::atomic::Ordering::SeqCst) {
                break;
            }
            classifier.sweep_cache();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::enumerator::fake::FakeEnumerator;
    use crate::platform::killer::fake::FakeKiller;
    use crate::platform::ports::fake::FakePortTableReader;

    #[test]
    fn server_state_can_be_built_and_shut_down_with_fakes() {
        let state = ServerState::with_platform(
            Config::default(),
            Arc::new(FakeEnumerator::new(vec![])),
            Arc::new(FakeKiller::with_alive([])),
            Arc::new(FakePortTableReader::new(vec![])),
        );
        assert!(!state.registry.contains(1));
        state.shutdown();
    }
}
