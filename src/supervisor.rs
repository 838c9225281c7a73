//! Spawns one supervisor thread per assigned slot and funnels its terminal
//! exit into the registry's barrier and, once the job is finished, into the
//! `Results` map — the thread-per-slot shape `BarrierParallelSolver::maximize`
//! uses for its worker pool (`std::thread::spawn`/`std::thread::scope`), kept
//! here for long-lived, blocking, shared-state collaborators instead of an
//! async task pool.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{debug, warn};
use parking_lot::{Mutex, RwLock};

use crate::assign::SlotInfo;
use crate::contracts::{CreateWorkerFn, Timestamp};
use crate::event::{HostEvent, ShutdownEvent};
use crate::registry::{WorkerKey, WorkerRegistry};

/// Append-only, first-write-wins mapping `"host[slot]" -> (exit_code, timestamp)`.
#[derive(Default)]
pub struct Results {
    inner: Mutex<HashMap<String, (i32, Timestamp)>>,
}

impl Results {
    pub fn new() -> Self {
        Results::default()
    }

    /// Records `(exit_code, timestamp)` under `key` unless a value is
    /// already present there.
    pub fn record(&self, key: String, exit_code: i32, timestamp: Timestamp) {
        self.inner.lock().entry(key).or_insert((exit_code, timestamp));
    }

    pub fn snapshot(&self) -> HashMap<String, (i32, Timestamp)> {
        self.inner.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Spawns and tracks supervisor threads for the slots assigned in the
/// current generation.
pub struct WorkerSupervisor {
    registry: Arc<WorkerRegistry>,
    finished: ShutdownEvent,
    results: Arc<Results>,
    assigned_hosts: Arc<RwLock<HashSet<String>>>,
    create_worker: CreateWorkerFn,
}

impl WorkerSupervisor {
    pub fn new(
        registry: Arc<WorkerRegistry>,
        finished: ShutdownEvent,
        results: Arc<Results>,
        assigned_hosts: Arc<RwLock<HashSet<String>>>,
        create_worker: CreateWorkerFn,
    ) -> Self {
        WorkerSupervisor {
            registry,
            finished,
            results,
            assigned_hosts,
            create_worker,
        }
    }

    /// Spawns one supervisor thread for `slot`. The thread blocks inside
    /// `create_worker_fn` until the worker process exits, then reports the
    /// outcome via `handle_worker_exit`.
    pub fn spawn(
        &self,
        slot: SlotInfo,
        shutdown: ShutdownEvent,
        host_event: HostEvent,
    ) -> JoinHandle<()> {
        let create_worker = self.create_worker.clone();
        let registry = self.registry.clone();
        let finished = self.finished.clone();
        let results = self.results.clone();
        let assigned_hosts = self.assigned_hosts.clone();

        thread::spawn(move || {
            let (exit_code, timestamp) = create_worker(slot.clone(), shutdown, host_event);
            handle_worker_exit(&registry, &finished, &results, &assigned_hosts, slot, exit_code, timestamp);
        })
    }
}

fn handle_worker_exit(
    registry: &WorkerRegistry,
    finished: &ShutdownEvent,
    results: &Results,
    assigned_hosts: &RwLock<HashSet<String>>,
    slot: SlotInfo,
    exit_code: i32,
    timestamp: Timestamp,
) {
    if !assigned_hosts.read().contains(&slot.hostname) {
        debug!(
            "discarding exit for {}[{}]: host no longer assigned",
            slot.hostname, slot.local_rank
        );
        return;
    }

    let key = WorkerKey::new(slot.hostname.clone(), slot.local_rank);
    let report = if exit_code == 0 {
        registry.record_success(key)
    } else {
        registry.record_failure(key)
    };

    let rendezvous_id = match report {
        Ok(id) => id,
        Err(err) => {
            warn!(
                "barrier report failed for {}[{}]: {err}",
                slot.hostname, slot.local_rank
            );
            return;
        }
    };

    if finished.is_set() && rendezvous_id == registry.rendezvous_id() {
        let result_key = format!("{}[{}]", slot.hostname, slot.local_rank);
        results.record(result_key, exit_code, timestamp);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::WorkerState;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn registry_with_counter(size: usize) -> (Arc<WorkerRegistry>, Arc<AtomicUsize>) {
        let completions = Arc::new(AtomicUsize::new(0));
        let counter = completions.clone();
        let registry = Arc::new(WorkerRegistry::new(
            ShutdownEvent::new(),
            Box::new(move |_id, _snap| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        ));
        registry.reset(size);
        (registry, completions)
    }

    fn slot(host: &str, rank: u32) -> SlotInfo {
        SlotInfo {
            hostname: host.to_string(),
            local_rank: rank,
            local_size: 1,
            cross_rank: 0,
            cross_size: 1,
            rank,
            size: 1,
        }
    }

    #[test]
    fn success_exit_is_recorded_once_finished_and_generation_matches() {
        let (registry, _) = registry_with_counter(1);
        let finished = ShutdownEvent::new();
        let results = Results::new();
        let assigned = Arc::new(RwLock::new(HashSet::from(["h1".to_string()])));

        finished.set();
        handle_worker_exit(&registry, &finished, &results, &assigned, slot("h1", 0), 0, Timestamp(100));

        let snap = results.snapshot();
        assert_eq!(snap.get("h1[0]"), Some(&(0, Timestamp(100))));
        assert_eq!(
            registry.state_of(&WorkerKey::new("h1", 0)),
            Some(WorkerState::Success)
        );
    }

    #[test]
    fn exit_for_unassigned_host_is_discarded() {
        let (registry, _) = registry_with_counter(1);
        let finished = ShutdownEvent::new();
        finished.set();
        let results = Results::new();
        let assigned = Arc::new(RwLock::new(HashSet::new()));

        handle_worker_exit(&registry, &finished, &results, &assigned, slot("gone", 0), 1, Timestamp(5));
        assert!(results.is_empty());
    }

    #[test]
    fn results_first_write_wins() {
        let results = Results::new();
        results.record("h[0]".into(), 0, Timestamp(1));
        results.record("h[0]".into(), 1, Timestamp(2));
        assert_eq!(results.snapshot().get("h[0]"), Some(&(0, Timestamp(1))));
    }
}
