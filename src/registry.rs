//! The concurrency centerpiece: a rendezvous-scoped, reusable barrier over
//! per-worker terminal state reports.
//!
//! The barrier is hand-rolled from a `Mutex` + `Condvar` + monotonic
//! generation counter, in the shape `solver::barrier::Shared` uses for its
//! `critical: Mutex<Critical>` / `monitor: Condvar` pair — a last-arrival
//! thread runs the completion action and wakes everyone else via
//! `notify_all`. "Breaking" the barrier is a generation bump that is not a
//! normal completion; waiters parked on an older generation number look up
//! how *their* generation ended, so the outcome is correct no matter how
//! many generations have elapsed by the time they are scheduled again.

use std::collections::{HashMap, HashSet};

use log::debug;
use parking_lot::{Condvar, Mutex};

use crate::error::{DriverError, DriverResult};
use crate::event::ShutdownEvent;

pub type RendezvousId = u64;

/// Identifies a worker slot within one rendezvous generation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkerKey {
    pub host: String,
    pub local_rank: u32,
}

impl WorkerKey {
    pub fn new(host: impl Into<String>, local_rank: u32) -> Self {
        WorkerKey {
            host: host.into(),
            local_rank,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerState {
    Ready,
    Success,
    Failure,
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self {
            WorkerState::Ready => "READY",
            WorkerState::Success => "SUCCESS",
            WorkerState::Failure => "FAILURE",
        };
        write!(f, "{tag}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GenerationOutcome {
    Completed,
    SoftBroken,
    PermanentBroken,
}

/// A consistent snapshot of every `(host, slot) -> state` report in the
/// generation that just completed, handed to the completion action.
pub type StateSnapshot = Vec<(WorkerKey, WorkerState)>;

/// Callback invoked once per successful barrier cycle, on exactly one
/// thread, before any waiter of that cycle returns. Must not block and must
/// not call back into the registry synchronously (see module docs on the
/// Driver/WorkerRegistry cyclic reference) — it should hand off any further
/// work (e.g. reconfiguration) to another thread.
pub type OnComplete = Box<dyn Fn(RendezvousId, StateSnapshot) + Send + Sync>;

struct Critical {
    parties: usize,
    states: HashMap<WorkerKey, WorkerState>,
    by_state: HashMap<WorkerState, HashSet<WorkerKey>>,
    generation: u64,
    outcomes: HashMap<u64, GenerationOutcome>,
    rendezvous_id: RendezvousId,
}

pub struct WorkerRegistry {
    critical: Mutex<Critical>,
    monitor: Condvar,
    finished: ShutdownEvent,
    on_complete: OnComplete,
}

enum WaitOutcome {
    Completed,
    SoftBroken,
    PermanentBroken,
}

impl WorkerRegistry {
    pub fn new(finished: ShutdownEvent, on_complete: OnComplete) -> Self {
        WorkerRegistry {
            critical: Mutex::new(Critical {
                parties: 0,
                states: HashMap::new(),
                by_state: HashMap::new(),
                generation: 0,
                outcomes: HashMap::new(),
                rendezvous_id: 0,
            }),
            monitor: Condvar::new(),
            finished,
            on_complete,
        }
    }

    /// Clears state, installs a fresh barrier of width `size`, and bumps
    /// `rendezvous_id`. Returns the new id.
    pub fn reset(&self, size: usize) -> RendezvousId {
        let mut crit = self.critical.lock();
        crit.states.clear();
        crit.by_state.clear();
        crit.parties = size;
        crit.rendezvous_id += 1;
        debug!(
            "registry reset: size={size} rendezvous_id={}",
            crit.rendezvous_id
        );
        crit.rendezvous_id
    }

    pub fn rendezvous_id(&self) -> RendezvousId {
        self.critical.lock().rendezvous_id
    }

    /// Number of reports recorded so far in the current generation. Not
    /// `world_size` — that's [`WorkerRegistry::parties`], which is what
    /// `spec.md`'s "`size(WorkerRegistry) == world_size` after every reset"
    /// invariant actually refers to.
    pub fn recorded_len(&self) -> usize {
        self.critical.lock().states.len()
    }

    /// `world_size` of the current generation, set by the last `reset`.
    pub fn parties(&self) -> usize {
        self.critical.lock().parties
    }

    pub fn state_of(&self, key: &WorkerKey) -> Option<WorkerState> {
        self.critical.lock().states.get(key).copied()
    }

    /// Keys currently recorded in the given state (the registry's inverse
    /// index).
    pub fn keys_in_state(&self, state: WorkerState) -> HashSet<WorkerKey> {
        self.critical
            .lock()
            .by_state
            .get(&state)
            .cloned()
            .unwrap_or_default()
    }

    pub fn record_ready(&self, key: WorkerKey) -> DriverResult<RendezvousId> {
        self.record_state(key, WorkerState::Ready)
    }

    pub fn record_success(&self, key: WorkerKey) -> DriverResult<RendezvousId> {
        self.record_state(key, WorkerState::Success)
    }

    pub fn record_failure(&self, key: WorkerKey) -> DriverResult<RendezvousId> {
        self.record_state(key, WorkerState::Failure)
    }

    /// Forces a permanent break: every current and future waiter in this
    /// epoch observes `BarrierBroken`. Not used by the reconfiguration loop
    /// itself; exposed for an operator-triggered abort and for tests.
    pub fn force_break(&self) {
        let mut crit = self.critical.lock();
        crit.outcomes
            .insert(crit.generation, GenerationOutcome::PermanentBroken);
        crit.generation += 1;
        self.monitor.notify_all();
    }

    /// Submits one report, then waits for its generation to end. A report is
    /// only ever inserted once per call; a subsequent soft-break just moves
    /// the wait to the new generation instead of resubmitting (resubmitting
    /// the same key would look like another duplicate and break forever).
    fn record_state(&self, key: WorkerKey, state: WorkerState) -> DriverResult<RendezvousId> {
        let rendezvous_id;
        let mut generation;
        {
            let mut crit = self.critical.lock();

            if self.finished.is_set() {
                return Ok(crit.rendezvous_id);
            }

            if crit.states.contains_key(&key) {
                debug!("duplicate report for {key:?}, breaking barrier");
                crit.outcomes
                    .insert(crit.generation, GenerationOutcome::SoftBroken);
                crit.generation += 1;
                self.monitor.notify_all();
            }

            insert(&mut crit, key.clone(), state);
            rendezvous_id = crit.rendezvous_id;

            if crit.states.len() == crit.parties {
                let snapshot: StateSnapshot = crit
                    .states
                    .iter()
                    .map(|(k, v)| (k.clone(), *v))
                    .collect();
                (self.on_complete)(rendezvous_id, snapshot);
                crit.outcomes
                    .insert(crit.generation, GenerationOutcome::Completed);
                crit.generation += 1;
                self.monitor.notify_all();
                return Ok(rendezvous_id);
            }

            generation = crit.generation;
        }

        loop {
            match self.wait_for(generation) {
                WaitOutcome::Completed => return Ok(rendezvous_id),
                WaitOutcome::PermanentBroken => return Err(DriverError::BarrierBroken),
                WaitOutcome::SoftBroken => {
                    let crit = self.critical.lock();
                    if crit.states.get(&key) != Some(&state) {
                        return Err(DriverError::StateOverridden(key));
                    }
                    if self.finished.is_set() {
                        return Ok(crit.rendezvous_id);
                    }
                    generation = crit.generation;
                }
            }
        }
    }

    fn wait_for(&self, entry_generation: u64) -> WaitOutcome {
        let mut crit = self.critical.lock();
        self.monitor
            .wait_while(&mut crit, |crit| crit.generation == entry_generation);

        match crit.outcomes.get(&entry_generation) {
            Some(GenerationOutcome::PermanentBroken) => WaitOutcome::PermanentBroken,
            Some(GenerationOutcome::SoftBroken) => WaitOutcome::SoftBroken,
            _ => WaitOutcome::Completed,
        }
    }
}

fn insert(crit: &mut Critical, key: WorkerKey, state: WorkerState) {
    if let Some(old) = crit.states.insert(key.clone(), state) {
        if let Some(set) = crit.by_state.get_mut(&old) {
            set.remove(&key);
        }
    }
    crit.by_state.entry(state).or_default().insert(key);
}
