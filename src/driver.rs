//! Orchestrates `HostManager`, `Assigner`, `WorkerRegistry`, and
//! `WorkerSupervisor`: owns the shared shutdown signal, drives initial
//! activation, and reacts to barrier-complete events via the reconfiguration
//! decision table (`spec.md` §4.5).

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use parking_lot::{Condvar, Mutex, RwLock};

use crate::assign::{Assigner, SlotInfo};
use crate::config::{Config, DISCOVER_HOSTS_FREQUENCY};
use crate::contracts::{CreateWorkerFn, NotificationClient, RendezvousEndpoint, Timestamp};
use crate::error::{DriverError, DriverResult};
use crate::event::ShutdownEvent;
use crate::host::{Discovery, Host, HostManager};
use crate::registry::{RendezvousId, StateSnapshot, WorkerRegistry, WorkerState};
use crate::supervisor::{Results, WorkerSupervisor};

/// Condition variable the discovery loop notifies on every published
/// change, so activation waiters don't have to poll faster than the
/// discovery cadence.
struct WaitHosts {
    lock: Mutex<()>,
    cv: Condvar,
}

impl WaitHosts {
    fn new() -> Self {
        WaitHosts {
            lock: Mutex::new(()),
            cv: Condvar::new(),
        }
    }

    fn notify(&self) {
        let _guard = self.lock.lock();
        self.cv.notify_all();
    }

    fn wait_timeout(&self, timeout: Duration) {
        let mut guard = self.lock.lock();
        self.cv.wait_for(&mut guard, timeout);
    }
}

struct Inner<Dsc, Rdv, Ntf> {
    config: Config,
    host_manager: HostManager<Dsc>,
    rendezvous_endpoint: Rdv,
    notification_client: Ntf,
    registry: Arc<WorkerRegistry>,
    supervisor: WorkerSupervisor,
    results: Arc<Results>,
    shutdown: ShutdownEvent,
    assigned: Mutex<Vec<Host>>,
    assigned_names: Arc<RwLock<HashSet<String>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    notification_failures: AtomicU64,
    wait_hosts: WaitHosts,
    discovery_started: AtomicBool,
}

/// Coordination core of the elastic launcher. Generic over the three
/// injected collaborators named in `spec.md` §6; the worker factory is a
/// plain `Arc<dyn Fn>` rather than a fourth type parameter.
pub struct Driver<Dsc, Rdv, Ntf> {
    inner: Arc<Inner<Dsc, Rdv, Ntf>>,
}

impl<Dsc, Rdv, Ntf> Clone for Driver<Dsc, Rdv, Ntf> {
    fn clone(&self) -> Self {
        Driver {
            inner: self.inner.clone(),
        }
    }
}

impl<Dsc, Rdv, Ntf> Driver<Dsc, Rdv, Ntf>
where
    Dsc: Discovery + 'static,
    Rdv: RendezvousEndpoint + 'static,
    Ntf: NotificationClient + 'static,
{
    pub fn new(
        config: Config,
        discovery: Dsc,
        rendezvous_endpoint: Rdv,
        notification_client: Ntf,
        create_worker: CreateWorkerFn,
    ) -> Self {
        let shutdown = ShutdownEvent::new();
        let assigned_names = Arc::new(RwLock::new(HashSet::new()));
        let results = Arc::new(Results::new());

        // The registry's completion action needs to call back into this
        // Driver, but the Driver doesn't exist yet while the registry is
        // being built. Tie the knot with a `Weak` filled in right after
        // construction instead of giving the registry real ownership of
        // the driver (see module docs on the cyclic reference).
        let self_ref: Arc<OnceLock<Weak<Inner<Dsc, Rdv, Ntf>>>> = Arc::new(OnceLock::new());
        let on_complete_ref = self_ref.clone();
        let on_complete = Box::new(move |rendezvous_id: RendezvousId, snapshot: StateSnapshot| {
            let Some(weak) = on_complete_ref.get() else {
                return;
            };
            let Some(inner) = weak.upgrade() else {
                return;
            };
            // Runs synchronously, still inside the registry's own critical
            // section (before it bumps the generation and wakes the other
            // parties) so that a shutdown set here is guaranteed visible to
            // every waiter by the time they check it post-barrier. Only the
            // reactivate branch, which needs `registry.reset` and therefore
            // the same lock this callback is running under, is deferred to
            // a fresh thread.
            on_barrier_complete(&inner, rendezvous_id, snapshot);
        });
        let registry = Arc::new(WorkerRegistry::new(shutdown.clone(), on_complete));

        let supervisor = WorkerSupervisor::new(
            registry.clone(),
            shutdown.clone(),
            results.clone(),
            assigned_names.clone(),
            create_worker,
        );

        let inner = Arc::new(Inner {
            config,
            host_manager: HostManager::new(discovery),
            rendezvous_endpoint,
            notification_client,
            registry,
            supervisor,
            results,
            shutdown,
            assigned: Mutex::new(Vec::new()),
            assigned_names,
            handles: Mutex::new(Vec::new()),
            notification_failures: AtomicU64::new(0),
            wait_hosts: WaitHosts::new(),
            discovery_started: AtomicBool::new(false),
        });

        let _ = self_ref.set(Arc::downgrade(&inner));

        Driver { inner }
    }

    /// Activates hosts at width `np`, starting the discovery loop on first
    /// call. Blocks on the initial capacity wait (`spec.md` §4.5 step 1),
    /// bounded by `config.start_timeout`.
    pub fn start(&self, np: u32) -> DriverResult<()> {
        self.spawn_discovery_loop();
        activate(&self.inner, np, Some(self.inner.config.start_timeout))
    }

    pub fn is_finished(&self) -> bool {
        self.inner.shutdown.is_set()
    }

    pub fn shutdown_event(&self) -> ShutdownEvent {
        self.inner.shutdown.clone()
    }

    pub fn notification_failures(&self) -> u64 {
        self.inner.notification_failures.load(Ordering::SeqCst)
    }

    /// Blocks until every spawned supervisor task has terminated, then
    /// returns the accumulated results.
    pub fn get_results(&self) -> std::collections::HashMap<String, (i32, Timestamp)> {
        let mut handles = self.inner.handles.lock();
        for handle in handles.drain(..) {
            let _ = handle.join();
        }
        self.inner.results.snapshot()
    }

    fn spawn_discovery_loop(&self) {
        if self
            .inner
            .discovery_started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        let inner = self.inner.clone();
        thread::spawn(move || run_discovery_loop(inner));
    }
}

fn run_discovery_loop<Dsc, Rdv, Ntf>(inner: Arc<Inner<Dsc, Rdv, Ntf>>)
where
    Dsc: Discovery,
    Rdv: RendezvousEndpoint,
    Ntf: NotificationClient,
{
    debug!("discovery loop starting");
    loop {
        match inner.host_manager.update_available_hosts() {
            Ok(true) => {
                inner.wait_hosts.notify();
                notify_workers(&inner);
            }
            Ok(false) => {}
            Err(err) => warn!("discovery poll failed: {err}"),
        }

        if inner.shutdown.wait_timeout(DISCOVER_HOSTS_FREQUENCY) {
            break;
        }
    }
    debug!("discovery loop exiting");
}

fn notify_workers<Dsc, Rdv, Ntf>(inner: &Inner<Dsc, Rdv, Ntf>)
where
    Ntf: NotificationClient,
{
    let timestamp = Timestamp::now();
    if let Err(err) = inner.notification_client.notify_hosts_updated(timestamp) {
        inner.notification_failures.fetch_add(1, Ordering::SeqCst);
        if inner.config.verbose >= 2 {
            warn!("worker notification failed: {err}");
        }
    }
}

/// Waits for capacity, recomputes the assigned-host list, publishes the new
/// ranking, resets the registry, and spawns supervisors for newly added
/// hosts only (`spec.md` §4.5 steps 1-4).
fn activate<Dsc, Rdv, Ntf>(
    inner: &Arc<Inner<Dsc, Rdv, Ntf>>,
    np: u32,
    timeout: Option<Duration>,
) -> DriverResult<()>
where
    Dsc: Discovery,
    Rdv: RendezvousEndpoint,
    Ntf: NotificationClient,
{
    let start = Instant::now();
    loop {
        if inner.shutdown.is_set() {
            return Ok(());
        }

        let available = inner.host_manager.count_available_slots();
        let floor_ok = available >= np;
        let ceiling_ok = inner.config.max_np.map_or(true, |max_np| available <= max_np);
        if floor_ok && ceiling_ok {
            break;
        }

        match timeout {
            Some(total) => {
                let elapsed = start.elapsed();
                if elapsed >= total {
                    return Err(DriverError::StartTimeout(total));
                }
                let remaining = total - elapsed;
                inner.wait_hosts.wait_timeout(remaining.min(DISCOVER_HOSTS_FREQUENCY));
            }
            None => inner.wait_hosts.wait_timeout(DISCOVER_HOSTS_FREQUENCY),
        }
    }

    let mut assigned_guard = inner.assigned.lock();
    let previous_names: Vec<String> = assigned_guard.iter().map(|h| h.name.clone()).collect();

    let still_available = inner.host_manager.filter_available_hosts(&previous_names);
    let mut new_assigned: Vec<Host> = Vec::with_capacity(still_available.len());
    for name in &still_available {
        if let Some(slots) = inner.host_manager.get_slots(name) {
            new_assigned.push(Host {
                name: name.clone(),
                slots,
            });
        }
    }

    let kept: HashSet<String> = new_assigned.iter().map(|h| h.name.clone()).collect();
    for host in inner.host_manager.available_hosts() {
        if !kept.contains(&host.name) {
            new_assigned.push(host);
        }
    }

    let slots = Assigner::assign(&new_assigned, inner.config.min_np, inner.config.max_np)
        .map_err(|err| DriverError::ActivationFailed(err.to_string()))?;

    inner
        .rendezvous_endpoint
        .init(&slots)
        .map_err(|err| DriverError::ActivationFailed(err.to_string()))?;

    let world_size = slots.len();
    let rendezvous_id = inner.registry.reset(world_size);
    info!("reconfigured: world_size={world_size} rendezvous_id={rendezvous_id}");

    let previous_set: HashSet<&str> = previous_names.iter().map(|s| s.as_str()).collect();
    let new_hosts: HashSet<String> = new_assigned
        .iter()
        .filter(|h| !previous_set.contains(h.name.as_str()))
        .map(|h| h.name.clone())
        .collect();

    let assigned_name_set: HashSet<String> = new_assigned.iter().map(|h| h.name.clone()).collect();
    *inner.assigned_names.write() = assigned_name_set;
    *assigned_guard = new_assigned;
    drop(assigned_guard);

    let mut handles = inner.handles.lock();
    for slot in &slots {
        if new_hosts.contains(&slot.hostname) {
            let host_event = inner.host_manager.get_host_event(&slot.hostname);
            let handle = inner
                .supervisor
                .spawn(slot.clone(), inner.shutdown.clone(), host_event);
            handles.push(handle);
        }
    }

    Ok(())
}

/// The barrier completion action: `spec.md` §4.5's reconfiguration decision
/// table, evaluated in order. Called by the registry while its own lock is
/// still held, so every branch except the last must avoid touching the
/// registry again.
fn on_barrier_complete<Dsc, Rdv, Ntf>(
    inner: &Arc<Inner<Dsc, Rdv, Ntf>>,
    rendezvous_id: RendezvousId,
    snapshot: StateSnapshot,
) where
    Dsc: Discovery + 'static,
    Rdv: RendezvousEndpoint + 'static,
    Ntf: NotificationClient + 'static,
{
    let total = snapshot.len();
    let successes = snapshot
        .iter()
        .filter(|(_, state)| *state == WorkerState::Success)
        .count();
    let failures: Vec<_> = snapshot
        .iter()
        .filter(|(_, state)| *state == WorkerState::Failure)
        .map(|(key, _)| key.clone())
        .collect();

    if successes > 0 {
        info!("rendezvous {rendezvous_id}: a worker succeeded, job is done");
        inner.shutdown.set();
        return;
    }

    if !failures.is_empty() && failures.len() == total {
        warn!("rendezvous {rendezvous_id}: all {total} workers failed");
        inner.shutdown.set();
        return;
    }

    if !failures.is_empty() {
        for key in &failures {
            inner.host_manager.blacklist(&key.host);
        }
    }

    if inner.host_manager.count_available_slots() == 0 {
        warn!("rendezvous {rendezvous_id}: no non-blacklisted capacity remains");
        inner.shutdown.set();
        return;
    }

    info!(
        "rendezvous {rendezvous_id}: re-activating at width {}",
        inner.config.min_np
    );
    let inner = inner.clone();
    thread::spawn(move || {
        if let Err(err) = activate(&inner, inner.config.min_np, None) {
            warn!("reconfiguration activation failed: {err}");
            inner.shutdown.set();
        }
    });
}
