//! Injected collaborators named in `spec.md` §6. Modeled as small traits and
//! a first-class function type rather than an inheritance hierarchy, per the
//! Design Notes' "dynamic dispatch over discovery/notification/worker
//! factory" guidance.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::assign::SlotInfo;
use crate::error::DriverResult;
use crate::event::{HostEvent, ShutdownEvent};

/// Seconds since the Unix epoch, the unit every exit/notification timestamp
/// in this crate is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp(pub u64);

impl Timestamp {
    pub fn now() -> Self {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        Timestamp(secs)
    }
}

/// The rendezvous endpoint the driver publishes the slot ranking to, once
/// per reconfiguration, before any new supervisor is spawned.
pub trait RendezvousEndpoint: Send + Sync {
    fn init(&self, slots: &[SlotInfo]) -> DriverResult<()>;
}

/// One method, swallow-on-failure notification client. Failures are caught
/// by the caller and logged at `verbose >= 2`; this trait itself just
/// reports them.
pub trait NotificationClient: Send + Sync {
    fn notify_hosts_updated(&self, timestamp: Timestamp) -> DriverResult<()>;
}

/// Blocking worker factory: spawns (or attaches to) the training process for
/// `slot` and returns once it exits.
pub type CreateWorkerFn =
    Arc<dyn Fn(SlotInfo, ShutdownEvent, HostEvent) -> (i32, Timestamp) + Send + Sync>;
