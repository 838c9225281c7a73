//! Error taxonomy for the elastic driver. One enum, one `Result` alias,
//! matching the corpus's preference for a single `thiserror`-derived type
//! per crate over ad-hoc `Box<dyn Error>`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DriverError {
    /// The initial wait for `[min_np, max_np]` capacity exceeded `start_timeout`.
    #[error("timed out waiting for minimum capacity after {0:?}")]
    StartTimeout(std::time::Duration),

    /// A waiter's recorded state was overwritten by a later report for the
    /// same key while it was parked on the barrier.
    #[error("worker state for {0:?} was overridden while waiting on the barrier")]
    StateOverridden(crate::registry::WorkerKey),

    /// The barrier was permanently broken (timeout or external break) rather
    /// than reset for a fresh generation.
    #[error("rendezvous barrier broken")]
    BarrierBroken,

    /// Assigned slot total fell below `min_np`.
    #[error("insufficient resources: {assigned} slots assigned, need at least {min_np}")]
    InsufficientResources { assigned: u32, min_np: u32 },

    /// Assigned slot total exceeded `max_np`.
    #[error("too many resources: {assigned} slots assigned, max is {max_np}")]
    TooManyResources { assigned: u32, max_np: u32 },

    /// The assigner or rendezvous endpoint failed during reconfiguration.
    #[error("activation failed: {0}")]
    ActivationFailed(String),

    /// A worker-notification RPC failed. Non-fatal; logged and counted, never
    /// propagated past the call site that catches it.
    #[error("notification failed: {0}")]
    NotificationFailed(String),
}

pub type DriverResult<T> = Result<T, DriverError>;
