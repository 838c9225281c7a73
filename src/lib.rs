pub mod assign;
pub mod config;
pub mod contracts;
pub mod driver;
pub mod error;
pub mod event;
pub mod host;
pub mod registry;
pub mod supervisor;

pub use assign::{Assigner, SlotInfo};
pub use config::{CliArgs, Config};
pub use contracts::{CreateWorkerFn, NotificationClient, RendezvousEndpoint, Timestamp};
pub use driver::Driver;
pub use error::{DriverError, DriverResult};
pub use event::{Event, HostEvent, ShutdownEvent};
pub use host::{Discovery, Host, HostManager};
pub use registry::{RendezvousId, WorkerKey, WorkerRegistry, WorkerState};
pub use supervisor::{Results, WorkerSupervisor};
