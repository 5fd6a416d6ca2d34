//! fleetsched-scheduler: batch placement of compute instances.
//!
//! Converts instance requests into placement units, derives the network
//! placement of the batch, and runs one scheduling cycle per unit against
//! a snapshot of the capacity cache. A batch is all-or-nothing.
//!
//! # Architecture
//!
//! ```text
//! schedule(instances)
//!   ├── network_info: network mode, supercompute / cluster group ids
//!   └── per instance (requested size = remaining instances)
//!         ├── instance_to_unit
//!         └── schedule_one_unit
//!               ├── update_snapshot
//!               ├── pre-filter ─► parallel filter (rotating start, early stop)
//!               ├── binpack (bare metal)
//!               ├── score ─► select_host
//!               └── assume ─► reserve ─► finish_binding
//!
//! on failure: unassume every unit of the batch
//! ```
//!
//! # Components
//!
//! - **`framework`**: Extension points, `Status`, `Profile`
//! - **`plugins`**: Built-in filters and scorers, default profile
//! - **`instance`**: Instance conversion and group resolution
//! - **`statistics`**: Per-node and per-instance-type capacity reports

pub mod error;
pub mod framework;
pub mod instance;
pub mod parallel;
pub mod plugins;
pub mod rotation;
pub mod schedule;
pub mod scheduler;
pub mod statistics;

pub use error::{SchedulerError, SchedulerResult};
pub use framework::{
    Code, CycleState, Diagnosis, FitError, Framework, NodePluginScores, Profile, Status,
};
pub use instance::{DEFAULT_SCHEDULER_NAME, instance_to_unit, network_info};
pub use plugins::default_profile;
pub use scheduler::{ScheduleResult, Scheduler, select_host};
pub use statistics::{
    InstanceTypeCatalog, InstanceTypeStatistics, NodeResources, NodeStatistics,
    SchedulerStatistics, StaticCatalog, StatisticsReporter,
};
