//! fleetsched-core: types shared by every fleetsched crate.
//!
//! - [`identity`]: `clusterId/localName` qualified names
//! - [`labels`]: the node and placement-unit label vocabulary
//! - [`types`]: [`Node`], [`PlacementUnit`] and [`Resources`]
//! - [`selector`]: label selectors used for affinity and group filtering
//! - [`instance`]: instance requests and schedule responses
//! - [`config`]: `fleetsched.toml`

pub mod config;
pub mod identity;
pub mod instance;
pub mod labels;
pub mod quantity;
pub mod selector;
pub mod types;

pub use config::{ClusterConfig, ClusterKind, LOCAL_BAREMETAL_CLUSTER_ID, SchedulerConfig};
pub use identity::{IdentityError, QualifiedName, qualify, split};
pub use instance::{InstanceRequest, InstanceResult, NetworkInfo, ScheduleResponse};
pub use quantity::{Quantity, QuantityError};
pub use selector::{NodeSelector, NodeSelectorTerm, Operator, PreferredTerm, Requirement};
pub use types::{
    InstanceCategory, NetworkMode, Node, NodeTraits, PlacementUnit, Resources,
    TopologySpreadConstraint,
};
