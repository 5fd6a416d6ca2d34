//! fleetsched placement: group capacity, bin-packing and node scoring.
//!
//! This crate answers group-level questions about a node list: which
//! cluster groups can host a batch, which group is the tightest fit, and
//! how a single node scores for a unit. It holds no shared state; every
//! index is built from a snapshot by the caller and dropped afterwards.
//!
//! # Components
//!
//! - **`group`**: Cluster / supercompute group index (`FindGroups`, least-capacity pick)
//! - **`binpack`**: Narrowing of feasible bare-metal hosts to one group
//! - **`scorer`**: Node scoring (bin-packing, balance)

pub mod binpack;
pub mod error;
pub mod group;
pub mod scorer;

pub use binpack::binpack;
pub use error::CapacityError;
pub use group::{
    ClusterGroup, ClusterGroupInfos, GroupFilter, GroupIdentifier, GroupKind, GroupOptions,
    GroupType, Membership, UnavailableCounts, cluster_group_identifier, min_current_cap_filter,
    network_mode_filter, supercompute_group_identifier,
};
pub use scorer::{MAX_NODE_SCORE, NodeScore, ScoreBreakdown, ScoringWeights, score_node};
