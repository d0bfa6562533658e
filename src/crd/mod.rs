//! Custom Resource Definitions for bookkeeper-operator.

pub mod bookkeeper_cluster;

pub use bookkeeper_cluster::{
    BookkeeperCluster, BookkeeperClusterSpec, BookkeeperClusterStatus, Condition,
    ResourceRequirementsSpec, ResourceSpec, RolloutPhase, RolloutStatus, StorageSpec,
};
