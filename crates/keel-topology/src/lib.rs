#![warn(missing_docs)]

//! Keel partition topology subsystem
//!
//! Computes where partitions should live and plans the sequence of join,
//! priority and leave operations that moves a running cluster there without
//! reducing any partition's replica count along the way.

/// Transformer configuration
pub mod config;
/// Partition placement strategies
pub mod distributor;
/// Error types for topology planning
pub mod error;
/// Topology change operations
pub mod operation;
/// Cluster topology snapshots
pub mod topology;
/// Reconciliation planning
pub mod transformer;

pub use config::{OperationOrdering, TransformerConfig};
pub use distributor::{distribute, PartitionDistribution, PartitionDistributor, RoundRobinDistributor};
pub use error::{TopologyError, TopologyResult};
pub use operation::{PartitionChange, TopologyChangeOperation};
pub use topology::{ClusterTopology, PartitionId, PartitionReplica};
pub use transformer::{ReconfigurationRequest, TopologyTransformer};
