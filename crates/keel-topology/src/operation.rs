//! Topology change operations.

use serde::{Deserialize, Serialize};
use std::fmt;

use keel_meta::MemberId;

use crate::topology::PartitionId;

/// What happens to one member's replica of one partition.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PartitionChange {
    /// The member starts hosting the partition with the given priority.
    Join {
        /// Leadership priority of the new replica.
        priority: u32,
    },
    /// The member stops hosting the partition.
    Leave,
    /// The member keeps hosting the partition with a new priority.
    ReconfigurePriority {
        /// New leadership priority.
        priority: u32,
    },
}

/// A single step of a reconfiguration plan, applied by the coordinator.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TopologyChangeOperation {
    /// Partition being changed.
    pub partition: PartitionId,
    /// Member whose replica changes.
    pub member: MemberId,
    /// The change.
    pub change: PartitionChange,
}

impl TopologyChangeOperation {
    /// `member` joins `partition` with `priority`.
    pub fn join(partition: PartitionId, member: MemberId, priority: u32) -> Self {
        Self {
            partition,
            member,
            change: PartitionChange::Join { priority },
        }
    }

    /// `member` leaves `partition`.
    pub fn leave(partition: PartitionId, member: MemberId) -> Self {
        Self {
            partition,
            member,
            change: PartitionChange::Leave,
        }
    }

    /// `member` keeps `partition` with a new `priority`.
    pub fn reconfigure_priority(partition: PartitionId, member: MemberId, priority: u32) -> Self {
        Self {
            partition,
            member,
            change: PartitionChange::ReconfigurePriority { priority },
        }
    }

    /// Returns true for joins.
    pub fn is_join(&self) -> bool {
        matches!(self.change, PartitionChange::Join { .. })
    }

    /// Returns true for leaves.
    pub fn is_leave(&self) -> bool {
        matches!(self.change, PartitionChange::Leave)
    }
}

impl fmt::Display for TopologyChangeOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.change {
            PartitionChange::Join { priority } => write!(
                f,
                "join(partition={}, member={}, priority={})",
                self.partition, self.member, priority
            ),
            PartitionChange::Leave => {
                write!(f, "leave(partition={}, member={})", self.partition, self.member)
            }
            PartitionChange::ReconfigurePriority { priority } => write!(
                f,
                "reconfigure-priority(partition={}, member={}, priority={})",
                self.partition, self.member, priority
            ),
        }
    }
}
