//! Cluster topology snapshots.
//!
//! A [`ClusterTopology`] records which members host each partition and with
//! what leadership priority. The coordinator owns it; planning code only
//! reads snapshots and produces new ones.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use keel_meta::MemberId;

use crate::distributor::{priority_for_position, PartitionDistribution};
use crate::error::{TopologyError, TopologyResult};
use crate::operation::{PartitionChange, TopologyChangeOperation};

/// Identifies a partition of the replicated log
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartitionId(u32);

impl PartitionId {
    /// Creates a new PartitionId from a raw u32 value
    pub fn new(id: u32) -> Self {
        PartitionId(id)
    }

    /// Returns the raw u32 value of this partition ID
    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A member's replica of a partition.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionReplica {
    /// Leadership priority. The replica with the highest priority is the primary.
    pub priority: u32,
}

/// Partition to replica-set mapping of the whole cluster.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterTopology {
    partitions: BTreeMap<PartitionId, BTreeMap<MemberId, PartitionReplica>>,
}

impl ClusterTopology {
    /// Creates an empty topology.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a topology hosting each partition on the listed members, with
    /// priorities following list order.
    pub fn from_distribution(distribution: &PartitionDistribution) -> Self {
        let partitions = distribution
            .iter()
            .map(|(partition, members)| {
                let replicas = members
                    .iter()
                    .enumerate()
                    .map(|(position, member)| {
                        let priority = priority_for_position(position, members.len());
                        (member.clone(), PartitionReplica { priority })
                    })
                    .collect();
                (*partition, replicas)
            })
            .collect();
        Self { partitions }
    }

    /// Adds a partition with no replicas. Existing partitions are left alone.
    pub fn add_partition(&mut self, partition: PartitionId) {
        self.partitions.entry(partition).or_default();
    }

    /// Sets `member`'s replica of `partition`, adding the partition if needed.
    pub fn insert_replica(&mut self, partition: PartitionId, member: MemberId, priority: u32) {
        self.partitions
            .entry(partition)
            .or_default()
            .insert(member, PartitionReplica { priority });
    }

    /// Partition ids in ascending order.
    pub fn partition_ids(&self) -> Vec<PartitionId> {
        self.partitions.keys().copied().collect()
    }

    /// Replicas of `partition`, keyed by member.
    pub fn replicas(&self, partition: PartitionId) -> Option<&BTreeMap<MemberId, PartitionReplica>> {
        self.partitions.get(&partition)
    }

    /// Members hosting `partition`.
    pub fn members_of(&self, partition: PartitionId) -> BTreeSet<MemberId> {
        self.partitions
            .get(&partition)
            .map(|replicas| replicas.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of replicas of `partition`.
    pub fn replica_count(&self, partition: PartitionId) -> usize {
        self.partitions.get(&partition).map_or(0, BTreeMap::len)
    }

    /// Members hosting at least one partition.
    pub fn members(&self) -> BTreeSet<MemberId> {
        self.partitions
            .values()
            .flat_map(|replicas| replicas.keys().cloned())
            .collect()
    }

    /// The largest replica count of any partition, zero without partitions.
    pub fn replication_factor(&self) -> usize {
        self.partitions.values().map(BTreeMap::len).max().unwrap_or(0)
    }

    /// Highest-priority replica of `partition`; ties go to the lower member id.
    pub fn primary(&self, partition: PartitionId) -> Option<&MemberId> {
        self.sorted_replicas(partition).into_iter().next()
    }

    fn sorted_replicas(&self, partition: PartitionId) -> Vec<&MemberId> {
        let mut replicas: Vec<(&MemberId, u32)> = self
            .partitions
            .get(&partition)
            .map(|r| r.iter().map(|(m, replica)| (m, replica.priority)).collect())
            .unwrap_or_default();
        replicas.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        replicas.into_iter().map(|(m, _)| m).collect()
    }

    /// Members of every partition, highest priority first.
    pub fn distribution(&self) -> PartitionDistribution {
        self.partitions
            .keys()
            .map(|partition| {
                let members = self
                    .sorted_replicas(*partition)
                    .into_iter()
                    .cloned()
                    .collect();
                (*partition, members)
            })
            .collect()
    }

    /// Applies one operation and returns the resulting snapshot.
    ///
    /// Fails without side effects if the partition is unknown, if a join
    /// targets a member that already hosts the partition, or if a leave or
    /// priority change targets one that does not.
    pub fn apply(&self, operation: &TopologyChangeOperation) -> TopologyResult<Self> {
        let mut next = self.clone();
        let replicas = next.partitions.get_mut(&operation.partition).ok_or_else(|| {
            TopologyError::InvalidOperation {
                reason: format!("{operation}: unknown partition"),
            }
        })?;

        let hosted = replicas.contains_key(&operation.member);
        match operation.change {
            PartitionChange::Join { priority } => {
                if hosted {
                    return Err(TopologyError::InvalidOperation {
                        reason: format!("{operation}: member already hosts the partition"),
                    });
                }
                replicas.insert(operation.member.clone(), PartitionReplica { priority });
            }
            PartitionChange::Leave => {
                if replicas.remove(&operation.member).is_none() {
                    return Err(TopologyError::InvalidOperation {
                        reason: format!("{operation}: member does not host the partition"),
                    });
                }
            }
            PartitionChange::ReconfigurePriority { priority } => {
                match replicas.get_mut(&operation.member) {
                    Some(replica) => replica.priority = priority,
                    None => {
                        return Err(TopologyError::InvalidOperation {
                            reason: format!("{operation}: member does not host the partition"),
                        })
                    }
                }
            }
        }

        Ok(next)
    }

    /// Applies `operations` in order, stopping at the first failure.
    pub fn apply_all<'a>(
        &self,
        operations: impl IntoIterator<Item = &'a TopologyChangeOperation>,
    ) -> TopologyResult<Self> {
        operations
            .into_iter()
            .try_fold(self.clone(), |topology, op| topology.apply(op))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(id: &str) -> MemberId {
        MemberId::from(id)
    }

    fn p(id: u32) -> PartitionId {
        PartitionId::new(id)
    }

    fn sample() -> ClusterTopology {
        let mut distribution = PartitionDistribution::new();
        distribution.insert(p(1), vec![m("a"), m("b")]);
        distribution.insert(p(2), vec![m("b"), m("c")]);
        ClusterTopology::from_distribution(&distribution)
    }

    #[test]
    fn test_from_distribution_assigns_priorities() {
        let topology = sample();
        let replicas = topology.replicas(p(1)).unwrap();
        assert_eq!(replicas[&m("a")].priority, 2);
        assert_eq!(replicas[&m("b")].priority, 1);
        assert_eq!(topology.primary(p(2)), Some(&m("b")));
    }

    #[test]
    fn test_distribution_round_trips() {
        let topology = sample();
        assert_eq!(ClusterTopology::from_distribution(&topology.distribution()), topology);
    }

    #[test]
    fn test_queries() {
        let topology = sample();
        assert_eq!(topology.partition_ids(), vec![p(1), p(2)]);
        assert_eq!(topology.replication_factor(), 2);
        assert_eq!(topology.replica_count(p(3)), 0);
        assert_eq!(
            topology.members().into_iter().collect::<Vec<_>>(),
            vec![m("a"), m("b"), m("c")]
        );
    }

    #[test]
    fn test_empty_topology() {
        let topology = ClusterTopology::new();
        assert_eq!(topology.replication_factor(), 0);
        assert!(topology.distribution().is_empty());
        assert_eq!(topology.primary(p(1)), None);
    }

    #[test]
    fn test_apply_join_and_leave() {
        let topology = sample();
        let joined = topology
            .apply(&TopologyChangeOperation::join(p(1), m("c"), 3))
            .unwrap();
        assert_eq!(joined.replica_count(p(1)), 3);
        assert_eq!(joined.primary(p(1)), Some(&m("c")));

        let left = joined
            .apply(&TopologyChangeOperation::leave(p(1), m("a")))
            .unwrap();
        assert_eq!(left.members_of(p(1)), [m("b"), m("c")].into_iter().collect());

        // the original snapshot is untouched
        assert_eq!(topology.replica_count(p(1)), 2);
    }

    #[test]
    fn test_apply_reconfigure_priority() {
        let topology = sample()
            .apply(&TopologyChangeOperation::reconfigure_priority(p(1), m("b"), 5))
            .unwrap();
        assert_eq!(topology.primary(p(1)), Some(&m("b")));
    }

    #[test]
    fn test_apply_rejects_conflicts() {
        let topology = sample();
        assert!(topology
            .apply(&TopologyChangeOperation::join(p(1), m("a"), 1))
            .is_err());
        assert!(topology
            .apply(&TopologyChangeOperation::leave(p(1), m("c")))
            .is_err());
        assert!(topology
            .apply(&TopologyChangeOperation::reconfigure_priority(p(1), m("c"), 1))
            .is_err());
        assert!(matches!(
            topology.apply(&TopologyChangeOperation::join(p(9), m("a"), 1)),
            Err(TopologyError::InvalidOperation { .. })
        ));
    }

    #[test]
    fn test_primary_tie_breaks_on_member_id() {
        let mut topology = ClusterTopology::new();
        topology.insert_replica(p(1), m("z"), 1);
        topology.insert_replica(p(1), m("y"), 1);
        assert_eq!(topology.primary(p(1)), Some(&m("y")));
    }
}
