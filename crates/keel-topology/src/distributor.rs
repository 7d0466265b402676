//! Target partition distribution.
//!
//! A distributor maps every partition to the ordered list of members that
//! should host it. The first member of a list is the primary.

use std::collections::{BTreeMap, BTreeSet};

use keel_meta::MemberId;

use crate::topology::PartitionId;

/// Partition to ordered member list, primary first.
pub type PartitionDistribution = BTreeMap<PartitionId, Vec<MemberId>>;

/// Strategy computing the desired replica placement.
pub trait PartitionDistributor: Send + Sync {
    /// Computes the placement of `partitions` over `members`.
    ///
    /// Implementations must be deterministic for fixed inputs.
    fn distribute(
        &self,
        members: &BTreeSet<MemberId>,
        partitions: &[PartitionId],
        replication_factor: usize,
    ) -> PartitionDistribution;
}

/// Spreads partitions over members in sorted id order, shifting the starting
/// member by one for each successive partition.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoundRobinDistributor;

impl RoundRobinDistributor {
    /// Creates the distributor.
    pub fn new() -> Self {
        Self
    }
}

impl PartitionDistributor for RoundRobinDistributor {
    fn distribute(
        &self,
        members: &BTreeSet<MemberId>,
        partitions: &[PartitionId],
        replication_factor: usize,
    ) -> PartitionDistribution {
        distribute(members, partitions, replication_factor)
    }
}

/// Round-robin placement.
///
/// The partition at position `i` of `partitions` gets `replication_factor`
/// members starting at `i % members.len()` of the sorted member list,
/// wrapping around. With no members every partition maps to an empty list.
/// A replication factor above the member count is not an error here; each
/// list then holds every member once.
pub fn distribute(
    members: &BTreeSet<MemberId>,
    partitions: &[PartitionId],
    replication_factor: usize,
) -> PartitionDistribution {
    let sorted: Vec<&MemberId> = members.iter().collect();
    let count = sorted.len();

    partitions
        .iter()
        .enumerate()
        .map(|(i, partition)| {
            let replicas = if count == 0 {
                Vec::new()
            } else {
                (0..replication_factor.min(count))
                    .map(|offset| sorted[(i + offset) % count].clone())
                    .collect()
            };
            (*partition, replicas)
        })
        .collect()
}

/// Priority of the replica at `position` of a list of `length` members.
pub fn priority_for_position(position: usize, length: usize) -> u32 {
    u32::try_from(length.saturating_sub(position)).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn members(ids: &[&str]) -> BTreeSet<MemberId> {
        ids.iter().map(|id| MemberId::from(*id)).collect()
    }

    fn partitions(count: u32) -> Vec<PartitionId> {
        (1..=count).map(PartitionId::new).collect()
    }

    fn ids(list: &[MemberId]) -> Vec<&str> {
        list.iter().map(MemberId::as_str).collect()
    }

    #[test]
    fn test_round_robin_shifts_start() {
        let dist = distribute(&members(&["c", "a", "b"]), &partitions(4), 2);

        assert_eq!(ids(&dist[&PartitionId::new(1)]), vec!["a", "b"]);
        assert_eq!(ids(&dist[&PartitionId::new(2)]), vec!["b", "c"]);
        assert_eq!(ids(&dist[&PartitionId::new(3)]), vec!["c", "a"]);
        assert_eq!(ids(&dist[&PartitionId::new(4)]), vec!["a", "b"]);
    }

    #[test]
    fn test_position_follows_partition_order_not_id() {
        let parts = vec![PartitionId::new(10), PartitionId::new(20)];
        let dist = distribute(&members(&["a", "b"]), &parts, 1);

        assert_eq!(ids(&dist[&PartitionId::new(10)]), vec!["a"]);
        assert_eq!(ids(&dist[&PartitionId::new(20)]), vec!["b"]);
    }

    #[test]
    fn test_no_members() {
        let dist = distribute(&BTreeSet::new(), &partitions(3), 3);
        assert_eq!(dist.len(), 3);
        assert!(dist.values().all(Vec::is_empty));
    }

    #[test]
    fn test_no_partitions() {
        assert!(distribute(&members(&["a"]), &[], 1).is_empty());
    }

    #[test]
    fn test_replication_factor_above_member_count() {
        let dist = distribute(&members(&["a", "b"]), &partitions(1), 3);
        assert_eq!(ids(&dist[&PartitionId::new(1)]), vec!["a", "b"]);
    }

    #[test]
    fn test_deterministic() {
        let m = members(&["n-4", "n-1", "n-3", "n-2"]);
        let p = partitions(9);
        assert_eq!(distribute(&m, &p, 3), RoundRobinDistributor::new().distribute(&m, &p, 3));
    }

    #[test]
    fn test_priority_for_position() {
        assert_eq!(priority_for_position(0, 3), 3);
        assert_eq!(priority_for_position(2, 3), 1);
        assert_eq!(priority_for_position(3, 3), 0);
    }
}
