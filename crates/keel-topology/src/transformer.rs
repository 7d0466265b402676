//! Topology reconciliation.
//!
//! Diffs a topology snapshot against the distribution the cluster should
//! have and plans the operations that move it there. Per partition, new
//! replicas join before priorities change and before old replicas leave, so
//! a partition never drops below its current replica count while the plan
//! runs.

use std::collections::BTreeSet;
use tracing::{debug, info, warn};

use keel_meta::MemberId;

use crate::config::{OperationOrdering, TransformerConfig};
use crate::distributor::{priority_for_position, PartitionDistributor, RoundRobinDistributor};
use crate::error::{TopologyError, TopologyResult};
use crate::operation::TopologyChangeOperation;
use crate::topology::{ClusterTopology, PartitionId};

/// The cluster shape the caller wants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconfigurationRequest {
    /// Members that should host partitions once the plan completes.
    pub members: BTreeSet<MemberId>,
    /// Replicas per partition. `None` keeps the topology's current factor.
    pub replication_factor: Option<usize>,
}

impl ReconfigurationRequest {
    /// Request for `members`, keeping the current replication factor.
    pub fn new(members: impl IntoIterator<Item = MemberId>) -> Self {
        Self {
            members: members.into_iter().collect(),
            replication_factor: None,
        }
    }

    /// Sets an explicit replication factor.
    pub fn with_replication_factor(mut self, replication_factor: usize) -> Self {
        self.replication_factor = Some(replication_factor);
        self
    }
}

#[derive(Debug, Default)]
struct PartitionPlan {
    joins: Vec<TopologyChangeOperation>,
    reprioritize: Vec<TopologyChangeOperation>,
    leaves: Vec<TopologyChangeOperation>,
}

impl PartitionPlan {
    fn is_empty(&self) -> bool {
        self.joins.is_empty() && self.reprioritize.is_empty() && self.leaves.is_empty()
    }
}

/// Plans topology changes.
#[derive(Debug, Clone, Default)]
pub struct TopologyTransformer<D = RoundRobinDistributor> {
    distributor: D,
    config: TransformerConfig,
}

impl TopologyTransformer<RoundRobinDistributor> {
    /// Round-robin transformer with the default ordering.
    pub fn new() -> Self {
        Self::default()
    }

    /// Round-robin transformer with `config`.
    pub fn with_config(config: TransformerConfig) -> Self {
        Self::with_distributor(RoundRobinDistributor, config)
    }
}

impl<D: PartitionDistributor> TopologyTransformer<D> {
    /// Transformer using a custom distributor.
    pub fn with_distributor(distributor: D, config: TransformerConfig) -> Self {
        Self {
            distributor,
            config,
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &TransformerConfig {
        &self.config
    }

    /// Computes the operations that turn `topology` into the distribution
    /// requested by `request`.
    ///
    /// Returns `InvalidRequest` and plans nothing when the replication factor
    /// exceeds the number of target members. An empty list means the
    /// topology already matches.
    pub fn transform(
        &self,
        topology: &ClusterTopology,
        request: &ReconfigurationRequest,
    ) -> TopologyResult<Vec<TopologyChangeOperation>> {
        let replication_factor = request
            .replication_factor
            .unwrap_or_else(|| topology.replication_factor());

        if replication_factor > request.members.len() {
            warn!(
                replication_factor,
                members = request.members.len(),
                "rejecting reconfiguration: not enough members"
            );
            return Err(TopologyError::InvalidRequest {
                reason: format!(
                    "replication factor {} requires at least {} members, but only {} were given",
                    replication_factor,
                    replication_factor,
                    request.members.len()
                ),
            });
        }

        let partitions = topology.partition_ids();
        let target = self
            .distributor
            .distribute(&request.members, &partitions, replication_factor);

        let plans: Vec<PartitionPlan> = partitions
            .iter()
            .map(|partition| {
                let members = target.get(partition).map(Vec::as_slice).unwrap_or(&[]);
                plan_partition(topology, *partition, members)
            })
            .filter(|plan| !plan.is_empty())
            .collect();

        let operations = order(plans, self.config.ordering);

        if operations.is_empty() {
            debug!(partitions = partitions.len(), "topology already matches target");
        } else {
            info!(
                partitions = partitions.len(),
                members = request.members.len(),
                replication_factor,
                operations = operations.len(),
                ordering = ?self.config.ordering,
                "planned topology reconfiguration"
            );
        }

        Ok(operations)
    }
}

fn plan_partition(
    topology: &ClusterTopology,
    partition: PartitionId,
    target: &[MemberId],
) -> PartitionPlan {
    let mut plan = PartitionPlan::default();
    let current = topology.replicas(partition);

    for (position, member) in target.iter().enumerate() {
        let priority = priority_for_position(position, target.len());
        match current.and_then(|replicas| replicas.get(member)) {
            None => plan
                .joins
                .push(TopologyChangeOperation::join(partition, member.clone(), priority)),
            Some(replica) if replica.priority != priority => {
                plan.reprioritize
                    .push(TopologyChangeOperation::reconfigure_priority(
                        partition,
                        member.clone(),
                        priority,
                    ))
            }
            Some(_) => {}
        }
    }

    if let Some(replicas) = current {
        plan.leaves.extend(
            replicas
                .keys()
                .filter(|member| !target.contains(member))
                .map(|member| TopologyChangeOperation::leave(partition, member.clone())),
        );
    }

    if !plan.is_empty() {
        debug!(
            partition = %partition,
            joins = plan.joins.len(),
            reprioritize = plan.reprioritize.len(),
            leaves = plan.leaves.len(),
            "partition differs from target"
        );
    }

    plan
}

fn order(plans: Vec<PartitionPlan>, ordering: OperationOrdering) -> Vec<TopologyChangeOperation> {
    match ordering {
        OperationOrdering::ByPartition => plans
            .into_iter()
            .flat_map(|plan| {
                plan.joins
                    .into_iter()
                    .chain(plan.reprioritize)
                    .chain(plan.leaves)
            })
            .collect(),
        OperationOrdering::JoinsFirst => {
            let mut joins = Vec::new();
            let mut reprioritize = Vec::new();
            let mut leaves = Vec::new();
            for plan in plans {
                joins.extend(plan.joins);
                reprioritize.extend(plan.reprioritize);
                leaves.extend(plan.leaves);
            }
            joins.into_iter().chain(reprioritize).chain(leaves).collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributor::distribute;
    use crate::operation::PartitionChange;

    fn members(ids: &[&str]) -> BTreeSet<MemberId> {
        ids.iter().map(|id| MemberId::from(*id)).collect()
    }

    fn partitions(count: u32) -> Vec<PartitionId> {
        (1..=count).map(PartitionId::new).collect()
    }

    fn topology(ids: &[&str], partition_count: u32, replication_factor: usize) -> ClusterTopology {
        ClusterTopology::from_distribution(&distribute(
            &members(ids),
            &partitions(partition_count),
            replication_factor,
        ))
    }

    #[test]
    fn test_no_change_is_empty() {
        let current = topology(&["a", "b", "c"], 6, 2);
        let ops = TopologyTransformer::new()
            .transform(&current, &ReconfigurationRequest::new(members(&["a", "b", "c"])))
            .unwrap();
        assert!(ops.is_empty());
    }

    #[test]
    fn test_empty_topology_plans_nothing() {
        let ops = TopologyTransformer::new()
            .transform(&ClusterTopology::new(), &ReconfigurationRequest::new(members(&["a"])))
            .unwrap();
        assert!(ops.is_empty());
    }

    #[test]
    fn test_rejects_too_few_members() {
        let current = topology(&["a", "b", "c"], 3, 3);
        let err = TopologyTransformer::new()
            .transform(&current, &ReconfigurationRequest::new(members(&["a", "b"])))
            .unwrap_err();

        match err {
            TopologyError::InvalidRequest { reason } => {
                assert!(reason.contains('3'));
                assert!(reason.contains('2'));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_explicit_replication_factor_overrides_current() {
        let current = topology(&["a", "b", "c"], 3, 1);
        let request =
            ReconfigurationRequest::new(members(&["a", "b", "c"])).with_replication_factor(2);
        let ops = TopologyTransformer::new().transform(&current, &request).unwrap();

        let expected = distribute(&members(&["a", "b", "c"]), &partitions(3), 2);
        assert_eq!(current.apply_all(&ops).unwrap().distribution(), expected);
        assert!(ops.iter().all(|op| !op.is_leave()));
    }

    #[test]
    fn test_scale_out_reaches_target() {
        let current = topology(&["a", "b"], 4, 2);
        let request = ReconfigurationRequest::new(members(&["a", "b", "c", "d"]));
        let ops = TopologyTransformer::new().transform(&current, &request).unwrap();

        let expected = distribute(&members(&["a", "b", "c", "d"]), &partitions(4), 2);
        assert_eq!(current.apply_all(&ops).unwrap().distribution(), expected);
    }

    #[test]
    fn test_joins_first_ordering() {
        let current = topology(&["a", "b"], 4, 2);
        let request = ReconfigurationRequest::new(members(&["c", "d"]));
        let ops = TopologyTransformer::new().transform(&current, &request).unwrap();

        let first_leave = ops.iter().position(|op| op.is_leave()).unwrap();
        assert!(ops[..first_leave].iter().all(|op| !op.is_leave()));
        assert!(ops[first_leave..].iter().all(|op| op.is_leave()));
        assert!(ops[..first_leave].iter().any(|op| op.is_join()));
    }

    #[test]
    fn test_by_partition_ordering() {
        let current = topology(&["a", "b"], 3, 2);
        let request = ReconfigurationRequest::new(members(&["c", "d"]));
        let transformer = TopologyTransformer::with_config(TransformerConfig::with_ordering(
            OperationOrdering::ByPartition,
        ));
        let ops = transformer.transform(&current, &request).unwrap();

        let order: Vec<PartitionId> = ops.iter().map(|op| op.partition).collect();
        let mut sorted = order.clone();
        sorted.sort();
        assert_eq!(order, sorted);

        for partition in partitions(3) {
            let kinds: Vec<u8> = ops
                .iter()
                .filter(|op| op.partition == partition)
                .map(|op| match op.change {
                    PartitionChange::Join { .. } => 0,
                    PartitionChange::ReconfigurePriority { .. } => 1,
                    PartitionChange::Leave => 2,
                })
                .collect();
            assert!(kinds.windows(2).all(|w| w[0] <= w[1]));
        }

        let expected = distribute(&members(&["c", "d"]), &partitions(3), 2);
        assert_eq!(current.apply_all(&ops).unwrap().distribution(), expected);
    }

    #[test]
    fn test_priority_only_change() {
        // Primary of partition 1 moves from "b" to "a".
        let mut current = ClusterTopology::new();
        current.insert_replica(PartitionId::new(1), MemberId::from("a"), 1);
        current.insert_replica(PartitionId::new(1), MemberId::from("b"), 2);

        let ops = TopologyTransformer::new()
            .transform(&current, &ReconfigurationRequest::new(members(&["a", "b"])))
            .unwrap();

        assert_eq!(
            ops,
            vec![
                TopologyChangeOperation::reconfigure_priority(
                    PartitionId::new(1),
                    MemberId::from("a"),
                    2
                ),
                TopologyChangeOperation::reconfigure_priority(
                    PartitionId::new(1),
                    MemberId::from("b"),
                    1
                ),
            ]
        );
        assert_eq!(
            current.apply_all(&ops).unwrap().primary(PartitionId::new(1)),
            Some(&MemberId::from("a"))
        );
    }

    #[test]
    fn test_zero_replication_factor_drains() {
        let current = topology(&["a", "b"], 2, 2);
        let request = ReconfigurationRequest::new(members(&["a", "b"])).with_replication_factor(0);
        let ops = TopologyTransformer::new().transform(&current, &request).unwrap();

        assert_eq!(ops.len(), 4);
        assert!(ops.iter().all(|op| op.is_leave()));
        assert_eq!(current.apply_all(&ops).unwrap().replication_factor(), 0);
    }
}
