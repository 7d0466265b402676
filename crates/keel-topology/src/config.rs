//! Transformer configuration

use serde::{Deserialize, Serialize};

use crate::error::{TopologyError, TopologyResult};

/// Order in which a plan's operations run across partitions.
///
/// Within one partition joins always precede priority changes, which precede
/// leaves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationOrdering {
    /// Every join of every partition, then every priority change, then every
    /// leave. No partition shrinks before all partitions have grown.
    #[default]
    JoinsFirst,
    /// Partitions in ascending id order, each fully reconciled before the next.
    ByPartition,
}

/// Settings for [`TopologyTransformer`](crate::TopologyTransformer).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformerConfig {
    /// Inter-partition operation order.
    pub ordering: OperationOrdering,
}

impl TransformerConfig {
    /// Config with the given ordering.
    pub fn with_ordering(ordering: OperationOrdering) -> Self {
        Self { ordering }
    }

    /// Parses a JSON config. Missing fields take defaults.
    pub fn from_json(json: &str) -> TopologyResult<Self> {
        serde_json::from_str(json).map_err(|e| TopologyError::InvalidConfig {
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ordering() {
        assert_eq!(
            TransformerConfig::default().ordering,
            OperationOrdering::JoinsFirst
        );
    }

    #[test]
    fn test_from_json() {
        let config = TransformerConfig::from_json(r#"{"ordering": "by_partition"}"#).unwrap();
        assert_eq!(config.ordering, OperationOrdering::ByPartition);

        let config = TransformerConfig::from_json("{}").unwrap();
        assert_eq!(config, TransformerConfig::default());
    }

    #[test]
    fn test_from_json_rejects_unknown_ordering() {
        assert!(matches!(
            TransformerConfig::from_json(r#"{"ordering": "random"}"#),
            Err(TopologyError::InvalidConfig { .. })
        ));
    }
}
