//! Error types for topology planning.

use thiserror::Error;

/// Result type alias for topology operations.
pub type TopologyResult<T> = Result<T, TopologyError>;

/// Error variants for topology planning and application.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TopologyError {
    /// The requested reconfiguration cannot be satisfied. Nothing was planned.
    #[error("invalid reconfiguration request: {reason}")]
    InvalidRequest {
        /// Description of the infeasibility.
        reason: String,
    },

    /// An operation does not fit the topology it was applied to.
    #[error("invalid operation: {reason}")]
    InvalidOperation {
        /// Description of the conflict.
        reason: String,
    },

    /// The transformer configuration is unusable.
    #[error("invalid transformer config: {reason}")]
    InvalidConfig {
        /// Description of the problem.
        reason: String,
    },
}
