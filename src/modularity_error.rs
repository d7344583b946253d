//! ModularityError: Unified error type for colored-modularity public APIs
//!
//! Configuration problems are reported before any parallel work starts; data
//! corruption met by a worker aborts the whole run.

use thiserror::Error;

use crate::graph::NodeId;

/// Unified error type for modularity optimization.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ModularityError {
    /// At least one iteration must run.
    #[error("Need to run at least one iteration, but got {0}")]
    InvalidMaxIterations(usize),
    /// The worker pool needs at least one thread.
    #[error("Concurrency must be at least 1, but got {0}")]
    InvalidConcurrency(usize),
    /// Parallel partitions must contain at least one node.
    #[error("Minimum batch size must be at least 1, but got {0}")]
    InvalidBatchSize(usize),
    /// Tolerance must be a finite, non-negative number.
    #[error("Tolerance must be finite and non-negative, but got {0}")]
    InvalidTolerance(f64),
    /// A present seed value was negative.
    #[error("Seeded values should be non-negative, but node {node} has seed {value}")]
    NegativeSeed { node: NodeId, value: i64 },
    /// The fresh external id of a node without a seed does not fit in `u64`.
    #[error("Node {node} has no seed and its fresh community id {max_seed} + 1 + {original_id} overflows")]
    MissingSeedOverflow {
        node: NodeId,
        original_id: u64,
        max_seed: u64,
    },
    /// The seed vector does not cover every node exactly once.
    #[error("Seed length mismatch: expected {expected} values, got {got}")]
    SeedLengthMismatch { expected: usize, got: usize },
    /// A relationship points outside `[0, node_count)`.
    #[error("Relationship ({node}, {target}) is out of range for a graph with {node_count} nodes")]
    RelationshipOutOfRange {
        node: NodeId,
        target: NodeId,
        node_count: usize,
    },
    /// A relationship carries a weight the modularity objective cannot use.
    #[error("Relationship ({node}, {target}) has invalid weight {weight}")]
    InvalidRelationshipWeight {
        node: NodeId,
        target: NodeId,
        weight: f64,
    },
    /// An original-id table does not cover every node exactly once.
    #[error("Original id table mismatch: expected {expected} ids, got {got}")]
    OriginalIdMismatch { expected: usize, got: usize },
    /// Two nodes were given the same original id.
    #[error("Original id {0} is assigned to more than one node")]
    DuplicateOriginalId(u64),
    /// The rayon worker pool could not be built.
    #[error("Failed to build worker pool: {0}")]
    ThreadPool(String),
    /// A structural invariant of the color partition or community state broke.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
}

impl From<rayon::ThreadPoolBuildError> for ModularityError {
    fn from(e: rayon::ThreadPoolBuildError) -> Self {
        ModularityError::ThreadPool(e.to_string())
    }
}
