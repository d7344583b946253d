//! Weighted undirected graph view consumed by the optimizer.
//!
//! The optimizer only ever reads the graph through [`WeightedGraph`]; [`CsrGraph`]
//! is the in-memory implementation shipped with the crate.

pub mod csr;
pub mod graph_traits;

pub use csr::{CsrCursor, CsrGraph, CsrGraphBuilder};
pub use graph_traits::{RelationshipCursor, WeightedGraph};

/// Dense node identifier in `[0, node_count)`.
pub type NodeId = usize;

/// Weight reported for relationships that carry no weight property.
pub const DEFAULT_WEIGHT: f64 = 1.0;
