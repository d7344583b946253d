#![cfg_attr(docsrs, feature(doc_cfg))]
//! # colored-modularity
//!
//! colored-modularity detects communities in large weighted undirected graphs
//! by maximizing modularity with a coloring-parallelized local-move optimizer.
//!
//! ## Features
//! - Speculative parallel graph coloring (K1 coloring) so nodes of one color can
//!   be moved concurrently without racing on each other's community
//! - Double-buffered community state with lock-free per-community weight
//!   accumulation
//! - Optional seeding from caller-supplied community values, reported back in
//!   the caller's id space
//! - Cooperative cancellation and a nested progress task tree
//! - `CsrGraph`, an in-memory weighted graph implementing the [`graph::WeightedGraph`] view
//!
//! ## Determinism
//!
//! Coloring conflicts are resolved by priorities mixed from `rng_seed` and the
//! node id, which do not change between processes, so a run on a
//! single-threaded pool is reproducible. With more threads the
//! coloring (and thus the move order) may vary between runs.
//!
//! ## Usage
//!
//! ```
//! use colored_modularity::prelude::*;
//!
//! let graph = CsrGraph::from_edges(6, &[(0, 1), (1, 2), (0, 2), (3, 4), (4, 5), (3, 5), (2, 3)])?;
//! let config = ModularityConfig { concurrency: 2, ..ModularityConfig::default() };
//! let result = ModularityOptimizer::new(&graph, config)?.compute()?;
//! assert_eq!(result.community_count(), 2);
//! # Ok::<(), ModularityError>(())
//! ```

pub mod coloring;
pub mod community;
pub mod debug_invariants;
pub mod graph;
pub mod modularity_error;
pub mod optimizer;
pub mod parallel;
pub mod progress;

pub use debug_invariants::DebugInvariants;
pub use modularity_error::ModularityError;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::coloring::{ColorPartition, ColoringConfig, ColoringResult, K1Coloring};
    pub use crate::community::{ModularityCounters, Seed};
    pub use crate::debug_invariants::DebugInvariants;
    pub use crate::graph::{CsrGraph, CsrGraphBuilder, NodeId, RelationshipCursor, WeightedGraph};
    pub use crate::modularity_error::ModularityError;
    pub use crate::optimizer::{ModularityConfig, ModularityOptimizer, ModularityResult};
    pub use crate::progress::{LogProgress, NoopProgress, ProgressSink, TerminationFlag};
}
