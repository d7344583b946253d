//! Speculative parallel graph coloring (K1 coloring).
//!
//! ## Algorithm
//!
//! Every round has two synchronous steps over the set of nodes still to color:
//!
//! 1. **Coloring step.** Each node collects the colors currently held by its
//!    neighbours and takes the smallest color not among them. Workers read
//!    colors written concurrently by other workers, so adjacent nodes processed
//!    at the same time may pick the same color.
//! 2. **Validation step.** For every same-colored pair `(u, v)` where `u` was
//!    colored this round, the endpoint with the lower seeded priority (see
//!    [`node_priority`]) is queued for the next round; a neighbour colored in an
//!    earlier round always wins.
//!
//! The engine stops when no node is queued or after `max_rounds` rounds. Nodes
//! still queued keep their last proposal, so a handful of conflicts can remain;
//! callers treat that as reduced parallel safety, not as an error.

pub mod color_partition;

pub use color_partition::ColorPartition;

use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::graph::{NodeId, RelationshipCursor, WeightedGraph};
use crate::parallel::{node_priority, range_partitions};
use crate::progress::{NoopProgress, ProgressSink, TerminationFlag};

/// Color index; colors are dense from `0`.
pub type Color = usize;

const UNCOLORED: Color = Color::MAX;

/// Knobs of the coloring engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColoringConfig {
    /// Round budget; residual conflicts are tolerated once it is spent.
    pub max_rounds: usize,
    /// Number of worker batches the node set is split into.
    pub concurrency: usize,
    /// Minimum nodes per batch.
    pub min_batch_size: usize,
    /// Seed for conflict-resolution priorities.
    pub rng_seed: u64,
}

impl Default for ColoringConfig {
    fn default() -> Self {
        Self {
            max_rounds: 5,
            concurrency: 4,
            min_batch_size: 10_000,
            rng_seed: 42,
        }
    }
}

/// Output of [`K1Coloring::compute`].
#[derive(Debug, Clone, PartialEq)]
pub struct ColoringResult {
    colors: Vec<Color>,
    color_count: usize,
    used_colors: usize,
    ran_rounds: usize,
    did_converge: bool,
}

impl ColoringResult {
    /// Color of every node, indexed by node id.
    pub fn colors(&self) -> &[Color] {
        &self.colors
    }

    pub fn color(&self, node: NodeId) -> Color {
        self.colors[node]
    }

    /// One past the largest color in use; the index range of [`ColorPartition`].
    pub fn color_count(&self) -> usize {
        self.color_count
    }

    /// Number of distinct colors actually assigned.
    pub fn used_colors(&self) -> usize {
        self.used_colors
    }

    pub fn ran_rounds(&self) -> usize {
        self.ran_rounds
    }

    /// `true` when the last round left no node queued for recoloring.
    pub fn did_converge(&self) -> bool {
        self.did_converge
    }

    /// Number of undirected non-loop relationships whose endpoints share a color.
    pub fn residual_conflicts<G: WeightedGraph>(&self, graph: &G) -> usize {
        (0..graph.node_count())
            .into_par_iter()
            .map_init(
                || graph.concurrent_copy(),
                |cursor, node| {
                    let mut conflicts = 0;
                    cursor.for_each_relationship(node, 1.0, |s, t, _| {
                        if s < t && self.colors.get(t) == Some(&self.colors[s]) {
                            conflicts += 1;
                        }
                        true
                    });
                    conflicts
                },
            )
            .sum()
    }
}

/// Speculative parallel coloring engine.
pub struct K1Coloring<'g, G: WeightedGraph> {
    graph: &'g G,
    config: ColoringConfig,
    termination: TerminationFlag,
}

impl<'g, G: WeightedGraph> K1Coloring<'g, G> {
    pub fn new(graph: &'g G, config: ColoringConfig) -> Self {
        Self {
            graph,
            config,
            termination: TerminationFlag::new(),
        }
    }

    /// Rounds after the first stop early once `flag` is terminated.
    pub fn with_termination(mut self, flag: TerminationFlag) -> Self {
        self.termination = flag;
        self
    }

    /// Runs the coloring without progress reporting.
    pub fn compute(&self) -> ColoringResult {
        self.compute_with_progress(&NoopProgress)
    }

    /// Runs the coloring on the current rayon pool.
    pub fn compute_with_progress(&self, progress: &dyn ProgressSink) -> ColoringResult {
        let n = self.graph.node_count();
        let colors: Vec<AtomicUsize> = (0..n).map(|_| AtomicUsize::new(UNCOLORED)).collect();
        let mut nodes_to_color: Vec<NodeId> = (0..n).collect();
        let mut in_round = vec![false; n];
        let mut ran_rounds = 0;

        while !nodes_to_color.is_empty() && ran_rounds < self.config.max_rounds.max(1) {
            if ran_rounds > 0 && !self.termination.is_running() {
                log::warn!(
                    "Coloring terminated after {ran_rounds} rounds with {} nodes queued",
                    nodes_to_color.len()
                );
                break;
            }
            self.coloring_step(&nodes_to_color, &colors, progress);

            for &node in &nodes_to_color {
                in_round[node] = true;
            }
            let requeued = self.validation_step(&nodes_to_color, &colors, &in_round);
            for &node in &nodes_to_color {
                in_round[node] = false;
            }

            ran_rounds += 1;
            log::trace!(
                "Coloring round {ran_rounds}: {} colored, {} queued again",
                nodes_to_color.len() - requeued.len(),
                requeued.len()
            );
            nodes_to_color = requeued;
        }

        let colors: Vec<Color> = colors.into_iter().map(AtomicUsize::into_inner).collect();
        let color_count = colors.par_iter().copied().max().map_or(0, |c| c + 1);
        let mut seen = vec![false; color_count];
        for &c in &colors {
            seen[c] = true;
        }
        let used_colors = seen.iter().filter(|&&s| s).count();
        let did_converge = nodes_to_color.is_empty();
        if !did_converge {
            log::warn!(
                "Coloring did not converge within {} rounds: {} nodes keep a conflicting color",
                self.config.max_rounds,
                nodes_to_color.len()
            );
        }
        log::debug!("Coloring used {used_colors} colors in {ran_rounds} rounds");

        ColoringResult {
            colors,
            color_count,
            used_colors,
            ran_rounds,
            did_converge,
        }
    }

    fn coloring_step(&self, nodes: &[NodeId], colors: &[AtomicUsize], progress: &dyn ProgressSink) {
        let batches = range_partitions(self.config.concurrency, nodes.len(), self.config.min_batch_size);
        batches.into_par_iter().for_each(|batch| {
            let mut cursor = self.graph.concurrent_copy();
            // forbidden[c] == stamp  <=>  color c is taken by a neighbour of the current node
            let mut forbidden: Vec<usize> = Vec::new();
            let mut relationships = 0;
            for (stamp, &node) in (1..).zip(&nodes[batch]) {
                cursor.for_each_relationship(node, 1.0, |_, t, _| {
                    relationships += 1;
                    if t != node {
                        if let Some(c) = colors.get(t).map(|c| c.load(Ordering::Relaxed)) {
                            if c != UNCOLORED {
                                if c >= forbidden.len() {
                                    forbidden.resize(c + 1, 0);
                                }
                                forbidden[c] = stamp;
                            }
                        }
                    }
                    true
                });
                let color = forbidden
                    .iter()
                    .position(|&s| s != stamp)
                    .unwrap_or(forbidden.len());
                colors[node].store(color, Ordering::Relaxed);
            }
            progress.log_progress(relationships);
        });
    }

    fn validation_step(
        &self,
        nodes: &[NodeId],
        colors: &[AtomicUsize],
        in_round: &[bool],
    ) -> Vec<NodeId> {
        let seed = self.config.rng_seed;
        let batches = range_partitions(self.config.concurrency, nodes.len(), self.config.min_batch_size);
        let mut requeued: Vec<NodeId> = batches
            .into_par_iter()
            .flat_map_iter(|batch| {
                let mut cursor = self.graph.concurrent_copy();
                let mut local = Vec::new();
                for &node in &nodes[batch] {
                    let own = colors[node].load(Ordering::Relaxed);
                    let own_priority = node_priority(seed, node);
                    let mut conflict = false;
                    cursor.for_each_relationship(node, 1.0, |_, t, _| {
                        if t == node || t >= colors.len() {
                            return true;
                        }
                        if colors[t].load(Ordering::Relaxed) == own {
                            let loses = !in_round[t]
                                || (own_priority, node) < (node_priority(seed, t), t);
                            if loses {
                                conflict = true;
                                return false;
                            }
                        }
                        true
                    });
                    if conflict {
                        local.push(node);
                    }
                }
                local
            })
            .collect();
        requeued.sort_unstable();
        requeued
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::CsrGraph;

    fn single_threaded() -> ColoringConfig {
        ColoringConfig {
            concurrency: 1,
            min_batch_size: 1,
            ..Default::default()
        }
    }

    #[test]
    fn path_graph_needs_two_colors() {
        let g = CsrGraph::from_edges(5, &[(0, 1), (1, 2), (2, 3), (3, 4)]).unwrap();
        let result = K1Coloring::new(&g, single_threaded()).compute();
        assert_eq!(result.colors(), &[0, 1, 0, 1, 0]);
        assert_eq!(result.used_colors(), 2);
        assert_eq!(result.color_count(), 2);
        assert!(result.did_converge());
        assert_eq!(result.ran_rounds(), 1);
        assert_eq!(result.residual_conflicts(&g), 0);
    }

    #[test]
    fn clique_gets_one_color_per_node() {
        let mut edges = Vec::new();
        for u in 0..6 {
            for v in (u + 1)..6 {
                edges.push((u, v));
            }
        }
        let g = CsrGraph::from_edges(6, &edges).unwrap();
        let result = K1Coloring::new(&g, single_threaded()).compute();
        assert_eq!(result.used_colors(), 6);
        assert_eq!(result.residual_conflicts(&g), 0);
    }

    #[test]
    fn isolated_nodes_share_color_zero() {
        let g = CsrGraph::from_edges(4, &[]).unwrap();
        let result = K1Coloring::new(&g, single_threaded()).compute();
        assert_eq!(result.colors(), &[0, 0, 0, 0]);
        assert_eq!(result.used_colors(), 1);
    }

    #[test]
    fn self_loops_do_not_force_recoloring() {
        let g = CsrGraph::from_edges(2, &[(0, 0), (0, 1)]).unwrap();
        let result = K1Coloring::new(&g, single_threaded()).compute();
        assert_ne!(result.color(0), result.color(1));
        assert!(result.did_converge());
    }

    #[test]
    fn empty_graph_has_no_colors() {
        let g = CsrGraph::from_edges(0, &[]).unwrap();
        let result = K1Coloring::new(&g, single_threaded()).compute();
        assert_eq!(result.color_count(), 0);
        assert_eq!(result.ran_rounds(), 0);
        assert!(result.did_converge());
    }

    /// Single edge `0 - 1` whose first two traversals wait for each other, so
    /// both endpoints see the other one uncolored in the first round.
    struct LockstepEdge {
        barrier: std::sync::Barrier,
        arrivals: AtomicUsize,
    }

    impl LockstepEdge {
        fn new() -> Self {
            Self {
                barrier: std::sync::Barrier::new(2),
                arrivals: AtomicUsize::new(0),
            }
        }
    }

    struct LockstepCursor<'a>(&'a LockstepEdge);

    impl RelationshipCursor for LockstepCursor<'_> {
        fn for_each_relationship<F>(&mut self, node: NodeId, default_weight: f64, mut visitor: F)
        where
            F: FnMut(NodeId, NodeId, f64) -> bool,
        {
            visitor(node, 1 - node, default_weight);
            if self.0.arrivals.fetch_add(1, Ordering::SeqCst) < 2 {
                self.0.barrier.wait();
            }
        }
    }

    impl WeightedGraph for LockstepEdge {
        type Cursor<'a> = LockstepCursor<'a>;
        fn node_count(&self) -> usize {
            2
        }
        fn relationship_count(&self) -> usize {
            2
        }
        fn degree(&self, _node: NodeId) -> usize {
            1
        }
        fn concurrent_copy(&self) -> Self::Cursor<'_> {
            LockstepCursor(self)
        }
    }

    struct TerminateOnProgress(TerminationFlag);

    impl ProgressSink for TerminateOnProgress {
        fn begin_sub_task(&self, _name: &str) {}
        fn end_sub_task(&self, _name: &str) {}
        fn log_progress(&self, _units: usize) {
            self.0.terminate();
        }
    }

    fn lockstep_config() -> ColoringConfig {
        ColoringConfig {
            concurrency: 2,
            min_batch_size: 1,
            ..Default::default()
        }
    }

    #[test]
    fn lockstep_conflict_is_resolved_in_second_round() {
        let g = LockstepEdge::new();
        let pool = crate::parallel::build_pool(2).unwrap();
        let result = pool.install(|| K1Coloring::new(&g, lockstep_config()).compute());
        assert_eq!(result.ran_rounds(), 2);
        assert!(result.did_converge());
        assert_ne!(result.color(0), result.color(1));
    }

    #[test]
    fn termination_during_a_round_stops_before_the_next() {
        let g = LockstepEdge::new();
        let flag = TerminationFlag::new();
        let pool = crate::parallel::build_pool(2).unwrap();
        let result = pool.install(|| {
            K1Coloring::new(&g, lockstep_config())
                .with_termination(flag.clone())
                .compute_with_progress(&TerminateOnProgress(flag.clone()))
        });
        assert!(!flag.is_running());
        assert_eq!(result.ran_rounds(), 1);
        assert!(!result.did_converge());
        assert_eq!(result.colors(), &[0, 0]);
    }

    #[test]
    fn parallel_batches_resolve_conflicts() {
        // ring of 64 nodes split into many tiny batches
        let n = 64;
        let edges: Vec<_> = (0..n).map(|i| (i, (i + 1) % n)).collect();
        let g = CsrGraph::from_edges(n, &edges).unwrap();
        let cfg = ColoringConfig {
            concurrency: 16,
            min_batch_size: 1,
            max_rounds: 20,
            rng_seed: 7,
        };
        let pool = crate::parallel::build_pool(4).unwrap();
        let result = pool.install(|| K1Coloring::new(&g, cfg).compute());
        assert!(result.did_converge());
        assert_eq!(result.residual_conflicts(&g), 0);
        assert!(result.used_colors() <= 3);
    }
}
