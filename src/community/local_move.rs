//! Local-move pass over the nodes of one color.
//!
//! ## Gain
//!
//! Let `W` be the total graph weight (sum of cumulative node weights, i.e.
//! twice the undirected edge weight), `k_i` the cumulative weight of node `i`,
//! `e_i,C` the weight between `i` and community `C`, and `a_C` the weight of
//! community `C`. With `i` removed from its current community `D`:
//!
//! ```text
//! e_i,D' = e_i,D − selfloop_i
//! a_D'   = a_D − k_i
//! ΔQ(i: D → C) = (e_i,C − e_i,D') / (W / 2) + (2 k_i a_D' − 2 k_i a_C) / W²
//! ```
//!
//! A node moves to the candidate with the largest strictly positive gain. On
//! an exact tie between non-zero gains the larger community id wins.
//!
//! Nodes of one color are never adjacent (up to residual coloring conflicts),
//! so decisions only depend on `current` ids and live community weights, which
//! stay frozen until the pass is committed.

use rayon::prelude::*;

use super::influence::CommunityInfluences;
use super::state::CommunityState;
use crate::coloring::{Color, ColorPartition};
use crate::graph::{DEFAULT_WEIGHT, NodeId, RelationshipCursor, WeightedGraph};
use crate::modularity_error::ModularityError;
use crate::parallel::range_partitions;
use crate::progress::ProgressSink;

/// Modularity gain of moving a node from its current community to a candidate.
///
/// `e_candidate` / `e_current` are the node's weights towards the candidate and
/// towards its current community (self-loop excluded); `a_current` is the
/// current community's weight without the node.
#[inline]
pub fn modularity_gain(
    e_candidate: f64,
    e_current: f64,
    node_weight: f64,
    a_current: f64,
    a_candidate: f64,
    total_weight: f64,
) -> f64 {
    (e_candidate - e_current) / (total_weight / 2.0)
        + (2.0 * node_weight * a_current - 2.0 * node_weight * a_candidate)
            / (total_weight * total_weight)
}

/// Best move for one node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoveDecision {
    pub node: NodeId,
    pub current: NodeId,
    pub next: NodeId,
    pub gain: f64,
}

impl MoveDecision {
    #[inline]
    pub fn moves(&self) -> bool {
        self.next != self.current
    }
}

/// Runs the local-move optimizer over every node of a single color.
pub struct LocalMovePass<'a, G: WeightedGraph> {
    graph: &'a G,
    state: &'a CommunityState,
    partition: &'a ColorPartition,
    concurrency: usize,
    min_batch_size: usize,
    low_degree_threshold: usize,
}

impl<'a, G: WeightedGraph> LocalMovePass<'a, G> {
    pub fn new(
        graph: &'a G,
        state: &'a CommunityState,
        partition: &'a ColorPartition,
        concurrency: usize,
        min_batch_size: usize,
        low_degree_threshold: usize,
    ) -> Self {
        Self {
            graph,
            state,
            partition,
            concurrency,
            min_batch_size,
            low_degree_threshold,
        }
    }

    /// Decides the next community of every node of `color`, writing it to the
    /// `next` slot and staging the weight moves. Nothing is committed.
    ///
    /// Returns the number of nodes that chose to move.
    pub fn run(&self, color: Color, progress: &dyn ProgressSink) -> Result<usize, ModularityError> {
        let nodes = self.partition.nodes_of_color(color);
        let batches = range_partitions(self.concurrency, nodes.len(), self.min_batch_size);
        batches
            .into_par_iter()
            .map(|batch| self.run_batch(&nodes[batch], progress))
            .try_reduce(|| 0, |a, b| Ok(a + b))
    }

    fn run_batch(&self, nodes: &[NodeId], progress: &dyn ProgressSink) -> Result<usize, ModularityError> {
        let mut cursor = self.graph.concurrent_copy();
        let mut scratch = CommunityInfluences::with_capacity(self.low_degree_threshold.min(64));
        let mut moved = 0;
        for &node in nodes {
            let degree = self.graph.degree(node);
            let decision = if degree < self.low_degree_threshold {
                scratch.clear();
                self.decide(&mut cursor, node, &mut scratch)?
            } else {
                let mut fresh = CommunityInfluences::with_capacity(degree);
                self.decide(&mut cursor, node, &mut fresh)?
            };
            self.state.set_next_community(node, decision.next);
            if decision.moves() {
                let k = self.state.cumulative_weight(node);
                self.state.stage_weight_delta(decision.current, -k);
                self.state.stage_weight_delta(decision.next, k);
                moved += 1;
            }
            progress.log_progress(degree);
        }
        Ok(moved)
    }

    /// Computes the best move of `node` from one pass over its relationships.
    pub fn decide<C>(
        &self,
        cursor: &mut C,
        node: NodeId,
        influences: &mut CommunityInfluences,
    ) -> Result<MoveDecision, ModularityError>
    where
        C: RelationshipCursor,
    {
        let state = self.state;
        let n = state.node_count();
        let current = state.current_community(node);
        let mut self_weight = 0.0;
        let mut error = None;
        cursor.for_each_relationship(node, DEFAULT_WEIGHT, |s, t, w| {
            if t >= n {
                error = Some(ModularityError::RelationshipOutOfRange {
                    node: s,
                    target: t,
                    node_count: n,
                });
                return false;
            }
            if !w.is_finite() || w < 0.0 {
                error = Some(ModularityError::InvalidRelationshipWeight {
                    node: s,
                    target: t,
                    weight: w,
                });
                return false;
            }
            if t == node {
                self_weight += w;
            }
            influences.add(state.current_community(t), w);
            true
        });
        if let Some(e) = error {
            return Err(e);
        }

        let total_weight = state.total_weight();
        let k = state.cumulative_weight(node);
        let e_current = influences.get(current) - self_weight;
        let a_current = state.community_weight(current) - k;

        let mut next = current;
        let mut max_gain = 0.0;
        for (candidate, e_candidate) in influences.iter() {
            if candidate == current {
                continue;
            }
            let gain = modularity_gain(
                e_candidate,
                e_current,
                k,
                a_current,
                state.community_weight(candidate),
                total_weight,
            );
            if gain > max_gain || (gain == max_gain && gain != 0.0 && next < candidate) {
                next = candidate;
                max_gain = gain;
            }
        }

        Ok(MoveDecision {
            node,
            current,
            next,
            gain: max_gain,
        })
    }
}
