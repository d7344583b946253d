//! Modularity of a community assignment.
//!
//! `Q = ex / W − Σ_c (a_c / W)²` where `ex` is the summed weight of
//! relationship entries whose endpoints share a community (each undirected
//! relationship counted from both ends, self-loops once), `a_c` the weight of
//! community `c` and `W` the total graph weight.

use hashbrown::HashMap;
use rayon::prelude::*;

use super::state::CommunityState;
use crate::graph::{DEFAULT_WEIGHT, NodeId, RelationshipCursor, WeightedGraph};
use crate::modularity_error::ModularityError;
use crate::parallel::range_partitions;

/// Computes the modularity of the committed (`current`) assignment in `state`.
///
/// Runs one parallel pass over all relationships; a graph of zero total
/// weight has modularity `0.0`.
pub fn modularity<G>(
    graph: &G,
    state: &CommunityState,
    concurrency: usize,
    min_batch_size: usize,
) -> Result<f64, ModularityError>
where
    G: WeightedGraph,
{
    let total_weight = state.total_weight();
    if total_weight == 0.0 {
        return Ok(0.0);
    }
    let n = state.node_count();
    let batches = range_partitions(concurrency, n, min_batch_size);
    let internal: f64 = batches
        .into_par_iter()
        .map(|batch| {
            let mut cursor = graph.concurrent_copy();
            let mut sum = 0.0;
            for node in batch {
                let community = state.current_community(node);
                let mut out_of_range = None;
                cursor.for_each_relationship(node, DEFAULT_WEIGHT, |s, t, w| {
                    if t >= n {
                        out_of_range = Some(ModularityError::RelationshipOutOfRange {
                            node: s,
                            target: t,
                            node_count: n,
                        });
                        return false;
                    }
                    if state.current_community(t) == community {
                        sum += w;
                    }
                    true
                });
                if let Some(e) = out_of_range {
                    return Err(e);
                }
            }
            Ok(sum)
        })
        .try_reduce(|| 0.0, |a, b| Ok(a + b))?;

    let expected: f64 = (0..n)
        .into_par_iter()
        .map(|c| {
            let a = state.community_weight(c);
            a * a
        })
        .sum();

    Ok(internal / total_weight - expected / (total_weight * total_weight))
}

/// Per-community totals of an assignment, computed sequentially.
///
/// Independent of [`CommunityState`]; tests use it as a reference for the
/// parallel modularity and the incremental community weights.
#[derive(Debug, Clone, Default)]
pub struct ModularityCounters {
    /// Weight of relationship entries inside each community.
    pub internal: HashMap<u64, f64>,
    /// Sum of the cumulative node weights of each community.
    pub volume: HashMap<u64, f64>,
    /// Total graph weight.
    pub total_weight: f64,
}

impl ModularityCounters {
    /// Tallies `communities` (one entry per node) over `graph`.
    pub fn compute<G>(graph: &G, communities: &[u64]) -> Self
    where
        G: WeightedGraph,
    {
        let mut counters = Self::default();
        let mut cursor = graph.concurrent_copy();
        for (node, &c) in communities.iter().enumerate().take(graph.node_count()) {
            let mut internal = 0.0;
            let mut volume = 0.0;
            cursor.for_each_relationship(node, DEFAULT_WEIGHT, |_, t: NodeId, w| {
                volume += w;
                if communities.get(t) == Some(&c) {
                    internal += w;
                }
                true
            });
            *counters.internal.entry(c).or_insert(0.0) += internal;
            *counters.volume.entry(c).or_insert(0.0) += volume;
            counters.total_weight += volume;
        }
        counters
    }

    /// Number of distinct communities.
    pub fn community_count(&self) -> usize {
        self.volume.len()
    }

    /// Modularity of the tallied assignment; `0.0` for a weightless graph.
    pub fn modularity(&self) -> f64 {
        let w = self.total_weight;
        if w == 0.0 {
            return 0.0;
        }
        self.volume
            .iter()
            .map(|(c, &a)| {
                let e = self.internal.get(c).copied().unwrap_or(0.0);
                e / w - (a / w) * (a / w)
            })
            .sum()
    }
}
