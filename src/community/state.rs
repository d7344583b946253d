//! Community state store.
//!
//! [`CommunityState`] holds the double-buffered community assignment
//! (`current` / `next`), the immutable cumulative node weights, the live
//! per-community weight accumulator, and the staging accumulator that buffers
//! weight moves until a color pass is committed.
//!
//! Community ids are stored in atomics so worker tasks can write the `next`
//! slot of disjoint nodes without locking; `current` is only written by the
//! commit step, between passes.

use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;

use super::seeding::SeedMapping;
use crate::debug_invariants::{DebugInvariants, ensure, weights_match};
use crate::graph::{DEFAULT_WEIGHT, NodeId, RelationshipCursor, WeightedGraph};
use crate::modularity_error::ModularityError;
use crate::parallel::{AtomicF64Array, range_partitions};

/// Stores community ids for each node (1-to-1 with node index).
#[derive(Debug)]
pub struct CommunityIds {
    ids: Vec<AtomicUsize>,
}

impl CommunityIds {
    /// Every node in its own singleton community.
    pub fn singletons(size: usize) -> Self {
        Self {
            ids: (0..size).map(AtomicUsize::new).collect(),
        }
    }

    pub fn from_vec(ids: Vec<NodeId>) -> Self {
        Self {
            ids: ids.into_iter().map(AtomicUsize::new).collect(),
        }
    }

    #[inline]
    pub fn get(&self, node: NodeId) -> NodeId {
        self.ids[node].load(Ordering::Relaxed)
    }

    #[inline]
    pub fn set(&self, node: NodeId, community: NodeId) {
        self.ids[node].store(community, Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn to_vec(&self) -> Vec<NodeId> {
        self.ids.par_iter().map(|c| c.load(Ordering::Relaxed)).collect()
    }
}

/// Mutable community state of one optimization run.
#[derive(Debug)]
pub struct CommunityState {
    current: CommunityIds,
    next: CommunityIds,
    cumulative_weights: Vec<f64>,
    community_weights: AtomicF64Array,
    weight_updates: AtomicF64Array,
    total_weight: f64,
    seed_mapping: Option<SeedMapping>,
}

impl CommunityState {
    /// Initializes the state in one parallel pass over the graph.
    ///
    /// Without `seeding` every node starts in its own community. The pass
    /// computes cumulative node weights (self-loops counted once, unweighted
    /// relationships as [`DEFAULT_WEIGHT`]), the total graph weight, and the
    /// first population of the community weight accumulator.
    ///
    /// # Errors
    /// A relationship target outside the graph or a NaN, infinite or negative
    /// weight aborts initialization.
    pub fn init<G>(
        graph: &G,
        seeding: Option<(SeedMapping, Vec<NodeId>)>,
        concurrency: usize,
        min_batch_size: usize,
    ) -> Result<Self, ModularityError>
    where
        G: WeightedGraph,
    {
        let n = graph.node_count();
        let (current, seed_mapping) = match seeding {
            Some((mapping, initial)) => (CommunityIds::from_vec(initial), Some(mapping)),
            None => (CommunityIds::singletons(n), None),
        };

        let batches = range_partitions(concurrency, n, min_batch_size);
        let per_batch: Vec<Vec<f64>> = batches
            .into_par_iter()
            .map(|batch| {
                let mut cursor = graph.concurrent_copy();
                let mut local = Vec::with_capacity(batch.len());
                for node in batch {
                    local.push(cumulative_weight(&mut cursor, node, n)?);
                }
                Ok::<_, ModularityError>(local)
            })
            .collect::<Result<_, ModularityError>>()?;
        let cumulative_weights: Vec<f64> = per_batch.into_iter().flatten().collect();

        let community_weights = AtomicF64Array::new(n);
        cumulative_weights
            .par_iter()
            .enumerate()
            .for_each(|(node, &w)| {
                community_weights.add(current.get(node), w);
            });
        let total_weight: f64 = cumulative_weights.par_iter().sum();

        let next = CommunityIds::from_vec(current.to_vec());
        Ok(Self {
            current,
            next,
            cumulative_weights,
            community_weights,
            weight_updates: AtomicF64Array::new(n),
            total_weight,
            seed_mapping,
        })
    }

    pub fn node_count(&self) -> usize {
        self.current.len()
    }

    /// Sum of all cumulative node weights (twice the undirected edge weight).
    #[inline]
    pub fn total_weight(&self) -> f64 {
        self.total_weight
    }

    #[inline]
    pub fn current_community(&self, node: NodeId) -> NodeId {
        self.current.get(node)
    }

    #[inline]
    pub fn next_community(&self, node: NodeId) -> NodeId {
        self.next.get(node)
    }

    /// Records the community `node` moves to once its color is committed.
    #[inline]
    pub fn set_next_community(&self, node: NodeId, community: NodeId) {
        self.next.set(node, community)
    }

    #[inline]
    pub fn cumulative_weight(&self, node: NodeId) -> f64 {
        self.cumulative_weights[node]
    }

    /// Live weight of `community`; stable for the duration of a pass.
    #[inline]
    pub fn community_weight(&self, community: NodeId) -> f64 {
        self.community_weights.get(community)
    }

    /// Buffers a weight change of `community` until [`apply_staged_weights`](Self::apply_staged_weights).
    #[inline]
    pub fn stage_weight_delta(&self, community: NodeId, delta: f64) {
        self.weight_updates.add(community, delta);
    }

    /// Copies `next` into `current` for exactly `nodes`.
    pub fn commit_nodes(&self, nodes: &[NodeId]) {
        nodes
            .par_iter()
            .for_each(|&node| self.current.set(node, self.next.get(node)));
    }

    /// Adds the staged deltas into the live accumulator and clears the staging area.
    pub fn apply_staged_weights(&self) {
        self.community_weights.drain_into(&self.weight_updates);
    }

    /// Internal community ids of every node.
    pub fn current_communities(&self) -> Vec<NodeId> {
        self.current.to_vec()
    }

    /// Community of `node` in the caller's id space: the original seed value
    /// when seeded, the internal id otherwise.
    pub fn reported_community(&self, node: NodeId) -> u64 {
        let internal = self.current.get(node);
        match &self.seed_mapping {
            Some(mapping) => mapping.to_seed(internal),
            None => internal as u64,
        }
    }

    /// [`reported_community`](Self::reported_community) of every node.
    pub fn reported_communities(&self) -> Vec<u64> {
        (0..self.node_count())
            .into_par_iter()
            .map(|node| self.reported_community(node))
            .collect()
    }

    pub fn is_seeded(&self) -> bool {
        self.seed_mapping.is_some()
    }
}

fn cumulative_weight<C>(cursor: &mut C, node: NodeId, node_count: usize) -> Result<f64, ModularityError>
where
    C: RelationshipCursor,
{
    let mut sum = 0.0;
    let mut error = None;
    cursor.for_each_relationship(node, DEFAULT_WEIGHT, |s, t, w| {
        if t >= node_count {
            error = Some(ModularityError::RelationshipOutOfRange {
                node: s,
                target: t,
                node_count,
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
        sum += w;
        true
    });
    match error {
        Some(e) => Err(e),
        None => Ok(sum),
    }
}

impl DebugInvariants for CommunityState {
    /// Checks, at a quiescent point, that every community id is in range, the
    /// staging accumulator is empty, and every community weight equals the
    /// summed cumulative weights of its members.
    fn validate_invariants(&self) -> Result<(), ModularityError> {
        let n = self.node_count();
        let communities = self.current.to_vec();
        let mut expected = vec![0.0; n];
        for (node, &c) in communities.iter().enumerate() {
            ensure(c < n, || format!("node {node} has community {c} >= {n}"))?;
            expected[c] += self.cumulative_weights[node];
        }
        for c in 0..n {
            let staged = self.weight_updates.get(c);
            ensure(staged == 0.0, || {
                format!("community {c} has {staged} staged weight at a quiescent point")
            })?;
            let live = self.community_weights.get(c);
            ensure(weights_match(live, expected[c], self.total_weight), || {
                format!("community {c} weight {live} != member weight {}", expected[c])
            })?;
        }
        let sum = self.community_weights.sum();
        ensure(weights_match(sum, self.total_weight, self.total_weight), || {
            format!("community weights sum {sum} != total weight {}", self.total_weight)
        })
    }
}
