//! In-memory CSR (compressed-sparse-row) weighted undirected graph.
//!
//! * `offsets[i] .. offsets[i+1]` = relationship range of node *i*
//! * `targets`                    = concatenated neighbour nodes
//! * `weights`                    = optional per-relationship weights aligned with `targets`
//!
//! The graph is **symmetrised** (i↔j appear in both lists); a self-loop is
//! stored exactly once.

use hashbrown::HashMap;

use super::graph_traits::{RelationshipCursor, WeightedGraph};
use super::{DEFAULT_WEIGHT, NodeId};
use crate::modularity_error::ModularityError;

/// CSR adjacency with optional weights and an optional original-id table.
#[derive(Debug, Clone)]
pub struct CsrGraph {
    offsets: Vec<usize>,
    targets: Vec<NodeId>,
    weights: Option<Vec<f64>>,
    original_ids: Option<Vec<u64>>,
    mapped_ids: Option<HashMap<u64, NodeId>>,
}

impl CsrGraph {
    /// Unweighted graph from an undirected edge list.
    pub fn from_edges(
        node_count: usize,
        edges: &[(NodeId, NodeId)],
    ) -> Result<Self, ModularityError> {
        let mut b = CsrGraphBuilder::new(node_count);
        for &(u, v) in edges {
            b.add_relationship(u, v)?;
        }
        Ok(b.build())
    }

    /// Weighted graph from an undirected edge list.
    pub fn from_weighted_edges(
        node_count: usize,
        edges: &[(NodeId, NodeId, f64)],
    ) -> Result<Self, ModularityError> {
        let mut b = CsrGraphBuilder::new(node_count);
        for &(u, v, w) in edges {
            b.add_weighted_relationship(u, v, w)?;
        }
        Ok(b.build())
    }

    /// Attaches caller ids; `original_ids[i]` is the external id of node `i`.
    pub fn with_original_ids(mut self, original_ids: Vec<u64>) -> Result<Self, ModularityError> {
        let n = self.node_count();
        if original_ids.len() != n {
            return Err(ModularityError::OriginalIdMismatch {
                expected: n,
                got: original_ids.len(),
            });
        }
        let mut mapped = HashMap::with_capacity(n);
        for (node, &original) in original_ids.iter().enumerate() {
            if mapped.insert(original, node).is_some() {
                return Err(ModularityError::DuplicateOriginalId(original));
            }
        }
        self.original_ids = Some(original_ids);
        self.mapped_ids = Some(mapped);
        Ok(self)
    }

    /// Return the neighbor slice for node `i`.
    #[inline]
    pub fn neighbors(&self, i: NodeId) -> &[NodeId] {
        &self.targets[self.offsets[i]..self.offsets[i + 1]]
    }

    /// Return the neighbor weight slice for node `i`, if present.
    #[inline]
    pub fn neighbor_weights(&self, i: NodeId) -> Option<&[f64]> {
        self.weights
            .as_ref()
            .map(|w| &w[self.offsets[i]..self.offsets[i + 1]])
    }

    /// Whether relationships carry explicit weights.
    pub fn is_weighted(&self) -> bool {
        self.weights.is_some()
    }
}

/// Read-only cursor over a [`CsrGraph`].
#[derive(Debug, Clone, Copy)]
pub struct CsrCursor<'a> {
    graph: &'a CsrGraph,
}

impl RelationshipCursor for CsrCursor<'_> {
    fn for_each_relationship<F>(&mut self, node: NodeId, default_weight: f64, mut visitor: F)
    where
        F: FnMut(NodeId, NodeId, f64) -> bool,
    {
        let targets = self.graph.neighbors(node);
        match self.graph.neighbor_weights(node) {
            Some(weights) => {
                for (&t, &w) in targets.iter().zip(weights) {
                    if !visitor(node, t, w) {
                        return;
                    }
                }
            }
            None => {
                for &t in targets {
                    if !visitor(node, t, default_weight) {
                        return;
                    }
                }
            }
        }
    }
}

impl WeightedGraph for CsrGraph {
    type Cursor<'a> = CsrCursor<'a>;

    fn node_count(&self) -> usize {
        self.offsets.len() - 1
    }

    fn relationship_count(&self) -> usize {
        self.targets.len()
    }

    fn degree(&self, node: NodeId) -> usize {
        self.offsets[node + 1] - self.offsets[node]
    }

    fn concurrent_copy(&self) -> Self::Cursor<'_> {
        CsrCursor { graph: self }
    }

    fn to_original_node_id(&self, node: NodeId) -> u64 {
        match &self.original_ids {
            Some(ids) => ids[node],
            None => node as u64,
        }
    }

    fn to_mapped_node_id(&self, original: u64) -> Option<NodeId> {
        match &self.mapped_ids {
            Some(mapped) => mapped.get(&original).copied(),
            None => usize::try_from(original)
                .ok()
                .filter(|&node| node < self.node_count()),
        }
    }
}

/// Incremental builder for [`CsrGraph`].
#[derive(Debug, Clone, Default)]
pub struct CsrGraphBuilder {
    node_count: usize,
    edges: Vec<(NodeId, NodeId, Option<f64>)>,
}

impl CsrGraphBuilder {
    pub fn new(node_count: usize) -> Self {
        Self {
            node_count,
            edges: Vec::new(),
        }
    }

    /// Adds an undirected relationship without a weight.
    pub fn add_relationship(&mut self, u: NodeId, v: NodeId) -> Result<&mut Self, ModularityError> {
        self.check_range(u, v)?;
        self.edges.push((u, v, None));
        Ok(self)
    }

    /// Adds an undirected relationship with weight `w`.
    ///
    /// Weights must be finite and non-negative.
    pub fn add_weighted_relationship(
        &mut self,
        u: NodeId,
        v: NodeId,
        w: f64,
    ) -> Result<&mut Self, ModularityError> {
        self.check_range(u, v)?;
        if !w.is_finite() || w < 0.0 {
            return Err(ModularityError::InvalidRelationshipWeight {
                node: u,
                target: v,
                weight: w,
            });
        }
        self.edges.push((u, v, Some(w)));
        Ok(self)
    }

    fn check_range(&self, u: NodeId, v: NodeId) -> Result<(), ModularityError> {
        if u >= self.node_count || v >= self.node_count {
            return Err(ModularityError::RelationshipOutOfRange {
                node: u,
                target: v,
                node_count: self.node_count,
            });
        }
        Ok(())
    }

    /// Symmetrises the collected relationships into CSR form.
    pub fn build(&self) -> CsrGraph {
        let n = self.node_count;
        let weighted = self.edges.iter().any(|&(_, _, w)| w.is_some());

        // 1. per-node degree, self-loops counted once
        let mut degrees = vec![0usize; n];
        for &(u, v, _) in &self.edges {
            degrees[u] += 1;
            if u != v {
                degrees[v] += 1;
            }
        }

        // 2. prefix sum into offsets
        let mut offsets = Vec::with_capacity(n + 1);
        offsets.push(0);
        for d in &degrees {
            let last = offsets[offsets.len() - 1];
            offsets.push(last + d);
        }

        // 3. scatter targets (and weights)
        let total = offsets[n];
        let mut cursor = offsets[..n].to_vec();
        let mut targets = vec![0; total];
        let mut weights = if weighted { vec![0.0; total] } else { Vec::new() };
        let mut put = |from: NodeId, to: NodeId, w: Option<f64>| {
            let slot = cursor[from];
            cursor[from] += 1;
            targets[slot] = to;
            if weighted {
                weights[slot] = w.unwrap_or(DEFAULT_WEIGHT);
            }
        };
        for &(u, v, w) in &self.edges {
            put(u, v, w);
            if u != v {
                put(v, u, w);
            }
        }

        CsrGraph {
            offsets,
            targets,
            weights: weighted.then_some(weights),
            original_ids: None,
            mapped_ids: None,
        }
    }
}
