// Graph trait abstraction for modularity optimization
use super::NodeId;

/// An independent traversal handle over a graph's relationships.
///
/// Every worker task obtains its own cursor via [`WeightedGraph::concurrent_copy`],
/// so no iterator state is shared between threads.
pub trait RelationshipCursor: Send {
    /// Visits every relationship of `node` as `(node, target, weight)`.
    ///
    /// Relationships without a weight are reported with `default_weight`.
    /// Iteration stops early once `visitor` returns `false`.
    fn for_each_relationship<F>(&mut self, node: NodeId, default_weight: f64, visitor: F)
    where
        F: FnMut(NodeId, NodeId, f64) -> bool;
}

/// Trait for weighted undirected graphs that can be optimized in parallel.
///
/// All methods are read-only and thread-safe. Undirected relationships are
/// expected to be reported from both endpoints; a self-loop is reported once.
pub trait WeightedGraph: Sync {
    /// Cursor type handed out to worker tasks.
    type Cursor<'a>: RelationshipCursor + 'a
    where
        Self: 'a;

    /// Number of nodes; node ids are dense in `[0, node_count)`.
    fn node_count(&self) -> usize;

    /// Number of stored (directed) relationship entries.
    fn relationship_count(&self) -> usize;

    /// Number of relationships reported for `node`.
    fn degree(&self, node: NodeId) -> usize;

    /// Returns a fresh traversal handle for one worker.
    fn concurrent_copy(&self) -> Self::Cursor<'_>;

    /// Convenience traversal through a throwaway cursor.
    fn for_each_relationship<F>(&self, node: NodeId, default_weight: f64, visitor: F)
    where
        F: FnMut(NodeId, NodeId, f64) -> bool,
    {
        self.concurrent_copy()
            .for_each_relationship(node, default_weight, visitor)
    }

    /// Translates an internal node id into the caller's id space.
    fn to_original_node_id(&self, node: NodeId) -> u64 {
        node as u64
    }

    /// Translates a caller id into the internal id space, if the node exists.
    fn to_mapped_node_id(&self, original: u64) -> Option<NodeId> {
        usize::try_from(original)
            .ok()
            .filter(|&node| node < self.node_count())
    }
}
