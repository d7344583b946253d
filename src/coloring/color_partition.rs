//! Node ordering grouped by color.
//!
//! [`ColorPartition`] stores every node id exactly once, sorted by color, plus
//! the starting offset of each color's contiguous range. The optimizer walks
//! colors in ascending order and splits each range into parallel batches.

use std::ops::Range;

use rayon::prelude::*;

use super::{Color, ColoringResult};
use crate::debug_invariants::{DebugInvariants, ensure};
use crate::graph::NodeId;
use crate::modularity_error::ModularityError;

/// Nodes grouped by color with per-color start offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColorPartition {
    /// Node ids ordered by `(color, node)`.
    order: Vec<NodeId>,
    /// `offsets[c] .. offsets[c + 1]` = positions of color `c`; last entry is `order.len()`.
    offsets: Vec<usize>,
    /// Color of every node, kept for invariant checks.
    colors: Vec<Color>,
}

impl ColorPartition {
    /// Builds the index in one parallel pass: per-color counts are folded in
    /// parallel, and the node order is a parallel sort keyed by `(color, node)`.
    ///
    /// Colors `>= color_count` are clamped into the last color so every node
    /// is covered.
    pub fn new(colors: &[Color], color_count: usize) -> Self {
        let n = colors.len();
        let color_count = if n == 0 { color_count } else { color_count.max(1) };
        let clamp = |c: Color| c.min(color_count.saturating_sub(1));
        let colors: Vec<Color> = colors.par_iter().map(|&c| clamp(c)).collect();

        let counts = colors
            .par_iter()
            .fold(
                || vec![0usize; color_count],
                |mut local, &c| {
                    local[c] += 1;
                    local
                },
            )
            .reduce(
                || vec![0usize; color_count],
                |mut a, b| {
                    for (x, y) in a.iter_mut().zip(b) {
                        *x += y;
                    }
                    a
                },
            );

        let mut offsets = Vec::with_capacity(color_count + 1);
        offsets.push(0);
        for count in &counts {
            let last = offsets[offsets.len() - 1];
            offsets.push(last + count);
        }

        let mut order: Vec<NodeId> = (0..n).collect();
        order.par_sort_unstable_by_key(|&v| (colors[v], v));

        Self {
            order,
            offsets,
            colors,
        }
    }

    /// Builds the index from a finished coloring.
    pub fn from_coloring(coloring: &ColoringResult) -> Self {
        Self::new(coloring.colors(), coloring.color_count())
    }

    /// Number of colors (including colors with no nodes).
    pub fn color_count(&self) -> usize {
        self.offsets.len() - 1
    }

    /// Total number of positions, i.e. the node count.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// First position of color `color`.
    #[inline]
    pub fn start_offset_for_color(&self, color: Color) -> usize {
        self.offsets[color]
    }

    /// Position range of color `color`.
    #[inline]
    pub fn range_for_color(&self, color: Color) -> Range<usize> {
        self.offsets[color]..self.offsets[color + 1]
    }

    /// Number of nodes with color `color`.
    pub fn count_for_color(&self, color: Color) -> usize {
        self.range_for_color(color).len()
    }

    /// Node stored at `position`.
    #[inline]
    pub fn node_at_position(&self, position: usize) -> NodeId {
        self.order[position]
    }

    /// All nodes of color `color`, ascending.
    #[inline]
    pub fn nodes_of_color(&self, color: Color) -> &[NodeId] {
        &self.order[self.range_for_color(color)]
    }
}

impl DebugInvariants for ColorPartition {
    fn validate_invariants(&self) -> Result<(), ModularityError> {
        let n = self.order.len();
        ensure(self.offsets.first() == Some(&0), || {
            "first color offset must be 0".to_owned()
        })?;
        ensure(self.offsets.last() == Some(&n), || {
            format!("last color offset {:?} != node count {n}", self.offsets.last())
        })?;
        if let Some(i) = self.offsets.windows(2).position(|w| w[0] > w[1]) {
            return Err(ModularityError::InvariantViolation(format!(
                "color offsets decrease at color {i}"
            )));
        }
        let mut seen = vec![false; n];
        for color in 0..self.color_count() {
            for &node in self.nodes_of_color(color) {
                ensure(node < n && !seen[node], || {
                    format!("node {node} missing or listed twice")
                })?;
                seen[node] = true;
                ensure(self.colors[node] == color, || {
                    format!(
                        "node {node} with color {} stored under color {color}",
                        self.colors[node]
                    )
                })?;
            }
        }
        ensure(seen.iter().all(|&s| s), || "not every node is covered".to_owned())
    }

    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "ColorPartition");
    }
}
