//! Per-node scratch map from neighbouring community to incident weight.
//!
//! A small open-addressed table with linear probing. Worker tasks keep one
//! instance alive across all low-degree nodes of their batch; `clear` only
//! touches the slots used by the previous node.

use crate::graph::NodeId;

const EMPTY: NodeId = NodeId::MAX;
const MIN_CAPACITY: usize = 16;

/// Open-addressed `community -> weight` map.
#[derive(Debug, Clone)]
pub struct CommunityInfluences {
    keys: Vec<NodeId>,
    values: Vec<f64>,
    /// Occupied slot indices in insertion order.
    occupied: Vec<usize>,
    mask: usize,
}

impl CommunityInfluences {
    /// A map sized for about `expected` distinct communities without growing.
    pub fn with_capacity(expected: usize) -> Self {
        let capacity = (expected.saturating_mul(2)).max(MIN_CAPACITY).next_power_of_two();
        Self {
            keys: vec![EMPTY; capacity],
            values: vec![0.0; capacity],
            occupied: Vec::with_capacity(expected.min(capacity)),
            mask: capacity - 1,
        }
    }

    #[inline]
    fn slot_for(&self, community: NodeId) -> usize {
        let h = (community as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
        ((h >> 32) ^ h) as usize & self.mask
    }

    #[inline]
    fn find(&self, community: NodeId) -> (usize, bool) {
        let mut slot = self.slot_for(community);
        loop {
            let key = self.keys[slot];
            if key == community {
                return (slot, true);
            }
            if key == EMPTY {
                return (slot, false);
            }
            slot = (slot + 1) & self.mask;
        }
    }

    /// Adds `weight` to the entry of `community`, inserting it if absent.
    #[inline]
    pub fn add(&mut self, community: NodeId, weight: f64) {
        let (slot, found) = self.find(community);
        if found {
            self.values[slot] += weight;
            return;
        }
        let slot = if (self.occupied.len() + 1) * 2 > self.keys.len() {
            self.grow();
            self.find(community).0
        } else {
            slot
        };
        self.insert_at(slot, community, weight);
    }

    #[inline]
    fn insert_at(&mut self, slot: usize, community: NodeId, weight: f64) {
        self.keys[slot] = community;
        self.values[slot] = weight;
        self.occupied.push(slot);
    }

    fn grow(&mut self) {
        let entries: Vec<(NodeId, f64)> = self.iter().collect();
        let capacity = self.keys.len() * 2;
        self.keys = vec![EMPTY; capacity];
        self.values = vec![0.0; capacity];
        self.mask = capacity - 1;
        self.occupied.clear();
        for (community, weight) in entries {
            let (slot, _) = self.find(community);
            self.insert_at(slot, community, weight);
        }
    }

    /// Weight collected for `community`, `0.0` if absent.
    #[inline]
    pub fn get(&self, community: NodeId) -> f64 {
        match self.find(community) {
            (slot, true) => self.values[slot],
            _ => 0.0,
        }
    }

    /// Number of distinct communities.
    pub fn len(&self) -> usize {
        self.occupied.len()
    }

    pub fn is_empty(&self) -> bool {
        self.occupied.is_empty()
    }

    /// Table size; grows only when more than half full.
    pub fn capacity(&self) -> usize {
        self.keys.len()
    }

    /// Empties the map in time proportional to the number of entries.
    pub fn clear(&mut self) {
        for &slot in &self.occupied {
            self.keys[slot] = EMPTY;
            self.values[slot] = 0.0;
        }
        self.occupied.clear();
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, f64)> + '_ {
        self.occupied
            .iter()
            .map(move |&slot| (self.keys[slot], self.values[slot]))
    }
}

impl Default for CommunityInfluences {
    fn default() -> Self {
        Self::with_capacity(MIN_CAPACITY)
    }
}
