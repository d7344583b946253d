//! Parallel utilities for the coloring and local-move passes.
//!
//! This module provides the fixed-size worker pool, range partitioning of node
//! ranges into batches, deterministic per-node priorities, and an array of
//! atomically updatable `f64` slots.

use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};

use rayon::ThreadPool;
use rayon::prelude::*;

use crate::modularity_error::ModularityError;

/// Builds the fixed-size rayon pool every parallel pass of a run executes on.
pub fn build_pool(concurrency: usize) -> Result<ThreadPool, ModularityError> {
    if concurrency == 0 {
        return Err(ModularityError::InvalidConcurrency(concurrency));
    }
    Ok(rayon::ThreadPoolBuilder::new()
        .num_threads(concurrency)
        .thread_name(|i| format!("modularity-worker-{i}"))
        .build()?)
}

/// Splits `0..len` into contiguous batches, one task each.
///
/// The batch size is `max(min_batch_size, ceil(len / concurrency))`, so there
/// are never more than `concurrency` batches and small inputs stay in a
/// single batch.
pub fn range_partitions(concurrency: usize, len: usize, min_batch_size: usize) -> Vec<Range<usize>> {
    if len == 0 {
        return Vec::new();
    }
    let per_thread = len.div_ceil(concurrency.max(1));
    let batch = per_thread.max(min_batch_size).max(1);
    (0..len)
        .step_by(batch)
        .map(|start| start..(start + batch).min(len))
        .collect()
}

/// Deterministic pseudo-random priority of `node` under `seed`.
///
/// Used to decide which endpoint of a same-colored pair keeps its color. This
/// is output `node` of a SplitMix64 stream started at `seed`, so the value only
/// depends on its arguments, never on the process or platform.
#[inline]
pub fn node_priority(seed: u64, node: usize) -> u64 {
    const GAMMA: u64 = 0x9E37_79B9_7F4A_7C15;
    let mut z = seed.wrapping_add((node as u64).wrapping_add(1).wrapping_mul(GAMMA));
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Fixed-size array of `f64` slots supporting lock-free concurrent adds.
///
/// Each slot stores the bit pattern of an `f64` in an [`AtomicU64`]; `add`
/// is a compare-and-swap loop, so concurrent adds to the same slot never lose
/// updates.
#[derive(Debug)]
pub struct AtomicF64Array {
    slots: Vec<AtomicU64>,
}

impl AtomicF64Array {
    /// `len` slots, all `0.0`.
    pub fn new(len: usize) -> Self {
        let zero = 0.0f64.to_bits();
        Self {
            slots: (0..len).map(|_| AtomicU64::new(zero)).collect(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    #[inline]
    pub fn get(&self, idx: usize) -> f64 {
        f64::from_bits(self.slots[idx].load(Ordering::Acquire))
    }

    #[inline]
    pub fn set(&self, idx: usize, value: f64) {
        self.slots[idx].store(value.to_bits(), Ordering::Release);
    }

    /// Atomically adds `delta` to slot `idx`, returning the previous value.
    #[inline]
    pub fn add(&self, idx: usize, delta: f64) -> f64 {
        let prev = self.slots[idx]
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                Some((f64::from_bits(bits) + delta).to_bits())
            })
            .unwrap_or_else(|bits| bits);
        f64::from_bits(prev)
    }

    /// Adds every slot of `updates` into the matching slot of `self`, then
    /// zeroes `updates`.
    pub fn drain_into(&self, updates: &AtomicF64Array) {
        debug_assert_eq!(self.len(), updates.len());
        let zero = 0.0f64.to_bits();
        updates.slots.par_iter().enumerate().for_each(|(idx, slot)| {
            let delta = f64::from_bits(slot.swap(zero, Ordering::AcqRel));
            if delta != 0.0 {
                self.add(idx, delta);
            }
        });
    }

    /// Sum of all slots.
    pub fn sum(&self) -> f64 {
        self.slots
            .par_iter()
            .map(|slot| f64::from_bits(slot.load(Ordering::Acquire)))
            .sum()
    }

    /// Snapshot of every slot.
    pub fn to_vec(&self) -> Vec<f64> {
        self.slots
            .iter()
            .map(|slot| f64::from_bits(slot.load(Ordering::Acquire)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partitions_cover_range_without_overlap() {
        let parts = range_partitions(4, 10, 1);
        assert_eq!(parts, vec![0..3, 3..6, 6..9, 9..10]);
        let covered: usize = parts.iter().map(|r| r.len()).sum();
        assert_eq!(covered, 10);
    }

    #[test]
    fn min_batch_size_limits_partition_count() {
        assert_eq!(range_partitions(4, 10, 100), vec![0..10]);
        assert!(range_partitions(4, 0, 1).is_empty());
    }

    #[test]
    fn priorities_are_deterministic() {
        assert_eq!(node_priority(42, 7), 14_769_051_326_987_775_908);
        assert_eq!(node_priority(42, 8), 6_270_620_877_612_482_005);
        assert_eq!(node_priority(43, 7), 16_296_930_356_100_118_074);
        // first output of the reference SplitMix64 generator seeded with 0
        assert_eq!(node_priority(0, 0), 0xE220_A839_7B1D_CDAF);
    }

    #[test]
    fn concurrent_adds_are_not_lost() {
        let arr = AtomicF64Array::new(2);
        (0..10_000).into_par_iter().for_each(|i| {
            arr.add(i % 2, 0.5);
        });
        assert_eq!(arr.get(0), 2_500.0);
        assert_eq!(arr.get(1), 2_500.0);
        assert_eq!(arr.sum(), 5_000.0);
    }

    #[test]
    fn drain_moves_updates_and_clears_them() {
        let live = AtomicF64Array::new(3);
        live.set(0, 4.0);
        let staged = AtomicF64Array::new(3);
        staged.add(0, -4.0);
        staged.add(2, 4.0);
        live.drain_into(&staged);
        assert_eq!(live.to_vec(), vec![0.0, 0.0, 4.0]);
        assert_eq!(staged.to_vec(), vec![0.0; 3]);
    }

    #[test]
    fn pool_rejects_zero_threads() {
        assert_eq!(
            build_pool(0).unwrap_err(),
            ModularityError::InvalidConcurrency(0)
        );
        let pool = build_pool(2).unwrap();
        assert_eq!(pool.current_num_threads(), 2);
    }
}
