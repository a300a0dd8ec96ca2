//! Slicing Store: maps event time to slices, creating them lazily, and
//! drains triggered windows once the watermark crosses their end.
//!
//! Sharded by slice start so the record path (lookups, mostly hits) and the
//! trigger path (removals) only ever contend within one shard, following the
//! concurrency model in section 5: "lock scope is a single map lookup/insert."

use crate::windowing::slice::Slice;
use crate::windowing::window::{WindowInfo, WindowSpec};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

const NUM_SHARDS: usize = 16;

pub struct SlicingStore<F> {
    spec: WindowSpec,
    shards: Vec<RwLock<BTreeMap<u64, Arc<Slice>>>>,
    new_slice: F,
    window_sequence: AtomicU64,
    /// Index (in units of `step_ms`) of the next window not yet drained.
    /// Every window below this index has already been emitted once and
    /// must never be regenerated.
    next_window_index: AtomicU64,
}

impl<F> SlicingStore<F>
where
    F: Fn(u64, u64) -> Slice,
{
    pub fn new(spec: WindowSpec, new_slice: F) -> Self {
        Self {
            spec,
            shards: (0..NUM_SHARDS).map(|_| RwLock::new(BTreeMap::new())).collect(),
            new_slice,
            window_sequence: AtomicU64::new(0),
            next_window_index: AtomicU64::new(0),
        }
    }

    fn shard_for(&self, slice_start: u64) -> &RwLock<BTreeMap<u64, Arc<Slice>>> {
        let slice_size = self.spec.slice_size_ms().max(1);
        let idx = ((slice_start / slice_size) as usize) % NUM_SHARDS;
        &self.shards[idx]
    }

    /// Returns the slice(s) covering `ts`, creating any that don't exist yet.
    /// Race-safe: concurrent `get_or_create` for the same interval resolves
    /// first-writer-wins.
    pub fn get_or_create_slices(&self, ts: u64) -> Vec<Arc<Slice>> {
        let start = self.spec.slice_start_for(ts);
        let end = start + self.spec.slice_size_ms();
        let shard = self.shard_for(start);

        if let Some(existing) = shard.read().get(&start) {
            return vec![existing.clone()];
        }
        let mut guard = shard.write();
        if let Some(existing) = guard.get(&start) {
            return vec![existing.clone()];
        }
        let slice = Arc::new((self.new_slice)(start, end));
        slice.set_pending_windows(self.spec.windows_covering_slice(start).len().max(1));
        guard.insert(start, slice.clone());
        vec![slice]
    }

    /// Snapshot of every slice not yet triggered, for state serialization.
    pub fn all_non_triggered(&self) -> Vec<Arc<Slice>> {
        self.shards
            .iter()
            .flat_map(|shard| shard.read().values().cloned().collect::<Vec<_>>())
            .collect()
    }

    /// Returns every window whose end is `<= watermark` and that has not
    /// already been drained by an earlier call, in ascending start-time
    /// order, each tagged with a monotone per-store sequence number,
    /// removing slices once no pending window still needs them.
    ///
    /// Each window is emitted at most once across the lifetime of the
    /// store: `next_window_index` is the floor below which every window
    /// was already returned by a previous call and must not be regenerated
    /// (its slices may already have been removed).
    pub fn drain_triggered(&self, watermark: u64) -> Vec<(WindowInfo, Vec<Arc<Slice>>)> {
        let size = self.spec.size_ms();
        let step = self.spec.step_ms();

        let mut ready_starts = Vec::new();
        let mut k = self.next_window_index.load(Ordering::Acquire);
        loop {
            let window_start = k * step;
            let window_end = window_start + size;
            if window_end > watermark {
                break;
            }
            ready_starts.push((window_start, window_end));
            k += 1;
        }
        self.next_window_index.fetch_max(k, Ordering::AcqRel);

        let mut windows = Vec::with_capacity(ready_starts.len());
        for (window_start, window_end) in ready_starts {
            let mut slices = Vec::new();
            let slice_size = self.spec.slice_size_ms().max(1);
            let mut s = window_start;
            while s < window_end {
                if let Some(slice) = self.shard_for(s).read().get(&s).cloned() {
                    slices.push(slice);
                }
                s += slice_size;
            }
            for slice in &slices {
                if slice.dec_pending_and_is_last() {
                    self.shard_for(slice.start).write().remove(&slice.start);
                }
            }
            let sequence_number = self.window_sequence.fetch_add(1, Ordering::AcqRel);
            windows.push((
                WindowInfo {
                    start: window_start,
                    end: window_end,
                    sequence_number,
                },
                slices,
            ));
        }
        windows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashmap::OffsetHashMap;
    use crate::windowing::slice::Slice as SliceT;

    fn new_agg_slice(start: u64, end: u64) -> SliceT {
        SliceT::new_aggregation(start, end, 1, || OffsetHashMap::new(8, 8, 16, 4096).unwrap())
    }

    #[test]
    fn tumbling_creates_one_slice_per_window() {
        let store = SlicingStore::new(WindowSpec::Tumbling { size_ms: 10 }, new_agg_slice);
        let a = store.get_or_create_slices(3);
        let b = store.get_or_create_slices(7);
        assert_eq!(a.len(), 1);
        assert!(Arc::ptr_eq(&a[0], &b[0]));
    }

    #[test]
    fn tumbling_drain_emits_windows_in_order_once_watermark_crosses() {
        let store = SlicingStore::new(WindowSpec::Tumbling { size_ms: 10 }, new_agg_slice);
        store.get_or_create_slices(1);
        store.get_or_create_slices(15);
        assert!(store.drain_triggered(9).is_empty());
        let drained = store.drain_triggered(20);
        let starts: Vec<u64> = drained.iter().map(|(w, _)| w.start).collect();
        assert_eq!(starts, vec![0, 10]);
        assert!(store.all_non_triggered().is_empty());
    }

    #[test]
    fn sliding_window_references_multiple_slices() {
        let store = SlicingStore::new(WindowSpec::Sliding { size_ms: 10, slide_ms: 5 }, new_agg_slice);
        for ts in [1, 6, 8] {
            store.get_or_create_slices(ts);
        }
        let drained = store.drain_triggered(10);
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].0, WindowInfo { start: 0, end: 10, sequence_number: 0 });
        assert_eq!(drained[0].1.len(), 2);
    }
}
