//! A slice: a half-open time interval plus per-thread side-state, owned by
//! exactly one operator handler.

use crate::hashmap::OffsetHashMap;
use crate::windowing::paged_vector::PagedVector;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

pub enum SliceState {
    Aggregation(Vec<Mutex<OffsetHashMap>>),
    Join(Vec<Mutex<(PagedVector, PagedVector)>>),
}

pub struct Slice {
    pub start: u64,
    pub end: u64,
    pub state: SliceState,
    /// Number of not-yet-triggered windows that still reference this slice.
    /// The slice is eligible for removal from the store once this hits zero.
    pending_windows: AtomicUsize,
}

impl Slice {
    pub fn new_aggregation(start: u64, end: u64, num_threads: usize, new_map: impl Fn() -> OffsetHashMap) -> Self {
        let maps = (0..num_threads).map(|_| Mutex::new(new_map())).collect();
        Self {
            start,
            end,
            state: SliceState::Aggregation(maps),
            pending_windows: AtomicUsize::new(0),
        }
    }

    pub fn new_join(start: u64, end: u64, num_threads: usize, record_size: usize, page_size: usize) -> Self {
        let vecs = (0..num_threads)
            .map(|_| Mutex::new((PagedVector::new(record_size, page_size), PagedVector::new(record_size, page_size))))
            .collect();
        Self {
            start,
            end,
            state: SliceState::Join(vecs),
            pending_windows: AtomicUsize::new(0),
        }
    }

    pub fn set_pending_windows(&self, count: usize) {
        self.pending_windows.store(count, Ordering::Release);
    }

    /// Decrements the pending-window count; returns true if this was the
    /// last window referencing the slice.
    pub fn dec_pending_and_is_last(&self) -> bool {
        self.pending_windows.fetch_sub(1, Ordering::AcqRel) == 1
    }

    pub fn aggregation_maps(&self) -> &[Mutex<OffsetHashMap>] {
        match &self.state {
            SliceState::Aggregation(maps) => maps,
            SliceState::Join(_) => panic!("slice is a join slice, not an aggregation slice"),
        }
    }

    pub fn join_vectors(&self) -> &[Mutex<(PagedVector, PagedVector)>] {
        match &self.state {
            SliceState::Join(v) => v,
            SliceState::Aggregation(_) => panic!("slice is an aggregation slice, not a join slice"),
        }
    }
}
