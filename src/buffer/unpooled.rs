//! Unpooled buffers for payloads larger than the pool's page size.
//!
//! Grounded on `BufferManager::getUnpooledBuffer`'s per-worker-thread chunk
//! storage with a rolling average size hint, simplified to one allocation
//! per request (no sub-chunk slicing) so the arena needs no unsafe pointer
//! arithmetic. The rolling average is kept for its diagnostic value — it is
//! what a future chunked allocator would size its chunks from — and is
//! logged, not otherwise consumed yet.

use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use tracing::trace;

use super::tuple_buffer::{RecycleTarget, TupleBuffer};
use std::sync::Arc;

pub struct UnpooledArena {
    worker_id: usize,
    active_segments: AtomicUsize,
    rolling_average: AtomicI64,
}

impl UnpooledArena {
    pub fn new(worker_id: usize) -> Self {
        Self {
            worker_id,
            active_segments: AtomicUsize::new(0),
            rolling_average: AtomicI64::new(0),
        }
    }

    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    pub fn active_segments(&self) -> usize {
        self.active_segments.load(Ordering::Acquire)
    }

    fn record_allocation(&self, size: usize) {
        self.active_segments.fetch_add(1, Ordering::AcqRel);
        let prev = self.rolling_average.load(Ordering::Relaxed);
        let next = if prev == 0 { size as i64 } else { (prev + size as i64) / 2 };
        self.rolling_average.store(next, Ordering::Relaxed);
    }

    pub(crate) fn release(&self) {
        self.active_segments.fetch_sub(1, Ordering::AcqRel);
    }
}

pub fn acquire_unpooled(arena: &Arc<UnpooledArena>, size: usize) -> TupleBuffer {
    arena.record_allocation(size);
    trace!(
        worker_id = arena.worker_id,
        size,
        rolling_average = arena.rolling_average.load(Ordering::Relaxed),
        "unpooled buffer allocated"
    );
    TupleBuffer::new(vec![0u8; size], RecycleTarget::Unpooled(arena.clone()))
}
