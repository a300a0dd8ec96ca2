//! Fixed-size pooled buffer allocator.
//!
//! Pages are pre-allocated once at pool construction and never returned to
//! the OS until the pool itself is dropped; recycling only ever moves a page
//! between the free queue and a live `TupleBuffer`. Grounded on the pooled
//! pre-allocate-then-recycle design of the source's `BufferManager`
//! (`initialize()` / `recyclePooledBuffer`), adapted from one contiguous
//! native allocation to a `Vec<Box<[u8]>>` of independently-owned pages,
//! which keeps the pool free of unsafe pointer arithmetic while preserving
//! the "stable address for the life of the pool, recycle don't free"
//! contract.

use crate::error::{CoreError, Result};
use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

use super::tuple_buffer::{RecycleTarget, TupleBuffer};

pub(crate) struct PoolShared {
    free: ArrayQueue<Vec<u8>>,
    buffer_size: usize,
    capacity: usize,
    outstanding: AtomicUsize,
    parent: Option<Arc<PoolShared>>,
}

impl PoolShared {
    pub(crate) fn recycle(&self, payload: Vec<u8>) {
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
        if self.free.push(payload).is_err() {
            unreachable!("pool free queue overflowed: more buffers recycled than acquired");
        }
    }
}

impl Drop for PoolShared {
    fn drop(&mut self) {
        if let Some(parent) = &self.parent {
            while let Some(page) = self.free.pop() {
                parent.recycle(page);
            }
        }
    }
}

/// The global, pre-allocated buffer pool, and the factory for unpooled
/// per-worker arenas (see `acquire_unpooled`).
pub struct BufferPool {
    shared: Arc<PoolShared>,
    buffer_size: usize,
}

/// A reservation of pages carved out of a parent pool (global or another
/// sub-pool). Consumers of the sub-pool only ever see `PoolExhausted`
/// against their own reservation.
pub struct SubBufferPool {
    shared: Arc<PoolShared>,
}

impl BufferPool {
    /// Pre-allocates `num_buffers` pages of `buffer_size` bytes.
    pub fn new(buffer_size: usize, num_buffers: usize) -> Self {
        let free = ArrayQueue::new(num_buffers);
        for _ in 0..num_buffers {
            free.push(vec![0u8; buffer_size])
                .unwrap_or_else(|_| unreachable!("queue sized exactly for num_buffers"));
        }
        debug!(buffer_size, num_buffers, "buffer pool initialized");
        Self {
            shared: Arc::new(PoolShared {
                free,
                buffer_size,
                capacity: num_buffers,
                outstanding: AtomicUsize::new(0),
                parent: None,
            }),
            buffer_size,
        }
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Blocking acquire with a bounded wait. Wait-free when the free list is
    /// non-empty; otherwise polls until a page is recycled or `timeout`
    /// elapses.
    pub fn acquire(&self, timeout: Duration) -> Result<TupleBuffer> {
        acquire_from(&self.shared, timeout)
    }

    /// Non-blocking variant of `acquire`.
    pub fn try_acquire(&self) -> Result<TupleBuffer> {
        try_acquire_from(&self.shared)
    }

    /// Reserves `reserve` pages from this pool for exclusive use by a
    /// sub-pool (one per source or operator). Remaining pages recycled back
    /// to the parent pool when the sub-pool is dropped.
    pub fn create_sub_pool(&self, reserve: usize) -> Result<SubBufferPool> {
        let mut pages = Vec::with_capacity(reserve);
        for _ in 0..reserve {
            match self.shared.free.pop() {
                Some(page) => pages.push(page),
                None => {
                    // give back what we already drained before failing
                    for page in pages {
                        self.shared.recycle(page);
                    }
                    return Err(CoreError::PoolExhausted);
                }
            }
        }
        let free = ArrayQueue::new(reserve);
        for page in pages {
            free.push(page).unwrap_or_else(|_| unreachable!());
        }
        trace!(reserve, "sub-pool created");
        Ok(SubBufferPool {
            shared: Arc::new(PoolShared {
                free,
                buffer_size: self.shared.buffer_size,
                capacity: reserve,
                outstanding: AtomicUsize::new(0),
                parent: Some(self.shared.clone()),
            }),
        })
    }

    /// Verifies every acquired buffer has been returned. Call at shutdown;
    /// fails with `BuffersLeaked` instead of silently leaking the discrepancy.
    pub fn shutdown(&self) -> Result<()> {
        shutdown_shared(&self.shared)
    }
}

impl SubBufferPool {
    pub fn acquire(&self, timeout: Duration) -> Result<TupleBuffer> {
        acquire_from(&self.shared, timeout)
    }

    pub fn try_acquire(&self) -> Result<TupleBuffer> {
        try_acquire_from(&self.shared)
    }

    pub fn shutdown(&self) -> Result<()> {
        shutdown_shared(&self.shared)
    }
}

fn acquire_from(shared: &Arc<PoolShared>, timeout: Duration) -> Result<TupleBuffer> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(payload) = shared.free.pop() {
            shared.outstanding.fetch_add(1, Ordering::AcqRel);
            return Ok(TupleBuffer::new(payload, RecycleTarget::Pooled(shared.clone())));
        }
        if Instant::now() >= deadline {
            warn!(buffer_size = shared.buffer_size, "pool exhausted");
            return Err(CoreError::PoolExhausted);
        }
        std::thread::yield_now();
    }
}

fn try_acquire_from(shared: &Arc<PoolShared>) -> Result<TupleBuffer> {
    match shared.free.pop() {
        Some(payload) => {
            shared.outstanding.fetch_add(1, Ordering::AcqRel);
            Ok(TupleBuffer::new(payload, RecycleTarget::Pooled(shared.clone())))
        }
        None => Err(CoreError::PoolExhausted),
    }
}

fn shutdown_shared(shared: &Arc<PoolShared>) -> Result<()> {
    let in_pool = shared.free.len();
    if in_pool != shared.capacity {
        let count = shared.capacity - in_pool;
        return Err(CoreError::BuffersLeaked { count });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_and_release_returns_page_to_pool() {
        let pool = BufferPool::new(64, 4);
        let buf = pool.try_acquire().unwrap();
        assert_eq!(pool.shared.free.len(), 3);
        drop(buf);
        assert_eq!(pool.shared.free.len(), 4);
        pool.shutdown().unwrap();
    }

    #[test]
    fn exhaustion_then_retry_after_release() {
        let pool = BufferPool::new(64, 2);
        let a = pool.try_acquire().unwrap();
        let b = pool.try_acquire().unwrap();
        assert!(matches!(pool.try_acquire(), Err(CoreError::PoolExhausted)));
        drop(a);
        assert!(pool.try_acquire().is_ok());
        drop(b);
    }

    #[test]
    fn acquire_blocks_then_succeeds_on_timeout_window() {
        let pool = Arc::new(BufferPool::new(64, 1));
        let held = pool.try_acquire().unwrap();
        let pool2 = pool.clone();
        let handle = std::thread::spawn(move || pool2.acquire(Duration::from_millis(200)));
        std::thread::sleep(Duration::from_millis(20));
        drop(held);
        assert!(handle.join().unwrap().is_ok());
    }

    #[test]
    fn acquire_times_out_when_truly_exhausted() {
        let pool = BufferPool::new(64, 1);
        let _held = pool.try_acquire().unwrap();
        let result = pool.acquire(Duration::from_millis(20));
        assert!(matches!(result, Err(CoreError::PoolExhausted)));
    }

    #[test]
    fn sub_pool_reserves_from_global() {
        let pool = BufferPool::new(64, 8);
        let sub = pool.create_sub_pool(4).unwrap();
        assert_eq!(pool.shared.free.len(), 4);
        let buf = sub.acquire(Duration::from_millis(10)).unwrap();
        drop(buf);
        sub.shutdown().unwrap();
        drop(sub);
        assert_eq!(pool.shared.free.len(), 8);
    }

    #[test]
    fn shutdown_fails_when_buffer_outstanding() {
        let pool = BufferPool::new(64, 2);
        let _buf = pool.try_acquire().unwrap();
        assert!(matches!(pool.shutdown(), Err(CoreError::BuffersLeaked { count: 1 })));
    }
}
