//! The top-level buffer manager a worker constructs once at boot: one global
//! pool plus one unpooled arena per worker thread. Grounded on the source's
//! `BufferManager` constructor validating `numberOfWorkerThreads > 0` and
//! owning both the pooled queue and the per-thread unpooled storage.

use crate::config::WorkerConfig;
use crate::error::{CoreError, Result};
use crate::ids::WorkerThreadId;
use std::sync::Arc;
use std::time::Duration;

use super::pool::{BufferPool, SubBufferPool};
use super::tuple_buffer::TupleBuffer;
use super::unpooled::{acquire_unpooled, UnpooledArena};

pub struct BufferManager {
    pool: BufferPool,
    unpooled: Vec<Arc<UnpooledArena>>,
    acquire_timeout: Duration,
}

impl BufferManager {
    pub fn new(config: &WorkerConfig) -> Result<Self> {
        if config.num_worker_threads == 0 {
            return Err(CoreError::InvalidState(
                "num_worker_threads must be > 0".into(),
            ));
        }
        let pool = BufferPool::new(config.buffer_size, config.num_pooled_buffers);
        let unpooled = (0..config.num_worker_threads)
            .map(|id| Arc::new(UnpooledArena::new(id)))
            .collect();
        Ok(Self {
            pool,
            unpooled,
            acquire_timeout: Duration::from_millis(config.acquire_timeout_ms),
        })
    }

    pub fn buffer_size(&self) -> usize {
        self.pool.buffer_size()
    }

    pub fn acquire(&self) -> Result<TupleBuffer> {
        self.pool.acquire(self.acquire_timeout)
    }

    pub fn try_acquire(&self) -> Result<TupleBuffer> {
        self.pool.try_acquire()
    }

    /// Allocates at least `size` bytes from the given worker thread's
    /// unpooled arena. Used when a payload exceeds `buffer_size`.
    pub fn acquire_unpooled(&self, size: usize, worker: WorkerThreadId) -> Result<TupleBuffer> {
        let arena = self
            .unpooled
            .get(worker.get())
            .ok_or_else(|| CoreError::InvalidState(format!("no unpooled arena for worker {worker}")))?;
        Ok(acquire_unpooled(arena, size))
    }

    pub fn create_sub_pool(&self, reserve: usize) -> Result<SubBufferPool> {
        self.pool.create_sub_pool(reserve)
    }

    pub fn shutdown(&self) -> Result<()> {
        self.pool.shutdown()
    }
}
