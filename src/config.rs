//! Worker configuration. Loading from a file or environment is coordinator
//! territory; this struct is built directly by the embedding binary, either
//! via `Default` or the `with_*` builder.

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Size in bytes of one pooled page. Every pooled buffer is exactly this big.
    pub buffer_size: usize,
    /// Number of pages the global buffer pool pre-allocates.
    pub num_pooled_buffers: usize,
    /// Fixed size of the worker thread pool; also the partition count for
    /// per-thread operator state.
    pub num_worker_threads: usize,
    /// Pages reserved for each source's private sub-pool at creation.
    pub local_buffer_reservation_per_source: usize,
    /// How long a blocking `acquire` waits before failing with `PoolExhausted`.
    pub acquire_timeout_ms: u64,
    /// How long an origin may go without contiguous watermark progress before
    /// `OriginStalled` is raised.
    pub watermark_idle_timeout_ms: u64,
    /// Delay between network reconnect attempts (exponential backoff base).
    pub network_connect_retry_ms: u64,
    /// Total time budget for reconnect attempts before `ChannelUnrecoverable`.
    pub network_connect_deadline_ms: u64,
    /// Bucket count for freshly created offset hash maps. Must be a power of two.
    pub hash_map_bucket_count: usize,
    /// Arena page size for offset hash maps, in bytes.
    pub hash_map_page_size: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            buffer_size: 4096,
            num_pooled_buffers: 1024,
            num_worker_threads: num_cpus::get().max(1),
            local_buffer_reservation_per_source: 8,
            acquire_timeout_ms: 5_000,
            watermark_idle_timeout_ms: 30_000,
            network_connect_retry_ms: 100,
            network_connect_deadline_ms: 30_000,
            hash_map_bucket_count: 1024,
            hash_map_page_size: 4096,
        }
    }
}

impl WorkerConfig {
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    pub fn with_num_pooled_buffers(mut self, n: usize) -> Self {
        self.num_pooled_buffers = n;
        self
    }

    pub fn with_num_worker_threads(mut self, n: usize) -> Self {
        self.num_worker_threads = n;
        self
    }

    pub fn with_local_buffer_reservation_per_source(mut self, n: usize) -> Self {
        self.local_buffer_reservation_per_source = n;
        self
    }

    pub fn with_acquire_timeout_ms(mut self, ms: u64) -> Self {
        self.acquire_timeout_ms = ms;
        self
    }

    pub fn with_watermark_idle_timeout_ms(mut self, ms: u64) -> Self {
        self.watermark_idle_timeout_ms = ms;
        self
    }

    pub fn with_network_connect_retry_ms(mut self, ms: u64) -> Self {
        self.network_connect_retry_ms = ms;
        self
    }

    pub fn with_network_connect_deadline_ms(mut self, ms: u64) -> Self {
        self.network_connect_deadline_ms = ms;
        self
    }

    pub fn with_hash_map_bucket_count(mut self, n: usize) -> Self {
        self.hash_map_bucket_count = n;
        self
    }

    pub fn with_hash_map_page_size(mut self, n: usize) -> Self {
        self.hash_map_page_size = n;
        self
    }
}
