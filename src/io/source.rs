//! Source Driver: owns a dedicated OS thread that pulls records from a
//! format parser, fills pooled buffers, stamps origin/sequence/creation-time
//! metadata, and submits them to a pipeline execution context. Grounded on
//! the teacher's worker-thread-per-connection style in
//! `networking/transport/tcp.rs` (one blocking loop per unit of I/O, a stop
//! signal checked each iteration) adapted to a synchronous `std::thread`
//! since record parsing here is CPU-bound, not `tokio`-async I/O.

use crate::buffer::{BufferManager, SubBufferPool, TupleBuffer};
use crate::error::Result;
use crate::ids::OriginId;
use crate::pipeline::PipelineExecutionContext;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Fills one buffer's worth of raw bytes. Returns `Ok(0)` at end of input.
/// Implementors parse whatever on-disk or in-memory format backs the source
/// (CSV, a length-prefixed binary log, a generator for tests).
pub trait RecordParser: Send {
    fn fill(&mut self, dst: &mut [u8]) -> Result<usize>;
}

pub struct SourceDriver {
    origin: OriginId,
    sub_pool: SubBufferPool,
    stop: Arc<AtomicBool>,
    sequence: AtomicU64,
}

impl SourceDriver {
    pub fn new(buffer_manager: &BufferManager, origin: OriginId, reservation: usize) -> Result<Self> {
        Ok(Self {
            origin,
            sub_pool: buffer_manager.create_sub_pool(reservation)?,
            stop: Arc::new(AtomicBool::new(false)),
            sequence: AtomicU64::new(0),
        })
    }

    pub fn stop_token(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// Runs the ingress loop on the calling thread until the parser signals
    /// end of input or the stop token is set. Closes the sub-pool on exit so
    /// a leaked buffer surfaces as `BuffersLeaked` rather than silently.
    pub fn run(
        &self,
        ctx: &PipelineExecutionContext,
        mut parser: impl RecordParser,
        acquire_timeout: Duration,
    ) -> Result<()> {
        info!(origin = self.origin.get(), "source driver started");
        loop {
            if self.stop.load(Ordering::Acquire) {
                break;
            }
            let buffer = self.sub_pool.acquire(acquire_timeout)?;
            let filled = buffer.with_bytes_mut(|dst| parser.fill(dst))?;
            if filled == 0 {
                break;
            }
            self.stamp_and_submit(ctx, buffer, filled)?;
        }
        debug!(origin = self.origin.get(), "source driver closing sub-pool");
        self.sub_pool.shutdown()
    }

    fn stamp_and_submit(&self, ctx: &PipelineExecutionContext, buffer: TupleBuffer, filled: usize) -> Result<()> {
        let sequence = self.sequence.fetch_add(1, Ordering::AcqRel);
        let mut metadata = buffer.metadata();
        metadata.origin_id = self.origin.get();
        metadata.sequence_number = sequence;
        metadata.creation_ts = now_millis();
        metadata.num_tuples = filled as u32;
        buffer.set_metadata(metadata);
        ctx.emit(buffer, self.origin, 0, true, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkerConfig;
    use crate::pipeline::ContinuationPolicy;
    use parking_lot::Mutex;

    struct CountingParser {
        remaining: usize,
    }

    impl RecordParser for CountingParser {
        fn fill(&mut self, dst: &mut [u8]) -> Result<usize> {
            if self.remaining == 0 {
                return Ok(0);
            }
            self.remaining -= 1;
            dst.iter_mut().for_each(|b| *b = 1);
            Ok(dst.len())
        }
    }

    #[test]
    fn emits_one_buffer_per_fill_until_exhausted() {
        let cfg = WorkerConfig::default().with_buffer_size(16).with_num_pooled_buffers(8);
        let bm = Arc::new(BufferManager::new(&cfg).unwrap());
        let ctx = PipelineExecutionContext::new(bm.clone(), ContinuationPolicy::Possible);
        ctx.transition(crate::pipeline::PipelineState::Open).unwrap();
        ctx.transition(crate::pipeline::PipelineState::Running).unwrap();

        let received = Arc::new(Mutex::new(Vec::new()));
        let received2 = received.clone();
        ctx.add_downstream(move |buf| received2.lock().push(buf.metadata().sequence_number));

        let driver = SourceDriver::new(&bm, OriginId::new(3), 4).unwrap();
        driver.run(&ctx, CountingParser { remaining: 3 }, Duration::from_millis(100)).unwrap();

        assert_eq!(*received.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn stop_token_halts_the_loop() {
        let cfg = WorkerConfig::default().with_buffer_size(16).with_num_pooled_buffers(8);
        let bm = Arc::new(BufferManager::new(&cfg).unwrap());
        let ctx = PipelineExecutionContext::new(bm.clone(), ContinuationPolicy::Possible);
        ctx.transition(crate::pipeline::PipelineState::Open).unwrap();
        ctx.transition(crate::pipeline::PipelineState::Running).unwrap();
        ctx.add_downstream(|_| {});

        let driver = SourceDriver::new(&bm, OriginId::new(1), 4).unwrap();
        driver.stop_token().store(true, Ordering::Release);
        driver.run(&ctx, CountingParser { remaining: 1000 }, Duration::from_millis(100)).unwrap();
    }
}
