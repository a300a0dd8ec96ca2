//! Pipeline Execution Context: per-pipeline scratch state and the `emit`
//! egress path to child pipelines.

use crate::buffer::{BufferManager, TupleBuffer};
use crate::error::{CoreError, Result};
use crate::ids::OriginId;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

use super::state::{validate_transition, PipelineState};

/// Tells the scheduler whether `emit` may call the downstream pipeline
/// inline on the current thread (`Possible`) or must hand the buffer to a
/// queue for a different thread to pick up (`Required`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContinuationPolicy {
    Possible,
    Required,
}

type DownstreamFn = Box<dyn Fn(TupleBuffer) + Send + Sync>;

pub struct PipelineExecutionContext {
    buffer_manager: Arc<BufferManager>,
    state: Mutex<PipelineState>,
    continuation: ContinuationPolicy,
    global_handlers: DashMap<u64, Arc<dyn Any + Send + Sync>>,
    local_state: DashMap<u64, Arc<dyn Any + Send + Sync>>,
    downstream: Mutex<Vec<DownstreamFn>>,
    next_sequence: AtomicU64,
}

impl PipelineExecutionContext {
    pub fn new(buffer_manager: Arc<BufferManager>, continuation: ContinuationPolicy) -> Self {
        Self {
            buffer_manager,
            state: Mutex::new(PipelineState::Created),
            continuation,
            global_handlers: DashMap::new(),
            local_state: DashMap::new(),
            downstream: Mutex::new(Vec::new()),
            next_sequence: AtomicU64::new(0),
        }
    }

    pub fn buffer_manager(&self) -> &Arc<BufferManager> {
        &self.buffer_manager
    }

    pub fn continuation_policy(&self) -> ContinuationPolicy {
        self.continuation
    }

    pub fn state(&self) -> PipelineState {
        *self.state.lock()
    }

    pub fn transition(&self, next: PipelineState) -> Result<()> {
        let mut guard = self.state.lock();
        validate_transition(*guard, next)?;
        *guard = next;
        Ok(())
    }

    pub fn add_downstream(&self, f: impl Fn(TupleBuffer) + Send + Sync + 'static) {
        self.downstream.lock().push(Box::new(f));
    }

    pub fn register_global_handler<T: Any + Send + Sync>(&self, handler_id: u64, handler: Arc<T>) {
        self.global_handlers.insert(handler_id, handler);
    }

    pub fn get_global_handler<T: Any + Send + Sync>(&self, handler_id: u64) -> Option<Arc<T>> {
        self.global_handlers
            .get(&handler_id)
            .and_then(|entry| entry.value().clone().downcast::<T>().ok())
    }

    pub fn register_local_state<T: Any + Send + Sync>(&self, operator_id: u64, state: Arc<T>) {
        self.local_state.insert(operator_id, state);
    }

    pub fn get_local_state<T: Any + Send + Sync>(&self, operator_id: u64) -> Option<Arc<T>> {
        self.local_state
            .get(&operator_id)
            .and_then(|entry| entry.value().clone().downcast::<T>().ok())
    }

    /// Stamps sequence number, chunk metadata, and watermark before making
    /// the buffer visible downstream, then dispatches per the continuation
    /// policy.
    pub fn emit(
        &self,
        buffer: TupleBuffer,
        origin: OriginId,
        chunk_number: u32,
        last_chunk: bool,
        watermark_ts: u64,
    ) -> Result<()> {
        if !self.state().can_mutate() {
            return Err(CoreError::InvalidState(format!(
                "emit called while pipeline is {:?}",
                self.state()
            )));
        }
        let mut metadata = buffer.metadata();
        metadata.origin_id = origin.get();
        metadata.sequence_number = self.next_sequence.fetch_add(1, Ordering::AcqRel);
        metadata.chunk_number = chunk_number;
        metadata.last_chunk = last_chunk;
        metadata.watermark_ts = watermark_ts;
        buffer.set_metadata(metadata);

        trace!(
            origin = origin.get(),
            sequence = metadata.sequence_number,
            "emitting buffer"
        );
        let downstream = self.downstream.lock();
        for sink in downstream.iter() {
            sink(buffer.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkerConfig;

    fn ctx() -> PipelineExecutionContext {
        let cfg = WorkerConfig::default().with_buffer_size(64).with_num_pooled_buffers(4);
        let bm = Arc::new(BufferManager::new(&cfg).unwrap());
        PipelineExecutionContext::new(bm, ContinuationPolicy::Possible)
    }

    #[test]
    fn emit_before_open_fails() {
        let ctx = ctx();
        let buf = ctx.buffer_manager().try_acquire().unwrap();
        assert!(matches!(
            ctx.emit(buf, OriginId::new(1), 0, true, 0),
            Err(CoreError::InvalidState(_))
        ));
    }

    #[test]
    fn emit_stamps_metadata_and_reaches_downstream() {
        let ctx = ctx();
        ctx.transition(PipelineState::Open).unwrap();
        ctx.transition(PipelineState::Running).unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));
        let received2 = received.clone();
        ctx.add_downstream(move |buf| received2.lock().push(buf.metadata().sequence_number));
        let buf = ctx.buffer_manager().try_acquire().unwrap();
        ctx.emit(buf, OriginId::new(9), 0, true, 42).unwrap();
        assert_eq!(*received.lock(), vec![0]);
    }

    #[test]
    fn local_and_global_state_round_trip() {
        let ctx = ctx();
        ctx.register_local_state(1, Arc::new(5u32));
        assert_eq!(*ctx.get_local_state::<u32>(1).unwrap(), 5);
        assert!(ctx.get_local_state::<u64>(1).is_none());
    }
}
