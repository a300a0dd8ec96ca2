//! Nested-Loop Join Handler: per-slice, per-thread, per-side paged vectors,
//! triggered into a Cartesian probe against a user predicate.

use crate::error::Result;
use crate::ids::{OperatorId, OriginId, WorkerThreadId};
use crate::pipeline::PipelineExecutionContext;
use crate::windowing::{PagedVector, Slice, SlicingStore, WindowInfo, WindowSpec};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinSide {
    Left,
    Right,
}

pub type JoinPredicate = dyn Fn(&[u8], &[u8]) -> bool + Send + Sync;

pub struct NestedLoopJoinHandler {
    operator_id: OperatorId,
    output_origin: OriginId,
    left_record_size: usize,
    right_record_size: usize,
    page_size: usize,
    num_threads: usize,
    predicate: Arc<JoinPredicate>,
    slicing_store: SlicingStore<Box<dyn Fn(u64, u64) -> Slice + Send + Sync>>,
}

impl NestedLoopJoinHandler {
    pub fn new(
        operator_id: OperatorId,
        output_origin: OriginId,
        window_spec: WindowSpec,
        left_record_size: usize,
        right_record_size: usize,
        page_size: usize,
        num_threads: usize,
        predicate: Arc<JoinPredicate>,
    ) -> Self {
        // Joins share the slicing infrastructure with aggregation; the
        // record size used for both paged vectors is the wider of the two
        // sides so one page layout serves either slot.
        let record_size = left_record_size.max(right_record_size);
        let new_slice: Box<dyn Fn(u64, u64) -> Slice + Send + Sync> =
            Box::new(move |start, end| Slice::new_join(start, end, num_threads, record_size, page_size));
        Self {
            operator_id,
            output_origin,
            left_record_size,
            right_record_size,
            page_size,
            num_threads,
            predicate,
            slicing_store: SlicingStore::new(window_spec, new_slice),
        }
    }

    pub fn operator_id(&self) -> OperatorId {
        self.operator_id
    }

    pub fn build(&self, side: JoinSide, record: &[u8], event_time: u64, worker: WorkerThreadId) -> Result<()> {
        let expected = match side {
            JoinSide::Left => self.left_record_size,
            JoinSide::Right => self.right_record_size,
        };
        debug_assert_eq!(record.len(), expected);
        let slices = self.slicing_store.get_or_create_slices(event_time);
        for slice in slices {
            let vectors = slice.join_vectors();
            let mut guard = vectors[worker.get() % vectors.len()].lock();
            match side {
                JoinSide::Left => guard.0.push(pad(record, self.max_record_size())),
                JoinSide::Right => guard.1.push(pad(record, self.max_record_size())),
            };
        }
        Ok(())
    }

    fn max_record_size(&self) -> usize {
        self.left_record_size.max(self.right_record_size)
    }

    /// Trigger path: gather every thread's left/right vectors for each ready
    /// window and probe the Cartesian product, emitting matches.
    pub fn trigger(
        &self,
        ctx: &PipelineExecutionContext,
        watermark: u64,
        worker: WorkerThreadId,
    ) -> Result<Vec<WindowInfo>> {
        let mut triggered = Vec::new();
        for (window_info, slices) in self.slicing_store.drain_triggered(watermark) {
            let mut matches = Vec::new();
            for slice in &slices {
                for per_thread in slice.join_vectors() {
                    let (left, right) = &*per_thread.lock();
                    for l in left.iter() {
                        for r in right.iter() {
                            let l_trim = &l[..self.left_record_size];
                            let r_trim = &r[..self.right_record_size];
                            if (self.predicate)(l_trim, r_trim) {
                                matches.push((l_trim.to_vec(), r_trim.to_vec()));
                            }
                        }
                    }
                }
            }
            if !matches.is_empty() {
                let total = matches.iter().map(|(l, r)| l.len() + r.len()).sum();
                let buffer = ctx.buffer_manager().acquire_unpooled(total, worker)?;
                buffer.with_bytes_mut(|dst| {
                    let mut offset = 0;
                    for (l, r) in &matches {
                        dst[offset..offset + l.len()].copy_from_slice(l);
                        offset += l.len();
                        dst[offset..offset + r.len()].copy_from_slice(r);
                        offset += r.len();
                    }
                });
                ctx.emit(buffer, self.output_origin, 0, true, window_info.start)?;
            }
            triggered.push(window_info);
        }
        Ok(triggered)
    }
}

fn pad(record: &[u8], size: usize) -> Vec<u8> {
    let mut v = vec![0u8; size];
    v[..record.len()].copy_from_slice(record);
    v
}
