//! Aggregation Operator Handler: the full life cycle of windowed
//! aggregation — build (per record), trigger (on watermark advance), and
//! the wire packaging trigger hands to the pipeline's `emit`.

use crate::error::Result;
use crate::hashmap::OffsetHashMap;
use crate::ids::{OperatorId, OriginId, WorkerThreadId};
use crate::pipeline::PipelineExecutionContext;
use crate::state::{encode_hash_map, AggregationMetadata, AggregationState, HashMapConfig, SerializedHashMap, WindowMetadata};
use crate::windowing::{Slice, SlicingStore, WindowInfo, WindowSpec};
use bincode::config::standard;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub type Combiner = dyn Fn(&mut [u8], &[u8]) + Send + Sync;

#[derive(Serialize, Deserialize)]
pub struct EmittedAggregationWindow {
    pub window_start: u64,
    pub window_end: u64,
    pub sequence_number: u64,
    pub maps: Vec<SerializedHashMap>,
}

pub struct AggregationOperatorHandler {
    operator_id: OperatorId,
    output_origin: OriginId,
    key_size: usize,
    value_size: usize,
    bucket_count: usize,
    page_size: usize,
    num_threads: usize,
    combiner: Arc<Combiner>,
    slicing_store: SlicingStore<Box<dyn Fn(u64, u64) -> Slice + Send + Sync>>,
}

impl AggregationOperatorHandler {
    pub fn new(
        operator_id: OperatorId,
        output_origin: OriginId,
        window_spec: WindowSpec,
        key_size: usize,
        value_size: usize,
        bucket_count: usize,
        page_size: usize,
        num_threads: usize,
        combiner: Arc<Combiner>,
    ) -> Self {
        let new_slice: Box<dyn Fn(u64, u64) -> Slice + Send + Sync> = Box::new(move |start, end| {
            Slice::new_aggregation(start, end, num_threads, move || {
                OffsetHashMap::new(key_size, value_size, bucket_count, page_size)
                    .expect("operator-configured bucket_count must be a power of two")
            })
        });
        Self {
            operator_id,
            output_origin,
            key_size,
            value_size,
            bucket_count,
            page_size,
            num_threads,
            combiner,
            slicing_store: SlicingStore::new(window_spec, new_slice),
        }
    }

    pub fn operator_id(&self) -> OperatorId {
        self.operator_id
    }

    /// Snapshots every non-triggered slice for persistence. Grounded on
    /// `captureState()`: when there's nothing to snapshot it still advances
    /// `last_watermark` so a later resume knows how far processing got.
    pub fn capture_state(&self, processed_records: u64, watermark: u64) -> AggregationState {
        let slices = self.slicing_store.all_non_triggered();
        let mut maps = Vec::new();
        let mut windows = Vec::new();
        for slice in &slices {
            let first_map_index = maps.len() as u32;
            let mut map_count = 0u32;
            for per_thread in slice.aggregation_maps() {
                maps.push(encode_hash_map(&per_thread.lock()));
                map_count += 1;
            }
            windows.push(WindowMetadata {
                start: slice.start,
                end: slice.end,
                first_map_index,
                map_count,
            });
        }
        AggregationState {
            metadata: AggregationMetadata {
                operator_id: self.operator_id.get(),
                processed_records,
                last_watermark: watermark,
                version: crate::state::STATE_FORMAT_VERSION,
            },
            config: HashMapConfig {
                key_size: self.key_size as u32,
                value_size: self.value_size as u32,
                bucket_count: self.bucket_count as u32,
                page_size: self.page_size as u32,
            },
            maps,
            windows,
        }
    }

    /// Build path: find-or-create the key in the current worker thread's
    /// slice-local map, then fold `value` in with the operator's combiner.
    pub fn build(&self, key: &[u8], value: &[u8], hash: u64, event_time: u64, worker: WorkerThreadId) -> Result<()> {
        debug_assert_eq!(key.len(), self.key_size);
        debug_assert_eq!(value.len(), self.value_size);
        let slices = self.slicing_store.get_or_create_slices(event_time);
        for slice in slices {
            let maps = slice.aggregation_maps();
            let mut map = maps[worker.get() % maps.len()].lock();
            match map.lookup(key, hash) {
                Some(offset) => {
                    let existing = map.value_mut(offset);
                    (self.combiner)(existing, value);
                }
                None => {
                    map.find_or_create(key, hash, |slot| slot.copy_from_slice(value))?;
                }
            }
        }
        Ok(())
    }

    /// Trigger path: drain every window whose end has passed the watermark,
    /// package the non-empty per-thread maps, and emit one buffer per window.
    pub fn trigger(&self, ctx: &PipelineExecutionContext, watermark: u64, worker: WorkerThreadId) -> Result<Vec<WindowInfo>> {
        let mut triggered = Vec::new();
        for (window_info, slices) in self.slicing_store.drain_triggered(watermark) {
            let mut maps = Vec::new();
            for slice in &slices {
                for per_thread in slice.aggregation_maps() {
                    let map = per_thread.lock();
                    if !map.is_empty() {
                        maps.push(encode_hash_map(&map));
                    }
                }
            }
            let payload = EmittedAggregationWindow {
                window_start: window_info.start,
                window_end: window_info.end,
                sequence_number: window_info.sequence_number,
                maps,
            };
            let bytes = bincode::serde::encode_to_vec(&payload, standard())?;
            let buffer = ctx.buffer_manager().acquire_unpooled(bytes.len(), worker)?;
            buffer.with_bytes_mut(|dst| dst[..bytes.len()].copy_from_slice(&bytes));
            ctx.emit(buffer, self.output_origin, 0, true, window_info.start)?;
            triggered.push(window_info);
        }
        Ok(triggered)
    }
}

/// Merges N independent per-thread maps into one final map, invoking the
/// combiner on collisions. Runs on the single-threaded probe pipeline.
pub fn merge_maps(maps: &[SerializedHashMap], key_size: usize, value_size: usize, combiner: &Combiner) -> OffsetHashMap {
    let bucket_count = maps.first().map(|m| m.bucket_count as usize).unwrap_or(1).max(1);
    let mut merged = OffsetHashMap::new(key_size, value_size, bucket_count.next_power_of_two(), 4096)
        .expect("power-of-two bucket count");
    for serialized in maps {
        let source = crate::state::decode_hash_map(serialized, key_size, value_size);
        for (key, value) in source.iter() {
            let hash = fnv1a(key);
            match merged.lookup(key, hash) {
                Some(offset) => combiner(merged.value_mut(offset), value),
                None => {
                    merged
                        .find_or_create(key, hash, |slot| slot.copy_from_slice(value))
                        .expect("merge target arena has no fixed budget");
                }
            }
        }
    }
    merged
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut h: u64 = 0xcbf29ce484222325;
    for &b in bytes {
        h ^= b as u64;
        h = h.wrapping_mul(0x100000001b3);
    }
    h
}

pub fn sum_combiner() -> Arc<Combiner> {
    Arc::new(|acc: &mut [u8], incoming: &[u8]| {
        let a = u64::from_le_bytes(acc.try_into().unwrap());
        let b = u64::from_le_bytes(incoming.try_into().unwrap());
        acc.copy_from_slice(&(a + b).to_le_bytes());
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tumbling_sum_scenario() {
        // window size 10ms, one origin: (k=1,v=1,t=1) (k=1,v=2,t=5) (k=2,v=3,t=7) (k=1,v=4,t=15)
        let handler = AggregationOperatorHandler::new(
            OperatorId::new(1),
            OriginId::new(100),
            WindowSpec::Tumbling { size_ms: 10 },
            8,
            8,
            16,
            4096,
            1,
            sum_combiner(),
        );
        let w = WorkerThreadId::new(0);
        handler.build(&1u64.to_le_bytes(), &1u64.to_le_bytes(), fnv1a(&1u64.to_le_bytes()), 1, w).unwrap();
        handler.build(&1u64.to_le_bytes(), &2u64.to_le_bytes(), fnv1a(&1u64.to_le_bytes()), 5, w).unwrap();
        handler.build(&2u64.to_le_bytes(), &3u64.to_le_bytes(), fnv1a(&2u64.to_le_bytes()), 7, w).unwrap();
        handler.build(&1u64.to_le_bytes(), &4u64.to_le_bytes(), fnv1a(&1u64.to_le_bytes()), 15, w).unwrap();

        let cfg = crate::config::WorkerConfig::default().with_buffer_size(64).with_num_pooled_buffers(4);
        let bm = std::sync::Arc::new(crate::buffer::BufferManager::new(&cfg).unwrap());
        let ctx = PipelineExecutionContext::new(bm, crate::pipeline::ContinuationPolicy::Possible);
        ctx.transition(crate::pipeline::PipelineState::Open).unwrap();
        ctx.transition(crate::pipeline::PipelineState::Running).unwrap();

        let captured = std::sync::Arc::new(parking_lot::Mutex::new(Vec::new()));
        let captured2 = captured.clone();
        ctx.add_downstream(move |buf| {
            buf.with_bytes(|bytes| {
                let (decoded, _): (EmittedAggregationWindow, usize) =
                    bincode::serde::decode_from_slice(bytes, standard()).unwrap();
                captured2.lock().push(decoded);
            })
        });

        let windows = handler.trigger(&ctx, 9, w).unwrap();
        assert!(windows.is_empty());

        let windows = handler.trigger(&ctx, 10, w).unwrap();
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].start, 0);
        let first = &captured.lock()[0];
        let merged = merge_maps(&first.maps, 8, 8, &*sum_combiner());
        let mut entries: Vec<(u64, u64)> = merged
            .iter()
            .map(|(k, v)| (u64::from_le_bytes(k.try_into().unwrap()), u64::from_le_bytes(v.try_into().unwrap())))
            .collect();
        entries.sort_unstable();
        assert_eq!(entries, vec![(1, 3), (2, 3)]);

        let windows = handler.trigger(&ctx, 20, w).unwrap();
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].start, 10);
        let second = &captured.lock()[1];
        let merged2 = merge_maps(&second.maps, 8, 8, &*sum_combiner());
        let entries2: Vec<(u64, u64)> = merged2
            .iter()
            .map(|(k, v)| (u64::from_le_bytes(k.try_into().unwrap()), u64::from_le_bytes(v.try_into().unwrap())))
            .collect();
        assert_eq!(entries2, vec![(1, 4)]);
    }
}
