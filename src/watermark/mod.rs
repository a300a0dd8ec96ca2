//! Watermark Processor: merges per-origin, per-sequence barriers into one
//! monotone global watermark.

use crate::error::CoreError;
use crate::ids::OriginId;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::warn;

#[derive(Debug, Clone, Copy)]
pub struct WatermarkBarrier {
    pub origin: OriginId,
    pub sequence: u64,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    Drop,
    Graceful,
}

struct OriginState {
    next_seq: u64,
    contiguous_ts: u64,
    pending: BTreeMap<u64, u64>,
    last_progress: Instant,
}

impl OriginState {
    fn new() -> Self {
        Self {
            next_seq: 0,
            contiguous_ts: 0,
            pending: BTreeMap::new(),
            last_progress: Instant::now(),
        }
    }

    fn accept(&mut self, seq: u64, ts: u64) {
        if seq < self.next_seq {
            return; // duplicate after reconnect
        }
        if seq == self.next_seq {
            self.contiguous_ts = ts;
            self.next_seq += 1;
            self.last_progress = Instant::now();
            while let Some(&next_ts) = self.pending.get(&self.next_seq) {
                self.pending.remove(&self.next_seq);
                self.contiguous_ts = next_ts;
                self.next_seq += 1;
                self.last_progress = Instant::now();
            }
        } else {
            self.pending.insert(seq, ts);
        }
    }

    fn has_gap(&self) -> bool {
        !self.pending.is_empty()
    }
}

/// Combines per-origin watermarks into a single monotone global watermark
/// for the pipeline. Origins must be registered before their barriers are
/// submitted, so the global minimum is always over a fixed, known set —
/// otherwise a late-joining origin starting at timestamp zero could pull the
/// global watermark backwards.
pub struct WatermarkProcessor {
    origins: DashMap<OriginId, Mutex<OriginState>>,
    idle_timeout: Duration,
    global_watermark: AtomicU64,
}

impl WatermarkProcessor {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            origins: DashMap::new(),
            idle_timeout,
            global_watermark: AtomicU64::new(0),
        }
    }

    pub fn register_origin(&self, origin: OriginId) {
        self.origins.entry(origin).or_insert_with(|| Mutex::new(OriginState::new()));
    }

    pub fn submit_barrier(&self, barrier: WatermarkBarrier) {
        let entry = self
            .origins
            .entry(barrier.origin)
            .or_insert_with(|| Mutex::new(OriginState::new()));
        entry.lock().accept(barrier.sequence, barrier.timestamp);
        self.recompute_global();
    }

    fn recompute_global(&self) {
        if self.origins.is_empty() {
            return;
        }
        let min_ts = self
            .origins
            .iter()
            .map(|entry| entry.value().lock().contiguous_ts)
            .min()
            .unwrap_or(0);
        self.global_watermark.fetch_max(min_ts, Ordering::AcqRel);
    }

    pub fn global_watermark(&self) -> u64 {
        self.global_watermark.load(Ordering::Acquire)
    }

    /// Origins with a buffered gap older than the configured idle timeout.
    pub fn check_stalled(&self) -> Vec<CoreError> {
        let mut stalled = Vec::new();
        for entry in self.origins.iter() {
            let state = entry.value().lock();
            if state.has_gap() && state.last_progress.elapsed() >= self.idle_timeout {
                let origin = *entry.key();
                warn!(origin = origin.get(), "origin stalled");
                stalled.push(CoreError::OriginStalled {
                    origin: origin.get(),
                    idle_ms: state.last_progress.elapsed().as_millis() as u64,
                });
            }
        }
        stalled
    }

    /// Discards buffered barriers (`Drop`) or advances the watermark to
    /// `+inf` so any still-open windows trigger (`Graceful`).
    pub fn shutdown(&self, mode: ShutdownMode) {
        match mode {
            ShutdownMode::Drop => {
                for entry in self.origins.iter() {
                    entry.value().lock().pending.clear();
                }
            }
            ShutdownMode::Graceful => {
                self.global_watermark.store(u64::MAX, Ordering::Release);
            }
        }
    }
}
