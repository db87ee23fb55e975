//! Lock-free pipeline counters, mirrored into the `metrics` registry

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam::utils::CachePadded;
use metrics::counter;

/// Counters written by both the acquisition task and the scheduler context.
#[derive(Debug, Default)]
pub struct PipelineStats {
    acquired: CachePadded<AtomicU64>,
    acquire_failures: CachePadded<AtomicU64>,
    delivered: CachePadded<AtomicU64>,
    released: CachePadded<AtomicU64>,
}

/// Point-in-time copy of [`PipelineStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub frames_acquired: u64,
    pub acquire_failures: u64,
    pub frames_delivered: u64,
    pub frames_released: u64,
}

impl PipelineStats {
    pub fn record_acquired(&self) {
        self.acquired.fetch_add(1, Ordering::Relaxed);
        counter!("framepool_frames_acquired").increment(1);
    }

    pub fn record_acquire_failure(&self) {
        self.acquire_failures.fetch_add(1, Ordering::Relaxed);
        counter!("framepool_acquire_failures").increment(1);
    }

    pub fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
        counter!("framepool_frames_delivered").increment(1);
    }

    pub fn record_released(&self) {
        self.released.fetch_add(1, Ordering::Relaxed);
        counter!("framepool_frames_released").increment(1);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_acquired: self.acquired.load(Ordering::Relaxed),
            acquire_failures: self.acquire_failures.load(Ordering::Relaxed),
            frames_delivered: self.delivered.load(Ordering::Relaxed),
            frames_released: self.released.load(Ordering::Relaxed),
        }
    }
}
