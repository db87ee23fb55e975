//! In-process frame source for tests and hardware-less runs.
//!
//! [`SimulatedSource`] behaves like a camera driver with a fixed pool of
//! preallocated buffers: `acquire` blocks for one frame interval and hands out
//! a free slot, `release` puts it back. A shared [`SimProbe`] records every
//! hand-out and hand-back so callers can check that each buffer is recycled
//! exactly once, even after the source has moved onto the acquisition task.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::capture::frame::FrameSize;
use crate::capture::{FrameBuffer, FrameSource};
use crate::error::{HardwareError, ERR_NO_MEM, ERR_TIMEOUT};
use crate::CameraConfig;

/// Byte length of a simulated JPEG for the given resolution and quality.
/// Lower quality numbers mean finer quantization, hence larger frames.
pub fn nominal_frame_len(size: FrameSize, jpeg_quality: u8) -> usize {
    size.pixel_count() * 2 / usize::from(jpeg_quality.max(1))
}

/// Ownership bookkeeping shared between a [`SimulatedSource`] and observers.
#[derive(Debug, Default)]
pub struct SimProbe {
    acquired: AtomicU64,
    released: AtomicU64,
    outstanding: AtomicUsize,
    max_outstanding: AtomicUsize,
    double_releases: AtomicU64,
    acquire_failures: AtomicU64,
    failures_pending: AtomicUsize,
    released_sequences: Mutex<Vec<u64>>,
}

impl SimProbe {
    pub fn acquired(&self) -> u64 {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> u64 {
        self.released.load(Ordering::SeqCst)
    }

    /// Buffers currently outside the pool.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    pub fn max_outstanding(&self) -> usize {
        self.max_outstanding.load(Ordering::SeqCst)
    }

    pub fn double_releases(&self) -> u64 {
        self.double_releases.load(Ordering::SeqCst)
    }

    pub fn acquire_failures(&self) -> u64 {
        self.acquire_failures.load(Ordering::SeqCst)
    }

    /// Sequence numbers in release order.
    pub fn released_sequences(&self) -> Vec<u64> {
        self.released_sequences
            .lock()
            .map(|seqs| seqs.clone())
            .unwrap_or_default()
    }

    /// Make the next `count` acquisitions time out.
    pub fn fail_next_acquires(&self, count: usize) {
        self.failures_pending.fetch_add(count, Ordering::SeqCst);
    }

    fn take_pending_failure(&self) -> bool {
        self.failures_pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// Simulated camera driver
pub struct SimulatedSource {
    frame_interval: Duration,
    init_error: Option<HardwareError>,
    frame_size: FrameSize,
    pool: Vec<Bytes>,
    in_use: Vec<bool>,
    next_sequence: u64,
    started: Instant,
    probe: Arc<SimProbe>,
}

impl Default for SimulatedSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedSource {
    pub fn new() -> Self {
        Self {
            frame_interval: Duration::from_millis(5),
            init_error: None,
            frame_size: FrameSize::Vga,
            pool: Vec::new(),
            in_use: Vec::new(),
            next_sequence: 0,
            started: Instant::now(),
            probe: Arc::new(SimProbe::default()),
        }
    }

    /// Time `acquire` blocks to simulate sensor exposure.
    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }

    /// Make `init` fail, e.g. to emulate a missing sensor.
    pub fn with_init_error(mut self, error: HardwareError) -> Self {
        self.init_error = Some(error);
        self
    }

    pub fn probe(&self) -> Arc<SimProbe> {
        Arc::clone(&self.probe)
    }

    fn fill_slot(slot: usize, len: usize) -> Bytes {
        let mut data = vec![slot as u8; len.max(4)];
        let end = data.len();
        // JPEG SOI / EOI markers
        data[..2].copy_from_slice(&[0xFF, 0xD8]);
        data[end - 2..].copy_from_slice(&[0xFF, 0xD9]);
        Bytes::from(data)
    }
}

impl FrameSource for SimulatedSource {
    fn init(&mut self, config: &CameraConfig) -> Result<(), HardwareError> {
        if let Some(err) = self.init_error.clone() {
            return Err(err);
        }

        let count = usize::from(config.framebuffer_count);
        let len = nominal_frame_len(config.frame_size, config.jpeg_quality);
        self.frame_size = config.frame_size;
        self.pool = (0..count).map(|slot| Self::fill_slot(slot, len)).collect();
        self.in_use = vec![false; count];
        self.started = Instant::now();

        info!(
            "Simulated sensor ready: {} x{} buffers of {} bytes",
            self.frame_size, count, len
        );
        Ok(())
    }

    fn acquire(&mut self) -> Result<FrameBuffer, HardwareError> {
        thread::sleep(self.frame_interval);

        if self.probe.take_pending_failure() {
            self.probe.acquire_failures.fetch_add(1, Ordering::SeqCst);
            return Err(HardwareError::new(ERR_TIMEOUT, "sensor timed out"));
        }

        let slot = self
            .in_use
            .iter()
            .position(|used| !used)
            .ok_or_else(|| HardwareError::new(ERR_NO_MEM, "frame buffer pool exhausted"))?;
        self.in_use[slot] = true;

        self.next_sequence += 1;
        let outstanding = self.probe.outstanding.fetch_add(1, Ordering::SeqCst) + 1;
        self.probe
            .max_outstanding
            .fetch_max(outstanding, Ordering::SeqCst);
        self.probe.acquired.fetch_add(1, Ordering::SeqCst);

        let (width, height) = self.frame_size.dimensions();
        debug!(slot, sequence = self.next_sequence, "Simulated frame captured");

        Ok(FrameBuffer {
            slot,
            sequence: self.next_sequence,
            data: self.pool[slot].clone(),
            width,
            height,
            timestamp: self.started.elapsed(),
        })
    }

    fn release(&mut self, buffer: FrameBuffer) {
        match self.in_use.get_mut(buffer.slot) {
            Some(used) if *used => {
                *used = false;
                self.probe.outstanding.fetch_sub(1, Ordering::SeqCst);
                self.probe.released.fetch_add(1, Ordering::SeqCst);
                if let Ok(mut seqs) = self.probe.released_sequences.lock() {
                    seqs.push(buffer.sequence);
                }
            }
            _ => {
                warn!(
                    slot = buffer.slot,
                    sequence = buffer.sequence,
                    "Release of a buffer the pool does not own"
                );
                self.probe.double_releases.fetch_add(1, Ordering::SeqCst);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(count: u8) -> CameraConfig {
        CameraConfig {
            framebuffer_count: count,
            frame_size: FrameSize::Qqvga,
            ..CameraConfig::default()
        }
    }

    #[test]
    fn pool_hands_out_each_slot_once() {
        let mut source = SimulatedSource::new().with_frame_interval(Duration::ZERO);
        source.init(&config(2)).unwrap();

        let a = source.acquire().unwrap();
        let b = source.acquire().unwrap();
        assert_ne!(a.slot, b.slot);
        assert_eq!(a.data.len(), nominal_frame_len(FrameSize::Qqvga, 10));
        assert_eq!(&a.data[..2], &[0xFF, 0xD8]);

        let err = source.acquire().unwrap_err();
        assert_eq!(err.code, ERR_NO_MEM);

        source.release(a);
        let c = source.acquire().unwrap();
        assert_eq!(c.sequence, 3);

        let probe = source.probe();
        assert_eq!(probe.acquired(), 3);
        assert_eq!(probe.released(), 1);
        assert_eq!(probe.max_outstanding(), 2);
    }

    #[test]
    fn second_release_of_slot_is_counted() {
        let mut source = SimulatedSource::new().with_frame_interval(Duration::ZERO);
        source.init(&config(1)).unwrap();
        let buffer = source.acquire().unwrap();
        let slot = buffer.slot;
        source.release(buffer);

        source.release(FrameBuffer {
            slot,
            sequence: 1,
            data: Bytes::new(),
            width: 0,
            height: 0,
            timestamp: Duration::ZERO,
        });
        assert_eq!(source.probe().double_releases(), 1);
        assert_eq!(source.probe().released(), 1);
    }

    #[test]
    fn injected_failures_are_consumed() {
        let mut source = SimulatedSource::new().with_frame_interval(Duration::ZERO);
        source.init(&config(1)).unwrap();
        source.probe().fail_next_acquires(1);

        assert_eq!(source.acquire().unwrap_err().code, ERR_TIMEOUT);
        assert!(source.acquire().is_ok());
        assert_eq!(source.probe().acquire_failures(), 1);
    }

    #[test]
    fn init_error_surfaces() {
        let mut source = SimulatedSource::new()
            .with_init_error(HardwareError::new(0x20004, "camera probe failed"));
        assert_eq!(source.init(&config(1)).unwrap_err().code, 0x20004);
    }
}
