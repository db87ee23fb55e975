use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use flume::Sender;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Raw buffer handle produced by a [`FrameSource`](super::FrameSource).
///
/// Not `Clone`: a handle has exactly one owner until it is given back
/// through `FrameSource::release`.
#[derive(Debug)]
pub struct FrameBuffer {
    /// Slot within the hardware pool
    pub slot: usize,
    /// Acquisition counter, unique per handed-out buffer
    pub sequence: u64,
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
    /// Capture time relative to source start
    pub timestamp: Duration,
}

/// Sensor output resolutions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameSize {
    #[serde(alias = "160x120")]
    Qqvga,
    #[serde(alias = "128x160")]
    Qqvga2,
    #[serde(alias = "176x144")]
    Qcif,
    #[serde(alias = "240x176")]
    Hqvga,
    #[serde(alias = "320x240")]
    Qvga,
    #[serde(alias = "400x296")]
    Cif,
    #[serde(alias = "640x480")]
    Vga,
    #[serde(alias = "800x600")]
    Svga,
    #[serde(alias = "1024x768")]
    Xga,
    #[serde(alias = "1280x1024")]
    Sxga,
    #[serde(alias = "1600x1200")]
    Uxga,
}

impl FrameSize {
    pub const ALL: [FrameSize; 11] = [
        FrameSize::Qqvga,
        FrameSize::Qqvga2,
        FrameSize::Qcif,
        FrameSize::Hqvga,
        FrameSize::Qvga,
        FrameSize::Cif,
        FrameSize::Vga,
        FrameSize::Svga,
        FrameSize::Xga,
        FrameSize::Sxga,
        FrameSize::Uxga,
    ];

    pub const fn dimensions(self) -> (u32, u32) {
        match self {
            FrameSize::Qqvga => (160, 120),
            FrameSize::Qqvga2 => (128, 160),
            FrameSize::Qcif => (176, 144),
            FrameSize::Hqvga => (240, 176),
            FrameSize::Qvga => (320, 240),
            FrameSize::Cif => (400, 296),
            FrameSize::Vga => (640, 480),
            FrameSize::Svga => (800, 600),
            FrameSize::Xga => (1024, 768),
            FrameSize::Sxga => (1280, 1024),
            FrameSize::Uxga => (1600, 1200),
        }
    }

    pub const fn pixel_count(self) -> usize {
        let (w, h) = self.dimensions();
        (w * h) as usize
    }
}

impl fmt::Display for FrameSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (w, h) = self.dimensions();
        write!(f, "{w}x{h}")
    }
}

/// One acquired hardware buffer, shared as `Arc<FrameImage>`.
///
/// Dropping the last reference pushes the buffer onto the return queue, from
/// where the acquisition task hands it back to the hardware pool.
pub struct FrameImage {
    // Taken only in `Drop`
    buffer: Option<FrameBuffer>,
    returns: Sender<FrameBuffer>,
}

impl FrameImage {
    pub fn new(buffer: FrameBuffer, returns: Sender<FrameBuffer>) -> Self {
        Self {
            buffer: Some(buffer),
            returns,
        }
    }

    fn buffer(&self) -> &FrameBuffer {
        self.buffer.as_ref().expect("frame buffer present until drop")
    }

    pub fn raw_buffer(&self) -> &FrameBuffer {
        self.buffer()
    }

    pub fn data_buffer(&self) -> &[u8] {
        &self.buffer().data
    }

    pub fn data_length(&self) -> usize {
        self.buffer().data.len()
    }

    pub fn sequence(&self) -> u64 {
        self.buffer().sequence
    }

    pub fn slot(&self) -> usize {
        self.buffer().slot
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.buffer().width, self.buffer().height)
    }

    pub fn timestamp(&self) -> Duration {
        self.buffer().timestamp
    }
}

impl fmt::Debug for FrameImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let buffer = self.buffer();
        f.debug_struct("FrameImage")
            .field("slot", &buffer.slot)
            .field("sequence", &buffer.sequence)
            .field("len", &buffer.data.len())
            .finish()
    }
}

impl Drop for FrameImage {
    fn drop(&mut self) {
        let Some(buffer) = self.buffer.take() else {
            return;
        };
        let sequence = buffer.sequence;
        if self.returns.send(buffer).is_err() {
            warn!(sequence, "Return queue closed, frame buffer not recycled");
        }
    }
}

#[cfg(test)]
pub(crate) fn test_buffer(sequence: u64, len: usize) -> FrameBuffer {
    FrameBuffer {
        slot: 0,
        sequence,
        data: Bytes::from(vec![sequence as u8; len]),
        width: 4,
        height: 2,
        timestamp: Duration::from_millis(sequence),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn accessors_expose_buffer() {
        let (tx, _rx) = flume::unbounded();
        let image = FrameImage::new(test_buffer(7, 32), tx);
        assert_eq!(image.data_length(), 32);
        assert_eq!(image.data_buffer(), &[7u8; 32][..]);
        assert_eq!(image.sequence(), 7);
        assert_eq!(image.raw_buffer().slot, 0);
        assert_eq!(image.dimensions(), (4, 2));
    }

    #[test]
    fn buffer_returned_once_after_last_owner() {
        let (tx, rx) = flume::unbounded();
        let image = Arc::new(FrameImage::new(test_buffer(1, 8), tx));
        let other = Arc::clone(&image);

        drop(image);
        assert!(rx.try_recv().is_err(), "still owned by `other`");

        drop(other);
        let returned = rx.try_recv().unwrap();
        assert_eq!(returned.sequence, 1);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn clones_read_the_same_buffer_until_the_last_drop() {
        let (tx, rx) = flume::unbounded();
        let image = Arc::new(FrameImage::new(test_buffer(5, 16), tx));
        let owners: Vec<_> = (0..4).map(|_| Arc::clone(&image)).collect();
        drop(image);

        for (i, owner) in owners.into_iter().enumerate() {
            assert_eq!(owner.sequence(), 5);
            assert_eq!(owner.data_buffer(), &[5u8; 16][..]);
            assert_eq!(format!("{owner:?}"), "FrameImage { slot: 0, sequence: 5, len: 16 }");
            let returned = rx.try_recv().ok();
            assert!(returned.is_none(), "returned while owner {i} still alive");
        }

        let returned = rx.try_recv().unwrap();
        assert_eq!(returned.data.len(), 16);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn closed_return_queue_does_not_panic() {
        let (tx, rx) = flume::unbounded();
        drop(rx);
        drop(FrameImage::new(test_buffer(2, 8), tx));
    }

    #[test]
    fn frame_sizes_cover_eleven_resolutions() {
        assert_eq!(FrameSize::ALL.len(), 11);
        assert_eq!(FrameSize::ALL[0].dimensions(), (160, 120));
        assert_eq!(FrameSize::ALL[10].dimensions(), (1600, 1200));
        assert_eq!(FrameSize::Vga.to_string(), "640x480");
    }
}
