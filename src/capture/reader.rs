//! Sequential cursor over a shared frame, for chunked streaming

use std::io;
use std::sync::Arc;

use crate::capture::FrameImage;
use crate::error::{CameraError, Result};

/// Holds at most one frame and a byte offset into it.
///
/// Over-consuming is a caller bug and fails with
/// [`CameraError::OverConsume`]; the offset is never clamped.
#[derive(Debug, Default)]
pub struct FrameReader {
    image: Option<Arc<FrameImage>>,
    offset: usize,
}

impl FrameReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the held frame and rewind to its start.
    pub fn set_image(&mut self, image: Arc<FrameImage>) {
        self.image = Some(image);
        self.offset = 0;
    }

    pub fn available(&self) -> usize {
        self.image
            .as_ref()
            .map_or(0, |image| image.data_length() - self.offset)
    }

    /// Unconsumed bytes from the current offset on.
    pub fn peek_data_buffer(&self) -> Result<&[u8]> {
        let image = self.image.as_ref().ok_or(CameraError::NoImage)?;
        Ok(&image.data_buffer()[self.offset..])
    }

    pub fn consume_data(&mut self, consumed: usize) -> Result<()> {
        let available = self.available();
        if consumed > available {
            return Err(CameraError::OverConsume {
                requested: consumed,
                available,
            });
        }
        self.offset += consumed;
        Ok(())
    }

    /// Drop the held frame, consumed or not.
    pub fn return_image(&mut self) {
        self.image = None;
        self.offset = 0;
    }

    pub fn has_image(&self) -> bool {
        self.image.is_some()
    }

    pub fn image(&self) -> Option<&Arc<FrameImage>> {
        self.image.as_ref()
    }

    pub fn offset(&self) -> usize {
        self.offset
    }
}

/// Reading past the end yields `Ok(0)`; the frame stays held until
/// `return_image` or `set_image`.
impl io::Read for FrameReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = match self.peek_data_buffer() {
            Ok(data) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                n
            }
            Err(_) => return Ok(0),
        };
        self.consume_data(n).map_err(io::Error::other)?;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use super::*;
    use crate::capture::frame::test_buffer;

    fn image(len: usize) -> (Arc<FrameImage>, flume::Receiver<crate::FrameBuffer>) {
        let (tx, rx) = flume::unbounded();
        (Arc::new(FrameImage::new(test_buffer(3, len), tx)), rx)
    }

    #[test]
    fn empty_reader() {
        let reader = FrameReader::new();
        assert_eq!(reader.available(), 0);
        assert!(matches!(
            reader.peek_data_buffer(),
            Err(CameraError::NoImage)
        ));
    }

    #[test]
    fn consume_whole_image() {
        let (image, _rx) = image(100);
        let mut reader = FrameReader::new();
        reader.set_image(image);
        assert_eq!(reader.available(), 100);

        reader.consume_data(40).unwrap();
        assert_eq!(reader.available(), 60);
        assert_eq!(reader.peek_data_buffer().unwrap().len(), 60);

        reader.consume_data(60).unwrap();
        assert_eq!(reader.available(), 0);
        assert!(reader.peek_data_buffer().unwrap().is_empty());
    }

    #[test]
    fn over_consume_fails_without_moving_offset() {
        let (image, _rx) = image(10);
        let mut reader = FrameReader::new();
        reader.set_image(image);
        reader.consume_data(4).unwrap();

        let err = reader.consume_data(7).unwrap_err();
        assert!(matches!(
            err,
            CameraError::OverConsume {
                requested: 7,
                available: 6
            }
        ));
        assert_eq!(reader.offset(), 4);
        assert_eq!(reader.available(), 6);
    }

    #[test]
    fn return_image_releases_buffer() {
        let (image, rx) = image(10);
        let mut reader = FrameReader::new();
        reader.set_image(image);
        reader.consume_data(3).unwrap();

        reader.return_image();
        assert_eq!(reader.available(), 0);
        assert!(matches!(
            reader.peek_data_buffer(),
            Err(CameraError::NoImage)
        ));
        assert_eq!(rx.try_recv().unwrap().sequence, 3);
    }

    #[test]
    fn set_image_replaces_and_rewinds() {
        let (first, first_rx) = image(10);
        let (second, _second_rx) = image(20);
        let mut reader = FrameReader::new();
        reader.set_image(first);
        reader.consume_data(5).unwrap();

        reader.set_image(second);
        assert_eq!(reader.offset(), 0);
        assert_eq!(reader.available(), 20);
        assert!(first_rx.try_recv().is_ok(), "prior frame released");
    }

    #[test]
    fn io_read_streams_in_chunks() {
        let (image, _rx) = image(10);
        let mut reader = FrameReader::new();
        reader.set_image(image);

        let mut chunk = [0u8; 4];
        let mut total = 0;
        loop {
            let n = reader.read(&mut chunk).unwrap();
            if n == 0 {
                break;
            }
            total += n;
        }
        assert_eq!(total, 10);
        assert!(reader.has_image());
    }
}
