use crate::capture::FrameBuffer;
use crate::error::HardwareError;
use crate::CameraConfig;

/// Vendor driver for a camera peripheral with a fixed pool of
/// `framebuffer_count` preallocated buffers.
///
/// After a successful `init` the source is moved onto the acquisition task,
/// which is the only caller of `acquire` and `release`.
pub trait FrameSource: Send + 'static {
    /// Apply pin, clock and sensor configuration.
    fn init(&mut self, config: &CameraConfig) -> Result<(), HardwareError>;

    /// Block until the sensor fills a buffer. Latency is set by the
    /// hardware, not by the caller.
    fn acquire(&mut self) -> Result<FrameBuffer, HardwareError>;

    /// Give a buffer back to the pool.
    fn release(&mut self, buffer: FrameBuffer);
}
