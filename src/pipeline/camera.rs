//! Camera orchestrator: ties the frame source, the acquisition task and the
//! frame subscribers together.
//!
//! The external scheduler calls [`Camera::setup`] once, then
//! [`Camera::update`] on a fixed interval and [`Camera::poll`] on every tick.
//! Both are cheap and never block on the hardware.

use std::sync::Arc;
use std::thread::JoinHandle;

use arc_swap::ArcSwapOption;
use flume::{Receiver, Sender, TryRecvError, TrySendError};
use tracing::{debug, error, info, instrument, warn};

use crate::capture::{FrameBuffer, FrameImage, FrameSource};
use crate::error::{format_code, CameraError, InitError, Result};
use crate::pipeline::callbacks::{CallbackRegistry, SubscriptionId};
use crate::pipeline::stats::{PipelineStats, StatsSnapshot};
use crate::pipeline::task::{AcquisitionTask, TaskChannels};
use crate::CameraConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraState {
    Uninitialized,
    Initializing,
    Running,
    Failed,
}

/// Scheduler-side ends of the pipeline, present only while running.
///
/// Field order is drop order: the ready queue closes first so a task blocked
/// on a full queue wakes up before any frame is pushed onto the return queue.
struct Pipeline {
    ready: Receiver<FrameBuffer>,
    requests: Sender<()>,
    returns: Sender<FrameBuffer>,
    _task: JoinHandle<()>,
}

pub struct Camera {
    config: CameraConfig,
    state: CameraState,
    init_error: Option<InitError>,
    source: Option<Box<dyn FrameSource>>,
    pipeline: Option<Pipeline>,
    current: ArcSwapOption<FrameImage>,
    callbacks: CallbackRegistry<Arc<FrameImage>>,
    stats: Arc<PipelineStats>,
}

impl Camera {
    pub fn new(config: CameraConfig, source: impl FrameSource) -> Self {
        Self {
            config,
            state: CameraState::Uninitialized,
            init_error: None,
            source: Some(Box::new(source)),
            pipeline: None,
            current: ArcSwapOption::empty(),
            callbacks: CallbackRegistry::default(),
            stats: Arc::new(PipelineStats::default()),
        }
    }

    pub fn config(&self) -> &CameraConfig {
        &self.config
    }

    /// Replace the configuration. Only allowed before a successful setup.
    pub fn set_config(&mut self, config: CameraConfig) -> Result<()> {
        match self.state {
            CameraState::Uninitialized | CameraState::Failed => {
                self.config = config;
                Ok(())
            }
            state => Err(CameraError::InvalidState(state)),
        }
    }

    pub fn state(&self) -> CameraState {
        self.state
    }

    pub fn init_error(&self) -> Option<&InitError> {
        self.init_error.as_ref()
    }

    pub fn is_running(&self) -> bool {
        self.state == CameraState::Running
    }

    /// Validate the configuration, initialize the hardware and start the
    /// acquisition task.
    ///
    /// On failure the error is stored, the camera enters
    /// [`CameraState::Failed`] and `update`/`poll` do nothing until a later
    /// `setup` succeeds.
    #[instrument(skip(self), fields(name = %self.config.name))]
    pub fn setup(&mut self) -> Result<()> {
        if self.state == CameraState::Running {
            return Err(CameraError::InvalidState(self.state));
        }

        self.state = CameraState::Initializing;
        match self.start() {
            Ok(pipeline) => {
                self.pipeline = Some(pipeline);
                self.init_error = None;
                self.state = CameraState::Running;
                info!("Camera running");
                Ok(())
            }
            Err(e) => {
                error!("Camera setup failed: {}", e);
                self.init_error = Some(e.clone());
                self.state = CameraState::Failed;
                Err(e.into())
            }
        }
    }

    fn start(&mut self) -> Result<Pipeline, InitError> {
        self.config.validate()?;

        let mut source = self
            .source
            .take()
            .ok_or_else(|| InitError::Spawn("frame source already consumed".into()))?;

        if let Err(e) = source.init(&self.config) {
            self.source = Some(source);
            return Err(e.into());
        }

        let capacity = self.config.queue_capacity();
        let (requests_tx, requests_rx) = flume::bounded(1);
        let (ready_tx, ready_rx) = flume::bounded(capacity);
        let (returns_tx, returns_rx) = flume::bounded(capacity);

        let task = AcquisitionTask::new(
            source,
            TaskChannels {
                requests: requests_rx,
                ready: ready_tx,
                returns: returns_rx,
            },
            usize::from(self.config.framebuffer_count),
            Arc::clone(&self.stats),
        );
        let handle = match task.spawn(self.config.task_core) {
            Ok(handle) => handle,
            Err((e, task)) => {
                // Keep the source so a later setup() can try again
                self.source = Some(task.into_source());
                return Err(InitError::Spawn(e.to_string()));
            }
        };

        debug!(capacity, "Frame queues created");
        Ok(Pipeline {
            ready: ready_rx,
            requests: requests_tx,
            returns: returns_tx,
            _task: handle,
        })
    }

    /// Ask the acquisition task for a new frame. Never waits; requests made
    /// while one is already pending are merged.
    pub fn update(&self) {
        let Some(pipeline) = self.running() else {
            return;
        };
        match pipeline.requests.try_send(()) {
            Ok(()) => {}
            Err(TrySendError::Full(())) => debug!("Frame request already pending"),
            Err(TrySendError::Disconnected(())) => warn!("Acquisition task is gone"),
        }
    }

    /// Deliver at most one newly captured frame.
    ///
    /// Replaces the current frame, then hands a shared reference to every
    /// callback in registration order. Returns `false` if nothing was
    /// waiting.
    pub fn poll(&mut self) -> bool {
        let Some(pipeline) = self.running() else {
            return false;
        };
        let buffer = match pipeline.ready.try_recv() {
            Ok(buffer) => buffer,
            Err(TryRecvError::Empty) => return false,
            Err(TryRecvError::Disconnected) => {
                warn!("Ready queue disconnected");
                return false;
            }
        };

        let image = Arc::new(FrameImage::new(buffer, pipeline.returns.clone()));
        debug!(
            sequence = image.sequence(),
            len = image.data_length(),
            "Delivering frame"
        );

        self.current.store(Some(Arc::clone(&image)));
        self.stats.record_delivered();
        self.callbacks.call(&image);
        true
    }

    fn running(&self) -> Option<&Pipeline> {
        match self.state {
            CameraState::Running => self.pipeline.as_ref(),
            _ => None,
        }
    }

    /// Most recently delivered frame.
    pub fn current_image(&self) -> Option<Arc<FrameImage>> {
        self.current.load_full()
    }

    pub fn add_image_callback<F>(&mut self, callback: F) -> SubscriptionId
    where
        F: FnMut(Arc<FrameImage>) + Send + 'static,
    {
        self.callbacks.add(callback)
    }

    pub fn remove_image_callback(&mut self, id: SubscriptionId) -> bool {
        self.callbacks.remove(id)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn dump_config(&self) {
        let c = &self.config;
        let (width, height) = c.frame_size.dimensions();
        info!("ESP32 Camera '{}':", c.name);
        info!(
            "  Data pins: D0:{} D1:{} D2:{} D3:{} D4:{} D5:{} D6:{} D7:{}",
            c.pins.data[0],
            c.pins.data[1],
            c.pins.data[2],
            c.pins.data[3],
            c.pins.data[4],
            c.pins.data[5],
            c.pins.data[6],
            c.pins.data[7]
        );
        info!("  VSYNC pin: {}", c.pins.vsync);
        info!("  HREF pin: {}", c.pins.href);
        info!("  Pixel clock pin: {}", c.pins.pixel_clock);
        info!(
            "  External clock: pin {} @ {} Hz",
            c.pins.external_clock, c.pins.external_clock_frequency
        );
        info!("  I2C pins: SDA:{} SCL:{}", c.pins.i2c_sda, c.pins.i2c_scl);
        info!("  Reset pin: {:?}", c.pins.reset);
        info!("  Power down pin: {:?}", c.pins.power_down);
        info!("  Resolution: {}x{} ({:?})", width, height, c.frame_size);
        info!("  JPEG quality: {}", c.jpeg_quality);
        info!("  Framebuffer count: {}", c.framebuffer_count);
        info!(
            "  Vertical flip: {}, horizontal mirror: {}",
            c.image.vertical_flip, c.image.horizontal_mirror
        );
        info!(
            "  Contrast: {}, brightness: {}, saturation: {}",
            c.image.contrast, c.image.brightness, c.image.saturation
        );
        info!("  State: {:?}", self.state);

        if let Some(e) = &self.init_error {
            error!("  Setup failed with code {}: {}", format_code(e.code()), e);
        }
    }
}

impl std::fmt::Debug for Camera {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Camera")
            .field("name", &self.config.name)
            .field("state", &self.state)
            .field("callbacks", &self.callbacks)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    use super::*;
    use crate::capture::SimulatedSource;
    use crate::error::HardwareError;

    fn poll_until_frame(camera: &mut Camera) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if camera.poll() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        false
    }

    fn fast_source() -> SimulatedSource {
        SimulatedSource::new().with_frame_interval(Duration::from_millis(1))
    }

    #[test]
    fn calls_before_setup_are_noops() {
        let mut camera = Camera::new(CameraConfig::default(), fast_source());
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        camera.add_image_callback(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        camera.update();
        assert!(!camera.poll());
        assert_eq!(camera.state(), CameraState::Uninitialized);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn update_then_poll_delivers_current_frame() {
        let mut camera = Camera::new(CameraConfig::default(), fast_source());
        camera.setup().unwrap();
        assert!(camera.is_running());
        assert!(camera.current_image().is_none());

        camera.update();
        assert!(poll_until_frame(&mut camera));
        let current = camera.current_image().unwrap();
        assert_eq!(current.sequence(), 1);
        assert_eq!(current.dimensions(), (640, 480));
        assert_eq!(camera.stats().frames_delivered, 1);
    }

    #[test]
    fn hardware_init_failure_is_stored() {
        let source = fast_source().with_init_error(HardwareError::new(0x105, "sensor not found"));
        let mut camera = Camera::new(CameraConfig::default(), source);

        let err = camera.setup().unwrap_err();
        assert!(matches!(err, CameraError::Init(InitError::Hardware(_))));
        assert_eq!(camera.state(), CameraState::Failed);
        assert_eq!(camera.init_error().map(InitError::code), Some(0x105));
        camera.dump_config();
    }

    #[test]
    fn setup_twice_while_running_is_rejected() {
        let mut camera = Camera::new(CameraConfig::default(), fast_source());
        camera.setup().unwrap();
        assert!(matches!(
            camera.setup(),
            Err(CameraError::InvalidState(CameraState::Running))
        ));
        assert!(camera.set_config(CameraConfig::default()).is_err());
    }

    #[test]
    fn setup_retry_after_invalid_config() {
        let mut bad = CameraConfig::default();
        bad.jpeg_quality = 0;
        let mut camera = Camera::new(bad, fast_source());
        assert!(camera.setup().is_err());
        assert_eq!(camera.state(), CameraState::Failed);

        camera.set_config(CameraConfig::default()).unwrap();
        camera.setup().unwrap();
        assert!(camera.is_running());
        assert!(camera.init_error().is_none());
    }
}
