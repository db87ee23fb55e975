pub mod capture;
pub mod error;
pub mod pipeline;
pub mod utils;

use std::collections::HashSet;
use std::path::Path;

use capture::frame::FrameSize;
use serde::{Deserialize, Serialize};

pub use capture::{FrameBuffer, FrameImage, FrameReader, FrameSource};
pub use error::{CameraError, HardwareError, InitError, Result};
pub use pipeline::{Camera, CameraState, SubscriptionId};

/// Highest GPIO number on the target SoC.
pub const MAX_GPIO: u8 = 39;
/// GPIOs at or above this number are input-only.
pub const FIRST_INPUT_ONLY_GPIO: u8 = 34;
pub const MAX_FRAMEBUFFERS: u8 = 8;

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub camera: CameraConfig,
    pub scheduler: SchedulerConfig,
    pub stream: StreamConfig,
}

impl Config {
    /// Layer serialized defaults, an optional TOML file and `FRAMEPOOL__*`
    /// environment variables, in that order.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Config::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix("FRAMEPOOL")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}

/// Camera peripheral configuration. Applied once by `Camera::setup`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraConfig {
    pub name: String,
    pub pins: PinConfig,
    pub frame_size: FrameSize,
    pub jpeg_quality: u8,
    pub framebuffer_count: u8,
    pub image: ImageSettings,
    /// Pin the acquisition task to this CPU core
    pub task_core: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinConfig {
    pub data: [u8; 8],
    pub vsync: u8,
    pub href: u8,
    pub pixel_clock: u8,
    pub external_clock: u8,
    pub external_clock_frequency: u32,
    pub i2c_sda: u8,
    pub i2c_scl: u8,
    pub reset: Option<u8>,
    pub power_down: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSettings {
    pub vertical_flip: bool,
    pub horizontal_mirror: bool,
    pub contrast: i8,
    pub brightness: i8,
    pub saturation: i8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub update_interval_ms: u64,
    pub loop_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    pub chunk_size: usize,
}

impl Default for CameraConfig {
    fn default() -> Self {
        // AI-Thinker ESP32-CAM wiring
        Self {
            name: "camera".into(),
            pins: PinConfig {
                data: [5, 18, 19, 21, 36, 39, 34, 35],
                vsync: 25,
                href: 23,
                pixel_clock: 22,
                external_clock: 0,
                external_clock_frequency: 20_000_000,
                i2c_sda: 26,
                i2c_scl: 27,
                reset: None,
                power_down: Some(32),
            },
            frame_size: FrameSize::Vga,
            jpeg_quality: 10,
            framebuffer_count: 2,
            image: ImageSettings {
                vertical_flip: true,
                horizontal_mirror: true,
                contrast: 0,
                brightness: 0,
                saturation: 0,
            },
            task_core: None,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            update_interval_ms: 1000,
            loop_interval_ms: 16,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self { chunk_size: 1024 }
    }
}

impl CameraConfig {
    /// Capacity of both the ready and the return queue.
    pub fn queue_capacity(&self) -> usize {
        usize::from(self.framebuffer_count.saturating_sub(1)).max(1)
    }

    pub fn validate(&self) -> Result<(), InitError> {
        let invalid = |msg: String| Err(InitError::InvalidConfig(msg));
        let pins = &self.pins;

        let mut assigned: Vec<(&str, u8)> = pins.data.iter().map(|&p| ("data", p)).collect();
        assigned.extend([
            ("vsync", pins.vsync),
            ("href", pins.href),
            ("pixel_clock", pins.pixel_clock),
            ("external_clock", pins.external_clock),
            ("i2c_sda", pins.i2c_sda),
            ("i2c_scl", pins.i2c_scl),
        ]);
        assigned.extend(pins.reset.map(|p| ("reset", p)));
        assigned.extend(pins.power_down.map(|p| ("power_down", p)));

        let mut seen = HashSet::new();
        for &(role, pin) in &assigned {
            if pin > MAX_GPIO {
                return invalid(format!("{role} pin GPIO{pin} does not exist"));
            }
            if !seen.insert(pin) {
                return invalid(format!("GPIO{pin} assigned more than once ({role})"));
            }
        }

        let outputs = [
            ("external_clock", Some(pins.external_clock)),
            ("i2c_sda", Some(pins.i2c_sda)),
            ("i2c_scl", Some(pins.i2c_scl)),
            ("reset", pins.reset),
            ("power_down", pins.power_down),
        ];
        for (role, pin) in outputs {
            if let Some(pin) = pin.filter(|&p| p >= FIRST_INPUT_ONLY_GPIO) {
                return invalid(format!("{role} needs an output pin, GPIO{pin} is input-only"));
            }
        }

        if !(10_000_000..=20_000_000).contains(&pins.external_clock_frequency) {
            return invalid(format!(
                "external clock frequency {} Hz outside 10-20 MHz",
                pins.external_clock_frequency
            ));
        }
        if !(10..=63).contains(&self.jpeg_quality) {
            return invalid(format!("jpeg quality {} outside 10..=63", self.jpeg_quality));
        }
        if !(1..=MAX_FRAMEBUFFERS).contains(&self.framebuffer_count) {
            return invalid(format!(
                "framebuffer count {} outside 1..={MAX_FRAMEBUFFERS}",
                self.framebuffer_count
            ));
        }
        for (name, value) in [
            ("contrast", self.image.contrast),
            ("brightness", self.image.brightness),
            ("saturation", self.image.saturation),
        ] {
            if !(-2..=2).contains(&value) {
                return invalid(format!("{name} {value} outside -2..=2"));
            }
        }

        Ok(())
    }
}
