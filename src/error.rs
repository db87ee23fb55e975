//! Error types for the capture pipeline

use std::fmt;

use thiserror::Error;

use crate::pipeline::CameraState;

/// `ESP_FAIL`-style generic failure code.
pub const ERR_FAIL: i32 = -1;
/// Argument rejected by the driver.
pub const ERR_INVALID_ARG: i32 = 0x102;
/// Driver did not produce a buffer in time.
pub const ERR_TIMEOUT: i32 = 0x107;
/// No free buffer left in the hardware pool.
pub const ERR_NO_MEM: i32 = 0x101;

/// Render a driver code: hex for `esp_err_t` values, signed decimal for
/// negative codes such as [`ERR_FAIL`].
pub fn format_code(code: i32) -> String {
    if code < 0 {
        code.to_string()
    } else {
        format!("0x{code:x}")
    }
}

/// Error code reported by a [`FrameSource`](crate::capture::FrameSource).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardwareError {
    pub code: i32,
    pub reason: String,
}

impl fmt::Display for HardwareError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "hardware error {}: {}", format_code(self.code), self.reason)
    }
}

impl std::error::Error for HardwareError {}

impl HardwareError {
    pub fn new(code: i32, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }
}

/// Fatal setup failure. Stored by the camera and reported by `dump_config`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InitError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("hardware init failed: {0}")]
    Hardware(#[from] HardwareError),

    #[error("failed to spawn acquisition task: {0}")]
    Spawn(String),
}

impl InitError {
    /// Numeric code in the driver's error space.
    pub fn code(&self) -> i32 {
        match self {
            InitError::InvalidConfig(_) => ERR_INVALID_ARG,
            InitError::Hardware(e) => e.code,
            InitError::Spawn(_) => ERR_FAIL,
        }
    }
}

#[derive(Debug, Error)]
pub enum CameraError {
    #[error(transparent)]
    Init(#[from] InitError),

    #[error("operation not allowed while camera is {0:?}")]
    InvalidState(CameraState),

    #[error("cannot consume {requested} bytes, only {available} available")]
    OverConsume { requested: usize, available: usize },

    #[error("reader holds no image")]
    NoImage,

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

pub type Result<T, E = CameraError> = std::result::Result<T, E>;
