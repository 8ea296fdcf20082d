//! Capture configuration and its defaults.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CaptureError, Result};
use crate::traits::{ColorMode, FourCC, PixelFormat};

/// Default requested frame width.
pub const DEFAULT_WIDTH: u32 = 640;
/// Default requested frame height.
pub const DEFAULT_HEIGHT: u32 = 480;
/// Buffers requested from the driver.
pub const DEFAULT_BUFFER_COUNT: u32 = 4;
/// Fewest buffers streaming can work with.
pub const MIN_BUFFER_COUNT: u32 = 2;
/// How long a frame read waits for the device.
pub const DEFAULT_TIMEOUT_MS: u64 = 2000;

/// Settings for one capture session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Requested frame width.
    pub width: u32,
    /// Requested frame height.
    pub height: u32,
    /// Output color space of decoded frames.
    pub color_mode: ColorMode,
    /// Pixel formats to try, most preferred first.
    pub formats: Vec<FourCC>,
    /// Buffers to request.
    pub buffer_count: u32,
    /// Fewest buffers accepted from the driver.
    pub min_buffers: u32,
    /// Frame read timeout in milliseconds.
    pub timeout_ms: u64,
    /// Mirror horizontally when starting.
    pub hflip: bool,
    /// Mirror vertically when starting.
    pub vflip: bool,
    /// Brightness applied when starting, if set.
    pub brightness: Option<i64>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            color_mode: ColorMode::Rgb,
            formats: PixelFormat::ALL.iter().map(|fmt| fmt.fourcc()).collect(),
            buffer_count: DEFAULT_BUFFER_COUNT,
            min_buffers: MIN_BUFFER_COUNT,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            hflip: false,
            vflip: false,
            brightness: None,
        }
    }
}

impl CaptureConfig {
    /// Parse and validate a JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|err| CaptureError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and validate a JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|err| {
            CaptureError::Config(format!("{}: {err}", path.as_ref().display()))
        })?;
        Self::from_json(&text)
    }

    /// Check that the values can drive a session.
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(CaptureError::Config(format!(
                "frame size {}x{} is empty",
                self.width, self.height
            )));
        }
        if self.min_buffers < MIN_BUFFER_COUNT {
            return Err(CaptureError::Config(format!(
                "min_buffers must be at least {MIN_BUFFER_COUNT}"
            )));
        }
        if self.buffer_count < self.min_buffers {
            return Err(CaptureError::Config(format!(
                "buffer_count {} is below min_buffers {}",
                self.buffer_count, self.min_buffers
            )));
        }
        if self.formats.is_empty() {
            return Err(CaptureError::Config("no pixel formats listed".to_owned()));
        }
        Ok(())
    }

    /// Frame read timeout.
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}
