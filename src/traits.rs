//! Core traits and types for the capture pipeline.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::control::{ControlId, ControlInfo};
use crate::error::{CaptureError, Result};

/// Pixel format code as used by the kernel (e.g., YUYV, RGB3, BA81).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    /// Create a new `FourCC` from a 4-byte array.
    #[must_use]
    pub const fn new(code: &[u8; 4]) -> Self {
        Self(*code)
    }

    /// YUYV pixel format (4:2:2 packed, Y0 U Y1 V).
    pub const YUYV: Self = Self::new(b"YUYV");
    /// UYVY pixel format (4:2:2 packed, U Y0 V Y1).
    pub const UYVY: Self = Self::new(b"UYVY");
    /// RGB3 pixel format (24-bit RGB).
    pub const RGB3: Self = Self::new(b"RGB3");
    /// XR24 pixel format (32-bit B G R X).
    pub const XR24: Self = Self::new(b"XR24");
    /// R444 pixel format (16-bit xxxxrrrr ggggbbbb).
    pub const R444: Self = Self::new(b"R444");
    /// BA81 pixel format (8-bit Bayer BGGR).
    pub const BA81: Self = Self::new(b"BA81");
    /// YU12 pixel format (planar YUV 4:2:0).
    pub const YU12: Self = Self::new(b"YU12");
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

impl FromStr for FourCC {
    type Err = CaptureError;

    fn from_str(s: &str) -> Result<Self> {
        let bytes: [u8; 4] = s
            .as_bytes()
            .try_into()
            .map_err(|_| CaptureError::Config(format!("FourCC must be 4 bytes, got {s:?}")))?;
        if !bytes.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
            return Err(CaptureError::Config(format!("FourCC {s:?} is not printable")));
        }
        Ok(Self(bytes))
    }
}

impl TryFrom<String> for FourCC {
    type Error = CaptureError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<FourCC> for String {
    fn from(fourcc: FourCC) -> Self {
        fourcc.to_string()
    }
}

impl From<v4l::FourCC> for FourCC {
    fn from(fourcc: v4l::FourCC) -> Self {
        Self(fourcc.repr)
    }
}

impl From<FourCC> for v4l::FourCC {
    fn from(fourcc: FourCC) -> Self {
        Self::new(&fourcc.0)
    }
}

/// Source pixel encodings the converter understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// Packed 4:2:2, Y0 U Y1 V.
    Yuyv,
    /// Packed 4:2:2, U Y0 V Y1.
    Uyvy,
    /// 24-bit R G B.
    Rgb24,
    /// 32-bit B G R X.
    Xbgr32,
    /// 16-bit little-endian xxxxrrrr ggggbbbb.
    Rgb444,
    /// 8-bit Bayer mosaic, BGGR tile order.
    Sbggr8,
    /// Planar 4:2:0: Y plane, then U plane, then V plane.
    Yuv420,
}

impl PixelFormat {
    /// Every supported encoding.
    pub const ALL: [Self; 7] = [
        Self::Rgb24,
        Self::Rgb444,
        Self::Xbgr32,
        Self::Yuyv,
        Self::Uyvy,
        Self::Sbggr8,
        Self::Yuv420,
    ];

    /// Kernel code for this encoding.
    #[must_use]
    pub const fn fourcc(self) -> FourCC {
        match self {
            Self::Yuyv => FourCC::YUYV,
            Self::Uyvy => FourCC::UYVY,
            Self::Rgb24 => FourCC::RGB3,
            Self::Xbgr32 => FourCC::XR24,
            Self::Rgb444 => FourCC::R444,
            Self::Sbggr8 => FourCC::BA81,
            Self::Yuv420 => FourCC::YU12,
        }
    }

    /// Look up the encoding for a kernel code.
    #[must_use]
    pub fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        Self::ALL.into_iter().find(|fmt| fmt.fourcc() == fourcc)
    }

    /// Whether samples are luma/chroma rather than RGB.
    #[must_use]
    pub const fn is_luma_chroma(self) -> bool {
        matches!(self, Self::Yuyv | Self::Uyvy | Self::Yuv420)
    }

    /// Minimum number of bytes a `width` x `height` frame occupies.
    #[must_use]
    pub const fn frame_size(self, width: u32, height: u32) -> usize {
        let pixels = width as usize * height as usize;
        match self {
            Self::Yuyv | Self::Uyvy | Self::Rgb444 => pixels * 2,
            Self::Rgb24 => pixels * 3,
            Self::Xbgr32 => pixels * 4,
            Self::Sbggr8 => pixels,
            Self::Yuv420 => {
                let chroma = (width as usize).div_ceil(2) * (height as usize).div_ceil(2);
                pixels + 2 * chroma
            }
        }
    }

    /// Bytes per line for packed encodings, luma bytes per line for planar ones.
    #[must_use]
    pub const fn stride(self, width: u32) -> u32 {
        match self {
            Self::Yuyv | Self::Uyvy | Self::Rgb444 => width * 2,
            Self::Rgb24 => width * 3,
            Self::Xbgr32 => width * 4,
            Self::Sbggr8 | Self::Yuv420 => width,
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fourcc().fmt(f)
    }
}

/// Requested output color space of decoded frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ColorMode {
    /// Red, green, blue.
    #[default]
    #[serde(alias = "rgb")]
    Rgb,
    /// Luma and two chroma differences, written into the R, G, B slots.
    #[serde(alias = "yuv")]
    Yuv,
    /// Hue, saturation, value, written into the R, G, B slots.
    #[serde(alias = "hsv")]
    Hsv,
}

impl ColorMode {
    /// Flag value used by bindings.
    #[must_use]
    pub const fn bits(self) -> u32 {
        match self {
            Self::Rgb => 1,
            Self::Yuv => 2,
            Self::Hsv => 4,
        }
    }

    /// Decode a flag value; exactly one known flag must be set.
    #[must_use]
    pub const fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            1 => Some(Self::Rgb),
            2 => Some(Self::Yuv),
            4 => Some(Self::Hsv),
            _ => None,
        }
    }
}

impl fmt::Display for ColorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Rgb => "RGB",
            Self::Yuv => "YUV",
            Self::Hsv => "HSV",
        })
    }
}

impl FromStr for ColorMode {
    type Err = CaptureError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "RGB" => Ok(Self::Rgb),
            "YUV" => Ok(Self::Yuv),
            "HSV" => Ok(Self::Hsv),
            _ => Err(CaptureError::Config(format!("unknown color mode {s:?}"))),
        }
    }
}

/// Video format as reported by a driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Format {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel format.
    pub fourcc: FourCC,
    /// Bytes per line (stride).
    pub stride: u32,
    /// Total frame size in bytes.
    pub size: u32,
}

impl Format {
    /// Create a new format specification, deriving stride and size for known encodings.
    #[must_use]
    pub fn new(width: u32, height: u32, fourcc: FourCC) -> Self {
        let (stride, size) = PixelFormat::from_fourcc(fourcc).map_or((0, 0), |fmt| {
            let size = u32::try_from(fmt.frame_size(width, height)).unwrap_or(u32::MAX);
            (fmt.stride(width), size)
        });
        Self {
            width,
            height,
            fourcc,
            stride,
            size,
        }
    }
}

/// The width/height/encoding a session actually streams with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiatedFormat {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Source encoding.
    pub pixel_format: PixelFormat,
    /// Bytes per line.
    pub stride: u32,
    /// Bytes per frame as reported by the driver.
    pub size: u32,
}

/// Device capability flags.
#[derive(Debug, Clone, Default)]
pub struct DeviceCapabilities {
    /// Driver name.
    pub driver: String,
    /// Card/device name.
    pub card: String,
    /// Bus information.
    pub bus_info: String,
    /// Whether the device can capture video.
    pub can_capture: bool,
    /// Whether the device supports streaming.
    pub can_stream: bool,
}

/// Metadata of a dequeued buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameMetadata {
    /// Driver buffer index.
    pub index: usize,
    /// Frame sequence number.
    pub sequence: u32,
    /// Capture timestamp.
    pub timestamp: Duration,
    /// Actual bytes used in the frame buffer.
    pub bytes_used: u32,
}

/// Abstraction over the kernel side of a capture device.
///
/// Buffer indices are the driver's own; the session keeps track of who owns
/// each one and never calls [`buffer`](Self::buffer) on a queued index.
pub trait CaptureDriver {
    /// Get device capabilities.
    fn capabilities(&self) -> &DeviceCapabilities;

    /// Pixel formats the device can produce, in the driver's order.
    fn supported_formats(&self) -> Result<Vec<FourCC>>;

    /// Current format.
    fn format(&self) -> Result<Format>;

    /// Set capture format. Returns the actual format chosen by the driver.
    fn set_format(&mut self, format: &Format) -> Result<Format>;

    /// Ask for `count` buffers and map each one. Returns the number granted.
    fn request_buffers(&mut self, count: u32) -> Result<u32>;

    /// Unmap every buffer and return them to the driver.
    fn release_buffers(&mut self) -> Result<()>;

    /// Contents of a mapped buffer.
    fn buffer(&self, index: usize) -> Option<&[u8]>;

    /// Hand a buffer to the driver for filling.
    fn queue(&mut self, index: usize) -> Result<()>;

    /// Wait until a filled buffer can be dequeued. `Ok(false)` on timeout.
    fn wait_ready(&mut self, timeout: Duration) -> Result<bool>;

    /// Take one filled buffer back from the driver.
    fn dequeue(&mut self) -> Result<FrameMetadata>;

    /// Start streaming.
    fn stream_on(&mut self) -> Result<()>;

    /// Stop streaming; the driver drops all queued buffers.
    fn stream_off(&mut self) -> Result<()>;

    /// Range of a control, or `ControlNotSupported`.
    fn control_info(&self, id: ControlId) -> Result<ControlInfo>;

    /// Current value of a control.
    fn control(&self, id: ControlId) -> Result<i64>;

    /// Set a control value.
    fn set_control(&mut self, id: ControlId, value: i64) -> Result<()>;
}
