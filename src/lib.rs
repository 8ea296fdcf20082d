//! Cam-Capture: a V4L2 camera capture library.
//!
//! A [`Session`] drives one capture device through its lifecycle
//! (open, configure, map, stream, close) over memory-mapped driver buffers
//! and decodes each frame straight into a caller-owned [`Surface`] as RGB,
//! YUV or HSV. Driver access goes through the [`CaptureDriver`] trait so the
//! pipeline can run against real hardware or a mock.

pub mod config;
pub mod control;
pub mod convert;
pub mod device;
pub mod error;
pub mod pool;
pub mod session;
pub mod surface;
pub mod traits;
pub mod validation;

#[cfg(test)]
pub mod mock;

pub use config::CaptureConfig;
pub use control::{device_name, list_devices, CameraControls, ControlId, ControlInfo};
pub use convert::{colorspace, convert};
pub use device::V4l2Driver;
pub use error::{CaptureError, Result};
pub use pool::{BufferPool, RawFrame, SlotState};
pub use session::{RawImage, Session, SessionState};
pub use surface::{Image, PixelLayout, Surface};
pub use traits::{
    CaptureDriver, ColorMode, DeviceCapabilities, Format, FourCC, FrameMetadata,
    NegotiatedFormat, PixelFormat,
};
