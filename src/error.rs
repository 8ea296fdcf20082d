//! Error type shared by every layer of the capture pipeline.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::control::ControlId;
use crate::session::SessionState;
use crate::traits::FourCC;

/// Error type for camera operations.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The device node does not exist or is held exclusively by someone else.
    #[error("device {0} is unavailable")]
    DeviceUnavailable(String),
    /// The process may not open the device node.
    #[error("permission denied opening {0}")]
    PermissionDenied(String),
    /// The device exists but cannot stream video capture.
    #[error("{0} is not a streaming video capture device")]
    NotACaptureDevice(String),
    /// None of the requested pixel formats could be negotiated.
    #[error("no supported pixel format among {requested:?}")]
    UnsupportedFormat {
        /// Formats that were asked for, in preference order.
        requested: Vec<FourCC>,
    },
    /// The driver granted fewer buffers than the pipeline needs.
    #[error("driver granted {granted} buffers, at least {required} required")]
    InsufficientBuffers {
        /// Buffers granted by the driver.
        granted: u32,
        /// Minimum usable count.
        required: u32,
    },
    /// Mapping a driver buffer into the process failed.
    #[error("failed to map buffer {index}: {source}")]
    MapFailed {
        /// Driver buffer index.
        index: usize,
        /// Underlying OS error.
        source: io::Error,
    },
    /// The device refused the request because it is in use.
    #[error("device is busy")]
    DeviceBusy,
    /// No completed buffer was available without blocking.
    #[error("no frame ready")]
    WouldBlock,
    /// No frame arrived within the read timeout.
    #[error("no frame within {0:?}")]
    CaptureTimeout(Duration),
    /// The device went away while in use.
    #[error("device disconnected")]
    DeviceDisconnected,
    /// The device does not expose the requested control.
    #[error("control {0} is not supported")]
    ControlNotSupported(ControlId),
    /// The control value lies outside the range reported by the device.
    #[error("value {value} for control {id} outside [{min}, {max}]")]
    ValueOutOfRange {
        /// Control being set.
        id: ControlId,
        /// Rejected value.
        value: i64,
        /// Smallest accepted value.
        min: i64,
        /// Largest accepted value.
        max: i64,
    },
    /// A buffer slot was moved through an illegal ownership transition.
    #[error("buffer protocol violation: {0}")]
    BufferProtocolViolation(String),
    /// The operation is not valid in the session's current state.
    #[error("{operation} is not allowed while {state}")]
    InvalidState {
        /// Name of the rejected operation.
        operation: &'static str,
        /// State the session was in.
        state: SessionState,
    },
    /// A frame was requested from a session that is not streaming.
    #[error("session is not streaming")]
    NotStreaming,
    /// The destination surface does not match the frame geometry.
    #[error("surface is {actual_width}x{actual_height} ({actual_len} bytes), frame needs {width}x{height} ({expected_len} bytes)")]
    SurfaceMismatch {
        /// Frame width.
        width: u32,
        /// Frame height.
        height: u32,
        /// Bytes the surface must hold.
        expected_len: usize,
        /// Surface width.
        actual_width: u32,
        /// Surface height.
        actual_height: u32,
        /// Bytes the surface holds.
        actual_len: usize,
    },
    /// The captured buffer is shorter than its pixel format requires.
    #[error("frame holds {actual} bytes, {expected} required")]
    TruncatedFrame {
        /// Bytes required by the format.
        expected: usize,
        /// Bytes actually delivered.
        actual: usize,
    },
    /// A captured frame does not show the expected test pattern.
    #[error("pattern mismatch: {0}")]
    PatternMismatch(String),
    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// Unclassified I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl CaptureError {
    /// Classify an error returned by the kernel while the device is in use.
    pub(crate) fn from_device_io(err: io::Error) -> Self {
        match err.raw_os_error() {
            Some(libc::ENODEV | libc::ENXIO | libc::EIO) => Self::DeviceDisconnected,
            Some(libc::EBUSY) => Self::DeviceBusy,
            _ if err.kind() == io::ErrorKind::WouldBlock => Self::WouldBlock,
            _ => Self::Io(err),
        }
    }

    /// Classify an error returned while opening a device node.
    pub(crate) fn from_open_io(path: &str, err: &io::Error) -> Self {
        match err.raw_os_error() {
            Some(libc::EACCES | libc::EPERM) => Self::PermissionDenied(path.to_owned()),
            _ => Self::DeviceUnavailable(path.to_owned()),
        }
    }

    /// Whether the caller may simply retry the same call.
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::CaptureTimeout(_) | Self::WouldBlock)
    }

    /// Whether the session must be closed after this error.
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::DeviceDisconnected | Self::BufferProtocolViolation(_)
        )
    }
}

/// Result type for camera operations.
pub type Result<T> = std::result::Result<T, CaptureError>;
