//! V4L2 device implementation using the v4l crate.

mod mmap;

use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

use tracing::{debug, info};
use v4l::control::{self, Control, Value};
use v4l::video::Capture;
use v4l::Device;

use crate::control::{ControlId, ControlInfo};
use crate::error::{CaptureError, Result};
use crate::traits::{CaptureDriver, DeviceCapabilities, Format, FourCC, FrameMetadata};

use self::mmap::MappedBuffer;

/// Kernel capture device driven through `/dev/videoN`.
pub struct V4l2Driver {
    device: Device,
    path: String,
    capabilities: DeviceCapabilities,
    buffers: Vec<MappedBuffer>,
}

impl V4l2Driver {
    /// Open a V4L2 device node (e.g., `/dev/video0`) and claim it exclusively.
    pub fn open(path: &str) -> Result<Self> {
        let device =
            Device::with_path(path).map_err(|err| CaptureError::from_open_io(path, &err))?;

        let caps = device
            .query_caps()
            .map_err(|_| CaptureError::NotACaptureDevice(path.to_owned()))?;

        let capabilities = DeviceCapabilities {
            driver: caps.driver,
            card: caps.card,
            bus_info: caps.bus,
            can_capture: caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE),
            can_stream: caps.capabilities.contains(v4l::capability::Flags::STREAMING),
        };
        if !capabilities.can_capture || !capabilities.can_stream {
            return Err(CaptureError::NotACaptureDevice(path.to_owned()));
        }

        mmap::claim_exclusive(device.handle().fd())
            .map_err(|_| CaptureError::DeviceUnavailable(path.to_owned()))?;

        debug!(path, card = %capabilities.card, "opened v4l2 device");
        Ok(Self {
            device,
            path: path.to_owned(),
            capabilities,
            buffers: Vec::new(),
        })
    }

    /// Device node path.
    pub fn path(&self) -> &str {
        &self.path
    }

    fn fd(&self) -> RawFd {
        self.device.handle().fd()
    }

    fn describe(&self, id: ControlId) -> Result<control::Description> {
        self.device
            .query_controls()
            .map_err(CaptureError::from_device_io)?
            .into_iter()
            .find(|desc| desc.id == id.0)
            .ok_or(CaptureError::ControlNotSupported(id))
    }

    fn unmap_all(&mut self) -> io::Result<()> {
        self.buffers.clear();
        mmap::request_buffers(self.fd(), 0).map(|_| ())
    }
}

fn to_format(fmt: &v4l::Format) -> Format {
    Format {
        width: fmt.width,
        height: fmt.height,
        fourcc: FourCC::from(fmt.fourcc),
        stride: fmt.stride,
        size: fmt.size,
    }
}

fn index_u32(index: usize) -> Result<u32> {
    u32::try_from(index).map_err(|_| {
        CaptureError::BufferProtocolViolation(format!("buffer index {index} out of range"))
    })
}

impl CaptureDriver for V4l2Driver {
    fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    fn supported_formats(&self) -> Result<Vec<FourCC>> {
        let formats = self
            .device
            .enum_formats()
            .map_err(CaptureError::from_device_io)?;
        Ok(formats.iter().map(|desc| FourCC::from(desc.fourcc)).collect())
    }

    fn format(&self) -> Result<Format> {
        let fmt = self.device.format().map_err(CaptureError::from_device_io)?;
        Ok(to_format(&fmt))
    }

    fn set_format(&mut self, format: &Format) -> Result<Format> {
        let mut fmt = self.device.format().map_err(CaptureError::from_device_io)?;

        fmt.width = format.width;
        fmt.height = format.height;
        fmt.fourcc = format.fourcc.into();

        let fmt = self
            .device
            .set_format(&fmt)
            .map_err(CaptureError::from_device_io)?;
        Ok(to_format(&fmt))
    }

    fn request_buffers(&mut self, count: u32) -> Result<u32> {
        if !self.buffers.is_empty() {
            return Err(CaptureError::BufferProtocolViolation(
                "buffers are already mapped".to_owned(),
            ));
        }
        let fd = self.fd();
        let granted = mmap::request_buffers(fd, count).map_err(CaptureError::from_device_io)?;

        let mut buffers = Vec::with_capacity(granted as usize);
        for index in 0..granted {
            match mmap::map_buffer(fd, index) {
                Ok(buffer) => buffers.push(buffer),
                Err(source) => {
                    drop(buffers);
                    if let Err(err) = mmap::request_buffers(fd, 0) {
                        debug!(error = %err, "freeing buffers after map failure");
                    }
                    return Err(CaptureError::MapFailed {
                        index: index as usize,
                        source,
                    });
                }
            }
        }

        info!(path = %self.path, requested = count, granted, "mapped driver buffers");
        self.buffers = buffers;
        Ok(granted)
    }

    fn release_buffers(&mut self) -> Result<()> {
        self.unmap_all().map_err(CaptureError::from_device_io)
    }

    fn buffer(&self, index: usize) -> Option<&[u8]> {
        self.buffers.get(index).map(MappedBuffer::as_slice)
    }

    fn queue(&mut self, index: usize) -> Result<()> {
        mmap::queue(self.fd(), index_u32(index)?).map_err(CaptureError::from_device_io)
    }

    fn wait_ready(&mut self, timeout: Duration) -> Result<bool> {
        mmap::poll_readable(self.fd(), timeout).map_err(CaptureError::from_device_io)
    }

    fn dequeue(&mut self) -> Result<FrameMetadata> {
        mmap::dequeue(self.fd()).map_err(CaptureError::from_device_io)
    }

    fn stream_on(&mut self) -> Result<()> {
        mmap::set_streaming(self.fd(), true).map_err(CaptureError::from_device_io)
    }

    fn stream_off(&mut self) -> Result<()> {
        mmap::set_streaming(self.fd(), false).map_err(CaptureError::from_device_io)
    }

    fn control_info(&self, id: ControlId) -> Result<ControlInfo> {
        let desc = self.describe(id)?;
        Ok(ControlInfo {
            minimum: desc.minimum,
            maximum: desc.maximum,
            step: desc.step,
            default: desc.default,
        })
    }

    fn control(&self, id: ControlId) -> Result<i64> {
        let ctrl = self.device.control(id.0).map_err(|err| {
            if err.raw_os_error() == Some(libc::EINVAL) {
                CaptureError::ControlNotSupported(id)
            } else {
                CaptureError::from_device_io(err)
            }
        })?;
        match ctrl.value {
            Value::Integer(value) => Ok(value),
            Value::Boolean(value) => Ok(i64::from(value)),
            _ => Err(CaptureError::ControlNotSupported(id)),
        }
    }

    fn set_control(&mut self, id: ControlId, value: i64) -> Result<()> {
        let desc = self.describe(id)?;
        let ctrl = Control {
            id: id.0,
            value: if matches!(desc.typ, control::Type::Boolean) {
                Value::Boolean(value != 0)
            } else {
                Value::Integer(value)
            },
        };
        self.device
            .set_control(ctrl)
            .map_err(|err| match err.raw_os_error() {
                Some(libc::ERANGE) => CaptureError::ValueOutOfRange {
                    id,
                    value,
                    min: desc.minimum,
                    max: desc.maximum,
                },
                Some(libc::EINVAL) => CaptureError::ControlNotSupported(id),
                _ => CaptureError::from_device_io(err),
            })
    }
}

impl Drop for V4l2Driver {
    fn drop(&mut self) {
        if !self.buffers.is_empty() {
            if let Err(err) = self.unmap_all() {
                debug!(path = %self.path, error = %err, "releasing buffers on drop");
            }
        }
    }
}
