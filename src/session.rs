//! Device session: lifecycle state machine and frame reader.

use std::fmt;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::CaptureConfig;
use crate::control::{CameraControls, ControlId};
use crate::convert;
use crate::device::V4l2Driver;
use crate::error::{CaptureError, Result};
use crate::pool::{BufferPool, RawFrame};
use crate::surface::Surface;
use crate::traits::{
    CaptureDriver, ColorMode, DeviceCapabilities, FourCC, Format, NegotiatedFormat, PixelFormat,
};

/// Lifecycle state of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No device handle.
    Closed,
    /// Handle open, no format negotiated.
    Opened,
    /// Format negotiated, no buffers.
    Configured,
    /// Buffers mapped, not streaming.
    MemoryMapped,
    /// Streaming frames.
    Streaming,
    /// A terminal error occurred; only `close` is allowed.
    Faulted,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Closed => "closed",
            Self::Opened => "opened",
            Self::Configured => "configured",
            Self::MemoryMapped => "memory-mapped",
            Self::Streaming => "streaming",
            Self::Faulted => "faulted",
        })
    }
}

/// Undecoded frame bytes together with their geometry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawImage {
    /// Frame bytes as delivered by the driver.
    pub bytes: Vec<u8>,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
}

/// One open capture device.
///
/// All operations take `&mut self`; callers sharing a session across
/// threads must serialize access themselves.
pub struct Session<D: CaptureDriver = V4l2Driver> {
    identifier: String,
    driver: Option<D>,
    state: SessionState,
    config: CaptureConfig,
    format: Option<NegotiatedFormat>,
    pool: BufferPool,
    controls: CameraControls,
}

impl Session<V4l2Driver> {
    /// Open a V4L2 device node (e.g. `/dev/video0`) with default settings.
    pub fn open(identifier: &str) -> Result<Self> {
        Self::open_with_config(identifier, CaptureConfig::default())
    }

    /// Open a V4L2 device node with the given settings.
    pub fn open_with_config(identifier: &str, config: CaptureConfig) -> Result<Self> {
        config.validate()?;
        let driver = V4l2Driver::open(identifier)?;
        Self::from_driver(identifier, driver, config)
    }
}

impl<D: CaptureDriver> Session<D> {
    /// Wrap an already opened driver.
    ///
    /// Fails with `NotACaptureDevice` when the driver cannot stream video
    /// capture; the driver is dropped in that case.
    pub fn from_driver(identifier: &str, driver: D, config: CaptureConfig) -> Result<Self> {
        config.validate()?;
        let caps = driver.capabilities();
        if !caps.can_capture || !caps.can_stream {
            return Err(CaptureError::NotACaptureDevice(identifier.to_owned()));
        }
        info!(
            device = identifier,
            driver = %caps.driver,
            card = %caps.card,
            "opened capture device"
        );
        Ok(Self {
            identifier: identifier.to_owned(),
            driver: Some(driver),
            state: SessionState::Opened,
            config,
            format: None,
            pool: BufferPool::default(),
            controls: CameraControls::default(),
        })
    }

    /// Device identifier the session was opened with.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Current lifecycle state.
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Capabilities of the open device.
    pub fn capabilities(&self) -> Option<&DeviceCapabilities> {
        self.driver.as_ref().map(CaptureDriver::capabilities)
    }

    /// Format negotiated by the last successful `configure`.
    pub const fn format(&self) -> Option<NegotiatedFormat> {
        self.format
    }

    /// Active settings.
    pub const fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Output color mode used by [`get_image`](Self::get_image).
    pub const fn color_mode(&self) -> ColorMode {
        self.config.color_mode
    }

    /// Change the output color mode; takes effect on the next frame.
    pub fn set_color_mode(&mut self, mode: ColorMode) {
        self.config.color_mode = mode;
    }

    /// Last known flip and brightness values.
    pub const fn controls(&self) -> CameraControls {
        self.controls
    }

    /// Buffer ownership bookkeeping.
    pub const fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// The underlying driver, while open.
    pub const fn driver(&self) -> Option<&D> {
        self.driver.as_ref()
    }

    /// The underlying driver, mutably, while open.
    pub fn driver_mut(&mut self) -> Option<&mut D> {
        self.driver.as_mut()
    }

    /// Frame size: negotiated once configured, requested before.
    pub fn size(&self) -> (u32, u32) {
        self.format.map_or((self.config.width, self.config.height), |fmt| {
            (fmt.width, fmt.height)
        })
    }

    /// Change the requested frame size. Only allowed before buffers are
    /// mapped; a configured session drops back to `Opened`.
    pub fn set_size(&mut self, width: u32, height: u32) -> Result<()> {
        self.require("set_size", &[SessionState::Opened, SessionState::Configured])?;
        if width == 0 || height == 0 {
            return Err(CaptureError::Config(format!(
                "frame size {width}x{height} is empty"
            )));
        }
        self.config.width = width;
        self.config.height = height;
        if self.state == SessionState::Configured {
            self.format = None;
            self.state = SessionState::Opened;
        }
        Ok(())
    }

    fn require(&self, operation: &'static str, allowed: &[SessionState]) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(CaptureError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    fn open_driver(&mut self, operation: &'static str) -> Result<&mut D> {
        let state = self.state;
        match (state, self.driver.as_mut()) {
            (SessionState::Closed | SessionState::Faulted, _) | (_, None) => {
                Err(CaptureError::InvalidState { operation, state })
            }
            (_, Some(driver)) => Ok(driver),
        }
    }

    /// Record a terminal error and pass it on.
    fn fault(&mut self, err: CaptureError) -> CaptureError {
        if err.is_terminal() {
            warn!(device = %self.identifier, error = %err, "session faulted");
            self.state = SessionState::Faulted;
        }
        err
    }

    /// Negotiate a format, trying `formats` in order.
    ///
    /// The driver may adjust the size; the returned values are canonical and
    /// destination surfaces must match them. On failure the device is put
    /// back on the previously negotiated format, or the session drops back
    /// to `Opened` when that is not possible.
    pub fn configure(
        &mut self,
        width: u32,
        height: u32,
        formats: &[FourCC],
    ) -> Result<NegotiatedFormat> {
        self.require("configure", &[SessionState::Opened, SessionState::Configured])?;
        let previous = self.format;
        let mut touched = false;
        match self.negotiate(width, height, formats, &mut touched) {
            Ok(negotiated) => {
                self.config.width = width;
                self.config.height = height;
                self.format = Some(negotiated);
                self.state = SessionState::Configured;
                Ok(negotiated)
            }
            Err(err) => {
                if touched {
                    self.restore_format(previous);
                }
                Err(self.fault(err))
            }
        }
    }

    fn negotiate(
        &mut self,
        width: u32,
        height: u32,
        formats: &[FourCC],
        touched: &mut bool,
    ) -> Result<NegotiatedFormat> {
        let driver = self.open_driver("configure")?;
        let offered = driver.supported_formats()?;
        debug!(?offered, requested = ?formats, "negotiating format");

        for &fourcc in formats {
            if PixelFormat::from_fourcc(fourcc).is_none() {
                debug!(%fourcc, "no converter for format, skipping");
                continue;
            }
            if !offered.contains(&fourcc) {
                continue;
            }
            *touched = true;
            let actual = driver.set_format(&Format::new(width, height, fourcc))?;
            let Some(pixel_format) = PixelFormat::from_fourcc(actual.fourcc) else {
                warn!(requested = %fourcc, got = %actual.fourcc, "driver substituted an unsupported format");
                continue;
            };
            let negotiated = NegotiatedFormat {
                width: actual.width,
                height: actual.height,
                pixel_format,
                stride: actual.stride,
                size: actual.size,
            };
            info!(
                requested_width = width,
                requested_height = height,
                width = negotiated.width,
                height = negotiated.height,
                format = %pixel_format,
                "negotiated format"
            );
            return Ok(negotiated);
        }

        Err(CaptureError::UnsupportedFormat {
            requested: formats.to_vec(),
        })
    }

    /// Put the device back on `previous` after a failed negotiation.
    fn restore_format(&mut self, previous: Option<NegotiatedFormat>) {
        let restored = match (previous, self.driver.as_mut()) {
            (Some(prev), Some(driver)) => {
                let fourcc = prev.pixel_format.fourcc();
                driver
                    .set_format(&Format::new(prev.width, prev.height, fourcc))
                    .is_ok_and(|actual| {
                        actual.fourcc == fourcc
                            && actual.width == prev.width
                            && actual.height == prev.height
                    })
            }
            _ => false,
        };
        if !restored {
            if previous.is_some() {
                warn!(device = %self.identifier, "could not restore previous format");
            }
            self.format = None;
            self.state = SessionState::Opened;
        }
    }

    /// Request and map the configured number of buffers.
    pub fn init_mapping(&mut self) -> Result<()> {
        self.require("init_mapping", &[SessionState::Configured])?;
        let requested = self.config.buffer_count;
        let required = self.config.min_buffers;
        let driver = self.open_driver("init_mapping")?;

        let granted = driver.request_buffers(requested)?;
        if granted < required {
            if let Err(err) = driver.release_buffers() {
                warn!(error = %err, "failed to release short buffer grant");
            }
            return Err(CaptureError::InsufficientBuffers { granted, required });
        }

        let lengths: Vec<usize> = (0..granted as usize)
            .map(|index| driver.buffer(index).map_or(0, <[u8]>::len))
            .collect();
        self.pool = BufferPool::new(lengths);
        self.state = SessionState::MemoryMapped;
        info!(requested, granted, "mapped capture buffers");
        Ok(())
    }

    /// Queue every buffer, then start streaming.
    pub fn start_streaming(&mut self) -> Result<()> {
        self.require("start_streaming", &[SessionState::MemoryMapped])?;
        let Self { driver, pool, .. } = self;
        let Some(driver) = driver.as_mut() else {
            return Err(CaptureError::InvalidState {
                operation: "start_streaming",
                state: self.state,
            });
        };

        let started = queue_all(driver, pool).and_then(|()| driver.stream_on());
        if let Err(err) = started {
            // un-queue whatever made it to the driver
            match driver.stream_off() {
                Ok(()) => pool.reclaim_all(),
                Err(off) => {
                    // buffer ownership is unknown from here on
                    warn!(error = %off, "stream-off after failed start");
                    self.state = SessionState::Faulted;
                }
            }
            return Err(self.fault(err));
        }

        self.state = SessionState::Streaming;
        info!(buffers = self.pool.len(), "streaming started");
        Ok(())
    }

    /// Stop streaming. In-flight buffers return to the session; nothing is
    /// unmapped.
    pub fn stop_streaming(&mut self) -> Result<()> {
        self.require("stop_streaming", &[SessionState::Streaming])?;
        let driver = self.open_driver("stop_streaming")?;
        if let Err(err) = driver.stream_off() {
            // the driver still holds its queued buffers
            return Err(self.fault(err));
        }
        self.pool.reclaim_all();
        self.state = SessionState::MemoryMapped;
        info!("streaming stopped");
        Ok(())
    }

    /// Unmap all buffers and return to `Configured`.
    pub fn release_mapping(&mut self) -> Result<()> {
        self.require("release_mapping", &[SessionState::MemoryMapped])?;
        let driver = self.open_driver("release_mapping")?;
        driver.release_buffers()?;
        self.pool.clear();
        self.state = SessionState::Configured;
        debug!("released capture buffers");
        Ok(())
    }

    /// Configure if needed, map buffers, apply configured controls and start
    /// streaming.
    pub fn start(&mut self) -> Result<NegotiatedFormat> {
        if self.state == SessionState::Opened {
            let formats = self.config.formats.clone();
            self.configure(self.config.width, self.config.height, &formats)?;
        }
        if self.state == SessionState::Configured {
            self.init_mapping()?;
        }
        self.require("start", &[SessionState::MemoryMapped])?;
        self.apply_configured_controls();
        self.start_streaming()?;
        self.format.ok_or(CaptureError::InvalidState {
            operation: "start",
            state: self.state,
        })
    }

    /// Stop streaming and unmap, back to `Configured`.
    pub fn stop(&mut self) -> Result<()> {
        if self.state == SessionState::Streaming {
            self.stop_streaming()?;
        }
        if self.state == SessionState::MemoryMapped {
            self.release_mapping()?;
        }
        Ok(())
    }

    fn apply_configured_controls(&mut self) {
        let wanted = CameraControls {
            hflip: self.config.hflip,
            vflip: self.config.vflip,
            brightness: self.config.brightness.unwrap_or(self.controls.brightness),
        };
        let brightness = self.config.brightness.is_some();
        let mut apply = |id: ControlId, value: i64| match self.set_control(id, value) {
            Ok(()) | Err(CaptureError::ControlNotSupported(_)) => {}
            Err(err) => warn!(control = %id, error = %err, "failed to apply control"),
        };
        apply(ControlId::HFLIP, i64::from(wanted.hflip));
        apply(ControlId::VFLIP, i64::from(wanted.vflip));
        if brightness {
            apply(ControlId::BRIGHTNESS, wanted.brightness);
        }
    }

    /// Stop streaming, unmap all buffers and release the device.
    ///
    /// Closing a closed session does nothing. Teardown errors are logged;
    /// the handle is released regardless.
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        if let Some(mut driver) = self.driver.take() {
            if !self.pool.is_empty() {
                if let Err(err) = driver.stream_off() {
                    warn!(error = %err, "stream-off during close");
                }
                self.pool.reclaim_all();
                if let Err(err) = driver.release_buffers() {
                    warn!(error = %err, "unmap during close");
                }
            }
        }
        self.pool.clear();
        self.format = None;
        self.state = SessionState::Closed;
        info!(device = %self.identifier, "closed capture device");
    }

    /// Run `f` on the next captured frame.
    ///
    /// Waits up to the configured timeout for the driver, dequeues exactly
    /// one buffer, hands it to `f` and re-queues it whatever `f` returns.
    pub fn with_frame<R, F>(&mut self, f: F) -> Result<R>
    where
        F: FnOnce(&RawFrame<'_>, &NegotiatedFormat) -> Result<R>,
    {
        match self.state {
            SessionState::Streaming => {}
            SessionState::Faulted => {
                return Err(CaptureError::InvalidState {
                    operation: "read_frame",
                    state: self.state,
                })
            }
            _ => return Err(CaptureError::NotStreaming),
        }
        let timeout = self.config.timeout();
        let Self {
            driver,
            pool,
            format,
            ..
        } = self;
        let (Some(driver), Some(format)) = (driver.as_mut(), format.as_ref()) else {
            return Err(CaptureError::NotStreaming);
        };

        let result = read_one(driver, pool, format, timeout, f);
        result.map_err(|err| self.fault(err))
    }

    /// Capture one frame and decode it into `dst` as `mode`.
    ///
    /// `dst` must match the negotiated size. On failure its contents are
    /// unspecified.
    pub fn read_frame<S: Surface + ?Sized>(&mut self, dst: &mut S, mode: ColorMode) -> Result<()> {
        self.with_frame(|frame, format| {
            convert::convert(
                format.pixel_format,
                mode,
                frame.data,
                format.width,
                format.height,
                dst,
            )
        })
    }

    /// Capture one frame in the session's color mode.
    ///
    /// Returns `Ok(false)` when no frame arrived in time.
    pub fn get_image<S: Surface + ?Sized>(&mut self, dst: &mut S) -> Result<bool> {
        let mode = self.config.color_mode;
        match self.read_frame(dst, mode) {
            Ok(()) => Ok(true),
            Err(err) if err.is_recoverable() => {
                debug!(error = %err, "no frame");
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    /// Capture `count` frames into `dst`, which keeps the last one.
    ///
    /// Gives up with `CaptureTimeout` after `max_timeouts` consecutive
    /// waits without a frame.
    pub fn capture_frames<S: Surface + ?Sized>(
        &mut self,
        dst: &mut S,
        count: u32,
        max_timeouts: u32,
    ) -> Result<()> {
        let mut captured = 0;
        let mut timeouts = 0;
        while captured < count {
            if self.get_image(dst)? {
                captured += 1;
                timeouts = 0;
                debug!(frame = captured, "captured");
            } else {
                timeouts += 1;
                if timeouts >= max_timeouts {
                    return Err(CaptureError::CaptureTimeout(self.config.timeout()));
                }
                warn!(timeouts, "timed out waiting for a frame, retrying");
            }
        }
        Ok(())
    }

    /// Copy the next frame's undecoded bytes.
    pub fn get_raw(&mut self) -> Result<RawImage> {
        self.with_frame(|frame, format| {
            Ok(RawImage {
                bytes: frame.data.to_vec(),
                width: format.width,
                height: format.height,
            })
        })
    }

    /// Whether a frame can be read without waiting.
    pub fn query_image(&mut self) -> Result<bool> {
        if self.state != SessionState::Streaming {
            return Err(CaptureError::NotStreaming);
        }
        let driver = self.open_driver("query_image")?;
        match driver.wait_ready(Duration::ZERO) {
            Ok(ready) => Ok(ready),
            Err(err) => Err(self.fault(err)),
        }
    }

    /// Read a device control.
    pub fn get_control(&mut self, id: ControlId) -> Result<i64> {
        let value = self.open_driver("get_control")?.control(id)?;
        self.remember(id, value);
        Ok(value)
    }

    /// Set a device control. Rejected values leave the session unchanged.
    pub fn set_control(&mut self, id: ControlId, value: i64) -> Result<()> {
        let driver = self.open_driver("set_control")?;
        let info = driver.control_info(id)?;
        if !info.contains(value) {
            return Err(CaptureError::ValueOutOfRange {
                id,
                value,
                min: info.minimum,
                max: info.maximum,
            });
        }
        driver.set_control(id, value)?;
        debug!(control = %id, value, "control set");
        self.remember(id, value);
        Ok(())
    }

    fn remember(&mut self, id: ControlId, value: i64) {
        match id {
            ControlId::HFLIP => self.controls.hflip = value != 0,
            ControlId::VFLIP => self.controls.vflip = value != 0,
            ControlId::BRIGHTNESS => self.controls.brightness = value,
            _ => {}
        }
    }

    /// Read flips and brightness; unsupported controls keep their last
    /// known value.
    pub fn get_controls(&mut self) -> Result<CameraControls> {
        for id in [ControlId::HFLIP, ControlId::VFLIP, ControlId::BRIGHTNESS] {
            match self.get_control(id) {
                Ok(_) | Err(CaptureError::ControlNotSupported(_)) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(self.controls)
    }

    /// Set flips and brightness, skipping controls the device lacks.
    /// Returns the resulting values.
    pub fn set_controls(&mut self, controls: CameraControls) -> Result<CameraControls> {
        let wanted = [
            (ControlId::HFLIP, i64::from(controls.hflip)),
            (ControlId::VFLIP, i64::from(controls.vflip)),
            (ControlId::BRIGHTNESS, controls.brightness),
        ];
        for (id, value) in wanted {
            match self.set_control(id, value) {
                Ok(()) => {}
                Err(CaptureError::ControlNotSupported(_)) => {
                    debug!(control = %id, "control not supported, skipped");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(self.controls)
    }
}

impl<D: CaptureDriver> Drop for Session<D> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<D: CaptureDriver> fmt::Debug for Session<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("identifier", &self.identifier)
            .field("state", &self.state)
            .field("format", &self.format)
            .field("buffers", &self.pool.len())
            .finish_non_exhaustive()
    }
}

fn queue_all<D: CaptureDriver>(driver: &mut D, pool: &mut BufferPool) -> Result<()> {
    for index in 0..pool.len() {
        driver.queue(index)?;
        pool.enqueue(index)?;
    }
    Ok(())
}

/// Dequeue one buffer, run `f` on it and hand it back to the driver.
fn read_one<D, R, F>(
    driver: &mut D,
    pool: &mut BufferPool,
    format: &NegotiatedFormat,
    timeout: Duration,
    f: F,
) -> Result<R>
where
    D: CaptureDriver,
    F: FnOnce(&RawFrame<'_>, &NegotiatedFormat) -> Result<R>,
{
    if !driver.wait_ready(timeout)? {
        debug!(?timeout, "capture timed out");
        return Err(CaptureError::CaptureTimeout(timeout));
    }
    let metadata = driver.dequeue()?;
    let index = metadata.index;
    pool.dequeue(index)?;

    let result = driver.buffer(index).map_or_else(
        || {
            Err(CaptureError::BufferProtocolViolation(format!(
                "buffer {index} is not mapped"
            )))
        },
        |buffer| {
            let used = (metadata.bytes_used as usize).min(buffer.len());
            let data = buffer.get(..used).unwrap_or(buffer);
            f(&RawFrame { data, metadata }, format)
        },
    );

    if let Err(err) = driver.queue(index) {
        return Err(match err {
            CaptureError::DeviceDisconnected => err,
            other => CaptureError::BufferProtocolViolation(format!(
                "failed to re-queue buffer {index}: {other}"
            )),
        });
    }
    pool.enqueue(index)?;
    result
}
