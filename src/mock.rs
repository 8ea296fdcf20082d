//! Mock driver for testing without hardware.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::time::Duration;

use crate::control::{ControlId, ControlInfo};
use crate::error::{CaptureError, Result};
use crate::traits::{CaptureDriver, DeviceCapabilities, Format, FourCC, FrameMetadata};

/// In-memory stand-in for a kernel capture device.
///
/// Buffers are plain vectors; each dequeue fills the oldest queued buffer
/// with the configured [`TestPattern`].
pub struct MockDriver {
    capabilities: DeviceCapabilities,
    formats: Vec<FourCC>,
    max_size: (u32, u32),
    format: Format,
    buffer_limit: u32,
    buffers: Vec<Vec<u8>>,
    queued: VecDeque<usize>,
    streaming: bool,
    frames_available: Option<usize>,
    pattern: TestPattern,
    frame_count: u32,
    controls: HashMap<ControlId, (ControlInfo, i64)>,
    disconnected: bool,
    fail_requeue: bool,
    fail_stream_off: bool,
    busy_on_stream: bool,
    substitute: Option<(FourCC, FourCC)>,
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDriver {
    /// Create a mock offering YUYV and RGB3 up to 640x480, with brightness
    /// and flip controls.
    #[must_use]
    pub fn new() -> Self {
        let controls = HashMap::from([
            (
                ControlId::BRIGHTNESS,
                (
                    ControlInfo {
                        minimum: 0,
                        maximum: 255,
                        step: 1,
                        default: 128,
                    },
                    128,
                ),
            ),
            (ControlId::HFLIP, (ControlInfo::BOOLEAN, 0)),
            (ControlId::VFLIP, (ControlInfo::BOOLEAN, 0)),
        ]);
        Self {
            capabilities: DeviceCapabilities {
                driver: "mock".to_owned(),
                card: "Mock Camera".to_owned(),
                bus_info: "mock:0".to_owned(),
                can_capture: true,
                can_stream: true,
            },
            formats: vec![FourCC::YUYV, FourCC::RGB3],
            max_size: (640, 480),
            format: Format::new(640, 480, FourCC::YUYV),
            buffer_limit: 8,
            buffers: Vec::new(),
            queued: VecDeque::new(),
            streaming: false,
            frames_available: None,
            pattern: TestPattern::ColorBars,
            frame_count: 0,
            controls,
            disconnected: false,
            fail_requeue: false,
            fail_stream_off: false,
            busy_on_stream: false,
            substitute: None,
        }
    }

    /// Formats the device offers, in the driver's order.
    #[must_use]
    pub fn with_formats(mut self, formats: Vec<FourCC>) -> Self {
        if let Some(&first) = formats.first() {
            self.format = Format::new(self.format.width, self.format.height, first);
        }
        self.formats = formats;
        self
    }

    /// Largest frame size; bigger requests are clamped.
    #[must_use]
    pub fn with_max_size(mut self, width: u32, height: u32) -> Self {
        self.max_size = (width, height);
        self
    }

    /// Set the capabilities for this mock device.
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: DeviceCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Grant at most `limit` buffers.
    #[must_use]
    pub fn with_buffer_limit(mut self, limit: u32) -> Self {
        self.buffer_limit = limit;
        self
    }

    /// Pattern written into each captured frame.
    #[must_use]
    pub fn with_pattern(mut self, pattern: TestPattern) -> Self {
        self.pattern = pattern;
        self
    }

    /// Remove a control.
    #[must_use]
    pub fn without_control(mut self, id: ControlId) -> Self {
        self.controls.remove(&id);
        self
    }

    /// Fail stream-on with `EBUSY`.
    #[must_use]
    pub fn busy_on_stream(mut self) -> Self {
        self.busy_on_stream = true;
        self
    }

    /// Limit how many more frames arrive; `None` means unlimited.
    pub fn set_frames_available(&mut self, frames: Option<usize>) {
        self.frames_available = frames;
    }

    /// Make every further call fail as if the device was unplugged.
    pub fn disconnect(&mut self) {
        self.disconnected = true;
    }

    /// Make re-queueing a buffer fail while streaming.
    pub fn fail_requeue(&mut self) {
        self.fail_requeue = true;
    }

    /// Answer a request for `requested` with `actual`, the way drivers swap
    /// in a format of their own choosing.
    pub fn substitute_format(&mut self, requested: FourCC, actual: FourCC) {
        self.substitute = Some((requested, actual));
    }

    /// Make stream-off fail with `EINVAL`, leaving the queue untouched.
    pub fn fail_stream_off(&mut self, fail: bool) {
        self.fail_stream_off = fail;
    }

    /// Buffers currently held by the driver.
    pub fn queued_count(&self) -> usize {
        self.queued.len()
    }

    /// Buffers currently mapped.
    pub fn mapped_buffers(&self) -> usize {
        self.buffers.len()
    }

    /// Whether stream-on is in effect.
    pub const fn is_streaming(&self) -> bool {
        self.streaming
    }

    const fn check_connected(&self) -> Result<()> {
        if self.disconnected {
            Err(CaptureError::DeviceDisconnected)
        } else {
            Ok(())
        }
    }

    fn frame_ready(&self) -> bool {
        self.streaming && !self.queued.is_empty() && self.frames_available != Some(0)
    }

    fn lookup(&self, id: ControlId) -> Result<(ControlInfo, i64)> {
        self.controls
            .get(&id)
            .copied()
            .ok_or(CaptureError::ControlNotSupported(id))
    }
}

fn invalid(message: &str) -> CaptureError {
    CaptureError::Io(io::Error::new(io::ErrorKind::InvalidInput, message))
}

impl CaptureDriver for MockDriver {
    fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    fn supported_formats(&self) -> Result<Vec<FourCC>> {
        self.check_connected()?;
        Ok(self.formats.clone())
    }

    fn format(&self) -> Result<Format> {
        self.check_connected()?;
        Ok(self.format.clone())
    }

    fn set_format(&mut self, format: &Format) -> Result<Format> {
        self.check_connected()?;
        if self.streaming || !self.buffers.is_empty() {
            return Err(CaptureError::DeviceBusy);
        }
        // like the kernel: an unknown code falls back to the current one
        let fourcc = match self.substitute {
            Some((requested, actual)) if requested == format.fourcc => actual,
            _ if self.formats.contains(&format.fourcc) => format.fourcc,
            _ => self.format.fourcc,
        };
        let width = format.width.clamp(1, self.max_size.0);
        let height = format.height.clamp(1, self.max_size.1);
        self.format = Format::new(width, height, fourcc);
        Ok(self.format.clone())
    }

    fn request_buffers(&mut self, count: u32) -> Result<u32> {
        self.check_connected()?;
        if self.streaming {
            return Err(CaptureError::DeviceBusy);
        }
        let granted = count.min(self.buffer_limit);
        let size = self.format.size as usize;
        self.buffers = (0..granted).map(|_| vec![0u8; size]).collect();
        self.queued.clear();
        Ok(granted)
    }

    fn release_buffers(&mut self) -> Result<()> {
        if self.streaming {
            return Err(CaptureError::DeviceBusy);
        }
        self.buffers.clear();
        self.queued.clear();
        Ok(())
    }

    fn buffer(&self, index: usize) -> Option<&[u8]> {
        self.buffers.get(index).map(Vec::as_slice)
    }

    fn queue(&mut self, index: usize) -> Result<()> {
        self.check_connected()?;
        if self.fail_requeue && self.streaming {
            return Err(invalid("queue rejected"));
        }
        if index >= self.buffers.len() {
            return Err(invalid("no such buffer"));
        }
        if self.queued.contains(&index) {
            return Err(invalid("buffer already queued"));
        }
        self.queued.push_back(index);
        Ok(())
    }

    fn wait_ready(&mut self, _timeout: Duration) -> Result<bool> {
        self.check_connected()?;
        Ok(self.frame_ready())
    }

    fn dequeue(&mut self) -> Result<FrameMetadata> {
        self.check_connected()?;
        if !self.frame_ready() {
            return Err(CaptureError::WouldBlock);
        }
        let index = self.queued.pop_front().ok_or(CaptureError::WouldBlock)?;
        if let Some(frames) = self.frames_available.as_mut() {
            *frames -= 1;
        }

        let format = self.format.clone();
        let pattern = self.pattern;
        let data = self
            .buffers
            .get_mut(index)
            .ok_or_else(|| invalid("no such buffer"))?;
        generate_test_frame(data, &format, pattern);
        let bytes_used = u32::try_from(data.len()).unwrap_or(u32::MAX);

        let sequence = self.frame_count;
        self.frame_count += 1;

        Ok(FrameMetadata {
            index,
            sequence,
            timestamp: Duration::from_millis(u64::from(sequence) * 33), // ~30fps
            bytes_used,
        })
    }

    fn stream_on(&mut self) -> Result<()> {
        self.check_connected()?;
        if self.busy_on_stream {
            return Err(CaptureError::DeviceBusy);
        }
        self.streaming = true;
        Ok(())
    }

    fn stream_off(&mut self) -> Result<()> {
        if self.fail_stream_off {
            return Err(invalid("stream-off refused"));
        }
        self.streaming = false;
        self.queued.clear();
        self.check_connected()
    }

    fn control_info(&self, id: ControlId) -> Result<ControlInfo> {
        self.check_connected()?;
        self.lookup(id).map(|(info, _)| info)
    }

    fn control(&self, id: ControlId) -> Result<i64> {
        self.check_connected()?;
        self.lookup(id).map(|(_, value)| value)
    }

    fn set_control(&mut self, id: ControlId, value: i64) -> Result<()> {
        self.check_connected()?;
        let (info, _) = self.lookup(id)?;
        if !info.contains(value) {
            return Err(CaptureError::ValueOutOfRange {
                id,
                value,
                min: info.minimum,
                max: info.maximum,
            });
        }
        self.controls.insert(id, (info, value));
        Ok(())
    }
}

/// Test pattern types for mock frame generation.
#[derive(Debug, Clone, Copy)]
pub enum TestPattern {
    /// SMPTE color bars pattern (YUYV only).
    ColorBars,
    /// Horizontal gradient from dark to light (YUYV only).
    Gradient,
    /// Solid color with specified Y, U, V values (YUYV only).
    Solid(u8, u8, u8),
    /// Every byte set to the given value, any format.
    Fill(u8),
}

/// Fill `data` with `pattern`. YUYV patterns on other formats leave zeros.
fn generate_test_frame(data: &mut [u8], format: &Format, pattern: TestPattern) {
    match (format.fourcc, pattern) {
        (_, TestPattern::Fill(value)) => data.fill(value),
        (FourCC::YUYV, TestPattern::ColorBars) => {
            generate_color_bars(data, format.width);
        }
        (FourCC::YUYV, TestPattern::Gradient) => {
            generate_gradient(data, format.width);
        }
        (FourCC::YUYV, TestPattern::Solid(y, u, v)) => generate_solid(data, y, u, v),
        _ => data.fill(0),
    }
}

/// YUYV values of the eight bars: white, yellow, cyan, green, magenta, red,
/// blue, black.
pub const COLOR_BARS_YUV: [(u8, u8, u8); 8] = [
    (235, 128, 128),
    (210, 16, 146),
    (170, 166, 16),
    (145, 54, 34),
    (106, 202, 222),
    (81, 90, 240),
    (41, 240, 110),
    (16, 128, 128),
];

fn write_rows<F: Fn(u32) -> (u8, u8, u8)>(data: &mut [u8], width: u32, pixel: F) {
    let row_bytes = width as usize * 2;
    if row_bytes == 0 {
        return;
    }
    for row in data.chunks_exact_mut(row_bytes) {
        for (pair, x) in row.chunks_exact_mut(4).zip((0..width).step_by(2)) {
            let (y, u, v) = pixel(x);
            pair.copy_from_slice(&[y, u, y, v]);
        }
    }
}

fn generate_color_bars(data: &mut [u8], width: u32) {
    let bar_width = (width / 8).max(1);
    write_rows(data, width, |x| {
        let bar = ((x / bar_width) as usize).min(COLOR_BARS_YUV.len() - 1);
        COLOR_BARS_YUV.get(bar).copied().unwrap_or((16, 128, 128))
    });
}

fn generate_gradient(data: &mut [u8], width: u32) {
    write_rows(data, width, |x| {
        let y = u8::try_from((x * 255) / width.max(1)).unwrap_or(u8::MAX);
        (y, 128, 128)
    });
}

fn generate_solid(data: &mut [u8], y: u8, u: u8, v: u8) {
    for pair in data.chunks_exact_mut(4) {
        pair.copy_from_slice(&[y, u, y, v]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_device_creation() {
        let device = MockDriver::new();
        assert_eq!(device.capabilities().driver, "mock");
        assert!(device.capabilities().can_capture);
        assert!(device.capabilities().can_stream);
    }

    #[test]
    fn test_mock_set_format_clamps() {
        let mut device = MockDriver::new();
        let format = device.format().expect("format should succeed");
        assert_eq!(format.width, 640);
        assert_eq!(format.height, 480);

        let actual = device
            .set_format(&Format::new(1280, 720, FourCC::RGB3))
            .expect("set_format should succeed");
        assert_eq!((actual.width, actual.height), (640, 480));
        assert_eq!(actual.fourcc, FourCC::RGB3);
        assert_eq!(actual.size, 640 * 480 * 3);
    }

    #[test]
    fn test_mock_queue_protocol() {
        let mut device = MockDriver::new();
        assert_eq!(device.request_buffers(4).expect("reqbufs"), 4);
        device.queue(0).expect("queue");
        assert!(device.queue(0).is_err());
        assert!(device.queue(9).is_err());

        assert!(!device.wait_ready(Duration::ZERO).expect("poll"));
        device.stream_on().expect("stream on");
        assert!(device.wait_ready(Duration::ZERO).expect("poll"));

        let meta = device.dequeue().expect("dequeue");
        assert_eq!(meta.index, 0);
        assert_eq!(meta.sequence, 0);
        assert!(matches!(device.dequeue(), Err(CaptureError::WouldBlock)));

        device.queue(0).expect("requeue");
        let meta = device.dequeue().expect("dequeue");
        assert_eq!(meta.sequence, 1);
        assert_eq!(meta.timestamp, Duration::from_millis(33));
    }

    #[test]
    fn test_color_bars_pattern() {
        let format = Format::new(640, 480, FourCC::YUYV);
        let mut data = vec![0u8; format.size as usize];
        generate_test_frame(&mut data, &format, TestPattern::ColorBars);

        // First bar should be white (Y=235)
        assert_eq!(data.first(), Some(&235));
        // Last bar should be black (Y=16)
        assert_eq!(data.get(1278), Some(&16));
    }

    #[test]
    fn test_gradient_pattern() {
        let format = Format::new(640, 480, FourCC::YUYV);
        let mut data = vec![0u8; format.size as usize];
        generate_test_frame(&mut data, &format, TestPattern::Gradient);

        // Left edge should be dark
        assert!(data.first().is_some_and(|&y| y < 10));

        // Right edge should be bright (check last row, last pixel)
        let last_row_start = 479 * 640 * 2;
        assert!(data.get(last_row_start + 638 * 2).is_some_and(|&y| y > 200));
    }

    #[test]
    fn test_solid_pattern() {
        let format = Format::new(64, 64, FourCC::YUYV);
        let mut data = vec![0u8; format.size as usize];
        generate_test_frame(&mut data, &format, TestPattern::Solid(128, 64, 192));
        assert_eq!(data.get(..4), Some(&[128, 64, 128, 192][..]));
    }

    #[test]
    fn test_disconnect() {
        let mut device = MockDriver::new();
        device.disconnect();
        assert!(matches!(
            device.supported_formats(),
            Err(CaptureError::DeviceDisconnected)
        ));
        assert!(matches!(
            device.wait_ready(Duration::ZERO),
            Err(CaptureError::DeviceDisconnected)
        ));
    }
}
