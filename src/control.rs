//! Device controls and device enumeration.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

/// Highest `/dev/videoN` index probed by [`list_devices`].
const MAX_DEVICE_INDEX: u32 = 63;

const VIDEO4LINUX_SYSFS: &str = "/sys/class/video4linux";

/// Identifier of a scalar device control (`V4L2_CID_*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ControlId(pub u32);

impl ControlId {
    /// `V4L2_CID_BRIGHTNESS`.
    pub const BRIGHTNESS: Self = Self(0x0098_0900);
    /// `V4L2_CID_HFLIP`.
    pub const HFLIP: Self = Self(0x0098_0914);
    /// `V4L2_CID_VFLIP`.
    pub const VFLIP: Self = Self(0x0098_0915);

    const fn name(self) -> Option<&'static str> {
        match self.0 {
            0x0098_0900 => Some("brightness"),
            0x0098_0914 => Some("hflip"),
            0x0098_0915 => Some("vflip"),
            _ => None,
        }
    }
}

impl fmt::Display for ControlId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "{:#010x}", self.0),
        }
    }
}

/// Value range of a control as reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlInfo {
    /// Smallest accepted value.
    pub minimum: i64,
    /// Largest accepted value.
    pub maximum: i64,
    /// Granularity.
    pub step: u64,
    /// Power-on default.
    pub default: i64,
}

impl ControlInfo {
    /// Range of a boolean control.
    pub const BOOLEAN: Self = Self {
        minimum: 0,
        maximum: 1,
        step: 1,
        default: 0,
    };

    /// Whether `value` lies within the range.
    #[must_use]
    pub const fn contains(&self, value: i64) -> bool {
        value >= self.minimum && value <= self.maximum
    }
}

/// The standard image controls a session tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CameraControls {
    /// Mirror horizontally.
    pub hflip: bool,
    /// Mirror vertically.
    pub vflip: bool,
    /// Brightness in device units.
    pub brightness: i64,
}

/// List capture device nodes present on the system.
///
/// Probes `/dev/video0` through `/dev/video63`; returns an empty list when
/// none exist.
pub fn list_devices() -> Vec<String> {
    list_devices_in(Path::new("/dev"))
}

fn list_devices_in(dir: &Path) -> Vec<String> {
    let devices: Vec<String> = (0..=MAX_DEVICE_INDEX)
        .map(|index| dir.join(format!("video{index}")))
        .filter(|path| path.exists())
        .map(|path: PathBuf| path.to_string_lossy().into_owned())
        .collect();
    debug!(count = devices.len(), "enumerated video devices");
    devices
}

/// Card name the kernel reports for a device node, read from sysfs.
///
/// Does not open the node, so it works on devices another process holds.
pub fn device_name(path: &str) -> Option<String> {
    device_name_in(Path::new(VIDEO4LINUX_SYSFS), path)
}

fn device_name_in(sysfs: &Path, path: &str) -> Option<String> {
    let node = Path::new(path).file_name()?;
    let name = fs::read_to_string(sysfs.join(node).join("name")).ok()?;
    Some(name.trim().to_owned())
}
