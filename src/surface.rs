//! Destination surfaces the converter writes decoded frames into.

use crate::error::{CaptureError, Result};

/// Bit layout of a packed destination pixel.
///
/// A pixel is a little-endian integer of `bytes_per_pixel` bytes; each
/// channel is reduced by `*_loss` bits and placed at `*_shift`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelLayout {
    /// Bytes per pixel, 1 to 4.
    pub bytes_per_pixel: u8,
    /// Bit position of red.
    pub r_shift: u8,
    /// Bit position of green.
    pub g_shift: u8,
    /// Bit position of blue.
    pub b_shift: u8,
    /// Low bits dropped from red.
    pub r_loss: u8,
    /// Low bits dropped from green.
    pub g_loss: u8,
    /// Low bits dropped from blue.
    pub b_loss: u8,
}

impl PixelLayout {
    /// Three bytes in R, G, B order.
    pub const RGB24: Self = Self::lossless(3, 0, 8, 16);
    /// Three bytes in B, G, R order.
    pub const BGR24: Self = Self::lossless(3, 16, 8, 0);
    /// 32-bit `0x00RRGGBB`, i.e. bytes B, G, R, X.
    pub const XRGB32: Self = Self::lossless(4, 16, 8, 0);
    /// 16-bit 5-6-5.
    pub const RGB565: Self = Self {
        bytes_per_pixel: 2,
        r_shift: 11,
        g_shift: 5,
        b_shift: 0,
        r_loss: 3,
        g_loss: 2,
        b_loss: 3,
    };
    /// 8-bit 3-3-2.
    pub const RGB332: Self = Self {
        bytes_per_pixel: 1,
        r_shift: 5,
        g_shift: 2,
        b_shift: 0,
        r_loss: 5,
        g_loss: 5,
        b_loss: 6,
    };

    const fn lossless(bytes_per_pixel: u8, r_shift: u8, g_shift: u8, b_shift: u8) -> Self {
        Self {
            bytes_per_pixel,
            r_shift,
            g_shift,
            b_shift,
            r_loss: 0,
            g_loss: 0,
            b_loss: 0,
        }
    }

    /// Bytes per pixel as `usize`.
    #[must_use]
    pub const fn bpp(&self) -> usize {
        self.bytes_per_pixel as usize
    }

    /// Pack three 8-bit channels into a pixel value.
    #[must_use]
    pub const fn pack(&self, [r, g, b]: [u8; 3]) -> u32 {
        Self::place(r, self.r_shift, self.r_loss)
            | Self::place(g, self.g_shift, self.g_loss)
            | Self::place(b, self.b_shift, self.b_loss)
    }

    // a channel shifted past bit 31 has no bits in the pixel
    const fn place(value: u8, shift: u8, loss: u8) -> u32 {
        let bits = match (value as u32).checked_shr(loss as u32) {
            Some(bits) => bits,
            None => 0,
        };
        match bits.checked_shl(shift as u32) {
            Some(placed) => placed,
            None => 0,
        }
    }

    /// Unpack a pixel value into three 8-bit channels.
    #[must_use]
    pub const fn unpack(&self, value: u32) -> [u8; 3] {
        [
            Self::channel(value, self.r_shift, self.r_loss),
            Self::channel(value, self.g_shift, self.g_loss),
            Self::channel(value, self.b_shift, self.b_loss),
        ]
    }

    #[allow(clippy::cast_possible_truncation)]
    const fn channel(value: u32, shift: u8, loss: u8) -> u8 {
        let mask = match 0xFFu32.checked_shr(loss as u32) {
            Some(mask) => mask,
            None => 0,
        };
        let bits = match value.checked_shr(shift as u32) {
            Some(bits) => bits,
            None => 0,
        };
        let loss = if loss > 8 { 8 } else { loss };
        ((bits & mask) << loss) as u8
    }

    /// Write one pixel into `dst`, which must be `bytes_per_pixel` long.
    pub fn write(&self, dst: &mut [u8], channels: [u8; 3]) {
        let bytes = self.pack(channels).to_le_bytes();
        for (out, byte) in dst.iter_mut().zip(bytes) {
            *out = byte;
        }
    }

    /// Read one pixel from `src`, which must be `bytes_per_pixel` long.
    #[must_use]
    pub fn read(&self, src: &[u8]) -> [u8; 3] {
        let mut bytes = [0u8; 4];
        for (out, byte) in bytes.iter_mut().zip(src) {
            *out = *byte;
        }
        self.unpack(u32::from_le_bytes(bytes))
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if !(1..=4).contains(&self.bytes_per_pixel) {
            return Err(CaptureError::Config(format!(
                "unsupported bytes per pixel {}",
                self.bytes_per_pixel
            )));
        }
        let bits = u32::from(self.bytes_per_pixel) * 8;
        let fits = [
            (self.r_shift, self.r_loss),
            (self.g_shift, self.g_loss),
            (self.b_shift, self.b_loss),
        ]
        .iter()
        .all(|&(shift, loss)| {
            let shift = u32::from(shift);
            loss <= 8 && shift < bits && shift + 8 - u32::from(loss) <= bits
        });
        if fits {
            Ok(())
        } else {
            Err(CaptureError::Config(format!(
                "channel layout {self:?} exceeds pixel size"
            )))
        }
    }
}

/// A caller-owned pixel buffer the converter writes into.
///
/// Pixels are tightly packed, row after row, `layout().bytes_per_pixel`
/// bytes each.
pub trait Surface {
    /// Width in pixels.
    fn width(&self) -> u32;
    /// Height in pixels.
    fn height(&self) -> u32;
    /// Channel layout of each pixel.
    fn layout(&self) -> PixelLayout;
    /// Raw pixel bytes.
    fn pixels(&self) -> &[u8];
    /// Raw pixel bytes, writable.
    fn pixels_mut(&mut self) -> &mut [u8];

    /// Channels of the pixel at (`x`, `y`), or `None` when out of bounds.
    fn pixel_at(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width() || y >= self.height() {
            return None;
        }
        let layout = self.layout();
        let offset = (y as usize * self.width() as usize + x as usize) * layout.bpp();
        let bytes = self.pixels().get(offset..offset + layout.bpp())?;
        Some(layout.read(bytes))
    }
}

/// Owned surface backed by a `Vec<u8>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    width: u32,
    height: u32,
    layout: PixelLayout,
    data: Vec<u8>,
}

impl Image {
    /// Allocate a zero-filled image.
    pub fn new(width: u32, height: u32, layout: PixelLayout) -> Result<Self> {
        layout.validate()?;
        let len = width as usize * height as usize * layout.bpp();
        Ok(Self {
            width,
            height,
            layout,
            data: vec![0; len],
        })
    }

    /// Consume the image and return its bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

impl Surface for Image {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn layout(&self) -> PixelLayout {
        self.layout
    }

    fn pixels(&self) -> &[u8] {
        &self.data
    }

    fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}
