//! Pixel format conversion.
//!
//! [`convert`] decodes one raw frame straight into a caller-owned
//! [`Surface`] in a single pass. The transform applied to each pixel is
//! chosen by matching the source [`PixelFormat`] against the requested
//! [`ColorMode`]:
//!
//! | source family       | RGB        | YUV        | HSV        |
//! |---------------------|------------|------------|------------|
//! | RGB, RGB444, XBGR32, Bayer | repack | RGB → YUV | RGB → HSV |
//! | YUYV, UYVY, YUV 4:2:0      | YUV → RGB | repack | YUV → RGB → HSV |
//!
//! [`colorspace`] applies the same transforms between two decoded surfaces.

pub mod color;
pub mod decode;

use crate::error::{CaptureError, Result};
use crate::surface::Surface;
use crate::traits::{ColorMode, PixelFormat};

type Transform = fn([u8; 3]) -> [u8; 3];

/// Per-pixel transform for a source format and output mode.
fn transform_for(format: PixelFormat, mode: ColorMode) -> Transform {
    match (format.is_luma_chroma(), mode) {
        (false, ColorMode::Rgb) | (true, ColorMode::Yuv) => color::identity,
        (false, ColorMode::Yuv) => color::rgb_to_yuv,
        (false, ColorMode::Hsv) => color::rgb_to_hsv,
        (true, ColorMode::Rgb) => color::yuv_to_rgb,
        (true, ColorMode::Hsv) => color::yuv_to_hsv,
    }
}

/// Decode a raw `width` x `height` frame in `format` into `dst` as `mode`.
///
/// `dst` must have exactly the frame's dimensions. On error `dst` may have
/// been partially written.
pub fn convert<S: Surface + ?Sized>(
    format: PixelFormat,
    mode: ColorMode,
    src: &[u8],
    width: u32,
    height: u32,
    dst: &mut S,
) -> Result<()> {
    check_surface(dst, width, height)?;
    let expected = format.frame_size(width, height);
    if src.len() < expected {
        return Err(CaptureError::TruncatedFrame {
            expected,
            actual: src.len(),
        });
    }

    let transform = transform_for(format, mode);
    let layout = dst.layout();
    let mut out = dst.pixels_mut().chunks_exact_mut(layout.bpp());
    let mut emit = |px: [u8; 3]| {
        if let Some(slot) = out.next() {
            layout.write(slot, transform(px));
        }
    };

    let pixels = width as usize * height as usize;
    match format {
        PixelFormat::Yuyv => decode::yuyv(src, pixels, &mut emit),
        PixelFormat::Uyvy => decode::uyvy(src, pixels, &mut emit),
        PixelFormat::Rgb24 => decode::rgb24(src, pixels, &mut emit),
        PixelFormat::Xbgr32 => decode::xbgr32(src, pixels, &mut emit),
        PixelFormat::Rgb444 => decode::rgb444(src, pixels, &mut emit),
        PixelFormat::Sbggr8 => decode::sbggr8(src, width, height, &mut emit),
        PixelFormat::Yuv420 => decode::yuv420(src, width, height, &mut emit),
    }
    Ok(())
}

/// Convert an RGB surface into `mode`, writing into `dst`.
///
/// With [`ColorMode::Rgb`] this only repacks between pixel layouts.
pub fn colorspace<S: Surface + ?Sized, D: Surface + ?Sized>(
    src: &S,
    dst: &mut D,
    mode: ColorMode,
) -> Result<()> {
    let (width, height) = (src.width(), src.height());
    check_surface(dst, width, height)?;
    let src_layout = src.layout();
    src_layout.validate()?;
    let expected = width as usize * height as usize * src_layout.bpp();
    if src.pixels().len() < expected {
        return Err(CaptureError::TruncatedFrame {
            expected,
            actual: src.pixels().len(),
        });
    }

    let transform = transform_for(PixelFormat::Rgb24, mode);
    let dst_layout = dst.layout();
    let pairs = src
        .pixels()
        .chunks_exact(src_layout.bpp())
        .zip(dst.pixels_mut().chunks_exact_mut(dst_layout.bpp()));
    for (input, output) in pairs {
        dst_layout.write(output, transform(src_layout.read(input)));
    }
    Ok(())
}

fn check_surface<S: Surface + ?Sized>(dst: &S, width: u32, height: u32) -> Result<()> {
    let layout = dst.layout();
    layout.validate()?;
    let expected_len = width as usize * height as usize * layout.bpp();
    let actual_len = dst.pixels().len();
    if dst.width() != width || dst.height() != height || actual_len < expected_len {
        return Err(CaptureError::SurfaceMismatch {
            width,
            height,
            expected_len,
            actual_width: dst.width(),
            actual_height: dst.height(),
            actual_len,
        });
    }
    Ok(())
}
