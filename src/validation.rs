//! Frame validation utilities for test pattern verification.
//!
//! These check decoded RGB surfaces for known test patterns. Useful for
//! integration testing with virtual cameras.

use crate::error::{CaptureError, Result};
use crate::surface::Surface;

/// Expected RGB values for SMPTE color bars (8 bars).
///
/// These are the RGB values resulting from converting the YUV values
/// used by the mock device's color bar pattern.
///
/// Colors in order: White, Yellow, Cyan, Green, Magenta, Red, Blue, Black
const SMPTE_COLOR_BARS: [[u8; 3]; 8] = [
    [235, 235, 235], // White
    [235, 235, 11],  // Yellow
    [12, 236, 237],  // Cyan
    [13, 237, 13],   // Green
    [237, 13, 237],  // Magenta
    [238, 14, 13],   // Red
    [15, 15, 239],   // Blue
    [16, 16, 16],    // Black
];

/// Tolerance for RGB color matching (accounts for YUV->RGB conversion errors).
const COLOR_TOLERANCE: u8 = 15;

fn sample<S: Surface + ?Sized>(surface: &S, x: u32, y: u32) -> Result<[u8; 3]> {
    surface
        .pixel_at(x, y)
        .ok_or_else(|| CaptureError::PatternMismatch(format!("no pixel at ({x}, {y})")))
}

/// Validates that an RGB surface shows the SMPTE color bar pattern.
///
/// Checks 8 vertical stripes at their center positions, allowing for
/// YUV-to-RGB conversion inaccuracies.
///
/// # Errors
///
/// Returns `PatternMismatch` if any bar doesn't match the expected color
/// within tolerance.
pub fn validate_color_bars<S: Surface + ?Sized>(surface: &S) -> Result<()> {
    let bar_width = surface.width() / 8;
    let center_y = surface.height() / 2;

    for (bar_idx, expected) in (0u32..).zip(SMPTE_COLOR_BARS) {
        // Sample the center of each bar
        let sample_x = bar_idx * bar_width + bar_width / 2;
        let actual = sample(surface, sample_x, center_y)?;

        if !colors_match(actual, expected, COLOR_TOLERANCE) {
            return Err(CaptureError::PatternMismatch(format!(
                "color bar {bar_idx} at ({sample_x}, {center_y}): \
                 expected RGB{expected:?}, got RGB{actual:?}"
            )));
        }
    }

    Ok(())
}

/// Validates that an RGB surface shows a horizontal gradient.
///
/// Samples the center row and checks that luminance increases from left
/// to right, with a significant overall change (not a solid color).
///
/// # Errors
///
/// Returns `PatternMismatch` if luminance drops along the row or barely
/// changes across it.
pub fn validate_gradient<S: Surface + ?Sized>(surface: &S) -> Result<()> {
    let center_y = surface.height() / 2;

    // Sample every 10 pixels to check for monotonic increase
    let mut first: Option<f32> = None;
    let mut prev: Option<f32> = None;

    for x in (0..surface.width()).step_by(10) {
        let [r, g, b] = sample(surface, x, center_y)?;

        // Y' in Rec. 601
        let luminance = 0.114f32.mul_add(
            f32::from(b),
            0.587f32.mul_add(f32::from(g), 0.299 * f32::from(r)),
        );

        if let Some(prev) = prev {
            // small decreases are rounding
            if luminance < prev - 1.0 {
                return Err(CaptureError::PatternMismatch(format!(
                    "gradient drops at x={x}: luminance {luminance} < previous {prev}"
                )));
            }
        }
        first.get_or_insert(luminance);
        prev = Some(luminance);
    }

    if let (Some(first), Some(last)) = (first, prev) {
        let change = last - first;
        if change < 50.0 {
            return Err(CaptureError::PatternMismatch(format!(
                "gradient luminance changes by only {change} (expected at least 50.0)"
            )));
        }
    }

    Ok(())
}

/// Validates that frame sequence numbers increment by exactly 1.
///
/// # Errors
///
/// Returns `PatternMismatch` if the slice is empty or has a gap.
pub fn validate_frame_sequence(sequences: &[u32]) -> Result<()> {
    if sequences.is_empty() {
        return Err(CaptureError::PatternMismatch(
            "cannot validate empty frame sequence".to_owned(),
        ));
    }

    for (i, pair) in sequences.windows(2).enumerate() {
        if let &[prev, curr] = pair {
            if curr != prev.wrapping_add(1) {
                return Err(CaptureError::PatternMismatch(format!(
                    "frame sequence gap at index {}: expected {}, got {curr}",
                    i + 1,
                    prev.wrapping_add(1)
                )));
            }
        }
    }

    Ok(())
}

/// Whether every channel of `actual` is within `tolerance` of `expected`.
fn colors_match(actual: [u8; 3], expected: [u8; 3], tolerance: u8) -> bool {
    actual
        .iter()
        .zip(expected)
        .all(|(&a, e)| a.abs_diff(e) <= tolerance)
}
