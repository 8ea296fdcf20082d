//! Per-pixel color math. Every result is saturated to `0..=255`.

/// Clamp a computed channel to the representable range.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub const fn saturate(value: i32) -> u8 {
    if value < 0 {
        0
    } else if value > 255 {
        255
    } else {
        value as u8
    }
}

/// Convert Y, U, V to R, G, B.
///
/// ITU-R BT.601 in 8.8 fixed point:
/// `R = Y + 1.402 V'`, `G = Y - 0.344 U' - 0.714 V'`, `B = Y + 1.772 U'`
/// where `U' = U - 128` and `V' = V - 128`.
#[must_use]
pub const fn yuv_to_rgb([y, u, v]: [u8; 3]) -> [u8; 3] {
    let y = y as i32;
    let u = u as i32 - 128;
    let v = v as i32 - 128;

    let r = y + ((359 * v) >> 8);
    let g = y - ((88 * u + 183 * v) >> 8);
    let b = y + ((454 * u) >> 8);

    [saturate(r), saturate(g), saturate(b)]
}

/// Convert R, G, B to studio-range Y, U, V (Y in 16..=235, chroma centred on 128).
#[must_use]
pub const fn rgb_to_yuv([r, g, b]: [u8; 3]) -> [u8; 3] {
    let r = r as i32;
    let g = g as i32;
    let b = b as i32;

    let y = (8453 * r + 16594 * g + 3223 * b + 524_288) >> 15;
    let u = (-4878 * r - 9578 * g + 14456 * b + 4_210_688) >> 15;
    let v = (14456 * r - 12105 * g - 2351 * b + 4_210_688) >> 15;

    [saturate(y), saturate(u), saturate(v)]
}

/// Convert R, G, B to H, S, V with hue scaled to a 256-step circle.
#[must_use]
pub const fn rgb_to_hsv([r, g, b]: [u8; 3]) -> [u8; 3] {
    let r = r as i32;
    let g = g as i32;
    let b = b as i32;

    let max = max3(r, g, b);
    let min = min3(r, g, b);
    let delta = max - min;

    let s = if max == 0 { 0 } else { 255 * delta / max };
    let mut h = if delta == 0 {
        0
    } else if max == r {
        43 * (g - b) / delta
    } else if max == g {
        85 + 43 * (b - r) / delta
    } else {
        171 + 43 * (r - g) / delta
    };
    // hue is an angle: negative values wrap around the circle
    if h < 0 {
        h += 256;
    }

    [saturate(h), saturate(s), saturate(max)]
}

/// YUV to HSV through RGB.
#[must_use]
pub const fn yuv_to_hsv(yuv: [u8; 3]) -> [u8; 3] {
    rgb_to_hsv(yuv_to_rgb(yuv))
}

pub(crate) const fn identity(px: [u8; 3]) -> [u8; 3] {
    px
}

const fn max3(a: i32, b: i32, c: i32) -> i32 {
    let ab = if a > b { a } else { b };
    if ab > c {
        ab
    } else {
        c
    }
}

const fn min3(a: i32, b: i32, c: i32) -> i32 {
    let ab = if a < b { a } else { b };
    if ab < c {
        ab
    } else {
        c
    }
}
