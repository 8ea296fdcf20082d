//! Source unpackers.
//!
//! Each function walks a raw frame once in raster order and hands every
//! pixel's three samples to `emit`: R, G, B for RGB-family sources and
//! Y, U, V for luma/chroma sources. Callers check the source length first.

/// Chroma used when a 4:2:2 frame ends on half a pixel pair.
const NEUTRAL_CHROMA: u8 = 128;

/// Packed Y0 U Y1 V.
pub fn yuyv<F: FnMut([u8; 3])>(src: &[u8], pixels: usize, mut emit: F) {
    let mut remaining = pixels;
    let chunks = src.chunks_exact(4);
    let tail = chunks.remainder();
    for chunk in chunks {
        let &[y0, u, y1, v] = chunk else { continue };
        for y in [y0, y1] {
            if remaining == 0 {
                return;
            }
            emit([y, u, v]);
            remaining -= 1;
        }
    }
    if remaining > 0 {
        if let &[y0, u, ..] = tail {
            emit([y0, u, NEUTRAL_CHROMA]);
        }
    }
}

/// Packed U Y0 V Y1.
pub fn uyvy<F: FnMut([u8; 3])>(src: &[u8], pixels: usize, mut emit: F) {
    let mut remaining = pixels;
    let chunks = src.chunks_exact(4);
    let tail = chunks.remainder();
    for chunk in chunks {
        let &[u, y0, v, y1] = chunk else { continue };
        for y in [y0, y1] {
            if remaining == 0 {
                return;
            }
            emit([y, u, v]);
            remaining -= 1;
        }
    }
    if remaining > 0 {
        if let &[u, y0, ..] = tail {
            emit([y0, u, NEUTRAL_CHROMA]);
        }
    }
}

/// 24-bit R G B.
pub fn rgb24<F: FnMut([u8; 3])>(src: &[u8], pixels: usize, mut emit: F) {
    for chunk in src.chunks_exact(3).take(pixels) {
        if let &[r, g, b] = chunk {
            emit([r, g, b]);
        }
    }
}

/// 32-bit B G R X.
pub fn xbgr32<F: FnMut([u8; 3])>(src: &[u8], pixels: usize, mut emit: F) {
    for chunk in src.chunks_exact(4).take(pixels) {
        if let &[b, g, r, _] = chunk {
            emit([r, g, b]);
        }
    }
}

/// 16-bit little-endian `xxxxrrrr ggggbbbb`; each nibble becomes the high
/// half of its channel.
pub fn rgb444<F: FnMut([u8; 3])>(src: &[u8], pixels: usize, mut emit: F) {
    for chunk in src.chunks_exact(2).take(pixels) {
        if let &[lo, hi] = chunk {
            emit([(hi & 0x0F) << 4, lo & 0xF0, (lo & 0x0F) << 4]);
        }
    }
}

/// Planar 4:2:0. Each chroma sample covers a 2x2 luma block.
pub fn yuv420<F: FnMut([u8; 3])>(src: &[u8], width: u32, height: u32, mut emit: F) {
    let width = width as usize;
    let height = height as usize;
    if width == 0 || height == 0 {
        return;
    }
    let chroma_width = width.div_ceil(2);
    let chroma_len = chroma_width * height.div_ceil(2);

    let Some((luma, chroma)) = src.split_at_checked(width * height) else {
        return;
    };
    let Some((u_plane, rest)) = chroma.split_at_checked(chroma_len) else {
        return;
    };
    let v_plane = rest.get(..chroma_len).unwrap_or_default();

    for (row, luma_row) in luma.chunks_exact(width).enumerate() {
        let start = (row / 2) * chroma_width;
        let u_row = u_plane.get(start..start + chroma_width).unwrap_or_default();
        let v_row = v_plane.get(start..start + chroma_width).unwrap_or_default();
        for (col, &y) in luma_row.iter().enumerate() {
            let u = u_row.get(col / 2).copied().unwrap_or(NEUTRAL_CHROMA);
            let v = v_row.get(col / 2).copied().unwrap_or(NEUTRAL_CHROMA);
            emit([y, u, v]);
        }
    }
}

/// Bayer mosaic with BGGR tiles:
///
/// ```text
/// B G B G
/// G R G R
/// ```
///
/// Missing channels are the mean of the nearest same-color neighbours that
/// lie inside the frame.
pub fn sbggr8<F: FnMut([u8; 3])>(src: &[u8], width: u32, height: u32, mut emit: F) {
    let mosaic = Mosaic {
        src,
        width: i64::from(width),
        height: i64::from(height),
    };

    for y in 0..mosaic.height {
        for x in 0..mosaic.width {
            let here = mosaic.sample(x, y).unwrap_or(0);
            let rgb = match (y % 2 == 0, x % 2 == 0) {
                // blue site
                (true, true) => [mosaic.diagonal(x, y), mosaic.cross(x, y), here],
                // green site on a blue row: blue left/right, red above/below
                (true, false) => [mosaic.vertical(x, y), here, mosaic.horizontal(x, y)],
                // green site on a red row: red left/right, blue above/below
                (false, true) => [mosaic.horizontal(x, y), here, mosaic.vertical(x, y)],
                // red site
                (false, false) => [here, mosaic.cross(x, y), mosaic.diagonal(x, y)],
            };
            emit(rgb);
        }
    }
}

struct Mosaic<'a> {
    src: &'a [u8],
    width: i64,
    height: i64,
}

impl Mosaic<'_> {
    fn sample(&self, x: i64, y: i64) -> Option<u8> {
        if x < 0 || y < 0 || x >= self.width || y >= self.height {
            return None;
        }
        let index = usize::try_from(y * self.width + x).ok()?;
        self.src.get(index).copied()
    }

    fn mean<const N: usize>(&self, points: [(i64, i64); N]) -> u8 {
        let (sum, count) = points
            .iter()
            .filter_map(|&(x, y)| self.sample(x, y))
            .fold((0u32, 0u32), |(sum, count), s| (sum + u32::from(s), count + 1));
        if count == 0 {
            0
        } else {
            u8::try_from(sum / count).unwrap_or(u8::MAX)
        }
    }

    fn horizontal(&self, x: i64, y: i64) -> u8 {
        self.mean([(x - 1, y), (x + 1, y)])
    }

    fn vertical(&self, x: i64, y: i64) -> u8 {
        self.mean([(x, y - 1), (x, y + 1)])
    }

    fn cross(&self, x: i64, y: i64) -> u8 {
        self.mean([(x - 1, y), (x + 1, y), (x, y - 1), (x, y + 1)])
    }

    fn diagonal(&self, x: i64, y: i64) -> u8 {
        self.mean([(x - 1, y - 1), (x + 1, y - 1), (x - 1, y + 1), (x + 1, y + 1)])
    }
}
