//! Fixture generators shared by the unit tests.

use crate::native::{self, CompressSpec, NativeLayout};

/// Deterministic gradient with `components` bytes per pixel.
pub(crate) fn gradient(width: u32, height: u32, components: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(width as usize * height as usize * components);
    for y in 0..height {
        for x in 0..width {
            for c in 0..components {
                out.push((x * 7 + y * 13 + c as u32 * 40) as u8);
            }
        }
    }
    out
}

/// Compress packed rows in `layout` straight through the native adapter.
pub(crate) fn compress(
    pixels: &[u8],
    width: u32,
    height: u32,
    layout: NativeLayout,
    quality: u8,
) -> Vec<u8> {
    let spec = CompressSpec {
        width,
        height,
        layout,
        quality,
    };
    native::with_compression_context(&spec, |ctx| {
        ctx.start()?;
        for row in pixels.chunks_exact(ctx.row_bytes()) {
            ctx.write_scanline(row)?;
        }
        ctx.finish()
    })
    .expect("fixture compresses")
}

pub(crate) fn gray_jpeg(width: u32, height: u32, quality: u8) -> Vec<u8> {
    compress(&gradient(width, height, 1), width, height, NativeLayout::Gray, quality)
}

pub(crate) fn rgb_jpeg(width: u32, height: u32, quality: u8) -> Vec<u8> {
    compress(&gradient(width, height, 3), width, height, NativeLayout::Rgb, quality)
}

/// Four-component (Adobe CMYK) JPEG of a single flat color.
pub(crate) fn flat_cmyk_jpeg(width: u32, height: u32, cmyk: [u8; 4]) -> Vec<u8> {
    let pixels: Vec<u8> = cmyk
        .iter()
        .copied()
        .cycle()
        .take(width as usize * height as usize * 4)
        .collect();
    compress(&pixels, width, height, NativeLayout::Cmyk, 100)
}

/// SOI, baseline SOF0 (16x16, 8-bit) with `components` components, then
/// a matching SOS and EOI. No tables, so only the header is readable.
pub(crate) fn synthetic_header(components: u8) -> Vec<u8> {
    let n = components as usize;
    let mut out = vec![0xFF, 0xD8];

    out.extend_from_slice(&[0xFF, 0xC0]);
    out.extend_from_slice(&((8 + 3 * n) as u16).to_be_bytes());
    out.extend_from_slice(&[8, 0, 16, 0, 16, components]);
    for id in 1..=components {
        out.extend_from_slice(&[id, 0x11, 0]);
    }

    out.extend_from_slice(&[0xFF, 0xDA]);
    out.extend_from_slice(&((6 + 2 * n) as u16).to_be_bytes());
    out.push(components);
    for id in 1..=components {
        out.extend_from_slice(&[id, 0]);
    }
    out.extend_from_slice(&[0, 63, 0]);

    out.extend_from_slice(&[0x00; 16]);
    out.extend_from_slice(&[0xFF, 0xD9]);
    out
}

/// Offset of the first marker `code` (the byte after 0xFF).
fn marker_offset(jpeg: &[u8], code: u8) -> usize {
    jpeg.windows(2)
        .position(|w| w == [0xFF, code])
        .expect("marker present")
}

/// `jpeg` with its SOF0 frame header rewritten to claim `width` x `height`.
pub(crate) fn with_frame_size(jpeg: &[u8], width: u16, height: u16) -> Vec<u8> {
    let sof = marker_offset(jpeg, 0xC0);
    let mut out = jpeg.to_vec();
    // FF C0, length (2), precision (1), height (2), width (2).
    out[sof + 5..sof + 7].copy_from_slice(&height.to_be_bytes());
    out[sof + 7..sof + 9].copy_from_slice(&width.to_be_bytes());
    out
}

/// `jpeg` cut off halfway through its entropy-coded scan data.
pub(crate) fn truncated_scan(jpeg: &[u8]) -> &[u8] {
    let sos = marker_offset(jpeg, 0xDA);
    &jpeg[..sos + (jpeg.len() - sos) / 2]
}
