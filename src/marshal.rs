//! Row conversion between codec scanlines and caller pixels.
//!
//! Decode side: [`RowConversion`] turns one native scanline into one
//! destination row. Encode side: [`ScanlineSource`] produces native
//! scanlines, borrowing the caller's row directly when the layouts agree.

use crate::buffer::{PixelLayout, PixelSlice};
use crate::native::NativeLayout;
use crate::pixel::PixelSource;

// ---------------------------------------------------------------------------
// Decode direction
// ---------------------------------------------------------------------------

/// How a decoded scanline lands in the destination row.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum RowConversion {
    /// The codec already produced the destination layout.
    Passthrough,
    /// Inverted CMYK to RGBA with A=255.
    InvertedCmykToRgba,
    /// Inverted CMYK to packed RGB.
    InvertedCmykToRgb,
}

impl RowConversion {
    /// Whether the codec can write straight into the destination row.
    #[inline]
    pub(crate) fn is_passthrough(self) -> bool {
        self == Self::Passthrough
    }

    /// Convert one scanline. `src` holds exactly one native row.
    pub(crate) fn apply(self, src: &[u8], dst: &mut [u8]) {
        match self {
            Self::Passthrough => dst.copy_from_slice(&src[..dst.len()]),
            Self::InvertedCmykToRgba => inverted_cmyk_to_rgba(src, dst),
            Self::InvertedCmykToRgb => inverted_cmyk_to_rgb(src, dst),
        }
    }
}

/// One channel of Adobe-style inverted CMYK: `value * k / 255`, truncated.
///
/// Stored bytes are `255 - ink`, so a K byte of 0 is full black and zeroes
/// every channel.
#[inline]
pub(crate) fn inverted_cmyk_channel(value: u8, k: u8) -> u8 {
    (u32::from(value) * u32::from(k) / 255) as u8
}

fn inverted_cmyk_to_rgba(src: &[u8], dst: &mut [u8]) {
    for (cmyk, rgba) in src.chunks_exact(4).zip(dst.chunks_exact_mut(4)) {
        let k = cmyk[3];
        rgba[0] = inverted_cmyk_channel(cmyk[0], k);
        rgba[1] = inverted_cmyk_channel(cmyk[1], k);
        rgba[2] = inverted_cmyk_channel(cmyk[2], k);
        rgba[3] = 255;
    }
}

fn inverted_cmyk_to_rgb(src: &[u8], dst: &mut [u8]) {
    for (cmyk, rgb) in src.chunks_exact(4).zip(dst.chunks_exact_mut(3)) {
        let k = cmyk[3];
        rgb[0] = inverted_cmyk_channel(cmyk[0], k);
        rgb[1] = inverted_cmyk_channel(cmyk[1], k);
        rgb[2] = inverted_cmyk_channel(cmyk[2], k);
    }
}

// ---------------------------------------------------------------------------
// Encode direction
// ---------------------------------------------------------------------------

/// Something the encoder can pull native scanlines from, top to bottom.
pub(crate) trait ScanlineSource {
    fn width(&self) -> u32;

    fn height(&self) -> u32;

    /// Layout handed to the codec: [`NativeLayout::Gray`] or [`NativeLayout::Rgb`].
    fn native_layout(&self) -> NativeLayout;

    /// Scanline `y` in [`native_layout`](Self::native_layout).
    ///
    /// Either borrows the caller's row or fills `scratch` and returns it.
    fn scanline<'s>(&'s self, y: u32, scratch: &'s mut [u8]) -> &'s [u8];
}

impl ScanlineSource for PixelSlice<'_> {
    fn width(&self) -> u32 {
        PixelSlice::width(self)
    }

    fn height(&self) -> u32 {
        self.rows()
    }

    fn native_layout(&self) -> NativeLayout {
        match self.layout() {
            PixelLayout::Gray8 => NativeLayout::Gray,
            PixelLayout::Rgb8 | PixelLayout::Rgba8 => NativeLayout::Rgb,
        }
    }

    fn scanline<'s>(&'s self, y: u32, scratch: &'s mut [u8]) -> &'s [u8] {
        let row = self.row(y);
        match self.layout() {
            PixelLayout::Gray8 | PixelLayout::Rgb8 => row,
            PixelLayout::Rgba8 => {
                drop_alpha(row, scratch);
                scratch
            }
        }
    }
}

fn drop_alpha(rgba: &[u8], rgb: &mut [u8]) {
    for (src, dst) in rgba.chunks_exact(4).zip(rgb.chunks_exact_mut(3)) {
        dst.copy_from_slice(&src[..3]);
    }
}

/// Per-pixel fallback over any [`PixelSource`].
pub(crate) struct PerPixel<'a, S: ?Sized>(pub &'a S);

impl<S: PixelSource + ?Sized> ScanlineSource for PerPixel<'_, S> {
    fn width(&self) -> u32 {
        self.0.width()
    }

    fn height(&self) -> u32 {
        self.0.height()
    }

    fn native_layout(&self) -> NativeLayout {
        NativeLayout::Rgb
    }

    fn scanline<'s>(&'s self, y: u32, scratch: &'s mut [u8]) -> &'s [u8] {
        for (x, dst) in (0..self.0.width()).zip(scratch.chunks_exact_mut(3)) {
            let px = self.0.rgba16(x, y);
            dst[0] = (px.r >> 8) as u8;
            dst[1] = (px.g >> 8) as u8;
            dst[2] = (px.b >> 8) as u8;
        }
        scratch
    }
}
