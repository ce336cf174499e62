//! Typed pixel interop.
//!
//! 8-bit `imgref` images borrow straight into a [`PixelSlice`]; anything
//! else can be encoded through [`PixelSource`], which reads one pixel at a
//! time with 16-bit channels.

use imgref::{ImgRef, ImgVec};
use rgb::{AsPixels as _, ComponentBytes as _, Gray, Rgb, Rgba};

use crate::buffer::{ImageBuffer, PixelLayout, PixelSlice};

/// An image that can only be read one pixel at a time.
///
/// This is the slow path of [`encode_pixels`](crate::encode_pixels): the
/// encoder keeps the high byte of each channel and ignores alpha.
pub trait PixelSource {
    /// Width in pixels.
    fn width(&self) -> u32;

    /// Height in pixels.
    fn height(&self) -> u32;

    /// Color of the pixel at `(x, y)`, channels scaled to `0..=65535`.
    fn rgba16(&self, x: u32, y: u32) -> Rgba<u16>;
}

macro_rules! impl_pixel_source_16 {
    ($pixel:ty, |$p:ident| $to_rgba:expr) => {
        impl PixelSource for ImgRef<'_, $pixel> {
            fn width(&self) -> u32 {
                imgref::Img::width(self) as u32
            }

            fn height(&self) -> u32 {
                imgref::Img::height(self) as u32
            }

            fn rgba16(&self, x: u32, y: u32) -> Rgba<u16> {
                let $p = self.buf()[y as usize * self.stride() + x as usize];
                $to_rgba
            }
        }
    };
}

impl_pixel_source_16!(Rgb<u16>, |p| Rgba {
    r: p.r,
    g: p.g,
    b: p.b,
    a: u16::MAX
});
impl_pixel_source_16!(Rgba<u16>, |p| p);
impl_pixel_source_16!(Gray<u16>, |p| {
    let v = p.value();
    Rgba {
        r: v,
        g: v,
        b: v,
        a: u16::MAX,
    }
});

/// Widen 8-bit channels the way 16-bit color models do (`v * 0x101`).
#[inline]
fn widen(v: u8) -> u16 {
    u16::from(v) * 0x101
}

impl PixelSource for ImageBuffer {
    fn width(&self) -> u32 {
        ImageBuffer::width(self)
    }

    fn height(&self) -> u32 {
        ImageBuffer::height(self)
    }

    fn rgba16(&self, x: u32, y: u32) -> Rgba<u16> {
        let bpp = self.layout().bytes_per_pixel();
        let px = &self.row(y)[x as usize * bpp..][..bpp];
        match self.layout() {
            PixelLayout::Gray8 => {
                let v = widen(px[0]);
                Rgba {
                    r: v,
                    g: v,
                    b: v,
                    a: u16::MAX,
                }
            }
            PixelLayout::Rgb8 => Rgba {
                r: widen(px[0]),
                g: widen(px[1]),
                b: widen(px[2]),
                a: u16::MAX,
            },
            PixelLayout::Rgba8 => Rgba {
                r: widen(px[0]),
                g: widen(px[1]),
                b: widen(px[2]),
                a: widen(px[3]),
            },
        }
    }
}

macro_rules! impl_from_imgref {
    ($pixel:ty, $layout:expr) => {
        impl<'a> From<ImgRef<'a, $pixel>> for PixelSlice<'a> {
            fn from(img: ImgRef<'a, $pixel>) -> Self {
                let bpp = $layout.bytes_per_pixel();
                PixelSlice::from_parts(
                    img.buf().as_bytes(),
                    img.width() as u32,
                    img.height() as u32,
                    img.stride() * bpp,
                    $layout,
                )
            }
        }
    };
}

impl_from_imgref!(Gray<u8>, PixelLayout::Gray8);
impl_from_imgref!(Rgb<u8>, PixelLayout::Rgb8);
impl_from_imgref!(Rgba<u8>, PixelLayout::Rgba8);

impl ImageBuffer {
    /// Borrow as RGBA8 if that's the layout and the stride is whole pixels.
    pub fn as_rgba8(&self) -> Option<ImgRef<'_, Rgba<u8>>> {
        self.typed_view(PixelLayout::Rgba8)
    }

    /// Borrow as RGB8 if that's the layout and the stride is whole pixels.
    pub fn as_rgb8(&self) -> Option<ImgRef<'_, Rgb<u8>>> {
        self.typed_view(PixelLayout::Rgb8)
    }

    /// Borrow as Gray8 if that's the layout.
    pub fn as_gray8(&self) -> Option<ImgRef<'_, Gray<u8>>> {
        self.typed_view(PixelLayout::Gray8)
    }

    fn typed_view<P>(&self, layout: PixelLayout) -> Option<ImgRef<'_, P>>
    where
        [u8]: rgb::AsPixels<P>,
    {
        let bpp = layout.bytes_per_pixel();
        if self.layout() != layout || self.stride() % bpp != 0 || self.height() == 0 {
            return None;
        }
        let stride = self.stride() / bpp;
        let used =
            (self.height() as usize - 1) * self.stride() + layout.packed_stride(self.width());
        let pixels: &[P] = self.as_bytes()[..used].as_pixels();
        Some(ImgRef::new_stride(
            pixels,
            self.width() as usize,
            self.height() as usize,
            stride,
        ))
    }

    /// Convert to RGB8, allocating a new buffer.
    ///
    /// Gray is expanded with R=G=B; alpha is discarded.
    pub fn to_rgb8(&self) -> ImgVec<Rgb<u8>> {
        let mut out: Vec<Rgb<u8>> =
            Vec::with_capacity(self.width() as usize * self.height() as usize);
        for y in 0..self.height() {
            let row = self.row(y);
            match self.layout() {
                PixelLayout::Gray8 => out.extend(row.iter().map(|&v| Rgb { r: v, g: v, b: v })),
                PixelLayout::Rgb8 => out.extend_from_slice(row.as_pixels()),
                PixelLayout::Rgba8 => out.extend(row.chunks_exact(4).map(|p| Rgb {
                    r: p[0],
                    g: p[1],
                    b: p[2],
                })),
            }
        }
        ImgVec::new(out, self.width() as usize, self.height() as usize)
    }

    /// Convert to RGBA8, allocating a new buffer.
    ///
    /// Gray and RGB get A=255.
    pub fn to_rgba8(&self) -> ImgVec<Rgba<u8>> {
        let mut out: Vec<Rgba<u8>> =
            Vec::with_capacity(self.width() as usize * self.height() as usize);
        for y in 0..self.height() {
            let row = self.row(y);
            match self.layout() {
                PixelLayout::Gray8 => out.extend(row.iter().map(|&v| Rgba {
                    r: v,
                    g: v,
                    b: v,
                    a: 255,
                })),
                PixelLayout::Rgb8 => out.extend(row.chunks_exact(3).map(|p| Rgba {
                    r: p[0],
                    g: p[1],
                    b: p[2],
                    a: 255,
                })),
                PixelLayout::Rgba8 => out.extend_from_slice(row.as_pixels()),
            }
        }
        ImgVec::new(out, self.width() as usize, self.height() as usize)
    }
}
