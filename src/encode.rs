//! JPEG encoding from in-memory pixels.

use log::debug;

use crate::buffer::{ImageBuffer, PixelSlice};
use crate::error::{JpegError, Result};
use crate::limits::ResourceLimits;
use crate::marshal::{PerPixel, ScanlineSource};
use crate::native::{self, CompressSpec, ScratchRow};
use crate::pixel::PixelSource;

/// Quality used when none is given.
pub const DEFAULT_QUALITY: u8 = 75;

/// Per-call encode settings.
///
/// ```
/// use zencodec_libjpeg::EncodeOptions;
///
/// let options = EncodeOptions::new().with_quality(90);
/// assert_eq!(options.effective_quality(), 90);
/// assert_eq!(EncodeOptions::new().effective_quality(), 75);
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct EncodeOptions {
    /// 1..=100; `None` means [`DEFAULT_QUALITY`].
    pub quality: Option<u8>,
    pub limits: ResourceLimits,
}

impl EncodeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = Some(quality);
        self
    }

    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Quality that will be passed to the codec.
    pub fn effective_quality(&self) -> u8 {
        self.quality.unwrap_or(DEFAULT_QUALITY)
    }

    fn validated_quality(&self) -> Result<u8> {
        match self.effective_quality() {
            q @ 1..=100 => Ok(q),
            q => Err(JpegError::InvalidQuality(q)),
        }
    }
}

/// Encode an [`ImageBuffer`] as a baseline JPEG.
///
/// Gray images produce a 1-component file; RGB and RGBA produce a
/// 3-component file and alpha is discarded.
pub fn encode(image: &ImageBuffer, options: &EncodeOptions) -> Result<Vec<u8>> {
    encode_slice(image.as_slice(), options)
}

/// Encode a borrowed view, e.g. a crop or a converted `imgref` image.
pub fn encode_slice(pixels: PixelSlice<'_>, options: &EncodeOptions) -> Result<Vec<u8>> {
    encode_scanlines(&pixels, options)
}

/// Encode any [`PixelSource`] one pixel at a time.
///
/// The output is always 3-component; each channel keeps its high byte.
pub fn encode_pixels<S: PixelSource + ?Sized>(
    source: &S,
    options: &EncodeOptions,
) -> Result<Vec<u8>> {
    encode_scanlines(&PerPixel(source), options)
}

fn encode_scanlines(source: &dyn ScanlineSource, options: &EncodeOptions) -> Result<Vec<u8>> {
    let (width, height) = (source.width(), source.height());
    if width == 0 || height == 0 {
        return Err(JpegError::InvalidImageSize { width, height });
    }
    let quality = options.validated_quality()?;
    options.limits.check_dimensions(width, height)?;

    let spec = CompressSpec {
        width,
        height,
        layout: source.native_layout(),
        quality,
    };
    debug!("encoding {width}x{height} {:?} at q{quality}", spec.layout);

    let bytes = native::with_compression_context(&spec, |ctx| {
        ctx.start()?;
        let mut scratch = ScratchRow::new(ctx.row_bytes());
        for y in 0..height {
            let line = source.scanline(y, scratch.as_mut_slice());
            ctx.write_scanline(line)?;
        }
        ctx.finish()
    })?;
    options.limits.check_output(bytes.len())?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::lifecycle;
    use crate::{PixelLayout, decode, probe_header, testutil};
    use imgref::ImgVec;
    use rgb::{Rgb, Rgba};

    fn rgb_image(width: u32, height: u32) -> ImageBuffer {
        ImageBuffer::from_vec(
            testutil::gradient(width, height, 3),
            width,
            height,
            PixelLayout::Rgb8,
        )
        .unwrap()
    }

    #[test]
    fn zero_sized_images_rejected_without_codec() {
        let (created0, _) = lifecycle::counts();
        let empty = ImageBuffer::from_vec(Vec::new(), 0, 5, PixelLayout::Rgb8).unwrap();
        assert_eq!(
            encode(&empty, &EncodeOptions::new()).unwrap_err(),
            JpegError::InvalidImageSize {
                width: 0,
                height: 5
            }
        );
        let empty = ImageBuffer::from_vec(Vec::new(), 5, 0, PixelLayout::Gray8).unwrap();
        assert!(matches!(
            encode(&empty, &EncodeOptions::new()),
            Err(JpegError::InvalidImageSize { .. })
        ));
        assert_eq!(lifecycle::counts().0, created0);
    }

    #[test]
    fn quality_range_enforced() {
        let image = rgb_image(8, 8);
        for q in [0, 101, 255] {
            assert_eq!(
                encode(&image, &EncodeOptions::new().with_quality(q)).unwrap_err(),
                JpegError::InvalidQuality(q)
            );
        }
        assert!(encode(&image, &EncodeOptions::new().with_quality(1)).is_ok());
        assert!(encode(&image, &EncodeOptions::new().with_quality(100)).is_ok());
    }

    #[test]
    fn default_quality_is_75() {
        let image = rgb_image(32, 32);
        let default = encode(&image, &EncodeOptions::new()).unwrap();
        let explicit = encode(&image, &EncodeOptions::new().with_quality(75)).unwrap();
        assert_eq!(default, explicit);
    }

    #[test]
    fn encode_is_deterministic() {
        let image = rgb_image(48, 40);
        let options = EncodeOptions::new().with_quality(90);
        let first = encode(&image, &options).unwrap();
        assert_eq!(&first[..2], &[0xFF, 0xD8]);
        assert_eq!(first, encode(&image, &options).unwrap());
    }

    #[test]
    fn gray_encodes_one_component() {
        let image = ImageBuffer::from_vec(
            testutil::gradient(16, 16, 1),
            16,
            16,
            PixelLayout::Gray8,
        )
        .unwrap();
        let jpeg = encode(&image, &EncodeOptions::new()).unwrap();
        let info = probe_header(&jpeg).unwrap();
        assert_eq!(info.components, 1);
        assert_eq!(decode(&jpeg).unwrap().layout(), PixelLayout::Gray8);
    }

    #[test]
    fn rgba_alpha_is_ignored() {
        let mut opaque = Vec::new();
        let mut translucent = Vec::new();
        for (i, px) in testutil::gradient(16, 16, 3).chunks_exact(3).enumerate() {
            opaque.extend_from_slice(px);
            opaque.push(255);
            translucent.extend_from_slice(px);
            translucent.push(i as u8);
        }
        let a = ImageBuffer::from_vec(opaque, 16, 16, PixelLayout::Rgba8).unwrap();
        let b = ImageBuffer::from_vec(translucent, 16, 16, PixelLayout::Rgba8).unwrap();
        let options = EncodeOptions::new();
        let a = encode(&a, &options).unwrap();
        assert_eq!(a, encode(&b, &options).unwrap());
        assert_eq!(probe_header(&a).unwrap().components, 3);
    }

    #[test]
    fn rgba_matches_rgb() {
        let rgb = rgb_image(24, 24);
        let rgba = ImageBuffer::from_vec(
            rgb.to_rgba8()
                .buf()
                .iter()
                .flat_map(|p| [p.r, p.g, p.b, p.a])
                .collect(),
            24,
            24,
            PixelLayout::Rgba8,
        )
        .unwrap();
        let options = EncodeOptions::new().with_quality(80);
        assert_eq!(
            encode(&rgb, &options).unwrap(),
            encode(&rgba, &options).unwrap()
        );
    }

    #[test]
    fn per_pixel_path_matches_fast_path() {
        let image = rgb_image(20, 12);
        let options = EncodeOptions::new();
        let fast = encode(&image, &options).unwrap();
        let slow = encode_pixels(&image, &options).unwrap();
        assert_eq!(fast, slow);
    }

    #[test]
    fn rgb16_source_encodes() {
        let pixels: Vec<Rgba<u16>> = (0..64u16)
            .map(|i| Rgba {
                r: i * 1000,
                g: 0x8000,
                b: 0xFFFF - i * 500,
                a: 0,
            })
            .collect();
        let img = ImgVec::new(pixels, 8, 8);
        let jpeg = encode_pixels(&img.as_ref(), &EncodeOptions::new()).unwrap();
        let decoded = decode(&jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (8, 8));
        assert_eq!(decoded.layout(), PixelLayout::Rgba8);
    }

    #[test]
    fn cropped_view_encodes() {
        let image = rgb_image(64, 64);
        let crop = image.crop_view(10, 20, 16, 8);
        let jpeg = encode_slice(crop, &EncodeOptions::new()).unwrap();
        let info = probe_header(&jpeg).unwrap();
        assert_eq!((info.width, info.height), (16, 8));
        let copied = encode(&image.crop_copy(10, 20, 16, 8), &EncodeOptions::new()).unwrap();
        assert_eq!(jpeg, copied);
    }

    #[test]
    fn imgref_slice_encodes() {
        let img = ImgVec::new(vec![Rgb { r: 10u8, g: 200, b: 30 }; 64], 8, 8);
        let jpeg = encode_slice(img.as_ref().into(), &EncodeOptions::new()).unwrap();
        assert_eq!(probe_header(&jpeg).unwrap().components, 3);
    }

    #[test]
    fn output_limit() {
        let image = rgb_image(32, 32);
        let err = encode(
            &image,
            &EncodeOptions::new().with_limits(ResourceLimits::none().with_max_output_bytes(16)),
        )
        .unwrap_err();
        assert!(matches!(err, JpegError::Limit(_)), "{err:?}");
    }

    #[test]
    fn round_trip_is_close() {
        let smooth: Vec<u8> = (0..32u32)
            .flat_map(|y| (0..32u32).flat_map(move |x| [(x * 4) as u8, (y * 4) as u8, 128]))
            .collect();
        let image = ImageBuffer::from_vec(smooth, 32, 32, PixelLayout::Rgb8).unwrap();
        let jpeg = encode(&image, &EncodeOptions::new().with_quality(95)).unwrap();
        let decoded = decode(&jpeg).unwrap();
        let mut total = 0u64;
        for y in 0..32 {
            for (a, b) in image.row(y).chunks_exact(3).zip(decoded.row(y).chunks_exact(4)) {
                for c in 0..3 {
                    total += u64::from(a[c].abs_diff(b[c]));
                }
            }
        }
        let mean = total as f64 / (32.0 * 32.0 * 3.0);
        assert!(mean < 4.0, "mean abs error {mean}");
    }
}
