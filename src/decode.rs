//! JPEG decoding into an [`ImageBuffer`].

use log::debug;

use crate::buffer::{ImageBuffer, PixelLayout, RowBuilder};
use crate::error::{JpegError, Result};
use crate::info::JpegHeaderInfo;
use crate::limits::ResourceLimits;
use crate::marshal::RowConversion;
use crate::native::{self, NativeLayout, ScratchRow};

/// Shortest input worth handing to the codec (an SOI marker).
const MIN_INPUT_LEN: usize = 2;

/// Layout requested for 3- and 4-component images.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum OutputPreference {
    /// Grayscale stays [`Gray8`](PixelLayout::Gray8); color decodes to
    /// [`Rgba8`](PixelLayout::Rgba8) with opaque alpha.
    #[default]
    Auto,
    /// Grayscale stays [`Gray8`](PixelLayout::Gray8); color decodes to
    /// packed [`Rgb8`](PixelLayout::Rgb8).
    PackedRgb,
}

/// Per-call decode settings.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct DecodeOptions {
    pub limits: ResourceLimits,
    pub output: OutputPreference,
}

impl DecodeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_output(mut self, output: OutputPreference) -> Self {
        self.output = output;
        self
    }
}

/// Native request and conversion chosen from the header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct DecodeStrategy {
    native: NativeLayout,
    target: PixelLayout,
    conversion: RowConversion,
}

impl DecodeStrategy {
    fn select(components: u8, output: OutputPreference) -> Result<Self> {
        let (native, target, conversion) = match (components, output) {
            (1, _) => (NativeLayout::Gray, PixelLayout::Gray8, RowConversion::Passthrough),
            (3, OutputPreference::Auto) => (
                NativeLayout::ExtRgba,
                PixelLayout::Rgba8,
                RowConversion::Passthrough,
            ),
            (3, OutputPreference::PackedRgb) => {
                (NativeLayout::Rgb, PixelLayout::Rgb8, RowConversion::Passthrough)
            }
            (4, OutputPreference::Auto) => (
                NativeLayout::Cmyk,
                PixelLayout::Rgba8,
                RowConversion::InvertedCmykToRgba,
            ),
            (4, OutputPreference::PackedRgb) => (
                NativeLayout::Cmyk,
                PixelLayout::Rgb8,
                RowConversion::InvertedCmykToRgb,
            ),
            (n, _) => return Err(JpegError::UnsupportedComponentCount(n)),
        };
        Ok(Self {
            native,
            target,
            conversion,
        })
    }
}

fn check_input(data: &[u8]) -> Result<()> {
    if data.len() < MIN_INPUT_LEN {
        return Err(JpegError::InvalidInput { len: data.len() });
    }
    Ok(())
}

/// Decode a complete JPEG held in memory.
///
/// Grayscale files come back as [`Gray8`](PixelLayout::Gray8), everything
/// else as [`Rgba8`](PixelLayout::Rgba8) with alpha 255. Four-component
/// files are treated as Adobe-inverted CMYK.
///
/// ```no_run
/// let bytes = std::fs::read("photo.jpg")?;
/// let image = zencodec_libjpeg::decode(&bytes)?;
/// println!("{}x{}", image.width(), image.height());
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub fn decode(data: &[u8]) -> Result<ImageBuffer> {
    decode_with(data, &DecodeOptions::default())
}

/// [`decode`] with explicit limits and output layout.
pub fn decode_with(data: &[u8], options: &DecodeOptions) -> Result<ImageBuffer> {
    check_input(data)?;
    options.limits.check_input(data.len())?;

    native::with_decompression_context(data, |ctx| {
        let header = ctx.read_header()?;
        let strategy = DecodeStrategy::select(header.components, options.output)?;
        options
            .limits
            .check_frame(header.width, header.height, strategy.target)?;
        debug!(
            "decoding {}x{} {} ({} components) as {:?}",
            header.width, header.height, header.color_space, header.components, strategy.target
        );

        let (width, height) = ctx.start(strategy.native)?;
        let mut rows = RowBuilder::try_new(width, height, strategy.target)?;
        if strategy.conversion.is_passthrough() {
            for _ in 0..height {
                ctx.read_scanline(rows.push_row())?;
            }
        } else {
            let mut scratch = ScratchRow::new(ctx.row_bytes());
            for _ in 0..height {
                ctx.read_scanline(scratch.as_mut_slice())?;
                strategy
                    .conversion
                    .apply(scratch.as_slice(), rows.push_row());
            }
        }
        ctx.finish()?;
        Ok(rows.finish())
    })
}

/// Read dimensions, component count and colorspace without decoding pixels.
pub fn probe_header(data: &[u8]) -> Result<JpegHeaderInfo> {
    check_input(data)?;
    native::with_decompression_context(data, |ctx| ctx.read_header())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferError;
    use crate::info::NativeColorSpace;
    use crate::native::lifecycle;
    use crate::testutil;

    #[test]
    fn empty_and_one_byte_inputs() {
        assert_eq!(decode(&[]).unwrap_err(), JpegError::InvalidInput { len: 0 });
        assert_eq!(
            decode(&[0xFF]).unwrap_err(),
            JpegError::InvalidInput { len: 1 }
        );
        assert_eq!(
            probe_header(&[]).unwrap_err(),
            JpegError::InvalidInput { len: 0 }
        );
    }

    #[test]
    fn garbage_is_header_error() {
        let err = decode(b"GIF89a not a jpeg at all").unwrap_err();
        assert!(matches!(err, JpegError::CodecHeader(_)), "{err:?}");
    }

    #[test]
    fn stream_cut_before_scan_is_header_error() {
        let jpeg = testutil::rgb_jpeg(32, 32, 80);
        let err = decode(&jpeg[..20]).unwrap_err();
        assert!(matches!(err, JpegError::CodecHeader(_)), "{err:?}");
    }

    #[test]
    fn truncated_scan_data_is_an_error() {
        let fixtures = [
            testutil::gray_jpeg(64, 64, 90),
            testutil::rgb_jpeg(64, 64, 90),
            testutil::flat_cmyk_jpeg(64, 64, [30, 60, 90, 120]),
        ];
        for jpeg in &fixtures {
            assert!(decode(jpeg).is_ok());
            let half = testutil::truncated_scan(jpeg);
            let (created0, destroyed0) = lifecycle::counts();
            let err = decode(half).unwrap_err();
            let JpegError::CodecFatal(message) = &err else {
                panic!("expected a codec error, got {err:?}");
            };
            assert!(message.contains("Premature end of JPEG file"), "{message}");
            let (created, destroyed) = lifecycle::counts();
            assert_eq!((created - created0, destroyed - destroyed0), (1, 1));

            // The header is intact, so probing still works.
            assert_eq!(probe_header(half).unwrap().width, 64);
        }
    }

    #[test]
    fn oversized_frame_claim_fails_cleanly() {
        let jpeg = testutil::with_frame_size(&testutil::rgb_jpeg(8, 8, 90), 30_000, 30_000);
        let info = probe_header(&jpeg).unwrap();
        assert_eq!((info.width, info.height), (30_000, 30_000));
        let err = decode(&jpeg).unwrap_err();
        assert!(
            matches!(
                err,
                JpegError::CodecFatal(_) | JpegError::Buffer(BufferError::OutOfMemory { .. })
            ),
            "{err:?}"
        );
    }

    #[test]
    fn two_components_rejected_before_decoding() {
        let data = testutil::synthetic_header(2);
        let info = probe_header(&data).unwrap();
        assert_eq!(info.components, 2);
        assert_eq!(info.color_space, NativeColorSpace::Unknown);
        assert_eq!(
            decode(&data).unwrap_err(),
            JpegError::UnsupportedComponentCount(2)
        );
    }

    #[test]
    fn missing_tables_are_fatal() {
        let (created0, destroyed0) = lifecycle::counts();
        let err = decode(&testutil::synthetic_header(1)).unwrap_err();
        assert!(matches!(err, JpegError::CodecFatal(_)), "{err:?}");
        let (created, destroyed) = lifecycle::counts();
        assert_eq!((created - created0, destroyed - destroyed0), (1, 1));
    }

    #[test]
    fn gray_decodes_to_gray8() {
        let jpeg = testutil::gray_jpeg(20, 10, 90);
        let image = decode(&jpeg).unwrap();
        assert_eq!(image.layout(), PixelLayout::Gray8);
        assert_eq!((image.width(), image.height()), (20, 10));
        assert_eq!(image.stride(), 20);
    }

    #[test]
    fn color_decodes_to_opaque_rgba() {
        let jpeg = testutil::rgb_jpeg(17, 9, 90);
        let image = decode(&jpeg).unwrap();
        assert_eq!(image.layout(), PixelLayout::Rgba8);
        assert_eq!((image.width(), image.height()), (17, 9));
        for y in 0..image.height() {
            assert!(image.row(y).chunks_exact(4).all(|px| px[3] == 255));
        }
    }

    #[test]
    fn packed_rgb_matches_rgba_channels() {
        let jpeg = testutil::rgb_jpeg(16, 16, 85);
        let rgba = decode(&jpeg).unwrap();
        let rgb = decode_with(
            &jpeg,
            &DecodeOptions::new().with_output(OutputPreference::PackedRgb),
        )
        .unwrap();
        assert_eq!(rgb.layout(), PixelLayout::Rgb8);
        for y in 0..16 {
            for (a, b) in rgba.row(y).chunks_exact(4).zip(rgb.row(y).chunks_exact(3)) {
                assert_eq!(&a[..3], b);
            }
        }
    }

    #[test]
    fn cmyk_uses_inverted_formula() {
        let cmyk = [200, 100, 50, 128];
        let jpeg = testutil::flat_cmyk_jpeg(16, 16, cmyk);
        let info = probe_header(&jpeg).unwrap();
        assert_eq!(info.components, 4);
        assert_eq!(info.color_space, NativeColorSpace::Cmyk);

        let image = decode(&jpeg).unwrap();
        assert_eq!(image.layout(), PixelLayout::Rgba8);
        // (100, 50, 25) from 200*128/255, 100*128/255, 50*128/255.
        for y in 0..16 {
            for px in image.row(y).chunks_exact(4) {
                assert!(px[0].abs_diff(100) <= 2, "{px:?}");
                assert!(px[1].abs_diff(50) <= 2, "{px:?}");
                assert!(px[2].abs_diff(25) <= 2, "{px:?}");
                assert_eq!(px[3], 255);
            }
        }
    }

    #[test]
    fn cmyk_full_black_is_zero() {
        let jpeg = testutil::flat_cmyk_jpeg(8, 8, [255, 255, 255, 0]);
        let image = decode(&jpeg).unwrap();
        for y in 0..8 {
            for px in image.row(y).chunks_exact(4) {
                assert!(px[..3].iter().all(|&c| c <= 2), "{px:?}");
            }
        }
    }

    #[test]
    fn probe_matches_decode() {
        let jpeg = testutil::rgb_jpeg(33, 21, 75);
        let info = probe_header(&jpeg).unwrap();
        assert_eq!(
            (info.components, info.color_space),
            (3, NativeColorSpace::YCbCr)
        );
        let image = decode(&jpeg).unwrap();
        assert_eq!((info.width, info.height), (image.width(), image.height()));
        assert_eq!(info.pixel_count(), 33 * 21);
    }

    #[test]
    fn decode_is_deterministic() {
        let jpeg = testutil::rgb_jpeg(40, 30, 70);
        assert_eq!(decode(&jpeg).unwrap(), decode(&jpeg).unwrap());
    }

    #[test]
    fn limits_checked_before_pixels() {
        let jpeg = testutil::rgb_jpeg(64, 48, 75);
        let err = decode_with(
            &jpeg,
            &DecodeOptions::new().with_limits(ResourceLimits::none().with_max_pixels(1000)),
        )
        .unwrap_err();
        assert!(matches!(err, JpegError::Limit(_)), "{err:?}");

        let err = decode_with(
            &jpeg,
            &DecodeOptions::new().with_limits(ResourceLimits::none().with_max_input_bytes(10)),
        )
        .unwrap_err();
        assert!(matches!(err, JpegError::Limit(_)), "{err:?}");
    }

    #[test]
    fn crops_of_decoded_images() {
        // Odd sizes keep the halves uneven.
        let (w, h) = (65, 47);
        let fixtures = [
            testutil::gray_jpeg(w, h, 90),
            testutil::rgb_jpeg(w, h, 90),
            testutil::flat_cmyk_jpeg(w, h, [40, 80, 120, 200]),
        ];
        let rects = [
            (0, 0, w / 2, h / 2),
            (w / 2, 0, w - w / 2, h / 2),
            (0, h / 2, w / 2, h - h / 2),
            (w / 2, h / 2, w - w / 2, h - h / 2),
            (w / 4, h / 4, w / 2, h / 2),
            (1, 1, w - 2, h - 2),
        ];
        for jpeg in &fixtures {
            let image = decode(jpeg).unwrap();
            let bpp = image.layout().bytes_per_pixel();
            for (x, y, cw, ch) in rects {
                let view = image.crop_view(x, y, cw, ch);
                let copy = image.crop_copy(x, y, cw, ch);
                assert_eq!((copy.width(), copy.height()), (cw, ch));
                assert_eq!(copy.stride(), cw as usize * bpp);
                for row in 0..ch {
                    assert_eq!(view.row(row), copy.row(row));
                    let src = &image.row(y + row)[x as usize * bpp..(x + cw) as usize * bpp];
                    assert_eq!(copy.row(row), src);
                }

                let jpeg = crate::encode_slice(view, &crate::EncodeOptions::new()).unwrap();
                let again = decode(&jpeg).unwrap();
                assert_eq!((again.width(), again.height()), (cw, ch));
                assert_eq!(again.layout(), image.layout());
            }
        }
    }
}
