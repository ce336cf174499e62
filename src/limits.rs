//! Per-call resource caps.
//!
//! Decode checks the input length before the codec sees a byte, then the
//! frame geometry and the size of the buffer it would allocate right after
//! the header is read. Encode checks the source geometry up front and the
//! compressed length at the end.

use core::fmt;

use crate::buffer::PixelLayout;

/// Caps for a single decode or encode call. `None` disables a check.
///
/// ```
/// use zencodec_libjpeg::ResourceLimits;
///
/// let limits = ResourceLimits::none()
///     .with_max_pixels(40_000_000)
///     .with_max_input_bytes(64 << 20);
/// assert!(limits.check_dimensions(8000, 5000).is_ok());
/// assert!(limits.check_dimensions(8000, 5001).is_err());
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct ResourceLimits {
    pub max_input_bytes: Option<u64>,
    pub max_width: Option<u32>,
    pub max_height: Option<u32>,
    pub max_pixels: Option<u64>,
    /// Bytes of the decoded [`ImageBuffer`](crate::ImageBuffer).
    pub max_decoded_bytes: Option<u64>,
    pub max_output_bytes: Option<u64>,
}

impl ResourceLimits {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_max_input_bytes(mut self, bytes: u64) -> Self {
        self.max_input_bytes = Some(bytes);
        self
    }

    /// Cap both sides of the frame.
    pub fn with_max_dimensions(mut self, width: u32, height: u32) -> Self {
        self.max_width = Some(width);
        self.max_height = Some(height);
        self
    }

    pub fn with_max_pixels(mut self, pixels: u64) -> Self {
        self.max_pixels = Some(pixels);
        self
    }

    pub fn with_max_decoded_bytes(mut self, bytes: u64) -> Self {
        self.max_decoded_bytes = Some(bytes);
        self
    }

    pub fn with_max_output_bytes(mut self, bytes: u64) -> Self {
        self.max_output_bytes = Some(bytes);
        self
    }

    /// Input length, before any decoding.
    pub fn check_input(&self, len: usize) -> Result<(), LimitExceeded> {
        LimitKind::InputBytes.check(len as u64, self.max_input_bytes)
    }

    /// Width, height and pixel count.
    pub fn check_dimensions(&self, width: u32, height: u32) -> Result<(), LimitExceeded> {
        LimitKind::Width.check(width.into(), self.max_width.map(u64::from))?;
        LimitKind::Height.check(height.into(), self.max_height.map(u64::from))?;
        LimitKind::Pixels.check(u64::from(width) * u64::from(height), self.max_pixels)
    }

    /// Dimensions plus the size of a packed `layout` buffer of that frame.
    pub fn check_frame(
        &self,
        width: u32,
        height: u32,
        layout: PixelLayout,
    ) -> Result<(), LimitExceeded> {
        self.check_dimensions(width, height)?;
        let bytes = (layout.packed_stride(width) as u64).saturating_mul(u64::from(height));
        LimitKind::DecodedBytes.check(bytes, self.max_decoded_bytes)
    }

    /// Compressed length, after encoding.
    pub fn check_output(&self, len: usize) -> Result<(), LimitExceeded> {
        LimitKind::OutputBytes.check(len as u64, self.max_output_bytes)
    }
}

/// Which cap was hit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum LimitKind {
    InputBytes,
    Width,
    Height,
    Pixels,
    DecodedBytes,
    OutputBytes,
}

impl LimitKind {
    fn check(self, actual: u64, max: Option<u64>) -> Result<(), LimitExceeded> {
        match max {
            Some(max) if actual > max => Err(LimitExceeded {
                kind: self,
                actual,
                max,
            }),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for LimitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::InputBytes => "input size",
            Self::Width => "width",
            Self::Height => "height",
            Self::Pixels => "pixel count",
            Self::DecodedBytes => "decoded size",
            Self::OutputBytes => "output size",
        })
    }
}

/// A call would have gone past one of its [`ResourceLimits`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LimitExceeded {
    pub kind: LimitKind,
    pub actual: u64,
    pub max: u64,
}

impl fmt::Display for LimitExceeded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} exceeds limit {}", self.kind, self.actual, self.max)
    }
}

impl core::error::Error for LimitExceeded {}
