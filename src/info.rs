//! Header metadata.

use core::fmt;

/// Colorspace recorded in (or requested from) the native codec.
///
/// Valid header combinations are Grayscale with 1 component, Rgb/YCbCr
/// with 3, and Cmyk/Ycck with 4. The `Ext*` variants only appear as
/// output colorspaces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum NativeColorSpace {
    Unknown,
    Grayscale,
    Rgb,
    YCbCr,
    Cmyk,
    Ycck,
    ExtRgb,
    ExtRgbx,
    ExtBgr,
    ExtBgrx,
    ExtXbgr,
    ExtXrgb,
    ExtRgba,
    ExtBgra,
    ExtAbgr,
    ExtArgb,
}

impl NativeColorSpace {
    /// Short lowercase name, e.g. `"ycbcr"`.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Grayscale => "grayscale",
            Self::Rgb => "rgb",
            Self::YCbCr => "ycbcr",
            Self::Cmyk => "cmyk",
            Self::Ycck => "ycck",
            Self::ExtRgb => "extrgb",
            Self::ExtRgbx => "extrgbx",
            Self::ExtBgr => "extbgr",
            Self::ExtBgrx => "extbgrx",
            Self::ExtXbgr => "extxbgr",
            Self::ExtXrgb => "extxrgb",
            Self::ExtRgba => "extrgba",
            Self::ExtBgra => "extbgra",
            Self::ExtAbgr => "extabgr",
            Self::ExtArgb => "extargb",
        }
    }
}

impl fmt::Display for NativeColorSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What [`probe_header`](crate::probe_header) learns without decoding
/// any scanlines.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub struct JpegHeaderInfo {
    /// Number of color components in the frame (1, 3 or 4 for supported files).
    pub components: u8,
    /// Colorspace the file was encoded in.
    pub color_space: NativeColorSpace,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
}

impl JpegHeaderInfo {
    /// Total pixel count.
    pub fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}
