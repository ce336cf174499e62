//! In-memory JPEG decode and encode on top of libjpeg (mozjpeg build).
//!
//! - [`decode`] / [`decode_with`]: JPEG bytes to an [`ImageBuffer`]
//!   (`Gray8`, or `Rgba8` for YCbCr, RGB and inverted-CMYK files)
//! - [`probe_header`]: dimensions, component count and colorspace only
//! - [`encode`] / [`encode_slice`] / [`encode_pixels`]: pixels to baseline
//!   JPEG at quality 1..=100 (default 75)
//! - [`decode_with_timeout`] / [`encode_with_timeout`]: the same on a
//!   worker thread with a deadline
//! - [`harness`]: concurrent consistency checker behind the `jpeg-stress` binary
//!
//! Every call owns its codec context. Calls are independent and may run
//! on any number of threads at once; a fatal codec error ends only the call
//! that raised it, as a [`JpegError`].
//!
//! Fatal errors are propagated by unwinding out of libjpeg, so the crate
//! must not be built with `panic = "abort"`.

#![deny(unsafe_code)]

mod buffer;
mod decode;
mod encode;
mod error;
pub mod harness;
mod info;
mod limits;
mod marshal;
mod native;
mod pixel;
mod worker;

#[cfg(test)]
mod testutil;

pub use buffer::{BufferError, ImageBuffer, PixelLayout, PixelSlice};
pub use decode::{DecodeOptions, OutputPreference, decode, decode_with, probe_header};
pub use encode::{DEFAULT_QUALITY, EncodeOptions, encode, encode_pixels, encode_slice};
pub use error::{JpegError, Result};
pub use info::{JpegHeaderInfo, NativeColorSpace};
pub use limits::{LimitExceeded, LimitKind, ResourceLimits};
pub use pixel::PixelSource;
pub use worker::{decode_with_timeout, encode_with_timeout};

// Re-exports for callers working with typed pixels.
pub use imgref::{Img, ImgRef, ImgVec};
pub use rgb;
pub use rgb::{Gray, Rgb, Rgba};
