//! The error type shared by every decode and encode entry point.

use std::time::Duration;

use thiserror::Error;

use crate::{BufferError, LimitExceeded};

/// Failure of a single decode, probe or encode call.
///
/// A call either returns a complete result or one of these; partially
/// filled images or truncated byte streams are never handed back.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum JpegError {
    /// Input buffer is empty or too short to hold a JPEG marker.
    #[error("invalid input: {len} bytes is too short for a JPEG stream")]
    InvalidInput { len: usize },

    /// The codec rejected the stream header.
    #[error("JPEG header rejected: {0}")]
    CodecHeader(String),

    /// Frame has a component count other than 1, 3 or 4.
    #[error("unsupported number of components ({0})")]
    UnsupportedComponentCount(u8),

    /// Encode was asked for an empty image.
    #[error("image with invalid size, width: {width}, height: {height} (both must be > 0)")]
    InvalidImageSize { width: u32, height: u32 },

    /// Quality outside 1..=100.
    #[error("quality {0} is outside 1..=100")]
    InvalidQuality(u8),

    /// Any other fatal condition raised by the codec, with its diagnostic.
    #[error("JPEG codec error: {0}")]
    CodecFatal(String),

    #[error(transparent)]
    Buffer(#[from] BufferError),

    #[error("resource limit exceeded: {0}")]
    Limit(#[from] LimitExceeded),

    /// The caller's deadline passed; the worker was abandoned.
    #[error("JPEG operation abandoned after {0:?}")]
    TimedOut(Duration),
}

pub type Result<T, E = JpegError> = core::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ResourceLimits;

    #[test]
    fn display_messages() {
        assert_eq!(
            JpegError::InvalidImageSize {
                width: 0,
                height: 7
            }
            .to_string(),
            "image with invalid size, width: 0, height: 7 (both must be > 0)"
        );
        assert_eq!(
            JpegError::UnsupportedComponentCount(2).to_string(),
            "unsupported number of components (2)"
        );
        assert!(
            JpegError::CodecFatal("Bogus marker length".into())
                .to_string()
                .ends_with("Bogus marker length")
        );
    }

    #[test]
    fn wraps_limit_and_buffer_errors() {
        let err: JpegError = ResourceLimits::none()
            .with_max_dimensions(8, 8)
            .check_dimensions(9, 1)
            .unwrap_err()
            .into();
        assert_eq!(err.to_string(), "resource limit exceeded: width 9 exceeds limit 8");
        let err: JpegError = BufferError::StrideTooSmall.into();
        assert_eq!(err.to_string(), BufferError::StrideTooSmall.to_string());
    }
}
