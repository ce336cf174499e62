//! Decode/encode with a deadline.
//!
//! The call runs on a dedicated thread. If the deadline passes first the
//! caller gets [`JpegError::TimedOut`] and the thread is left to finish on
//! its own; its codec context is still destroyed when it does, and its
//! result is dropped.

use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use log::warn;

use crate::buffer::ImageBuffer;
use crate::decode::{DecodeOptions, decode_with};
use crate::encode::{EncodeOptions, encode};
use crate::error::{JpegError, Result};

/// Decode on a worker thread, giving up after `timeout`.
pub fn decode_with_timeout(
    data: impl Into<Arc<[u8]>>,
    options: DecodeOptions,
    timeout: Duration,
) -> Result<ImageBuffer> {
    let data = data.into();
    run_with_timeout("jpeg-decode", timeout, move || decode_with(&data, &options))
}

/// Encode on a worker thread, giving up after `timeout`.
pub fn encode_with_timeout(
    image: impl Into<Arc<ImageBuffer>>,
    options: EncodeOptions,
    timeout: Duration,
) -> Result<Vec<u8>> {
    let image = image.into();
    run_with_timeout("jpeg-encode", timeout, move || encode(&image, &options))
}

pub(crate) fn run_with_timeout<T, F>(name: &str, timeout: Duration, job: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let (tx, rx) = mpsc::sync_channel(1);
    thread::Builder::new()
        .name(name.to_owned())
        .spawn(move || {
            // The receiver is gone once the caller has timed out.
            let _ = tx.send(job());
        })
        .map_err(|e| JpegError::CodecFatal(format!("failed to spawn {name} worker: {e}")))?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => {
            warn!("{name} worker abandoned after {timeout:?}");
            Err(JpegError::TimedOut(timeout))
        }
        Err(RecvTimeoutError::Disconnected) => Err(JpegError::CodecFatal(format!(
            "{name} worker exited without a result"
        ))),
    }
}
