//! Concurrent decode/encode consistency checker.
//!
//! A [`Corpus`] holds JPEG files together with a baseline decode of each.
//! [`StressRunner`] hammers the corpus from every thread of a rayon pool:
//! each iteration decodes one file, compares the pixels with the baseline,
//! re-encodes and compares the bytes with the first encode of that file.
//! Any difference means codec state leaked between concurrent calls.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use log::{debug, info};
use thiserror::Error;

use crate::buffer::ImageBuffer;
use crate::decode::decode;
use crate::encode::{EncodeOptions, encode};
use crate::error::JpegError;

/// Quality used for re-encoding.
pub const STRESS_QUALITY: u8 = 90;

/// A progress line is logged every this many images.
const PROGRESS_INTERVAL: u64 = 100;

/// One corpus file and its reference results.
pub struct CorpusItem {
    path: PathBuf,
    data: Vec<u8>,
    baseline: ImageBuffer,
    first_encode: OnceLock<Vec<u8>>,
}

impl CorpusItem {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn baseline(&self) -> &ImageBuffer {
        &self.baseline
    }
}

/// Files to stress, each with a single-threaded baseline decode.
#[derive(Default)]
pub struct Corpus {
    items: Vec<CorpusItem>,
}

impl Corpus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `data` once and keep it as a corpus entry.
    ///
    /// Files the codec can't decode are returned as errors and not added.
    pub fn add(&mut self, path: impl Into<PathBuf>, data: Vec<u8>) -> Result<(), JpegError> {
        let path = path.into();
        let baseline = decode(&data)?;
        debug!(
            "corpus: {} ({}x{} {:?})",
            path.display(),
            baseline.width(),
            baseline.height(),
            baseline.layout()
        );
        self.items.push(CorpusItem {
            path,
            data,
            baseline,
            first_encode: OnceLock::new(),
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[CorpusItem] {
        &self.items
    }
}

/// What a stress run found wrong.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum StressError {
    #[error("corpus is empty")]
    EmptyCorpus,

    #[error("quality {0} is outside 1..=100")]
    InvalidQuality(u8),

    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("{}: decode failed after a clean baseline: {source}", path.display())]
    DecodeFailed { path: PathBuf, source: JpegError },

    #[error("{}: decoded pixels differ from the baseline", path.display())]
    PixelMismatch { path: PathBuf },

    #[error("{}: encode failed: {source}", path.display())]
    EncodeFailed { path: PathBuf, source: JpegError },

    #[error("{}: encoded bytes differ from the first encode", path.display())]
    EncodedMismatch { path: PathBuf },
}

impl StressError {
    /// Whether this is a disagreement between concurrent calls, as opposed
    /// to a setup problem.
    pub fn is_consistency_violation(&self) -> bool {
        !matches!(
            self,
            Self::EmptyCorpus | Self::InvalidQuality(_) | Self::ThreadPool(_)
        )
    }
}

/// Default worker count: all cores but two, at least one.
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map_or(1, |n| n.get())
        .saturating_sub(2)
        .max(1)
}

/// Totals for a finished run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StressReport {
    /// Decode/encode round trips completed.
    pub images: u64,
    /// Round trips completed by each pool thread.
    pub per_worker: Vec<u64>,
    /// Sum of encoded sizes.
    pub encoded_bytes: u64,
    pub elapsed: Duration,
}

#[derive(Default)]
struct Counters {
    images: AtomicU64,
    encoded_bytes: AtomicU64,
}

/// Drives the stress loop.
#[derive(Clone, Debug)]
pub struct StressRunner {
    workers: usize,
    quality: u8,
    iterations: Option<u64>,
}

impl Default for StressRunner {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            quality: STRESS_QUALITY,
            iterations: None,
        }
    }
}

impl StressRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = quality;
        self
    }

    /// Stop after `iterations` round trips, split evenly across the workers.
    /// Without this, [`run`](Self::run) only returns on failure.
    pub fn with_iterations(mut self, iterations: u64) -> Self {
        self.iterations = Some(iterations);
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run until the iteration budget is spent or a check fails.
    pub fn run(&self, corpus: &Corpus) -> Result<StressReport, StressError> {
        if corpus.is_empty() {
            return Err(StressError::EmptyCorpus);
        }
        if !(1..=100).contains(&self.quality) {
            return Err(StressError::InvalidQuality(self.quality));
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .thread_name(|i| format!("jpeg-stress-{i}"))
            .build()?;
        let options = EncodeOptions::new().with_quality(self.quality);
        let counters = Counters::default();
        let stop = AtomicBool::new(false);
        let started = Instant::now();
        info!(
            "stressing {} files on {} workers at q{}",
            corpus.len(),
            self.workers,
            self.quality
        );

        let per_worker = pool
            .broadcast(|ctx| self.worker_loop(corpus, &options, &counters, &stop, ctx.index()))
            .into_iter()
            .collect::<Result<Vec<u64>, StressError>>()?;

        Ok(StressReport {
            images: counters.images.load(Ordering::Relaxed),
            per_worker,
            encoded_bytes: counters.encoded_bytes.load(Ordering::Relaxed),
            elapsed: started.elapsed(),
        })
    }

    /// Round trips this worker owes, or `None` to run until stopped.
    fn quota(&self, worker: usize) -> Option<u64> {
        let workers = self.workers as u64;
        self.iterations
            .map(|total| total / workers + u64::from((worker as u64) < total % workers))
    }

    /// One pool thread's loop. Starts at a different file per worker and
    /// walks the whole corpus; the first failure stops every worker.
    fn worker_loop(
        &self,
        corpus: &Corpus,
        options: &EncodeOptions,
        counters: &Counters,
        stop: &AtomicBool,
        worker: usize,
    ) -> Result<u64, StressError> {
        let quota = self.quota(worker);
        let mut done = 0u64;
        while quota.is_none_or(|q| done < q) && !stop.load(Ordering::Relaxed) {
            let item = &corpus.items[(worker + done as usize) % corpus.len()];
            let encoded_len = match round_trip(item, options) {
                Ok(len) => len,
                Err(e) => {
                    stop.store(true, Ordering::Relaxed);
                    return Err(e);
                }
            };
            done += 1;
            counters
                .encoded_bytes
                .fetch_add(encoded_len as u64, Ordering::Relaxed);
            let images = counters.images.fetch_add(1, Ordering::Relaxed) + 1;
            if images % PROGRESS_INTERVAL == 0 {
                info!(
                    "decoded/encoded {images} images ({} MiB)",
                    counters.encoded_bytes.load(Ordering::Relaxed) >> 20
                );
            }
        }
        Ok(done)
    }
}

/// Decode, compare, encode, compare. Returns the encoded size.
fn round_trip(item: &CorpusItem, options: &EncodeOptions) -> Result<usize, StressError> {
    let decoded = decode(&item.data).map_err(|source| StressError::DecodeFailed {
        path: item.path.clone(),
        source,
    })?;
    if decoded != item.baseline {
        return Err(StressError::PixelMismatch {
            path: item.path.clone(),
        });
    }

    let encoded = encode(&decoded, options).map_err(|source| StressError::EncodeFailed {
        path: item.path.clone(),
        source,
    })?;
    let len = encoded.len();
    if let Err(encoded) = item.first_encode.set(encoded)
        && item.first_encode.get() != Some(&encoded)
    {
        return Err(StressError::EncodedMismatch {
            path: item.path.clone(),
        });
    }
    Ok(len)
}
