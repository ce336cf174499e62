//! jpeg-stress - concurrent decode/encode consistency check.
//!
//! Loads up to `--max-images` JPEG files from a directory, then decodes and
//! re-encodes them on a worker pool until interrupted (or until
//! `--iterations` round trips), aborting the process on the first result
//! that differs from an earlier one.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use log::{LevelFilter, error, info, warn};
use walkdir::WalkDir;

use zencodec_libjpeg::harness::{Corpus, STRESS_QUALITY, StressRunner, default_workers};

/// Decode and re-encode a directory of JPEGs concurrently, checking that
/// every run produces identical pixels and identical bytes.
#[derive(Parser, Debug)]
#[command(name = "jpeg-stress")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory to scan (recursively) for .jpg/.jpeg files
    #[arg(long, value_name = "DIR")]
    dir: PathBuf,

    /// Worker threads (default: CPU count minus two, at least one)
    #[arg(short, long)]
    workers: Option<usize>,

    /// Maximum number of files to load
    #[arg(long, default_value_t = 100)]
    max_images: usize,

    /// Re-encode quality
    #[arg(short, long, default_value_t = STRESS_QUALITY, value_parser = clap::value_parser!(u8).range(1..=100))]
    quality: u8,

    /// Stop after this many round trips instead of running forever
    #[arg(long)]
    iterations: Option<u64>,

    /// Log every corpus file and codec context
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    let dir = expand_tilde(&args.dir);
    if !dir.is_dir() {
        error!("dir {} doesn't exist", dir.display());
        return ExitCode::from(2);
    }

    let corpus = load_corpus(&dir, args.max_images);
    if corpus.is_empty() {
        error!("there are no decodable jpeg images in {}", dir.display());
        return ExitCode::from(2);
    }

    let mut runner = StressRunner::new()
        .with_workers(args.workers.unwrap_or_else(default_workers))
        .with_quality(args.quality);
    if let Some(n) = args.iterations {
        runner = runner.with_iterations(n);
    }

    match runner.run(&corpus) {
        Ok(report) => {
            info!(
                "{} images, {} bytes encoded in {:.1?}",
                report.images, report.encoded_bytes, report.elapsed
            );
            ExitCode::SUCCESS
        }
        Err(e) if e.is_consistency_violation() => {
            error!("{e}");
            std::process::abort();
        }
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    });
    builder.parse_default_env();
    let _ = builder.try_init();
}

fn expand_tilde(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match std::env::var_os("HOME") {
            Some(home) => PathBuf::from(home).join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}

fn is_jpeg_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg"))
}

fn load_corpus(dir: &Path, max_images: usize) -> Corpus {
    let mut corpus = Corpus::new();
    let files = WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("skipping: {e}");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file() && is_jpeg_file(entry.path()));

    for entry in files {
        if corpus.len() >= max_images {
            break;
        }
        let path = entry.into_path();
        let data = match std::fs::read(&path) {
            Ok(data) => data,
            Err(e) => {
                warn!("{}: {e}", path.display());
                continue;
            }
        };
        if let Err(e) = corpus.add(&path, data) {
            warn!("{}: {e}", path.display());
        }
    }
    info!("loaded {} images from {}", corpus.len(), dir.display());
    corpus
}
