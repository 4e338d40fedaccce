//! Ingestion of the Receita Federal CNPJ open-data dumps into Parquet
//!
//! The Brazilian company register is published monthly as an HTML listing
//! of zip archives, see
//! <https://arquivos.receitafederal.gov.br/dados/cnpj/dados_abertos_cnpj/>,
//! each archive wrapping a single semicolon-delimited text file. This
//! program mirrors one monthly listing, archive by archive, into
//! analytics-friendly Parquet artifacts.

mod config;
mod convert;
mod encoding;
mod error;
mod extract;
mod fetch;
mod index;
mod pipeline;
mod progress;
mod schema;
#[cfg(test)]
mod test_util;

use crate::{config::Config, progress::ProgressReport};
use clap::Parser;
use log::LevelFilter;
use std::{
    num::NonZeroUsize,
    path::{Path, PathBuf},
    process::ExitCode,
};

/// Convert the monthly CNPJ open-data dumps into Parquet artifacts
///
/// Archives are processed one at a time: downloaded (resuming any partial
/// previous attempt), unpacked, normalized to UTF-8, then converted in
/// bounded-size row batches. An artifact that already exists in the output
/// directory is never redone, so interrupting and re-running is always
/// safe.
#[derive(Parser, Debug)]
#[command(version, author)]
struct Args {
    /// Listing page of the monthly dump, e.g. ".../dados_abertos_cnpj/2025-07/"
    #[arg(long, default_value = config::DEFAULT_BASE_URL)]
    base_url: String,

    /// Working directory holding downloaded archives and extracted text
    ///
    /// Downloads resume from whatever partial state this directory holds
    /// after an interrupted run. Keep it on a disk with room for the
    /// largest archives (several GB each for Estabelecimentos).
    #[arg(long, default_value = "./work")]
    work_dir: PathBuf,

    /// Output directory for the Parquet artifacts
    ///
    /// One `<archive stem>.parquet` per archive. An artifact already
    /// present here short-circuits the whole pipeline for its archive,
    /// which is what makes re-runs cheap and safe.
    #[arg(long, default_value = "./parquet")]
    out_dir: PathBuf,

    /// Keep downloaded archives after conversion
    #[arg(long)]
    keep_zip: bool,

    /// Keep extracted (and transcoded) text files after conversion
    #[arg(long)]
    keep_csv: bool,

    /// Only process archives whose file name matches this regex
    ///
    /// Matching is case-insensitive, e.g. "empresas|socios". The summary
    /// printed at the end of a run suggests a filter that retries exactly
    /// the archives that failed.
    #[arg(short, long)]
    filter: Option<String>,

    /// Process at most this many archives
    #[arg(short, long)]
    limit: Option<NonZeroUsize>,

    /// Rows per conversion batch
    ///
    /// Conversion memory is proportional to this times the widest row of
    /// the dataset; tune down on memory-constrained machines.
    #[arg(long, default_value = "200000")]
    batch_rows: NonZeroUsize,

    /// Field delimiter of the source text files
    #[arg(long, default_value = ";")]
    delimiter: char,
}
//
impl Args {
    /// Decode and validate CLI arguments
    pub fn parse_and_check() -> Result<Self> {
        // Decode CLI arguments
        let args = Args::parse();

        // Check CLI arguments for basic sanity
        anyhow::ensure!(
            args.delimiter.is_ascii(),
            "the field delimiter must be a single ASCII character"
        );
        Ok(args)
    }
}
//
#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Set up logging
    setup_logging().map_err(|e| anyhow::format_err!("{e}"))?;

    // Decode CLI arguments and freeze the pipeline configuration
    let args = Args::parse_and_check()?;
    let config = Config::new(args)?;

    // Set up progress reporting and the shared HTTP client
    let report = ProgressReport::new();
    let client = reqwest::Client::new();

    // Ingest every selected archive of the monthly dump
    let summary = pipeline::run(config, client, report).await?;

    // The progress bars are gone, the terminal is ours again
    println!("{summary}");
    Ok(if summary.has_failures() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

/// Use anyhow for Result type erasure
pub use anyhow::Result;

/// Sibling path marking an in-progress write
///
/// Incrementally written files (downloads, transcodes, artifacts) grow
/// under this name and are atomically renamed once complete, so a path
/// without the suffix always refers to a finished file.
pub fn part_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    path.with_file_name(name)
}

/// Set up logging
///
/// Logs go to syslog because indicatif owns the terminal while the
/// pipeline runs; see [`ProgressReport`].
fn setup_logging() -> syslog::Result<()> {
    syslog::init(
        syslog::Facility::LOG_USER,
        if cfg!(feature = "log-trace") {
            LevelFilter::Trace
        } else if cfg!(debug_assertions) {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        },
        None,
    )
}
