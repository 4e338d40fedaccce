//! Sequencing of the per-archive ingestion pipeline
//!
//! One archive at a time: fetch → extract → normalize → resolve schema →
//! convert. Already-converted archives short-circuit to done, a failing
//! archive is logged and counted without stopping the run, and every
//! temporary the archive produced is cleaned up on the way out whatever
//! the outcome.

use crate::{
    config::Config,
    convert::{self, ConversionReport},
    encoding,
    error::ArchiveError,
    extract, fetch,
    index::{self, ArchiveRef},
    progress::{self, ProgressReport},
    schema::{self, DatasetKind},
    Result,
};
use anyhow::Context;
use std::{fmt, path::Path, sync::Arc, time::Instant};
use tokio::fs;

/// Drive a whole ingestion run
///
/// Resolving the archive index is the only fatal failure; from there on,
/// every selected archive is processed in sorted order and failures stay
/// scoped to their archive.
pub async fn run(
    config: Arc<Config>,
    client: reqwest::Client,
    report: ProgressReport,
) -> Result<RunSummary> {
    for dir in [config.archives_dir(), config.text_dir(), config.out_dir.clone()] {
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("creating directory {}", dir.display()))?;
    }

    let archives = index::discover(&client, &config.base_url)
        .await
        .context("resolving the archive index")?;
    let selected = select(&config, archives);
    log::info!("{} archive(s) to process", selected.len());

    let bar = report.steps("Processing archives", selected.len());
    let mut summary = RunSummary::default();
    for archive in &selected {
        match process_archive(&config, &client, archive, &report).await {
            Ok(Outcome::Converted) => summary.converted += 1,
            Ok(Outcome::Skipped) => {
                log::info!("Artifact for {} already exists, skipping", archive.name);
                summary.skipped += 1;
            }
            Err(error) => {
                let stage = error.stage();
                let reason = format!("{:#}", anyhow::Error::new(error));
                log::error!("Failed to ingest {} during {stage}: {reason}", archive.name);
                summary.failed.push(FailedArchive {
                    name: archive.name.clone(),
                    stage,
                    reason,
                });
            }
        }
        bar.inc(1);
    }
    report.finish(bar);
    Ok(summary)
}

/// Apply the name filter and count limit to the discovered index
fn select(config: &Config, archives: Vec<ArchiveRef>) -> Vec<ArchiveRef> {
    let mut selected = archives
        .into_iter()
        .filter(|archive| {
            config
                .filter
                .as_ref()
                .map_or(true, |filter| filter.is_match(&archive.name))
        })
        .collect::<Vec<_>>();
    if let Some(limit) = config.limit {
        selected.truncate(limit.get());
    }
    selected
}

/// How one archive went through the pipeline
enum Outcome {
    /// A new artifact was produced
    Converted,

    /// The artifact already existed, nothing was done
    Skipped,
}

/// Run one archive through the pipeline stages
async fn process_archive(
    config: &Config,
    client: &reqwest::Client,
    archive: &ArchiveRef,
    report: &ProgressReport,
) -> Result<Outcome, ArchiveError> {
    // The stem-keyed artifact is the idempotency check: if it exists it
    // is complete (partial artifacts only ever live under .part names)
    let artifact = config.artifact_path(&archive.stem);
    if fs::try_exists(&artifact).await.unwrap_or(false) {
        return Ok(Outcome::Skipped);
    }

    let kind = DatasetKind::detect(&archive.name);
    log::info!("Ingesting {} as dataset family \"{}\"", archive.name, kind.label());

    let archive_path = config.archives_dir().join(&*archive.name);
    fetch::ensure_archive(client, archive, &archive_path, report).await?;

    let outcome = convert_archive(config, &archive_path, &artifact, kind, report).await;

    // The archive is only disposable once its artifact exists; on failure
    // it stays around as the retry cache
    if outcome.is_ok() && !config.keep_zip {
        remove_quietly(&archive_path, "downloaded archive").await;
    }
    outcome.map(|_| Outcome::Converted)
}

/// Extract, normalize and convert one fetched archive
///
/// Text files are temporaries: they are cleaned up on every exit path,
/// success or failure, unless the configuration asks to keep them.
async fn convert_archive(
    config: &Config,
    archive_path: &Path,
    artifact: &Path,
    kind: DatasetKind,
    report: &ProgressReport,
) -> Result<ConversionReport, ArchiveError> {
    let raw_text = extract::extract_tabular_member(archive_path, &config.text_dir()).await?;
    if let Ok(meta) = fs::metadata(&raw_text).await {
        log::info!(
            "Extracted {} ({})",
            raw_text.display(),
            progress::human_bytes(meta.len())
        );
    }

    let mut text_paths = vec![raw_text.clone()];
    let result: Result<ConversionReport, ArchiveError> = async {
        let normalized = encoding::ensure_utf8(&raw_text).await?;
        if normalized != raw_text {
            text_paths.push(normalized.clone());
        }
        let resolved = schema::resolve(&normalized, kind, config).await?;
        let start = Instant::now();
        let counts = convert::to_parquet(&normalized, artifact, &resolved, config, report).await?;
        match fs::metadata(artifact).await {
            Ok(meta) => log::info!(
                "Converted {} rows into {} ({}) in {:.1}s, {} malformed row(s) skipped",
                counts.rows,
                artifact.display(),
                progress::human_bytes(meta.len()),
                start.elapsed().as_secs_f32(),
                counts.malformed
            ),
            Err(_) => log::info!(
                "Converted {} rows into {} in {:.1}s",
                counts.rows,
                artifact.display(),
                start.elapsed().as_secs_f32()
            ),
        }
        Ok(counts)
    }
    .await;

    if !config.keep_csv {
        for path in &text_paths {
            remove_quietly(path, "extracted text").await;
        }
    }
    result
}

/// Remove a temporary file, reporting (but not propagating) failures
async fn remove_quietly(path: &Path, what: &str) {
    if let Err(error) = fs::remove_file(path).await {
        if error.kind() != std::io::ErrorKind::NotFound {
            log::warn!("Could not remove {what} {}: {error}", path.display());
        }
    }
}

/// Per-archive failure record, detailed enough to retry via `--filter`
#[derive(Debug)]
pub struct FailedArchive {
    /// Archive file name
    pub name: Box<str>,

    /// Pipeline stage that failed
    pub stage: &'static str,

    /// Rendered error chain
    pub reason: String,
}

/// End-of-run accounting across all selected archives
#[derive(Debug, Default)]
pub struct RunSummary {
    /// Archives converted into a new artifact
    pub converted: usize,

    /// Archives whose artifact already existed
    pub skipped: usize,

    /// Archives that failed, in processing order
    pub failed: Vec<FailedArchive>,
}
//
impl RunSummary {
    /// Truth that at least one archive failed
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }
}
//
impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} archive(s) converted, {} already present, {} failed",
            self.converted,
            self.skipped,
            self.failed.len()
        )?;
        for failure in &self.failed {
            write!(f, "\n  {} [{}]: {}", failure.name, failure.stage, failure.reason)?;
        }
        if self.has_failures() {
            let retry = self
                .failed
                .iter()
                .map(|failure| &*failure.name)
                .collect::<Vec<_>>()
                .join("|");
            write!(f, "\nRe-run with --filter \"{retry}\" to retry the failures")?;
        }
        Ok(())
    }
}
