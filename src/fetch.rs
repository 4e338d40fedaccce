//! Resumable download of one archive

use crate::{error::FetchError, extract, index::ArchiveRef, part_sibling, progress::ProgressReport};
use futures::StreamExt;
use reqwest::{header::RANGE, StatusCode};
use std::path::Path;
use tokio::{
    fs::{self, File, OpenOptions},
    io::AsyncWriteExt,
};

/// Ensure that `dest` holds the complete, integrity-checked archive
///
/// A valid preexisting file is reused without any network activity. A
/// corrupt preexisting file is discarded and fetched again from scratch,
/// once. A `.part` file left by an interrupted run resumes where it
/// stopped. Partial state never becomes visible under the final name:
/// completion is a single atomic rename.
pub async fn ensure_archive(
    client: &reqwest::Client,
    archive: &ArchiveRef,
    dest: &Path,
    report: &ProgressReport,
) -> Result<(), FetchError> {
    if fs::try_exists(dest).await.unwrap_or(false) {
        if verify(dest).await.is_ok() {
            log::info!("Reusing already downloaded {}", archive.name);
            return Ok(());
        }
        log::warn!("Discarding corrupt archive {}, fetching it again", archive.name);
        fs::remove_file(dest).await.map_err(|source| FetchError::Io {
            path: dest.to_owned(),
            source,
        })?;
    }

    download(client, archive, dest, report).await?;

    // Gate the fresh download before anything downstream trusts it
    verify(dest).await.map_err(|_| FetchError::Integrity {
        path: dest.to_owned(),
    })
}

/// Structural integrity check, off the async runtime
async fn verify(path: &Path) -> Result<(), zip::result::ZipError> {
    let path = path.to_owned();
    tokio::task::spawn_blocking(move || extract::verify_archive(&path))
        .await
        .expect("the verification task should not panic")
}

/// Download an archive to `dest`, resuming any partial previous attempt
///
/// The remote side may ignore the byte-range request and answer `200 OK`
/// instead of `206 Partial Content`; when that happens the partial file
/// is discarded and the download restarts from byte zero.
async fn download(
    client: &reqwest::Client,
    archive: &ArchiveRef,
    dest: &Path,
    report: &ProgressReport,
) -> Result<(), FetchError> {
    let request_error = |source| FetchError::Request {
        url: archive.url.clone(),
        source,
    };
    let part = part_sibling(dest);
    let io_error = |source| FetchError::Io {
        path: part.clone(),
        source,
    };

    // Ask for the part we do not have yet, if any
    let mut offset = match fs::metadata(&part).await {
        Ok(meta) => meta.len(),
        Err(_) => 0,
    };
    let mut request = client.get(&*archive.url);
    if offset > 0 {
        log::info!("Resuming download of {} from byte {offset}", archive.name);
        request = request.header(RANGE, format!("bytes={offset}-"));
    }
    let response = request.send().await.map_err(request_error)?;

    // Only 206 continues an existing partial file
    let mut truncate = false;
    match response.status() {
        StatusCode::PARTIAL_CONTENT => {}
        StatusCode::OK => {
            if offset > 0 {
                log::warn!(
                    "Server ignored the byte range for {}, restarting from scratch",
                    archive.name
                );
            }
            truncate = true;
            offset = 0;
        }
        status => {
            return Err(FetchError::Status {
                url: archive.url.clone(),
                status,
            })
        }
    }

    // Stream the body into the partial file, chunk by chunk
    let total = response.content_length().map(|remaining| offset + remaining);
    let bar = report.bytes(format!("Downloading {}", archive.name), total);
    bar.set_position(offset);
    let mut file = if truncate {
        File::create(&part).await
    } else {
        OpenOptions::new().append(true).create(true).open(&part).await
    }
    .map_err(io_error)?;
    let mut chunks = response.bytes_stream();
    while let Some(chunk) = chunks.next().await {
        let chunk = chunk.map_err(request_error)?;
        file.write_all(&chunk).await.map_err(io_error)?;
        bar.inc(chunk.len() as u64);
    }

    // Make the download durable, then visible under its final name
    file.sync_all().await.map_err(io_error)?;
    drop(file);
    fs::rename(&part, dest).await.map_err(io_error)?;
    report.finish(bar);

    match fs::metadata(dest).await {
        Ok(meta) => log::info!(
            "Downloaded {} ({})",
            archive.name,
            crate::progress::human_bytes(meta.len())
        ),
        Err(_) => log::info!("Downloaded {}", archive.name),
    }
    Ok(())
}
