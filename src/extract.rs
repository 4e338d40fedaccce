//! Extraction of the single tabular member of an archive
//!
//! Receita archives wrap exactly one meaningful payload, but its internal
//! name rarely carries a `.csv` extension (`F.K03200$Z.D50712.MUNICCSV`
//! and friends) and sometimes hides in a subdirectory. Extraction always
//! lands the member flat in the working directory under a name with the
//! canonical extension.

use crate::error::ExtractError;
use std::{
    cmp::Reverse,
    fs::File,
    io,
    path::{Path, PathBuf},
};
use zip::{result::ZipError, ZipArchive};

/// Check that an archive's structure is readable
///
/// Opening a zip validates its end-of-central-directory record and walks
/// the central directory, which catches truncated or corrupted downloads
/// without decompressing every member. Used by the fetcher as its
/// integrity gate.
pub fn verify_archive(path: &Path) -> Result<(), ZipError> {
    let file = File::open(path).map_err(ZipError::Io)?;
    ZipArchive::new(file).map(drop)
}

/// Extract the single tabular member of `archive_path` into `text_dir`
///
/// The member is streamed straight to `text_dir/<basename>.csv`, which
/// both flattens any directory structure inside the archive and
/// guarantees the canonical extension whatever the internal name was.
pub async fn extract_tabular_member(
    archive_path: &Path,
    text_dir: &Path,
) -> Result<PathBuf, ExtractError> {
    let archive_path = archive_path.to_owned();
    let text_dir = text_dir.to_owned();
    tokio::task::spawn_blocking(move || extract_blocking(&archive_path, &text_dir))
        .await
        .expect("the extraction task should not panic")
}

/// Blocking body of [`extract_tabular_member`]
fn extract_blocking(archive_path: &Path, text_dir: &Path) -> Result<PathBuf, ExtractError> {
    let archive_error = |source| ExtractError::Archive {
        path: archive_path.to_owned(),
        source,
    };
    let file = File::open(archive_path).map_err(|source| archive_error(ZipError::Io(source)))?;
    let mut archive = ZipArchive::new(file).map_err(archive_error)?;

    let selected = select_member(&mut archive, archive_path)?;
    let mut member = archive.by_index(selected).map_err(archive_error)?;
    let member_name = member.name().to_owned();
    let target = text_dir.join(flattened_name(&member_name));

    let io_error = |source| ExtractError::Io {
        path: archive_path.to_owned(),
        member: member_name.clone().into(),
        source,
    };
    std::fs::create_dir_all(text_dir).map_err(io_error)?;
    let mut out = File::create(&target).map_err(io_error)?;
    io::copy(&mut member, &mut out).map_err(io_error)?;
    Ok(target)
}

/// Pick the member to extract
///
/// Policy, first non-empty tier wins:
/// 1. members whose name ends in a tabular suffix (`csv`, `.csv`, `.txt`);
/// 2. members whose name merely contains the `csv` token;
/// 3. the largest member by uncompressed size.
/// Ties are broken by taking the first member in the archive's internal
/// listing order.
fn select_member(
    archive: &mut ZipArchive<File>,
    archive_path: &Path,
) -> Result<usize, ExtractError> {
    // Directory entries are never payload
    let mut files = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let member = archive.by_index(index).map_err(|source| ExtractError::Archive {
            path: archive_path.to_owned(),
            source,
        })?;
        if member.is_dir() {
            continue;
        }
        files.push((index, member.name().to_lowercase(), member.size()));
    }
    if files.is_empty() {
        return Err(ExtractError::EmptyArchive {
            path: archive_path.to_owned(),
        });
    }

    let tabular_suffix = files
        .iter()
        .find(|(_index, name, _size)| name.ends_with("csv") || name.ends_with(".txt"));
    let csv_token = || files.iter().find(|(_index, name, _size)| name.contains("csv"));
    // min_by_key returns the first of equally-sized members
    let largest = || files.iter().min_by_key(|(_index, _name, size)| Reverse(*size));

    let (index, _name, _size) = tabular_suffix
        .or_else(csv_token)
        .or_else(largest)
        .expect("a non-empty candidate list should always yield a member");
    Ok(*index)
}

/// Flattened on-disk name of a member, with the canonical extension
fn flattened_name(member: &str) -> String {
    let base = member.rsplit(['/', '\\']).next().unwrap_or(member);
    if base.to_lowercase().ends_with(".csv") {
        base.to_owned()
    } else {
        format!("{base}.csv")
    }
}
