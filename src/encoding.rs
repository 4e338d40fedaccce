//! Text-encoding normalization to UTF-8
//!
//! The Receita dumps are nominally Latin-1, but some monthly batches come
//! out already UTF-8 encoded. Downstream parsing assumes UTF-8, so every
//! extracted file goes through here first.

use crate::{error::EncodingError, part_sibling};
use std::path::{Path, PathBuf};
use tokio::{
    fs::{self, File},
    io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, BufWriter},
};

/// Bytes sampled when sniffing the encoding
const SAMPLE_BYTES: usize = 1024 * 1024;

/// Ensure that the text at `path` is valid UTF-8
///
/// Returns `path` unchanged when a leading sample already decodes as
/// UTF-8 (no copy is made). Otherwise the file is assumed to be in the
/// publisher's Latin-1 and is transcoded, line by line, into a sibling
/// whose name records the fact; a transcode left by a previous run is
/// reused rather than regenerated. The whole file is never held in
/// memory.
pub async fn ensure_utf8(path: &Path) -> Result<PathBuf, EncodingError> {
    let io_error = |source| EncodingError {
        path: path.to_owned(),
        source,
    };

    if sample_is_utf8(path).await.map_err(io_error)? {
        return Ok(path.to_owned());
    }

    let target = transcoded_path(path);
    if let Ok(meta) = fs::metadata(&target).await {
        if meta.len() > 0 {
            log::info!("Reusing previously transcoded {}", target.display());
            return Ok(target);
        }
    }

    log::info!("Transcoding {} from Latin-1 to UTF-8", path.display());
    transcode_latin1(path, &target).await.map_err(io_error)?;
    Ok(target)
}

/// Check a leading sample of a file for UTF-8 validity
///
/// A decode error caused only by a multi-byte sequence cut at the sample
/// boundary still counts as valid: the sequence continues in the
/// unsampled remainder.
async fn sample_is_utf8(path: &Path) -> std::io::Result<bool> {
    let mut file = File::open(path).await?;
    let mut sample = vec![0u8; SAMPLE_BYTES];
    let mut filled = 0;
    loop {
        let read = file.read(&mut sample[filled..]).await?;
        if read == 0 {
            break;
        }
        filled += read;
        if filled == sample.len() {
            break;
        }
    }
    let cut_short = filled == sample.len();
    sample.truncate(filled);
    Ok(match std::str::from_utf8(&sample) {
        Ok(_) => true,
        Err(error) => cut_short && error.error_len().is_none(),
    })
}

/// Sibling path recording a transcode, `X.csv` → `X.utf8.csv`
fn transcoded_path(path: &Path) -> PathBuf {
    path.with_extension("utf8.csv")
}

/// Stream a Latin-1 file into a UTF-8 copy, line by line
///
/// Latin-1 decoding is total (every byte is the identically numbered
/// Unicode scalar), so nothing can be lost in translation. The copy grows
/// under a `.part` name and is renamed once complete, so an interrupted
/// transcode is never mistaken for a finished one.
async fn transcode_latin1(src: &Path, target: &Path) -> std::io::Result<()> {
    let part = part_sibling(target);
    let mut lines = BufReader::new(File::open(src).await?);
    let mut out = BufWriter::new(File::create(&part).await?);
    let mut line = Vec::new();
    let mut decoded = String::new();
    loop {
        line.clear();
        if lines.read_until(b'\n', &mut line).await? == 0 {
            break;
        }
        decoded.clear();
        decoded.extend(line.iter().map(|&byte| char::from(byte)));
        out.write_all(decoded.as_bytes()).await?;
    }
    out.flush().await?;
    out.into_inner().sync_all().await?;
    fs::rename(&part, target).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn normalize(content: &[u8]) -> (TempDir, PathBuf, PathBuf) {
        let dir = TempDir::new().expect("temp dir should be creatable");
        let input = dir.path().join("dados.csv");
        std::fs::write(&input, content).expect("test input");
        let output = ensure_utf8(&input).await.expect("normalization should succeed");
        (dir, input, output)
    }

    #[tokio::test]
    async fn utf8_input_passes_through_untouched() {
        let (_dir, input, output) = normalize("código;descrição\n1;São Paulo\n".as_bytes()).await;
        assert_eq!(input, output);
        assert!(!transcoded_path(&input).exists());
    }

    #[tokio::test]
    async fn latin1_input_is_transcoded_exactly() {
        // "1;São Paulo\n2;Goiânia\n" in Latin-1
        let latin1 = b"1;S\xe3o Paulo\n2;Goi\xe2nia\n";
        let (_dir, input, output) = normalize(latin1).await;
        assert_eq!(output, transcoded_path(&input));
        let transcoded = std::fs::read_to_string(&output).expect("valid UTF-8 output");
        assert_eq!(transcoded, "1;São Paulo\n2;Goiânia\n");
        assert!(!part_sibling(&output).exists());
    }

    #[tokio::test]
    async fn existing_transcodes_are_reused() {
        let dir = TempDir::new().expect("temp dir should be creatable");
        let input = dir.path().join("dados.csv");
        std::fs::write(&input, b"1;S\xe3o Paulo\n").expect("test input");
        let target = transcoded_path(&input);
        std::fs::write(&target, "sentinel\n").expect("previous transcode");

        let output = ensure_utf8(&input).await.expect("normalization should succeed");
        assert_eq!(output, target);
        assert_eq!(
            std::fs::read_to_string(&target).expect("reused transcode"),
            "sentinel\n"
        );
    }

    #[tokio::test]
    async fn multibyte_sequence_cut_at_the_sample_boundary_counts_as_utf8() {
        // Fill exactly up to one byte before the sample boundary, then
        // emit a two-byte UTF-8 scalar straddling it
        let mut content = vec![b'a'; SAMPLE_BYTES - 1];
        content.extend("é".as_bytes());
        content.push(b'\n');
        let (_dir, input, output) = normalize(&content).await;
        assert_eq!(input, output);
    }

    #[tokio::test]
    async fn truncated_sequence_at_end_of_file_is_treated_as_latin1() {
        // 0xE3 opens a three-byte sequence that never completes; as the
        // file genuinely ends there, this is not valid UTF-8
        let (_dir, input, output) = normalize(b"1;abc\xe3").await;
        assert_eq!(output, transcoded_path(&input));
        assert_eq!(
            std::fs::read_to_string(&output).expect("valid UTF-8 output"),
            "1;abcã"
        );
    }
}
