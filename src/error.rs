//! Error taxonomy of the ingestion pipeline
//!
//! Only [`DiscoveryError`] is fatal to a run: with no archive index there
//! is nothing to ingest. Every other error is scoped to a single archive,
//! caught at the orchestrator boundary and reported in the run summary
//! while the remaining archives proceed.

use std::{io, path::PathBuf};
use thiserror::Error;

/// Failure to resolve the archive index (fatal for the whole run)
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The listing page could not be fetched
    #[error("failed to fetch the archive listing at {url}")]
    Fetch {
        url: Box<str>,
        #[source]
        source: reqwest::Error,
    },

    /// The listing page contains no archive links
    #[error("no archives found in the listing at {url}")]
    NoArchives { url: Box<str> },
}

/// Failure to download one archive
#[derive(Debug, Error)]
pub enum FetchError {
    /// The request could not be sent or its body could not be streamed
    #[error("request for {url} failed")]
    Request {
        url: Box<str>,
        #[source]
        source: reqwest::Error,
    },

    /// The server answered with a status that is neither 200 nor 206
    #[error("unexpected status {status} for {url}")]
    Status {
        url: Box<str>,
        status: reqwest::StatusCode,
    },

    /// Local file handling around the download failed
    #[error("i/o failure while downloading to {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The archive fails the integrity check right after its own fetch
    #[error("{} failed the archive integrity check after a fresh fetch", path.display())]
    Integrity { path: PathBuf },
}

/// Failure to extract the tabular member of one archive
#[derive(Debug, Error)]
pub enum ExtractError {
    /// The archive lists no file members at all
    #[error("archive {} lists no members", path.display())]
    EmptyArchive { path: PathBuf },

    /// The archive structure or a member could not be read
    #[error("cannot read archive {}", path.display())]
    Archive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    /// Writing the extracted member to the working directory failed
    #[error("i/o failure while extracting {member} from {}", path.display())]
    Io {
        path: PathBuf,
        member: Box<str>,
        #[source]
        source: io::Error,
    },
}

/// Failure to normalize the encoding of one extracted text file
///
/// Latin-1 decoding is total, so the only way normalization can fail is
/// through the file system; text is never silently truncated or mangled.
#[derive(Debug, Error)]
#[error("i/o failure while normalizing the encoding of {}", path.display())]
pub struct EncodingError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

/// Failure to sample one text file during schema resolution
///
/// The resolution logic itself is total (it always produces some schema);
/// only reading the sample can fail.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// The sample could not be read
    #[error("i/o failure while sampling {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The sample could not be parsed as delimited text
    #[error("cannot parse a sample of {}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv_async::Error,
    },
}

/// Failure to convert one text file into a columnar artifact
#[derive(Debug, Error)]
pub enum ConvertError {
    /// The source could not be parsed as delimited text
    #[error("cannot parse {} as delimited text", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv_async::Error,
    },

    /// A record batch was rejected while assembling columns
    #[error("arrow rejected a record batch for {}", path.display())]
    Arrow {
        path: PathBuf,
        #[source]
        source: arrow::error::ArrowError,
    },

    /// The Parquet writer failed
    #[error("failed to write the columnar artifact {}", path.display())]
    Parquet {
        path: PathBuf,
        #[source]
        source: parquet::errors::ParquetError,
    },

    /// File handling around the artifact failed
    #[error("i/o failure while writing {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Any way a single archive can fail without taking the run down
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Encoding(#[from] EncodingError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Convert(#[from] ConvertError),
}
//
impl ArchiveError {
    /// Pipeline stage that produced the error, for the run summary
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Fetch(_) => "fetch",
            Self::Extract(_) => "extract",
            Self::Encoding(_) => "normalize",
            Self::Schema(_) => "schema",
            Self::Convert(_) => "convert",
        }
    }
}
