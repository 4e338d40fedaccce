//! Ingestion pipeline configuration

use crate::{Args, Result};
use anyhow::Context;
use regex::{Regex, RegexBuilder};
use reqwest::Url;
use std::{
    num::NonZeroUsize,
    path::PathBuf,
    sync::Arc,
};

/// Listing page of the most recent monthly dump
pub const DEFAULT_BASE_URL: &str =
    "https://arquivos.receitafederal.gov.br/dados/cnpj/dados_abertos_cnpj/2025-07/";

/// Final process configuration
///
/// This is the result of digesting [`Args`] once at startup. It is the
/// only state shared between archives and it never changes after
/// construction; every pipeline stage receives it by reference. Please
/// refer to [`Args`] to know more about common fields.
#[allow(missing_docs)]
#[derive(Clone, Debug)]
pub struct Config {
    /// Listing page of the monthly dump
    pub base_url: Url,

    /// Quote character of the source text
    pub quote: u8,

    // Other fields have the same meaning as in Args
    pub work_dir: PathBuf,
    pub out_dir: PathBuf,
    pub keep_zip: bool,
    pub keep_csv: bool,
    pub filter: Option<Regex>,
    pub limit: Option<NonZeroUsize>,
    pub batch_rows: NonZeroUsize,
    pub delimiter: u8,
}
//
impl Config {
    /// Determine process configuration from decoded CLI arguments
    pub(crate) fn new(args: Args) -> Result<Arc<Self>> {
        let Args {
            base_url,
            work_dir,
            out_dir,
            keep_zip,
            keep_csv,
            filter,
            limit,
            batch_rows,
            delimiter,
        } = args;
        let base_url = Url::parse(&base_url).context("parsing the base URL")?;
        let filter = filter
            .map(|filter| {
                RegexBuilder::new(&filter)
                    .case_insensitive(true)
                    .build()
                    .context("compiling the archive name filter")
            })
            .transpose()?;
        Ok(Arc::new(Self {
            base_url,
            quote: b'"',
            work_dir,
            out_dir,
            keep_zip,
            keep_csv,
            filter,
            limit,
            batch_rows,
            delimiter: delimiter as u8,
        }))
    }

    /// Directory where downloaded archives live
    pub fn archives_dir(&self) -> PathBuf {
        self.work_dir.join("archives")
    }

    /// Directory where extracted and transcoded text lives
    pub fn text_dir(&self) -> PathBuf {
        self.work_dir.join("text_tmp")
    }

    /// Columnar artifact path keyed by an archive's stem
    ///
    /// This stem-to-path mapping is the idempotency key of the whole
    /// pipeline: an existing artifact means its archive is done.
    pub fn artifact_path(&self, stem: &str) -> PathBuf {
        self.out_dir.join(format!("{stem}.parquet"))
    }

    /// Configuration pointing at throwaway directories, for tests
    #[cfg(test)]
    pub(crate) fn for_tests(base_url: &str, work_dir: PathBuf, out_dir: PathBuf) -> Arc<Self> {
        Arc::new(Self {
            base_url: Url::parse(base_url).expect("test base URLs should be valid"),
            quote: b'"',
            work_dir,
            out_dir,
            keep_zip: false,
            keep_csv: false,
            filter: None,
            limit: None,
            batch_rows: NonZeroUsize::new(200_000).expect("nonzero literal"),
            delimiter: b';',
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_keyed_by_stem() {
        let config = Config::for_tests(
            "http://localhost/dump/",
            PathBuf::from("/work"),
            PathBuf::from("/out"),
        );
        assert_eq!(config.archives_dir(), PathBuf::from("/work/archives"));
        assert_eq!(config.text_dir(), PathBuf::from("/work/text_tmp"));
        assert_eq!(
            config.artifact_path("Empresas0"),
            PathBuf::from("/out/Empresas0.parquet")
        );
    }
}
