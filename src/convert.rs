//! Streaming conversion of delimited text to a Parquet artifact

use crate::{
    config::Config,
    error::ConvertError,
    part_sibling,
    progress::ProgressReport,
    schema::{ColumnSchema, SchemaOrigin},
};
use arrow::{
    array::{ArrayRef, RecordBatch, StringArray},
    datatypes::{DataType, Field, Schema},
};
use csv_async::{AsyncReaderBuilder, StringRecord};
use futures::StreamExt;
use parquet::{
    arrow::AsyncArrowWriter,
    basic::{Compression, ZstdLevel},
    file::properties::WriterProperties,
};
use std::{path::Path, sync::Arc};
use tokio::fs::{self, File};

/// Outcome counters of one conversion
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ConversionReport {
    /// Rows written to the artifact
    pub rows: u64,

    /// Rows skipped because their field count did not match the schema
    pub malformed: u64,
}

/// Convert the text at `text_path` into a Parquet artifact
///
/// Rows are read in fixed-size batches so memory stays bounded whatever
/// the input size, and every column is stored as plain text: type
/// inference would mangle the register's leading-zero identifiers. The
/// artifact grows under a `.part` name and only moves to `artifact_path`
/// after the writer has closed cleanly, so an existing artifact is always
/// a complete one.
pub async fn to_parquet(
    text_path: &Path,
    artifact_path: &Path,
    schema: &ColumnSchema,
    config: &Config,
    report: &ProgressReport,
) -> Result<ConversionReport, ConvertError> {
    let io_error = |source| ConvertError::Io {
        path: artifact_path.to_owned(),
        source,
    };
    let parquet_error = |source| ConvertError::Parquet {
        path: artifact_path.to_owned(),
        source,
    };
    let csv_error = |source| ConvertError::Csv {
        path: text_path.to_owned(),
        source,
    };

    // The resolved schema fixes the artifact's column layout up front;
    // every batch reuses it
    let fields = schema
        .names
        .iter()
        .map(|name| Field::new(name, DataType::Utf8, true))
        .collect::<Vec<_>>();
    let arrow_schema = Arc::new(Schema::new(fields));
    let properties = WriterProperties::builder()
        .set_compression(Compression::ZSTD(ZstdLevel::default()))
        .set_dictionary_enabled(false)
        .build();

    let part = part_sibling(artifact_path);
    if let Some(parent) = artifact_path.parent() {
        fs::create_dir_all(parent).await.map_err(io_error)?;
    }
    let out = File::create(&part).await.map_err(io_error)?;
    let mut writer =
        AsyncArrowWriter::try_new(out, arrow_schema.clone(), Some(properties)).map_err(parquet_error)?;

    let input = File::open(text_path).await.map_err(|source| ConvertError::Io {
        path: text_path.to_owned(),
        source,
    })?;
    let mut reader = AsyncReaderBuilder::new()
        .delimiter(config.delimiter)
        .quote(config.quote)
        .has_headers(false)
        .flexible(true)
        .create_reader(input);
    let mut records = reader.records();

    let bar = report.rows(format!(
        "Converting {}",
        text_path.file_name().and_then(|n| n.to_str()).unwrap_or("text")
    ));
    // A header row only leaves the data stream if schema resolution
    // consumed it; under a fixed or synthetic schema the first line is
    // data like any other
    let mut skip_first = schema.origin == SchemaOrigin::Header;
    let mut counts = ConversionReport::default();
    let mut batch = Vec::with_capacity(config.batch_rows.get());
    while let Some(record) = records.next().await {
        let record = record.map_err(csv_error)?;
        if std::mem::take(&mut skip_first) {
            continue;
        }
        if record.len() != schema.names.len() {
            counts.malformed += 1;
            log::debug!(
                "Skipping malformed row of {}: {} fields, expected {}",
                text_path.display(),
                record.len(),
                schema.names.len()
            );
            continue;
        }
        batch.push(record);
        if batch.len() == config.batch_rows.get() {
            write_batch(&mut writer, &arrow_schema, &batch, artifact_path).await?;
            counts.rows += batch.len() as u64;
            bar.inc(batch.len() as u64);
            batch.clear();
        }
    }
    if !batch.is_empty() {
        write_batch(&mut writer, &arrow_schema, &batch, artifact_path).await?;
        counts.rows += batch.len() as u64;
        bar.inc(batch.len() as u64);
    }

    // Only a cleanly closed artifact may appear under the final name
    writer.close().await.map_err(parquet_error)?;
    fs::rename(&part, artifact_path).await.map_err(io_error)?;
    report.finish(bar);

    if counts.malformed > 0 {
        log::warn!(
            "Skipped {} malformed row(s) while converting {}",
            counts.malformed,
            text_path.display()
        );
    }
    Ok(counts)
}

/// Append one batch of records as a single all-text record batch
async fn write_batch(
    writer: &mut AsyncArrowWriter<File>,
    schema: &Arc<Schema>,
    rows: &[StringRecord],
    artifact_path: &Path,
) -> Result<(), ConvertError> {
    let columns = (0..schema.fields().len())
        .map(|idx| {
            Arc::new(rows.iter().map(|row| row.get(idx)).collect::<StringArray>()) as ArrayRef
        })
        .collect::<Vec<_>>();
    let batch = RecordBatch::try_new(schema.clone(), columns).map_err(|source| {
        ConvertError::Arrow {
            path: artifact_path.to_owned(),
            source,
        }
    })?;
    writer.write(&batch).await.map_err(|source| ConvertError::Parquet {
        path: artifact_path.to_owned(),
        source,
    })
}
