//! Helpers shared by the unit tests

use arrow::array::StringArray;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use std::{io::Write, path::Path};
use zip::write::{FileOptions, ZipWriter};

/// In-memory zip built from (member name, content) pairs
pub fn zip_bytes(members: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = ZipWriter::new(std::io::Cursor::new(Vec::new()));
    for (member, content) in members {
        writer
            .start_file(*member, FileOptions::default())
            .expect("starting a test member should work");
        writer
            .write_all(content)
            .expect("writing a test member should work");
    }
    writer
        .finish()
        .expect("finishing a test zip should work")
        .into_inner()
}

/// Read back a Parquet artifact as (column names, per-column cell values)
pub fn read_artifact(path: &Path) -> (Vec<String>, Vec<Vec<String>>) {
    let file = std::fs::File::open(path).expect("artifact should open");
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)
        .expect("artifact should be valid Parquet")
        .build()
        .expect("artifact should be readable");
    let mut names: Vec<String> = Vec::new();
    let mut columns: Vec<Vec<String>> = Vec::new();
    for batch in reader {
        let batch = batch.expect("batch should decode");
        if names.is_empty() {
            names = batch
                .schema()
                .fields()
                .iter()
                .map(|field| field.name().clone())
                .collect();
            columns.resize(names.len(), Vec::new());
        }
        for (idx, column) in batch.columns().iter().enumerate() {
            let strings = column
                .as_any()
                .downcast_ref::<StringArray>()
                .expect("all columns should be text");
            columns[idx].extend(strings.iter().map(|value| value.unwrap_or("").to_owned()));
        }
    }
    (names, columns)
}
