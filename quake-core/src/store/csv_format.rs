use chrono::NaiveDateTime;
use std::{
    fs::{File, OpenOptions},
    path::Path,
};

use crate::{CanonicalRecord, error::StoreError, store::PartitionFormat};

/// Comma-separated rows with a single header line.
#[derive(Debug, Clone, Copy, Default)]
pub struct CsvFormat;

impl CsvFormat {
    fn write_rows(
        &self,
        path: &Path,
        file: File,
        header: bool,
        records: &[CanonicalRecord],
    ) -> Result<(), StoreError> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(header)
            .from_writer(file);

        for record in records {
            writer
                .serialize(record)
                .map_err(|e| StoreError::csv(path, e))?;
        }

        writer.flush().map_err(|e| StoreError::io(path, e))
    }

    /// Latest `time_utc` in the file, `None` when it holds no rows.
    pub(crate) fn latest_time(&self, path: &Path) -> Result<Option<NaiveDateTime>, StoreError> {
        let mut reader = csv::Reader::from_path(path).map_err(|e| StoreError::csv(path, e))?;

        let mut latest: Option<NaiveDateTime> = None;
        for row in reader.deserialize::<CanonicalRecord>() {
            let row = row.map_err(|e| StoreError::csv(path, e))?;
            latest = Some(latest.map_or(row.time_utc, |t| t.max(row.time_utc)));
        }

        Ok(latest)
    }
}

impl PartitionFormat for CsvFormat {
    fn dir_name(&self) -> &'static str {
        "csv"
    }

    fn extension(&self) -> &'static str {
        "csv"
    }

    fn append(&self, path: &Path, records: &[CanonicalRecord]) -> Result<(), StoreError> {
        // A zero-length file gets a header too, otherwise it would never have one.
        let needs_header = std::fs::metadata(path).map_or(true, |m| m.len() == 0);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| StoreError::io(path, e))?;

        self.write_rows(path, file, needs_header, records)
    }

    fn rewrite(&self, path: &Path, records: &[CanonicalRecord]) -> Result<(), StoreError> {
        let file = File::create(path).map_err(|e| StoreError::io(path, e))?;
        self.write_rows(path, file, true, records)
    }

    fn read(&self, path: &Path) -> Result<Vec<CanonicalRecord>, StoreError> {
        let mut reader = csv::Reader::from_path(path).map_err(|e| StoreError::csv(path, e))?;
        reader
            .deserialize()
            .collect::<Result<Vec<CanonicalRecord>, _>>()
            .map_err(|e| StoreError::csv(path, e))
    }
}
