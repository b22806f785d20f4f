//! Persisted datasets: one partition per month, per year, and one combined,
//! each kept in a tabular and a document form.

use chrono::{NaiveDate, NaiveDateTime};
use std::{
    fmt::Debug,
    fs,
    path::{Path, PathBuf},
};

use crate::{
    AggregationLevel, CanonicalRecord,
    error::StoreError,
    store::{csv_format::CsvFormat, json_format::JsonFormat},
    window::{DateWindow, epoch_start},
};

pub mod csv_format;
pub mod json_format;

const FILE_PREFIX: &str = "earthquakes";

/// One serialized form of a partition.
pub trait PartitionFormat: Send + Sync + Debug {
    /// Top-level directory for this form, e.g. `csv`.
    fn dir_name(&self) -> &'static str;

    fn extension(&self) -> &'static str;

    /// Add `records` after the existing content, creating the file if needed.
    fn append(&self, path: &Path, records: &[CanonicalRecord]) -> Result<(), StoreError>;

    /// Replace the whole content with `records`.
    fn rewrite(&self, path: &Path, records: &[CanonicalRecord]) -> Result<(), StoreError>;

    fn read(&self, path: &Path) -> Result<Vec<CanonicalRecord>, StoreError>;
}

/// Key of a single persisted file within an aggregation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartitionKey {
    Month(DateWindow),
    Year(i32),
    Combined,
}

impl PartitionKey {
    pub fn level(&self) -> AggregationLevel {
        match self {
            PartitionKey::Month(_) => AggregationLevel::Monthly,
            PartitionKey::Year(_) => AggregationLevel::Yearly,
            PartitionKey::Combined => AggregationLevel::Combined,
        }
    }

    pub fn file_stem(&self) -> String {
        match self {
            PartitionKey::Month(window) => format!("{FILE_PREFIX}_{}", window.month_stamp()),
            PartitionKey::Year(year) => format!("{FILE_PREFIX}_{year}"),
            PartitionKey::Combined => format!("{FILE_PREFIX}_combined"),
        }
    }
}

impl std::fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PartitionKey::Month(window) => write!(f, "monthly/{window}"),
            PartitionKey::Year(year) => write!(f, "yearly/{year}"),
            PartitionKey::Combined => f.write_str("combined"),
        }
    }
}

/// How a partition write treats existing content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Append,
    Rewrite,
}

/// Where an incremental run picks up, derived from the persisted Combined dataset.
#[derive(Debug, Clone, PartialEq)]
pub enum ResumePoint {
    /// No Combined dataset, or one without records.
    Fresh,
    Resume { last_record: NaiveDateTime },
    /// The Combined dataset exists but could not be read.
    Recovered { reason: String },
}

impl ResumePoint {
    /// Last date already covered, or the day before `start_year` when there is
    /// nothing usable to resume from.
    pub fn last_known_date(&self, start_year: i32) -> Option<NaiveDate> {
        match self {
            ResumePoint::Resume { last_record } => Some(last_record.date()),
            ResumePoint::Fresh | ResumePoint::Recovered { .. } => {
                epoch_start(start_year)?.pred_opt()
            }
        }
    }
}

/// File-backed store rooted at the export directory.
#[derive(Debug, Clone)]
pub struct AggregationStore {
    root: PathBuf,
    csv: CsvFormat,
    json: JsonFormat,
}

impl AggregationStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            csv: CsvFormat,
            json: JsonFormat,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn formats(&self) -> [&dyn PartitionFormat; 2] {
        // Document first: it is rewritten whole, so a failure leaves the rows untouched.
        [&self.json, &self.csv]
    }

    /// Create `{csv,json}/{monthly,yearly,combined}` under the root.
    pub fn ensure_layout(&self) -> Result<(), StoreError> {
        for format in self.formats() {
            for level in AggregationLevel::all() {
                let dir = self.level_dir(format, *level);
                fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
            }
        }
        Ok(())
    }

    fn level_dir(&self, format: &dyn PartitionFormat, level: AggregationLevel) -> PathBuf {
        self.root.join(format.dir_name()).join(level.as_str())
    }

    fn path_for(&self, format: &dyn PartitionFormat, key: &PartitionKey) -> PathBuf {
        self.level_dir(format, key.level())
            .join(format!("{}.{}", key.file_stem(), format.extension()))
    }

    pub fn csv_path(&self, key: &PartitionKey) -> PathBuf {
        self.path_for(&self.csv, key)
    }

    pub fn json_path(&self, key: &PartitionKey) -> PathBuf {
        self.path_for(&self.json, key)
    }

    /// Add `records` to the partition in both forms. Returns `false` without
    /// touching the disk when `records` is empty.
    pub fn append_records(
        &self,
        key: &PartitionKey,
        records: &[CanonicalRecord],
    ) -> Result<bool, StoreError> {
        self.write(WriteMode::Append, key, records)
    }

    /// Replace the partition in both forms. Returns `false` without touching
    /// the disk when `records` is empty.
    pub fn rewrite_records(
        &self,
        key: &PartitionKey,
        records: &[CanonicalRecord],
    ) -> Result<bool, StoreError> {
        self.write(WriteMode::Rewrite, key, records)
    }

    pub fn write(
        &self,
        mode: WriteMode,
        key: &PartitionKey,
        records: &[CanonicalRecord],
    ) -> Result<bool, StoreError> {
        if records.is_empty() {
            return Ok(false);
        }

        for format in self.formats() {
            let path = self.path_for(format, key);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
            }
            match mode {
                WriteMode::Append => format.append(&path, records)?,
                WriteMode::Rewrite => format.rewrite(&path, records)?,
            }
        }

        tracing::debug!(partition = %key, records = records.len(), ?mode, "partition written");
        Ok(true)
    }

    /// Tabular content of a partition; empty if it was never written.
    pub fn read_partition(&self, key: &PartitionKey) -> Result<Vec<CanonicalRecord>, StoreError> {
        let path = self.csv_path(key);
        if !path.exists() {
            return Ok(Vec::new());
        }
        self.csv.read(&path)
    }

    /// Document content of a partition; empty if it was never written.
    pub fn read_json_partition(
        &self,
        key: &PartitionKey,
    ) -> Result<Vec<CanonicalRecord>, StoreError> {
        let path = self.json_path(key);
        if !path.exists() {
            return Ok(Vec::new());
        }
        self.json.read(&path)
    }

    /// Inspect the Combined CSV to find where the next incremental run starts.
    pub fn resume_point(&self) -> ResumePoint {
        let path = self.csv_path(&PartitionKey::Combined);
        if !path.exists() {
            return ResumePoint::Fresh;
        }

        match self.csv.latest_time(&path) {
            Ok(Some(last_record)) => ResumePoint::Resume { last_record },
            Ok(None) => ResumePoint::Fresh,
            Err(err) => ResumePoint::Recovered {
                reason: err.to_string(),
            },
        }
    }
}
