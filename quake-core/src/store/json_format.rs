use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

use crate::{CanonicalRecord, error::StoreError, store::PartitionFormat};

/// `{"earthquakes": [...]}`, pretty-printed.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonFormat;

#[derive(Debug, Default, Serialize, Deserialize)]
struct Document {
    earthquakes: Vec<CanonicalRecord>,
}

impl JsonFormat {
    fn load(&self, path: &Path) -> Result<Document, StoreError> {
        let bytes = fs::read(path).map_err(|e| StoreError::io(path, e))?;
        serde_json::from_slice(&bytes).map_err(|e| StoreError::json(path, e))
    }

    fn store(&self, path: &Path, document: &Document) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(document).map_err(|e| StoreError::json(path, e))?;

        // The document is replaced whole; never leave a torn file behind.
        let staging = path.with_extension("json.tmp");
        fs::write(&staging, bytes).map_err(|e| StoreError::io(&staging, e))?;
        fs::rename(&staging, path).map_err(|e| StoreError::io(path, e))
    }
}

impl PartitionFormat for JsonFormat {
    fn dir_name(&self) -> &'static str {
        "json"
    }

    fn extension(&self) -> &'static str {
        "json"
    }

    fn append(&self, path: &Path, records: &[CanonicalRecord]) -> Result<(), StoreError> {
        let mut document = if path.exists() {
            self.load(path)?
        } else {
            Document::default()
        };
        document.earthquakes.extend_from_slice(records);
        self.store(path, &document)
    }

    fn rewrite(&self, path: &Path, records: &[CanonicalRecord]) -> Result<(), StoreError> {
        let document = Document {
            earthquakes: records.to_vec(),
        };
        self.store(path, &document)
    }

    fn read(&self, path: &Path) -> Result<Vec<CanonicalRecord>, StoreError> {
        Ok(self.load(path)?.earthquakes)
    }
}
