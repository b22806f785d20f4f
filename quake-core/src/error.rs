use std::{io, path::PathBuf};

use thiserror::Error;

/// Why a single window request produced no usable response.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request timed out: {0}")]
    Timeout(#[source] reqwest::Error),
    #[error("request failed: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("source responded with status {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("failed to read response body: {0}")]
    Body(#[source] reqwest::Error),
    #[error("malformed JSON response: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unexpected response shape: {0}")]
    Shape(String),
    #[error("fetch task did not complete: {0}")]
    Aborted(String),
}

impl FetchError {
    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout(err)
        } else {
            FetchError::Transport(err)
        }
    }
}

/// Failure to read or write a persisted partition.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("CSV error on {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("JSON error on {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn csv(path: impl Into<PathBuf>, source: csv::Error) -> Self {
        StoreError::Csv {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        StoreError::Json {
            path: path.into(),
            source,
        }
    }
}

/// Run-level failure. Fetch and validation problems never surface here.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("persistence failed: {0}")]
    Store(#[from] StoreError),
    #[error("invalid configuration: {0}")]
    Configuration(String),
}
