use crate::{Config, RawRecord, error::FetchError, source::http::HttpQuakeSource, window::DateWindow};
use async_trait::async_trait;
use serde_json::Value;
use std::{fmt::Debug, sync::Arc};

pub mod http;

/// Name of the list holding records in a source response.
pub const RECORDS_KEY: &str = "earthquakes";

/// Why a successful response carried no records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmptyReason {
    /// The named list was present and empty.
    EmptyList,
    /// The document had no named list at all.
    MissingList,
}

impl EmptyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmptyReason::EmptyList => "empty list",
            EmptyReason::MissingList => "no earthquakes list in response",
        }
    }
}

/// Result of one window request. Keeps "nothing happened" apart from
/// "we could not find out".
#[derive(Debug)]
pub enum FetchOutcome {
    Records(Vec<RawRecord>),
    Empty(EmptyReason),
    Failed(FetchError),
}

impl FetchOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, FetchOutcome::Failed(_))
    }
}

#[async_trait]
pub trait QuakeSource: Send + Sync + Debug {
    /// Fetch every record the source reports for `window`. Never errors;
    /// failures are carried in the outcome.
    async fn fetch(&self, window: &DateWindow) -> FetchOutcome;
}

/// Construct the HTTP source from config.
pub fn source_from_config(config: &Config) -> anyhow::Result<Arc<dyn QuakeSource>> {
    let source = HttpQuakeSource::new(config.source.api_url.clone(), config.source.timeout())?;
    Ok(Arc::new(source))
}

/// Split a response document into its record list.
pub(crate) fn parse_listing(body: &str) -> Result<FetchOutcome, FetchError> {
    let document: Value = serde_json::from_str(body)?;

    let Value::Object(mut root) = document else {
        return Err(FetchError::Shape("top-level value is not an object".to_string()));
    };

    let list = match root.remove(RECORDS_KEY) {
        None | Some(Value::Null) => return Ok(FetchOutcome::Empty(EmptyReason::MissingList)),
        Some(Value::Array(list)) => list,
        Some(other) => {
            return Err(FetchError::Shape(format!(
                "`{RECORDS_KEY}` is {}, expected a list",
                json_kind(&other)
            )));
        }
    };

    let total = list.len();
    let records: Vec<RawRecord> = list
        .into_iter()
        .filter_map(|item| match item {
            Value::Object(map) => Some(RawRecord::from(map)),
            _ => None,
        })
        .collect();

    if records.len() < total {
        tracing::debug!(skipped = total - records.len(), "non-object entries in response list");
    }

    if records.is_empty() {
        Ok(FetchOutcome::Empty(EmptyReason::EmptyList))
    } else {
        Ok(FetchOutcome::Records(records))
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}
