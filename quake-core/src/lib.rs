//! Core library for the `quake` export tool.
//!
//! This crate defines:
//! - Configuration and logging setup
//! - Calendar-month windows and the remote source they are fetched from
//! - Validation of raw records into the canonical schema
//! - The aggregation store (monthly, yearly, combined; CSV and JSON)
//! - The concurrent export coordinator tying them together
//!
//! It is used by `quake-cli`, but can also be reused by other binaries or services.

pub mod config;
pub mod error;
pub mod export;
pub mod logging;
pub mod model;
pub mod source;
pub mod store;
pub mod validate;
pub mod window;

pub use config::Config;
pub use error::{ExportError, FetchError, StoreError};
pub use export::{ExportMode, ExportPlan, ExportSummary, Exporter};
pub use model::{AggregationLevel, CanonicalRecord, RawRecord};
pub use source::{FetchOutcome, QuakeSource};
pub use store::{AggregationStore, PartitionKey, ResumePoint, WriteMode};
pub use validate::RecordValidator;
pub use window::DateWindow;
