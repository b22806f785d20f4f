//! Normalization of raw source records into the canonical schema.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, SubsecRound, Utc};
use serde_json::Value;
use std::collections::HashSet;

use crate::{
    CanonicalRecord, RawRecord,
    config::{BoundsConfig, Config},
    window::epoch_start,
};

const TIME_FIELD: &str = "time";

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

/// Aggregate counts of dropped records, by reason.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rejections {
    pub bad_timestamp: usize,
    pub non_numeric: usize,
    pub out_of_time_range: usize,
    pub out_of_bounds: usize,
    pub duplicate: usize,
}

impl Rejections {
    pub fn total(&self) -> usize {
        self.bad_timestamp
            + self.non_numeric
            + self.out_of_time_range
            + self.out_of_bounds
            + self.duplicate
    }
}

#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub records: Vec<CanonicalRecord>,
    pub rejections: Rejections,
}

/// Turns raw records into canonical ones, dropping anything that does not fit.
#[derive(Debug, Clone)]
pub struct RecordValidator {
    earliest: NaiveDateTime,
    /// Exclusive.
    cutoff: NaiveDateTime,
    bounds: BoundsConfig,
    local_offset: FixedOffset,
}

impl RecordValidator {
    /// Accepts timestamps in `[earliest, cutoff)` (UTC).
    pub fn new(
        earliest: NaiveDateTime,
        cutoff: NaiveDateTime,
        bounds: BoundsConfig,
        local_offset: FixedOffset,
    ) -> Self {
        Self {
            earliest,
            cutoff,
            bounds,
            local_offset,
        }
    }

    /// Validator for a run ending at `cutoff` (exclusive date).
    pub fn from_config(config: &Config, cutoff: NaiveDate) -> Option<Self> {
        let earliest = epoch_start(config.export.start_year)?.and_hms_opt(0, 0, 0)?;
        let cutoff = cutoff.and_hms_opt(0, 0, 0)?;
        let local_offset = FixedOffset::east_opt(config.local_time.offset_minutes * 60)?;
        Some(Self::new(earliest, cutoff, config.bounds, local_offset))
    }

    /// Output preserves input order; exact duplicates keep the first occurrence.
    pub fn validate(&self, raw: &[RawRecord]) -> ValidationReport {
        let mut report = ValidationReport::default();
        let mut seen = HashSet::with_capacity(raw.len());

        for record in raw {
            let Some(time_utc) = record.get(TIME_FIELD).and_then(parse_timestamp) else {
                report.rejections.bad_timestamp += 1;
                continue;
            };

            let numbers = (
                numeric(record, "latitude"),
                numeric(record, "longitude"),
                numeric(record, "depth"),
                numeric(record, "mag"),
            );
            let (Some(latitude), Some(longitude), Some(depth), Some(mag)) = numbers else {
                report.rejections.non_numeric += 1;
                continue;
            };

            if time_utc < self.earliest || time_utc >= self.cutoff {
                report.rejections.out_of_time_range += 1;
                continue;
            }

            if !(self.bounds.latitude.contains(latitude)
                && self.bounds.longitude.contains(longitude)
                && self.bounds.depth.contains(depth)
                && self.bounds.mag.contains(mag))
            {
                report.rejections.out_of_bounds += 1;
                continue;
            }

            let canonical = CanonicalRecord {
                time_utc,
                time_mmt: time_utc + self.local_offset,
                latitude,
                longitude,
                depth,
                mag,
                location: text(record, "location"),
                country: text(record, "country"),
            };

            if !seen.insert(canonical.identity()) {
                report.rejections.duplicate += 1;
                continue;
            }

            report.records.push(canonical);
        }

        report
    }
}

/// UTC timestamp truncated to whole seconds.
fn parse_timestamp(value: &Value) -> Option<NaiveDateTime> {
    let parsed = match value {
        Value::String(s) => parse_timestamp_str(s.trim())?,
        Value::Number(n) => DateTime::<Utc>::from_timestamp_millis(n.as_i64()?)?.naive_utc(),
        _ => return None,
    };
    Some(parsed.trunc_subsecs(0))
}

fn parse_timestamp_str(s: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    if let Some(dt) = NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
    {
        return Some(dt);
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()?
        .and_hms_opt(0, 0, 0)
}

fn numeric(record: &RawRecord, field: &str) -> Option<f64> {
    let value = match record.get(field)? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    value.is_finite().then_some(value)
}

/// Blank text is absent: the tabular form cannot tell `""` from a missing value.
fn text(record: &RawRecord, field: &str) -> Option<String> {
    match record.get(field)? {
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Array(_) | Value::Object(_) => None,
        other => Some(other.to_string()),
    }
}
