use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Column order of every persisted dataset.
pub const CANONICAL_COLUMNS: [&str; 8] = [
    "time_utc",
    "time_mmt",
    "latitude",
    "longitude",
    "depth",
    "mag",
    "location",
    "country",
];

/// Rendering used for both timestamp columns.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A record exactly as the remote source reported it. The shape is not
/// guaranteed to be stable between requests.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRecord(pub Map<String, Value>);

impl RawRecord {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field).filter(|v| !v.is_null())
    }
}

impl From<Map<String, Value>> for RawRecord {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// A validated earthquake record in the fixed canonical column order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    #[serde(with = "timestamp")]
    pub time_utc: NaiveDateTime,
    #[serde(with = "timestamp")]
    pub time_mmt: NaiveDateTime,
    pub latitude: f64,
    pub longitude: f64,
    pub depth: f64,
    pub mag: f64,
    pub location: Option<String>,
    pub country: Option<String>,
}

/// Hashable identity of a record: every field, floats compared bitwise.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct RecordIdentity {
    time_utc: NaiveDateTime,
    time_mmt: NaiveDateTime,
    coords: [u64; 4],
    location: Option<String>,
    country: Option<String>,
}

impl CanonicalRecord {
    pub(crate) fn identity(&self) -> RecordIdentity {
        // -0.0 and 0.0 compare equal as values, so fold them before taking bits.
        let bits = |v: f64| (v + 0.0).to_bits();
        RecordIdentity {
            time_utc: self.time_utc,
            time_mmt: self.time_mmt,
            coords: [
                bits(self.latitude),
                bits(self.longitude),
                bits(self.depth),
                bits(self.mag),
            ],
            location: self.location.clone(),
            country: self.country.clone(),
        }
    }
}

/// The three persisted views of the same record set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregationLevel {
    Monthly,
    Yearly,
    Combined,
}

impl AggregationLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregationLevel::Monthly => "monthly",
            AggregationLevel::Yearly => "yearly",
            AggregationLevel::Combined => "combined",
        }
    }

    pub const fn all() -> &'static [AggregationLevel] {
        &[
            AggregationLevel::Monthly,
            AggregationLevel::Yearly,
            AggregationLevel::Combined,
        ]
    }
}

impl std::fmt::Display for AggregationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

mod timestamp {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    use super::TIMESTAMP_FORMAT;

    pub fn serialize<S: Serializer>(value: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(&value.format(TIMESTAMP_FORMAT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveDateTime::parse_from_str(raw.trim(), TIMESTAMP_FORMAT).map_err(D::Error::custom)
    }
}
