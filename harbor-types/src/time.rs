//! Canonical time representation.
//!
//! Every timestamp that reaches the local cache is rendered as an RFC 3339
//! UTC string with millisecond precision, e.g. `2024-05-01T10:00:00.000Z`.

use crate::{Error, Result};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};

/// Formats a timestamp in the canonical cache representation.
#[must_use]
pub fn format_canonical(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parses an RFC 3339 string, or a zone-less ISO-8601 date-time taken as UTC.
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| Error::InvalidTimestamp(format!("{s}: {e}")))
}

/// Converts milliseconds since the Unix epoch into a timestamp.
pub fn from_epoch_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| Error::InvalidTimestamp(format!("epoch millis out of range: {ms}")))
}

/// Serde adapter writing timestamps in the canonical representation.
pub mod canonical {
    use super::{format_canonical, parse_timestamp};
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_canonical(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_timestamp(&raw).map_err(serde::de::Error::custom)
    }
}
