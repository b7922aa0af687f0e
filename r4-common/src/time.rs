//! Timestamp utilities
//!
//! All timestamps are written to the local store as fixed-width RFC 3339 UTC
//! text with millisecond precision (`2024-05-01T12:00:00.000Z`). Fixed width
//! keeps `MAX(updated_at)` over TEXT columns in chronological order.

use chrono::{DateTime, SecondsFormat, TimeZone, Timelike, Utc};

use crate::{Error, Result};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Format a timestamp for storage
pub fn to_db_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a stored timestamp (any RFC 3339 offset is accepted)
pub fn parse_db_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| Error::InvalidInput(format!("Invalid timestamp '{}': {}", value, e)))
}

/// Parse an optional stored timestamp
pub fn parse_optional_db_timestamp(value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value.as_deref().map(parse_db_timestamp).transpose()
}

/// Drop the sub-second part of a timestamp
pub fn truncate_to_seconds(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.with_nanosecond(0).unwrap_or(ts)
}

/// Convert epoch milliseconds (legacy archive format) to a UTC timestamp
pub fn from_epoch_millis(millis: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single()
}
