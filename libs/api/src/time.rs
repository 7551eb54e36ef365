//! RFC3339 timestamps.
//!
//! Timestamps are stored as strings because remote writers format them and
//! liveness only compares them for equality.

use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};

use crate::ValidationError;

/// Formats the current time as RFC3339 with second precision.
pub fn now() -> String {
    format(Utc::now())
}

pub fn format(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parses an RFC3339 timestamp, reporting `field` on failure.
pub fn parse(field: &str, value: &str) -> Result<DateTime<FixedOffset>, ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::missing(field));
    }
    DateTime::parse_from_rfc3339(value).map_err(|e| ValidationError::invalid(field, e))
}

/// Time elapsed since `value`, or `None` if it does not parse.
pub fn age(value: &str) -> Option<chrono::Duration> {
    let at = DateTime::parse_from_rfc3339(value).ok()?;
    Some(Utc::now().signed_duration_since(at))
}
