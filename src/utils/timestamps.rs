//! utils/timestamps.rs
//! ISO-8601 UTC timestamp helpers. Timestamps double as ordering keys and as
//! the digit source for generated record ids.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

/// Current time as an RFC 3339 UTC string (`2024-01-19T10:30:00.123456+00:00`).
pub fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

/// Parse an ISO-8601 timestamp. Accepts an explicit offset, a trailing `Z`,
/// a naive datetime (assumed UTC), or a bare date.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(date.and_hms_opt(0, 0, 0)?.and_utc());
    }
    None
}

pub fn validate_timestamp(s: &str) -> bool {
    parse_timestamp(s).is_some()
}

/// Digits of a timestamp string, used as the suffix of generated ids
/// (`goal_20240119103000123456`).
pub fn timestamp_digits(ts: &str) -> String {
    ts.chars().filter(|c| c.is_ascii_digit()).collect()
}
