//! Date/time utilities for tierbox.
//!
//! Timestamps are persisted as fixed-width UTC text so that SQL string
//! comparison orders them chronologically on every backend.

use chrono::{DateTime, NaiveDateTime, Utc};

/// Storage format: `YYYY-MM-DD HH:MM:SS.ffffff`, always UTC.
pub const DB_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Format a UTC timestamp for storage.
pub fn to_db_timestamp(dt: &DateTime<Utc>) -> String {
    dt.format(DB_TIMESTAMP_FORMAT).to_string()
}

/// Parse a stored timestamp.
///
/// Accepts the storage format, plain SQLite `datetime('now')` output and
/// RFC3339. Returns `None` if none of them match.
pub fn parse_db_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, DB_TIMESTAMP_FORMAT) {
        return Some(naive.and_utc());
    }

    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }

    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_round_trip_keeps_microseconds() {
        let dt = Utc.with_ymd_and_hms(2026, 10, 17, 9, 30, 0).unwrap()
            + Duration::microseconds(123_456);
        let s = to_db_timestamp(&dt);

        assert_eq!(s, "2026-10-17 09:30:00.123456");
        assert_eq!(parse_db_timestamp(&s), Some(dt));
    }

    #[test]
    fn test_lexical_order_is_chronological() {
        let early = Utc.with_ymd_and_hms(2026, 1, 9, 23, 59, 59).unwrap();
        let late = early + Duration::milliseconds(1);

        assert!(to_db_timestamp(&early) < to_db_timestamp(&late));
        assert_eq!(to_db_timestamp(&early).len(), to_db_timestamp(&late).len());
    }

    #[test]
    fn test_parse_sqlite_format() {
        let parsed = parse_db_timestamp("2024-01-15 10:30:00").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap());
    }

    #[test]
    fn test_parse_rfc3339() {
        let parsed = parse_db_timestamp("2024-01-15T19:30:00+09:00").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap());
    }

    #[test]
    fn test_parse_invalid() {
        assert!(parse_db_timestamp("not a date").is_none());
        assert!(parse_db_timestamp("").is_none());
    }
}
