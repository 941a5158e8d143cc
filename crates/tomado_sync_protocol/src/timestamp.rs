//! Timestamp conversion between local epoch milliseconds and wire ISO-8601.

use crate::error::{ProtocolError, ProtocolResult};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};

/// Returns the current time in epoch milliseconds.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Formats epoch milliseconds as an ISO-8601 UTC string with millisecond precision.
pub fn millis_to_iso(millis: i64) -> ProtocolResult<String> {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
        .ok_or_else(|| ProtocolError::InvalidTimestamp {
            field: String::new(),
            value: millis.to_string(),
        })
}

/// Parses an ISO-8601 string into epoch milliseconds.
///
/// Accepts RFC 3339 with any offset, and naive `YYYY-MM-DDTHH:MM:SS[.fff]`
/// strings which are taken to be UTC.
pub fn iso_to_millis(value: &str) -> ProtocolResult<i64> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.timestamp_millis());
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc().timestamp_millis())
        .map_err(|_| ProtocolError::InvalidTimestamp {
            field: String::new(),
            value: value.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_with_millis_and_z() {
        assert_eq!(millis_to_iso(0).unwrap(), "1970-01-01T00:00:00.000Z");
        assert_eq!(
            millis_to_iso(1_735_689_600_123).unwrap(),
            "2025-01-01T00:00:00.123Z"
        );
    }

    #[test]
    fn parses_offsets_and_naive_strings() {
        assert_eq!(iso_to_millis("2025-01-01T00:00:00Z").unwrap(), 1_735_689_600_000);
        assert_eq!(
            iso_to_millis("2025-01-01T02:00:00+02:00").unwrap(),
            1_735_689_600_000
        );
        assert_eq!(
            iso_to_millis("2025-01-01T00:00:00.250").unwrap(),
            1_735_689_600_250
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            iso_to_millis("yesterday"),
            Err(ProtocolError::InvalidTimestamp { .. })
        ));
    }
}
