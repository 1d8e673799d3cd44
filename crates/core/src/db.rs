//! Shared SQLite helpers.

use chrono::{DateTime, SecondsFormat, Utc};

/// Fixed-width RFC 3339 so lexical order in SQL matches time order.
pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_lexical_order_matches_time_order() {
        let whole = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let fractional = whole + Duration::microseconds(1);
        assert!(format_timestamp(&whole) < format_timestamp(&fractional));
        assert_eq!(format_timestamp(&whole).len(), format_timestamp(&fractional).len());
    }

    #[test]
    fn test_round_trip() {
        let ts = Utc.with_ymd_and_hms(2025, 6, 30, 23, 59, 59).unwrap();
        assert_eq!(parse_timestamp(&format_timestamp(&ts)), Some(ts));
        assert!(parse_timestamp("not a date").is_none());
    }
}
