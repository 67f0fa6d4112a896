use chrono::{DateTime, Duration, SecondsFormat, Utc};

/// Formats a timestamp as fixed-width RFC 3339 UTC.
///
/// Always microsecond precision with a `Z` suffix, so that string
/// comparison inside SQL orders the same way as the timestamps themselves.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Current time in the canonical storage format.
pub fn now_timestamp() -> String {
    format_timestamp(Utc::now())
}

/// Current time plus an offset, in the canonical storage format.
pub fn timestamp_in(seconds: i64) -> String {
    format_timestamp(Utc::now() + Duration::seconds(seconds))
}

/// Parses a stored timestamp back into a `DateTime<Utc>`.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_roundtrip() {
        let now = Utc::now();
        let formatted = format_timestamp(now);
        let parsed = parse_timestamp(&formatted).unwrap();
        assert_eq!(parsed.timestamp_micros(), now.timestamp_micros());
    }

    #[test]
    fn test_timestamp_string_ordering() {
        let earlier = format_timestamp(Utc::now());
        let later = timestamp_in(60);
        assert!(earlier < later);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_timestamp("not a timestamp").is_none());
    }
}
