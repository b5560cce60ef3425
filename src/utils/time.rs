//! Wall-clock helpers.
//!
//! Engine logic takes `now` as a parameter; only the runtime edges read the clock.

use chrono::{TimeZone, Utc};

/// Current Unix time in seconds
pub fn unix_now() -> u64 {
    Utc::now().timestamp().max(0) as u64
}

/// RFC 3339 rendering of a Unix timestamp, for human output
pub fn format_timestamp(secs: u64) -> String {
    let secs = i64::try_from(secs).unwrap_or(i64::MAX);
    match Utc.timestamp_opt(secs, 0).single() {
        Some(dt) => dt.to_rfc3339(),
        None => format!("{}s", secs),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(0), "1970-01-01T00:00:00+00:00");
        assert!(unix_now() > 1_600_000_000);
    }
}
