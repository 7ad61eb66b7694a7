pub mod subjects;
pub mod types;

use chrono::{SecondsFormat, Utc};

/// Round a value to two decimal places.
///
/// Every metric the agent emits goes through this so that payloads stay
/// compact and stable across collectors.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Current time as an RFC 3339 UTC string with second precision.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round2_trims_to_two_decimals() {
        assert_eq!(round2(12.3456), 12.35);
        assert_eq!(round2(0.004), 0.0);
        assert_eq!(round2(99.999), 100.0);
        assert_eq!(round2(75.0), 75.0);
        assert_eq!(round2(0.0), 0.0);
    }

    #[test]
    fn rfc3339_is_utc_seconds() {
        let ts = now_rfc3339();
        assert!(ts.ends_with('Z'), "timestamp not UTC: {ts}");
        // 2024-01-01T00:00:00Z
        assert_eq!(ts.len(), 20, "unexpected precision: {ts}");
    }
}
