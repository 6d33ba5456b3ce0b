//! Direct-call rate limiting
//!
//! A spider may be called directly at most once per interval. The limiter is
//! a pure function of the spider's `last_run_at` stamp; recording a call is
//! the run counter increment the orchestrator performs under the same storage
//! lock as the check.

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde_json::Value;

/// Setting holding installation-wide options
pub const SYSTEM_SETTING_KEY: &str = "system";

/// Key of the interval inside the system setting
pub const INTERVAL_SETTING_FIELD: &str = "apiCallIntervalMinutes";

/// Outcome of a rate-limit check
#[derive(Debug, Clone, PartialEq)]
pub enum RateDecision {
    Allow,
    Deny {
        remaining_seconds: f64,
        next_allowed_at: DateTime<Utc>,
    },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Decides whether a direct call may run now
///
/// # Arguments
///
/// * `last_run_at` - Stored timestamp of the previous run, if any
/// * `interval_minutes` - Minimum spacing between calls; 0 disables the limit
/// * `now` - Current time
///
/// An absent or unparsable timestamp allows the call. A timestamp in the
/// future counts as zero elapsed time.
pub fn check(last_run_at: Option<&str>, interval_minutes: u32, now: DateTime<Utc>) -> RateDecision {
    if interval_minutes == 0 {
        return RateDecision::Allow;
    }

    let Some(last) = last_run_at.and_then(parse_timestamp) else {
        return RateDecision::Allow;
    };

    let interval = Duration::minutes(i64::from(interval_minutes));
    let elapsed = (now - last).max(Duration::zero());
    if elapsed >= interval {
        return RateDecision::Allow;
    }

    let remaining = interval - elapsed;
    RateDecision::Deny {
        remaining_seconds: remaining.num_milliseconds() as f64 / 1000.0,
        next_allowed_at: now + remaining,
    }
}

/// Parses an RFC 3339 timestamp, or a naive ISO 8601 one taken as UTC
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }

    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .map(|naive| naive.and_utc())
}

/// Reads the interval override from the raw system setting
///
/// Falls back to `default` when the setting is absent, unparsable, or does
/// not hold a non-negative whole number of minutes.
pub fn interval_from_setting(raw: Option<&str>, default: u32) -> u32 {
    let Some(raw) = raw else {
        return default;
    };

    let value = match serde_json::from_str::<Value>(raw) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!("Ignoring unparsable {} setting: {}", SYSTEM_SETTING_KEY, e);
            return default;
        }
    };

    match value.get(INTERVAL_SETTING_FIELD) {
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(default),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(default),
        _ => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_never_run_allows() {
        assert_eq!(check(None, 5, t0()), RateDecision::Allow);
    }

    #[test]
    fn test_just_inside_interval_denies() {
        let last = t0().to_rfc3339();
        let now = t0() + Duration::minutes(4) + Duration::seconds(59);

        match check(Some(&last), 5, now) {
            RateDecision::Deny {
                remaining_seconds,
                next_allowed_at,
            } => {
                assert!((remaining_seconds - 1.0).abs() < 1e-6);
                assert_eq!(next_allowed_at, t0() + Duration::minutes(5));
            }
            RateDecision::Allow => panic!("expected deny"),
        }
    }

    #[test]
    fn test_after_interval_allows() {
        let last = t0().to_rfc3339();
        let now = t0() + Duration::minutes(5) + Duration::seconds(1);
        assert!(check(Some(&last), 5, now).is_allowed());
        assert!(check(Some(&last), 5, t0() + Duration::minutes(5)).is_allowed());
    }

    #[test]
    fn test_zero_interval_disables() {
        let last = t0().to_rfc3339();
        assert!(check(Some(&last), 0, t0()).is_allowed());
    }

    #[test]
    fn test_unparsable_timestamp_allows() {
        assert!(check(Some("yesterday"), 5, t0()).is_allowed());
    }

    #[test]
    fn test_future_timestamp_denies_full_interval() {
        let last = (t0() + Duration::minutes(10)).to_rfc3339();
        match check(Some(&last), 5, t0()) {
            RateDecision::Deny { remaining_seconds, .. } => assert_eq!(remaining_seconds, 300.0),
            RateDecision::Allow => panic!("expected deny"),
        }
    }

    #[test]
    fn test_naive_timestamp_is_utc() {
        assert_eq!(parse_timestamp("2024-05-01T12:00:00"), Some(t0()));
        assert_eq!(parse_timestamp("2024-05-01 12:00:00.000"), Some(t0()));
        assert_eq!(parse_timestamp("2024-05-01T14:00:00+02:00"), Some(t0()));
    }

    #[test]
    fn test_interval_from_setting() {
        assert_eq!(interval_from_setting(None, 5), 5);
        assert_eq!(interval_from_setting(Some(r#"{"apiCallIntervalMinutes": 1}"#), 5), 1);
        assert_eq!(interval_from_setting(Some(r#"{"apiCallIntervalMinutes": "2"}"#), 5), 2);
        assert_eq!(interval_from_setting(Some(r#"{"apiCallIntervalMinutes": -1}"#), 5), 5);
        assert_eq!(interval_from_setting(Some(r#"{"theme": "dark"}"#), 5), 5);
        assert_eq!(interval_from_setting(Some("not json"), 5), 5);
    }
}
