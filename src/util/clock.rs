//! Wall-clock helpers and time-unit conversions.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

/// Granularity used when expressing delays and waits as plain integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeUnit {
    /// Nanoseconds.
    Nanoseconds,
    /// Microseconds.
    Microseconds,
    /// Milliseconds.
    Milliseconds,
    /// Seconds.
    Seconds,
    /// Minutes.
    Minutes,
}

impl TimeUnit {
    /// Build a `Duration` of `amount` units.
    #[must_use]
    pub const fn to_duration(self, amount: u64) -> Duration {
        match self {
            Self::Nanoseconds => Duration::from_nanos(amount),
            Self::Microseconds => Duration::from_micros(amount),
            Self::Milliseconds => Duration::from_millis(amount),
            Self::Seconds => Duration::from_secs(amount),
            Self::Minutes => Duration::from_secs(amount.saturating_mul(60)),
        }
    }

    /// Express `duration` in this unit, truncating and saturating at `i64::MAX`.
    #[must_use]
    pub fn convert(self, duration: Duration) -> i64 {
        let value = match self {
            Self::Nanoseconds => duration.as_nanos(),
            Self::Microseconds => duration.as_micros(),
            Self::Milliseconds => duration.as_millis(),
            Self::Seconds => u128::from(duration.as_secs()),
            Self::Minutes => u128::from(duration.as_secs() / 60),
        };
        i64::try_from(value).unwrap_or(i64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_duration() {
        assert_eq!(TimeUnit::Milliseconds.to_duration(250), Duration::from_millis(250));
        assert_eq!(TimeUnit::Minutes.to_duration(2), Duration::from_secs(120));
    }

    #[test]
    fn test_convert_truncates() {
        let d = Duration::from_millis(1_999);
        assert_eq!(TimeUnit::Seconds.convert(d), 1);
        assert_eq!(TimeUnit::Milliseconds.convert(d), 1_999);
        assert_eq!(TimeUnit::Microseconds.convert(d), 1_999_000);
    }

    #[test]
    fn test_now_ms_is_monotonic_enough() {
        let a = now_ms();
        let b = now_ms();
        assert!(b >= a);
    }
}
