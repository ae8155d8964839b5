//! # Cache Utilities
//!
//! Conversions between wall-clock times and the millisecond timestamps kept
//! on memory entries.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch for `time`, clamped to zero.
pub fn to_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}

pub fn from_millis(millis: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(millis)
}

pub fn now_millis() -> u64 {
    to_millis(SystemTime::now())
}

/// Time elapsed since `last_accessed`. Timestamps in the future count as
/// just accessed.
pub fn age_of(last_accessed: SystemTime) -> Duration {
    SystemTime::now()
        .duration_since(last_accessed)
        .unwrap_or_default()
}

/// Whether an entry last accessed at `last_accessed` has outlived `timeout`.
pub fn is_stale(last_accessed: SystemTime, timeout: Duration) -> bool {
    age_of(last_accessed) >= timeout
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_millis_round_trip_precision() {
        let now = SystemTime::now();
        let back = from_millis(to_millis(now));
        assert!(now.duration_since(back).unwrap() < Duration::from_millis(1));
    }

    #[test]
    fn test_staleness() {
        let an_hour_ago = SystemTime::now() - Duration::from_secs(3600);
        assert!(is_stale(an_hour_ago, Duration::from_secs(60)));
        assert!(!is_stale(an_hour_ago, Duration::from_secs(7200)));
    }

    #[test]
    fn test_future_timestamp_is_fresh() {
        let later = SystemTime::now() + Duration::from_secs(3600);
        assert_eq!(age_of(later), Duration::ZERO);
        assert!(!is_stale(later, Duration::from_secs(1)));
    }
}
