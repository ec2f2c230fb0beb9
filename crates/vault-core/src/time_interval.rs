//! ============================================================================
//! Calendar-Aligned Refresh Intervals
//! ============================================================================
//! Shared by the catalog expiration window and per-day purchase limits.
//! Intervals are anchored to UTC midnight of the reference date, so two
//! clients asking at different times of day agree on the same bounds.
//! ============================================================================

use chrono::{DateTime, Duration, TimeZone, Utc};

/// Compute the `[start, end)` interval containing `center`.
///
/// Intervals advance from midnight in `hours_per_interval` steps. The last
/// interval of the day always ends exactly at the next midnight: a trailing
/// remainder shorter than one hour is absorbed into the final interval
/// instead of becoming its own. `hours_per_interval <= 0` degenerates to a
/// single whole-day interval.
pub fn refresh_interval(
    center: DateTime<Utc>,
    hours_per_interval: i64,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let midnight = Utc
        .from_utc_datetime(&center.date_naive().and_hms_opt(0, 0, 0).expect("valid midnight"));
    let next_midnight = midnight + Duration::hours(24);

    if hours_per_interval <= 0 || hours_per_interval >= 24 {
        return (midnight, next_midnight);
    }

    let elapsed_hours = (center - midnight).num_hours();
    let index = elapsed_hours / hours_per_interval;
    let start = midnight + Duration::hours(index * hours_per_interval);
    let mut end = start + Duration::hours(hours_per_interval);

    // Clamp the final interval of the day to midnight, and absorb any
    // sub-one-hour trailing remainder into it.
    if end > next_midnight || next_midnight - end < Duration::hours(1) {
        end = next_midnight;
    }

    (start, end)
}

/// True when `a` and `b` fall inside the same interval.
pub fn same_interval(a: DateTime<Utc>, b: DateTime<Utc>, hours_per_interval: i64) -> bool {
    refresh_interval(a, hours_per_interval).0 == refresh_interval(b, hours_per_interval).0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn test_last_interval_clamped_to_midnight() {
        let (start, end) = refresh_interval(utc("2024-03-01T23:10:00Z"), 6);
        assert_eq!(start, utc("2024-03-01T18:00:00Z"));
        assert_eq!(end, utc("2024-03-02T00:00:00Z"));
    }

    #[test]
    fn test_even_division() {
        let (start, end) = refresh_interval(utc("2024-03-01T07:30:00Z"), 6);
        assert_eq!(start, utc("2024-03-01T06:00:00Z"));
        assert_eq!(end, utc("2024-03-01T12:00:00Z"));
    }

    #[test]
    fn test_uneven_division_trailing_absorbed() {
        // 24 % 7 leaves [21:00, 24:00), a 3-hour final interval
        let (start, end) = refresh_interval(utc("2024-03-01T22:00:00Z"), 7);
        assert_eq!(start, utc("2024-03-01T21:00:00Z"));
        assert_eq!(end, utc("2024-03-02T00:00:00Z"));
    }

    #[test]
    fn test_exactly_one_hour_trailing_kept() {
        // 23-hour intervals leave exactly [23:00, 24:00), which survives
        let (start, end) = refresh_interval(utc("2024-03-01T23:30:00Z"), 23);
        assert_eq!(start, utc("2024-03-01T23:00:00Z"));
        assert_eq!(end, utc("2024-03-02T00:00:00Z"));
    }

    #[test]
    fn test_degenerate_whole_day() {
        for hours in [0, -3, 24, 48] {
            let (start, end) = refresh_interval(utc("2024-03-01T13:00:00Z"), hours);
            assert_eq!(start, utc("2024-03-01T00:00:00Z"));
            assert_eq!(end, utc("2024-03-02T00:00:00Z"));
        }
    }

    #[test]
    fn test_same_interval() {
        assert!(same_interval(
            utc("2024-03-01T06:10:00Z"),
            utc("2024-03-01T11:59:00Z"),
            6
        ));
        assert!(!same_interval(
            utc("2024-03-01T06:10:00Z"),
            utc("2024-03-01T12:01:00Z"),
            6
        ));
        // day boundary always splits
        assert!(!same_interval(
            utc("2024-03-01T23:00:00Z"),
            utc("2024-03-02T01:00:00Z"),
            0
        ));
    }
}
