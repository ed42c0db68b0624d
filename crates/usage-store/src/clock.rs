//! Wall-clock source for timestamps and month boundaries.

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use std::fmt::Debug;

/// Source of the current time.
pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock frozen at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Last second of the calendar month containing `at` (UTC).
pub fn end_of_month(at: DateTime<Utc>) -> DateTime<Utc> {
    let (year, month) = if at.month() == 12 {
        (at.year() + 1, 1)
    } else {
        (at.year(), at.month() + 1)
    };

    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0)
        .single()
        .map(|next| next - Duration::seconds(1))
        .unwrap_or(at)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_end_of_month() {
        let mid = Utc.with_ymd_and_hms(2026, 10, 16, 9, 30, 0).unwrap();
        assert_eq!(
            end_of_month(mid),
            Utc.with_ymd_and_hms(2026, 10, 31, 23, 59, 59).unwrap()
        );
    }

    #[test]
    fn test_end_of_month_december_and_leap_year() {
        let dec = Utc.with_ymd_and_hms(2025, 12, 1, 0, 0, 0).unwrap();
        assert_eq!(
            end_of_month(dec),
            Utc.with_ymd_and_hms(2025, 12, 31, 23, 59, 59).unwrap()
        );

        let feb = Utc.with_ymd_and_hms(2028, 2, 10, 0, 0, 0).unwrap();
        assert_eq!(
            end_of_month(feb),
            Utc.with_ymd_and_hms(2028, 2, 29, 23, 59, 59).unwrap()
        );
    }
}
