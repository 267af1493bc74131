//! Renewal cycle arithmetic.
//!
//! A renewal cycle is a `(year, month)` bucket that starts on the configured renewal day of
//! that month and runs until the day before the next month's renewal day. With renewal day
//! 25, January 25 through February 24 belong to cycle 2024-01. The renewal day may also be
//! "last day of month", in which case each cycle starts on the month's final calendar day.
//!
//! Everything here is pure; callers pass dates in explicitly.

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

/// Stored value meaning "last day of month".
pub const LAST_DAY_OF_MONTH: i64 = 0;
/// Highest explicit renewal day; every month has at least 28 days.
pub const MAX_RENEWAL_DAY: u32 = 28;

/// Configured day-of-month on which a cycle begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RenewalDay {
    /// Cycle starts on the final calendar day of each month
    LastDayOfMonth,
    /// Cycle starts on this day (1..=28)
    Day(u32),
}

impl Default for RenewalDay {
    fn default() -> Self {
        Self::Day(1)
    }
}

impl RenewalDay {
    /// Interprets a persisted renewal day.
    ///
    /// Older versions allowed 29..=31; anything above 28 is clamped to 28 rather than
    /// rejected. Negative values are treated as "last day of month".
    #[must_use]
    pub fn from_stored(raw: i64) -> Self {
        match raw {
            LAST_DAY_OF_MONTH => Self::LastDayOfMonth,
            day if day < 0 => {
                warn!(raw, "negative renewal day stored, using last day of month");
                Self::LastDayOfMonth
            }
            day if day > i64::from(MAX_RENEWAL_DAY) => {
                warn!(raw, "renewal day out of range, clamping to {MAX_RENEWAL_DAY}");
                Self::Day(MAX_RENEWAL_DAY)
            }
            // 1..=28 fits in u32
            day => Self::Day(u32::try_from(day).unwrap_or(MAX_RENEWAL_DAY)),
        }
    }

    /// Value written to the settings store.
    #[must_use]
    pub fn to_stored(self) -> i64 {
        match self {
            Self::LastDayOfMonth => LAST_DAY_OF_MONTH,
            Self::Day(day) => i64::from(day),
        }
    }
}

impl fmt::Display for RenewalDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LastDayOfMonth => f.write_str("last day of month"),
            Self::Day(day) => write!(f, "day {day}"),
        }
    }
}

/// A `(year, month)` bucket. Ordering is chronological.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CycleKey {
    /// Calendar year
    pub year: i32,
    /// Calendar month (1-12)
    pub month: u32,
}

impl CycleKey {
    /// Creates a key, returning `None` for months outside 1..=12.
    #[must_use]
    pub const fn new(year: i32, month: u32) -> Option<Self> {
        if month >= 1 && month <= 12 {
            Some(Self { year, month })
        } else {
            None
        }
    }

    /// The plain calendar month a date falls in, ignoring the renewal day.
    #[must_use]
    pub fn calendar(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    /// The month before, rolling January back to December of the previous year.
    #[must_use]
    pub const fn previous(self) -> Self {
        if self.month == 1 {
            Self {
                year: self.year - 1,
                month: 12,
            }
        } else {
            Self {
                year: self.year,
                month: self.month - 1,
            }
        }
    }

    /// The month after, rolling December over to January.
    #[must_use]
    pub const fn next(self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    /// First day of the calendar month.
    #[must_use]
    pub fn first_day(self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month, 1)
    }

    /// Half-open `[start, end)` datetime range covering the calendar month.
    #[must_use]
    pub fn calendar_bounds(self) -> Option<(NaiveDateTime, NaiveDateTime)> {
        let start = self.first_day()?.and_hms_opt(0, 0, 0)?;
        let end = self.next().first_day()?.and_hms_opt(0, 0, 0)?;
        Some((start, end))
    }

    /// True when the date falls in this plain calendar month.
    #[must_use]
    pub fn contains_calendar_date(self, date: NaiveDate) -> bool {
        Self::calendar(date) == self
    }
}

impl fmt::Display for CycleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// Number of days in a calendar month, leap-year aware.
#[must_use]
pub fn days_in_month(year: i32, month: u32) -> Option<u32> {
    let key = CycleKey::new(year, month)?;
    key.next().first_day()?.pred_opt().map(|last| last.day())
}

/// The same day-of-month in another month, clamped to that month's last day.
#[must_use]
pub fn clamp_day_into(key: CycleKey, day: u32) -> Option<NaiveDate> {
    let last = days_in_month(key.year, key.month)?;
    NaiveDate::from_ymd_opt(key.year, key.month, day.clamp(1, last))
}

/// Maps dates to renewal cycles for a configured renewal day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RenewalCalculator {
    renewal_day: RenewalDay,
}

impl RenewalCalculator {
    /// Creates a calculator for the given renewal day.
    #[must_use]
    pub const fn new(renewal_day: RenewalDay) -> Self {
        Self { renewal_day }
    }

    /// The configured renewal day.
    #[must_use]
    pub const fn renewal_day(&self) -> RenewalDay {
        self.renewal_day
    }

    /// Day the cycle starts in the given month: the configured day, or the month's last
    /// calendar day (28-31) when configured as last-day. `None` for an invalid month.
    #[must_use]
    pub fn effective_renewal_day(&self, year: i32, month: u32) -> Option<u32> {
        let last = days_in_month(year, month)?;
        Some(match self.renewal_day {
            RenewalDay::LastDayOfMonth => last,
            RenewalDay::Day(day) => day.min(last),
        })
    }

    /// The cycle a date belongs to. Dates before the month's renewal day belong to the
    /// previous month's cycle.
    #[must_use]
    pub fn renewal_cycle(&self, date: NaiveDate) -> CycleKey {
        let current = CycleKey::calendar(date);
        // A valid date always has a valid month
        let renewal = self
            .effective_renewal_day(current.year, current.month)
            .unwrap_or(MAX_RENEWAL_DAY);
        if date.day() < renewal {
            current.previous()
        } else {
            current
        }
    }

    /// First date of the cycle `(year, month)`.
    #[must_use]
    pub fn cycle_start_date(&self, year: i32, month: u32) -> Option<NaiveDate> {
        let day = self.effective_renewal_day(year, month)?;
        NaiveDate::from_ymd_opt(year, month, day)
    }

    /// Last date of a cycle: the day before the next cycle starts.
    #[must_use]
    pub fn cycle_end_date(&self, key: CycleKey) -> Option<NaiveDate> {
        let next = key.next();
        self.cycle_start_date(next.year, next.month)?.pred_opt()
    }

    /// Inclusive `(first, last)` dates of a cycle.
    #[must_use]
    pub fn cycle_bounds(&self, key: CycleKey) -> Option<(NaiveDate, NaiveDate)> {
        Some((
            self.cycle_start_date(key.year, key.month)?,
            self.cycle_end_date(key)?,
        ))
    }

    /// True when both dates belong to the same renewal cycle.
    #[must_use]
    pub fn same_cycle(&self, a: NaiveDate, b: NaiveDate) -> bool {
        self.renewal_cycle(a) == self.renewal_cycle(b)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn key(year: i32, month: u32) -> CycleKey {
        CycleKey::new(year, month).unwrap()
    }

    #[test]
    fn test_from_stored_clamps_legacy_values() {
        assert_eq!(RenewalDay::from_stored(0), RenewalDay::LastDayOfMonth);
        assert_eq!(RenewalDay::from_stored(1), RenewalDay::Day(1));
        assert_eq!(RenewalDay::from_stored(28), RenewalDay::Day(28));
        assert_eq!(RenewalDay::from_stored(29), RenewalDay::Day(28));
        assert_eq!(RenewalDay::from_stored(31), RenewalDay::Day(28));
        assert_eq!(RenewalDay::from_stored(-4), RenewalDay::LastDayOfMonth);
        assert_eq!(RenewalDay::Day(25).to_stored(), 25);
        assert_eq!(RenewalDay::LastDayOfMonth.to_stored(), 0);
    }

    #[test]
    fn test_days_in_month_leap_years() {
        assert_eq!(days_in_month(2024, 2), Some(29));
        assert_eq!(days_in_month(2023, 2), Some(28));
        assert_eq!(days_in_month(1900, 2), Some(28));
        assert_eq!(days_in_month(2000, 2), Some(29));
        assert_eq!(days_in_month(2024, 4), Some(30));
        assert_eq!(days_in_month(2024, 12), Some(31));
        assert_eq!(days_in_month(2024, 13), None);
        assert_eq!(days_in_month(2024, 0), None);
    }

    #[test]
    fn test_effective_renewal_day() {
        let last = RenewalCalculator::new(RenewalDay::LastDayOfMonth);
        assert_eq!(last.effective_renewal_day(2024, 3), Some(31));
        assert_eq!(last.effective_renewal_day(2024, 2), Some(29));
        assert_eq!(last.effective_renewal_day(2023, 2), Some(28));
        assert_eq!(last.effective_renewal_day(2024, 14), None);

        let fixed = RenewalCalculator::new(RenewalDay::Day(25));
        assert_eq!(fixed.effective_renewal_day(2024, 2), Some(25));
    }

    #[test]
    fn test_renewal_cycle_day_25() {
        let calc = RenewalCalculator::new(RenewalDay::Day(25));
        assert_eq!(calc.renewal_cycle(date(2024, 2, 10)), key(2024, 1));
        assert_eq!(calc.renewal_cycle(date(2024, 2, 25)), key(2024, 2));
        assert_eq!(calc.renewal_cycle(date(2024, 1, 25)), key(2024, 1));
        assert_eq!(calc.renewal_cycle(date(2024, 2, 24)), key(2024, 1));
        assert_eq!(calc.renewal_cycle(date(2024, 3, 24)), key(2024, 2));
    }

    #[test]
    fn test_renewal_cycle_january_rolls_back_a_year() {
        let calc = RenewalCalculator::new(RenewalDay::Day(15));
        assert_eq!(calc.renewal_cycle(date(2024, 1, 3)), key(2023, 12));
    }

    #[test]
    fn test_renewal_cycle_property_for_all_fixed_days() {
        let mut d = date(2023, 1, 1);
        let end = date(2025, 1, 1);
        while d < end {
            for r in 1..=MAX_RENEWAL_DAY {
                let calc = RenewalCalculator::new(RenewalDay::Day(r));
                let expected = if d.day() >= r {
                    CycleKey::calendar(d)
                } else {
                    CycleKey::calendar(d).previous()
                };
                assert_eq!(calc.renewal_cycle(d), expected, "day {r} date {d}");
            }
            d = d.succ_opt().unwrap();
        }
    }

    #[test]
    fn test_renewal_cycle_last_day() {
        let calc = RenewalCalculator::new(RenewalDay::LastDayOfMonth);
        assert_eq!(calc.renewal_cycle(date(2024, 3, 1)), key(2024, 2));
        assert_eq!(calc.renewal_cycle(date(2024, 1, 31)), key(2024, 1));
        assert_eq!(calc.renewal_cycle(date(2024, 2, 28)), key(2024, 1));
        assert_eq!(calc.renewal_cycle(date(2024, 2, 29)), key(2024, 2));
        assert_eq!(calc.renewal_cycle(date(2023, 2, 28)), key(2023, 2));
        assert_eq!(calc.renewal_cycle(date(2024, 3, 31)), key(2024, 3));
        assert_eq!(calc.renewal_cycle(date(2024, 4, 30)), key(2024, 4));
        assert_eq!(calc.renewal_cycle(date(2024, 4, 29)), key(2024, 3));
    }

    #[test]
    fn test_last_day_of_every_month_maps_to_that_month() {
        let calc = RenewalCalculator::new(RenewalDay::LastDayOfMonth);
        for year in [2023, 2024] {
            for month in 1..=12 {
                let last = days_in_month(year, month).unwrap();
                assert_eq!(
                    calc.renewal_cycle(date(year, month, last)),
                    key(year, month)
                );
            }
        }
    }

    #[test]
    fn test_cycle_boundaries() {
        let calc = RenewalCalculator::new(RenewalDay::Day(25));
        assert_eq!(calc.cycle_start_date(2024, 1), Some(date(2024, 1, 25)));
        assert_eq!(calc.cycle_end_date(key(2024, 1)), Some(date(2024, 2, 24)));
        assert_eq!(calc.cycle_start_date(2024, 13), None);

        let last = RenewalCalculator::new(RenewalDay::LastDayOfMonth);
        assert_eq!(
            last.cycle_bounds(key(2024, 1)),
            Some((date(2024, 1, 31), date(2024, 2, 28)))
        );
        assert_eq!(
            last.cycle_bounds(key(2023, 12)),
            Some((date(2023, 12, 31), date(2024, 1, 30)))
        );
    }

    #[test]
    fn test_same_cycle() {
        let calc = RenewalCalculator::new(RenewalDay::Day(25));
        assert!(calc.same_cycle(date(2024, 1, 25), date(2024, 2, 24)));
        assert!(!calc.same_cycle(date(2024, 2, 24), date(2024, 2, 25)));
    }

    #[test]
    fn test_cycle_key_navigation() {
        assert_eq!(key(2024, 1).previous(), key(2023, 12));
        assert_eq!(key(2023, 12).next(), key(2024, 1));
        assert_eq!(key(2024, 2).to_string(), "2024-02");
        assert!(CycleKey::new(2024, 13).is_none());
        assert!(key(2024, 1) < key(2024, 2));
        assert!(key(2024, 2).contains_calendar_date(date(2024, 2, 29)));
    }

    #[test]
    fn test_clamp_day_into_short_month() {
        assert_eq!(clamp_day_into(key(2024, 2), 31), Some(date(2024, 2, 29)));
        assert_eq!(clamp_day_into(key(2023, 2), 30), Some(date(2023, 2, 28)));
        assert_eq!(clamp_day_into(key(2024, 3), 15), Some(date(2024, 3, 15)));
    }
}
