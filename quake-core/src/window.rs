//! Calendar-month windows, the unit of fetch granularity.

use chrono::{Datelike, NaiveDate};
use std::fmt;

/// One calendar month. Ordering is chronological.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DateWindow {
    year: i32,
    month: u32,
}

impl DateWindow {
    /// Returns `None` when `month` is not in `1..=12` or the year is outside
    /// what `chrono` can represent.
    pub fn new(year: i32, month: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, 1)?;
        Some(Self { year, month })
    }

    /// The window containing `date`.
    pub fn containing(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    /// First calendar day, inclusive.
    pub fn first_day(&self) -> NaiveDate {
        // Validated in the constructors.
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or(NaiveDate::MIN)
    }

    /// Last calendar day, inclusive.
    pub fn last_day(&self) -> NaiveDate {
        self.next()
            .and_then(|next| next.first_day().pred_opt())
            .unwrap_or(NaiveDate::MAX)
    }

    /// The following month, rolling December over into January.
    pub fn next(&self) -> Option<Self> {
        if self.month == 12 {
            Self::new(self.year + 1, 1)
        } else {
            Self::new(self.year, self.month + 1)
        }
    }

    /// `YYYY_MM`, used in partition file names.
    pub fn month_stamp(&self) -> String {
        format!("{}_{:02}", self.year, self.month)
    }
}

impl fmt::Display for DateWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:02}", self.year, self.month)
    }
}

/// Every whole month strictly after `last_known` whose last day falls before
/// `cutoff` (exclusive).
///
/// The month containing `last_known` is skipped: it was fetched as a whole
/// window in the run that produced that record. A month still in progress at
/// `cutoff` is left for a later run.
pub fn windows_between(last_known: NaiveDate, cutoff: NaiveDate) -> Vec<DateWindow> {
    let mut windows = Vec::new();
    let Some(start) = last_known.succ_opt() else {
        return windows;
    };

    let mut current = DateWindow::containing(start);
    if current.first_day() < start {
        match current.next() {
            Some(next) => current = next,
            None => return windows,
        }
    }

    while current.last_day() < cutoff {
        windows.push(current);
        match current.next() {
            Some(next) => current = next,
            None => break,
        }
    }

    windows
}

/// Every whole month from January of `start_year` up to `cutoff`.
pub fn windows_from_year(start_year: i32, cutoff: NaiveDate) -> Vec<DateWindow> {
    match epoch_start(start_year).and_then(|d| d.pred_opt()) {
        Some(last_known) => windows_between(last_known, cutoff),
        None => Vec::new(),
    }
}

/// January 1st of `start_year`, the fixed lower bound of the dataset.
pub fn epoch_start(start_year: i32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(start_year, 1, 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn labels(windows: &[DateWindow]) -> Vec<String> {
        windows.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn mid_month_last_known_starts_at_next_month() {
        let windows = windows_between(date(2024, 3, 15), date(2024, 6, 1));
        assert_eq!(labels(&windows), vec!["2024-04", "2024-05"]);
    }

    #[test]
    fn december_rolls_into_next_year() {
        let windows = windows_between(date(2023, 12, 20), date(2024, 2, 1));
        assert_eq!(windows, vec![DateWindow::new(2024, 1).unwrap()]);
        assert_eq!(windows[0].year(), 2024);
        assert_eq!(windows[0].month(), 1);
    }

    #[test]
    fn last_day_of_month_includes_following_month() {
        let windows = windows_between(date(2024, 3, 31), date(2024, 5, 1));
        assert_eq!(labels(&windows), vec!["2024-04"]);
    }

    #[test]
    fn up_to_date_produces_nothing() {
        assert!(windows_between(date(2024, 5, 31), date(2024, 6, 20)).is_empty());
        assert!(windows_between(date(2024, 6, 10), date(2024, 6, 1)).is_empty());
    }

    #[test]
    fn month_in_progress_is_excluded() {
        let windows = windows_between(date(2024, 1, 31), date(2024, 3, 15));
        assert_eq!(labels(&windows), vec!["2024-02"]);
    }

    #[test]
    fn windows_are_contiguous_and_non_overlapping() {
        let windows = windows_from_year(1950, date(1953, 4, 1));
        assert_eq!(windows.len(), 3 * 12 + 3);
        for pair in windows.windows(2) {
            assert_eq!(pair[0].last_day().succ_opt().unwrap(), pair[1].first_day());
        }
    }

    #[test]
    fn bounds_handle_leap_february() {
        let feb = DateWindow::new(2024, 2).unwrap();
        assert_eq!(feb.first_day(), date(2024, 2, 1));
        assert_eq!(feb.last_day(), date(2024, 2, 29));
        assert_eq!(feb.month_stamp(), "2024_02");

        let dec = DateWindow::new(2023, 12).unwrap();
        assert_eq!(dec.last_day(), date(2023, 12, 31));
    }

    #[test]
    fn rejects_invalid_month() {
        assert!(DateWindow::new(2024, 0).is_none());
        assert!(DateWindow::new(2024, 13).is_none());
    }
}
