use std::fmt;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateRangeType {
    Absolute,
    Relative,
    Month,
    Year,
    Quarter,
}

/// Inclusive calendar-day range. Construction enforces `start <= end`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
    #[serde(rename = "type")]
    range_type: DateRangeType,
}

impl DateRange {
    pub fn new(
        start: NaiveDate,
        end: NaiveDate,
        range_type: DateRangeType,
    ) -> Result<Self, DomainError> {
        if start > end {
            return Err(DomainError::InvalidDateRange { start, end });
        }
        Ok(Self { start, end, range_type })
    }

    pub fn single_day(day: NaiveDate, range_type: DateRangeType) -> Self {
        Self { start: day, end: day, range_type }
    }

    pub fn month(year: i32, month: u32) -> Option<Self> {
        let start = NaiveDate::from_ymd_opt(year, month, 1)?;
        let end = last_day_of_month(year, month)?;
        Some(Self { start, end, range_type: DateRangeType::Month })
    }

    pub fn year(year: i32) -> Option<Self> {
        let start = NaiveDate::from_ymd_opt(year, 1, 1)?;
        let end = NaiveDate::from_ymd_opt(year, 12, 31)?;
        Some(Self { start, end, range_type: DateRangeType::Year })
    }

    pub fn quarter(year: i32, quarter: u32) -> Option<Self> {
        if !(1..=4).contains(&quarter) {
            return None;
        }
        let first_month = (quarter - 1) * 3 + 1;
        let start = NaiveDate::from_ymd_opt(year, first_month, 1)?;
        let end = last_day_of_month(year, first_month + 2)?;
        Some(Self { start, end, range_type: DateRangeType::Quarter })
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn range_type(&self) -> DateRangeType {
        self.range_type
    }

    /// Number of calendar days covered, both ends included.
    pub fn span_days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        day >= self.start && day <= self.end
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ~ {}", self.start.format("%Y-%m-%d"), self.end.format("%Y-%m-%d"))
    }
}

pub fn last_day_of_month(year: i32, month: u32) -> Option<NaiveDate> {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)?.pred_opt()
}

pub fn first_day_of_month(day: NaiveDate) -> NaiveDate {
    day.with_day(1).unwrap_or(day)
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{DateRange, DateRangeType};
    use crate::errors::DomainError;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[test]
    fn inverted_range_is_rejected() {
        let result = DateRange::new(day(2025, 3, 2), day(2025, 3, 1), DateRangeType::Absolute);
        assert!(matches!(result, Err(DomainError::InvalidDateRange { .. })));
    }

    #[test]
    fn month_handles_leap_february_and_december() {
        let february = DateRange::month(2024, 2).expect("february");
        assert_eq!(february.end(), day(2024, 2, 29));

        let december = DateRange::month(2025, 12).expect("december");
        assert_eq!(december.start(), day(2025, 12, 1));
        assert_eq!(december.end(), day(2025, 12, 31));
        assert!(DateRange::month(2025, 13).is_none());
    }

    #[test]
    fn quarter_spans_three_months() {
        let q3 = DateRange::quarter(2025, 3).expect("q3");
        assert_eq!(q3.start(), day(2025, 7, 1));
        assert_eq!(q3.end(), day(2025, 9, 30));
        assert_eq!(q3.range_type(), DateRangeType::Quarter);
        assert!(DateRange::quarter(2025, 5).is_none());
    }

    #[test]
    fn span_counts_both_ends() {
        let range = DateRange::new(day(2025, 1, 1), day(2025, 1, 7), DateRangeType::Relative)
            .expect("range");
        assert_eq!(range.span_days(), 7);
        assert!(range.contains(day(2025, 1, 7)));
        assert!(!range.contains(day(2025, 1, 8)));
    }
}
