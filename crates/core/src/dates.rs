//! Natural-language date range recognition against a caller-supplied "today".
//!
//! Rules are tried in a fixed precedence order and the first rule that yields
//! a valid calendar range wins. Anything unrecognized produces `None` so the
//! query runs over the full range instead of a guessed one.

use std::sync::OnceLock;

use chrono::{Datelike, Duration, NaiveDate};
use regex::{Captures, Regex};
use serde::Serialize;

use crate::domain::date_range::{first_day_of_month, DateRange, DateRangeType};

const MAX_RELATIVE_DAYS: i64 = 3_650;
const WIDE_RANGE_DAYS: i64 = 365;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DateParser {
    today: NaiveDate,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DateRangeCheck {
    pub warnings: Vec<String>,
}

type Rule = fn(&DateParser, &str) -> Option<DateRange>;

const RULES: [Rule; 17] = [
    DateParser::explicit_range,
    DateParser::explicit_day,
    DateParser::recent_days,
    DateParser::today_rule,
    DateParser::yesterday,
    DateParser::this_week,
    DateParser::last_week,
    DateParser::this_month,
    DateParser::last_month,
    DateParser::this_year,
    DateParser::last_year,
    DateParser::quarter,
    DateParser::year_month,
    DateParser::month_name,
    DateParser::year_only,
    DateParser::month_only,
    DateParser::bare_days,
];

impl DateParser {
    pub fn new(today: NaiveDate) -> Self {
        Self { today }
    }

    pub fn today(&self) -> NaiveDate {
        self.today
    }

    pub fn parse(&self, text: &str) -> Option<DateRange> {
        // A day-shaped token that is not a real date must not degrade into a
        // month or year match on its prefix.
        if has_invalid_iso_day(text) {
            return None;
        }
        RULES.iter().find_map(|rule| rule(self, text))
    }

    /// Parses an LLM-supplied pair of ISO dates. Inverted or malformed pairs
    /// are rejected.
    pub fn parse_iso_pair(start: &str, end: &str) -> Option<DateRange> {
        let start = NaiveDate::parse_from_str(start.trim(), "%Y-%m-%d").ok()?;
        let end = NaiveDate::parse_from_str(end.trim(), "%Y-%m-%d").ok()?;
        DateRange::new(start, end, DateRangeType::Absolute).ok()
    }

    /// Non-fatal observations about a range relative to today.
    pub fn check(&self, range: &DateRange) -> DateRangeCheck {
        let mut warnings = Vec::new();
        if range.end() > self.today {
            warnings.push(format!(
                "end date {} is in the future; results stop at today ({})",
                range.end(),
                self.today
            ));
        }
        if range.span_days() > WIDE_RANGE_DAYS {
            warnings.push(format!(
                "range spans {} days; narrowing it will answer faster",
                range.span_days()
            ));
        }
        DateRangeCheck { warnings }
    }

    /// Recognizes "A vs B" period comparisons. Returns (baseline, current).
    pub fn parse_comparison(&self, text: &str) -> Option<(DateRange, DateRange)> {
        if let Some(caps) = month_vs_month().captures(text) {
            let baseline = month_from_caps(&caps, 1, 2)?;
            let current = month_from_caps(&caps, 3, 4)?;
            return Some((baseline, current));
        }

        if month_over_month().is_match(text) {
            let baseline = self.previous_month()?;
            let current = DateRange::new(
                first_day_of_month(self.today),
                self.today,
                DateRangeType::Month,
            )
            .ok()?;
            return Some((baseline, current));
        }

        None
    }

    fn previous_month(&self) -> Option<DateRange> {
        let last_of_previous = first_day_of_month(self.today).pred_opt()?;
        DateRange::month(last_of_previous.year(), last_of_previous.month())
    }

    fn trailing_days(&self, days: i64) -> Option<DateRange> {
        if days <= 0 || days > MAX_RELATIVE_DAYS {
            return None;
        }
        let start = self.today - Duration::days(days - 1);
        DateRange::new(start, self.today, DateRangeType::Relative).ok()
    }

    fn explicit_range(&self, text: &str) -> Option<DateRange> {
        let caps = iso_range().captures(text)?;
        let start = NaiveDate::parse_from_str(&caps[1], "%Y-%m-%d").ok()?;
        let end = NaiveDate::parse_from_str(&caps[2], "%Y-%m-%d").ok()?;
        DateRange::new(start, end, DateRangeType::Absolute).ok()
    }

    fn explicit_day(&self, text: &str) -> Option<DateRange> {
        let caps = iso_day().captures(text)?;
        let day = NaiveDate::parse_from_str(&caps[1], "%Y-%m-%d").ok()?;
        Some(DateRange::single_day(day, DateRangeType::Absolute))
    }

    fn recent_days(&self, text: &str) -> Option<DateRange> {
        let caps = recent_days().captures(text)?;
        let days = first_group(&caps, &[1, 2])?.parse::<i64>().ok()?;
        self.trailing_days(days)
    }

    fn today_rule(&self, text: &str) -> Option<DateRange> {
        today_pattern()
            .is_match(text)
            .then(|| DateRange::single_day(self.today, DateRangeType::Relative))
    }

    fn yesterday(&self, text: &str) -> Option<DateRange> {
        if !yesterday_pattern().is_match(text) {
            return None;
        }
        let day = self.today.pred_opt()?;
        Some(DateRange::single_day(day, DateRangeType::Relative))
    }

    fn this_week(&self, text: &str) -> Option<DateRange> {
        if !this_week_pattern().is_match(text) {
            return None;
        }
        let offset = i64::from(self.today.weekday().num_days_from_sunday());
        DateRange::new(self.today - Duration::days(offset), self.today, DateRangeType::Relative)
            .ok()
    }

    fn last_week(&self, text: &str) -> Option<DateRange> {
        if !last_week_pattern().is_match(text) {
            return None;
        }
        let offset = i64::from(self.today.weekday().num_days_from_sunday());
        let start = self.today - Duration::days(offset + 7);
        DateRange::new(start, start + Duration::days(6), DateRangeType::Relative).ok()
    }

    fn this_month(&self, text: &str) -> Option<DateRange> {
        if !this_month_pattern().is_match(text) {
            return None;
        }
        DateRange::new(first_day_of_month(self.today), self.today, DateRangeType::Month).ok()
    }

    fn last_month(&self, text: &str) -> Option<DateRange> {
        if !last_month_pattern().is_match(text) {
            return None;
        }
        self.previous_month()
    }

    fn this_year(&self, text: &str) -> Option<DateRange> {
        if !this_year_pattern().is_match(text) {
            return None;
        }
        let start = NaiveDate::from_ymd_opt(self.today.year(), 1, 1)?;
        DateRange::new(start, self.today, DateRangeType::Year).ok()
    }

    fn last_year(&self, text: &str) -> Option<DateRange> {
        if !last_year_pattern().is_match(text) {
            return None;
        }
        DateRange::year(self.today.year() - 1)
    }

    fn quarter(&self, text: &str) -> Option<DateRange> {
        let caps = quarter_pattern().captures(text)?;
        let (quarter, year) = if caps.get(1).is_some() {
            (caps[1].parse().ok()?, caps[2].parse().ok()?)
        } else if caps.get(3).is_some() {
            (caps[4].parse().ok()?, caps[3].parse().ok()?)
        } else {
            (caps[6].parse().ok()?, caps[5].parse().ok()?)
        };
        DateRange::quarter(year, quarter)
    }

    fn year_month(&self, text: &str) -> Option<DateRange> {
        let caps = year_month_pattern().captures(text)?;
        if caps.get(1).is_some() {
            month_from_caps(&caps, 1, 2)
        } else {
            month_from_caps(&caps, 3, 4)
        }
    }

    fn month_name(&self, text: &str) -> Option<DateRange> {
        let caps = month_name_pattern().captures(text)?;
        let month = month_number(&caps[1])?;
        let year = caps[2].parse().ok()?;
        DateRange::month(year, month)
    }

    fn year_only(&self, text: &str) -> Option<DateRange> {
        let caps = year_pattern().captures(text)?;
        let year = first_group(&caps, &[1, 2])?.parse().ok()?;
        DateRange::year(year)
    }

    fn month_only(&self, text: &str) -> Option<DateRange> {
        let caps = korean_month_pattern().captures(text)?;
        let month = caps[1].parse().ok()?;
        DateRange::month(self.today.year(), month)
    }

    fn bare_days(&self, text: &str) -> Option<DateRange> {
        let caps = bare_days_pattern().captures(text)?;
        let days = caps[1].parse::<i64>().ok()?;
        self.trailing_days(days)
    }
}

fn has_invalid_iso_day(text: &str) -> bool {
    iso_day()
        .captures_iter(text)
        .any(|caps| NaiveDate::parse_from_str(&caps[1], "%Y-%m-%d").is_err())
}

fn first_group<'t>(caps: &Captures<'t>, groups: &[usize]) -> Option<&'t str> {
    groups.iter().find_map(|index| caps.get(*index)).map(|found| found.as_str())
}

fn month_from_caps(caps: &Captures<'_>, year_group: usize, month_group: usize) -> Option<DateRange> {
    let year = caps.get(year_group)?.as_str().parse().ok()?;
    let month = caps.get(month_group)?.as_str().parse().ok()?;
    DateRange::month(year, month)
}

fn month_number(name: &str) -> Option<u32> {
    let prefix: String = name.to_ascii_lowercase().chars().take(3).collect();
    let month = match prefix.as_str() {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    Some(month)
}

macro_rules! pattern {
    ($name:ident, $source:expr) => {
        fn $name() -> &'static Regex {
            static PATTERN: OnceLock<Regex> = OnceLock::new();
            PATTERN.get_or_init(|| Regex::new($source).expect("date pattern is valid"))
        }
    };
}

pattern!(iso_range, r"(\d{4}-\d{2}-\d{2})\s*(?:~|to|until|부터|-)\s*(\d{4}-\d{2}-\d{2})");
pattern!(iso_day, r"\b(\d{4}-\d{2}-\d{2})\b");
pattern!(
    recent_days,
    r"(?i)\b(?:recent|last|past|previous)\s+(\d{1,4})\s+days?\b|최근\s*(\d{1,4})\s*일"
);
pattern!(today_pattern, r"(?i)\btoday\b|오늘|금일");
pattern!(yesterday_pattern, r"(?i)\byesterday\b|어제");
pattern!(this_week_pattern, r"(?i)\bthis\s+week\b|이번\s*주|금주");
pattern!(last_week_pattern, r"(?i)\b(?:last|previous)\s+week\b|지난\s*주|저번\s*주");
pattern!(this_month_pattern, r"(?i)\bthis\s+month\b|이번\s*달|이달|당월");
pattern!(last_month_pattern, r"(?i)\b(?:last|previous)\s+month\b|지난\s*달|저번\s*달|전월");
pattern!(this_year_pattern, r"(?i)\bthis\s+year\b|올해|금년");
pattern!(last_year_pattern, r"(?i)\b(?:last|previous)\s+year\b|작년|전년");
pattern!(
    quarter_pattern,
    r"(?i)\bq([1-4])\s*(\d{4})\b|\b(\d{4})\s*q([1-4])\b|(\d{4})\s*년\s*([1-4])\s*분기"
);
pattern!(year_month_pattern, r"(\d{4})\s*년\s*(\d{1,2})\s*월|\b(\d{4})[-/](\d{1,2})\b");
pattern!(
    month_name_pattern,
    r"(?i)\b(jan(?:uary)?|feb(?:ruary)?|mar(?:ch)?|apr(?:il)?|may|june?|july?|aug(?:ust)?|sep(?:t(?:ember)?)?|oct(?:ober)?|nov(?:ember)?|dec(?:ember)?)\s+(\d{4})\b"
);
pattern!(year_pattern, r"(\d{4})\s*년|(?i)\b(?:in|for|during)\s+(\d{4})\b");
pattern!(korean_month_pattern, r"(\d{1,2})\s*월");
pattern!(bare_days_pattern, r"(?i)\b(\d{1,4})\s*days?\b|(\d{1,4})\s*일간");
pattern!(
    month_vs_month,
    r"(?i)(\d{4})[-/](\d{1,2})\s*(?:vs\.?|versus|대비|and|와|과)\s*(\d{4})[-/](\d{1,2})"
);
pattern!(
    month_over_month,
    r"(?i)\blast\s+month\s+(?:vs\.?|versus|compared\s+to)\s+this\s+month\b|\bmonth[\s-]over[\s-]month\b|\bmom\b|전월\s*대비"
);

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::DateParser;
    use crate::domain::date_range::{DateRange, DateRangeType};

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn parser() -> DateParser {
        // Thursday
        DateParser::new(day(2025, 11, 20))
    }

    fn bounds(range: Option<DateRange>) -> Option<(NaiveDate, NaiveDate)> {
        range.map(|range| (range.start(), range.end()))
    }

    #[test]
    fn today_and_yesterday_are_single_days() {
        let parser = parser();
        assert_eq!(bounds(parser.parse("sales today")), Some((day(2025, 11, 20), day(2025, 11, 20))));
        assert_eq!(bounds(parser.parse("오늘 매출")), Some((day(2025, 11, 20), day(2025, 11, 20))));
        assert_eq!(
            bounds(parser.parse("what happened yesterday")),
            Some((day(2025, 11, 19), day(2025, 11, 19)))
        );
    }

    #[test]
    fn recent_days_end_today_inclusive() {
        let parser = parser();
        let range = parser.parse("recent 7 days revenue").expect("range");
        assert_eq!((range.start(), range.end()), (day(2025, 11, 14), day(2025, 11, 20)));
        assert_eq!(range.span_days(), 7);
        assert_eq!(range.range_type(), DateRangeType::Relative);

        assert_eq!(
            bounds(parser.parse("최근 30일 주문")),
            Some((day(2025, 10, 22), day(2025, 11, 20)))
        );
        assert_eq!(
            bounds(parser.parse("orders over the last 14 days")),
            Some((day(2025, 11, 7), day(2025, 11, 20)))
        );
    }

    #[test]
    fn absolute_month_covers_whole_month() {
        let parser = parser();
        assert_eq!(bounds(parser.parse("2025-11 orders")), Some((day(2025, 11, 1), day(2025, 11, 30))));
        assert_eq!(bounds(parser.parse("2024년 2월 매출")), Some((day(2024, 2, 1), day(2024, 2, 29))));
        assert_eq!(bounds(parser.parse("revenue in March 2025")), Some((day(2025, 3, 1), day(2025, 3, 31))));
        assert_eq!(parser.parse("2025-11 orders").map(|r| r.range_type()), Some(DateRangeType::Month));
    }

    #[test]
    fn weeks_start_on_sunday() {
        let parser = parser();
        assert_eq!(bounds(parser.parse("this week")), Some((day(2025, 11, 16), day(2025, 11, 20))));
        assert_eq!(bounds(parser.parse("last week")), Some((day(2025, 11, 9), day(2025, 11, 15))));
    }

    #[test]
    fn month_year_and_quarter_terms() {
        let parser = parser();
        assert_eq!(bounds(parser.parse("this month")), Some((day(2025, 11, 1), day(2025, 11, 20))));
        assert_eq!(bounds(parser.parse("last month")), Some((day(2025, 10, 1), day(2025, 10, 31))));
        assert_eq!(bounds(parser.parse("전월 실적")), Some((day(2025, 10, 1), day(2025, 10, 31))));
        assert_eq!(bounds(parser.parse("last year")), Some((day(2024, 1, 1), day(2024, 12, 31))));
        assert_eq!(bounds(parser.parse("Q3 2025 gmv")), Some((day(2025, 7, 1), day(2025, 9, 30))));
        assert_eq!(bounds(parser.parse("sales in 2023")), Some((day(2023, 1, 1), day(2023, 12, 31))));
        assert_eq!(bounds(parser.parse("3월 주문")), Some((day(2025, 3, 1), day(2025, 3, 31))));
    }

    #[test]
    fn explicit_iso_dates_are_absolute() {
        let parser = parser();
        let range = parser.parse("orders 2025-10-01 ~ 2025-10-15").expect("range");
        assert_eq!((range.start(), range.end()), (day(2025, 10, 1), day(2025, 10, 15)));
        assert_eq!(range.range_type(), DateRangeType::Absolute);
        assert_eq!(bounds(parser.parse("on 2025-11-03")), Some((day(2025, 11, 3), day(2025, 11, 3))));
    }

    #[test]
    fn unparseable_or_invalid_expressions_yield_none() {
        let parser = parser();
        assert_eq!(parser.parse("top artists by revenue"), None);
        assert_eq!(parser.parse("sometime soon"), None);
        assert_eq!(parser.parse("2025-13 orders"), None);
        assert_eq!(parser.parse("recent 0 days"), None);
    }

    #[test]
    fn impossible_calendar_days_do_not_fall_back_to_their_month() {
        let parser = parser();
        assert_eq!(parser.parse("orders on 2025-02-30"), None);
        assert_eq!(parser.parse("2025-11-31 revenue"), None);
        assert_eq!(parser.parse("orders 2025-02-30 ~ 2025-03-10"), None);
        assert_eq!(parser.parse("orders 2025-03-01 ~ 2025-03-32"), None);
        assert_eq!(parser.parse("sales 2025-00-10"), None);
    }

    #[test]
    fn free_text_without_a_period_yields_none() {
        let parser = parser();
        assert_eq!(parser.parse(""), None);
        assert_eq!(parser.parse("   "), None);
        assert_eq!(parser.parse("order 12345 status"), None);
        assert_eq!(parser.parse("show us the weekly report"), None);
        assert_eq!(parser.parse("top 5 artists"), None);
        assert_eq!(parser.parse("recent 99999 days"), None);
        assert_eq!(parser.parse("Q5 2025 gmv"), None);
        assert_eq!(parser.parse("13월 주문"), None);
    }

    #[test]
    fn iso_pair_rejects_inverted_input() {
        assert!(DateParser::parse_iso_pair("2025-11-01", "2025-11-30").is_some());
        assert!(DateParser::parse_iso_pair("2025-11-30", "2025-11-01").is_none());
        assert!(DateParser::parse_iso_pair("last week", "2025-11-01").is_none());
    }

    #[test]
    fn check_warns_on_future_and_wide_ranges() {
        let parser = parser();
        let future = DateRange::month(2025, 12).expect("month");
        assert_eq!(parser.check(&future).warnings.len(), 1);

        let wide = DateRange::new(day(2023, 1, 1), day(2025, 1, 1), DateRangeType::Absolute)
            .expect("range");
        assert!(parser.check(&wide).warnings[0].contains("days"));

        let fine = DateRange::month(2025, 10).expect("month");
        assert!(parser.check(&fine).warnings.is_empty());
    }

    #[test]
    fn comparison_pairs_baseline_then_current() {
        let parser = parser();
        let (baseline, current) =
            parser.parse_comparison("2025-09 vs 2025-10 revenue").expect("pair");
        assert_eq!(baseline.start(), day(2025, 9, 1));
        assert_eq!(current.end(), day(2025, 10, 31));

        let (baseline, current) =
            parser.parse_comparison("last month vs this month orders").expect("pair");
        assert_eq!((baseline.start(), baseline.end()), (day(2025, 10, 1), day(2025, 10, 31)));
        assert_eq!((current.start(), current.end()), (day(2025, 11, 1), day(2025, 11, 20)));

        assert!(parser.parse_comparison("orders by country").is_none());
    }
}
