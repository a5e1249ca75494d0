//! Row and cell helpers shared by the data layer and the analyzer.
//!
//! Sheet exports are mostly strings, so numeric and date interpretation is
//! lenient: thousands separators are ignored and several date layouts are
//! accepted. Timestamps are truncated to their calendar day.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::{Map, Value};

pub type Row = Map<String, Value>;

pub fn cell_is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(text) => text.trim().is_empty(),
        _ => false,
    }
}

pub fn cell_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => {
            let cleaned: String =
                text.trim().chars().filter(|ch| *ch != ',' && *ch != '_').collect();
            if cleaned.is_empty() {
                return None;
            }
            cleaned.parse::<f64>().ok().filter(|parsed| parsed.is_finite())
        }
        _ => None,
    }
}

pub fn cell_as_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

pub fn cell_as_date(value: &Value) -> Option<NaiveDate> {
    let Value::String(text) = value else {
        return None;
    };
    parse_date_text(text)
}

pub fn parse_date_text(text: &str) -> Option<NaiveDate> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(parsed.date_naive());
    }

    for layout in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M", "%Y/%m/%d %H:%M:%S"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(trimmed, layout) {
            return Some(parsed.date());
        }
    }

    let day_part = trimmed.split_whitespace().next().unwrap_or(trimmed);
    ["%Y-%m-%d", "%Y/%m/%d", "%Y.%m.%d"]
        .into_iter()
        .find_map(|layout| NaiveDate::parse_from_str(day_part, layout).ok())
}
