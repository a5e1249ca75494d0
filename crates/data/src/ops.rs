//! Row-level operations: filtering, date windows, aggregation, ordering and
//! joins. All operations are pure over `Row` slices.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde_json::{Number, Value};

use tabula_core::domain::date_range::DateRange;
use tabula_core::domain::query::{
    AggregateFn, Aggregation, Filter, FilterOperator, JoinEdge, OrderBy, SortDirection,
};
use tabula_core::domain::row::{cell_as_date, cell_as_f64, cell_as_text, cell_is_empty, Row};

// ---------------------------------------------------------------------------
// Filtering
// ---------------------------------------------------------------------------

/// Keeps rows whose `date_column` falls inside `range` (both ends inclusive
/// to the day). Rows without a readable date are dropped.
pub fn filter_by_date(rows: Vec<Row>, date_column: &str, range: &DateRange) -> Vec<Row> {
    rows.into_iter()
        .filter(|row| row.get(date_column).and_then(cell_as_date).is_some_and(|day| range.contains(day)))
        .collect()
}

pub fn apply_filters(rows: Vec<Row>, filters: &[Filter]) -> Vec<Row> {
    if filters.is_empty() {
        return rows;
    }
    rows.into_iter().filter(|row| filters.iter().all(|filter| matches_filter(row, filter))).collect()
}

/// Evaluates one filter against a row. A null filter value matches
/// everything; a missing cell reads as empty text.
pub fn matches_filter(row: &Row, filter: &Filter) -> bool {
    if filter.value.is_null() {
        return true;
    }
    let empty = Value::String(String::new());
    let cell = row.get(&filter.column).unwrap_or(&empty);

    match filter.operator {
        FilterOperator::Equals => cells_equal(cell, &filter.value),
        FilterOperator::NotEquals => !cells_equal(cell, &filter.value),
        FilterOperator::Contains => lowered(cell).contains(&lowered(&filter.value)),
        FilterOperator::NotContains => !lowered(cell).contains(&lowered(&filter.value)),
        FilterOperator::StartsWith => lowered(cell).starts_with(&lowered(&filter.value)),
        FilterOperator::EndsWith => lowered(cell).ends_with(&lowered(&filter.value)),
        FilterOperator::GreaterThan => compare_cells(cell, &filter.value) == Some(Ordering::Greater),
        FilterOperator::LessThan => compare_cells(cell, &filter.value) == Some(Ordering::Less),
        FilterOperator::GreaterThanOrEqual => {
            matches!(compare_cells(cell, &filter.value), Some(Ordering::Greater | Ordering::Equal))
        }
        FilterOperator::LessThanOrEqual => {
            matches!(compare_cells(cell, &filter.value), Some(Ordering::Less | Ordering::Equal))
        }
        FilterOperator::In => candidates(&filter.value).any(|candidate| cells_equal(cell, candidate)),
        FilterOperator::NotIn => !candidates(&filter.value).any(|candidate| cells_equal(cell, candidate)),
        FilterOperator::Between => match filter.value.as_array().map(Vec::as_slice) {
            Some([low, high]) => {
                matches!(compare_cells(cell, low), Some(Ordering::Greater | Ordering::Equal))
                    && matches!(compare_cells(cell, high), Some(Ordering::Less | Ordering::Equal))
            }
            _ => false,
        },
    }
}

fn candidates(value: &Value) -> Box<dyn Iterator<Item = &Value> + '_> {
    match value {
        Value::Array(items) => Box::new(items.iter()),
        other => Box::new(std::iter::once(other)),
    }
}

fn lowered(value: &Value) -> String {
    cell_as_text(value).trim().to_lowercase()
}

fn cells_equal(left: &Value, right: &Value) -> bool {
    match (cell_as_f64(left), cell_as_f64(right)) {
        (Some(a), Some(b)) => (a - b).abs() < f64::EPSILON,
        _ => lowered(left) == lowered(right),
    }
}

/// Numeric comparison when both sides are numbers, then dates, then text.
pub fn compare_cells(left: &Value, right: &Value) -> Option<Ordering> {
    if let (Some(a), Some(b)) = (cell_as_f64(left), cell_as_f64(right)) {
        return a.partial_cmp(&b);
    }
    if let (Some(a), Some(b)) = (cell_as_date(left), cell_as_date(right)) {
        return Some(a.cmp(&b));
    }
    if cell_is_empty(left) || cell_is_empty(right) {
        return None;
    }
    Some(cell_as_text(left).cmp(&cell_as_text(right)))
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

/// Aggregates rows, optionally per group. Groups keep first-appearance order
/// and are keyed by the text of each group-by cell. `count` counts non-empty
/// cells; the other functions consider numeric cells only.
pub fn aggregate(rows: &[Row], aggregations: &[Aggregation], group_by: &[String]) -> Vec<Row> {
    let mut order: Vec<Vec<String>> = Vec::new();
    let mut groups: HashMap<Vec<String>, Vec<&Row>> = HashMap::new();

    for row in rows {
        let key = group_by
            .iter()
            .map(|column| row.get(column).map(cell_as_text).unwrap_or_default())
            .collect::<Vec<_>>();
        groups
            .entry(key.clone())
            .or_insert_with(|| {
                order.push(key);
                Vec::new()
            })
            .push(row);
    }

    if group_by.is_empty() && order.is_empty() {
        order.push(Vec::new());
        groups.insert(Vec::new(), Vec::new());
    }

    order
        .iter()
        .filter_map(|key| groups.get(key))
        .map(|members| {
            let mut output = Row::new();
            if let Some(first) = members.first() {
                for column in group_by {
                    output.insert(column.clone(), first.get(column).cloned().unwrap_or(Value::Null));
                }
            }
            for aggregation in aggregations {
                output.insert(output_column(aggregation, aggregations), reduce(members, aggregation));
            }
            output
        })
        .collect()
}

fn output_column(aggregation: &Aggregation, all: &[Aggregation]) -> String {
    let shared = all.iter().filter(|other| other.column == aggregation.column).count() > 1;
    if shared {
        format!("{}({})", aggregation.function.as_str(), aggregation.column)
    } else {
        aggregation.column.clone()
    }
}

fn reduce(members: &[&Row], aggregation: &Aggregation) -> Value {
    let cells = members.iter().filter_map(|row| row.get(&aggregation.column));

    if aggregation.function == AggregateFn::Count {
        return Value::from(cells.filter(|cell| !cell_is_empty(cell)).count());
    }

    let values = cells.filter_map(cell_as_f64).collect::<Vec<_>>();
    let result = match aggregation.function {
        AggregateFn::Sum => Some(values.iter().sum()),
        AggregateFn::Avg if values.is_empty() => Some(0.0),
        AggregateFn::Avg => Some(values.iter().sum::<f64>() / values.len() as f64),
        AggregateFn::Max => values.iter().copied().reduce(f64::max),
        AggregateFn::Min => values.iter().copied().reduce(f64::min),
        AggregateFn::Count => None,
    };
    result.map(number).unwrap_or(Value::Null)
}

fn number(value: f64) -> Value {
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        Value::from(value as i64)
    } else {
        Number::from_f64(value).map(Value::Number).unwrap_or(Value::Null)
    }
}

// ---------------------------------------------------------------------------
// Ordering and joins
// ---------------------------------------------------------------------------

/// Stable multi-key sort; empty cells always sort last.
pub fn sort_rows(rows: &mut [Row], order_by: &[OrderBy]) {
    if order_by.is_empty() {
        return;
    }
    rows.sort_by(|left, right| {
        for key in order_by {
            let a = left.get(&key.column).filter(|cell| !cell_is_empty(cell));
            let b = right.get(&key.column).filter(|cell| !cell_is_empty(cell));
            let ordering = match (a, b) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(a), Some(b)) => {
                    let natural = compare_cells(a, b).unwrap_or(Ordering::Equal);
                    match key.direction {
                        SortDirection::Asc => natural,
                        SortDirection::Desc => natural.reverse(),
                    }
                }
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

/// Left join along `edge`. Right-hand columns that collide with left-hand
/// ones are prefixed with `<right_sheet>.`; unmatched left rows are kept.
pub fn left_join(left: Vec<Row>, right: &[Row], edge: &JoinEdge) -> Vec<Row> {
    let mut index: HashMap<String, Vec<&Row>> = HashMap::new();
    for row in right {
        if let Some(key) = row.get(&edge.right_key).filter(|cell| !cell_is_empty(cell)) {
            index.entry(join_key(key)).or_default().push(row);
        }
    }

    let mut joined = Vec::with_capacity(left.len());
    for row in left {
        let matches = row
            .get(&edge.left_key)
            .filter(|cell| !cell_is_empty(cell))
            .and_then(|key| index.get(&join_key(key)));

        match matches {
            Some(matches) => {
                for other in matches {
                    let mut merged = row.clone();
                    for (column, value) in other.iter() {
                        let target = if merged.contains_key(column) {
                            format!("{}.{column}", edge.right_sheet)
                        } else {
                            column.clone()
                        };
                        merged.insert(target, value.clone());
                    }
                    joined.push(merged);
                }
            }
            None => joined.push(row),
        }
    }
    joined
}

fn join_key(value: &Value) -> String {
    match cell_as_f64(value) {
        Some(number) if number.fract() == 0.0 => format!("{}", number as i64),
        _ => cell_as_text(value).trim().to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::{aggregate, apply_filters, filter_by_date, left_join, matches_filter, sort_rows};
    use tabula_core::domain::date_range::DateRange;
    use tabula_core::domain::query::{
        AggregateFn, Aggregation, Filter, FilterOperator, JoinEdge, OrderBy, SortDirection,
    };
    use tabula_core::domain::row::Row;

    fn rows(values: Vec<Value>) -> Vec<Row> {
        values
            .into_iter()
            .map(|value| match value {
                Value::Object(map) => map,
                other => panic!("expected object, got {other}"),
            })
            .collect()
    }

    fn filter(column: &str, operator: FilterOperator, value: Value) -> Filter {
        Filter { column: column.to_owned(), operator, value }
    }

    #[test]
    fn filter_operators_cover_text_numbers_and_lists() {
        let row = rows(vec![json!({ "country": "JP", "Total GMV": "1,250.5", "product_name": "Blue Mug" })])
            .remove(0);

        assert!(matches_filter(&row, &filter("country", FilterOperator::Equals, json!("jp"))));
        assert!(matches_filter(&row, &filter("Total GMV", FilterOperator::Equals, json!(1250.5))));
        assert!(matches_filter(&row, &filter("product_name", FilterOperator::Contains, json!("mug"))));
        assert!(matches_filter(&row, &filter("product_name", FilterOperator::StartsWith, json!("blue"))));
        assert!(matches_filter(&row, &filter("Total GMV", FilterOperator::GreaterThan, json!(1000))));
        assert!(!matches_filter(&row, &filter("Total GMV", FilterOperator::LessThanOrEqual, json!("999"))));
        assert!(matches_filter(&row, &filter("country", FilterOperator::In, json!(["US", "JP"]))));
        assert!(matches_filter(&row, &filter("country", FilterOperator::NotIn, json!(["US", "KR"]))));
        assert!(matches_filter(&row, &filter("Total GMV", FilterOperator::Between, json!([1000, 1250.5]))));
        assert!(!matches_filter(&row, &filter("Total GMV", FilterOperator::Between, json!(5))));
        assert!(matches_filter(&row, &filter("missing", FilterOperator::NotEquals, json!("x"))));
        assert!(matches_filter(&row, &filter("country", FilterOperator::Equals, Value::Null)));
    }

    #[test]
    fn date_window_is_inclusive_to_the_end_of_day() {
        let data = rows(vec![
            json!({ "order_created": "2025-10-31 23:59:59" }),
            json!({ "order_created": "2025-11-01 00:00:00" }),
            json!({ "order_created": "2025-11-30 23:59:59" }),
            json!({ "order_created": "not a date" }),
        ]);
        let november = DateRange::month(2025, 11).expect("month");

        let kept = filter_by_date(data, "order_created", &november);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn grouped_aggregation_keeps_first_appearance_order() {
        let data = rows(vec![
            json!({ "artist": "Kim", "Total GMV": "100", "note": "a" }),
            json!({ "artist": "Lee", "Total GMV": "50", "note": "" }),
            json!({ "artist": "Kim", "Total GMV": "25.5", "note": "b" }),
        ]);
        let aggregations = vec![
            Aggregation { column: "Total GMV".to_owned(), function: AggregateFn::Sum },
            Aggregation { column: "note".to_owned(), function: AggregateFn::Count },
        ];

        let result = aggregate(&data, &aggregations, &["artist".to_owned()]);

        assert_eq!(result.len(), 2);
        assert_eq!(result[0].get("artist"), Some(&json!("Kim")));
        assert_eq!(result[0].get("Total GMV"), Some(&json!(125.5)));
        assert_eq!(result[0].get("note"), Some(&json!(2)));
        assert_eq!(result[1].get("note"), Some(&json!(0)));
    }

    #[test]
    fn group_values_containing_separators_stay_apart() {
        let data = rows(vec![
            json!({ "artist": "a|b", "product_name": "c", "Total GMV": "10" }),
            json!({ "artist": "a", "product_name": "b|c", "Total GMV": "5" }),
        ]);
        let aggregations = vec![Aggregation { column: "Total GMV".to_owned(), function: AggregateFn::Sum }];

        let result = aggregate(&data, &aggregations, &["artist".to_owned(), "product_name".to_owned()]);

        assert_eq!(result.len(), 2);
        assert_eq!(result[0].get("artist"), Some(&json!("a|b")));
        assert_eq!(result[0].get("Total GMV"), Some(&json!(10)));
        assert_eq!(result[1].get("product_name"), Some(&json!("b|c")));
        assert_eq!(result[1].get("Total GMV"), Some(&json!(5)));
    }

    #[test]
    fn ungrouped_aggregation_yields_a_single_row() {
        let data = rows(vec![json!({ "v": 3 }), json!({ "v": "x" }), json!({ "v": 9 })]);
        let aggregations = vec![
            Aggregation { column: "v".to_owned(), function: AggregateFn::Max },
            Aggregation { column: "v".to_owned(), function: AggregateFn::Avg },
        ];

        let result = aggregate(&data, &aggregations, &[]);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].get("max(v)"), Some(&json!(9)));
        assert_eq!(result[0].get("avg(v)"), Some(&json!(6)));

        let empty = aggregate(&[], &[Aggregation { column: "v".to_owned(), function: AggregateFn::Min }], &[]);
        assert_eq!(empty[0].get("v"), Some(&Value::Null));
    }

    #[test]
    fn sorting_is_numeric_aware_with_blanks_last() {
        let mut data = rows(vec![
            json!({ "gmv": "9" }),
            json!({ "gmv": "" }),
            json!({ "gmv": "100" }),
            json!({ "gmv": 20 }),
        ]);
        sort_rows(&mut data, &[OrderBy { column: "gmv".to_owned(), direction: SortDirection::Desc }]);

        let order: Vec<String> = data.iter().map(|row| row["gmv"].to_string()).collect();
        assert_eq!(order, vec!["\"100\"", "20", "\"9\"", "\"\""]);
    }

    #[test]
    fn left_join_keeps_unmatched_rows_and_prefixes_collisions() {
        let orders = rows(vec![
            json!({ "order_code": "O-1", "user_id": "7", "Total GMV": 10 }),
            json!({ "order_code": "O-2", "user_id": "8", "Total GMV": 20 }),
        ]);
        let users = rows(vec![json!({ "ID": 7, "COUNTRY": "JP", "Total GMV": 999 })]);
        let edge = JoinEdge {
            left_sheet: "order".to_owned(),
            right_sheet: "users".to_owned(),
            left_key: "user_id".to_owned(),
            right_key: "ID".to_owned(),
        };

        let joined = left_join(orders, &users, &edge);
        assert_eq!(joined.len(), 2);
        assert_eq!(joined[0].get("COUNTRY"), Some(&json!("JP")));
        assert_eq!(joined[0].get("Total GMV"), Some(&json!(10)));
        assert_eq!(joined[0].get("users.Total GMV"), Some(&json!(999)));
        assert!(!joined[1].contains_key("COUNTRY"));
    }

    #[test]
    fn filters_combine_conjunctively() {
        let data = rows(vec![
            json!({ "country": "JP", "platform": "iOS" }),
            json!({ "country": "JP", "platform": "Web" }),
            json!({ "country": "US", "platform": "iOS" }),
        ]);
        let kept = apply_filters(
            data,
            &[Filter::equals("country", "JP"), Filter::equals("platform", "ios")],
        );
        assert_eq!(kept.len(), 1);
    }
}
