//! Correlation and insight analyzer.
//!
//! Runs a deterministic statistical pass over result rows: pairwise Pearson
//! correlation between numeric columns, z-score outliers per column and, when
//! a date-like column exists, a chronological trend per numeric column. The
//! findings are condensed into a short ranked list of insights.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use serde::Serialize;

use crate::domain::row::{cell_as_date, cell_as_f64, cell_is_empty, Row};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AnalyzerConfig {
    /// Leading rows inspected when typing columns (default: 10)
    pub type_sample_size: usize,
    /// Minimum paired values before a correlation is computed (default: 3)
    pub min_correlation_samples: usize,
    /// Minimum values in a column before outliers are searched (default: 5)
    pub min_anomaly_samples: usize,
    /// |z| above which a value is an outlier (default: 3.0)
    pub outlier_z: f64,
    /// |z| above which an outlier is high severity (default: 4.0)
    pub high_severity_z: f64,
    pub max_anomalies: usize,
    /// Coefficient of variation above which a series is volatile (default: 0.3)
    pub volatility_cv: f64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            type_sample_size: 10,
            min_correlation_samples: 3,
            min_anomaly_samples: 5,
            outlier_z: 3.0,
            high_severity_z: 4.0,
            max_anomalies: 10,
            volatility_cv: 0.3,
        }
    }
}

const DATE_KEYWORDS: [&str; 6] = ["date", "created", "time", "timestamp", "날짜", "일시"];

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strength {
    Weak,
    Moderate,
    Strong,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Positive,
    Negative,
    None,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrelationResult {
    pub column_a: String,
    pub column_b: String,
    /// Pearson r rounded to two decimals.
    pub coefficient: f64,
    pub strength: Strength,
    pub direction: Direction,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Medium,
    High,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnomalyResult {
    pub column: String,
    pub row_index: usize,
    pub value: f64,
    pub z_score: f64,
    pub severity: Severity,
    pub description: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Increasing,
    Decreasing,
    Stable,
    Volatile,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendResult {
    pub column: String,
    pub direction: TrendDirection,
    /// Percent change of the second-half mean over the first-half mean.
    pub change_rate: f64,
    pub slope: f64,
    pub r_squared: f64,
    /// round(R² × 100)
    pub confidence: u8,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Importance {
    High,
    Medium,
    Low,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightType {
    Correlation,
    Anomaly,
    Trend,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisInsight {
    pub insight_type: InsightType,
    pub importance: Importance,
    pub title: String,
    pub description: String,
    pub related_columns: Vec<String>,
    pub suggested_action: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct AnalysisReport {
    pub correlations: Vec<CorrelationResult>,
    pub anomalies: Vec<AnomalyResult>,
    pub trends: Vec<TrendResult>,
    pub insights: Vec<AnalysisInsight>,
}

impl AnalysisReport {
    pub fn is_empty(&self) -> bool {
        self.correlations.is_empty()
            && self.anomalies.is_empty()
            && self.trends.is_empty()
            && self.insights.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Analyzer
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default)]
pub struct CorrelationAnalyzer {
    config: AnalyzerConfig,
}

impl CorrelationAnalyzer {
    pub fn new(config: AnalyzerConfig) -> Self {
        Self { config }
    }

    pub fn analyze(&self, rows: &[Row]) -> AnalysisReport {
        if rows.len() < 2 {
            return AnalysisReport::default();
        }

        let date_column = self.date_column(rows);
        let numeric_columns = self
            .numeric_columns(rows)
            .into_iter()
            .filter(|column| Some(column) != date_column.as_ref())
            .collect::<Vec<_>>();

        let correlations = self.correlations(rows, &numeric_columns);
        let anomalies = self.anomalies(rows, &numeric_columns);
        let trends = match &date_column {
            Some(date_column) => self.trends(rows, &numeric_columns, date_column),
            None => Vec::new(),
        };
        let insights = build_insights(&correlations, &anomalies, &trends);

        AnalysisReport { correlations, anomalies, trends, insights }
    }

    /// Columns whose sampled values are all numeric or empty, with at least
    /// one numeric value. Column order follows the first row.
    pub fn numeric_columns(&self, rows: &[Row]) -> Vec<String> {
        let Some(first) = rows.first() else {
            return Vec::new();
        };
        let sample = &rows[..rows.len().min(self.config.type_sample_size)];

        first
            .keys()
            .filter(|column| {
                let mut any_numeric = false;
                let all_numeric_or_empty = sample.iter().all(|row| match row.get(*column) {
                    None => true,
                    Some(value) if cell_is_empty(value) => true,
                    Some(value) => {
                        let numeric = cell_as_f64(value).is_some();
                        any_numeric |= numeric;
                        numeric
                    }
                });
                all_numeric_or_empty && any_numeric
            })
            .cloned()
            .collect()
    }

    pub fn date_column(&self, rows: &[Row]) -> Option<String> {
        let first = rows.first()?;
        first
            .iter()
            .find(|(column, value)| {
                let lowered = column.to_lowercase();
                DATE_KEYWORDS.iter().any(|keyword| lowered.contains(keyword))
                    && cell_as_date(value).is_some()
            })
            .map(|(column, _)| column.clone())
    }

    fn correlations(&self, rows: &[Row], columns: &[String]) -> Vec<CorrelationResult> {
        let mut results = Vec::new();

        for (index, column_a) in columns.iter().enumerate() {
            for column_b in &columns[index + 1..] {
                let (xs, ys): (Vec<f64>, Vec<f64>) = rows
                    .iter()
                    .filter_map(|row| {
                        let x = row.get(column_a).and_then(cell_as_f64)?;
                        let y = row.get(column_b).and_then(cell_as_f64)?;
                        Some((x, y))
                    })
                    .unzip();

                if xs.len() < self.config.min_correlation_samples {
                    continue;
                }

                let r = pearson(&xs, &ys);
                let Some(strength) = classify_strength(r.abs()) else {
                    continue;
                };
                let direction = if r > 0.1 {
                    Direction::Positive
                } else if r < -0.1 {
                    Direction::Negative
                } else {
                    Direction::None
                };

                results.push(CorrelationResult {
                    column_a: column_a.clone(),
                    column_b: column_b.clone(),
                    coefficient: round_to(r, 2),
                    strength,
                    direction,
                });
            }
        }

        results.sort_by(|left, right| {
            right.coefficient.abs().partial_cmp(&left.coefficient.abs()).unwrap_or(Ordering::Equal)
        });
        results
    }

    fn anomalies(&self, rows: &[Row], columns: &[String]) -> Vec<AnomalyResult> {
        let mut anomalies = Vec::new();

        for column in columns {
            let values: Vec<(usize, f64)> = rows
                .iter()
                .enumerate()
                .filter_map(|(index, row)| row.get(column).and_then(cell_as_f64).map(|v| (index, v)))
                .collect();

            if values.len() < self.config.min_anomaly_samples {
                continue;
            }

            let numbers = values.iter().map(|(_, value)| *value).collect::<Vec<_>>();
            let mean = mean(&numbers);
            let std_dev = population_std_dev(&numbers, mean);
            if std_dev <= f64::EPSILON {
                continue;
            }

            for (row_index, value) in values {
                let z_score = ((value - mean) / std_dev).abs();
                if z_score <= self.config.outlier_z {
                    continue;
                }
                let severity = if z_score > self.config.high_severity_z {
                    Severity::High
                } else {
                    Severity::Medium
                };
                anomalies.push(AnomalyResult {
                    column: column.clone(),
                    row_index,
                    value,
                    z_score,
                    severity,
                    description: format!(
                        "{column} value {value} is {z_score:.1} standard deviations from the mean ({mean:.2})"
                    ),
                });
            }
        }

        anomalies.sort_by(|left, right| {
            right.z_score.partial_cmp(&left.z_score).unwrap_or(Ordering::Equal)
        });
        anomalies.truncate(self.config.max_anomalies);
        anomalies
    }

    fn trends(&self, rows: &[Row], columns: &[String], date_column: &str) -> Vec<TrendResult> {
        let mut dated: Vec<&Row> = rows.iter().collect();
        dated.sort_by_key(|row| row.get(date_column).and_then(cell_as_date));
        // undated rows sort first under Option ordering; drop them
        dated.retain(|row| row.get(date_column).and_then(cell_as_date).is_some());

        let mut results = Vec::new();
        for column in columns {
            let values =
                dated.iter().filter_map(|row| row.get(column).and_then(cell_as_f64)).collect::<Vec<_>>();
            if values.len() < 3 {
                continue;
            }

            let (slope, r_squared) = linear_regression(&values);
            let half = values.len() / 2;
            let first_mean = mean(&values[..half]);
            let second_mean = mean(&values[half..]);
            let change_rate = if first_mean.abs() > f64::EPSILON {
                (second_mean - first_mean) / first_mean * 100.0
            } else {
                0.0
            };
            let volatility = coefficient_of_variation(&values);

            let direction = if volatility > self.config.volatility_cv {
                TrendDirection::Volatile
            } else if slope > 0.01 && change_rate > 5.0 {
                TrendDirection::Increasing
            } else if slope < -0.01 && change_rate < -5.0 {
                TrendDirection::Decreasing
            } else {
                TrendDirection::Stable
            };

            results.push(TrendResult {
                column: column.clone(),
                direction,
                change_rate: round_to(change_rate, 1),
                slope,
                r_squared,
                confidence: (r_squared.clamp(0.0, 1.0) * 100.0).round() as u8,
            });
        }
        results
    }
}

fn classify_strength(abs_r: f64) -> Option<Strength> {
    if abs_r >= 0.7 {
        Some(Strength::Strong)
    } else if abs_r >= 0.4 {
        Some(Strength::Moderate)
    } else if abs_r >= 0.2 {
        Some(Strength::Weak)
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// Insight synthesis
// ---------------------------------------------------------------------------

fn build_insights(
    correlations: &[CorrelationResult],
    anomalies: &[AnomalyResult],
    trends: &[TrendResult],
) -> Vec<AnalysisInsight> {
    let mut insights = Vec::new();

    if let Some(top) = correlations.iter().find(|c| c.strength == Strength::Strong) {
        let relation = if top.coefficient > 0.0 { "move together" } else { "move in opposite directions" };
        insights.push(AnalysisInsight {
            insight_type: InsightType::Correlation,
            importance: Importance::High,
            title: format!("Strong correlation: {} and {}", top.column_a, top.column_b),
            description: format!(
                "{} and {} {relation} (r = {:.2}).",
                top.column_a, top.column_b, top.coefficient
            ),
            related_columns: vec![top.column_a.clone(), top.column_b.clone()],
            suggested_action: Some(format!(
                "Monitor {} and {} together when planning changes.",
                top.column_a, top.column_b
            )),
        });
    }

    let high_severity = anomalies.iter().filter(|a| a.severity == Severity::High).collect::<Vec<_>>();
    if !high_severity.is_empty() {
        let columns = high_severity
            .iter()
            .map(|a| a.column.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect::<Vec<_>>();
        insights.push(AnalysisInsight {
            insight_type: InsightType::Anomaly,
            importance: Importance::High,
            title: format!("{} extreme outlier(s) detected", high_severity.len()),
            description: high_severity[0].description.clone(),
            related_columns: columns,
            suggested_action: Some("Check the flagged rows for data-entry errors or one-off events.".to_owned()),
        });
    }

    for trend in trends.iter().filter(|t| t.change_rate.abs() > 10.0).take(2) {
        let importance =
            if trend.change_rate.abs() > 20.0 { Importance::High } else { Importance::Medium };
        let verb = if trend.change_rate > 0.0 { "rose" } else { "fell" };
        insights.push(AnalysisInsight {
            insight_type: InsightType::Trend,
            importance,
            title: format!("{} {verb} {:.1}%", trend.column, trend.change_rate.abs()),
            description: format!(
                "{} {verb} {:.1}% between the first and second half of the period (trend confidence {}%).",
                trend.column,
                trend.change_rate.abs(),
                trend.confidence
            ),
            related_columns: vec![trend.column.clone()],
            suggested_action: Some(if trend.change_rate > 0.0 {
                format!("Identify what drove the {} increase and reinforce it.", trend.column)
            } else {
                format!("Investigate the drop in {} before it compounds.", trend.column)
            }),
        });
    }

    insights.sort_by_key(|insight| insight.importance);
    insights
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn population_std_dev(values: &[f64], mean: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

fn coefficient_of_variation(values: &[f64]) -> f64 {
    let mean = mean(values);
    if values.len() < 2 || mean.abs() <= f64::EPSILON {
        return 0.0;
    }
    population_std_dev(values, mean) / mean.abs()
}

pub fn pearson(xs: &[f64], ys: &[f64]) -> f64 {
    let n = xs.len().min(ys.len());
    if n < 2 {
        return 0.0;
    }
    let mean_x = mean(&xs[..n]);
    let mean_y = mean(&ys[..n]);

    let (mut numerator, mut denom_x, mut denom_y) = (0.0, 0.0, 0.0);
    for (x, y) in xs.iter().zip(ys).take(n) {
        let dx = x - mean_x;
        let dy = y - mean_y;
        numerator += dx * dy;
        denom_x += dx * dx;
        denom_y += dy * dy;
    }

    let denominator = (denom_x * denom_y).sqrt();
    if denominator <= f64::EPSILON {
        0.0
    } else {
        numerator / denominator
    }
}

/// Least-squares fit of `values` against their index. Returns (slope, R²).
pub fn linear_regression(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    if values.len() < 2 {
        return (0.0, 0.0);
    }

    let sum_x: f64 = (0..values.len()).map(|i| i as f64).sum();
    let sum_y: f64 = values.iter().sum();
    let sum_xy: f64 = values.iter().enumerate().map(|(i, y)| i as f64 * y).sum();
    let sum_xx: f64 = (0..values.len()).map(|i| (i as f64).powi(2)).sum();

    let denominator = n * sum_xx - sum_x * sum_x;
    if denominator.abs() <= f64::EPSILON {
        return (0.0, 0.0);
    }
    let slope = (n * sum_xy - sum_x * sum_y) / denominator;
    let intercept = (sum_y - slope * sum_x) / n;

    let mean_y = sum_y / n;
    let ss_total: f64 = values.iter().map(|y| (y - mean_y).powi(2)).sum();
    let ss_residual: f64 = values
        .iter()
        .enumerate()
        .map(|(i, y)| (y - (slope * i as f64 + intercept)).powi(2))
        .sum();
    let r_squared = if ss_total <= f64::EPSILON { 0.0 } else { 1.0 - ss_residual / ss_total };

    (slope, r_squared)
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10_f64.powi(decimals);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::{
        build_insights, linear_regression, pearson, AnomalyResult, CorrelationAnalyzer, Direction,
        Importance, InsightType, Severity, Strength, TrendDirection,
    };
    use crate::domain::row::Row;

    fn rows(values: Vec<Value>) -> Vec<Row> {
        values
            .into_iter()
            .map(|value| match value {
                Value::Object(map) => map,
                other => panic!("expected object row, got {other}"),
            })
            .collect()
    }

    #[test]
    fn perfectly_linear_columns_are_strongly_correlated() {
        let data = rows(
            (1..=8)
                .map(|i| json!({ "orders": i, "revenue": (i * 25 + 100).to_string(), "returns": 20 - i }))
                .collect(),
        );

        let report = CorrelationAnalyzer::default().analyze(&data);

        let revenue = report
            .correlations
            .iter()
            .find(|c| c.column_a == "orders" && c.column_b == "revenue")
            .expect("orders/revenue correlation");
        assert!((revenue.coefficient.abs() - 1.0).abs() < 1e-9);
        assert_eq!(revenue.strength, Strength::Strong);
        assert_eq!(revenue.direction, Direction::Positive);

        let returns = report
            .correlations
            .iter()
            .find(|c| c.column_b == "returns" && c.column_a == "orders")
            .expect("orders/returns correlation");
        assert_eq!(returns.direction, Direction::Negative);

        assert_eq!(report.insights[0].insight_type, InsightType::Correlation);
    }

    #[test]
    fn constant_column_never_produces_anomalies() {
        let mut values: Vec<Value> =
            (0..20).map(|i| json!({ "flat": 7, "spiky": if i == 19 { 1000 } else { 10 } })).collect();
        values.push(json!({ "flat": 7, "spiky": 10 }));
        let data = rows(values);

        let report = CorrelationAnalyzer::default().analyze(&data);

        assert!(report.anomalies.iter().all(|a| a.column != "flat"));
        let spike = report.anomalies.iter().find(|a| a.column == "spiky").expect("spike");
        assert_eq!(spike.row_index, 19);
        assert_eq!(spike.severity, Severity::High);
        assert!(report
            .insights
            .iter()
            .any(|insight| insight.insight_type == InsightType::Anomaly
                && insight.importance == Importance::High));
    }

    #[test]
    fn anomalies_are_capped_and_ordered_by_z_score() {
        let mut values: Vec<Value> = (0..400).map(|_| json!({ "v": 1 })).collect();
        for i in 0..15 {
            values.push(json!({ "v": 200 + i }));
        }
        let data = rows(values);

        let report = CorrelationAnalyzer::default().analyze(&data);

        assert_eq!(report.anomalies.len(), 10);
        assert!(report.anomalies.windows(2).all(|pair| pair[0].z_score >= pair[1].z_score));
    }

    #[test]
    fn anomaly_insight_lists_each_column_once() {
        let outlier = |column: &str, z_score: f64| AnomalyResult {
            column: column.to_owned(),
            row_index: 0,
            value: 1_000.0,
            z_score,
            severity: Severity::High,
            description: format!("{column} spike"),
        };
        let anomalies = vec![outlier("revenue", 6.0), outlier("quantity", 5.5), outlier("revenue", 5.0)];

        let insights = build_insights(&[], &anomalies, &[]);

        assert_eq!(insights.len(), 1);
        assert_eq!(insights[0].title, "3 extreme outlier(s) detected");
        assert_eq!(insights[0].related_columns, vec!["quantity".to_owned(), "revenue".to_owned()]);
    }

    #[test]
    fn dated_series_yields_increasing_trend() {
        let data = rows(
            (1..=10)
                .rev()
                .map(|day| {
                    json!({
                        "order_created": format!("2025-11-{day:02} 10:00:00"),
                        "Total GMV": (100 + day * 10).to_string()
                    })
                })
                .collect(),
        );

        let report = CorrelationAnalyzer::default().analyze(&data);

        let trend = report.trends.iter().find(|t| t.column == "Total GMV").expect("trend");
        assert_eq!(trend.direction, TrendDirection::Increasing);
        assert!(trend.change_rate > 20.0);
        assert_eq!(trend.confidence, 100);
        assert!(report.insights.iter().any(|i| i.insight_type == InsightType::Trend));
    }

    #[test]
    fn text_columns_and_tiny_inputs_are_ignored() {
        let analyzer = CorrelationAnalyzer::default();
        assert!(analyzer.analyze(&rows(vec![json!({ "a": 1, "b": 2 })])).is_empty());

        let data = rows(vec![
            json!({ "artist": "Kim", "sales": "10", "note": "" }),
            json!({ "artist": "Lee", "sales": "12", "note": "" }),
        ]);
        assert_eq!(analyzer.numeric_columns(&data), vec!["sales".to_owned()]);
    }

    #[test]
    fn regression_and_pearson_helpers() {
        let (slope, r_squared) = linear_regression(&[2.0, 4.0, 6.0, 8.0]);
        assert!((slope - 2.0).abs() < 1e-9);
        assert!((r_squared - 1.0).abs() < 1e-9);
        assert_eq!(pearson(&[1.0, 1.0, 1.0], &[1.0, 2.0, 3.0]), 0.0);
    }
}
