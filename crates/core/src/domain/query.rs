use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::date_range::DateRange;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentType {
    #[default]
    GeneralQuery,
    TrendAnalysis,
    Comparison,
    Aggregation,
    Ranking,
    Filter,
    Join,
}

impl IntentType {
    pub const ALL: [IntentType; 7] = [
        IntentType::GeneralQuery,
        IntentType::TrendAnalysis,
        IntentType::Comparison,
        IntentType::Aggregation,
        IntentType::Ranking,
        IntentType::Filter,
        IntentType::Join,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::GeneralQuery => "general_query",
            Self::TrendAnalysis => "trend_analysis",
            Self::Comparison => "comparison",
            Self::Aggregation => "aggregation",
            Self::Ranking => "ranking",
            Self::Filter => "filter",
            Self::Join => "join",
        }
    }

    /// Lenient parse used for LLM output; anything unknown is a general query.
    pub fn parse_lenient(value: &str) -> Self {
        value.parse().unwrap_or_default()
    }
}

impl FromStr for IntentType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|intent| intent.as_str() == normalized)
            .ok_or_else(|| format!("unknown intent type `{value}`"))
    }
}

impl fmt::Display for IntentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    GreaterThan,
    LessThan,
    GreaterThanOrEqual,
    LessThanOrEqual,
    In,
    NotIn,
    Between,
    StartsWith,
    EndsWith,
}

impl FilterOperator {
    /// Unknown operators degrade to `contains`, the most forgiving match.
    pub fn parse_lenient(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "equals" | "eq" | "=" | "==" => Self::Equals,
            "not_equals" | "ne" | "!=" => Self::NotEquals,
            "not_contains" => Self::NotContains,
            "greater_than" | "gt" | ">" => Self::GreaterThan,
            "less_than" | "lt" | "<" => Self::LessThan,
            "greater_than_or_equal" | "gte" | ">=" => Self::GreaterThanOrEqual,
            "less_than_or_equal" | "lte" | "<=" => Self::LessThanOrEqual,
            "in" => Self::In,
            "not_in" => Self::NotIn,
            "between" => Self::Between,
            "starts_with" => Self::StartsWith,
            "ends_with" => Self::EndsWith,
            _ => Self::Contains,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub column: String,
    pub operator: FilterOperator,
    pub value: Value,
}

impl Filter {
    pub fn equals(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self { column: column.into(), operator: FilterOperator::Equals, value: value.into() }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateFn {
    Sum,
    Avg,
    Count,
    Max,
    Min,
}

impl AggregateFn {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Avg => "avg",
            Self::Count => "count",
            Self::Max => "max",
            Self::Min => "min",
        }
    }

    pub fn parse_lenient(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sum" => Some(Self::Sum),
            "avg" | "average" | "mean" => Some(Self::Avg),
            "count" => Some(Self::Count),
            "max" => Some(Self::Max),
            "min" => Some(Self::Min),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aggregation {
    pub column: String,
    pub function: AggregateFn,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub column: String,
    pub direction: SortDirection,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentEntities {
    pub date_range: Option<DateRange>,
    pub sheets: Vec<String>,
    pub filters: Vec<Filter>,
    pub aggregations: Vec<Aggregation>,
    pub group_by: Vec<String>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Intent {
    pub intent_type: IntentType,
    pub confidence: f64,
    pub entities: IntentEntities,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinEdge {
    pub left_sheet: String,
    pub right_sheet: String,
    pub left_key: String,
    pub right_key: String,
}

/// Compiled, executable description of a data request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryPlan {
    pub sheets: Vec<String>,
    pub date_range: Option<DateRange>,
    pub filters: Vec<Filter>,
    pub aggregations: Vec<Aggregation>,
    pub group_by: Vec<String>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<u32>,
    pub joins: Vec<JoinEdge>,
}

impl QueryPlan {
    pub fn primary_sheet(&self) -> &str {
        self.sheets.first().map(String::as_str).unwrap_or_default()
    }

    pub fn is_aggregating(&self) -> bool {
        !self.aggregations.is_empty() || !self.group_by.is_empty()
    }
}
