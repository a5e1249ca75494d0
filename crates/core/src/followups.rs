use serde::Serialize;

use crate::errors::InterfaceError;
use crate::flows::QuestionCategory;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FollowUp {
    pub label: String,
    pub query: String,
}

impl FollowUp {
    fn new(label: &str, query: &str) -> Self {
        Self { label: label.to_owned(), query: query.to_owned() }
    }
}

/// Suggested next questions for a category.
pub fn for_category(category: QuestionCategory) -> Vec<FollowUp> {
    let pairs: &[(&str, &str)] = match category {
        QuestionCategory::DataQuery | QuestionCategory::ActionExecution => &[
            ("Compare with last month", "compare last month vs this month revenue"),
            ("Break down by country", "revenue by country this month"),
            ("Top artists", "top 5 artists by revenue this month"),
        ],
        QuestionCategory::AnalysisRequest => &[
            ("Show the trend", "revenue trend over the recent 30 days"),
            ("Find anomalies", "any unusual orders in the recent 7 days"),
            ("Key insights", "key insights for this month"),
        ],
        QuestionCategory::StrategySuggestion => &[
            ("Growth levers", "which countries are growing fastest this quarter"),
            ("Retention", "strategy to reduce customer churn"),
            ("Marketing focus", "which platform brings the most revenue this month"),
        ],
        QuestionCategory::InsightRequest => &[
            ("Drill into the top insight", "drill down into the top insight"),
            ("Weekly briefing", "this week business briefing"),
            ("Compare periods", "compare last month vs this month"),
        ],
        QuestionCategory::PageNavigation => &[
            ("Open the dashboard", "go to the dashboard"),
            ("Today's orders", "today's order count"),
        ],
        QuestionCategory::ComplexQuery => &[
            ("Data only", "show the raw data for this month"),
            ("Insights only", "key insights for this month"),
            ("Strategy only", "strategy to grow revenue next month"),
        ],
    };

    pairs.iter().map(|(label, query)| FollowUp::new(label, query)).collect()
}

/// Suggestions attached to a failed answer in place of the internal error.
pub fn for_failure(error: &InterfaceError) -> Vec<FollowUp> {
    let pairs: &[(&str, &str)] = match error {
        InterfaceError::BadRequest { .. } => &[
            ("Use a known sheet", "show orders this month"),
            ("Set an explicit range", "revenue from 2025-01-01 to 2025-01-31"),
        ],
        InterfaceError::NoData { .. } => &[
            ("Widen the range", "revenue in the recent 30 days"),
            ("Drop the filters", "show all orders this month"),
            ("Try last month", "revenue last month"),
        ],
        InterfaceError::ServiceUnavailable { .. } | InterfaceError::Internal { .. } => &[
            ("Retry", "try the same question again"),
            ("Simpler question", "today's order count"),
        ],
    };

    pairs.iter().map(|(label, query)| FollowUp::new(label, query)).collect()
}
