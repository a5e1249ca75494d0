use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::agent::AgentKind;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionCategory {
    #[default]
    DataQuery,
    AnalysisRequest,
    StrategySuggestion,
    InsightRequest,
    ActionExecution,
    PageNavigation,
    ComplexQuery,
}

impl QuestionCategory {
    pub const ALL: [QuestionCategory; 7] = [
        QuestionCategory::DataQuery,
        QuestionCategory::AnalysisRequest,
        QuestionCategory::StrategySuggestion,
        QuestionCategory::InsightRequest,
        QuestionCategory::ActionExecution,
        QuestionCategory::PageNavigation,
        QuestionCategory::ComplexQuery,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::DataQuery => "data_query",
            Self::AnalysisRequest => "analysis_request",
            Self::StrategySuggestion => "strategy_suggestion",
            Self::InsightRequest => "insight_request",
            Self::ActionExecution => "action_execution",
            Self::PageNavigation => "page_navigation",
            Self::ComplexQuery => "complex_query",
        }
    }

    pub fn describe(self) -> &'static str {
        match self {
            Self::DataQuery => "plain data lookup (\"today's revenue\", \"orders from Japan\")",
            Self::AnalysisRequest => "analysis of data (\"revenue trend\", \"compare artist performance\")",
            Self::StrategySuggestion => "strategy proposal (\"how to grow revenue\", \"churn prevention plan\")",
            Self::InsightRequest => "insight or briefing (\"key insights\", \"business health score\")",
            Self::ActionExecution => "run an action (\"create a coupon\", \"download the report\")",
            Self::PageNavigation => "move to a page (\"go to the dashboard\")",
            Self::ComplexQuery => "several of the above in one question",
        }
    }
}

impl fmt::Display for QuestionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuestionCategory {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        Self::ALL
            .into_iter()
            .find(|category| category.as_str() == normalized)
            .ok_or_else(|| format!("unknown question category `{value}`"))
    }
}

const NAVIGATION_KEYWORDS: &[&str] = &["이동", "보여줘", "페이지", "go to", "navigate", "open the", "page"];
const STRATEGY_KEYWORDS: &[&str] =
    &["전략", "방안", "제안", "strategy", "strategies", "how can we", "how do we", "recommend"];
const INSIGHT_KEYWORDS: &[&str] = &["인사이트", "건강도", "브리핑", "insight", "health score", "briefing"];
const ANALYSIS_KEYWORDS: &[&str] =
    &["분석", "트렌드", "비교", "analy", "trend", "compare", "comparison", " vs ", "correlation"];
const ACTION_KEYWORDS: &[&str] = &["생성", "다운로드", "실행", "create", "download", "export", "generate"];

/// Keyword classifier used when the model is unavailable or answers outside
/// the category set. Tables are checked in priority order.
pub fn fallback_category(query: &str) -> QuestionCategory {
    let lowered = query.to_lowercase();
    let table: [(&[&str], QuestionCategory); 5] = [
        (NAVIGATION_KEYWORDS, QuestionCategory::PageNavigation),
        (STRATEGY_KEYWORDS, QuestionCategory::StrategySuggestion),
        (INSIGHT_KEYWORDS, QuestionCategory::InsightRequest),
        (ANALYSIS_KEYWORDS, QuestionCategory::AnalysisRequest),
        (ACTION_KEYWORDS, QuestionCategory::ActionExecution),
    ];

    table
        .into_iter()
        .find(|(keywords, _)| keywords.iter().any(|keyword| lowered.contains(keyword)))
        .map(|(_, category)| category)
        .unwrap_or(QuestionCategory::DataQuery)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Sequential,
    Parallel,
    Hybrid,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowStep {
    pub id: String,
    pub agent: AgentKind,
    pub description: String,
    pub dependencies: Vec<String>,
}

impl FlowStep {
    fn new(id: &str, agent: AgentKind, description: &str, dependencies: &[&str]) -> Self {
        Self {
            id: id.to_owned(),
            agent,
            description: description.to_owned(),
            dependencies: dependencies.iter().map(|dep| (*dep).to_owned()).collect(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryFlow {
    pub category: QuestionCategory,
    pub mode: ExecutionMode,
    pub steps: Vec<FlowStep>,
}

impl CategoryFlow {
    /// Distinct agents in first-appearance order.
    pub fn required_agents(&self) -> Vec<AgentKind> {
        let mut agents = Vec::new();
        for step in &self.steps {
            if !agents.contains(&step.agent) {
                agents.push(step.agent);
            }
        }
        agents
    }

    /// Complex, hybrid or multi-agent flows run on the node workflow engine.
    pub fn uses_workflow(&self) -> bool {
        self.category == QuestionCategory::ComplexQuery
            || self.mode == ExecutionMode::Hybrid
            || self.required_agents().len() > 1
    }

    pub fn final_step(&self) -> Option<&FlowStep> {
        self.steps.last()
    }
}

/// Fixed category → flow table. Categories without a dedicated flow resolve
/// to the data-query flow.
#[derive(Clone, Debug)]
pub struct FlowCatalog {
    flows: BTreeMap<QuestionCategory, CategoryFlow>,
}

impl Default for FlowCatalog {
    fn default() -> Self {
        Self::standard()
    }
}

impl FlowCatalog {
    pub fn new(flows: impl IntoIterator<Item = CategoryFlow>) -> Self {
        Self { flows: flows.into_iter().map(|flow| (flow.category, flow)).collect() }
    }

    pub fn standard() -> Self {
        use AgentKind::{BusinessBrain, BusinessManager, DataAnalyst};

        Self::new([
            CategoryFlow {
                category: QuestionCategory::DataQuery,
                mode: ExecutionMode::Sequential,
                steps: vec![FlowStep::new(
                    "data-lookup",
                    DataAnalyst,
                    "extract requirements, fetch and filter rows, answer in plain language",
                    &[],
                )],
            },
            CategoryFlow {
                category: QuestionCategory::AnalysisRequest,
                mode: ExecutionMode::Hybrid,
                steps: vec![
                    FlowStep::new("data-analysis", DataAnalyst, "compute statistics over the requested data", &[]),
                    FlowStep::new(
                        "insight-generation",
                        BusinessBrain,
                        "interpret the statistics as business insights",
                        &["data-analysis"],
                    ),
                ],
            },
            CategoryFlow {
                category: QuestionCategory::StrategySuggestion,
                mode: ExecutionMode::Sequential,
                steps: vec![
                    FlowStep::new("current-state", BusinessBrain, "assess the current business state", &[]),
                    FlowStep::new(
                        "strategy-generation",
                        BusinessManager,
                        "propose strategies with prioritized action items",
                        &["current-state"],
                    ),
                ],
            },
            CategoryFlow {
                category: QuestionCategory::InsightRequest,
                mode: ExecutionMode::Sequential,
                steps: vec![FlowStep::new("insight-discovery", BusinessBrain, "discover and rank insights", &[])],
            },
            CategoryFlow {
                category: QuestionCategory::ComplexQuery,
                mode: ExecutionMode::Hybrid,
                steps: vec![
                    FlowStep::new("data-tasks", DataAnalyst, "fetch every dataset the question needs", &[]),
                    FlowStep::new("insight-analysis", BusinessBrain, "analyze the fetched data", &["data-tasks"]),
                    FlowStep::new(
                        "strategy-synthesis",
                        BusinessManager,
                        "combine the insights into a strategy",
                        &["insight-analysis"],
                    ),
                ],
            },
        ])
    }

    pub fn get(&self, category: QuestionCategory) -> Option<&CategoryFlow> {
        self.flows.get(&category)
    }

    pub fn resolve(&self, category: QuestionCategory) -> Option<&CategoryFlow> {
        self.get(category).or_else(|| self.get(QuestionCategory::DataQuery))
    }

    pub fn categories(&self) -> impl Iterator<Item = QuestionCategory> + '_ {
        self.flows.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::{fallback_category, ExecutionMode, FlowCatalog, QuestionCategory};
    use crate::domain::agent::AgentKind;

    #[test]
    fn keyword_fallback_respects_priority_order() {
        assert_eq!(fallback_category("대시보드로 이동해줘"), QuestionCategory::PageNavigation);
        assert_eq!(fallback_category("매출 증대 전략 분석"), QuestionCategory::StrategySuggestion);
        assert_eq!(fallback_category("이번주 인사이트 브리핑"), QuestionCategory::InsightRequest);
        assert_eq!(fallback_category("Compare revenue trend by month"), QuestionCategory::AnalysisRequest);
        assert_eq!(fallback_category("download the settlement report"), QuestionCategory::ActionExecution);
        assert_eq!(fallback_category("top 5 artists by revenue"), QuestionCategory::DataQuery);
    }

    #[test]
    fn categories_parse_from_model_output() {
        assert_eq!("analysis_request".parse::<QuestionCategory>(), Ok(QuestionCategory::AnalysisRequest));
        assert_eq!(" Complex-Query ".parse::<QuestionCategory>(), Ok(QuestionCategory::ComplexQuery));
        assert!("weather".parse::<QuestionCategory>().is_err());
    }

    #[test]
    fn unlisted_categories_resolve_to_data_query() {
        let catalog = FlowCatalog::standard();
        for category in [QuestionCategory::ActionExecution, QuestionCategory::PageNavigation] {
            let flow = catalog.resolve(category).expect("flow");
            assert_eq!(flow.category, QuestionCategory::DataQuery);
            assert!(!flow.uses_workflow());
        }
    }

    #[test]
    fn multi_agent_flows_use_the_workflow_engine() {
        let catalog = FlowCatalog::standard();

        let strategy = catalog.get(QuestionCategory::StrategySuggestion).expect("strategy");
        assert_eq!(strategy.mode, ExecutionMode::Sequential);
        assert!(strategy.uses_workflow());
        assert_eq!(
            strategy.required_agents(),
            vec![AgentKind::BusinessBrain, AgentKind::BusinessManager]
        );

        let insight = catalog.get(QuestionCategory::InsightRequest).expect("insight");
        assert!(!insight.uses_workflow());
        assert!(catalog.get(QuestionCategory::ComplexQuery).expect("complex").uses_workflow());
    }
}
