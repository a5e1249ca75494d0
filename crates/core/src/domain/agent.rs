use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Closed set of capability agents known to the orchestrator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AgentKind {
    DataAnalyst,
    PerformanceMarketer,
    BusinessManager,
    BusinessBrain,
}

impl AgentKind {
    pub const ALL: [AgentKind; 4] = [
        AgentKind::DataAnalyst,
        AgentKind::PerformanceMarketer,
        AgentKind::BusinessManager,
        AgentKind::BusinessBrain,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::DataAnalyst => "data-analyst",
            Self::PerformanceMarketer => "performance-marketer",
            Self::BusinessManager => "business-manager",
            Self::BusinessBrain => "business-brain",
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace('_', "-");
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| format!("unknown agent `{value}`"))
    }
}

/// Named input/output labels a node declares in the workflow graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Port {
    Query,
    DateRange,
    Data,
    Analysis,
    MarketingInsights,
    Recommendations,
    Strategy,
    ActionItems,
    Insights,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Navigate,
    Query,
    Download,
    Refresh,
    Custom,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentAction {
    pub label: String,
    pub action: ActionKind,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

impl AgentAction {
    pub fn navigate(label: impl Into<String>, path: &str) -> Self {
        Self {
            label: label.into(),
            action: ActionKind::Navigate,
            data: serde_json::json!({ "path": path }),
        }
    }

    pub fn query(label: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            action: ActionKind::Query,
            data: serde_json::json!({ "query": query.into() }),
        }
    }

    pub fn navigation_path(&self) -> Option<&str> {
        match self.action {
            ActionKind::Navigate => self.data.get("path").and_then(Value::as_str),
            _ => None,
        }
    }
}

/// Uniform output of every capability agent.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentResponse {
    pub response: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub charts: Vec<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<AgentAction>,
}

impl AgentResponse {
    pub fn text(response: impl Into<String>) -> Self {
        Self { response: response.into(), ..Self::default() }
    }

    /// Row count of `data` when it is a row array.
    pub fn row_count(&self) -> usize {
        match &self.data {
            Some(Value::Array(rows)) => rows.len(),
            Some(Value::Null) | None => 0,
            Some(_) => 1,
        }
    }
}
