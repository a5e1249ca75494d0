//! Page navigation hints.
//!
//! Navigation is always secondary to answering the question: a clear "go to
//! X" request adds a leading navigate action, weaker signals only append a
//! suggestion after the answer.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Map, Value};

use tabula_core::domain::agent::{ActionKind, AgentAction, AgentResponse};
use tabula_core::flows::QuestionCategory;

use crate::classify::{classify_with_fallback, reported_confidence};
use crate::llm::{ChatMessage, CompletionOptions, LlmClient};
use crate::patterns::mentions;

pub const PRIMARY_THRESHOLD: f64 = 0.95;
pub const SECONDARY_THRESHOLD: f64 = 0.7;
const FALLBACK_CONFIDENCE: f64 = 0.7;
const MAX_PAGE_SUGGESTIONS: usize = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct PageRoute {
    pub name: &'static str,
    pub path: &'static str,
    pub description: &'static str,
    /// Phrases that name the page, most specific first across the table.
    pub keywords: &'static [&'static str],
}

pub const PAGES: &[PageRoute] = &[
    PageRoute {
        name: "Unreceived Items",
        path: "/logistics/unreceived",
        description: "items not yet received at the warehouse",
        keywords: &["unreceived", "미입고"],
    },
    PageRoute {
        name: "Logistics Tracking",
        path: "/logistics/tracking",
        description: "shipment tracking",
        keywords: &["logistics tracking", "shipment tracking", "물류 추적"],
    },
    PageRoute {
        name: "Logistics Control Center",
        path: "/logistics/control",
        description: "logistics control center",
        keywords: &["control center", "물류 관제"],
    },
    PageRoute {
        name: "Shipping Cost Settlement",
        path: "/cost-analysis",
        description: "shipping cost settlement",
        keywords: &["shipping cost", "cost analysis", "물류비"],
    },
    PageRoute {
        name: "Artist Analytics",
        path: "/artist-analytics",
        description: "per-artist performance",
        keywords: &["artist analytics", "작가 분석"],
    },
    PageRoute {
        name: "Business Brain",
        path: "/business-brain",
        description: "insights and strategy",
        keywords: &["business brain", "비즈니스 브레인"],
    },
    PageRoute {
        name: "Performance Analytics",
        path: "/analytics",
        description: "sales performance analysis",
        keywords: &["performance analytics", "analytics", "성과 분석"],
    },
    PageRoute {
        name: "Logistics Operations",
        path: "/logistics",
        description: "logistics operations overview",
        keywords: &["logistics", "물류"],
    },
    PageRoute {
        name: "QC Management",
        path: "/qc",
        description: "quality control",
        keywords: &["qc"],
    },
    PageRoute {
        name: "Parcel Receipts",
        path: "/sopo-receipt",
        description: "parcel receipt documents",
        keywords: &["parcel receipt", "소포수령증"],
    },
    PageRoute {
        name: "Search",
        path: "/search",
        description: "unified search",
        keywords: &["search page", "검색"],
    },
    PageRoute {
        name: "Dashboard",
        path: "/dashboard",
        description: "main dashboard",
        keywords: &["dashboard", "대시보드"],
    },
];

const NAVIGATION_VERBS: &[&str] =
    &["go to", "open", "show", "navigate", "take me", "view", "이동", "보여줘", "보기", "열어"];

pub fn page_by_path(path: &str) -> Option<&'static PageRoute> {
    PAGES.iter().find(|page| page.path == path)
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationIntent {
    pub target_page: String,
    pub path: String,
    pub params: Map<String, Value>,
    pub confidence: f64,
    pub is_primary_action: bool,
}

impl NavigationIntent {
    pub fn is_primary(&self) -> bool {
        self.is_primary_action && self.confidence > PRIMARY_THRESHOLD
    }

    pub fn is_secondary(&self) -> bool {
        !self.is_primary() && self.confidence >= SECONDARY_THRESHOLD
    }

    fn action(&self, label: String) -> AgentAction {
        let mut action = AgentAction::navigate(label, &self.path);
        if !self.params.is_empty() {
            action.data = json!({ "path": self.path, "params": self.params });
        }
        action
    }
}

pub struct NavigationDetector {
    llm: Arc<dyn LlmClient>,
}

impl NavigationDetector {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    pub async fn detect(&self, query: &str) -> Option<NavigationIntent> {
        let pages = PAGES
            .iter()
            .map(|page| format!("- {}: {} ({})", page.name, page.path, page.description))
            .collect::<Vec<_>>()
            .join("\n");
        let messages = [
            ChatMessage::system(
                "You decide whether a question asks to open a page of the admin console. Answer with JSON only.",
            ),
            ChatMessage::user(format!(
                "Question: \"{query}\"\n\nPages:\n{pages}\n\n\
                 Navigation is secondary to answering. Use confidence > 0.95 and isPrimaryAction true only for \
                 explicit requests such as \"go to the dashboard\"; 0.7-0.95 when a page is merely related; \
                 below 0.7 otherwise.\n\
                 Answer {{\"isNavigation\": bool, \"targetPage\": \"\", \"path\": \"\", \"params\": {{}}, \
                 \"confidence\": 0.0, \"isPrimaryAction\": bool}}."
            )),
        ];

        classify_with_fallback(
            self.llm.as_ref(),
            "navigation",
            &messages,
            CompletionOptions::classification(500),
            parse_navigation,
            || (fallback_navigation(query), FALLBACK_CONFIDENCE),
        )
        .await
        .value
    }
}

fn parse_navigation(value: &Value) -> Option<(Option<NavigationIntent>, f64)> {
    let confidence = reported_confidence(value, 0.8);
    let is_navigation = value.get("isNavigation")?.as_bool()?;
    if !is_navigation || confidence < SECONDARY_THRESHOLD {
        return Some((None, confidence));
    }

    // unknown paths are never offered
    let page = page_by_path(value.get("path")?.as_str()?)?;
    let intent = NavigationIntent {
        target_page: page.name.to_owned(),
        path: page.path.to_owned(),
        params: value.get("params").and_then(Value::as_object).cloned().unwrap_or_default(),
        confidence,
        is_primary_action: value.get("isPrimaryAction").and_then(Value::as_bool).unwrap_or(false),
    };
    Some((Some(intent), confidence))
}

/// Keyword match: a page phrase plus a navigation verb. Never primary.
pub fn fallback_navigation(query: &str) -> Option<NavigationIntent> {
    let lowered = query.to_lowercase();
    if !mentions(&lowered, NAVIGATION_VERBS) {
        return None;
    }
    let page = PAGES.iter().find(|page| mentions(&lowered, page.keywords))?;
    Some(NavigationIntent {
        target_page: page.name.to_owned(),
        path: page.path.to_owned(),
        params: Map::new(),
        confidence: FALLBACK_CONFIDENCE,
        is_primary_action: false,
    })
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PageSuggestion {
    pub label: &'static str,
    pub path: &'static str,
    pub tab: &'static str,
}

pub fn suggested_pages(category: QuestionCategory) -> Vec<PageSuggestion> {
    let analytics = PageSuggestion { label: "View details in Performance Analytics", path: "/analytics", tab: "overview" };
    let insights = PageSuggestion { label: "View insights in Business Brain", path: "/business-brain", tab: "insights" };
    match category {
        QuestionCategory::DataQuery => vec![analytics],
        QuestionCategory::AnalysisRequest | QuestionCategory::InsightRequest => vec![insights],
        QuestionCategory::StrategySuggestion => vec![PageSuggestion {
            label: "View strategy analysis in Business Brain",
            path: "/business-brain",
            tab: "strategy",
        }],
        QuestionCategory::ComplexQuery => vec![analytics, insights],
        QuestionCategory::ActionExecution | QuestionCategory::PageNavigation => Vec::new(),
    }
}

fn offered_paths(response: &AgentResponse) -> Vec<String> {
    response.actions.iter().filter_map(|action| action.navigation_path().map(str::to_owned)).collect()
}

/// Adds the navigation action for a detected intent. Returns true when the
/// intent was primary.
pub fn apply_navigation(response: &mut AgentResponse, intent: &NavigationIntent) -> bool {
    if intent.is_primary() {
        response.actions.insert(0, intent.action(format!("Go to {}", intent.target_page)));
        return true;
    }
    if intent.is_secondary() && !offered_paths(response).contains(&intent.path) {
        response.actions.push(intent.action(format!("View details in {}", intent.target_page)));
    }
    false
}

/// Appends up to two category page suggestions that are not already offered.
pub fn append_page_suggestions(response: &mut AgentResponse, category: QuestionCategory) {
    if response.response.trim().is_empty() {
        return;
    }
    let offered = offered_paths(response);
    let additions: Vec<AgentAction> = suggested_pages(category)
        .into_iter()
        .filter(|suggestion| !offered.iter().any(|path| path == suggestion.path))
        .take(MAX_PAGE_SUGGESTIONS)
        .map(|suggestion| AgentAction {
            label: suggestion.label.to_owned(),
            action: ActionKind::Navigate,
            data: json!({ "path": suggestion.path, "params": { "tab": suggestion.tab } }),
        })
        .collect();
    response.actions.extend(additions);
}
