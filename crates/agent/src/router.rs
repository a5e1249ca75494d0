//! Category routing.
//!
//! A question is classified into one of the fixed categories, the category's
//! flow is executed (on the workflow engine when it needs several agents,
//! directly otherwise) and navigation hints are attached to the answer.

use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use tabula_core::domain::agent::{AgentKind, AgentResponse};
use tabula_core::errors::ApplicationError;
use tabula_core::flows::{fallback_category, CategoryFlow, FlowCatalog, FlowEngine, QuestionCategory};

use crate::capability::{AgentContext, PREVIOUS_ANALYSIS, PREVIOUS_DATA};
use crate::classify::{classify_with_fallback, reported_confidence, Classified, ClassifySource};
use crate::integrator::integrate;
use crate::llm::{ChatMessage, CompletionOptions, LlmClient};
use crate::navigation::{append_page_suggestions, apply_navigation, NavigationDetector, NavigationIntent};
use crate::workflow::{WorkflowEngine, WorkflowExecution};

pub const FALLBACK_CONFIDENCE: f64 = 0.5;

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutedResponse {
    pub category: QuestionCategory,
    pub category_confidence: f64,
    pub category_source: ClassifySource,
    pub response: AgentResponse,
    pub navigation: Option<NavigationIntent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow: Option<WorkflowExecution>,
    /// Some node of the run did not complete normally.
    pub degraded: bool,
}

pub struct CategoryRouter {
    llm: Arc<dyn LlmClient>,
    catalog: FlowCatalog,
    planner: FlowEngine,
    workflow: Arc<WorkflowEngine>,
    navigation: NavigationDetector,
}

impl CategoryRouter {
    pub fn new(llm: Arc<dyn LlmClient>, catalog: FlowCatalog, workflow: Arc<WorkflowEngine>) -> Self {
        let navigation = NavigationDetector::new(llm.clone());
        Self { llm, catalog, planner: FlowEngine, workflow, navigation }
    }

    pub async fn classify(&self, query: &str) -> Classified<QuestionCategory> {
        let categories = QuestionCategory::ALL
            .iter()
            .map(|category| format!("- {}: {}", category.as_str(), category.describe()))
            .collect::<Vec<_>>()
            .join("\n");
        let messages = [
            ChatMessage::system(format!(
                "Classify the question into exactly one category.\n{categories}\n\
                 Answer with JSON only: {{\"category\": \"...\", \"confidence\": 0.0-1.0, \"reasoning\": \"...\"}}"
            )),
            ChatMessage::user(query),
        ];

        classify_with_fallback(
            self.llm.as_ref(),
            "category",
            &messages,
            CompletionOptions::classification(300),
            |value| {
                let category = value.get("category")?.as_str()?.parse().ok()?;
                Some((category, reported_confidence(value, 0.8)))
            },
            || (fallback_category(query), FALLBACK_CONFIDENCE),
        )
        .await
    }

    /// Answers `query`. `base` carries today, the resolved intent and the
    /// conversation slots every agent starts from.
    pub async fn route(
        &self,
        query: &str,
        base: &AgentContext,
        category_override: Option<QuestionCategory>,
    ) -> Result<RoutedResponse, ApplicationError> {
        let navigation = self.navigation.detect(query).await;
        let classified = match category_override {
            Some(category) => Classified { value: category, confidence: 1.0, source: ClassifySource::Model },
            None => self.classify(query).await,
        };
        let category = classified.value;
        let flow = self
            .catalog
            .resolve(category)
            .ok_or_else(|| ApplicationError::Configuration(format!("no flow for category `{category}`")))?;

        info!(
            event_name = "router.category.selected",
            correlation_id = %base.correlation_id,
            category = category.as_str(),
            confidence = classified.confidence,
            workflow = flow.uses_workflow(),
            "category routed"
        );

        let (mut response, workflow, degraded) = if flow.uses_workflow() {
            match self.workflow.execute_selected(&flow.required_agents(), query, base).await {
                Ok(execution) => {
                    surface_failure(&execution)?;
                    let degraded = execution.results.values().any(|result| result.is_degraded());
                    (integrate(&execution), Some(execution), degraded)
                }
                Err(error) => {
                    warn!(
                        event_name = "router.workflow.fallback",
                        correlation_id = %base.correlation_id,
                        error = %error,
                        "workflow delegation failed; running the flow directly"
                    );
                    (self.run_flow(flow, query, base).await?, None, false)
                }
            }
        } else {
            (self.run_flow(flow, query, base).await?, None, false)
        };

        let primary = navigation.as_ref().is_some_and(|intent| intent.is_primary());
        if !primary && !degraded {
            append_page_suggestions(&mut response, category);
        }
        if let Some(intent) = &navigation {
            apply_navigation(&mut response, intent);
        }

        Ok(RoutedResponse {
            category,
            category_confidence: classified.confidence,
            category_source: classified.source,
            response,
            navigation,
            workflow,
            degraded,
        })
    }

    /// Lightweight path: flow steps in dependency batches, each batch
    /// concurrently. The final step's answer is the response.
    async fn run_flow(
        &self,
        flow: &CategoryFlow,
        query: &str,
        base: &AgentContext,
    ) -> Result<AgentResponse, ApplicationError> {
        let batches = self.planner.plan(flow).map_err(|error| ApplicationError::Configuration(error.to_string()))?;
        let registry = self.workflow.registry();
        let metrics = self.workflow.metrics();
        let mut completed: Vec<(String, AgentResponse)> = Vec::new();

        for batch in batches {
            let runs = batch.iter().map(|step| {
                let context = step_context(base, &step.dependencies, &completed);
                let agent = registry.get(step.agent);
                async move {
                    let agent = agent.map_err(|error| error.into_application())?;
                    let response = metrics.measure(step.agent, "flow.step", agent.process(query, &context)).await;
                    response.map(|response| (step.id.clone(), response)).map_err(|error| error.into_application())
                }
            });
            for outcome in join_all(runs).await {
                completed.push(outcome?);
            }
        }

        let final_id = flow.final_step().map(|step| step.id.as_str());
        completed
            .into_iter()
            .rev()
            .find(|(id, _)| Some(id.as_str()) == final_id)
            .map(|(_, response)| response)
            .ok_or_else(|| ApplicationError::Configuration(format!("flow `{}` has no steps", flow.category)))
    }
}

fn step_context(base: &AgentContext, dependencies: &[String], completed: &[(String, AgentResponse)]) -> AgentContext {
    let mut context = base.clone();
    for (id, response) in completed.iter().filter(|(id, _)| dependencies.contains(id)) {
        if let Some(data) = &response.data {
            context.upstream.entry(PREVIOUS_DATA).or_insert_with(|| data.clone());
        }
        context.upstream.entry(PREVIOUS_ANALYSIS).or_insert_with(|| Value::String(response.response.clone()));
        context.dependency_results.insert(id.clone(), response.clone());
    }
    context
}

/// A run whose data node found nothing, or where nothing completed, is
/// reported as the typed failure instead of a patched-together answer.
fn surface_failure(execution: &WorkflowExecution) -> Result<(), ApplicationError> {
    let data_node = execution.results.get(AgentKind::DataAnalyst.as_str());
    if let Some(error @ ApplicationError::NoData { .. }) = data_node.and_then(|result| result.failure.as_ref()) {
        return Err(error.clone());
    }
    if execution.all_failed() {
        if let Some(error) = execution.first_failure() {
            return Err(error.clone());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::NaiveDate;
    use serde_json::json;

    use super::CategoryRouter;
    use crate::capability::{AgentContext, AgentRegistry};
    use crate::classify::ClassifySource;
    use crate::intent::fallback_intent;
    use crate::llm::{DisabledLlm, LlmClient, ScriptedLlm};
    use crate::workflow::WorkflowEngine;
    use tabula_core::clock::ManualClock;
    use tabula_core::config::AppConfig;
    use tabula_core::dates::DateParser;
    use tabula_core::domain::query::Filter;
    use tabula_core::errors::ApplicationError;
    use tabula_core::flows::{FlowCatalog, QuestionCategory};
    use tabula_core::graph::NodeGraph;
    use tabula_core::schema::SchemaRegistry;
    use tabula_data::{demo_source, DataAccessLayer};

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 11, 20).expect("date")
    }

    fn router(llm: Arc<dyn LlmClient>) -> CategoryRouter {
        let config = AppConfig::default();
        let data = Arc::new(DataAccessLayer::from_config(
            Arc::new(demo_source(today())),
            SchemaRegistry::standard(),
            Arc::new(ManualClock::at_midnight(today())),
            &config.data,
        ));
        let registry = AgentRegistry::standard(data, llm.clone());
        let workflow = Arc::new(WorkflowEngine::new(NodeGraph::standard(), registry, &config.workflow));
        CategoryRouter::new(llm, FlowCatalog::standard(), workflow)
    }

    fn context_for(query: &str) -> AgentContext {
        let intent = fallback_intent(query, &DateParser::new(today()), &SchemaRegistry::standard());
        AgentContext::new(today(), "test").with_intent(intent)
    }

    #[tokio::test]
    async fn data_questions_run_directly_and_suggest_analytics() {
        let query = "top 5 artists by revenue in the last 30 days";
        let router = router(Arc::new(DisabledLlm));
        let routed = router.route(query, &context_for(query), None).await.expect("routed");

        assert_eq!(routed.category, QuestionCategory::DataQuery);
        assert_eq!(routed.category_source, ClassifySource::Fallback);
        assert!(routed.workflow.is_none());
        assert!(routed.response.row_count() <= 5);
        assert_eq!(routed.response.actions.last().and_then(|action| action.navigation_path()), Some("/analytics"));

        let steps = router.workflow.metrics().summary(None);
        assert!(steps.by_operation["flow.step"].runs >= 1);
        assert_eq!(steps.error_rate_pct, 0.0);
    }

    #[tokio::test]
    async fn analysis_questions_run_on_the_workflow_engine() {
        let query = "analyze the revenue trend over the last 60 days";
        let routed = router(Arc::new(DisabledLlm)).route(query, &context_for(query), None).await.expect("routed");

        assert_eq!(routed.category, QuestionCategory::AnalysisRequest);
        let workflow = routed.workflow.expect("workflow ran");
        assert_eq!(workflow.execution_order.last().map(String::as_str), Some("business-brain"));
        assert!(!routed.response.response.is_empty());
    }

    #[tokio::test]
    async fn empty_results_surface_as_no_data() {
        let query = "orders in the last 30 days";
        let mut context = context_for(query);
        if let Some(intent) = context.intent.as_mut() {
            intent.entities.filters.push(Filter::equals("platform", "Fax"));
        }

        let error = router(Arc::new(DisabledLlm))
            .route(query, &context, Some(QuestionCategory::ComplexQuery))
            .await
            .expect_err("no data");
        assert!(matches!(error, ApplicationError::NoData { .. }));
    }

    #[tokio::test]
    async fn model_classification_is_used_when_valid() {
        let llm = Arc::new(ScriptedLlm::new([
            Ok(json!({ "category": "insight_request", "confidence": 0.9, "reasoning": "asks for insights" }).to_string()),
            Ok(json!({ "category": "teleport" }).to_string()),
        ]));
        let router = router(llm);

        let classified = router.classify("give me this week's key takeaways").await;
        assert_eq!(classified.value, QuestionCategory::InsightRequest);
        assert!((classified.confidence - 0.9).abs() < 1e-9);

        let unknown = router.classify("go to the dashboard").await;
        assert!(unknown.is_fallback());
        assert_eq!(unknown.value, QuestionCategory::PageNavigation);
    }
}
