//! Capability agents and their registry.
//!
//! Every agent answers through the same contract: a query plus an
//! [`AgentContext`] in, an [`AgentResponse`] out. The workflow engine and the
//! category router only ever see the trait.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

use tabula_core::analysis::{AnalysisReport, CorrelationAnalyzer};
use tabula_core::dates::DateParser;
use tabula_core::domain::agent::{AgentKind, AgentResponse};
use tabula_core::domain::conversation::ConversationSlot;
use tabula_core::domain::date_range::DateRange;
use tabula_core::domain::query::{Intent, QueryPlan};
use tabula_core::domain::row::{cell_as_f64, cell_as_text, Row};
use tabula_core::errors::ApplicationError;
use tabula_core::optimizer::QueryOptimizer;
use tabula_data::{DataAccessError, DataAccessLayer, PlanOutput};

use crate::intent::fallback_intent;
use crate::llm::{CompletionOptions, LlmClient};
use crate::validator::{ResponseValidator, ValidationContext, ValidatorConfig};

pub const PREVIOUS_DATA: &str = "previousData";
pub const PREVIOUS_ANALYSIS: &str = "previousAnalysis";
pub const PREVIOUS_MARKETING: &str = "previousMarketingInsights";
pub const PREVIOUS_STRATEGY: &str = "previousStrategy";

const SUMMARY_LINES: usize = 5;
const PROMPT_SAMPLE_ROWS: usize = 5;
/// Model text scoring below this is replaced by the deterministic rendering.
const REJECT_BELOW: f64 = 40.0;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AgentError {
    #[error("no agent registered for `{0}`")]
    NotRegistered(AgentKind),
    #[error(transparent)]
    Application(#[from] ApplicationError),
}

impl From<DataAccessError> for AgentError {
    fn from(error: DataAccessError) -> Self {
        Self::Application(error.into())
    }
}

impl AgentError {
    pub fn into_application(self) -> ApplicationError {
        match self {
            Self::NotRegistered(kind) => ApplicationError::Configuration(format!("no agent registered for `{kind}`")),
            Self::Application(error) => error,
        }
    }
}

/// Everything an agent may consult besides the query text.
#[derive(Clone, Debug)]
pub struct AgentContext {
    pub today: NaiveDate,
    pub correlation_id: String,
    pub intent: Option<Intent>,
    pub date_range: Option<DateRange>,
    pub conversation_slots: Option<ConversationSlot>,
    /// Dependency outputs keyed by context field (`previousData`, ...).
    pub upstream: BTreeMap<&'static str, Value>,
    pub dependency_results: BTreeMap<String, AgentResponse>,
}

impl AgentContext {
    pub fn new(today: NaiveDate, correlation_id: impl Into<String>) -> Self {
        Self {
            today,
            correlation_id: correlation_id.into(),
            intent: None,
            date_range: None,
            conversation_slots: None,
            upstream: BTreeMap::new(),
            dependency_results: BTreeMap::new(),
        }
    }

    pub fn with_intent(mut self, intent: Intent) -> Self {
        self.date_range = intent.entities.date_range.or(self.date_range);
        self.intent = Some(intent);
        self
    }

    pub fn with_slots(mut self, slots: ConversationSlot) -> Self {
        self.conversation_slots = Some(slots);
        self
    }

    pub fn upstream_text(&self, field: &str) -> Option<&str> {
        self.upstream.get(field).and_then(Value::as_str).filter(|text| !text.trim().is_empty())
    }

    /// Rows delivered by an upstream data producer, if any.
    pub fn previous_rows(&self) -> Option<Vec<Row>> {
        let rows = self.upstream.get(PREVIOUS_DATA)?.as_array()?;
        Some(rows.iter().filter_map(|row| row.as_object().cloned()).collect())
    }
}

#[async_trait]
pub trait CapabilityAgent: Send + Sync {
    fn kind(&self) -> AgentKind;

    async fn process(&self, query: &str, context: &AgentContext) -> Result<AgentResponse, AgentError>;
}

#[derive(Clone, Default)]
pub struct AgentRegistry {
    agents: HashMap<AgentKind, Arc<dyn CapabilityAgent>>,
}

impl AgentRegistry {
    /// The four built-in agents over one data layer and one model client.
    pub fn standard(data: Arc<DataAccessLayer>, llm: Arc<dyn LlmClient>) -> Self {
        let analyst = Arc::new(DataAnalystAgent::new(data));
        let mut registry = Self::default();
        registry.register(analyst.clone());
        registry.register(Arc::new(NarrativeAgent::marketer(llm.clone())));
        registry.register(Arc::new(NarrativeAgent::manager(llm.clone())));
        registry.register(Arc::new(InsightAgent::new(analyst, llm)));
        registry
    }

    pub fn register(&mut self, agent: Arc<dyn CapabilityAgent>) {
        self.agents.insert(agent.kind(), agent);
    }

    pub fn get(&self, kind: AgentKind) -> Result<Arc<dyn CapabilityAgent>, AgentError> {
        self.agents.get(&kind).cloned().ok_or(AgentError::NotRegistered(kind))
    }

    pub fn kinds(&self) -> Vec<AgentKind> {
        let mut kinds: Vec<AgentKind> = self.agents.keys().copied().collect();
        kinds.sort();
        kinds
    }
}

// ---------------------------------------------------------------------------
// Data analyst
// ---------------------------------------------------------------------------

/// Compiles the intent, executes the plan and describes the result.
pub struct DataAnalystAgent {
    data: Arc<DataAccessLayer>,
    optimizer: QueryOptimizer,
    analyzer: CorrelationAnalyzer,
}

impl DataAnalystAgent {
    pub fn new(data: Arc<DataAccessLayer>) -> Self {
        let optimizer = QueryOptimizer::new(data.schema().clone());
        Self { data, optimizer, analyzer: CorrelationAnalyzer::default() }
    }

    /// Plan and rows for the question. Zero matching rows is a `NoData` error
    /// carrying the effective range.
    pub async fn fetch(&self, query: &str, context: &AgentContext) -> Result<(QueryPlan, PlanOutput), AgentError> {
        let mut intent = match &context.intent {
            Some(intent) => intent.clone(),
            None => fallback_intent(query, &DateParser::new(context.today), self.data.schema()),
        };
        if intent.entities.date_range.is_none() {
            intent.entities.date_range = context.date_range;
        }

        let plan = self.optimizer.compile(&intent, context.today)?;
        let output = self.data.execute_plan(&plan).await?;
        if output.matched_rows == 0 {
            return Err(ApplicationError::NoData { date_range: plan.date_range }.into());
        }
        debug!(
            event_name = "agent.analyst.rows",
            correlation_id = %context.correlation_id,
            matched = output.matched_rows,
            returned = output.rows.len(),
            "plan executed"
        );
        Ok((plan, output))
    }
}

#[async_trait]
impl CapabilityAgent for DataAnalystAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::DataAnalyst
    }

    async fn process(&self, query: &str, context: &AgentContext) -> Result<AgentResponse, AgentError> {
        let (plan, output) = self.fetch(query, context).await?;

        let mut lines = vec![describe_result(&plan, &output)];
        if let Some(range) = &plan.date_range {
            for warning in DateParser::new(context.today).check(range).warnings {
                lines.push(format!("Note: {warning}."));
            }
        }

        // row-level statistics only make sense on unaggregated rows
        if !plan.is_aggregating() {
            let report = self.analyzer.analyze(&output.rows);
            lines.extend(report.insights.iter().take(3).map(|insight| format!("- {}", insight.description)));
        }

        Ok(AgentResponse {
            response: lines.join("\n"),
            charts: bar_chart(&plan, &output.rows).into_iter().collect(),
            data: Some(Value::Array(output.rows.into_iter().map(Value::Object).collect())),
            actions: Vec::new(),
        })
    }
}

fn describe_result(plan: &QueryPlan, output: &PlanOutput) -> String {
    let period = plan.date_range.map(|range| range.to_string()).unwrap_or_else(|| "the full history".to_owned());
    let mut text = format!(
        "{} matching rows in {} for {period}.",
        output.matched_rows,
        output.sheets.join(" + ")
    );

    match (plan.aggregations.first(), plan.group_by.is_empty()) {
        (Some(metric), false) => {
            text.push_str(&format!(" {} of {} by {}:", metric.function.as_str(), metric.column, plan.group_by.join(", ")));
            for (rank, row) in output.rows.iter().take(SUMMARY_LINES).enumerate() {
                let group = plan
                    .group_by
                    .iter()
                    .map(|column| row.get(column).map(cell_as_text).unwrap_or_default())
                    .collect::<Vec<_>>()
                    .join(" / ");
                let value = row.get(&metric.column).and_then(cell_as_f64).map(format_number).unwrap_or_default();
                text.push_str(&format!("\n{}. {group}: {value}", rank + 1));
            }
        }
        (Some(_), true) => {
            if let Some(row) = output.rows.first() {
                for aggregation in &plan.aggregations {
                    let value =
                        row.get(&aggregation.column).and_then(cell_as_f64).map(format_number).unwrap_or_default();
                    text.push_str(&format!("\n{} of {}: {value}", aggregation.function.as_str(), aggregation.column));
                }
            }
        }
        (None, _) => text.push_str(&format!(" Showing {} rows.", output.rows.len())),
    }
    text
}

fn bar_chart(plan: &QueryPlan, rows: &[Row]) -> Option<Value> {
    let metric = plan.aggregations.first()?;
    if plan.group_by.is_empty() {
        return None;
    }
    let labels: Vec<String> = rows
        .iter()
        .map(|row| {
            plan.group_by
                .iter()
                .map(|column| row.get(column).map(cell_as_text).unwrap_or_default())
                .collect::<Vec<_>>()
                .join(" / ")
        })
        .collect();
    let values: Vec<f64> =
        rows.iter().map(|row| row.get(&metric.column).and_then(cell_as_f64).unwrap_or_default()).collect();

    Some(json!({
        "type": "bar",
        "title": format!("{} by {}", metric.column, plan.group_by.join(", ")),
        "labels": labels,
        "datasets": [{ "label": metric.column, "data": values }],
    }))
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{value:.0}")
    } else {
        format!("{value:.2}")
    }
}

// ---------------------------------------------------------------------------
// Narrative agents
// ---------------------------------------------------------------------------

/// Model-written commentary over upstream results, with a deterministic
/// text when the model is unavailable.
pub struct NarrativeAgent {
    kind: AgentKind,
    role: &'static str,
    focus: &'static str,
    llm: Arc<dyn LlmClient>,
    validator: ResponseValidator,
}

impl NarrativeAgent {
    pub fn marketer(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            kind: AgentKind::PerformanceMarketer,
            role: "performance marketer",
            focus: "channel and platform performance and campaign opportunities",
            llm,
            validator: ResponseValidator::new(ValidatorConfig::marketer()),
        }
    }

    pub fn manager(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            kind: AgentKind::BusinessManager,
            role: "business manager",
            focus: "strategy and concrete action items",
            llm,
            validator: ResponseValidator::new(ValidatorConfig::manager()),
        }
    }

    fn prompt(&self, query: &str, context: &AgentContext) -> String {
        let mut prompt = format!(
            "You are a {} for an online handmade-goods marketplace. Focus on {}.\nQuestion: {query}\n",
            self.role, self.focus
        );
        push_upstream_sections(&mut prompt, context);
        prompt.push_str("\nAnswer in a few short paragraphs. Do not invent numbers that are not shown above.");
        prompt
    }

    fn fallback_text(&self, context: &AgentContext) -> String {
        let rows = context.previous_rows().unwrap_or_default();
        let leading = leading_row(&rows)
            .map(|row| format!("Leading segment: {row}."))
            .unwrap_or_else(|| "No upstream rows were available.".to_owned());

        match self.kind {
            AgentKind::PerformanceMarketer => format!(
                "Marketing view over {} rows. {leading} Prioritize campaigns toward the leading segment and test \
                 moving budget away from the weakest ones.",
                rows.len()
            ),
            _ => format!(
                "Strategy view over {} rows. {leading} Action items: confirm stock and fulfilment capacity for the \
                 leading segment; review pricing for segments below average.",
                rows.len()
            ),
        }
    }
}

#[async_trait]
impl CapabilityAgent for NarrativeAgent {
    fn kind(&self) -> AgentKind {
        self.kind
    }

    async fn process(&self, query: &str, context: &AgentContext) -> Result<AgentResponse, AgentError> {
        let has_data = context.previous_rows().is_some_and(|rows| !rows.is_empty());
        let response = match self.llm.complete(&self.prompt(query, context), CompletionOptions::default()).await {
            Ok(text) if !text.trim().is_empty() => {
                checked_model_text(&self.validator, self.kind, text.trim(), context, has_data)
                    .unwrap_or_else(|| self.fallback_text(context))
            }
            Ok(_) => self.fallback_text(context),
            Err(error) => {
                warn!(
                    event_name = "agent.narrative.fallback",
                    agent = %self.kind,
                    correlation_id = %context.correlation_id,
                    reason = %error,
                    "model unavailable, using deterministic narrative"
                );
                self.fallback_text(context)
            }
        };
        Ok(AgentResponse::text(response))
    }
}

fn push_upstream_sections(prompt: &mut String, context: &AgentContext) {
    if let Some(rows) = context.previous_rows() {
        let sample: Vec<&Row> = rows.iter().take(PROMPT_SAMPLE_ROWS).collect();
        prompt.push_str(&format!(
            "\nData ({} rows, first {}): {}\n",
            rows.len(),
            sample.len(),
            serde_json::to_string(&sample).unwrap_or_default()
        ));
    }
    for (field, title) in [
        (PREVIOUS_ANALYSIS, "Analysis"),
        (PREVIOUS_MARKETING, "Marketing insights"),
        (PREVIOUS_STRATEGY, "Strategy"),
    ] {
        if let Some(text) = context.upstream_text(field) {
            prompt.push_str(&format!("\n{title}:\n{text}\n"));
        }
    }
}

/// Scores model text; `None` when it is too poor to show.
fn checked_model_text(
    validator: &ResponseValidator,
    agent: AgentKind,
    text: &str,
    context: &AgentContext,
    has_data: bool,
) -> Option<String> {
    let intent = context.intent.as_ref().map(|intent| intent.intent_type);
    let check = validator.validate(text, ValidationContext { intent, has_data });
    let issues: Vec<&str> = check.issues.iter().map(|issue| issue.code).collect();

    if check.score < REJECT_BELOW {
        warn!(
            event_name = "agent.response.rejected",
            agent = %agent,
            correlation_id = %context.correlation_id,
            score = check.score,
            issues = ?issues,
            "model answer rejected, using deterministic text"
        );
        return None;
    }
    debug!(
        event_name = "agent.response.validated",
        agent = %agent,
        correlation_id = %context.correlation_id,
        score = check.score,
        valid = check.valid,
        issues = ?issues,
        "model answer scored"
    );
    Some(text.to_owned())
}

/// Text rendering of the first row (rows arrive sorted by the plan).
fn leading_row(rows: &[Row]) -> Option<String> {
    let row = rows.first()?;
    let parts: Vec<String> = row
        .iter()
        .filter(|(_, value)| !value.is_null())
        .take(4)
        .map(|(column, value)| format!("{column} {}", cell_as_text(value)))
        .collect();
    (!parts.is_empty()).then(|| parts.join(", "))
}

// ---------------------------------------------------------------------------
// Business brain
// ---------------------------------------------------------------------------

/// Runs the statistical analyzer over upstream rows (or fetches its own) and
/// synthesizes the findings.
pub struct InsightAgent {
    analyst: Arc<DataAnalystAgent>,
    analyzer: CorrelationAnalyzer,
    llm: Arc<dyn LlmClient>,
    validator: ResponseValidator,
}

impl InsightAgent {
    pub fn new(analyst: Arc<DataAnalystAgent>, llm: Arc<dyn LlmClient>) -> Self {
        Self {
            analyst,
            analyzer: CorrelationAnalyzer::default(),
            llm,
            validator: ResponseValidator::new(ValidatorConfig::analyst()),
        }
    }
}

#[async_trait]
impl CapabilityAgent for InsightAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::BusinessBrain
    }

    async fn process(&self, query: &str, context: &AgentContext) -> Result<AgentResponse, AgentError> {
        let rows = match context.previous_rows().filter(|rows| !rows.is_empty()) {
            Some(rows) => rows,
            None => self.analyst.fetch(query, context).await?.1.rows,
        };
        let report = self.analyzer.analyze(&rows);
        let findings = describe_report(&report, rows.len());

        let mut prompt = format!(
            "You synthesize business insights for an online handmade-goods marketplace.\nQuestion: {query}\n\
             \nStatistical findings:\n{findings}\n"
        );
        push_upstream_sections(&mut prompt, context);
        prompt.push_str("\nGive the three most important takeaways and one recommendation for each.");

        let response = match self.llm.complete(&prompt, CompletionOptions::default()).await {
            Ok(text) if !text.trim().is_empty() => {
                checked_model_text(&self.validator, AgentKind::BusinessBrain, text.trim(), context, !rows.is_empty())
                    .unwrap_or(findings)
            }
            Ok(_) => findings,
            Err(error) => {
                warn!(
                    event_name = "agent.narrative.fallback",
                    agent = %AgentKind::BusinessBrain,
                    correlation_id = %context.correlation_id,
                    reason = %error,
                    "model unavailable, using analyzer findings"
                );
                findings
            }
        };

        Ok(AgentResponse {
            response,
            data: serde_json::to_value(&report).ok(),
            charts: Vec::new(),
            actions: Vec::new(),
        })
    }
}

fn describe_report(report: &AnalysisReport, row_count: usize) -> String {
    if report.insights.is_empty() {
        return format!("No notable correlations, anomalies or trends in the {row_count} rows analyzed.");
    }
    let mut lines = vec![format!("Findings over {row_count} rows:")];
    for insight in &report.insights {
        let mut line = format!("- {}: {}", insight.title, insight.description);
        if let Some(action) = &insight.suggested_action {
            line.push_str(&format!(" Suggested: {action}"));
        }
        lines.push(line);
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::NaiveDate;
    use serde_json::json;

    use super::{AgentContext, AgentError, AgentRegistry, CapabilityAgent, DataAnalystAgent, NarrativeAgent, PREVIOUS_DATA};
    use crate::intent::fallback_intent;
    use crate::llm::{DisabledLlm, ScriptedLlm};
    use tabula_core::clock::ManualClock;
    use tabula_core::config::AppConfig;
    use tabula_core::dates::DateParser;
    use tabula_core::domain::agent::AgentKind;
    use tabula_core::domain::query::Filter;
    use tabula_core::errors::ApplicationError;
    use tabula_core::schema::SchemaRegistry;
    use tabula_data::{demo_source, DataAccessLayer};

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 11, 20).expect("date")
    }

    fn data_layer() -> Arc<DataAccessLayer> {
        Arc::new(DataAccessLayer::from_config(
            Arc::new(demo_source(today())),
            SchemaRegistry::standard(),
            Arc::new(ManualClock::at_midnight(today())),
            &AppConfig::default().data,
        ))
    }

    #[tokio::test]
    async fn analyst_answers_grouped_questions_with_a_chart() {
        let query = "top 3 artists by revenue in the last 60 days";
        let intent = fallback_intent(query, &DateParser::new(today()), &SchemaRegistry::standard());
        let context = AgentContext::new(today(), "test").with_intent(intent);

        let response = DataAnalystAgent::new(data_layer()).process(query, &context).await.expect("response");
        assert!(response.row_count() > 0 && response.row_count() <= 3);
        assert_eq!(response.charts.len(), 1);
        assert!(response.response.contains("sum of Total GMV"));
    }

    #[tokio::test]
    async fn analyst_reports_no_data_with_the_range_used() {
        let query = "orders in the last 60 days";
        let mut intent = fallback_intent(query, &DateParser::new(today()), &SchemaRegistry::standard());
        intent.entities.filters.push(Filter::equals("platform", "Fax"));
        let range = intent.entities.date_range;
        let context = AgentContext::new(today(), "test").with_intent(intent);

        let error = DataAnalystAgent::new(data_layer()).process(query, &context).await.expect_err("no rows");
        assert_eq!(error, AgentError::Application(ApplicationError::NoData { date_range: range }));
    }

    #[tokio::test]
    async fn narrative_uses_the_model_and_falls_back_without_it() {
        let mut context = AgentContext::new(today(), "test");
        context.upstream.insert(PREVIOUS_DATA, json!([{ "artist_name (kr)": "Mina", "Total GMV": 120 }]));

        let llm = Arc::new(ScriptedLlm::new([Ok("Push Mina on iOS.".to_owned())]));
        let written = NarrativeAgent::marketer(llm.clone()).process("what next?", &context).await.expect("response");
        assert_eq!(written.response, "Push Mina on iOS.");
        assert!(llm.requests()[0][0].content.contains("Mina"));

        let fallback = NarrativeAgent::manager(Arc::new(DisabledLlm)).process("what next?", &context).await.expect("response");
        assert!(fallback.response.starts_with("Strategy view over 1 rows."));
        assert!(fallback.response.contains("Mina"));
    }

    #[tokio::test]
    async fn broken_model_text_is_replaced_by_the_deterministic_narrative() {
        let mut context = AgentContext::new(today(), "test");
        context.upstream.insert(PREVIOUS_DATA, json!([{ "artist_name (kr)": "Mina", "Total GMV": 120 }]));

        let llm = Arc::new(ScriptedLlm::new([Ok("undefined [object Object]".to_owned())]));
        let response = NarrativeAgent::marketer(llm).process("what next?", &context).await.expect("response");
        assert!(response.response.starts_with("Marketing view over 1 rows."));
        assert!(!response.response.contains("undefined"));
    }

    #[tokio::test]
    async fn registry_holds_every_standard_agent() {
        let registry = AgentRegistry::standard(data_layer(), Arc::new(DisabledLlm));
        assert_eq!(registry.kinds(), AgentKind::ALL.to_vec());

        let brain = registry.get(AgentKind::BusinessBrain).expect("brain");
        let response = brain.process("revenue last 60 days", &AgentContext::new(today(), "test")).await.expect("response");
        assert!(response.data.is_some());
        assert!(!response.response.is_empty());
        assert!(AgentRegistry::default().get(AgentKind::DataAnalyst).is_err());
    }
}
