use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use tabula_core::clock::Clock;
use tabula_core::config::AppConfig;
use tabula_core::domain::agent::AgentAction;
use tabula_core::domain::conversation::{ConversationSlot, DataSnapshot, HistoryEntry, ReferenceType};
use tabula_core::errors::ApplicationError;
use tabula_core::flows::{FlowCatalog, QuestionCategory};
use tabula_core::followups::{self, FollowUp};
use tabula_core::graph::NodeGraph;
use tabula_core::schema::SchemaRegistry;
use tabula_data::{demo_source, DataAccessLayer, DataSource, InMemoryDataSource};

use crate::capability::{AgentContext, AgentRegistry};
use crate::conversation::ConversationManager;
use crate::intent::{apply_slots, IntentExtractor};
use crate::llm::{client_from_config, LlmClient};
use crate::maintenance::MaintenanceHandle;
use crate::metrics::MetricsCollector;
use crate::router::CategoryRouter;
use crate::workflow::WorkflowEngine;

const HISTORY_FOR_INTENT: usize = 3;

#[derive(Clone, Debug, Default)]
pub struct AskRequest {
    pub query: String,
    pub session_id: Option<String>,
    pub category_override: Option<QuestionCategory>,
    /// Client-held history; used for intent extraction instead of the
    /// session history when present.
    pub history: Vec<HistoryEntry>,
    /// Pins "today" for date parsing; the runtime clock otherwise.
    pub today: Option<NaiveDate>,
}

impl AskRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self { query: query.into(), ..Self::default() }
    }

    pub fn in_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationInfo {
    pub session_id: String,
    pub reference_type: ReferenceType,
    pub enhanced_query: String,
    pub merged_slots: ConversationSlot,
    pub history_length: usize,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AskResponse {
    pub response: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub charts: Vec<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<AgentAction>,
    pub conversation_info: Option<ConversationInfo>,
    pub follow_ups: Vec<FollowUp>,
    pub category: Option<QuestionCategory>,
    pub correlation_id: String,
    /// Set when the question could not be answered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Request-facing facade: intent extraction, conversation state, category
/// routing and error shaping behind one `ask` call.
pub struct AgentRuntime {
    clock: Arc<dyn Clock>,
    schema: SchemaRegistry,
    data: Arc<DataAccessLayer>,
    conversations: Arc<ConversationManager>,
    extractor: IntentExtractor,
    router: CategoryRouter,
    metrics: Arc<MetricsCollector>,
    sweep_interval: Duration,
}

impl AgentRuntime {
    /// Wires every service from configuration: the fixture file (or demo
    /// data), the configured model client and the standard graph.
    pub fn from_config(config: &AppConfig, clock: Arc<dyn Clock>) -> Result<Self, ApplicationError> {
        let source: Arc<dyn DataSource> = match &config.data.fixture_path {
            Some(path) => Arc::new(
                InMemoryDataSource::from_json_file(path)
                    .map_err(|error| ApplicationError::Configuration(error.to_string()))?,
            ),
            None => Arc::new(demo_source(clock.today())),
        };
        let llm = client_from_config(&config.llm).map_err(|error| ApplicationError::Configuration(error.to_string()))?;
        Ok(Self::with_services(source, llm, clock, config))
    }

    pub fn with_services(
        source: Arc<dyn DataSource>,
        llm: Arc<dyn LlmClient>,
        clock: Arc<dyn Clock>,
        config: &AppConfig,
    ) -> Self {
        let schema = SchemaRegistry::standard();
        let data = Arc::new(DataAccessLayer::from_config(source, schema.clone(), clock.clone(), &config.data));
        let registry = AgentRegistry::standard(data.clone(), llm.clone());
        let metrics = Arc::new(MetricsCollector::new(clock.clone()));
        let workflow = Arc::new(
            WorkflowEngine::new(NodeGraph::standard(), registry, &config.workflow).with_metrics(metrics.clone()),
        );

        Self {
            conversations: Arc::new(ConversationManager::new(clock.clone(), &config.conversation)),
            extractor: IntentExtractor::new(llm.clone(), schema.clone()),
            router: CategoryRouter::new(llm, FlowCatalog::standard(), workflow),
            metrics,
            sweep_interval: Duration::from_secs(config.data.sweep_interval_secs),
            clock,
            schema,
            data,
        }
    }

    pub fn data(&self) -> &Arc<DataAccessLayer> {
        &self.data
    }

    pub fn conversations(&self) -> &Arc<ConversationManager> {
        &self.conversations
    }

    /// Run metrics of every agent, workflow nodes and direct flow steps alike.
    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    /// Starts the periodic cache and session sweep.
    pub fn start_maintenance(&self) -> MaintenanceHandle {
        MaintenanceHandle::spawn(
            self.data.clone(),
            self.conversations.clone(),
            self.metrics.clone(),
            self.sweep_interval,
        )
    }

    /// Never fails: errors come back as a friendly message plus suggested
    /// follow-up questions.
    pub async fn ask(&self, request: AskRequest) -> AskResponse {
        let correlation_id = Uuid::new_v4().to_string();
        let today = request.today.unwrap_or_else(|| self.clock.today());
        let session_id = request.session_id.clone().unwrap_or_else(|| Uuid::new_v4().to_string());

        let history = if request.history.is_empty() {
            self.conversations.recent_history(&session_id, HISTORY_FOR_INTENT).await
        } else {
            request.history.clone()
        };
        let classified = self.extractor.extract(&request.query, &history, today).await;
        let turn = self
            .conversations
            .analyze_and_update(&session_id, &request.query, classified.value.intent_type, &classified.value.entities)
            .await;
        let intent = apply_slots(&classified.value, &turn.merged_slots, &self.schema);
        let sheets = intent.entities.sheets.clone();

        let base = AgentContext::new(today, correlation_id.clone())
            .with_intent(intent)
            .with_slots(turn.merged_slots.clone());
        let routed = self.router.route(&turn.enhanced_query, &base, request.category_override).await;

        let conversation_info = ConversationInfo {
            history_length: self.conversations.history(&session_id).await.len(),
            session_id: session_id.clone(),
            reference_type: turn.reference_type,
            enhanced_query: turn.enhanced_query,
            merged_slots: turn.merged_slots,
        };

        match routed {
            Ok(routed) => {
                let snapshot = DataSnapshot { row_count: routed.response.row_count(), sheets };
                self.conversations.save_data_snapshot(&session_id, snapshot).await;
                info!(
                    event_name = "runtime.ask.completed",
                    correlation_id = %correlation_id,
                    category = routed.category.as_str(),
                    intent_source = ?classified.source,
                    degraded = routed.degraded,
                    "question answered"
                );

                AskResponse {
                    response: routed.response.response,
                    data: routed.response.data,
                    charts: routed.response.charts,
                    actions: routed.response.actions,
                    conversation_info: Some(conversation_info),
                    follow_ups: followups::for_category(routed.category),
                    category: Some(routed.category),
                    correlation_id,
                    error: None,
                }
            }
            Err(error) => {
                let detail = match &error {
                    ApplicationError::NoData { date_range: Some(range) } => format!(" Period used: {range}."),
                    ApplicationError::NoData { date_range: None } => " Period used: the full history.".to_owned(),
                    _ => String::new(),
                };
                let interface = error.into_interface(correlation_id.clone());
                warn!(
                    event_name = "runtime.ask.failed",
                    correlation_id = %correlation_id,
                    error = %interface,
                    "question could not be answered"
                );

                AskResponse {
                    response: format!("{}{detail}", interface.user_message()),
                    data: None,
                    charts: Vec::new(),
                    actions: Vec::new(),
                    conversation_info: Some(conversation_info),
                    follow_ups: followups::for_failure(&interface),
                    category: request.category_override,
                    correlation_id,
                    error: Some(error_kind(&interface).to_owned()),
                }
            }
        }
    }
}

fn error_kind(error: &tabula_core::errors::InterfaceError) -> &'static str {
    use tabula_core::errors::InterfaceError;
    match error {
        InterfaceError::BadRequest { .. } => "bad_request",
        InterfaceError::NoData { .. } => "no_data",
        InterfaceError::ServiceUnavailable { .. } => "service_unavailable",
        InterfaceError::Internal { .. } => "internal",
    }
}
