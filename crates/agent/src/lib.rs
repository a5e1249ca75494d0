//! Agent runtime for tabula.
//!
//! Turns a natural-language question about the commerce sheets into an
//! answer:
//! 1. **Intent extraction** (`intent`) - model-backed with a keyword fallback
//! 2. **Conversation context** (`conversation`) - references, slots, history
//! 3. **Category routing** (`router`) - picks the flow for the question
//! 4. **Workflow execution** (`workflow`) - capability agents in dependency waves
//! 5. **Integration** (`integrator`, `navigation`) - one response with page hints
//!
//! # Safety Principle
//!
//! The model only translates and narrates. Filters, joins, aggregations and
//! every number shown come from the deterministic data layer.

pub mod capability;
pub mod classify;
pub mod conversation;
pub mod integrator;
pub mod intent;
pub mod llm;
pub mod maintenance;
pub mod metrics;
pub mod navigation;
pub mod patterns;
pub mod router;
pub mod runtime;
pub mod validator;
pub mod workflow;

pub use capability::{AgentContext, AgentError, AgentRegistry, CapabilityAgent};
pub use conversation::{ConversationManager, TurnUpdate};
pub use intent::IntentExtractor;
pub use llm::{client_from_config, LlmClient, LlmError};
pub use maintenance::MaintenanceHandle;
pub use metrics::{AgentRun, MetricsCollector, MetricsSummary};
pub use router::{CategoryRouter, RoutedResponse};
pub use runtime::{AgentRuntime, AskRequest, AskResponse, ConversationInfo};
pub use validator::{ResponseCheck, ResponseValidator, ValidationContext, ValidatorConfig};
pub use workflow::{WorkflowEngine, WorkflowExecution, WorkflowResult};
