pub mod analysis;
pub mod clock;
pub mod config;
pub mod dates;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod followups;
pub mod graph;
pub mod optimizer;
pub mod schema;

pub use analysis::{AnalysisInsight, AnalysisReport, CorrelationAnalyzer};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AppConfig, ConfigError, ConfigOverrides, LoadOptions};
pub use dates::DateParser;
pub use domain::agent::{ActionKind, AgentAction, AgentKind, AgentResponse, Port};
pub use domain::conversation::{ConversationSlot, DataSnapshot, HistoryEntry, ReferenceType};
pub use domain::date_range::{DateRange, DateRangeType};
pub use domain::query::{
    AggregateFn, Aggregation, Filter, FilterOperator, Intent, IntentEntities, IntentType, JoinEdge,
    OrderBy, QueryPlan, SortDirection,
};
pub use domain::row::Row;
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use flows::{CategoryFlow, FlowCatalog, FlowEngine, QuestionCategory};
pub use followups::FollowUp;
pub use graph::{AgentNode, GraphError, NodeGraph};
pub use optimizer::{QueryOptimizer, ValidationReport};
pub use schema::{SchemaRegistry, SheetSchema};
