pub mod category;
pub mod engine;

pub use category::{
    fallback_category, CategoryFlow, ExecutionMode, FlowCatalog, FlowStep, QuestionCategory,
};
pub use engine::{FlowBatches, FlowEngine, FlowPlanError};
