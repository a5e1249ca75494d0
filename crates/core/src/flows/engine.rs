use std::collections::HashSet;

use thiserror::Error;

use crate::flows::category::{CategoryFlow, FlowStep};

/// Steps grouped into batches; every step in a batch has all of its
/// dependencies satisfied by earlier batches.
pub type FlowBatches<'a> = Vec<Vec<&'a FlowStep>>;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum FlowPlanError {
    #[error("flow `{category}` cannot progress; steps never become runnable: {pending:?}")]
    Stuck { category: String, pending: Vec<String> },
    #[error("flow `{category}` declares step `{step}` more than once")]
    DuplicateStep { category: String, step: String },
}

/// Plans category flows into concurrent batches.
#[derive(Clone, Copy, Debug, Default)]
pub struct FlowEngine;

impl FlowEngine {
    pub fn plan<'a>(&self, flow: &'a CategoryFlow) -> Result<FlowBatches<'a>, FlowPlanError> {
        let mut seen = HashSet::new();
        for step in &flow.steps {
            if !seen.insert(step.id.as_str()) {
                return Err(FlowPlanError::DuplicateStep {
                    category: flow.category.to_string(),
                    step: step.id.clone(),
                });
            }
        }

        let mut done: HashSet<&str> = HashSet::new();
        let mut batches = Vec::new();

        while done.len() < flow.steps.len() {
            let ready = flow
                .steps
                .iter()
                .filter(|step| !done.contains(step.id.as_str()))
                .filter(|step| step.dependencies.iter().all(|dep| done.contains(dep.as_str())))
                .collect::<Vec<_>>();

            if ready.is_empty() {
                let pending = flow
                    .steps
                    .iter()
                    .filter(|step| !done.contains(step.id.as_str()))
                    .map(|step| step.id.clone())
                    .collect();
                return Err(FlowPlanError::Stuck { category: flow.category.to_string(), pending });
            }

            done.extend(ready.iter().map(|step| step.id.as_str()));
            batches.push(ready);
        }

        Ok(batches)
    }
}

#[cfg(test)]
mod tests {
    use super::{FlowEngine, FlowPlanError};
    use crate::domain::agent::AgentKind;
    use crate::flows::category::{
        CategoryFlow, ExecutionMode, FlowCatalog, FlowStep, QuestionCategory,
    };

    fn step(id: &str, dependencies: &[&str]) -> FlowStep {
        FlowStep {
            id: id.to_owned(),
            agent: AgentKind::DataAnalyst,
            description: id.to_owned(),
            dependencies: dependencies.iter().map(|dep| (*dep).to_owned()).collect(),
        }
    }

    fn flow(steps: Vec<FlowStep>) -> CategoryFlow {
        CategoryFlow { category: QuestionCategory::ComplexQuery, mode: ExecutionMode::Parallel, steps }
    }

    #[test]
    fn independent_steps_share_a_batch() {
        let flow = flow(vec![step("a", &[]), step("b", &[]), step("c", &["a", "b"])]);
        let batches = FlowEngine.plan(&flow).expect("plan");

        let ids: Vec<Vec<&str>> =
            batches.iter().map(|batch| batch.iter().map(|s| s.id.as_str()).collect()).collect();
        assert_eq!(ids, vec![vec!["a", "b"], vec!["c"]]);
    }

    #[test]
    fn unsatisfiable_dependencies_raise_instead_of_looping() {
        let flow = flow(vec![step("a", &[]), step("b", &["c"]), step("c", &["b"])]);
        let error = FlowEngine.plan(&flow).expect_err("stuck");
        assert_eq!(
            error,
            FlowPlanError::Stuck {
                category: "complex_query".to_owned(),
                pending: vec!["b".to_owned(), "c".to_owned()],
            }
        );

        let missing = flow_with_missing_dependency();
        assert!(matches!(FlowEngine.plan(&missing), Err(FlowPlanError::Stuck { .. })));
    }

    fn flow_with_missing_dependency() -> CategoryFlow {
        flow(vec![step("a", &["ghost"])])
    }

    #[test]
    fn duplicate_step_ids_are_rejected() {
        let flow = flow(vec![step("a", &[]), step("a", &[])]);
        assert!(matches!(FlowEngine.plan(&flow), Err(FlowPlanError::DuplicateStep { .. })));
    }

    #[test]
    fn every_standard_flow_plans_cleanly() {
        let catalog = FlowCatalog::standard();
        for category in catalog.categories() {
            let flow = catalog.get(category).expect("flow");
            let batches = FlowEngine.plan(flow).expect("plan");
            assert_eq!(batches.iter().map(Vec::len).sum::<usize>(), flow.steps.len());
        }
    }
}
