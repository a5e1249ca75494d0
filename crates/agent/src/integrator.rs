use std::collections::HashSet;

use serde_json::Value;

use tabula_core::domain::agent::AgentResponse;

use crate::workflow::WorkflowExecution;

pub const NO_RESULTS: &str = "No workflow results were produced.";

/// Folds a workflow run into one response. The last node to execute supplies
/// the text; data, charts and actions are gathered from every node in
/// execution order, actions de-duplicated by label.
pub fn integrate(execution: &WorkflowExecution) -> AgentResponse {
    let Some(last) = execution.last_result() else {
        return AgentResponse::text(NO_RESULTS);
    };

    let mut data = Vec::new();
    let mut charts = Vec::new();
    let mut actions = Vec::new();
    let mut labels = HashSet::new();

    for result in execution.ordered() {
        match &result.result.data {
            Some(Value::Array(items)) => data.extend(items.iter().cloned()),
            Some(Value::Null) | None => {}
            Some(other) => data.push(other.clone()),
        }
        charts.extend(result.result.charts.iter().cloned());
        for action in &result.result.actions {
            if labels.insert(action.label.clone()) {
                actions.push(action.clone());
            }
        }
    }

    AgentResponse {
        response: last.result.response.clone(),
        data: (!data.is_empty()).then_some(Value::Array(data)),
        charts,
        actions,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{integrate, NO_RESULTS};
    use crate::workflow::{NodeOutcome, WorkflowExecution, WorkflowResult};
    use tabula_core::domain::agent::{AgentAction, AgentKind, AgentResponse};

    fn result(kind: AgentKind, response: AgentResponse) -> WorkflowResult {
        WorkflowResult {
            node_id: kind.as_str().to_owned(),
            kind,
            result: response,
            execution_time_ms: 1,
            date_range: None,
            outcome: NodeOutcome::Completed,
            degraded_inputs: Vec::new(),
            failure: None,
        }
    }

    #[test]
    fn empty_execution_says_so() {
        assert_eq!(integrate(&WorkflowExecution::default()).response, NO_RESULTS);
    }

    #[test]
    fn last_node_speaks_and_everything_else_is_merged() {
        let mut execution = WorkflowExecution::default();
        let nodes = [
            result(
                AgentKind::DataAnalyst,
                AgentResponse {
                    response: "rows".to_owned(),
                    data: Some(json!([{ "a": 1 }, { "a": 2 }])),
                    charts: vec![json!({ "type": "bar" })],
                    actions: vec![AgentAction::navigate("Open analytics", "/analytics")],
                },
            ),
            result(
                AgentKind::BusinessBrain,
                AgentResponse {
                    response: "synthesis".to_owned(),
                    data: Some(json!({ "insights": [] })),
                    charts: Vec::new(),
                    actions: vec![
                        AgentAction::navigate("Open analytics", "/analytics"),
                        AgentAction::query("Drill down", "by platform"),
                    ],
                },
            ),
        ];
        for node in nodes {
            execution.execution_order.push(node.node_id.clone());
            execution.results.insert(node.node_id.clone(), node);
        }

        let merged = integrate(&execution);
        assert_eq!(merged.response, "synthesis");
        assert_eq!(merged.row_count(), 3);
        assert_eq!(merged.charts.len(), 1);
        assert_eq!(
            merged.actions.iter().map(|action| action.label.as_str()).collect::<Vec<_>>(),
            vec!["Open analytics", "Drill down"]
        );
    }
}
