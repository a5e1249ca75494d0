//! Node-based workflow execution.
//!
//! Nodes run wave by wave in dependency order; nodes of one wave run
//! concurrently. A failing or slow node never aborts the run: it is recorded
//! as a degraded result and its dependents still execute with whatever
//! upstream context is available.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use tokio::time::{timeout, Instant};
use tracing::{info, warn};

use tabula_core::clock::SystemClock;
use tabula_core::config::WorkflowConfig;
use tabula_core::domain::agent::{AgentKind, AgentResponse, Port};
use tabula_core::domain::date_range::DateRange;
use tabula_core::errors::ApplicationError;
use tabula_core::graph::{context_field, AgentNode, BrokenEdge, NodeGraph};

use crate::capability::{AgentContext, AgentRegistry};
use crate::metrics::{AgentRun, MetricsCollector};

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NodeOutcome {
    Completed,
    Failed { error: String },
    TimedOut { budget_ms: u64 },
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowResult {
    pub node_id: String,
    pub kind: AgentKind,
    pub result: AgentResponse,
    pub execution_time_ms: u64,
    pub date_range: Option<DateRange>,
    pub outcome: NodeOutcome,
    /// Dependencies that did not complete normally.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub degraded_inputs: Vec<String>,
    #[serde(skip)]
    pub failure: Option<ApplicationError>,
}

impl WorkflowResult {
    pub fn is_degraded(&self) -> bool {
        self.outcome != NodeOutcome::Completed || !self.degraded_inputs.is_empty()
    }

    pub fn completed(&self) -> bool {
        self.outcome == NodeOutcome::Completed
    }
}

#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowExecution {
    pub results: BTreeMap<String, WorkflowResult>,
    pub execution_order: Vec<String>,
    pub total_time_ms: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub broken_edges: Vec<BrokenEdge>,
}

impl WorkflowExecution {
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Results in execution order.
    pub fn ordered(&self) -> impl Iterator<Item = &WorkflowResult> {
        self.execution_order.iter().filter_map(|id| self.results.get(id))
    }

    pub fn last_result(&self) -> Option<&WorkflowResult> {
        self.execution_order.last().and_then(|id| self.results.get(id))
    }

    pub fn all_failed(&self) -> bool {
        !self.results.is_empty() && self.results.values().all(|result| !result.completed())
    }

    /// First typed failure in execution order.
    pub fn first_failure(&self) -> Option<&ApplicationError> {
        self.ordered().find_map(|result| result.failure.as_ref())
    }
}

pub struct WorkflowEngine {
    graph: NodeGraph,
    registry: AgentRegistry,
    node_timeout: Duration,
    include_transitive: bool,
    metrics: Arc<MetricsCollector>,
}

impl WorkflowEngine {
    pub fn new(graph: NodeGraph, registry: AgentRegistry, config: &WorkflowConfig) -> Self {
        Self {
            graph,
            registry,
            node_timeout: Duration::from_secs(config.node_timeout_secs.max(1)),
            include_transitive: config.include_transitive_dependencies,
            metrics: Arc::new(MetricsCollector::new(Arc::new(SystemClock))),
        }
    }

    /// Shares a collector with the rest of the runtime.
    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn graph(&self) -> &NodeGraph {
        &self.graph
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    /// Runs every registered node. `base` carries the shared "today" and the
    /// request-level context every node starts from.
    pub async fn execute(&self, query: &str, base: &AgentContext) -> WorkflowExecution {
        self.run(&self.graph, query, base).await
    }

    /// Runs an ephemeral sub-graph over the requested agent kinds.
    pub async fn execute_selected(
        &self,
        kinds: &[AgentKind],
        query: &str,
        base: &AgentContext,
    ) -> Result<WorkflowExecution, ApplicationError> {
        let subgraph = self
            .graph
            .subgraph(kinds, self.include_transitive)
            .map_err(|error| ApplicationError::Configuration(error.to_string()))?;
        Ok(self.run(&subgraph, query, base).await)
    }

    async fn run(&self, graph: &NodeGraph, query: &str, base: &AgentContext) -> WorkflowExecution {
        let started = Instant::now();
        let mut execution =
            WorkflowExecution { broken_edges: graph.broken_edges().to_vec(), ..WorkflowExecution::default() };

        for wave in graph.waves() {
            let runs = wave.iter().map(|node| {
                let (context, degraded_inputs) = self.node_context(graph, node, base, &execution);
                self.run_node(node, query, context, degraded_inputs)
            });
            for result in join_all(runs).await {
                execution.execution_order.push(result.node_id.clone());
                execution.results.insert(result.node_id.clone(), result);
            }
        }

        execution.total_time_ms = elapsed_ms(started);
        info!(
            event_name = "workflow.execution.completed",
            correlation_id = %base.correlation_id,
            nodes = execution.results.len(),
            degraded = execution.results.values().filter(|result| result.is_degraded()).count(),
            total_time_ms = execution.total_time_ms,
            "workflow finished"
        );
        execution
    }

    /// Context for one node from the completed outputs of its dependencies.
    fn node_context(
        &self,
        graph: &NodeGraph,
        node: &AgentNode,
        base: &AgentContext,
        execution: &WorkflowExecution,
    ) -> (AgentContext, Vec<String>) {
        let mut context = base.clone();
        let mut degraded_inputs = Vec::new();

        for dependency_id in graph.effective_dependencies(node) {
            let Some(upstream) = execution.results.get(dependency_id) else { continue };
            context.dependency_results.insert(dependency_id.to_owned(), upstream.result.clone());
            if !upstream.completed() {
                degraded_inputs.push(dependency_id.to_owned());
                continue;
            }

            let outputs = graph.node(dependency_id).map(|dep| dep.outputs.as_slice()).unwrap_or_default();
            for port in node.inputs.iter().filter(|port| outputs.contains(port)) {
                let Some(field) = context_field(*port) else { continue };
                let value = match port {
                    Port::Data => match &upstream.result.data {
                        Some(data) => data.clone(),
                        None => continue,
                    },
                    _ => Value::String(upstream.result.response.clone()),
                };
                context.upstream.entry(field).or_insert(value);
            }
        }

        (context, degraded_inputs)
    }

    async fn run_node(
        &self,
        node: &AgentNode,
        query: &str,
        context: AgentContext,
        degraded_inputs: Vec<String>,
    ) -> WorkflowResult {
        let started = Instant::now();
        let date_range = context.date_range;

        let outcome = match self.registry.get(node.kind) {
            Ok(agent) => timeout(self.node_timeout, agent.process(query, &context)).await.ok(),
            Err(error) => Some(Err(error)),
        };

        let (result, outcome, failure) = match outcome {
            Some(Ok(response)) => (response, NodeOutcome::Completed, None),
            Some(Err(error)) => {
                let error = error.into_application();
                warn!(
                    event_name = "workflow.node.failed",
                    node = %node.id,
                    correlation_id = %context.correlation_id,
                    error = %error,
                    "node failed; recorded as degraded result"
                );
                (AgentResponse::text(error.to_string()), NodeOutcome::Failed { error: error.to_string() }, Some(error))
            }
            None => {
                let budget_ms = u64::try_from(self.node_timeout.as_millis()).unwrap_or(u64::MAX);
                warn!(
                    event_name = "workflow.node.timed_out",
                    node = %node.id,
                    correlation_id = %context.correlation_id,
                    budget_ms,
                    "node exceeded its time budget"
                );
                let message = format!("{} did not finish within {budget_ms} ms", node.id);
                (
                    AgentResponse::text(message.clone()),
                    NodeOutcome::TimedOut { budget_ms },
                    Some(ApplicationError::NodeExecution { node: node.id.clone(), message }),
                )
            }
        };

        let elapsed = started.elapsed();
        self.metrics.record(match &outcome {
            NodeOutcome::Completed => AgentRun::succeeded(node.kind, "workflow.node", elapsed, result.row_count()),
            NodeOutcome::Failed { error } => AgentRun::failed(node.kind, "workflow.node", elapsed, error.clone()),
            NodeOutcome::TimedOut { budget_ms } => {
                AgentRun::failed(node.kind, "workflow.node", elapsed, format!("timed out after {budget_ms} ms"))
            }
        });

        WorkflowResult {
            node_id: node.id.clone(),
            kind: node.kind,
            result,
            execution_time_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            date_range,
            outcome,
            degraded_inputs,
            failure,
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::NaiveDate;
    use serde_json::json;

    use super::{NodeOutcome, WorkflowEngine};
    use crate::capability::{AgentContext, AgentError, AgentRegistry, CapabilityAgent};
    use tabula_core::config::WorkflowConfig;
    use tabula_core::domain::agent::{AgentKind, AgentResponse, Port};
    use tabula_core::errors::ApplicationError;
    use tabula_core::graph::{AgentNode, NodeGraph};

    #[derive(Clone, Copy)]
    enum Behavior {
        Answer,
        Fail,
        Hang,
    }

    struct StubAgent {
        kind: AgentKind,
        behavior: Behavior,
        seen: Arc<Mutex<Vec<(AgentKind, AgentContext)>>>,
    }

    #[async_trait]
    impl CapabilityAgent for StubAgent {
        fn kind(&self) -> AgentKind {
            self.kind
        }

        async fn process(&self, _query: &str, context: &AgentContext) -> Result<AgentResponse, AgentError> {
            self.seen.lock().expect("lock").push((self.kind, context.clone()));
            match self.behavior {
                Behavior::Answer => Ok(AgentResponse {
                    response: format!("{} says hi", self.kind),
                    data: Some(json!([{ "from": self.kind.as_str() }])),
                    ..AgentResponse::default()
                }),
                Behavior::Fail => Err(ApplicationError::ServiceUnavailable("boom".to_owned()).into()),
                Behavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(600)).await;
                    Ok(AgentResponse::text("late"))
                }
            }
        }
    }

    type Seen = Arc<Mutex<Vec<(AgentKind, AgentContext)>>>;

    fn stub_registry(behaviors: &[(AgentKind, Behavior)]) -> (AgentRegistry, Seen) {
        let seen: Seen = Arc::default();
        let mut registry = AgentRegistry::default();
        for (kind, behavior) in behaviors {
            registry.register(Arc::new(StubAgent { kind: *kind, behavior: *behavior, seen: seen.clone() }));
        }
        (registry, seen)
    }

    fn config() -> WorkflowConfig {
        WorkflowConfig { node_timeout_secs: 5, include_transitive_dependencies: true }
    }

    fn context() -> AgentContext {
        AgentContext::new(NaiveDate::from_ymd_opt(2025, 11, 20).expect("date"), "test")
    }

    // A = analyst, B = marketer, C = manager, D = brain
    fn diamond() -> NodeGraph {
        use AgentKind::{BusinessBrain, BusinessManager, DataAnalyst, PerformanceMarketer};
        NodeGraph::build(vec![
            AgentNode::new(BusinessBrain, "d")
                .with_ports(&[Port::MarketingInsights, Port::Strategy], &[Port::Insights])
                .depends_on(&[PerformanceMarketer, BusinessManager]),
            AgentNode::new(PerformanceMarketer, "b")
                .with_ports(&[Port::Data], &[Port::MarketingInsights])
                .depends_on(&[DataAnalyst]),
            AgentNode::new(BusinessManager, "c").with_ports(&[Port::Data], &[Port::Strategy]).depends_on(&[DataAnalyst]),
            AgentNode::new(DataAnalyst, "a").with_ports(&[Port::Query], &[Port::Data]),
        ])
        .expect("graph")
    }

    fn position(order: &[String], kind: AgentKind) -> usize {
        order.iter().position(|id| id == kind.as_str()).expect("node executed")
    }

    #[tokio::test]
    async fn diamond_runs_in_dependency_order() {
        use AgentKind::{BusinessBrain, BusinessManager, DataAnalyst, PerformanceMarketer};
        let (registry, seen) = stub_registry(&[
            (DataAnalyst, Behavior::Answer),
            (PerformanceMarketer, Behavior::Answer),
            (BusinessManager, Behavior::Answer),
            (BusinessBrain, Behavior::Answer),
        ]);
        let engine = WorkflowEngine::new(diamond(), registry, &config());

        let execution = engine.execute("q", &context()).await;
        let order = &execution.execution_order;
        assert_eq!(order.len(), 4);
        assert!(position(order, DataAnalyst) < position(order, PerformanceMarketer));
        assert!(position(order, DataAnalyst) < position(order, BusinessManager));
        assert!(position(order, PerformanceMarketer) < position(order, BusinessBrain));
        assert!(position(order, BusinessManager) < position(order, BusinessBrain));

        let seen = seen.lock().expect("lock");
        let (_, marketer) = seen.iter().find(|(kind, _)| *kind == PerformanceMarketer).expect("marketer ran");
        assert_eq!(marketer.upstream.get("previousData"), Some(&json!([{ "from": "data-analyst" }])));
        let (_, brain) = seen.iter().find(|(kind, _)| *kind == BusinessBrain).expect("brain ran");
        assert_eq!(brain.upstream.get("previousStrategy"), Some(&json!("business-manager says hi")));
        assert_eq!(brain.dependency_results.len(), 2);
    }

    #[tokio::test]
    async fn failing_node_degrades_without_stopping_siblings_or_dependents() {
        use AgentKind::{BusinessBrain, BusinessManager, DataAnalyst, PerformanceMarketer};
        let (registry, _) = stub_registry(&[
            (DataAnalyst, Behavior::Answer),
            (PerformanceMarketer, Behavior::Fail),
            (BusinessManager, Behavior::Answer),
            (BusinessBrain, Behavior::Answer),
        ]);
        let engine = WorkflowEngine::new(diamond(), registry, &config());

        let execution = engine.execute("q", &context()).await;
        let failed = &execution.results["performance-marketer"];
        assert!(matches!(failed.outcome, NodeOutcome::Failed { .. }));
        assert!(failed.result.response.contains("boom"));

        let sibling = &execution.results["business-manager"];
        assert!(!sibling.is_degraded());

        let dependent = &execution.results["business-brain"];
        assert!(dependent.is_degraded());
        assert_eq!(dependent.degraded_inputs, vec!["performance-marketer".to_owned()]);
        assert_eq!(
            execution.first_failure(),
            Some(&ApplicationError::ServiceUnavailable("boom".to_owned()))
        );

        let summary = engine.metrics().summary(None);
        assert_eq!(summary.total_runs, 4);
        assert_eq!(summary.success_rate_pct, 75.0);
        assert_eq!(summary.by_agent["performance-marketer"].runs, 1);
        assert_eq!(summary.by_agent["performance-marketer"].success_rate_pct, 0.0);
        assert_eq!(summary.by_operation["workflow.node"].runs, 4);
        assert_eq!(summary.recent_errors.len(), 1);
        assert!(summary.recent_errors[0].error.contains("boom"));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_nodes_time_out_into_degraded_results() {
        let (registry, _) = stub_registry(&[(AgentKind::DataAnalyst, Behavior::Hang)]);
        let graph = NodeGraph::build(vec![AgentNode::new(AgentKind::DataAnalyst, "a")]).expect("graph");
        let engine = WorkflowEngine::new(graph, registry, &config());

        let execution = engine.execute("q", &context()).await;
        let result = &execution.results["data-analyst"];
        assert_eq!(result.outcome, NodeOutcome::TimedOut { budget_ms: 5_000 });
        assert!(execution.all_failed());
        assert_eq!(engine.metrics().realtime().error_count, 1);
    }

    #[tokio::test]
    async fn unregistered_agents_fail_only_their_node() {
        let (registry, _) = stub_registry(&[(AgentKind::DataAnalyst, Behavior::Answer)]);
        let engine = WorkflowEngine::new(NodeGraph::standard(), registry, &config());

        let execution = engine.execute("q", &context()).await;
        assert_eq!(execution.results.len(), 4);
        assert!(execution.results["data-analyst"].completed());
        assert!(matches!(execution.results["business-brain"].failure, Some(ApplicationError::Configuration(_))));
    }

    #[tokio::test]
    async fn selected_subgraph_pulls_in_ancestors_when_transitive() {
        use AgentKind::{BusinessBrain, BusinessManager, DataAnalyst, PerformanceMarketer};
        let behaviors = [
            (DataAnalyst, Behavior::Answer),
            (PerformanceMarketer, Behavior::Answer),
            (BusinessManager, Behavior::Answer),
            (BusinessBrain, Behavior::Answer),
        ];

        let (registry, _) = stub_registry(&behaviors);
        let engine = WorkflowEngine::new(NodeGraph::standard(), registry, &config());
        let execution = engine.execute_selected(&[BusinessManager], "q", &context()).await.expect("subgraph");
        assert_eq!(execution.execution_order, vec!["data-analyst", "performance-marketer", "business-manager"]);

        let (registry, _) = stub_registry(&behaviors);
        let direct = WorkflowConfig { include_transitive_dependencies: false, ..config() };
        let engine = WorkflowEngine::new(NodeGraph::standard(), registry, &direct);
        let execution = engine.execute_selected(&[BusinessManager], "q", &context()).await.expect("subgraph");
        assert_eq!(execution.execution_order, vec!["business-manager"]);
        assert!(execution.last_result().is_some_and(|result| result.completed()));
    }
}
