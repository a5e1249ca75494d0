//! Static agent node graph.
//!
//! Nodes declare the ids they depend on. The graph is validated once when it
//! is built: duplicate ids, dangling dependencies and a missing root are
//! configuration errors. Cycles are tolerated by breaking the edge that
//! closes them, so ordering always terminates.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use crate::domain::agent::{AgentKind, Port};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentNode {
    pub id: String,
    pub kind: AgentKind,
    pub description: String,
    pub inputs: Vec<Port>,
    pub outputs: Vec<Port>,
    pub dependencies: Vec<String>,
}

impl AgentNode {
    pub fn new(kind: AgentKind, description: &str) -> Self {
        Self {
            id: kind.as_str().to_owned(),
            kind,
            description: description.to_owned(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            dependencies: Vec::new(),
        }
    }

    pub fn with_ports(mut self, inputs: &[Port], outputs: &[Port]) -> Self {
        self.inputs = inputs.to_vec();
        self.outputs = outputs.to_vec();
        self
    }

    pub fn depends_on(mut self, dependencies: &[AgentKind]) -> Self {
        self.dependencies = dependencies.iter().map(|kind| kind.as_str().to_owned()).collect();
        self
    }
}

/// Named context field a dependency output is delivered under.
pub fn context_field(port: Port) -> Option<&'static str> {
    match port {
        Port::Data => Some("previousData"),
        Port::Analysis => Some("previousAnalysis"),
        Port::MarketingInsights => Some("previousMarketingInsights"),
        Port::Strategy => Some("previousStrategy"),
        _ => None,
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("node graph is empty")]
    Empty,
    #[error("node `{0}` is declared more than once")]
    DuplicateNode(String),
    #[error("node `{node}` depends on unknown node `{dependency}`")]
    UnknownDependency { node: String, dependency: String },
    #[error("node graph has no root node (every node declares a dependency)")]
    NoRoot,
}

/// Dependency edge ignored for ordering because it closes a cycle.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BrokenEdge {
    pub node: String,
    pub dependency: String,
}

#[derive(Clone, Debug)]
pub struct NodeGraph {
    nodes: Vec<AgentNode>,
    index: HashMap<String, usize>,
    broken: Vec<BrokenEdge>,
    order: Vec<usize>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

impl NodeGraph {
    pub fn build(nodes: Vec<AgentNode>) -> Result<Self, GraphError> {
        if nodes.is_empty() {
            return Err(GraphError::Empty);
        }

        let mut index = HashMap::with_capacity(nodes.len());
        for (position, node) in nodes.iter().enumerate() {
            if index.insert(node.id.clone(), position).is_some() {
                return Err(GraphError::DuplicateNode(node.id.clone()));
            }
        }
        for node in &nodes {
            if let Some(dependency) = node.dependencies.iter().find(|dep| !index.contains_key(*dep)) {
                return Err(GraphError::UnknownDependency {
                    node: node.id.clone(),
                    dependency: dependency.clone(),
                });
            }
        }
        if nodes.iter().all(|node| !node.dependencies.is_empty()) {
            return Err(GraphError::NoRoot);
        }

        let mut graph = Self { nodes, index, broken: Vec::new(), order: Vec::new() };
        graph.sort();
        Ok(graph)
    }

    pub fn standard() -> Self {
        use AgentKind::{BusinessBrain, BusinessManager, DataAnalyst, PerformanceMarketer};

        let nodes = vec![
            AgentNode::new(DataAnalyst, "fetch and analyze the requested data")
                .with_ports(&[Port::Query, Port::DateRange], &[Port::Data, Port::Analysis]),
            AgentNode::new(PerformanceMarketer, "marketing performance analysis")
                .with_ports(&[Port::Data, Port::Analysis], &[Port::MarketingInsights, Port::Recommendations])
                .depends_on(&[DataAnalyst]),
            AgentNode::new(BusinessManager, "business strategy planning")
                .with_ports(
                    &[Port::Data, Port::Analysis, Port::MarketingInsights],
                    &[Port::Strategy, Port::ActionItems],
                )
                .depends_on(&[DataAnalyst, PerformanceMarketer]),
            AgentNode::new(BusinessBrain, "comprehensive insight synthesis")
                .with_ports(
                    &[Port::Data, Port::Analysis, Port::MarketingInsights, Port::Strategy],
                    &[Port::Insights, Port::Recommendations],
                )
                .depends_on(&[DataAnalyst, PerformanceMarketer, BusinessManager]),
        ];

        Self::from_validated(nodes)
    }

    // Built-in registry is acyclic with one root; only the sort is needed.
    fn from_validated(nodes: Vec<AgentNode>) -> Self {
        let index = nodes.iter().enumerate().map(|(i, node)| (node.id.clone(), i)).collect();
        let mut graph = Self { nodes, index, broken: Vec::new(), order: Vec::new() };
        graph.sort();
        graph
    }

    fn sort(&mut self) {
        let mut marks = vec![Mark::Unvisited; self.nodes.len()];
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut broken = Vec::new();

        for start in 0..self.nodes.len() {
            self.visit(start, &mut marks, &mut order, &mut broken);
        }

        for edge in &broken {
            warn!(
                event_name = "workflow.graph.cycle_edge_skipped",
                node = %edge.node,
                dependency = %edge.dependency,
                "dependency cycle detected; edge ignored for ordering"
            );
        }

        self.order = order;
        self.broken = broken;
    }

    fn visit(
        &self,
        position: usize,
        marks: &mut [Mark],
        order: &mut Vec<usize>,
        broken: &mut Vec<BrokenEdge>,
    ) {
        if marks[position] != Mark::Unvisited {
            return;
        }
        marks[position] = Mark::InProgress;

        let node = &self.nodes[position];
        for dependency in &node.dependencies {
            let Some(&dep_position) = self.index.get(dependency) else {
                continue;
            };
            match marks[dep_position] {
                Mark::InProgress => broken.push(BrokenEdge {
                    node: node.id.clone(),
                    dependency: dependency.clone(),
                }),
                Mark::Unvisited => self.visit(dep_position, marks, order, broken),
                Mark::Done => {}
            }
        }

        marks[position] = Mark::Done;
        order.push(position);
    }

    pub fn node(&self, id: &str) -> Option<&AgentNode> {
        self.index.get(id).map(|position| &self.nodes[*position])
    }

    pub fn nodes(&self) -> &[AgentNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn broken_edges(&self) -> &[BrokenEdge] {
        &self.broken
    }

    /// Dependencies that take part in ordering (cycle-closing edges removed).
    pub fn effective_dependencies<'a>(&'a self, node: &'a AgentNode) -> impl Iterator<Item = &'a str> + 'a {
        node.dependencies.iter().map(String::as_str).filter(move |dependency| {
            !self.broken.iter().any(|edge| edge.node == node.id && edge.dependency == *dependency)
        })
    }

    /// Linear extension of the dependency order.
    pub fn topological_order(&self) -> Vec<&AgentNode> {
        self.order.iter().map(|position| &self.nodes[*position]).collect()
    }

    /// Groups nodes into levels; nodes in the same level have no ordering
    /// constraint between them and may run concurrently.
    pub fn waves(&self) -> Vec<Vec<&AgentNode>> {
        let mut level: HashMap<&str, usize> = HashMap::with_capacity(self.nodes.len());
        let mut waves: Vec<Vec<&AgentNode>> = Vec::new();

        for node in self.topological_order() {
            let depth = self
                .effective_dependencies(node)
                .filter_map(|dependency| level.get(dependency))
                .map(|depth| depth + 1)
                .max()
                .unwrap_or(0);
            level.insert(node.id.as_str(), depth);
            if waves.len() <= depth {
                waves.resize_with(depth + 1, Vec::new);
            }
            waves[depth].push(node);
        }

        waves
    }

    /// Ephemeral graph over the requested agent kinds. With
    /// `include_transitive`, every ancestor of a selected node is pulled in;
    /// otherwise dependencies outside the selection are dropped.
    pub fn subgraph(&self, kinds: &[AgentKind], include_transitive: bool) -> Result<NodeGraph, GraphError> {
        let mut selected: HashSet<&str> = self
            .nodes
            .iter()
            .filter(|node| kinds.contains(&node.kind))
            .map(|node| node.id.as_str())
            .collect();

        if include_transitive {
            let mut frontier: Vec<&str> = selected.iter().copied().collect();
            while let Some(id) = frontier.pop() {
                let Some(node) = self.node(id) else { continue };
                for dependency in &node.dependencies {
                    if selected.insert(dependency.as_str()) {
                        frontier.push(dependency.as_str());
                    }
                }
            }
        }

        let nodes = self
            .nodes
            .iter()
            .filter(|node| selected.contains(node.id.as_str()))
            .map(|node| {
                let mut node = node.clone();
                node.dependencies.retain(|dependency| selected.contains(dependency.as_str()));
                node
            })
            .collect();

        NodeGraph::build(nodes)
    }
}
