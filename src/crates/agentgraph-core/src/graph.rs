//! Compiled, validated workflow graphs
//!
//! A [`CompiledGraph`] is produced by
//! [`GraphBuilder::compile`](crate::builder::GraphBuilder::compile) and is
//! immutable afterwards. It is cheap to clone (shared `Arc`), so the same graph
//! can serve many concurrent runs and can be embedded as a subgraph.
//!
//! # Structure
//!
//! ```text
//!          ┌────────┐  guard?  ┌────────┐          ┌────────┐
//!  start ─►│ node a │─────────►│ node b │─────────►│  END   │
//!          └────────┘          └────────┘          └────────┘
//!               │ goto (declared targets only)
//!               └──────────────► node c (terminal)
//! ```
//!
//! Routing after a node completes:
//!
//! 1. an explicit [`Goto`](crate::nodes::Goto) wins, restricted to the node's
//!    declared targets;
//! 2. otherwise every outgoing edge whose guard admits the current state is
//!    followed, in declaration order;
//! 3. a terminal node may end its path; any other node with no admissible edge
//!    is a structural error.
//!
//! # Compile-time checks
//!
//! | Check | Error |
//! |-------|-------|
//! | start node set and present | `Structural` |
//! | edge endpoints exist | `Structural` |
//! | goto targets and catch handlers exist | `Structural` |
//! | every non-terminal node has an edge or goto targets | `Structural` |
//! | a terminal is reachable from the start node | `Structural` |
//! | `max_concurrency` is at least 1 | `Usage` |

use crate::config::GraphConfig;
use crate::error::{GraphError, Result};
use crate::nodes::{Node, NodeId};
use crate::state::WorkflowState;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Pseudo-node that ends a path.
pub const END: &str = "__end__";

/// Edge predicate evaluated against the state after the source node ran.
pub type Guard<S> = Arc<dyn Fn(&S) -> bool + Send + Sync>;

pub struct Edge<S: WorkflowState> {
    pub(crate) from: NodeId,
    pub(crate) to: NodeId,
    pub(crate) guard: Option<Guard<S>>,
}

impl<S: WorkflowState> Edge<S> {
    pub fn new(from: impl Into<NodeId>, to: impl Into<NodeId>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            guard: None,
        }
    }

    pub fn guarded(from: impl Into<NodeId>, to: impl Into<NodeId>, guard: Guard<S>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            guard: Some(guard),
        }
    }

    pub fn from(&self) -> &str {
        &self.from
    }

    pub fn to(&self) -> &str {
        &self.to
    }

    pub fn is_conditional(&self) -> bool {
        self.guard.is_some()
    }

    pub fn admits(&self, state: &S) -> bool {
        self.guard.as_ref().map_or(true, |guard| guard(state))
    }
}

impl<S: WorkflowState> Clone for Edge<S> {
    fn clone(&self) -> Self {
        Self {
            from: self.from.clone(),
            to: self.to.clone(),
            guard: self.guard.clone(),
        }
    }
}

impl<S: WorkflowState> fmt::Debug for Edge<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Edge")
            .field("from", &self.from)
            .field("to", &self.to)
            .field("conditional", &self.guard.is_some())
            .finish()
    }
}

/// Raw graph parts collected by the builder.
pub(crate) struct GraphParts<S: WorkflowState> {
    pub nodes: HashMap<NodeId, Node<S>>,
    pub order: Vec<NodeId>,
    pub edges: Vec<Edge<S>>,
    pub start: Option<NodeId>,
    pub terminals: HashSet<NodeId>,
}

struct GraphInner<S: WorkflowState> {
    nodes: HashMap<NodeId, Node<S>>,
    order: Vec<NodeId>,
    edges: Vec<Edge<S>>,
    start: NodeId,
    terminals: HashSet<NodeId>,
    config: GraphConfig<S>,
}

/// An immutable, validated workflow graph bound to its run configuration.
pub struct CompiledGraph<S: WorkflowState> {
    inner: Arc<GraphInner<S>>,
}

impl<S: WorkflowState> Clone for CompiledGraph<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: WorkflowState> fmt::Debug for CompiledGraph<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledGraph")
            .field("start", &self.inner.start)
            .field("nodes", &self.inner.order)
            .field("edges", &self.inner.edges)
            .field("terminals", &self.inner.terminals)
            .finish()
    }
}

impl<S: WorkflowState> CompiledGraph<S> {
    pub(crate) fn new(parts: GraphParts<S>, config: GraphConfig<S>) -> Result<Self> {
        let start = validate(&parts, &config)?;
        debug!(
            nodes = parts.order.len(),
            edges = parts.edges.len(),
            start = %start,
            "graph compiled"
        );
        Ok(Self {
            inner: Arc::new(GraphInner {
                nodes: parts.nodes,
                order: parts.order,
                edges: parts.edges,
                start,
                terminals: parts.terminals,
                config,
            }),
        })
    }

    pub fn start(&self) -> &str {
        &self.inner.start
    }

    pub fn config(&self) -> &GraphConfig<S> {
        &self.inner.config
    }

    pub fn node(&self, id: &str) -> Option<&Node<S>> {
        self.inner.nodes.get(id)
    }

    /// Node ids in insertion order.
    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.inner.order.iter().map(String::as_str)
    }

    pub fn edges(&self) -> &[Edge<S>] {
        &self.inner.edges
    }

    pub fn edges_from<'a>(&'a self, from: &'a str) -> impl Iterator<Item = &'a Edge<S>> + 'a {
        self.inner.edges.iter().filter(move |edge| edge.from == from)
    }

    pub fn is_terminal(&self, id: &str) -> bool {
        self.inner.terminals.contains(id)
    }

    /// Targets of every edge from `from` admitted by `state`, in declaration
    /// order. May contain [`END`].
    pub fn successors(&self, from: &str, state: &S) -> Result<Vec<NodeId>> {
        let mut has_edges = false;
        let mut targets = Vec::new();
        for edge in self.edges_from(from) {
            has_edges = true;
            if edge.admits(state) {
                targets.push(edge.to.clone());
            }
        }

        if targets.is_empty() && !self.is_terminal(from) {
            return Err(GraphError::structural(if has_edges {
                format!("no admissible outgoing edge from '{}'", from)
            } else {
                format!("node '{}' has no outgoing edge and is not terminal", from)
            }));
        }
        Ok(targets)
    }
}

fn validate<S: WorkflowState>(parts: &GraphParts<S>, config: &GraphConfig<S>) -> Result<NodeId> {
    if config.max_concurrency == Some(0) {
        return Err(GraphError::usage("max_concurrency must be at least 1"));
    }

    let start = parts
        .start
        .clone()
        .ok_or_else(|| GraphError::structural("graph has no start node"))?;
    if !parts.nodes.contains_key(&start) {
        return Err(GraphError::structural(format!(
            "start node '{}' does not exist",
            start
        )));
    }

    let exists = |id: &str| id == END || parts.nodes.contains_key(id);

    for edge in &parts.edges {
        if !parts.nodes.contains_key(&edge.from) {
            return Err(GraphError::structural(format!(
                "edge source '{}' does not exist",
                edge.from
            )));
        }
        if !exists(edge.to.as_str()) {
            return Err(GraphError::structural(format!(
                "edge '{}' -> '{}' targets a missing node",
                edge.from, edge.to
            )));
        }
    }

    for id in &parts.terminals {
        if !parts.nodes.contains_key(id) {
            return Err(GraphError::structural(format!(
                "terminal node '{}' does not exist",
                id
            )));
        }
    }

    for id in &parts.order {
        let node = &parts.nodes[id];
        if let Some(target) = node.goto_targets.iter().find(|t| !exists(t.as_str())) {
            return Err(GraphError::structural(format!(
                "node '{}' declares missing goto target '{}'",
                id, target
            )));
        }
        if let Some(handler) = node.catch.as_deref() {
            if !parts.nodes.contains_key(handler) {
                return Err(GraphError::structural(format!(
                    "node '{}' routes errors to missing handler '{}'",
                    id, handler
                )));
            }
        }

        let routes = node.goto_targets.len()
            + parts.edges.iter().filter(|edge| &edge.from == id).count();
        if routes == 0 && !parts.terminals.contains(id) {
            return Err(GraphError::structural(format!(
                "node '{}' has no outgoing edge and is not terminal",
                id
            )));
        }
    }

    let reachable = reachable_from(parts, &start);
    let terminal_reachable = reachable.contains(END)
        || reachable.iter().any(|id| parts.terminals.contains(*id));
    if !terminal_reachable {
        return Err(GraphError::structural(format!(
            "no terminal node is reachable from '{}'",
            start
        )));
    }

    for id in &parts.order {
        if !reachable.contains(id.as_str()) {
            debug!(node = %id, "node is unreachable from start");
        }
    }

    Ok(start)
}

fn reachable_from<'a, S: WorkflowState>(parts: &'a GraphParts<S>, start: &'a str) -> HashSet<&'a str> {
    let mut seen = HashSet::from([start]);
    let mut frontier = VecDeque::from([start]);

    while let Some(id) = frontier.pop_front() {
        let Some(node) = parts.nodes.get(id) else {
            continue;
        };
        let targets = parts
            .edges
            .iter()
            .filter(|edge| edge.from == id)
            .map(|edge| edge.to.as_str())
            .chain(node.goto_targets.iter().map(String::as_str))
            .chain(node.catch.as_deref());
        for target in targets {
            if seen.insert(target) {
                frontier.push_back(target);
            }
        }
    }
    seen
}
