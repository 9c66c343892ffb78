//! Fluent graph builder
//!
//! The builder keeps a **cursor**: the set of node exits the next node will be
//! attached to. Each exit may carry a guard, which becomes the guard of the
//! edge created by the next call.
//!
//! ```text
//! start(a).then(b)            a ─► b
//!
//! if_(p).then(x)              b ─► if_1 ─[p]─► x ─┐
//!       .else_().then(y)                └[!p]─► y ─┴─► next
//!       .endif()
//!
//! loop_(body, until, max)     ─► body ─► body__loop ─[continue]─► body
//!                                              └─[exit]─► next
//! ```
//!
//! # Usage
//!
//! ```rust
//! use agentgraph_core::prelude::*;
//!
//! workflow_state! {
//!     pub struct Job => JobUpdate {
//!         log: Vec<String> => append,
//!         ok: bool => replace,
//!     }
//! }
//!
//! fn step(id: &'static str) -> Node<Job> {
//!     Node::from_fn(id, move |_ctx| async move {
//!         Ok(NodeResult::update(JobUpdate::default().log(vec![id.to_string()])))
//!     })
//! }
//!
//! let graph = GraphBuilder::new()
//!     .start(step("fetch"))
//!     .if_(|s: &Job| s.ok)
//!         .then(step("publish"))
//!     .else_()
//!         .then(step("report"))
//!     .endif()
//!     .end()
//!     .compile(GraphConfig::default())
//!     .unwrap();
//! assert_eq!(graph.start(), "fetch");
//! ```
//!
//! Misuse (`else_` without `if_`, a missing `endif`, duplicate node ids) is
//! recorded and reported by [`compile`](GraphBuilder::compile) as
//! [`GraphError::Usage`]. `compile` consumes the builder, so a graph cannot be
//! compiled twice or changed afterwards.

use crate::config::GraphConfig;
use crate::error::{GraphError, NodeError, Result};
use crate::graph::{CompiledGraph, Edge, GraphParts, Guard, END};
use crate::nodes::{
    MergeStrategy, Node, NodeContext, NodeHandler, NodeId, NodeKind, NodeResult, ParallelNode,
    WaitNode,
};
use crate::state::{StateUpdate, WorkflowState};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Loop termination: stop when `until` holds or after `max_iterations` bodies.
pub struct LoopConfig<S: WorkflowState> {
    until: Guard<S>,
    max_iterations: u32,
}

impl<S: WorkflowState> LoopConfig<S> {
    pub fn new(max_iterations: u32, until: impl Fn(&S) -> bool + Send + Sync + 'static) -> Self {
        Self {
            until: Arc::new(until),
            max_iterations: max_iterations.max(1),
        }
    }

    /// Loop exactly `max_iterations` times.
    pub fn times(max_iterations: u32) -> Self {
        Self::new(max_iterations, |_| false)
    }
}

/// Iterations completed by the loop whose check node is `check`.
pub fn loop_iterations<S: WorkflowState>(state: &S, check: &str) -> u32 {
    state
        .outputs()
        .get(check)
        .and_then(|output| output.get("iterations"))
        .and_then(Value::as_u64)
        .unwrap_or(0) as u32
}

struct CursorEntry<S: WorkflowState> {
    from: NodeId,
    guard: Option<Guard<S>>,
}

impl<S: WorkflowState> CursorEntry<S> {
    fn plain(from: impl Into<NodeId>) -> Self {
        Self {
            from: from.into(),
            guard: None,
        }
    }

    fn guarded(from: impl Into<NodeId>, guard: Guard<S>) -> Self {
        Self {
            from: from.into(),
            guard: Some(guard),
        }
    }
}

struct ConditionalFrame<S: WorkflowState> {
    decision: NodeId,
    predicate: Guard<S>,
    then_exits: Option<Vec<CursorEntry<S>>>,
}

fn negate<S: WorkflowState>(guard: &Guard<S>) -> Guard<S> {
    let guard = Arc::clone(guard);
    Arc::new(move |state: &S| !guard(state))
}

/// Decision node generated by `if_` and `loop_`; routing happens on its edges.
struct Passthrough;

#[async_trait]
impl<S: WorkflowState> NodeHandler<S> for Passthrough {
    async fn execute(&self, _ctx: NodeContext<S>) -> std::result::Result<NodeResult<S>, NodeError> {
        Ok(NodeResult::empty())
    }
}

/// Wraps a loop body to count its iterations in `outputs[check]`.
struct LoopBody<S: WorkflowState> {
    inner: Arc<dyn NodeHandler<S>>,
    check: NodeId,
}

#[async_trait]
impl<S: WorkflowState> NodeHandler<S> for LoopBody<S> {
    async fn execute(&self, ctx: NodeContext<S>) -> std::result::Result<NodeResult<S>, NodeError> {
        let iteration = if ctx.entered_from.as_deref() == Some(self.check.as_str()) {
            loop_iterations(ctx.state(), &self.check) + 1
        } else {
            1
        };
        let mut result = self.inner.execute(ctx).await?;
        let update = result
            .update
            .take()
            .unwrap_or_default()
            .with_output(&self.check, json!({ "iterations": iteration }));
        result.update = Some(update);
        Ok(result)
    }
}

pub struct GraphBuilder<S: WorkflowState> {
    nodes: HashMap<NodeId, Node<S>>,
    order: Vec<NodeId>,
    edges: Vec<Edge<S>>,
    start: Option<NodeId>,
    terminals: HashSet<NodeId>,
    cursor: Vec<CursorEntry<S>>,
    last_added: Option<NodeId>,
    frames: Vec<ConditionalFrame<S>>,
    counter: usize,
    errors: Vec<GraphError>,
}

impl<S: WorkflowState> Default for GraphBuilder<S> {
    fn default() -> Self {
        Self {
            nodes: HashMap::new(),
            order: Vec::new(),
            edges: Vec::new(),
            start: None,
            terminals: HashSet::new(),
            cursor: Vec::new(),
            last_added: None,
            frames: Vec::new(),
            counter: 0,
            errors: Vec::new(),
        }
    }
}

impl<S: WorkflowState> GraphBuilder<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the start node. Exactly one start node is allowed.
    pub fn start(mut self, node: Node<S>) -> Self {
        if let Some(existing) = &self.start {
            let err = GraphError::usage(format!(
                "start node already set to '{}', cannot start at '{}'",
                existing, node.id
            ));
            self.errors.push(err);
            return self;
        }
        let id = node.id.clone();
        self.insert(node);
        self.start = Some(id.clone());
        self.cursor = vec![CursorEntry::plain(id.clone())];
        self.last_added = Some(id);
        self
    }

    /// Attach `node` to every exit in the cursor and move the cursor to it.
    pub fn then(mut self, node: Node<S>) -> Self {
        if self.start.is_none() {
            self.errors
                .push(GraphError::usage(format!("then('{}') called before start()", node.id)));
            return self;
        }
        let id = node.id.clone();
        self.insert(node);
        self.connect(&id);
        self.cursor = vec![CursorEntry::plain(id.clone())];
        self.last_added = Some(id);
        self
    }

    /// Add a node without connecting it; reach it with edges or gotos.
    pub fn add_node(mut self, node: Node<S>) -> Self {
        self.insert(node);
        self
    }

    pub fn add_edge(mut self, from: impl Into<NodeId>, to: impl Into<NodeId>) -> Self {
        self.edges.push(Edge::new(from, to));
        self
    }

    pub fn add_conditional_edge(
        mut self,
        from: impl Into<NodeId>,
        to: impl Into<NodeId>,
        guard: impl Fn(&S) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.edges.push(Edge::guarded(from, to, Arc::new(guard)));
        self
    }

    /// Open a conditional. Nodes added until `else_`/`endif` run when `predicate` holds.
    pub fn if_(mut self, predicate: impl Fn(&S) -> bool + Send + Sync + 'static) -> Self {
        let id = self.next_id("if");
        let mut builder = self.then(Node::new(id.clone(), NodeKind::Decision, Passthrough));
        let predicate: Guard<S> = Arc::new(predicate);
        builder.cursor = vec![CursorEntry::guarded(id.clone(), Arc::clone(&predicate))];
        builder.frames.push(ConditionalFrame {
            decision: id,
            predicate,
            then_exits: None,
        });
        builder
    }

    pub fn else_(mut self) -> Self {
        let Some(frame) = self.frames.last_mut() else {
            self.errors.push(GraphError::usage("else_() without a matching if_()"));
            return self;
        };
        if frame.then_exits.is_some() {
            self.errors.push(GraphError::usage(format!(
                "else_() used twice for '{}'",
                frame.decision
            )));
            return self;
        }
        frame.then_exits = Some(std::mem::take(&mut self.cursor));
        self.cursor = vec![CursorEntry::guarded(
            frame.decision.clone(),
            negate(&frame.predicate),
        )];
        self
    }

    /// Close the conditional; both branches rejoin at the next node. A missing
    /// `else_` branch passes straight through.
    pub fn endif(mut self) -> Self {
        let Some(frame) = self.frames.pop() else {
            self.errors.push(GraphError::usage("endif() without a matching if_()"));
            return self;
        };
        let branch_exits = std::mem::take(&mut self.cursor);
        self.cursor = match frame.then_exits {
            Some(mut then_exits) => {
                then_exits.extend(branch_exits);
                then_exits
            }
            None => {
                let mut exits = branch_exits;
                exits.push(CursorEntry::guarded(frame.decision, negate(&frame.predicate)));
                exits
            }
        };
        self.last_added = None;
        self
    }

    /// Run `body` repeatedly until `config.until` holds or the iteration cap is hit.
    ///
    /// Generates a decision node `<body>__loop`; the iteration count is kept in
    /// that node's output and restarts when the loop is entered from outside.
    pub fn loop_(self, body: Node<S>, config: LoopConfig<S>) -> Self {
        let check = format!("{}__loop", body.id);
        let body = {
            let check = check.clone();
            body.map_handler(move |inner| Arc::new(LoopBody { inner, check }))
        };
        let body_id = body.id.clone();

        let mut builder = self
            .then(body)
            .then(Node::new(check.clone(), NodeKind::Decision, Passthrough));

        let LoopConfig {
            until,
            max_iterations,
        } = config;
        let key = check.clone();
        let again: Guard<S> = Arc::new(move |state: &S| {
            !until(state) && loop_iterations(state, &key) < max_iterations
        });
        builder
            .edges
            .push(Edge::guarded(check.clone(), body_id, Arc::clone(&again)));
        builder.cursor = vec![CursorEntry::guarded(check, negate(&again))];
        builder.last_added = None;
        builder
    }

    /// Run `nodes` concurrently as one step.
    pub fn parallel(mut self, nodes: Vec<Node<S>>, strategy: MergeStrategy) -> Self {
        let id = self.next_id("parallel");
        self.then(Node::parallel(id, ParallelNode::new(nodes, strategy)))
    }

    /// Pause for human input (skipped when the run auto-approves).
    pub fn wait(mut self, prompt: impl Into<String>) -> Self {
        let id = self.next_id("wait");
        self.then(Node::wait(id, WaitNode::new(prompt)))
    }

    /// Route failures of the previously added node to `handler`. Both the
    /// node and the handler continue to whatever follows.
    pub fn catch(mut self, handler: Node<S>) -> Self {
        let Some(target) = self.last_added.clone() else {
            self.errors
                .push(GraphError::usage("catch() must directly follow the node it guards"));
            return self;
        };
        let handler_id = handler.id.clone();
        match self.nodes.get_mut(&target) {
            Some(node) if node.catch.is_none() => node.catch = Some(handler_id.clone()),
            Some(_) => {
                self.errors.push(GraphError::usage(format!(
                    "node '{}' already has a catch handler",
                    target
                )));
                return self;
            }
            None => return self,
        }
        self.insert(handler);
        self.cursor.push(CursorEntry::plain(handler_id));
        self
    }

    /// Mark the cursor as the end of the graph. Guarded exits get an edge to
    /// [`END`]; unguarded exits become terminal nodes.
    pub fn end(mut self) -> Self {
        for entry in std::mem::take(&mut self.cursor) {
            match entry.guard {
                Some(guard) => self.edges.push(Edge::guarded(entry.from, END, guard)),
                None => {
                    self.terminals.insert(entry.from);
                }
            }
        }
        self.last_added = None;
        self
    }

    /// Mark specific nodes as terminal.
    pub fn end_at<I, T>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<NodeId>,
    {
        self.terminals.extend(ids.into_iter().map(Into::into));
        self
    }

    /// Validate and freeze the graph.
    pub fn compile(self, config: GraphConfig<S>) -> Result<CompiledGraph<S>> {
        if let Some(err) = self.errors.into_iter().next() {
            return Err(err);
        }
        if let Some(frame) = self.frames.last() {
            return Err(GraphError::usage(format!(
                "if_() at '{}' is missing endif()",
                frame.decision
            )));
        }
        CompiledGraph::new(
            GraphParts {
                nodes: self.nodes,
                order: self.order,
                edges: self.edges,
                start: self.start,
                terminals: self.terminals,
            },
            config,
        )
    }

    fn insert(&mut self, node: Node<S>) {
        if node.id == END || node.id.is_empty() {
            self.errors
                .push(GraphError::usage(format!("'{}' is not a valid node id", node.id)));
            return;
        }
        if self.nodes.contains_key(&node.id) {
            self.errors
                .push(GraphError::usage(format!("duplicate node id '{}'", node.id)));
            return;
        }
        self.order.push(node.id.clone());
        self.nodes.insert(node.id.clone(), node);
    }

    fn connect(&mut self, to: &str) {
        for entry in std::mem::take(&mut self.cursor) {
            self.edges.push(Edge {
                from: entry.from,
                to: to.to_string(),
                guard: entry.guard,
            });
        }
    }

    fn next_id(&mut self, prefix: &str) -> NodeId {
        loop {
            self.counter += 1;
            let id = format!("{}_{}", prefix, self.counter);
            if !self.nodes.contains_key(&id) {
                return id;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecutionOptions;
    use agentgraph_checkpoint::RunStatus;

    crate::workflow_state! {
        struct Walk => WalkUpdate {
            path: Vec<String> => append,
            flag: bool => replace,
            done: bool => replace,
        }
    }

    fn step(id: &'static str) -> Node<Walk> {
        Node::from_fn(id, move |_ctx| async move {
            Ok(NodeResult::update(WalkUpdate::default().path(vec![id.to_string()])))
        })
    }

    fn branching(flag: bool) -> Walk {
        Walk::new("w").merge(WalkUpdate::default().flag(flag))
    }

    fn if_else_graph() -> CompiledGraph<Walk> {
        GraphBuilder::new()
            .start(step("a"))
            .if_(|s: &Walk| s.flag)
            .then(step("yes"))
            .else_()
            .then(step("no"))
            .endif()
            .then(step("z"))
            .end()
            .compile(GraphConfig::default())
            .unwrap()
    }

    #[tokio::test]
    async fn test_if_else_takes_one_branch() {
        let graph = if_else_graph();
        let taken = graph.invoke(branching(true), ExecutionOptions::new()).await.unwrap();
        assert_eq!(taken.state.path, vec!["a", "yes", "z"]);

        let skipped = graph.invoke(branching(false), ExecutionOptions::new()).await.unwrap();
        assert_eq!(skipped.state.path, vec!["a", "no", "z"]);
    }

    #[tokio::test]
    async fn test_if_without_else_passes_through() {
        let graph = GraphBuilder::new()
            .start(step("a"))
            .if_(|s: &Walk| s.flag)
            .then(step("extra"))
            .endif()
            .then(step("z"))
            .end()
            .compile(GraphConfig::default())
            .unwrap();

        let outcome = graph.invoke(branching(false), ExecutionOptions::new()).await.unwrap();
        assert_eq!(outcome.state.path, vec!["a", "z"]);
    }

    #[tokio::test]
    async fn test_loop_stops_at_max_iterations() {
        let graph = GraphBuilder::new()
            .start(step("init"))
            .loop_(step("body"), LoopConfig::times(3))
            .then(step("after"))
            .end()
            .compile(GraphConfig::default())
            .unwrap();

        let outcome = graph.invoke(Walk::new("l"), ExecutionOptions::new()).await.unwrap();
        assert_eq!(outcome.state.path, vec!["init", "body", "body", "body", "after"]);
        assert_eq!(loop_iterations(&outcome.state, "body__loop"), 3);
    }

    #[tokio::test]
    async fn test_loop_stops_when_condition_holds() {
        let body = Node::<Walk>::from_fn("work", |ctx| async move {
            let done = ctx.state().path.len() >= 2;
            Ok(NodeResult::update(
                WalkUpdate::default().path(vec!["work".into()]).done(done),
            ))
        });
        let graph = GraphBuilder::new()
            .start(step("init"))
            .loop_(body, LoopConfig::new(10, |s: &Walk| s.done))
            .end()
            .compile(GraphConfig::default())
            .unwrap();

        let outcome = graph.invoke(Walk::new("l"), ExecutionOptions::new()).await.unwrap();
        assert_eq!(outcome.status, RunStatus::Completed);
        assert_eq!(outcome.state.path, vec!["init", "work", "work"]);
    }

    #[tokio::test]
    async fn test_catch_routes_failure_to_handler() {
        let flaky = Node::<Walk>::from_fn("flaky", |_ctx| async {
            Err(NodeError::failed("tool crashed"))
        });
        let handler = Node::<Walk>::from_fn("recover", |ctx| async move {
            let failed = ctx.errors().last().map(|e| e.node.clone()).unwrap_or_default();
            Ok(NodeResult::update(WalkUpdate::default().path(vec![format!("recovered:{failed}")])))
        });
        let graph = GraphBuilder::new()
            .start(step("a"))
            .then(flaky)
            .catch(handler)
            .then(step("z"))
            .end()
            .compile(GraphConfig::default())
            .unwrap();

        let outcome = graph.invoke(Walk::new("c"), ExecutionOptions::new()).await.unwrap();
        assert_eq!(outcome.status, RunStatus::Completed);
        assert_eq!(outcome.state.path, vec!["a", "recovered:flaky", "z"]);
        assert_eq!(outcome.failures.len(), 1);
    }

    #[tokio::test]
    async fn test_parallel_and_wait_helpers() {
        let graph = GraphBuilder::new()
            .start(step("a"))
            .parallel(vec![step("p1"), step("p2")], MergeStrategy::All)
            .wait("Ship it?")
            .then(step("z"))
            .end()
            .compile(GraphConfig::default())
            .unwrap();

        assert!(graph.node("parallel_1").is_some());
        let outcome = graph.invoke(Walk::new("p"), ExecutionOptions::new()).await.unwrap();
        assert_eq!(outcome.status, RunStatus::Paused);
        assert_eq!(outcome.paused_at.as_deref(), Some("wait_2"));
        assert_eq!(outcome.state.path, vec!["a", "p1", "p2"]);
    }

    #[test]
    fn test_usage_errors() {
        let err = GraphBuilder::<Walk>::new().start(step("a")).else_().end().compile(GraphConfig::default());
        assert!(matches!(err, Err(GraphError::Usage(_))));

        let err = GraphBuilder::<Walk>::new()
            .start(step("a"))
            .if_(|s: &Walk| s.flag)
            .then(step("b"))
            .end()
            .compile(GraphConfig::default());
        assert!(matches!(err, Err(GraphError::Usage(msg)) if msg.contains("missing endif")));

        let err = GraphBuilder::<Walk>::new()
            .start(step("a"))
            .then(step("a"))
            .end()
            .compile(GraphConfig::default());
        assert!(matches!(err, Err(GraphError::Usage(msg)) if msg.contains("duplicate")));

        let err = GraphBuilder::<Walk>::new().then(step("a")).compile(GraphConfig::default());
        assert!(matches!(err, Err(GraphError::Usage(_))));
    }

    #[test]
    fn test_missing_end_is_structural() {
        let err = GraphBuilder::<Walk>::new()
            .start(step("a"))
            .then(step("b"))
            .compile(GraphConfig::default());
        assert!(matches!(err, Err(GraphError::Structural(_))));
    }
}
