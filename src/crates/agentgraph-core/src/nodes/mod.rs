//! Node contract shared by every node kind
//!
//! A node is an async function from a read-only [`NodeContext`] to a
//! [`NodeResult`]. The executor owns everything else: retries, merging the
//! returned update, routing, checkpointing.
//!
//! ```text
//!  NodeContext { state snapshot, attempt, cancel, errors }
//!        │
//!        ▼
//!  NodeHandler::execute ──► Ok(NodeResult { update?, goto?, signals })
//!                      └──► Err(NodeError)  → retry policy → catch handler / fail run
//! ```
//!
//! # Kinds
//!
//! | Kind | Constructor | Behavior |
//! |------|-------------|----------|
//! | Agent | [`Node::agent`] | sends a prompt to the [`AgentBridge`](crate::bridge::AgentBridge) |
//! | Tool | [`Node::tool`] | runs a deterministic async operation under a timeout |
//! | Decision | [`Node::decision`] | routes on state, never mutates it |
//! | Wait | [`Node::wait`] | pauses for human input unless auto-approved |
//! | Subgraph | [`Node::subgraph`] | runs a nested compiled graph to completion |
//! | Parallel | [`Node::parallel`] | runs child nodes concurrently and merges their updates |
//! | Custom | [`Node::from_fn`] | any async closure |

pub mod agent;
pub mod decision;
pub mod parallel;
pub mod subgraph;
pub mod tool;
pub mod wait;

pub use agent::AgentNode;
pub use decision::DecisionNode;
pub use parallel::{MergeStrategy, ParallelNode};
pub use subgraph::SubgraphNode;
pub use tool::ToolNode;
pub use wait::WaitNode;

use crate::error::NodeError;
use crate::retry::RetryPolicy;
use crate::signal::Signal;
use crate::state::WorkflowState;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub type NodeId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Agent,
    Tool,
    Decision,
    Wait,
    Subgraph,
    Parallel,
    Custom,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Agent => "agent",
            NodeKind::Tool => "tool",
            NodeKind::Decision => "decision",
            NodeKind::Wait => "wait",
            NodeKind::Subgraph => "subgraph",
            NodeKind::Parallel => "parallel",
            NodeKind::Custom => "custom",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Explicit routing returned by a node, overriding its outgoing edges.
///
/// Targets must be declared on the node ([`Node::with_goto_targets`]); the
/// executor rejects anything else with a structural error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Goto {
    Node(NodeId),
    Nodes(Vec<NodeId>),
    /// Finish this path without enqueuing anything.
    End,
}

impl Goto {
    pub fn node(id: impl Into<NodeId>) -> Self {
        Goto::Node(id.into())
    }

    pub fn targets(&self) -> Vec<&str> {
        match self {
            Goto::Node(id) => vec![id.as_str()],
            Goto::Nodes(ids) => ids.iter().map(String::as_str).collect(),
            Goto::End => Vec::new(),
        }
    }
}

/// What a node hands back to the executor.
#[derive(Debug, Clone)]
pub struct NodeResult<S: WorkflowState> {
    pub update: Option<S::Update>,
    pub goto: Option<Goto>,
    pub signals: Vec<Signal>,
}

impl<S: WorkflowState> Default for NodeResult<S> {
    fn default() -> Self {
        Self {
            update: None,
            goto: None,
            signals: Vec::new(),
        }
    }
}

impl<S: WorkflowState> NodeResult<S> {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn update(update: S::Update) -> Self {
        Self {
            update: Some(update),
            ..Self::default()
        }
    }

    pub fn goto(goto: Goto) -> Self {
        Self {
            goto: Some(goto),
            ..Self::default()
        }
    }

    pub fn signal(signal: Signal) -> Self {
        Self {
            signals: vec![signal],
            ..Self::default()
        }
    }

    pub fn with_goto(mut self, goto: Goto) -> Self {
        self.goto = Some(goto);
        self
    }

    pub fn with_signal(mut self, signal: Signal) -> Self {
        self.signals.push(signal);
        self
    }
}

/// A node failure that was routed to a catch handler instead of ending the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeFailure {
    pub node: NodeId,
    pub attempts: u32,
    pub message: String,
}

/// Read-only view handed to a node for one attempt.
#[derive(Debug, Clone)]
pub struct NodeContext<S: WorkflowState> {
    pub node_id: NodeId,
    pub execution_id: String,
    /// Number of steps completed before this one.
    pub step: u64,
    /// 1-based attempt number under the node's retry policy.
    pub attempt: u32,
    /// Node whose edge or goto enqueued this one.
    pub entered_from: Option<NodeId>,
    /// Error message of the previous attempt, for corrective re-prompts.
    pub previous_error: Option<String>,
    pub cancel: CancellationToken,
    pub max_concurrency: Option<usize>,
    pub auto_approve: bool,
    /// Input the run was resumed with, when this node paused it.
    pub resume_input: Option<S::Update>,
    state: Arc<S>,
    errors: Arc<Vec<NodeFailure>>,
}

impl<S: WorkflowState> NodeContext<S> {
    pub fn new(node_id: impl Into<NodeId>, state: S) -> Self {
        let execution_id = state.execution_id().to_string();
        Self {
            node_id: node_id.into(),
            execution_id,
            step: 0,
            attempt: 1,
            entered_from: None,
            previous_error: None,
            cancel: CancellationToken::new(),
            max_concurrency: None,
            auto_approve: false,
            resume_input: None,
            state: Arc::new(state),
            errors: Arc::new(Vec::new()),
        }
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    pub fn errors(&self) -> &[NodeFailure] {
        &self.errors
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) fn with_errors(mut self, errors: Vec<NodeFailure>) -> Self {
        self.errors = Arc::new(errors);
        self
    }

    /// Context for a child node sharing this snapshot.
    pub(crate) fn for_child(&self, node_id: &str, cancel: CancellationToken) -> Self {
        Self {
            node_id: node_id.to_string(),
            attempt: 1,
            previous_error: None,
            resume_input: None,
            cancel,
            ..self.clone()
        }
    }
}

#[async_trait]
pub trait NodeHandler<S: WorkflowState>: Send + Sync {
    async fn execute(&self, ctx: NodeContext<S>) -> Result<NodeResult<S>, NodeError>;
}

/// Adapter turning an async closure into a [`NodeHandler`].
pub struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<S, F, Fut> NodeHandler<S> for FnHandler<F>
where
    S: WorkflowState,
    F: Fn(NodeContext<S>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<NodeResult<S>, NodeError>> + Send + 'static,
{
    async fn execute(&self, ctx: NodeContext<S>) -> Result<NodeResult<S>, NodeError> {
        (self.f)(ctx).await
    }
}

/// A node in a workflow graph.
pub struct Node<S: WorkflowState> {
    pub(crate) id: NodeId,
    pub(crate) kind: NodeKind,
    pub(crate) handler: Arc<dyn NodeHandler<S>>,
    pub(crate) retry: Option<RetryPolicy>,
    pub(crate) goto_targets: Vec<NodeId>,
    pub(crate) catch: Option<NodeId>,
}

impl<S: WorkflowState> Clone for Node<S> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            kind: self.kind,
            handler: Arc::clone(&self.handler),
            retry: self.retry.clone(),
            goto_targets: self.goto_targets.clone(),
            catch: self.catch.clone(),
        }
    }
}

impl<S: WorkflowState> fmt::Debug for Node<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("retry", &self.retry)
            .field("goto_targets", &self.goto_targets)
            .field("catch", &self.catch)
            .finish()
    }
}

impl<S: WorkflowState> Node<S> {
    pub fn new(id: impl Into<NodeId>, kind: NodeKind, handler: impl NodeHandler<S> + 'static) -> Self {
        Self {
            id: id.into(),
            kind,
            handler: Arc::new(handler),
            retry: None,
            goto_targets: Vec::new(),
            catch: None,
        }
    }

    /// A custom node backed by an async closure.
    ///
    /// ```rust
    /// use agentgraph_core::prelude::*;
    ///
    /// workflow_state! {
    ///     pub struct Count => CountUpdate { n: u32 => replace }
    /// }
    ///
    /// let node = Node::<Count>::from_fn("inc", |ctx| async move {
    ///     Ok(NodeResult::update(CountUpdate::default().n(ctx.state().n + 1)))
    /// });
    /// assert_eq!(node.id(), "inc");
    /// ```
    pub fn from_fn<F, Fut>(id: impl Into<NodeId>, f: F) -> Self
    where
        F: Fn(NodeContext<S>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<NodeResult<S>, NodeError>> + Send + 'static,
    {
        Self::new(id, NodeKind::Custom, FnHandler { f })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn retry_policy(&self) -> Option<&RetryPolicy> {
        self.retry.as_ref()
    }

    pub fn goto_targets(&self) -> &[NodeId] {
        &self.goto_targets
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Declare the node ids this node may name in a [`Goto`].
    pub fn with_goto_targets<I, T>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<NodeId>,
    {
        self.goto_targets.extend(targets.into_iter().map(Into::into));
        self
    }

    /// Replace the handler, keeping id, kind and policies.
    pub(crate) fn map_handler(
        mut self,
        f: impl FnOnce(Arc<dyn NodeHandler<S>>) -> Arc<dyn NodeHandler<S>>,
    ) -> Self {
        self.handler = f(self.handler);
        self
    }

    pub(crate) fn may_goto(&self, target: &str) -> bool {
        target == crate::graph::END || self.goto_targets.iter().any(|t| t == target)
    }
}
