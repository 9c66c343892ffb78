//! Error types for graph construction, node execution and task scheduling
//!
//! Errors are split by who raises them:
//!
//! | Type | Raised by | Typical cause |
//! |------|-----------|---------------|
//! | [`NodeError`] | a node's executor | agent failure, timeout, malformed agent output |
//! | [`DeadlockError`] | the task scheduler | dependency cycle, exhausted error retries |
//! | [`GraphError`] | builder and executor | invalid structure, unrecovered node failure |
//!
//! A [`NodeError`] is retried according to the node's [`RetryPolicy`](crate::retry::RetryPolicy)
//! before the executor wraps it into [`GraphError::NodeExecution`].

use thiserror::Error;

/// Result alias for graph-level operations.
pub type Result<T> = std::result::Result<T, GraphError>;

/// Errors raised by the graph builder and executor.
#[derive(Error, Debug)]
pub enum GraphError {
    /// The graph violates a structural invariant (missing start node, dangling
    /// edge, undeclared goto target, no admissible outgoing edge).
    #[error("Invalid graph structure: {0}")]
    Structural(String),

    /// A builder method was used incorrectly (`else_` without `if_`, unclosed
    /// conditional, duplicate node id).
    #[error("Builder misuse: {0}")]
    Usage(String),

    /// A node failed and its retry budget was exhausted.
    #[error("Node '{node}' failed after {attempts} attempt(s): {source}")]
    NodeExecution {
        node: String,
        attempts: u32,
        #[source]
        source: NodeError,
    },

    /// The task scheduler could not make progress.
    #[error(transparent)]
    Deadlock(#[from] DeadlockError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] agentgraph_checkpoint::CheckpointError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// `resume` was called for an execution id with no stored checkpoint.
    #[error("No checkpoint found for execution '{0}'")]
    ResumeNotFound(String),

    /// The run executed more node steps than the configured limit.
    #[error("Step limit of {0} exceeded")]
    StepLimit(usize),
}

impl GraphError {
    pub fn structural(msg: impl Into<String>) -> Self {
        Self::Structural(msg.into())
    }

    pub fn usage(msg: impl Into<String>) -> Self {
        Self::Usage(msg.into())
    }

    /// Node that caused the error, when there is one.
    pub fn node(&self) -> Option<&str> {
        match self {
            GraphError::NodeExecution { node, .. } => Some(node),
            _ => None,
        }
    }
}

/// Errors returned by node executors.
#[derive(Error, Debug)]
pub enum NodeError {
    #[error("{0}")]
    Failed(String),

    /// Agent output could not be parsed into the expected shape. Retrying the
    /// node lets the agent see the message and correct itself.
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    #[error("Cancelled")]
    Cancelled,

    #[error("Agent bridge error: {0}")]
    Bridge(String),

    /// A router produced no usable target. Never retried.
    #[error("Routing error: {0}")]
    Routing(String),

    #[error("Subgraph failed: {0}")]
    Subgraph(Box<GraphError>),

    #[error(transparent)]
    Deadlock(#[from] DeadlockError),

    #[error(transparent)]
    Handler(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl NodeError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Whether another attempt could change the outcome.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            NodeError::Cancelled | NodeError::Routing(_) | NodeError::Deadlock(_)
        )
    }
}

impl From<serde_json::Error> for NodeError {
    fn from(err: serde_json::Error) -> Self {
        NodeError::Validation(err.to_string())
    }
}

/// The task scheduler's ready set is empty while work remains.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeadlockError {
    /// Non-completed tasks block each other in a cycle.
    #[error("Dependency cycle: {}", tasks.join(" -> "))]
    Cycle { tasks: Vec<String> },

    /// A task is blocked only by failed tasks whose retry budget is spent.
    #[error("Task '{task}' is blocked by failed task(s) {blocked_by:?} after {retries} retries")]
    ErrorDependency {
        task: String,
        blocked_by: Vec<String>,
        retries: u32,
    },

    /// Pending tasks remain but none can become ready.
    #[error("Scheduler stalled with pending task(s) {pending:?}")]
    Stalled {
        pending: Vec<String>,
        /// `(task, missing dependency)` pairs that keep tasks blocked.
        unresolved: Vec<(String, String)>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_lists_path() {
        let err = DeadlockError::Cycle {
            tasks: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "Dependency cycle: a -> b -> a");
    }

    #[test]
    fn test_retryable_classification() {
        assert!(NodeError::failed("boom").is_retryable());
        assert!(NodeError::validation("bad json").is_retryable());
        assert!(NodeError::Timeout { after_ms: 10 }.is_retryable());
        assert!(!NodeError::Cancelled.is_retryable());
        assert!(!NodeError::Routing("none".into()).is_retryable());
    }

    #[test]
    fn test_node_execution_reports_node() {
        let err = GraphError::NodeExecution {
            node: "plan".into(),
            attempts: 3,
            source: NodeError::validation("not an array"),
        };
        assert_eq!(err.node(), Some("plan"));
        assert!(err.to_string().contains("after 3 attempt(s)"));
    }
}
