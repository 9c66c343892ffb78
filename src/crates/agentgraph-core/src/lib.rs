//! # agentgraph-core - Workflow Graphs for Terminal Coding Agents
//!
//! A small execution engine for agent workflows: typed state with per-field
//! reducers, six node kinds, a fluent builder, an executor with retries,
//! checkpoints and human-in-the-loop pauses, and a dependency-aware task
//! scheduler that dispatches implementation work to agents in waves.
//!
//! ## Overview
//!
//! ```text
//! ┌──────────────┐  compile   ┌───────────────┐  invoke / stream   ┌──────────────────┐
//! │ GraphBuilder │ ─────────► │ CompiledGraph │ ─────────────────► │ ExecutionOutcome │
//! └──────────────┘            └───────┬───────┘                    └──────────────────┘
//!                                     │ per step
//!              ┌──────────────────────┼───────────────────────┐
//!              ▼                      ▼                       ▼
//!        NodeHandler            CheckpointSaver          on_progress
//!   (agent, tool, decision,   (memory, file, session)   (StepEvent)
//!    wait, subgraph, parallel)
//!              │
//!              ▼
//!         AgentBridge ◄──── TaskScheduler (waves of ready tasks)
//! ```
//!
//! | Concept | Where |
//! |---------|-------|
//! | State + reducers | [`workflow_state!`], [`state`] |
//! | Nodes | [`nodes`] |
//! | Building | [`builder::GraphBuilder`] |
//! | Running, resuming | [`graph::CompiledGraph`], [`executor`] |
//! | Retries | [`retry::RetryPolicy`] |
//! | Task waves | [`scheduler::TaskScheduler`] |
//! | Agent boundary | [`bridge::AgentBridge`] |
//! | Persistence | [`agentgraph_checkpoint`] |
//!
//! ## Quick Start
//!
//! ```rust
//! use agentgraph_core::prelude::*;
//!
//! workflow_state! {
//!     pub struct Review => ReviewUpdate {
//!         notes: Vec<String> => append,
//!         approved: bool => replace,
//!     }
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> agentgraph_core::Result<()> {
//! let lint = Node::<Review>::from_fn("lint", |_ctx| async {
//!     Ok(NodeResult::update(ReviewUpdate::default().notes(vec!["clean".into()])))
//! });
//! let approve = Node::<Review>::from_fn("approve", |_ctx| async {
//!     Ok(NodeResult::update(ReviewUpdate::default().approved(true)))
//! });
//!
//! let graph = GraphBuilder::new()
//!     .start(lint)
//!     .wait("Ship it?")
//!     .then(approve)
//!     .end()
//!     .compile(GraphConfig::default())?;
//!
//! let outcome = graph
//!     .invoke(Review::new("demo"), ExecutionOptions::new().with_auto_approve(true))
//!     .await?;
//! assert!(outcome.is_completed());
//! assert!(outcome.state.approved);
//! # Ok(())
//! # }
//! ```
//!
//! ## Run statuses
//!
//! Every run ends in exactly one of `completed`, `failed`, `cancelled` or
//! `paused`. A failed run still returns `Ok(outcome)` with the error in
//! [`ExecutionOutcome::error`](stream::ExecutionOutcome::error); use
//! [`into_result`](stream::ExecutionOutcome::into_result) to turn it into an
//! `Err`.

pub mod bridge;
pub mod builder;
pub mod config;
pub mod error;
pub mod executor;
pub mod graph;
pub mod nodes;
pub mod prebuilt;
pub mod retry;
pub mod scheduler;
pub mod signal;
pub mod state;
pub mod stream;
pub mod task;

pub use bridge::{AgentBridge, SpawnConfig, SpawnRequest, SpawnResult};
pub use builder::{GraphBuilder, LoopConfig};
pub use config::{ExecutionOptions, GraphConfig, ResumeRequest, DEFAULT_MAX_STEPS};
pub use error::{DeadlockError, GraphError, NodeError, Result};
pub use graph::{CompiledGraph, Edge, Guard, END};
pub use nodes::{
    AgentNode, DecisionNode, Goto, MergeStrategy, Node, NodeContext, NodeFailure, NodeHandler,
    NodeId, NodeKind, NodeResult, ParallelNode, SubgraphNode, ToolNode, WaitNode,
};
pub use retry::RetryPolicy;
pub use scheduler::{
    SchedulerConfig, SchedulerNode, SchedulerOutcome, SchedulerReport, TaskScheduler,
    UnresolvedPolicy, WaveReport,
};
pub use signal::Signal;
pub use state::{Identified, StateUpdate, WorkflowState};
pub use stream::{EventStream, ExecutionOutcome, RunEvent, StepEvent};
pub use task::{Task, TaskId, TaskStatus};

pub use agentgraph_checkpoint::{
    Checkpoint, CheckpointSaver, FileCheckpointSaver, InMemoryCheckpointSaver, RunStatus,
    SessionDirCheckpointSaver,
};

/// Items used by [`workflow_state!`] expansions.
#[doc(hidden)]
pub mod __private {
    pub use chrono::{DateTime, Utc};
    pub use serde_json::Value;
}

/// Everything needed to declare state, build a graph and run it.
pub mod prelude {
    pub use crate::bridge::{AgentBridge, SpawnConfig, SpawnResult};
    pub use crate::builder::{GraphBuilder, LoopConfig};
    pub use crate::config::{ExecutionOptions, GraphConfig, ResumeRequest};
    pub use crate::error::{GraphError, NodeError};
    pub use crate::graph::{CompiledGraph, END};
    pub use crate::nodes::{
        AgentNode, DecisionNode, Goto, MergeStrategy, Node, NodeContext, NodeResult, ParallelNode,
        SubgraphNode, ToolNode, WaitNode,
    };
    pub use crate::retry::RetryPolicy;
    pub use crate::signal::Signal;
    pub use crate::state::{Identified, StateUpdate, WorkflowState};
    pub use crate::stream::{ExecutionOutcome, RunEvent};
    pub use crate::task::{Task, TaskStatus};
    pub use crate::workflow_state;
    pub use agentgraph_checkpoint::RunStatus;
}
