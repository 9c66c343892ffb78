//! Step events and run outcomes
//!
//! A streamed run yields one [`RunEvent::Step`] per completed node and exactly
//! one trailing [`RunEvent::Finished`]. [`CompiledGraph::invoke`] drives the same
//! stream and returns only the outcome.
//!
//! [`CompiledGraph::invoke`]: crate::graph::CompiledGraph::invoke

use crate::error::GraphError;
use crate::nodes::{NodeFailure, NodeId, NodeKind};
use crate::signal::Signal;
use crate::state::WorkflowState;
use agentgraph_checkpoint::{Checkpoint, RunStatus};
use futures::Stream;
use serde::Serialize;
use std::pin::Pin;

/// One completed node execution.
#[derive(Debug, Clone, Serialize)]
pub struct StepEvent<S: WorkflowState> {
    pub execution_id: String,
    pub step: u64,
    pub node: NodeId,
    pub kind: NodeKind,
    pub attempts: u32,
    /// Run status right after this step.
    pub status: RunStatus,
    /// Whether the node failed and was routed to its catch handler.
    pub caught_error: bool,
    pub signals: Vec<Signal>,
    pub state: S,
}

/// Final result of a run.
#[derive(Debug)]
pub struct ExecutionOutcome<S: WorkflowState> {
    pub execution_id: String,
    pub status: RunStatus,
    pub state: S,
    /// Steps completed, including steps before a resume.
    pub steps: u64,
    /// Every update applied during this run, combined. Merging it into the
    /// starting state yields `state`.
    pub net_update: S::Update,
    pub error: Option<GraphError>,
    /// Failures that were routed to catch handlers.
    pub failures: Vec<NodeFailure>,
    pub pending_prompt: Option<String>,
    pub paused_at: Option<NodeId>,
    /// Snapshot a later run can resume from, when the state serialized.
    pub checkpoint: Option<Checkpoint>,
}

impl<S: WorkflowState> ExecutionOutcome<S> {
    pub fn is_completed(&self) -> bool {
        self.status == RunStatus::Completed
    }

    pub fn is_paused(&self) -> bool {
        self.status == RunStatus::Paused
    }

    /// The outcome, or its error if the run failed.
    pub fn into_result(self) -> Result<Self, GraphError> {
        match (self.status, self.error) {
            (RunStatus::Failed, Some(error)) => Err(error),
            (status, error) => Ok(Self {
                status,
                error,
                ..self
            }),
        }
    }
}

#[derive(Debug)]
pub enum RunEvent<S: WorkflowState> {
    Step(StepEvent<S>),
    Finished(ExecutionOutcome<S>),
}

pub type EventStream<S> = Pin<Box<dyn Stream<Item = RunEvent<S>> + Send>>;
