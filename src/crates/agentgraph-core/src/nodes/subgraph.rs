//! Subgraph node - run a nested compiled graph as one step

use super::{Node, NodeContext, NodeHandler, NodeId, NodeKind, NodeResult};
use crate::config::{ExecutionOptions, ResumeRequest};
use crate::error::NodeError;
use crate::graph::CompiledGraph;
use crate::signal::Signal;
use crate::state::{StateUpdate, WorkflowState};
use crate::stream::ExecutionOutcome;
use agentgraph_checkpoint::{Checkpoint, RunStatus};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

type InputFn<S, C> = Arc<dyn Fn(&NodeContext<S>) -> C + Send + Sync>;
type OutputFn<S, C> =
    Arc<dyn Fn(&S, ExecutionOutcome<C>) -> <S as WorkflowState>::Update + Send + Sync>;
type ResumeFn<S, C> =
    Arc<dyn Fn(&NodeContext<S>) -> Option<<C as WorkflowState>::Update> + Send + Sync>;

/// What this node left in `outputs[<node id>]` about its child run.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChildRun {
    child_execution_id: String,
    status: RunStatus,
    /// Present while the child is paused.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    checkpoint: Option<Checkpoint>,
}

/// Runs a child graph to completion (or pause) before the parent continues.
///
/// The child gets its own execution id, `<parent>.<node>`, and a child
/// cancellation token. A child pause surfaces as a pause of the parent at this
/// node, and the child's checkpoint is kept in `outputs[<node id>]` (and so
/// in the parent's checkpoint). When the parent resumes, the executor
/// re-enters this node, which resumes the child with the parent's resume
/// input; the parent moves on once the child completes.
pub struct SubgraphNode<S: WorkflowState, C: WorkflowState> {
    graph: CompiledGraph<C>,
    input: InputFn<S, C>,
    output: OutputFn<S, C>,
    resume_input: ResumeFn<S, C>,
}

impl<S: WorkflowState> SubgraphNode<S, S> {
    /// A child sharing the parent's state type. The child starts from the
    /// parent's snapshot and every update it applied is merged into the parent.
    pub fn new(graph: CompiledGraph<S>) -> Self {
        Self {
            graph,
            input: Arc::new(|ctx| ctx.state().clone()),
            output: Arc::new(|_parent, outcome| outcome.net_update),
            resume_input: Arc::new(|ctx| ctx.resume_input.clone()),
        }
    }
}

impl<S: WorkflowState, C: WorkflowState> SubgraphNode<S, C> {
    /// A child with its own state type and explicit mappings in and out.
    /// A paused child resumes without input unless [`on_resume`](Self::on_resume)
    /// maps one.
    pub fn with_mapping(
        graph: CompiledGraph<C>,
        input: impl Fn(&NodeContext<S>) -> C + Send + Sync + 'static,
        output: impl Fn(&S, ExecutionOutcome<C>) -> S::Update + Send + Sync + 'static,
    ) -> Self {
        Self {
            graph,
            input: Arc::new(input),
            output: Arc::new(output),
            resume_input: Arc::new(|_ctx| None),
        }
    }

    /// Input merged into a paused child's state when the parent resumes.
    pub fn on_resume(
        mut self,
        f: impl Fn(&NodeContext<S>) -> Option<C::Update> + Send + Sync + 'static,
    ) -> Self {
        self.resume_input = Arc::new(f);
        self
    }

    /// Checkpoint of a child this node left paused, if any.
    fn paused_child(ctx: &NodeContext<S>) -> Option<Checkpoint> {
        let record = ctx.state().outputs().get(&ctx.node_id)?;
        let run: ChildRun = serde_json::from_value(record.clone()).ok()?;
        (run.status == RunStatus::Paused).then_some(run.checkpoint).flatten()
    }

    /// Resume the paused child. The input is folded into its restored state
    /// rather than passed as resume input, so the child's net update (merged
    /// back into the parent) does not repeat it.
    async fn resume_child(
        &self,
        ctx: &NodeContext<S>,
        mut checkpoint: Checkpoint,
        options: ExecutionOptions,
    ) -> Result<ExecutionOutcome<C>, NodeError> {
        if let Some(input) = (self.resume_input)(ctx).filter(|input| !input.is_empty()) {
            let mut state: C = serde_json::from_value(checkpoint.state)?;
            state.apply(input);
            checkpoint.state = serde_json::to_value(&state)?;
        }
        self.graph
            .resume(ResumeRequest::from_checkpoint(checkpoint), options)
            .await
            .map_err(|err| NodeError::Subgraph(Box::new(err)))
    }
}

#[async_trait]
impl<S: WorkflowState, C: WorkflowState> NodeHandler<S> for SubgraphNode<S, C> {
    async fn execute(&self, ctx: NodeContext<S>) -> Result<NodeResult<S>, NodeError> {
        let child_id = format!("{}.{}", ctx.execution_id, ctx.node_id);
        let options = ExecutionOptions::new()
            .with_execution_id(child_id.clone())
            .with_cancel(ctx.cancel.child_token())
            .with_auto_approve(ctx.auto_approve);

        let outcome = match Self::paused_child(&ctx) {
            Some(checkpoint) => {
                info!(node = %ctx.node_id, child = %checkpoint.execution_id, "resuming paused subgraph");
                self.resume_child(&ctx, checkpoint, options).await?
            }
            None => {
                debug!(node = %ctx.node_id, child = %child_id, "entering subgraph");
                self.graph
                    .invoke((self.input)(&ctx), options)
                    .await
                    .map_err(|err| NodeError::Subgraph(Box::new(err)))?
            }
        };
        debug!(node = %ctx.node_id, child = %outcome.execution_id, status = %outcome.status, "subgraph finished");

        let mut run = ChildRun {
            child_execution_id: outcome.execution_id.clone(),
            status: outcome.status,
            checkpoint: None,
        };
        match outcome.status {
            RunStatus::Completed => {
                let record = serde_json::to_value(&run)?;
                let update = (self.output)(ctx.state(), outcome).with_output(&ctx.node_id, record);
                Ok(NodeResult::update(update))
            }
            RunStatus::Paused => {
                let prompt = outcome
                    .pending_prompt
                    .clone()
                    .unwrap_or_else(|| format!("subgraph '{}' is waiting for input", ctx.node_id));
                run.checkpoint = Some(outcome.checkpoint.clone().ok_or_else(|| {
                    NodeError::failed(format!("subgraph '{}' paused without a checkpoint", ctx.node_id))
                })?);
                let record = serde_json::to_value(&run)?;
                let update = (self.output)(ctx.state(), outcome).with_output(&ctx.node_id, record);
                Ok(NodeResult::update(update).with_signal(Signal::human_input(prompt)))
            }
            RunStatus::Cancelled => Err(NodeError::Cancelled),
            RunStatus::Failed | RunStatus::Running => {
                let err = outcome.error.unwrap_or_else(|| {
                    crate::error::GraphError::structural(format!(
                        "subgraph '{}' stopped with status {}",
                        ctx.node_id, outcome.status
                    ))
                });
                Err(NodeError::Subgraph(Box::new(err)))
            }
        }
    }
}

impl<S: WorkflowState> Node<S> {
    pub fn subgraph<C: WorkflowState>(id: impl Into<NodeId>, subgraph: SubgraphNode<S, C>) -> Self {
        Node::new(id, NodeKind::Subgraph, subgraph)
    }
}
