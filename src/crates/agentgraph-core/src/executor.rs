//! Graph executor - traversal, retries, checkpoints and signals
//!
//! Execution is a single FIFO work queue per run. Each step dequeues one node,
//! runs it under its retry policy, merges the returned update into the state
//! and enqueues successors. Fan-out is sequential at this level; concurrency
//! lives inside [`ParallelNode`](crate::nodes::ParallelNode) and the
//! [`TaskScheduler`](crate::scheduler::TaskScheduler).
//!
//! ```text
//!   ┌──────────────┐
//!   │ queue (FIFO) │◄─────────────────────────────────────────────┐
//!   └──────┬───────┘                                              │
//!          │ pop                                                  │
//!          ▼                                                      │
//!   cancelled? ──yes──► Cancelled                                 │
//!          │                                                      │
//!          ▼                                                      │
//!   execute_with_retry(node) ──Err──► catch handler? ──yes────────┤
//!          │                                └──no──► Failed       │
//!          ▼ Ok                                                   │
//!   state = state.merge(update)                                   │
//!          │                                                      │
//!   HumanInputRequired? ──yes──► Paused (nothing enqueued)        │
//!          │                                                      │
//!   goto? ──► declared targets │ else admissible edges ───────────┘
//!          │
//!   checkpoint (auto / signalled) ─► StepEvent ─► on_progress
//! ```
//!
//! A run ends in exactly one of `completed`, `failed`, `cancelled` or
//! `paused`. The final snapshot is written when the graph has a checkpointer
//! and auto-checkpointing is on; paused runs are always persisted so they can
//! be resumed.
//!
//! # Resuming
//!
//! [`CompiledGraph::resume`] restores the state from a checkpoint, merges the
//! external input, and continues with the stored queue. For a paused run the
//! paused node's outgoing edges are evaluated against the merged state, so a
//! guard can branch on the human's answer. A paused subgraph node is re-entered
//! instead, with the resume input in [`NodeContext::resume_input`], so it can
//! resume its child run before the parent moves on.

use crate::config::{ExecutionOptions, ResumeRequest};
use crate::error::{GraphError, NodeError, Result};
use crate::graph::{CompiledGraph, END};
use crate::nodes::{Node, NodeContext, NodeFailure, NodeId, NodeKind};
use crate::retry::execute_with_retry;
use crate::signal::Signal;
use crate::state::{StateUpdate, WorkflowState};
use crate::stream::{EventStream, ExecutionOutcome, RunEvent, StepEvent};
use agentgraph_checkpoint::{Checkpoint, CheckpointMetadata, PendingNode, RunStatus};
use chrono::Utc;
use futures::StreamExt;
use std::collections::VecDeque;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

impl<S: WorkflowState> CompiledGraph<S> {
    /// Run the graph from its start node and return the final outcome.
    pub async fn invoke(&self, initial: S, options: ExecutionOptions) -> Result<ExecutionOutcome<S>> {
        drain(self.stream(initial, options)).await
    }

    /// Run the graph from its start node, yielding an event per step.
    pub fn stream(&self, initial: S, options: ExecutionOptions) -> EventStream<S> {
        Run::fresh(self.clone(), initial, options).into_stream()
    }

    /// Continue a paused, cancelled or interrupted run.
    pub async fn resume(
        &self,
        request: ResumeRequest<S>,
        options: ExecutionOptions,
    ) -> Result<ExecutionOutcome<S>> {
        drain(self.resume_stream(request, options).await?).await
    }

    /// Streaming form of [`resume`](Self::resume). Fails before streaming when
    /// no checkpoint exists for the execution id.
    pub async fn resume_stream(
        &self,
        request: ResumeRequest<S>,
        options: ExecutionOptions,
    ) -> Result<EventStream<S>> {
        let run = Run::restore(self.clone(), request, options).await?;
        Ok(run.into_stream())
    }
}

async fn drain<S: WorkflowState>(mut events: EventStream<S>) -> Result<ExecutionOutcome<S>> {
    while let Some(event) = events.next().await {
        if let RunEvent::Finished(outcome) = event {
            return Ok(outcome);
        }
    }
    Err(GraphError::structural("run ended without an outcome"))
}

struct Run<S: WorkflowState> {
    graph: CompiledGraph<S>,
    options: ExecutionOptions,
    execution_id: String,
    state: S,
    net_update: S::Update,
    queue: VecDeque<PendingNode>,
    step: u64,
    status: RunStatus,
    error: Option<GraphError>,
    failures: Vec<NodeFailure>,
    last_node: Option<NodeId>,
    pending_prompt: Option<String>,
    paused_at: Option<NodeId>,
    label: Option<String>,
    /// Paused subgraph node to re-enter first, with the resume input.
    reentry: Option<(NodeId, Option<S::Update>)>,
}

impl<S: WorkflowState> Run<S> {
    fn fresh(graph: CompiledGraph<S>, mut state: S, options: ExecutionOptions) -> Self {
        let execution_id = options
            .execution_id
            .clone()
            .or_else(|| Some(state.execution_id().to_string()).filter(|id| !id.is_empty()))
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        state.set_execution_id(execution_id.clone());
        state.touch(Utc::now());

        let queue = VecDeque::from([PendingNode::new(graph.start(), None)]);
        info!(execution_id = %execution_id, start = graph.start(), "starting run");
        Self::with_queue(graph, options, execution_id, state, queue, 0)
    }

    async fn restore(
        graph: CompiledGraph<S>,
        request: ResumeRequest<S>,
        options: ExecutionOptions,
    ) -> Result<Self> {
        let checkpoint = match request.checkpoint {
            Some(checkpoint) => checkpoint,
            None => {
                let saver = graph
                    .config()
                    .checkpointer
                    .as_ref()
                    .ok_or_else(|| GraphError::ResumeNotFound(request.execution_id.clone()))?;
                saver
                    .load(&request.execution_id)
                    .await?
                    .ok_or_else(|| GraphError::ResumeNotFound(request.execution_id.clone()))?
            }
        };

        let execution_id = checkpoint.execution_id.clone();
        let mut state: S = serde_json::from_value(checkpoint.state)?;
        state.set_execution_id(execution_id.clone());

        let mut net_update = S::Update::default();
        if let Some(input) = &request.input {
            state.apply(input.clone());
            net_update = input.clone();
        }
        state.touch(Utc::now());

        let metadata = checkpoint.metadata;
        let mut queue: VecDeque<PendingNode> = metadata.next.into_iter().collect();
        let mut reentry = None;
        if metadata.status == RunStatus::Paused {
            if let Some(paused) = metadata.node.as_deref() {
                if graph.node(paused).is_some_and(|node| node.kind == NodeKind::Subgraph) {
                    // The child run is still paused; the node resumes it.
                    queue.push_front(PendingNode::new(paused, None));
                    reentry = Some((paused.to_string(), request.input));
                } else {
                    for target in graph.successors(paused, &state)? {
                        if target != END {
                            push_unique(&mut queue, &target, Some(paused));
                        }
                    }
                }
            }
        }

        info!(
            execution_id = %execution_id,
            from_status = %metadata.status,
            step = metadata.step,
            queued = queue.len(),
            "resuming run"
        );
        let mut run = Self::with_queue(graph, options, execution_id, state, queue, metadata.step);
        run.net_update = net_update;
        run.reentry = reentry;
        Ok(run)
    }

    fn with_queue(
        graph: CompiledGraph<S>,
        options: ExecutionOptions,
        execution_id: String,
        state: S,
        queue: VecDeque<PendingNode>,
        step: u64,
    ) -> Self {
        Self {
            graph,
            options,
            execution_id,
            state,
            net_update: S::Update::default(),
            queue,
            step,
            status: RunStatus::Running,
            error: None,
            failures: Vec::new(),
            last_node: None,
            pending_prompt: None,
            paused_at: None,
            label: None,
            reentry: None,
        }
    }

    fn into_stream(self) -> EventStream<S> {
        Box::pin(async_stream::stream! {
            let mut run = self;
            while let Some(event) = run.next_step().await {
                yield RunEvent::Step(event);
            }
            yield RunEvent::Finished(run.finish().await);
        })
    }

    /// Execute the next queued node. `None` once the run reached a final status.
    #[tracing::instrument(skip_all, fields(execution_id = %self.execution_id, step = self.step))]
    async fn next_step(&mut self) -> Option<StepEvent<S>> {
        if self.status != RunStatus::Running {
            return None;
        }
        if self.options.cancel.is_cancelled() {
            info!("cancellation observed");
            self.status = RunStatus::Cancelled;
            return None;
        }
        let Some(pending) = self.queue.pop_front() else {
            self.status = RunStatus::Completed;
            return None;
        };

        let max_steps = self.graph.config().max_steps;
        if self.step >= max_steps as u64 {
            self.queue.push_front(pending);
            self.fail(GraphError::StepLimit(max_steps));
            return None;
        }

        let graph = self.graph.clone();
        let Some(node) = graph.node(&pending.node) else {
            self.fail(GraphError::structural(format!(
                "queued node '{}' does not exist",
                pending.node
            )));
            return None;
        };
        self.last_node = Some(node.id.clone());

        let mut ctx = self.context(node, &pending);
        if self.reentry.as_ref().is_some_and(|(id, _)| *id == node.id) {
            ctx.resume_input = self.reentry.take().and_then(|(_, input)| input);
        }
        let attempted = execute_with_retry(node, ctx).await;
        let attempts = attempted.attempts;

        let result = match attempted.result {
            Ok(result) => result,
            Err(err) if matches!(err, NodeError::Cancelled) || self.options.cancel.is_cancelled() => {
                info!(node = %node.id, "node cancelled");
                self.queue.push_front(pending);
                self.status = RunStatus::Cancelled;
                return None;
            }
            Err(err) => {
                if let Some(handler) = node.catch.as_deref() {
                    warn!(node = %node.id, attempts, handler, error = %err, "node failed, routing to catch handler");
                    self.failures.push(NodeFailure {
                        node: node.id.clone(),
                        attempts,
                        message: err.to_string(),
                    });
                    self.step += 1;
                    push_unique(&mut self.queue, handler, Some(node.id.as_str()));
                    return Some(self.complete_step(node, attempts, Vec::new(), true).await);
                }

                error!(node = %node.id, attempts, error = %err, "node failed");
                self.queue.push_front(pending);
                self.fail(node_failure(&node.id, attempts, err));
                return None;
            }
        };

        self.step += 1;
        if let Some(update) = result.update {
            if !update.is_empty() {
                self.state.apply(update.clone());
                self.net_update = std::mem::take(&mut self.net_update).combine(update);
            }
        }
        self.state.touch(Utc::now());

        for signal in &result.signals {
            match signal {
                Signal::ContextWindowWarning { usage } => {
                    warn!(node = %node.id, usage, "context window is filling up");
                }
                Signal::Checkpoint { label } => self.label = Some(label.clone()),
                Signal::HumanInputRequired { .. } => {}
                Signal::DebugReportGenerated { .. } => {
                    info!(node = %node.id, "debug report generated");
                }
            }
        }
        let pause = result.signals.iter().find_map(Signal::pause_prompt).map(str::to_string);

        if let Some(prompt) = pause {
            info!(node = %node.id, "human input required, pausing");
            self.status = RunStatus::Paused;
            self.pending_prompt = Some(prompt);
            self.paused_at = Some(node.id.clone());
        } else if let Err(err) = self.route(node, result.goto) {
            self.fail(err);
        }

        Some(self.complete_step(node, attempts, result.signals, false).await)
    }

    fn context(&self, node: &Node<S>, pending: &PendingNode) -> NodeContext<S> {
        let mut ctx = NodeContext::new(node.id.clone(), self.state.clone())
            .with_errors(self.failures.clone());
        ctx.step = self.step;
        ctx.entered_from = pending.from.clone();
        ctx.cancel = self.options.cancel.clone();
        ctx.max_concurrency = self.graph.config().max_concurrency;
        ctx.auto_approve = self.options.auto_approve;
        ctx
    }

    fn route(&mut self, node: &Node<S>, goto: Option<crate::nodes::Goto>) -> Result<()> {
        let targets = match goto {
            Some(goto) => {
                let targets: Vec<NodeId> = goto.targets().into_iter().map(str::to_string).collect();
                if let Some(bad) = targets.iter().find(|target| !node.may_goto(target)) {
                    return Err(GraphError::structural(format!(
                        "node '{}' routed to undeclared target '{}'",
                        node.id, bad
                    )));
                }
                targets
            }
            None => self.graph.successors(&node.id, &self.state)?,
        };

        for target in targets.iter().filter(|target| target.as_str() != END) {
            push_unique(&mut self.queue, target, Some(node.id.as_str()));
        }
        debug!(node = %node.id, next = ?targets, "routed");
        Ok(())
    }

    /// Persist if required, emit the progress callback and build the event.
    async fn complete_step(
        &mut self,
        node: &Node<S>,
        attempts: u32,
        signals: Vec<Signal>,
        caught_error: bool,
    ) -> StepEvent<S> {
        if self.status == RunStatus::Running
            && (self.graph.config().auto_checkpoint || self.label.is_some())
        {
            if let Err(err) = self.save().await {
                self.fail(err);
            }
        }

        let event = StepEvent {
            execution_id: self.execution_id.clone(),
            step: self.step,
            node: node.id.clone(),
            kind: node.kind,
            attempts,
            status: self.status,
            caught_error,
            signals,
            state: self.state.clone(),
        };
        if let Some(on_progress) = &self.graph.config().on_progress {
            on_progress(&event);
        }
        event
    }

    fn fail(&mut self, err: GraphError) {
        self.status = RunStatus::Failed;
        self.error = Some(err);
    }

    async fn save(&mut self) -> Result<bool> {
        let Some(saver) = self.graph.config().checkpointer.clone() else {
            return Ok(false);
        };
        let checkpoint = self.snapshot()?;
        saver.save(&checkpoint).await?;
        debug!(
            saver = saver.name(),
            status = %self.status,
            label = ?self.label,
            "checkpoint saved"
        );
        self.label = None;
        Ok(true)
    }

    fn snapshot(&self) -> Result<Checkpoint> {
        let state = serde_json::to_value(&self.state)?;
        let mut metadata = CheckpointMetadata::new()
            .with_step(self.step)
            .with_status(self.status)
            .with_next(self.queue.iter().cloned().collect());
        if let Some(node) = self.paused_at.as_ref().or(self.last_node.as_ref()) {
            metadata = metadata.with_node(node.clone());
        }
        if let Some(prompt) = &self.pending_prompt {
            metadata = metadata.with_pending_prompt(prompt.clone());
        }
        if let Some(err) = &self.error {
            metadata = metadata.with_error(err.to_string());
        }

        let mut checkpoint = Checkpoint::new(self.execution_id.clone(), state).with_metadata(metadata);
        if let Some(label) = &self.label {
            checkpoint = checkpoint.with_label(label.clone());
        }
        Ok(checkpoint)
    }

    async fn finish(mut self) -> ExecutionOutcome<S> {
        if self.status == RunStatus::Running {
            self.status = RunStatus::Completed;
        }

        let config = self.graph.config();
        let persist = config.auto_checkpoint || self.status == RunStatus::Paused || self.label.is_some();
        if persist {
            if let Err(err) = self.save().await {
                error!(execution_id = %self.execution_id, error = %err, "final checkpoint failed");
                if self.error.is_none() {
                    self.fail(err);
                }
            }
        }

        let checkpoint = self.snapshot().ok();
        info!(
            execution_id = %self.execution_id,
            status = %self.status,
            steps = self.step,
            "run finished"
        );

        ExecutionOutcome {
            execution_id: self.execution_id,
            status: self.status,
            state: self.state,
            steps: self.step,
            net_update: self.net_update,
            error: self.error,
            failures: self.failures,
            pending_prompt: self.pending_prompt,
            paused_at: self.paused_at,
            checkpoint,
        }
    }
}

fn push_unique(queue: &mut VecDeque<PendingNode>, node: &str, from: Option<&str>) {
    if queue.iter().any(|pending| pending.node == node) {
        return;
    }
    queue.push_back(PendingNode::new(node, from.map(str::to_string)));
}

fn node_failure(node: &str, attempts: u32, err: NodeError) -> GraphError {
    match err {
        NodeError::Routing(msg) => GraphError::Structural(msg),
        NodeError::Deadlock(deadlock) => GraphError::Deadlock(deadlock),
        source => GraphError::NodeExecution {
            node: node.to_string(),
            attempts,
            source,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::GraphBuilder;
    use crate::config::GraphConfig;
    use crate::nodes::{Goto, NodeResult};
    use crate::retry::RetryPolicy;
    use agentgraph_checkpoint::{CheckpointSaver, InMemoryCheckpointSaver};
    use std::sync::Arc;

    crate::workflow_state! {
        struct Trace => TraceUpdate {
            visited: Vec<String> => append,
        }
    }

    fn visit(id: &'static str) -> Node<Trace> {
        Node::from_fn(id, move |_ctx| async move {
            Ok(NodeResult::update(TraceUpdate::default().visited(vec![id.to_string()])))
        })
    }

    #[tokio::test]
    async fn test_linear_run_completes() {
        let graph = GraphBuilder::new()
            .start(visit("a"))
            .then(visit("b"))
            .end()
            .compile(GraphConfig::default())
            .unwrap();

        let outcome = graph.invoke(Trace::new("lin"), ExecutionOptions::new()).await.unwrap();
        assert_eq!(outcome.status, RunStatus::Completed);
        assert_eq!(outcome.state.visited, vec!["a", "b"]);
        assert_eq!(outcome.steps, 2);
        assert_eq!(outcome.net_update.visited, Some(vec!["a".to_string(), "b".to_string()]));
    }

    #[tokio::test]
    async fn test_generated_execution_id() {
        let graph = GraphBuilder::new()
            .start(visit("a"))
            .end()
            .compile(GraphConfig::default())
            .unwrap();
        let outcome = graph.invoke(Trace::new(""), ExecutionOptions::new()).await.unwrap();
        assert!(Uuid::parse_str(&outcome.execution_id).is_ok());
        assert_eq!(outcome.state.execution_id, outcome.execution_id);
    }

    #[tokio::test]
    async fn test_undeclared_goto_fails_run() {
        let rogue = Node::<Trace>::from_fn("rogue", |_ctx| async {
            Ok(NodeResult::goto(Goto::node("b")))
        });
        let graph = GraphBuilder::new()
            .start(rogue)
            .then(visit("b"))
            .end()
            .compile(GraphConfig::default())
            .unwrap();

        let outcome = graph.invoke(Trace::new("r"), ExecutionOptions::new()).await.unwrap();
        assert_eq!(outcome.status, RunStatus::Failed);
        assert!(matches!(outcome.error, Some(GraphError::Structural(_))));
    }

    #[tokio::test]
    async fn test_failure_reports_node_and_attempts() {
        let broken = Node::<Trace>::from_fn("broken", |_ctx| async {
            Err(NodeError::failed("disk full"))
        })
        .with_retry(RetryPolicy::new(2).with_backoff(std::time::Duration::from_millis(1)));
        let graph = GraphBuilder::new()
            .start(broken)
            .end()
            .compile(GraphConfig::default())
            .unwrap();

        let outcome = graph.invoke(Trace::new("r"), ExecutionOptions::new()).await.unwrap();
        match outcome.into_result() {
            Err(GraphError::NodeExecution { node, attempts, .. }) => {
                assert_eq!(node, "broken");
                assert_eq!(attempts, 2);
            }
            other => panic!("unexpected outcome: {:?}", other.map(|o| o.status)),
        }
    }

    #[tokio::test]
    async fn test_checkpoint_signal_saves_with_label() {
        let saver = Arc::new(InMemoryCheckpointSaver::new());
        let marker = Node::<Trace>::from_fn("marker", |_ctx| async {
            Ok(NodeResult::signal(Signal::checkpoint("after-marker")))
        });
        let graph = GraphBuilder::new()
            .start(marker)
            .then(visit("next"))
            .end()
            .compile(
                GraphConfig::default()
                    .with_checkpointer(saver.clone())
                    .with_auto_checkpoint(false),
            )
            .unwrap();

        graph.invoke(Trace::new("lbl"), ExecutionOptions::new()).await.unwrap();
        let stored = saver.load("lbl").await.unwrap().unwrap();
        assert_eq!(stored.label.as_deref(), Some("after-marker"));
        assert_eq!(stored.metadata.step, 1);
        assert_eq!(stored.metadata.next[0].node, "next");
    }

    #[tokio::test]
    async fn test_step_limit() {
        let spin = Node::<Trace>::from_fn("spin", |_ctx| async {
            Ok(NodeResult::goto(Goto::node("spin")))
        })
        .with_goto_targets(["spin"]);
        let graph = GraphBuilder::new()
            .start(spin)
            .end()
            .compile(GraphConfig::default().with_max_steps(5))
            .unwrap();

        let outcome = graph.invoke(Trace::new("r"), ExecutionOptions::new()).await.unwrap();
        assert_eq!(outcome.status, RunStatus::Failed);
        assert!(matches!(outcome.error, Some(GraphError::StepLimit(5))));
        assert_eq!(outcome.steps, 5);
    }

    #[tokio::test]
    async fn test_resume_without_checkpoint() {
        let saver = Arc::new(InMemoryCheckpointSaver::new());
        let graph = GraphBuilder::new()
            .start(visit("a"))
            .end()
            .compile(GraphConfig::default().with_checkpointer(saver))
            .unwrap();
        let err = graph
            .resume(ResumeRequest::new("missing"), ExecutionOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, GraphError::ResumeNotFound(id) if id == "missing"));
    }
}
