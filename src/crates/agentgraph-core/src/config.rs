//! Run configuration
//!
//! [`GraphConfig`] is bound to a graph at compile time and shared by every run
//! of it. [`ExecutionOptions`] vary per run: execution id, cancellation token,
//! auto-approval of wait nodes.

use crate::state::WorkflowState;
use crate::stream::StepEvent;
use agentgraph_checkpoint::{Checkpoint, CheckpointSaver};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Callback invoked after every completed step.
pub type ProgressFn<S> = Arc<dyn Fn(&StepEvent<S>) + Send + Sync>;

pub const DEFAULT_MAX_STEPS: usize = 1000;

pub struct GraphConfig<S: WorkflowState> {
    /// Where snapshots are written. Without one, runs keep no checkpoints.
    pub checkpointer: Option<Arc<dyn CheckpointSaver>>,

    /// Upper bound on concurrent work inside parallel nodes.
    pub max_concurrency: Option<usize>,

    pub on_progress: Option<ProgressFn<S>>,

    /// Write a checkpoint after every step. Pauses and checkpoint signals are
    /// persisted regardless.
    pub auto_checkpoint: bool,

    /// Node executions allowed in one run before it fails with `StepLimit`.
    pub max_steps: usize,
}

impl<S: WorkflowState> Default for GraphConfig<S> {
    fn default() -> Self {
        Self {
            checkpointer: None,
            max_concurrency: None,
            on_progress: None,
            auto_checkpoint: true,
            max_steps: DEFAULT_MAX_STEPS,
        }
    }
}

impl<S: WorkflowState> Clone for GraphConfig<S> {
    fn clone(&self) -> Self {
        Self {
            checkpointer: self.checkpointer.clone(),
            max_concurrency: self.max_concurrency,
            on_progress: self.on_progress.clone(),
            auto_checkpoint: self.auto_checkpoint,
            max_steps: self.max_steps,
        }
    }
}

impl<S: WorkflowState> fmt::Debug for GraphConfig<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphConfig")
            .field(
                "checkpointer",
                &self.checkpointer.as_ref().map(|saver| saver.name().to_string()),
            )
            .field("max_concurrency", &self.max_concurrency)
            .field("on_progress", &self.on_progress.is_some())
            .field("auto_checkpoint", &self.auto_checkpoint)
            .field("max_steps", &self.max_steps)
            .finish()
    }
}

impl<S: WorkflowState> GraphConfig<S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_checkpointer(mut self, saver: Arc<dyn CheckpointSaver>) -> Self {
        self.checkpointer = Some(saver);
        self
    }

    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = Some(limit);
        self
    }

    pub fn on_progress(mut self, f: impl Fn(&StepEvent<S>) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Arc::new(f));
        self
    }

    pub fn with_auto_checkpoint(mut self, enabled: bool) -> Self {
        self.auto_checkpoint = enabled;
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }
}

/// Per-run options.
#[derive(Debug, Clone, Default)]
pub struct ExecutionOptions {
    /// Overrides the execution id carried by the initial state. A fresh UUID
    /// is used when neither is set.
    pub execution_id: Option<String>,

    /// Checked between steps and by nodes during long work.
    pub cancel: CancellationToken,

    /// Let wait nodes pass without pausing.
    pub auto_approve: bool,
}

impl ExecutionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_execution_id(mut self, execution_id: impl Into<String>) -> Self {
        self.execution_id = Some(execution_id.into());
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_auto_approve(mut self, auto_approve: bool) -> Self {
        self.auto_approve = auto_approve;
        self
    }
}

/// What to resume and with which external input.
#[derive(Debug, Clone)]
pub struct ResumeRequest<S: WorkflowState> {
    pub execution_id: String,

    /// Snapshot to resume from; loaded from the graph's checkpointer when absent.
    pub checkpoint: Option<Checkpoint>,

    /// Merged into the restored state before traversal continues.
    pub input: Option<S::Update>,
}

impl<S: WorkflowState> ResumeRequest<S> {
    pub fn new(execution_id: impl Into<String>) -> Self {
        Self {
            execution_id: execution_id.into(),
            checkpoint: None,
            input: None,
        }
    }

    pub fn from_checkpoint(checkpoint: Checkpoint) -> Self {
        Self {
            execution_id: checkpoint.execution_id.clone(),
            checkpoint: Some(checkpoint),
            input: None,
        }
    }

    pub fn with_input(mut self, input: S::Update) -> Self {
        self.input = Some(input);
        self
    }
}
