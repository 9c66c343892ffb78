//! Checkpoint record and metadata
//!
//! A [`Checkpoint`] is the unit of persistence for a workflow run: one record per
//! execution id, overwritten as the run advances. The workflow state travels as a
//! `serde_json::Value` so backends never depend on the concrete state type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Terminal (or in-flight) status of a workflow run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Traversal is still in progress.
    Running,
    /// A terminal node was reached with no pending work.
    Completed,
    /// An unrecovered error terminated the run.
    Failed,
    /// The cancellation token was observed.
    Cancelled,
    /// A node requested human input; the run can be resumed.
    Paused,
}

impl RunStatus {
    /// Whether no further traversal happens without an explicit resume.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }

    /// Lowercase label used in logs and CLI output.
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Paused => "paused",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A queued node together with the node that enqueued it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PendingNode {
    pub node: String,

    /// Predecessor whose edge or goto produced this entry; `None` for the start node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
}

impl PendingNode {
    pub fn new(node: impl Into<String>, from: Option<String>) -> Self {
        Self {
            node: node.into(),
            from,
        }
    }
}

/// Execution bookkeeping stored next to the state snapshot.
///
/// `next` holds the work queue at the time the checkpoint was written, which is
/// what a resumed run continues from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckpointMetadata {
    /// Number of node executions completed so far.
    pub step: u64,

    /// Status of the run when the checkpoint was taken.
    pub status: RunStatus,

    /// Node whose completion produced this checkpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,

    /// Nodes still queued for execution, in FIFO order.
    #[serde(default)]
    pub next: Vec<PendingNode>,

    /// Prompt awaiting a human answer when the run is paused.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_prompt: Option<String>,

    /// Last error message, recorded for failed runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl Default for CheckpointMetadata {
    fn default() -> Self {
        Self {
            step: 0,
            status: RunStatus::Running,
            node: None,
            next: Vec::new(),
            pending_prompt: None,
            error: None,
            extra: HashMap::new(),
        }
    }
}

impl CheckpointMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_step(mut self, step: u64) -> Self {
        self.step = step;
        self
    }

    pub fn with_status(mut self, status: RunStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_node(mut self, node: impl Into<String>) -> Self {
        self.node = Some(node.into());
        self
    }

    pub fn with_next(mut self, next: Vec<PendingNode>) -> Self {
        self.next = next;
        self
    }

    pub fn with_pending_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.pending_prompt = Some(prompt.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// A named snapshot of workflow state, addressable by execution id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Checkpoint {
    /// Format version.
    pub v: i32,

    /// Execution the snapshot belongs to.
    pub execution_id: String,

    /// Optional human-readable label (e.g. the name passed with a checkpoint signal).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    /// When the snapshot was taken.
    pub ts: DateTime<Utc>,

    /// Serialized workflow state.
    pub state: serde_json::Value,

    #[serde(default)]
    pub metadata: CheckpointMetadata,
}

impl Checkpoint {
    pub const CURRENT_VERSION: i32 = 1;

    pub fn new(execution_id: impl Into<String>, state: serde_json::Value) -> Self {
        Self {
            v: Self::CURRENT_VERSION,
            execution_id: execution_id.into(),
            label: None,
            ts: Utc::now(),
            state,
            metadata: CheckpointMetadata::default(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_metadata(mut self, metadata: CheckpointMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Whether the run stopped to wait for external input.
    pub fn is_paused(&self) -> bool {
        self.metadata.status == RunStatus::Paused
    }

    /// The `tasks` array of the state, if the workflow carries one.
    pub fn tasks(&self) -> Option<&Vec<serde_json::Value>> {
        self.state.get("tasks").and_then(|tasks| tasks.as_array())
    }
}

/// Reject execution ids that cannot be used as a single path component.
///
/// File-backed savers address checkpoints by id, so ids are limited to ASCII
/// alphanumerics plus `-`, `_` and `.`, and may not start with a dot.
pub fn validate_execution_id(execution_id: &str) -> crate::Result<()> {
    if execution_id.is_empty() {
        return Err(crate::CheckpointError::Invalid(
            "execution id must not be empty".to_string(),
        ));
    }
    if execution_id.starts_with('.') {
        return Err(crate::CheckpointError::Invalid(format!(
            "execution id '{}' must not start with '.'",
            execution_id
        )));
    }
    let valid = execution_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if !valid {
        return Err(crate::CheckpointError::Invalid(format!(
            "execution id '{}' contains characters outside [A-Za-z0-9._-]",
            execution_id
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_checkpoint_builder() {
        let checkpoint = Checkpoint::new("run-1", json!({"iteration": 2}))
            .with_label("after-plan")
            .with_metadata(
                CheckpointMetadata::new()
                    .with_step(4)
                    .with_status(RunStatus::Paused)
                    .with_pending_prompt("Approve the plan?"),
            );

        assert_eq!(checkpoint.execution_id, "run-1");
        assert_eq!(checkpoint.label.as_deref(), Some("after-plan"));
        assert_eq!(checkpoint.metadata.step, 4);
        assert!(checkpoint.is_paused());
    }

    #[test]
    fn test_tasks_accessor() {
        let with_tasks = Checkpoint::new("a", json!({"tasks": [{"id": "1"}]}));
        assert_eq!(with_tasks.tasks().map(|t| t.len()), Some(1));

        let without = Checkpoint::new("b", json!({"iteration": 0}));
        assert!(without.tasks().is_none());
    }

    #[test]
    fn test_metadata_serde_defaults() {
        let metadata: CheckpointMetadata =
            serde_json::from_value(json!({"step": 3, "status": "completed"})).unwrap();
        assert_eq!(metadata.status, RunStatus::Completed);
        assert!(metadata.next.is_empty());
        assert!(metadata.pending_prompt.is_none());
    }

    #[test]
    fn test_pending_node_serde() {
        let metadata = CheckpointMetadata::new().with_next(vec![
            PendingNode::new("plan", None),
            PendingNode::new("review", Some("implement".to_string())),
        ]);
        let value = serde_json::to_value(&metadata).unwrap();
        assert_eq!(value["next"][0], json!({"node": "plan"}));
        assert_eq!(value["next"][1]["from"], "implement");

        let back: CheckpointMetadata = serde_json::from_value(value).unwrap();
        assert_eq!(back, metadata);
    }

    #[test]
    fn test_validate_execution_id() {
        assert!(validate_execution_id("run-2024_01.a").is_ok());
        assert!(validate_execution_id("").is_err());
        assert!(validate_execution_id("../escape").is_err());
        assert!(validate_execution_id(".hidden").is_err());
        assert!(validate_execution_id("a/b").is_err());
    }

    #[test]
    fn test_run_status_terminal() {
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Paused.is_terminal());
        assert_eq!(RunStatus::Cancelled.to_string(), "cancelled");
    }
}
