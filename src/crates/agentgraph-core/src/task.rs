//! Tasks produced by plan decomposition and consumed by the scheduler

use crate::state::Identified;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub type TaskId = String;

/// Lifecycle of a task. Only the [`TaskScheduler`](crate::scheduler::TaskScheduler)
/// moves tasks between these states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Error,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of implementation work with explicit dependencies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub content: String,
    #[serde(default)]
    pub status: TaskStatus,
    /// Ids of tasks that must complete before this one may start.
    #[serde(default)]
    pub blocked_by: Vec<TaskId>,
}

impl Task {
    pub fn new(id: impl Into<TaskId>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            status: TaskStatus::Pending,
            blocked_by: Vec::new(),
        }
    }

    pub fn blocked_by<I, T>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<TaskId>,
    {
        self.blocked_by = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }

    pub fn is_completed(&self) -> bool {
        self.status == TaskStatus::Completed
    }
}

impl Identified for Task {
    fn id(&self) -> &str {
        &self.id
    }
}

/// Check that ids are non-empty, free of whitespace and unique.
pub fn validate_tasks(tasks: &[Task]) -> Result<(), String> {
    let mut seen = HashSet::new();
    for task in tasks {
        if task.id.trim().is_empty() {
            return Err(format!("task '{}' has an empty id", task.content));
        }
        if task.id.chars().any(char::is_whitespace) {
            return Err(format!("task id '{}' contains whitespace", task.id));
        }
        if !seen.insert(task.id.as_str()) {
            return Err(format!("duplicate task id '{}'", task.id));
        }
    }
    Ok(())
}
