//! Session-directory checkpoint storage with human-readable sidecars
//!
//! Each execution gets its own directory. Besides the checkpoint itself the saver
//! derives a task list from the state's `tasks` field and writes it next to the
//! checkpoint, where an external live view can watch it:
//!
//! ```text
//! <root>/
//!   └─ <execution_id>/
//!        ├─ checkpoint.json   latest checkpoint (atomic replace)
//!        ├─ tasks.json        task array, pretty-printed
//!        └─ tasks.md          checklist rendering of the same tasks
//! ```
//!
//! Sidecars are rewritten only when the task list actually changed since the last
//! write, so a watcher is not woken by checkpoints that touched other fields.

use crate::checkpoint::{validate_execution_id, Checkpoint};
use crate::error::Result;
use crate::fs::{read_optional, write_atomic};
use crate::traits::CheckpointSaver;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;

/// File name of the checkpoint inside a session directory
pub const CHECKPOINT_FILE: &str = "checkpoint.json";
/// File name of the JSON task sidecar
pub const TASKS_JSON_FILE: &str = "tasks.json";
/// File name of the markdown task sidecar
pub const TASKS_MARKDOWN_FILE: &str = "tasks.md";

/// Checkpoint saver writing one directory per execution plus task sidecars.
#[derive(Debug)]
pub struct SessionDirCheckpointSaver {
    root: PathBuf,
    /// Last task JSON written per execution, used to skip redundant sidecar writes.
    written_tasks: Mutex<HashMap<String, String>>,
}

impl SessionDirCheckpointSaver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            written_tasks: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Session directory of an execution
    pub fn session_dir(&self, execution_id: &str) -> Result<PathBuf> {
        validate_execution_id(execution_id)?;
        Ok(self.root.join(execution_id))
    }

    /// Path of the markdown task list of an execution
    pub fn task_list_path(&self, execution_id: &str) -> Result<PathBuf> {
        Ok(self.session_dir(execution_id)?.join(TASKS_MARKDOWN_FILE))
    }

    /// Rewrite the task sidecars if the task list differs from the last write.
    ///
    /// Returns whether anything was written.
    async fn sync_task_sidecars(&self, dir: &Path, checkpoint: &Checkpoint) -> Result<bool> {
        let tasks = match checkpoint.tasks() {
            Some(tasks) => tasks,
            None => return Ok(false),
        };
        let rendered = serde_json::to_string_pretty(tasks)?;

        let mut written = self.written_tasks.lock().await;
        let previous = match written.get(&checkpoint.execution_id) {
            Some(previous) => Some(previous.clone()),
            // Cold cache (e.g. a resumed process): compare against what is on disk.
            None => read_optional(&dir.join(TASKS_JSON_FILE))
                .await?
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()),
        };

        if previous.as_deref() == Some(rendered.as_str()) {
            written.insert(checkpoint.execution_id.clone(), rendered);
            return Ok(false);
        }

        write_atomic(&dir.join(TASKS_JSON_FILE), rendered.as_bytes()).await?;
        write_atomic(
            &dir.join(TASKS_MARKDOWN_FILE),
            render_task_markdown(tasks).as_bytes(),
        )
        .await?;
        debug!(
            execution_id = %checkpoint.execution_id,
            tasks = tasks.len(),
            "Task sidecars updated"
        );
        written.insert(checkpoint.execution_id.clone(), rendered);
        Ok(true)
    }
}

#[async_trait]
impl CheckpointSaver for SessionDirCheckpointSaver {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        let dir = self.session_dir(&checkpoint.execution_id)?;
        let bytes = serde_json::to_vec_pretty(checkpoint)?;
        write_atomic(&dir.join(CHECKPOINT_FILE), &bytes).await?;
        self.sync_task_sidecars(&dir, checkpoint).await?;
        Ok(())
    }

    async fn load(&self, execution_id: &str) -> Result<Option<Checkpoint>> {
        let path = self.session_dir(execution_id)?.join(CHECKPOINT_FILE);
        match read_optional(&path).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if validate_execution_id(&name).is_err() {
                continue;
            }
            if tokio::fs::try_exists(entry.path().join(CHECKPOINT_FILE)).await? {
                ids.push(name);
            }
        }
        ids.sort();
        Ok(ids)
    }

    async fn delete(&self, execution_id: &str) -> Result<()> {
        let dir = self.session_dir(execution_id)?;
        self.written_tasks.lock().await.remove(execution_id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn name(&self) -> &str {
        "session"
    }
}

/// Render a task array as a markdown checklist.
///
/// Tasks are read loosely from JSON (`id`, `content`, `status`, `blockedBy` or
/// `blocked_by`) so the rendering works for any state that follows the task shape.
pub fn render_task_markdown(tasks: &[Value]) -> String {
    let mut out = String::from("# Tasks\n\n");
    if tasks.is_empty() {
        out.push_str("_No tasks._\n");
        return out;
    }

    for task in tasks {
        let id = task.get("id").and_then(Value::as_str).unwrap_or("?");
        let content = task.get("content").and_then(Value::as_str).unwrap_or("");
        let mark = match task.get("status").and_then(Value::as_str) {
            Some("completed") => "[x]",
            Some("in_progress") => "[~]",
            Some("error") => "[!]",
            _ => "[ ]",
        };
        out.push_str(&format!("- {} #{} {}", mark, id, content));

        let blockers: Vec<&str> = task
            .get("blockedBy")
            .or_else(|| task.get("blocked_by"))
            .and_then(Value::as_array)
            .map(|ids| ids.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        if !blockers.is_empty() {
            let refs: Vec<String> = blockers.iter().map(|b| format!("#{}", b)).collect();
            out.push_str(&format!(" (blocked by {})", refs.join(", ")));
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn task_state(status: &str) -> Value {
        json!({
            "iteration": 1,
            "tasks": [
                {"id": "1", "content": "write parser", "status": status, "blocked_by": []},
                {"id": "2", "content": "wire cli", "status": "pending", "blockedBy": ["1"]}
            ]
        })
    }

    #[tokio::test]
    async fn test_round_trip_and_sidecars() {
        let dir = TempDir::new().unwrap();
        let saver = SessionDirCheckpointSaver::new(dir.path());

        let checkpoint = Checkpoint::new("run-1", task_state("in_progress"));
        saver.save(&checkpoint).await.unwrap();

        assert_eq!(saver.load("run-1").await.unwrap().unwrap(), checkpoint);

        let markdown = tokio::fs::read_to_string(saver.task_list_path("run-1").unwrap())
            .await
            .unwrap();
        assert!(markdown.contains("- [~] #1 write parser"));
        assert!(markdown.contains("- [ ] #2 wire cli (blocked by #1)"));
    }

    #[tokio::test]
    async fn test_sidecar_written_only_on_change() {
        let dir = TempDir::new().unwrap();
        let saver = SessionDirCheckpointSaver::new(dir.path());
        let session = saver.session_dir("run-1").unwrap();

        let first = Checkpoint::new("run-1", task_state("pending"));
        saver.save(&first).await.unwrap();
        assert!(!saver.sync_task_sidecars(&session, &first).await.unwrap());

        // Same tasks, different iteration: no sidecar rewrite
        let mut same_tasks = Checkpoint::new("run-1", task_state("pending"));
        same_tasks.state["iteration"] = json!(2);
        assert!(!saver.sync_task_sidecars(&session, &same_tasks).await.unwrap());

        let changed = Checkpoint::new("run-1", task_state("completed"));
        assert!(saver.sync_task_sidecars(&session, &changed).await.unwrap());
    }

    #[tokio::test]
    async fn test_cold_cache_compares_with_disk() {
        let dir = TempDir::new().unwrap();
        let checkpoint = Checkpoint::new("run-1", task_state("pending"));

        SessionDirCheckpointSaver::new(dir.path())
            .save(&checkpoint)
            .await
            .unwrap();

        let restarted = SessionDirCheckpointSaver::new(dir.path());
        let session = restarted.session_dir("run-1").unwrap();
        assert!(!restarted
            .sync_task_sidecars(&session, &checkpoint)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_state_without_tasks_has_no_sidecar() {
        let dir = TempDir::new().unwrap();
        let saver = SessionDirCheckpointSaver::new(dir.path());
        saver
            .save(&Checkpoint::new("run-1", json!({"iteration": 0})))
            .await
            .unwrap();

        let path = saver.task_list_path("run-1").unwrap();
        assert!(!tokio::fs::try_exists(&path).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_and_delete() {
        let dir = TempDir::new().unwrap();
        let saver = SessionDirCheckpointSaver::new(dir.path());
        saver.save(&Checkpoint::new("b", json!({}))).await.unwrap();
        saver.save(&Checkpoint::new("a", json!({}))).await.unwrap();
        tokio::fs::create_dir_all(dir.path().join("empty-dir"))
            .await
            .unwrap();

        assert_eq!(saver.list().await.unwrap(), vec!["a", "b"]);

        saver.delete("a").await.unwrap();
        assert_eq!(saver.list().await.unwrap(), vec!["b"]);
        assert!(saver.load("a").await.unwrap().is_none());
    }

    #[test]
    fn test_render_empty() {
        assert!(render_task_markdown(&[]).contains("_No tasks._"));
    }
}
