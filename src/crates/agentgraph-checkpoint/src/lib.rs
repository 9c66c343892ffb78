//! # agentgraph-checkpoint - State Persistence for Workflow Runs
//!
//! **Trait-based checkpoint abstractions and backends** for persisting and restoring
//! workflow execution state. A checkpoint is the latest snapshot of one run, keyed by
//! its execution id; it is what a paused or crashed run resumes from.
//!
//! ## Core Concepts
//!
//! ### 1. CheckpointSaver Trait
//!
//! [`CheckpointSaver`] is the interface every backend implements:
//!
//! - **`save()`** - Persist a checkpoint, replacing the previous one for that execution
//! - **`load()`** - Fetch the checkpoint of an execution (`None` if absent)
//! - **`list()`** - Execution ids with a stored checkpoint
//! - **`delete()`** - Drop an execution's checkpoint
//!
//! ### 2. Checkpoint Structure
//!
//! A [`Checkpoint`] contains:
//! - **Execution id** - The run it belongs to
//! - **State** - The serialized workflow state (`serde_json::Value`)
//! - **Label and timestamp** - What produced it and when
//! - **Metadata** - Step counter, run status, queued node ids, pending prompt
//!
//! ### 3. Backends
//!
//! | Backend | Durability | Extras |
//! |---------|------------|--------|
//! | [`InMemoryCheckpointSaver`] | Process lifetime | `clear()` for tests |
//! | [`FileCheckpointSaver`] | One JSON file per run | Atomic replace |
//! | [`SessionDirCheckpointSaver`] | One directory per run | `tasks.json` / `tasks.md` sidecars |
//!
//! File-backed savers write through [`fs::write_atomic`] (temp file, fsync, rename),
//! so a crash mid-write leaves the last good checkpoint in place.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use agentgraph_checkpoint::{
//!     Checkpoint, CheckpointMetadata, CheckpointSaver, FileCheckpointSaver, RunStatus,
//! };
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let saver = FileCheckpointSaver::new(".agentgraph/checkpoints");
//!
//!     let checkpoint = Checkpoint::new("run-42", json!({"iteration": 1}))
//!         .with_label("after-plan")
//!         .with_metadata(
//!             CheckpointMetadata::new()
//!                 .with_step(3)
//!                 .with_status(RunStatus::Paused)
//!                 .with_pending_prompt("Approve the plan?"),
//!         );
//!     saver.save(&checkpoint).await?;
//!
//!     if let Some(loaded) = saver.load("run-42").await? {
//!         assert!(loaded.is_paused());
//!     }
//!     Ok(())
//! }
//! ```

pub mod checkpoint;
pub mod error;
pub mod file;
pub mod fs;
pub mod memory;
pub mod session;
pub mod traits;

pub use checkpoint::{
    validate_execution_id, Checkpoint, CheckpointMetadata, PendingNode, RunStatus,
};
pub use error::{CheckpointError, Result};
pub use file::FileCheckpointSaver;
pub use memory::InMemoryCheckpointSaver;
pub use session::{render_task_markdown, SessionDirCheckpointSaver};
pub use traits::CheckpointSaver;
