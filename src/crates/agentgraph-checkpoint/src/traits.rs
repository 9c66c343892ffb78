//! The [`CheckpointSaver`] trait implemented by every persistence backend
//!
//! Backends keep exactly one checkpoint per execution id. `save` replaces the
//! previous record for the same id, so the latest snapshot is always the one a
//! resumed run starts from.
//!
//! # Implementing a backend
//!
//! ```rust,ignore
//! use agentgraph_checkpoint::{Checkpoint, CheckpointSaver, Result};
//! use async_trait::async_trait;
//!
//! struct RedisSaver { /* connection */ }
//!
//! #[async_trait]
//! impl CheckpointSaver for RedisSaver {
//!     async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
//!         let payload = serde_json::to_vec(checkpoint)?;
//!         // SET checkpoint:<execution_id> payload
//!         Ok(())
//!     }
//!
//!     async fn load(&self, execution_id: &str) -> Result<Option<Checkpoint>> {
//!         // GET checkpoint:<execution_id>
//!         Ok(None)
//!     }
//!
//!     async fn list(&self) -> Result<Vec<String>> {
//!         Ok(vec![])
//!     }
//!
//!     async fn delete(&self, execution_id: &str) -> Result<()> {
//!         Ok(())
//!     }
//! }
//! ```
//!
//! Durability is the backend's concern. File-based backends in this crate write
//! through [`write_atomic`](crate::fs::write_atomic) so a crash mid-write never
//! replaces the last good checkpoint with a truncated one.

use crate::checkpoint::Checkpoint;
use crate::error::Result;
use async_trait::async_trait;

/// Pluggable persistence for workflow checkpoints.
#[async_trait]
pub trait CheckpointSaver: Send + Sync {
    /// Persist a checkpoint, replacing any previous one for the same execution id.
    async fn save(&self, checkpoint: &Checkpoint) -> Result<()>;

    /// Load the checkpoint for an execution, or `None` if there is none.
    async fn load(&self, execution_id: &str) -> Result<Option<Checkpoint>>;

    /// Execution ids with a stored checkpoint, sorted ascending.
    async fn list(&self) -> Result<Vec<String>>;

    /// Remove the checkpoint for an execution. Deleting an unknown id is not an error.
    async fn delete(&self, execution_id: &str) -> Result<()>;

    /// Backend name used in logs.
    fn name(&self) -> &str {
        "checkpointer"
    }
}
