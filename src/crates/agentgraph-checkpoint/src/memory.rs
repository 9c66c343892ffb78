//! In-memory checkpoint storage for development and testing
//!
//! [`InMemoryCheckpointSaver`] keeps the latest checkpoint of every execution in a
//! `tokio::sync::RwLock<HashMap>`. Nothing survives a process restart, which makes it
//! the right backend for tests and ephemeral runs and the wrong one for anything that
//! must be resumed after a crash.
//!
//! ```rust
//! use agentgraph_checkpoint::{Checkpoint, CheckpointSaver, InMemoryCheckpointSaver};
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let saver = InMemoryCheckpointSaver::new();
//! saver.save(&Checkpoint::new("run-1", json!({"iteration": 1}))).await?;
//!
//! let loaded = saver.load("run-1").await?.expect("saved above");
//! assert_eq!(loaded.state["iteration"], 1);
//! # Ok(())
//! # }
//! ```

use crate::{checkpoint::Checkpoint, error::Result, traits::CheckpointSaver};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Thread-safe in-memory checkpoint storage
type CheckpointStorage = Arc<RwLock<HashMap<String, Checkpoint>>>;

/// In-memory checkpoint saver implementation
///
/// Cloning the saver shares the underlying map, so a test can hand one clone to the
/// executor and inspect another.
#[derive(Debug, Clone)]
pub struct InMemoryCheckpointSaver {
    storage: CheckpointStorage,
}

impl InMemoryCheckpointSaver {
    /// Create a new in-memory checkpoint saver
    pub fn new() -> Self {
        Self {
            storage: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Number of executions with a stored checkpoint
    pub async fn checkpoint_count(&self) -> usize {
        self.storage.read().await.len()
    }

    /// Clear all checkpoints (useful for testing)
    pub async fn clear(&self) {
        self.storage.write().await.clear();
    }
}

impl Default for InMemoryCheckpointSaver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CheckpointSaver for InMemoryCheckpointSaver {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        self.storage
            .write()
            .await
            .insert(checkpoint.execution_id.clone(), checkpoint.clone());
        Ok(())
    }

    async fn load(&self, execution_id: &str) -> Result<Option<Checkpoint>> {
        Ok(self.storage.read().await.get(execution_id).cloned())
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self.storage.read().await.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    async fn delete(&self, execution_id: &str) -> Result<()> {
        self.storage.write().await.remove(execution_id);
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
