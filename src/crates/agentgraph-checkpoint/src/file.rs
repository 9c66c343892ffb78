//! Single-file-per-run checkpoint storage on local disk
//!
//! Layout:
//!
//! ```text
//! <dir>/
//!   ├─ 3f2c…a1.json     latest checkpoint of execution 3f2c…a1
//!   └─ run-nightly.json
//! ```
//!
//! Every save goes through [`write_atomic`], so the previous file stays intact until
//! the new one is fully on disk.

use crate::checkpoint::{validate_execution_id, Checkpoint};
use crate::error::{CheckpointError, Result};
use crate::fs::{read_optional, write_atomic};
use crate::traits::CheckpointSaver;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

const EXTENSION: &str = "json";

/// Stores one JSON file per execution id in a directory.
#[derive(Debug, Clone)]
pub struct FileCheckpointSaver {
    dir: PathBuf,
}

impl FileCheckpointSaver {
    /// Create a saver rooted at `dir`. The directory is created on first save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding the checkpoint files
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the checkpoint file for an execution
    pub fn path_for(&self, execution_id: &str) -> Result<PathBuf> {
        validate_execution_id(execution_id)?;
        Ok(self.dir.join(format!("{}.{}", execution_id, EXTENSION)))
    }
}

#[async_trait]
impl CheckpointSaver for FileCheckpointSaver {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        let path = self.path_for(&checkpoint.execution_id)?;
        let bytes = serde_json::to_vec_pretty(checkpoint)?;
        write_atomic(&path, &bytes).await?;
        debug!(
            execution_id = %checkpoint.execution_id,
            path = %path.display(),
            "Checkpoint written"
        );
        Ok(())
    }

    async fn load(&self, execution_id: &str) -> Result<Option<Checkpoint>> {
        let path = self.path_for(execution_id)?;
        match read_optional(&path).await? {
            Some(bytes) => {
                let checkpoint: Checkpoint = serde_json::from_slice(&bytes)?;
                if checkpoint.execution_id != execution_id {
                    return Err(CheckpointError::Invalid(format!(
                        "{} holds execution '{}'",
                        path.display(),
                        checkpoint.execution_id
                    )));
                }
                Ok(Some(checkpoint))
            }
            None => Ok(None),
        }
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                if validate_execution_id(stem).is_ok() {
                    ids.push(stem.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    async fn delete(&self, execution_id: &str) -> Result<()> {
        let path = self.path_for(execution_id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn name(&self) -> &str {
        "file"
    }
}
