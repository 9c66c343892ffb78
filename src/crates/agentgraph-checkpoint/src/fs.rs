//! Crash-safe file writes shared by the file-backed savers

use crate::error::{CheckpointError, Result};
use std::path::Path;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Write `bytes` to `path` via a temporary sibling file and a rename.
///
/// The temporary file lives in the same directory as the target so the rename
/// stays on one filesystem. Readers observe either the previous contents or the
/// new contents, never a partial write.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| CheckpointError::Storage(format!("{} has no parent", path.display())))?;
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| CheckpointError::Storage(format!("{} has no file name", path.display())))?;

    tokio::fs::create_dir_all(parent).await?;

    let tmp = parent.join(format!(".{}.{}.tmp", file_name, Uuid::new_v4().simple()));
    let written = async {
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, path).await
    }
    .await;

    if let Err(e) = written {
        // Best effort: the target was never touched.
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

/// Read a file, mapping "not found" to `None`.
pub async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}
