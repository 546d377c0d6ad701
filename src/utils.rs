use crate::errors::{Result, StackError};
use serde::Serialize;
use std::fs;
use std::path::Path;

/// Atomic file operations to prevent corruption during writes
pub mod atomic_file {
    use super::*;

    /// Write JSON data to a file atomically using a temporary file + rename strategy
    pub fn write_json<T: Serialize>(path: &Path, data: &T) -> Result<()> {
        let mut content = serde_json::to_string_pretty(data)
            .map_err(|e| StackError::config(format!("Failed to serialize data: {e}")))?;
        content.push('\n');
        write_string(path, &content)
    }

    /// Write string content to a file atomically
    pub fn write_string(path: &Path, content: &str) -> Result<()> {
        // Same directory as the target, so the rename stays on one filesystem.
        let temp_path = path.with_extension(format!("tmp.{}", std::process::id()));

        fs::write(&temp_path, content)
            .map_err(|e| StackError::config(format!("Failed to write temporary file: {e}")))?;

        fs::rename(&temp_path, path).map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            StackError::config(format!("Failed to finalize file write: {e}"))
        })
    }
}

/// Async utilities to prevent blocking operations
pub mod async_ops {
    use super::*;
    use tokio::task;

    /// Run blocking git and storage work on the blocking thread pool
    pub async fn run_blocking<F, R>(operation: F) -> Result<R>
    where
        F: FnOnce() -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        task::spawn_blocking(operation)
            .await
            .map_err(|e| StackError::config(format!("Background task failed: {e}")))?
    }
}
