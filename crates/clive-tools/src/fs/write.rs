//! Workspace-confined file writer.
//!
//! Auto-creates parent directories. Reports byte count and whether the file
//! was newly created or overwritten.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use crate::errors::ToolError;
use crate::fs::path::resolve_within;
use crate::traits::{FileWriter, WriteReceipt};

/// Default content cap: 10 MiB.
pub const DEFAULT_MAX_WRITE_BYTES: usize = 10 * 1024 * 1024;

/// [`FileWriter`] backed by `tokio::fs`, confined to `root`.
#[derive(Clone, Debug)]
pub struct TokioFileWriter {
    root: PathBuf,
    max_bytes: usize,
}

impl TokioFileWriter {
    /// Writer rooted at `root` with the default size cap.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_bytes: DEFAULT_MAX_WRITE_BYTES,
        }
    }

    /// Override the size cap.
    #[must_use]
    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// Root directory writes are confined to.
    pub fn root(&self) -> &std::path::Path {
        &self.root
    }
}

#[async_trait]
impl FileWriter for TokioFileWriter {
    async fn write_file(&self, path: &str, content: &str) -> Result<WriteReceipt, ToolError> {
        if content.len() > self.max_bytes {
            return Err(ToolError::TooLarge {
                size: content.len(),
                max: self.max_bytes,
            });
        }

        let resolved = resolve_within(&self.root, path)?;
        let existed = tokio::fs::try_exists(&resolved).await.unwrap_or(false);

        if let Some(parent) = resolved.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| ToolError::Io {
                    context: format!("creating directory {}", parent.display()),
                    source,
                })?;
        }

        tokio::fs::write(&resolved, content.as_bytes())
            .await
            .map_err(|source| ToolError::Io {
                context: format!("writing {}", resolved.display()),
                source,
            })?;

        debug!(path = %resolved.display(), bytes = content.len(), created = !existed, "file written");
        Ok(WriteReceipt {
            path: resolved,
            bytes_written: content.len(),
            created: !existed,
        })
    }
}
