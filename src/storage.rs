use crate::error::{ExportError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Durable blob storage port. Implementations persist a local file under a
/// logical name and report the public URL it is readable at.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn save(&self, logical_name: &str, local_path: &Path) -> Result<()>;
    fn url_for(&self, logical_name: &str) -> String;
}

/// Filesystem-backed store for local runs and development.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn save(&self, logical_name: &str, local_path: &Path) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        let dest = self.root.join(logical_name);
        tokio::fs::copy(local_path, &dest)
            .await
            .map_err(|e| ExportError::Persist {
                name: logical_name.to_string(),
                message: e.to_string(),
            })?;
        debug!("Stored {} at {}", logical_name, dest.display());
        Ok(())
    }

    fn url_for(&self, logical_name: &str) -> String {
        format!("file://{}", self.root.join(logical_name).display())
    }
}
