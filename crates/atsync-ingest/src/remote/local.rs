//! A directory tree standing in for the export server

use async_trait::async_trait;
use atsync_common::{Result, SyncError};
use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::RemoteSource;

/// Remote paths are resolved under `root`, so `/Portal_Data/a/APR_Clean`
/// maps to `<root>/Portal_Data/a/APR_Clean`.
#[derive(Debug, Clone)]
pub struct LocalRemote {
    root: PathBuf,
}

impl LocalRemote {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }
}

#[async_trait]
impl RemoteSource for LocalRemote {
    async fn list(&self, path: &str) -> Result<Vec<String>> {
        let mut dir = match tokio::fs::read_dir(self.resolve(path)).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(SyncError::RemoteNotFound(path.to_string()))
            },
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            if entry.file_type().await?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();

        debug!(path, entries = names.len(), "Listed local directory");
        Ok(names)
    }

    async fn stat(&self, path: &str) -> Result<DateTime<Utc>> {
        let metadata = tokio::fs::metadata(self.resolve(path))
            .await
            .map_err(|e| SyncError::transfer(path, e))?;
        let modified = metadata.modified().map_err(|e| SyncError::transfer(path, e))?;
        Ok(DateTime::<Utc>::from(modified))
    }

    async fn fetch(&self, remote_path: &str, local_path: &Path) -> Result<u64> {
        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(self.resolve(remote_path), local_path)
            .await
            .map_err(|e| SyncError::transfer(remote_path, e))
    }
}
