//! Remote file stores
//!
//! The pipeline only needs three things from wherever the exports live:
//! list a directory, read a file's modification time, and copy a file to
//! local disk. [`SftpRemote`] talks to the export server, [`FtpRemote`]
//! covers servers that only offer plain FTP, and [`LocalRemote`] serves a
//! directory tree for offline runs and tests.

pub mod ftp;
pub mod local;
pub mod sftp;

use async_trait::async_trait;
use atsync_common::Result;
use chrono::{DateTime, Utc};
use std::path::Path;

pub use ftp::FtpRemote;
pub use local::LocalRemote;
pub use sftp::SftpRemote;

#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// File names (not paths) directly inside `path`.
    ///
    /// Returns [`atsync_common::SyncError::RemoteNotFound`] when the
    /// directory does not exist.
    async fn list(&self, path: &str) -> Result<Vec<String>>;

    /// Last modification time of a remote file
    async fn stat(&self, path: &str) -> Result<DateTime<Utc>>;

    /// Copy a remote file to `local_path`, replacing any existing file.
    /// Returns the number of bytes written.
    async fn fetch(&self, remote_path: &str, local_path: &Path) -> Result<u64>;
}

/// Join a remote directory and an entry name with exactly one `/`
pub fn join_remote(directory: &str, name: &str) -> String {
    let name = name.trim_start_matches('/');
    if directory.is_empty() {
        return name.to_string();
    }
    format!("{}/{}", directory.trim_end_matches('/'), name)
}

/// Last component of a remote path. Some servers answer NLST with full paths.
pub(crate) fn basename(entry: &str) -> &str {
    let entry = entry.trim_end_matches(['\r', '\n']);
    entry.rsplit('/').next().unwrap_or(entry)
}
