//! FTP access to the export server
//!
//! suppaftp is blocking, so every operation runs on the blocking pool. One
//! control connection is opened up front and shared for the whole run; if
//! the server drops it, the failing operation is reported as a transfer
//! error and the next operation reconnects. A reconnect that fails is a
//! connection error and ends the run.

use async_trait::async_trait;
use atsync_common::{Result, SyncError};
use chrono::{DateTime, Utc};
use std::net::ToSocketAddrs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use suppaftp::{FtpError, FtpStream, Status};
use tracing::{debug, info, warn};

use super::{basename, RemoteSource};
use crate::config::FtpConfig;

pub struct FtpRemote {
    config: FtpConfig,
    session: Arc<Mutex<Option<FtpStream>>>,
}

impl FtpRemote {
    /// Validate credentials and open the shared session
    pub async fn connect(config: FtpConfig) -> Result<Self> {
        config.validate()?;

        let session = {
            let config = config.clone();
            tokio::task::spawn_blocking(move || open_session(&config))
                .await
                .map_err(|e| SyncError::Connection(format!("FTP connect task failed: {}", e)))??
        };

        info!(host = %config.host, port = config.port, "Connected to FTP server");
        Ok(Self {
            config,
            session: Arc::new(Mutex::new(Some(session))),
        })
    }

    /// Log out politely. Failures are only logged.
    pub async fn close(&self) {
        let session = Arc::clone(&self.session);
        let result = tokio::task::spawn_blocking(move || {
            let mut guard = match session.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.take().map(|mut stream| stream.quit())
        })
        .await;

        match result {
            Ok(Some(Err(e))) => warn!("Failed to quit FTP session gracefully: {}", e),
            Ok(_) => debug!("FTP session closed"),
            Err(e) => warn!("FTP quit task failed: {}", e),
        }
    }

    /// Run `op` against the shared session on the blocking pool
    async fn with_session<T, F>(&self, path: &str, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut FtpStream) -> std::result::Result<T, FtpError> + Send + 'static,
    {
        let session = Arc::clone(&self.session);
        let config = self.config.clone();
        let path = path.to_string();

        tokio::task::spawn_blocking(move || {
            let mut guard = session
                .lock()
                .map_err(|_| SyncError::Connection("FTP session lock poisoned".to_string()))?;

            if guard.is_none() {
                debug!(host = %config.host, "Reconnecting to FTP server");
                *guard = Some(open_session(&config)?);
            }
            let stream = guard
                .as_mut()
                .ok_or_else(|| SyncError::Connection("FTP session unavailable".to_string()))?;

            match op(stream) {
                Ok(value) => Ok(value),
                Err(FtpError::ConnectionError(e)) => {
                    warn!(path = %path, error = %e, "FTP connection dropped");
                    *guard = None;
                    Err(SyncError::transfer(&path, e))
                },
                Err(e) => Err(map_error(&path, e)),
            }
        })
        .await
        .map_err(|e| SyncError::Connection(format!("FTP task failed: {}", e)))?
    }
}

#[async_trait]
impl RemoteSource for FtpRemote {
    async fn list(&self, path: &str) -> Result<Vec<String>> {
        let target = path.to_string();
        let entries = self
            .with_session(path, move |ftp| ftp.nlst(Some(target.as_str())))
            .await?;

        let names: Vec<String> = entries
            .iter()
            .map(|entry| basename(entry).to_string())
            .filter(|name| !name.is_empty() && name != "." && name != "..")
            .collect();

        debug!(path, entries = names.len(), "Listed remote directory");
        Ok(names)
    }

    async fn stat(&self, path: &str) -> Result<DateTime<Utc>> {
        let target = path.to_string();
        let modified = self.with_session(path, move |ftp| ftp.mdtm(&target)).await?;
        // MDTM is always UTC
        Ok(modified.and_utc())
    }

    async fn fetch(&self, remote_path: &str, local_path: &Path) -> Result<u64> {
        let target = remote_path.to_string();
        let data = self
            .with_session(remote_path, move |ftp| {
                ftp.retr_as_buffer(&target).map(|cursor| cursor.into_inner())
            })
            .await?;

        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(local_path, &data).await?;

        debug!(remote = remote_path, local = %local_path.display(), bytes = data.len(), "Fetched file");
        Ok(data.len() as u64)
    }
}

fn open_session(config: &FtpConfig) -> Result<FtpStream> {
    let address = config.address();
    let connect_err = |reason: String| SyncError::Connection(format!("{}: {}", address, reason));

    let socket = address
        .to_socket_addrs()
        .map_err(|e| connect_err(e.to_string()))?
        .next()
        .ok_or_else(|| connect_err("host did not resolve".to_string()))?;

    let mut stream = FtpStream::connect_timeout(socket, Duration::from_secs(config.timeout_secs))
        .map_err(|e| connect_err(e.to_string()))?;

    // Extended passive mode works through NAT
    stream.set_mode(suppaftp::Mode::ExtendedPassive);

    debug!("Logging in as: {}", config.username);
    stream
        .login(&config.username, &config.password)
        .map_err(|e| connect_err(format!("login failed: {}", e)))?;

    stream
        .transfer_type(suppaftp::types::FileType::Binary)
        .map_err(|e| connect_err(format!("failed to set binary mode: {}", e)))?;

    Ok(stream)
}

fn map_error(path: &str, err: FtpError) -> SyncError {
    match err {
        FtpError::UnexpectedResponse(ref response) if response.status == Status::FileUnavailable => {
            SyncError::RemoteNotFound(path.to_string())
        },
        other => SyncError::transfer(path, other),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_requires_credentials() {
        let err = FtpRemote::connect(FtpConfig::default()).await.err().unwrap();
        assert!(matches!(err, SyncError::Config(_)));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_unreachable_server_is_fatal() {
        let config = FtpConfig {
            host: "127.0.0.1".to_string(),
            // Reserved port, nothing listens there
            port: 9,
            password: "secret".to_string(),
            timeout_secs: 2,
            ..FtpConfig::default()
        };

        let err = FtpRemote::connect(config).await.err().unwrap();
        assert!(matches!(err, SyncError::Connection(_)));
        assert!(err.is_fatal());
    }
}
