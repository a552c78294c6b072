//! SFTP access to the export server
//!
//! Same session discipline as the FTP client: ssh2 is blocking, so every
//! operation runs on the blocking pool against one shared session. Losing
//! the SSH transport fails only the current operation and the next one
//! reconnects; a reconnect that fails ends the run.

use async_trait::async_trait;
use atsync_common::{Result, SyncError};
use chrono::{DateTime, Utc};
use ssh2::{CheckResult, ErrorCode, KnownHostFileKind, Session, Sftp};
use std::io::Read;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::RemoteSource;
use crate::config::SftpConfig;

/// `SSH_FX_NO_SUCH_FILE`
const NO_SUCH_FILE: i32 = 2;

struct SftpSession {
    session: Session,
    sftp: Sftp,
}

enum OpError {
    Ssh(ssh2::Error),
    Io(std::io::Error),
}

impl From<ssh2::Error> for OpError {
    fn from(err: ssh2::Error) -> Self {
        OpError::Ssh(err)
    }
}

impl From<std::io::Error> for OpError {
    fn from(err: std::io::Error) -> Self {
        OpError::Io(err)
    }
}

pub struct SftpRemote {
    config: SftpConfig,
    session: Arc<Mutex<Option<SftpSession>>>,
}

impl SftpRemote {
    /// Validate credentials and open the shared session
    pub async fn connect(config: SftpConfig) -> Result<Self> {
        config.validate()?;

        let session = {
            let config = config.clone();
            tokio::task::spawn_blocking(move || open_session(&config))
                .await
                .map_err(|e| SyncError::Connection(format!("SFTP connect task failed: {}", e)))??
        };

        info!(host = %config.host, port = config.port, "Connected to SFTP server");
        Ok(Self {
            config,
            session: Arc::new(Mutex::new(Some(session))),
        })
    }

    /// Disconnect politely. Failures are only logged.
    pub async fn close(&self) {
        let session = Arc::clone(&self.session);
        let result = tokio::task::spawn_blocking(move || {
            let mut guard = match session.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard
                .take()
                .map(|open| open.session.disconnect(None, "run complete", None))
        })
        .await;

        match result {
            Ok(Some(Err(e))) => warn!("Failed to close SFTP session gracefully: {}", e),
            Ok(_) => debug!("SFTP session closed"),
            Err(e) => warn!("SFTP close task failed: {}", e),
        }
    }

    /// Run `op` against the shared session on the blocking pool
    async fn with_session<T, F>(&self, path: &str, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Sftp) -> std::result::Result<T, OpError> + Send + 'static,
    {
        let session = Arc::clone(&self.session);
        let config = self.config.clone();
        let path = path.to_string();

        tokio::task::spawn_blocking(move || {
            let mut guard = session
                .lock()
                .map_err(|_| SyncError::Connection("SFTP session lock poisoned".to_string()))?;

            if guard.is_none() {
                debug!(host = %config.host, "Reconnecting to SFTP server");
                *guard = Some(open_session(&config)?);
            }
            let open = guard
                .as_ref()
                .ok_or_else(|| SyncError::Connection("SFTP session unavailable".to_string()))?;

            match op(&open.sftp) {
                Ok(value) => Ok(value),
                Err(OpError::Ssh(e)) if matches!(e.code(), ErrorCode::SFTP(NO_SUCH_FILE)) => {
                    Err(SyncError::RemoteNotFound(path))
                },
                Err(OpError::Ssh(e)) if matches!(e.code(), ErrorCode::SFTP(_)) => {
                    Err(SyncError::transfer(&path, e))
                },
                Err(OpError::Ssh(e)) => {
                    warn!(path = %path, error = %e, "SSH transport failed");
                    *guard = None;
                    Err(SyncError::transfer(&path, e))
                },
                Err(OpError::Io(e)) => {
                    warn!(path = %path, error = %e, "SFTP read failed");
                    *guard = None;
                    Err(SyncError::transfer(&path, e))
                },
            }
        })
        .await
        .map_err(|e| SyncError::Connection(format!("SFTP task failed: {}", e)))?
    }
}

#[async_trait]
impl RemoteSource for SftpRemote {
    async fn list(&self, path: &str) -> Result<Vec<String>> {
        let target = path.to_string();
        let entries = self
            .with_session(path, move |sftp| Ok(sftp.readdir(Path::new(&target))?))
            .await?;

        let mut names: Vec<String> = entries
            .into_iter()
            .filter(|(_, stat)| !stat.is_dir())
            .filter_map(|(entry, _)| entry.file_name().and_then(|n| n.to_str()).map(str::to_string))
            .collect();
        names.sort();

        debug!(path, entries = names.len(), "Listed remote directory");
        Ok(names)
    }

    async fn stat(&self, path: &str) -> Result<DateTime<Utc>> {
        let target = path.to_string();
        let stat = self
            .with_session(path, move |sftp| Ok(sftp.stat(Path::new(&target))?))
            .await?;

        let seconds = stat
            .mtime
            .ok_or_else(|| SyncError::transfer(path, "server reported no modification time"))?;
        i64::try_from(seconds)
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .ok_or_else(|| SyncError::transfer(path, format!("modification time {} out of range", seconds)))
    }

    async fn fetch(&self, remote_path: &str, local_path: &Path) -> Result<u64> {
        let target = remote_path.to_string();
        let data = self
            .with_session(remote_path, move |sftp| {
                let mut file = sftp.open(Path::new(&target))?;
                let mut data = Vec::new();
                file.read_to_end(&mut data)?;
                Ok(data)
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

fn open_session(config: &SftpConfig) -> Result<SftpSession> {
    let address = config.address();
    let connect_err = |reason: String| SyncError::Connection(format!("{}: {}", address, reason));
    let timeout = Duration::from_secs(config.timeout_secs);

    let socket = address
        .to_socket_addrs()
        .map_err(|e| connect_err(e.to_string()))?
        .next()
        .ok_or_else(|| connect_err("host did not resolve".to_string()))?;

    let tcp = TcpStream::connect_timeout(&socket, timeout).map_err(|e| connect_err(e.to_string()))?;

    let mut session = Session::new().map_err(|e| connect_err(e.to_string()))?;
    session.set_tcp_stream(tcp);
    session.set_timeout(u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX));
    session
        .handshake()
        .map_err(|e| connect_err(format!("SSH handshake failed: {}", e)))?;

    if let Some(known_hosts) = &config.known_hosts {
        verify_host_key(&session, config, known_hosts).map_err(connect_err)?;
    }

    debug!("Logging in as: {}", config.username);
    session
        .userauth_password(&config.username, &config.password)
        .map_err(|e| connect_err(format!("login failed: {}", e)))?;

    let sftp = session
        .sftp()
        .map_err(|e| connect_err(format!("failed to start SFTP subsystem: {}", e)))?;

    Ok(SftpSession { session, sftp })
}

fn verify_host_key(session: &Session, config: &SftpConfig, known_hosts: &Path) -> std::result::Result<(), String> {
    let mut hosts = session.known_hosts().map_err(|e| e.to_string())?;
    hosts
        .read_file(known_hosts, KnownHostFileKind::OpenSSH)
        .map_err(|e| format!("cannot read {}: {}", known_hosts.display(), e))?;

    let (key, _) = session
        .host_key()
        .ok_or_else(|| "server sent no host key".to_string())?;

    match hosts.check_port(&config.host, config.port, key) {
        CheckResult::Match => Ok(()),
        CheckResult::Mismatch => Err("host key does not match known_hosts".to_string()),
        CheckResult::NotFound => Err("host is not in known_hosts".to_string()),
        CheckResult::Failure => Err("host key check failed".to_string()),
    }
}
