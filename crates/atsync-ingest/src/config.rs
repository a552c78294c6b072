//! Ingestion configuration
//!
//! Everything an operator may need to change between deployments: where the
//! remote exports live, where local artifacts go, and which day's files a run
//! picks up. Values come from the environment (optionally via a `.env` file);
//! server passwords are never defaulted.

use atsync_common::{Result, SyncError};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

// ============================================================================
// Defaults
// ============================================================================

pub const DEFAULT_FTP_PORT: u16 = 21;

pub const DEFAULT_SFTP_PORT: u16 = 22;

pub const DEFAULT_FTP_TIMEOUT_SECS: u64 = 30;

pub const DEFAULT_REMOTE_BASE: &str = "/Portal_Data";

/// Conventional export subdirectory inside every source directory
pub const DEFAULT_REMOTE_SUBDIR: &str = "APR_Clean";

pub const DEFAULT_UPLOADS_DIR: &str = "media/uploads";

pub const DEFAULT_PROCESSED_DIR: &str = "media/processed";

pub const DEFAULT_FAIL_DIR: &str = "media/fail";

pub const DEFAULT_MAP_DIR: &str = "media/map";

pub const MAP_FILE_NAME: &str = "map.csv";

pub const ID_MAP_FILE_NAME: &str = "id.csv";

/// Files modified exactly this many days before today are eligible
pub const DEFAULT_LOOKBACK_DAYS: i64 = 5;

pub const DEFAULT_DATE_COLUMN: &str = "Raw Date";

pub const DEFAULT_FILE_EXTENSION: &str = "csv";

/// FTP connection settings
#[derive(Clone)]
pub struct FtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Connect timeout in seconds
    pub timeout_secs: u64,
}

impl Default for FtpConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_FTP_PORT,
            username: "anonymous".to_string(),
            password: String::new(),
            timeout_secs: DEFAULT_FTP_TIMEOUT_SECS,
        }
    }
}

impl fmt::Debug for FtpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl FtpConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Checked only when FTP is actually used
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(SyncError::Config("ATSYNC_FTP_HOST is not set".to_string()));
        }
        if self.port == 0 {
            return Err(SyncError::Config("FTP port must be greater than 0".to_string()));
        }
        if self.password.is_empty() {
            return Err(SyncError::Config("ATSYNC_FTP_PASSWORD is not set".to_string()));
        }
        if self.timeout_secs == 0 {
            return Err(SyncError::Config("FTP timeout must be greater than 0".to_string()));
        }
        Ok(())
    }
}

/// SFTP connection settings
#[derive(Clone)]
pub struct SftpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Connect and per-operation timeout in seconds
    pub timeout_secs: u64,
    /// OpenSSH `known_hosts` file the server key must appear in. Unset means
    /// the host key is not checked.
    pub known_hosts: Option<PathBuf>,
}

impl Default for SftpConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_SFTP_PORT,
            username: String::new(),
            password: String::new(),
            timeout_secs: DEFAULT_FTP_TIMEOUT_SECS,
            known_hosts: None,
        }
    }
}

impl fmt::Debug for SftpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SftpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("timeout_secs", &self.timeout_secs)
            .field("known_hosts", &self.known_hosts)
            .finish()
    }
}

impl SftpConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Checked only when SFTP is actually used
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(SyncError::Config("ATSYNC_SFTP_HOST is not set".to_string()));
        }
        if self.port == 0 {
            return Err(SyncError::Config("SFTP port must be greater than 0".to_string()));
        }
        if self.username.is_empty() {
            return Err(SyncError::Config("ATSYNC_SFTP_USER is not set".to_string()));
        }
        if self.password.is_empty() {
            return Err(SyncError::Config("ATSYNC_SFTP_PASSWORD is not set".to_string()));
        }
        if self.timeout_secs == 0 {
            return Err(SyncError::Config("SFTP timeout must be greater than 0".to_string()));
        }
        Ok(())
    }
}

/// Where source directories live on the remote side
#[derive(Debug, Clone)]
pub struct RemoteLayout {
    pub base_path: String,
    pub subdir: String,
}

impl Default for RemoteLayout {
    fn default() -> Self {
        Self {
            base_path: DEFAULT_REMOTE_BASE.to_string(),
            subdir: DEFAULT_REMOTE_SUBDIR.to_string(),
        }
    }
}

impl RemoteLayout {
    /// `<base>/<source directory>/<subdir>`
    pub fn directory_path(&self, source_directory: &str) -> String {
        let mut path = self.base_path.trim_end_matches('/').to_string();
        for part in [source_directory, self.subdir.as_str()] {
            let part = part.trim_matches('/');
            if !part.is_empty() {
                path.push('/');
                path.push_str(part);
            }
        }
        path
    }
}

/// Local storage roots
#[derive(Debug, Clone)]
pub struct StorageLayout {
    pub uploads_dir: PathBuf,
    pub processed_dir: PathBuf,
    pub fail_dir: PathBuf,
    pub map_dir: PathBuf,
}

impl Default for StorageLayout {
    fn default() -> Self {
        Self {
            uploads_dir: PathBuf::from(DEFAULT_UPLOADS_DIR),
            processed_dir: PathBuf::from(DEFAULT_PROCESSED_DIR),
            fail_dir: PathBuf::from(DEFAULT_FAIL_DIR),
            map_dir: PathBuf::from(DEFAULT_MAP_DIR),
        }
    }
}

impl StorageLayout {
    /// All four roots under one directory, with the default names
    pub fn under(root: &Path) -> Self {
        Self {
            uploads_dir: root.join("uploads"),
            processed_dir: root.join("processed"),
            fail_dir: root.join("fail"),
            map_dir: root.join("map"),
        }
    }

    pub fn map_file(&self) -> PathBuf {
        self.map_dir.join(MAP_FILE_NAME)
    }

    pub fn id_map_file(&self) -> PathBuf {
        self.map_dir.join(ID_MAP_FILE_NAME)
    }

    /// Local landing path for a fetched file
    pub fn upload_path(&self, source_directory: &str, file_name: &str) -> PathBuf {
        self.uploads_dir.join(source_directory).join(file_name)
    }
}

/// Main ingestion configuration
#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub sftp: SftpConfig,
    pub ftp: FtpConfig,
    pub remote: RemoteLayout,
    pub storage: StorageLayout,
    /// Days between today and the modification date of eligible files
    pub lookback_days: i64,
    /// Column copied verbatim into the output `Date` field
    pub date_column: String,
    /// Extension (without the dot) of files to pick up
    pub file_extension: String,
    /// Suffix artifact names with the run timestamp instead of overwriting
    pub run_tagged_outputs: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            sftp: SftpConfig::default(),
            ftp: FtpConfig::default(),
            remote: RemoteLayout::default(),
            storage: StorageLayout::default(),
            lookback_days: DEFAULT_LOOKBACK_DAYS,
            date_column: DEFAULT_DATE_COLUMN.to_string(),
            file_extension: DEFAULT_FILE_EXTENSION.to_string(),
            run_tagged_outputs: false,
        }
    }
}

impl IngestConfig {
    /// Load configuration from environment variables (and `.env`, if present)
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        let config = Self {
            sftp: SftpConfig {
                host: env_string("ATSYNC_SFTP_HOST", &defaults.sftp.host),
                port: env_parse("ATSYNC_SFTP_PORT", defaults.sftp.port)?,
                username: env_string("ATSYNC_SFTP_USER", &defaults.sftp.username),
                password: env_string("ATSYNC_SFTP_PASSWORD", ""),
                timeout_secs: env_parse("ATSYNC_SFTP_TIMEOUT_SECS", defaults.sftp.timeout_secs)?,
                known_hosts: std::env::var("ATSYNC_SFTP_KNOWN_HOSTS").ok().map(PathBuf::from),
            },
            ftp: FtpConfig {
                host: env_string("ATSYNC_FTP_HOST", &defaults.ftp.host),
                port: env_parse("ATSYNC_FTP_PORT", defaults.ftp.port)?,
                username: env_string("ATSYNC_FTP_USER", &defaults.ftp.username),
                password: env_string("ATSYNC_FTP_PASSWORD", ""),
                timeout_secs: env_parse("ATSYNC_FTP_TIMEOUT_SECS", defaults.ftp.timeout_secs)?,
            },
            remote: RemoteLayout {
                base_path: env_string("ATSYNC_REMOTE_BASE", &defaults.remote.base_path),
                subdir: env_string("ATSYNC_REMOTE_SUBDIR", &defaults.remote.subdir),
            },
            storage: StorageLayout {
                uploads_dir: env_path("ATSYNC_UPLOADS_DIR", &defaults.storage.uploads_dir),
                processed_dir: env_path("ATSYNC_PROCESSED_DIR", &defaults.storage.processed_dir),
                fail_dir: env_path("ATSYNC_FAIL_DIR", &defaults.storage.fail_dir),
                map_dir: env_path("ATSYNC_MAP_DIR", &defaults.storage.map_dir),
            },
            lookback_days: env_parse("ATSYNC_LOOKBACK_DAYS", defaults.lookback_days)?,
            date_column: env_string("ATSYNC_DATE_COLUMN", &defaults.date_column),
            file_extension: env_string("ATSYNC_FILE_EXTENSION", &defaults.file_extension),
            run_tagged_outputs: env_parse("ATSYNC_RUN_TAGGED_OUTPUTS", defaults.run_tagged_outputs)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate everything except server credentials, which are checked on
    /// connect (see [`SftpConfig::validate`] and [`FtpConfig::validate`])
    pub fn validate(&self) -> Result<()> {
        if self.lookback_days < 0 {
            return Err(SyncError::Config(format!(
                "lookback days must not be negative (got {})",
                self.lookback_days
            )));
        }
        if self.file_extension.trim_start_matches('.').is_empty() {
            return Err(SyncError::Config("file extension cannot be empty".to_string()));
        }
        if self.date_column.is_empty() {
            return Err(SyncError::Config("date column cannot be empty".to_string()));
        }
        Ok(())
    }

    pub fn with_remote(mut self, remote: RemoteLayout) -> Self {
        self.remote = remote;
        self
    }

    pub fn with_storage(mut self, storage: StorageLayout) -> Self {
        self.storage = storage;
        self
    }

    pub fn with_lookback_days(mut self, days: i64) -> Self {
        self.lookback_days = days;
        self
    }

    pub fn with_date_column(mut self, column: impl Into<String>) -> Self {
        self.date_column = column.into();
        self
    }

    pub fn with_run_tagged_outputs(mut self, enabled: bool) -> Self {
        self.run_tagged_outputs = enabled;
        self
    }

    /// Whether a remote file name has the configured extension. A bare
    /// `.csv` is a hidden file with no name and is not picked up.
    pub fn matches_extension(&self, file_name: &str) -> bool {
        let extension = self.file_extension.trim_start_matches('.');
        file_name
            .strip_suffix(extension)
            .is_some_and(|stem| stem.ends_with('.') && stem.len() > 1)
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_path(key: &str, default: &Path) -> PathBuf {
    std::env::var(key)
        .map(PathBuf::from)
        .unwrap_or_else(|_| default.to_path_buf())
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| SyncError::Config(format!("{}={:?}: {}", key, raw, e))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = IngestConfig::default();
        assert_eq!(config.lookback_days, 5);
        assert_eq!(config.date_column, "Raw Date");
        assert_eq!(config.remote.subdir, "APR_Clean");
        assert_eq!(config.storage.map_file(), PathBuf::from("media/map/map.csv"));
        assert_eq!(config.storage.id_map_file(), PathBuf::from("media/map/id.csv"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_remote_directory_path() {
        let layout = RemoteLayout {
            base_path: "/home/portal/Portal_Data/".to_string(),
            subdir: "APR_Clean".to_string(),
        };
        assert_eq!(
            layout.directory_path("plant-a"),
            "/home/portal/Portal_Data/plant-a/APR_Clean"
        );

        let flat = RemoteLayout {
            base_path: "exports".to_string(),
            subdir: String::new(),
        };
        assert_eq!(flat.directory_path("plant-a"), "exports/plant-a");
    }

    #[test]
    fn test_storage_under_root() {
        let storage = StorageLayout::under(Path::new("/srv/atsync"));
        assert_eq!(storage.fail_dir, PathBuf::from("/srv/atsync/fail"));
        assert_eq!(
            storage.upload_path("plant-a", "day.csv"),
            PathBuf::from("/srv/atsync/uploads/plant-a/day.csv")
        );
    }

    #[test]
    fn test_extension_filter() {
        let config = IngestConfig::default();
        assert!(config.matches_extension("2024-03-01.csv"));
        assert!(!config.matches_extension("2024-03-01.csv.bak"));
        assert!(!config.matches_extension("2024-03-01.CSV"));
        assert!(!config.matches_extension("notes.txt"));
        assert!(!config.matches_extension("csv"));
        // Dotfile with an empty stem
        assert!(!config.matches_extension(".csv"));
    }

    #[test]
    fn test_validation() {
        assert!(IngestConfig::default().with_lookback_days(-1).validate().is_err());
        assert!(IngestConfig::default().with_date_column("").validate().is_err());

        let ftp = FtpConfig::default();
        assert!(ftp.validate().is_err());

        let ftp = FtpConfig {
            host: "files.example.com".to_string(),
            password: "secret".to_string(),
            ..FtpConfig::default()
        };
        assert!(ftp.validate().is_ok());
        assert_eq!(ftp.address(), "files.example.com:21");
    }

    #[test]
    fn test_sftp_validation() {
        let sftp = SftpConfig::default();
        assert!(matches!(sftp.validate(), Err(SyncError::Config(_))));

        let sftp = SftpConfig {
            host: "files.example.com".to_string(),
            username: "exports".to_string(),
            ..SftpConfig::default()
        };
        let err = sftp.validate().unwrap_err();
        assert!(err.to_string().contains("ATSYNC_SFTP_PASSWORD"));

        let sftp = SftpConfig {
            password: "secret".to_string(),
            ..sftp
        };
        assert!(sftp.validate().is_ok());
        assert_eq!(sftp.address(), "files.example.com:22");
    }

    #[test]
    fn test_debug_redacts_password() {
        let ftp = FtpConfig {
            password: "hunter2".to_string(),
            ..FtpConfig::default()
        };
        let printed = format!("{:?}", ftp);
        assert!(!printed.contains("hunter2"));
        assert!(printed.contains("<redacted>"));

        let sftp = SftpConfig {
            password: "hunter2".to_string(),
            ..SftpConfig::default()
        };
        assert!(!format!("{:?}", sftp).contains("hunter2"));
    }
}
