//! Error types for atsync
//!
//! Variants are grouped by how far a failure reaches. Fatal errors stop the
//! run before (or instead of) any further remote work; everything else is
//! logged and the orchestrator moves on to the next directory or file.

use thiserror::Error;

/// Result type alias for atsync operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// Main error type for atsync
#[derive(Error, Debug)]
pub enum SyncError {
    // ------------------------------------------------------------------
    // Fatal to the run
    // ------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Mapping file not found: {0}")]
    MappingNotFound(String),

    #[error("Remote connection failed: {0}")]
    Connection(String),

    // ------------------------------------------------------------------
    // Skips one source directory
    // ------------------------------------------------------------------
    #[error("Remote path not found: {0}")]
    RemoteNotFound(String),

    // ------------------------------------------------------------------
    // Skips one file
    // ------------------------------------------------------------------
    #[error("Transfer failed for {path}: {reason}")]
    Transfer { path: String, reason: String },

    #[error("Column '{0}' not found")]
    MissingColumn(String),

    #[error("Formula '{formula}' could not be applied: {reason}")]
    Formula { formula: String, reason: String },

    #[error("Malformed input: {0}")]
    Malformed(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SyncError {
    /// Build a [`SyncError::Formula`] from anything printable.
    pub fn formula(formula: &str, reason: impl std::fmt::Display) -> Self {
        SyncError::Formula {
            formula: formula.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Build a [`SyncError::Transfer`] from anything printable.
    pub fn transfer(path: &str, reason: impl std::fmt::Display) -> Self {
        SyncError::Transfer {
            path: path.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Whether this error must end the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::Config(_) | SyncError::MappingNotFound(_) | SyncError::Connection(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_tiers() {
        assert!(SyncError::Config("bad port".into()).is_fatal());
        assert!(SyncError::MappingNotFound("media/map/map.csv".into()).is_fatal());
        assert!(SyncError::Connection("login refused".into()).is_fatal());

        assert!(!SyncError::RemoteNotFound("/data/x".into()).is_fatal());
        assert!(!SyncError::transfer("/data/x/a.csv", "timed out").is_fatal());
        assert!(!SyncError::MissingColumn("Badge".into()).is_fatal());
        assert!(!SyncError::formula("A +", "unexpected end").is_fatal());
    }

    #[test]
    fn test_messages_carry_context() {
        let err = SyncError::formula("ClockOut - ", "unexpected end of formula");
        assert_eq!(
            err.to_string(),
            "Formula 'ClockOut - ' could not be applied: unexpected end of formula"
        );

        let err = SyncError::transfer("/base/a.csv", "550 not found");
        assert_eq!(err.to_string(), "Transfer failed for /base/a.csv: 550 not found");
    }
}
