//! atsync Common Library
//!
//! Error taxonomy and logging bootstrap shared by the atsync crates.
//!
//! # Overview
//!
//! - **Error Handling**: [`SyncError`] classifies every failure by the scope it
//!   aborts (whole run, one source directory, one file).
//! - **Logging**: [`logging`] wires `tracing` to console and/or rolling files.
//!
//! # Example
//!
//! ```no_run
//! use atsync_common::{Result, SyncError};
//!
//! fn require_column(headers: &[String], name: &str) -> Result<usize> {
//!     headers
//!         .iter()
//!         .position(|h| h == name)
//!         .ok_or_else(|| SyncError::MissingColumn(name.to_string()))
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{Result, SyncError};
