//! atsync ingest library
//!
//! Fetches daily attendance exports from a remote file server, converts the
//! duration columns named in a per-directory formula into minutes, reconciles
//! employee identifiers to canonical `ATS<digits>` codes, and writes accepted
//! rows and rejects to separate output trees.
//!
//! # Example
//!
//! ```no_run
//! use atsync_ingest::config::IngestConfig;
//! use atsync_ingest::mapping::{load_aliases, load_rules};
//! use atsync_ingest::pipeline::Pipeline;
//! use atsync_ingest::reconcile::Reconciler;
//! use atsync_ingest::remote::LocalRemote;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = IngestConfig::from_env()?;
//!     let rules = load_rules(&config.storage.map_file())?;
//!     let reconciler = Reconciler::new(load_aliases(&config.storage.id_map_file())?)?;
//!
//!     let pipeline = Pipeline::new(config, LocalRemote::new("/mnt/exports"), rules, reconciler);
//!     let summary = pipeline.run().await?;
//!     println!("{} files processed", summary.files_processed);
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod duration;
pub mod formula;
pub mod mapping;
pub mod pipeline;
pub mod reconcile;
pub mod remote;
pub mod router;
pub mod table;
pub mod transform;

pub use atsync_common::{Result, SyncError};
