//! Run orchestration
//!
//! For every mapped source directory: list the remote export folder, pick the
//! files modified exactly `lookback_days` before today, fetch them and run
//! them through [`crate::transform::process_file`]. Directories and files are
//! handled one at a time. Anything short of a fatal error is logged and
//! skipped.

use atsync_common::{Result, SyncError};
use chrono::{Days, Local, NaiveDate};
use serde::Serialize;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::IngestConfig;
use crate::mapping::{MappingRule, MappingRules};
use crate::reconcile::Reconciler;
use crate::remote::{join_remote, RemoteSource};
use crate::router::ArtifactWriter;
use crate::transform::process_file;

/// Counters for one run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub directories_scanned: usize,
    pub directories_skipped: usize,
    pub files_seen: usize,
    pub files_eligible: usize,
    pub files_processed: usize,
    pub files_failed: usize,
    pub rows_accepted: usize,
    pub rows_rejected: usize,
}

pub struct Pipeline<R: RemoteSource> {
    config: IngestConfig,
    remote: R,
    rules: MappingRules,
    reconciler: Reconciler,
}

impl<R: RemoteSource> Pipeline<R> {
    pub fn new(config: IngestConfig, remote: R, rules: MappingRules, reconciler: Reconciler) -> Self {
        Self {
            config,
            remote,
            rules,
            reconciler,
        }
    }

    /// Give the remote back, e.g. to close its session
    pub fn into_remote(self) -> R {
        self.remote
    }

    /// Run against the local calendar date
    pub async fn run(&self) -> Result<RunSummary> {
        self.run_for_date(Local::now().date_naive()).await
    }

    /// Run as if today were `today`
    pub async fn run_for_date(&self, today: NaiveDate) -> Result<RunSummary> {
        let target = self.target_date(today)?;
        let mut writer = ArtifactWriter::new(&self.config.storage);
        if self.config.run_tagged_outputs {
            writer = writer.with_run_tag(Local::now());
        }

        info!(
            %today,
            %target,
            directories = self.rules.len(),
            "Starting ingestion run"
        );

        let mut summary = RunSummary::default();
        for rule in self.rules.iter() {
            let span = info_span!("directory", dir = %rule.source_directory);
            self.process_directory(rule, target, &writer, &mut summary)
                .instrument(span)
                .await?;
        }

        info!(
            scanned = summary.directories_scanned,
            skipped = summary.directories_skipped,
            eligible = summary.files_eligible,
            processed = summary.files_processed,
            failed = summary.files_failed,
            accepted = summary.rows_accepted,
            rejected = summary.rows_rejected,
            "Ingestion run completed"
        );
        Ok(summary)
    }

    fn target_date(&self, today: NaiveDate) -> Result<NaiveDate> {
        u64::try_from(self.config.lookback_days)
            .ok()
            .and_then(|days| today.checked_sub_days(Days::new(days)))
            .ok_or_else(|| {
                SyncError::Config(format!(
                    "lookback of {} days from {} is out of range",
                    self.config.lookback_days, today
                ))
            })
    }

    async fn process_directory(
        &self,
        rule: &MappingRule,
        target: NaiveDate,
        writer: &ArtifactWriter,
        summary: &mut RunSummary,
    ) -> Result<()> {
        summary.directories_scanned += 1;
        let directory = self.config.remote.directory_path(&rule.source_directory);

        let names = match self.remote.list(&directory).await {
            Ok(names) => names,
            Err(e) if e.is_fatal() => return Err(e),
            Err(SyncError::RemoteNotFound(_)) => {
                warn!(path = %directory, "Remote directory not found, skipping");
                summary.directories_skipped += 1;
                return Ok(());
            },
            Err(e) => {
                warn!(path = %directory, error = %e, "Failed to list remote directory, skipping");
                summary.directories_skipped += 1;
                return Ok(());
            },
        };
        debug!(path = %directory, files = names.len(), "Listed remote directory");

        for name in names {
            summary.files_seen += 1;
            if !self.config.matches_extension(&name) {
                debug!(file = %name, "Ignoring file with other extension");
                continue;
            }

            let span = info_span!("file", file = %name);
            self.process_remote_file(rule, &directory, &name, target, writer, summary)
                .instrument(span)
                .await?;
        }

        Ok(())
    }

    async fn process_remote_file(
        &self,
        rule: &MappingRule,
        directory: &str,
        name: &str,
        target: NaiveDate,
        writer: &ArtifactWriter,
        summary: &mut RunSummary,
    ) -> Result<()> {
        let remote_path = join_remote(directory, name);

        let modified = match self.remote.stat(&remote_path).await {
            Ok(modified) => modified,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(path = %remote_path, error = %e, "Failed to read modification time, skipping");
                summary.files_failed += 1;
                return Ok(());
            },
        };

        let modified_on = modified.with_timezone(&Local).date_naive();
        if modified_on != target {
            debug!(%modified_on, %target, "Outside the lookback day, ignoring");
            return Ok(());
        }
        summary.files_eligible += 1;

        let local_path = self
            .config
            .storage
            .upload_path(&rule.source_directory, name);
        match self.remote.fetch(&remote_path, &local_path).await {
            Ok(bytes) => debug!(bytes, local = %local_path.display(), "Fetched"),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(path = %remote_path, error = %e, "Fetch failed, skipping");
                summary.files_failed += 1;
                return Ok(());
            },
        }

        match process_file(
            &local_path,
            &rule.source_directory,
            rule,
            &self.reconciler,
            writer,
            &self.config.date_column,
        ) {
            Ok(report) => {
                summary.files_processed += 1;
                summary.rows_accepted += report.accepted;
                summary.rows_rejected += report.rejected;
            },
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(error = %e, "Transform failed, skipping file");
                summary.files_failed += 1;
            },
        }

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::mapping::AliasTable;
    use crate::remote::LocalRemote;

    #[test]
    fn test_target_date() {
        let pipeline = Pipeline::new(
            IngestConfig::default(),
            LocalRemote::new("."),
            MappingRules::default(),
            Reconciler::new(AliasTable::default()).unwrap(),
        );
        let today = NaiveDate::from_ymd_opt(2024, 3, 6).unwrap();
        assert_eq!(
            pipeline.target_date(today).unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
        );
    }

    #[test]
    fn test_negative_lookback_is_rejected() {
        let pipeline = Pipeline::new(
            IngestConfig::default().with_lookback_days(-2),
            LocalRemote::new("."),
            MappingRules::default(),
            Reconciler::new(AliasTable::default()).unwrap(),
        );
        let today = NaiveDate::from_ymd_opt(2024, 3, 6).unwrap();
        assert!(pipeline.target_date(today).unwrap_err().is_fatal());
    }

    #[test]
    fn test_summary_serializes() {
        let summary = RunSummary {
            files_processed: 2,
            rows_accepted: 7,
            ..RunSummary::default()
        };
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["files_processed"], 2);
        assert_eq!(json["rows_accepted"], 7);
        assert_eq!(json["directories_skipped"], 0);
    }
}
