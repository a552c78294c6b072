//! atsync-ingest - attendance export ingestion tool

use anyhow::Result;
use atsync_common::logging::{init_logging, LogConfig, LogLevel};
use atsync_common::SyncError;
use atsync_ingest::config::IngestConfig;
use atsync_ingest::mapping::{load_aliases, load_rules, MappingRules};
use atsync_ingest::pipeline::{Pipeline, RunSummary};
use atsync_ingest::reconcile::Reconciler;
use atsync_ingest::remote::{FtpRemote, LocalRemote, SftpRemote};
use atsync_ingest::router::ArtifactWriter;
use atsync_ingest::transform::process_file;
use chrono::{Local, NaiveDate};
use clap::{Parser, ValueEnum};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "atsync-ingest")]
#[command(author, version, about = "Attendance export ingestion tool")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Parser, Debug)]
enum Command {
    /// Fetch and process every mapped source directory
    Run {
        /// Process files modified this many days before today
        #[arg(long)]
        lookback_days: Option<i64>,

        /// Treat this date as today (YYYY-MM-DD)
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Where to read the exports from
        #[arg(long, value_enum, default_value_t = SourceKind::Sftp)]
        source: SourceKind,

        /// Root directory for `--source local`
        #[arg(long, required_if_eq("source", "local"))]
        local_root: Option<PathBuf>,

        /// Write the run summary as JSON to this file
        #[arg(long)]
        summary: Option<PathBuf>,
    },

    /// Process one local file with the rule of a source directory
    Transform {
        /// Source directory whose mapping rule applies
        #[arg(long)]
        dir: String,

        /// File to process
        #[arg(long)]
        file: PathBuf,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum SourceKind {
    Sftp,
    Ftp,
    Local,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("atsync-ingest")
        .build()
        .merge_env()?;

    let _guard = init_logging(&log_config)?;

    let result = match cli.command {
        Command::Run {
            lookback_days,
            date,
            source,
            local_root,
            summary,
        } => run(lookback_days, date, source, local_root, summary).await,
        Command::Transform { dir, file } => transform(&dir, &file),
    };

    match result {
        Ok(()) => Ok(()),
        Err(e) if e.is_fatal() => {
            error!(error = %e, "Run aborted");
            Err(e.into())
        },
        Err(e) => {
            // Recoverable errors are reported, not surfaced in the exit status
            error!(error = %e, "Processing failed");
            Ok(())
        },
    }
}

/// Mapping tables are loaded before any network activity
fn load_tables(config: &IngestConfig) -> atsync_common::Result<(MappingRules, Reconciler)> {
    let rules = load_rules(&config.storage.map_file())?;
    let aliases = load_aliases(&config.storage.id_map_file())?;
    Ok((rules, Reconciler::new(aliases)?))
}

async fn run(
    lookback_days: Option<i64>,
    date: Option<NaiveDate>,
    source: SourceKind,
    local_root: Option<PathBuf>,
    summary_path: Option<PathBuf>,
) -> atsync_common::Result<()> {
    let mut config = IngestConfig::from_env()?;
    if let Some(days) = lookback_days {
        config = config.with_lookback_days(days);
        config.validate()?;
    }
    let today = date.unwrap_or_else(|| Local::now().date_naive());

    let (rules, reconciler) = load_tables(&config)?;

    let summary = match source {
        SourceKind::Sftp => {
            let remote = SftpRemote::connect(config.sftp.clone()).await?;
            let pipeline = Pipeline::new(config, remote, rules, reconciler);
            let result = pipeline.run_for_date(today).await;
            pipeline.into_remote().close().await;
            result?
        },
        SourceKind::Ftp => {
            let remote = FtpRemote::connect(config.ftp.clone()).await?;
            let pipeline = Pipeline::new(config, remote, rules, reconciler);
            let result = pipeline.run_for_date(today).await;
            pipeline.into_remote().close().await;
            result?
        },
        SourceKind::Local => {
            let root = local_root.ok_or_else(|| {
                SyncError::Config("--local-root is required for --source local".to_string())
            })?;
            info!(root = %root.display(), "Reading exports from local directory");
            Pipeline::new(config, LocalRemote::new(root), rules, reconciler)
                .run_for_date(today)
                .await?
        },
    };

    if let Some(path) = summary_path {
        write_summary(&path, &summary)?;
    }
    Ok(())
}

fn write_summary(path: &Path, summary: &RunSummary) -> atsync_common::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_vec_pretty(summary)?)?;
    info!(path = %path.display(), "Wrote run summary");
    Ok(())
}

fn transform(dir: &str, file: &Path) -> atsync_common::Result<()> {
    let config = IngestConfig::from_env()?;
    let (rules, reconciler) = load_tables(&config)?;

    let rule = rules
        .get(dir)
        .ok_or_else(|| SyncError::Config(format!("no mapping rule for directory '{}'", dir)))?;

    let mut writer = ArtifactWriter::new(&config.storage);
    if config.run_tagged_outputs {
        writer = writer.with_run_tag(Local::now());
    }

    let report = process_file(file, dir, rule, &reconciler, &writer, &config.date_column)?;
    if report.ambiguous > 0 {
        warn!(rows = report.ambiguous, "Some identifiers were ambiguous");
    }
    info!(
        accepted = report.accepted,
        rejected = report.rejected,
        processed = %report.processed_path.display(),
        "Transform complete"
    );
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_local_source_requires_root() {
        let parsed = Cli::try_parse_from(["atsync-ingest", "run", "--source", "local"]);
        assert!(parsed.is_err());

        let parsed = Cli::try_parse_from([
            "atsync-ingest",
            "run",
            "--source",
            "local",
            "--local-root",
            "/mnt/exports",
            "--date",
            "2024-03-06",
        ]);
        assert!(parsed.is_ok());
    }

    #[test]
    fn test_sftp_is_the_default_source() {
        let parsed = Cli::try_parse_from(["atsync-ingest", "run"]).unwrap();
        assert!(matches!(parsed.command, Command::Run { source: SourceKind::Sftp, .. }));

        let parsed = Cli::try_parse_from(["atsync-ingest", "run", "--source", "ftp"]).unwrap();
        assert!(matches!(parsed.command, Command::Run { source: SourceKind::Ftp, .. }));
    }
}
