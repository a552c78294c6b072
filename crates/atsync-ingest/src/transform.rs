//! One source file through formula, reconciliation and routing
//!
//! Every check that can fail a file runs before anything is written, so a
//! failed file leaves no partial artifacts behind.

use atsync_common::{Result, SyncError};
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};

use crate::formula::Formula;
use crate::mapping::MappingRule;
use crate::reconcile::Reconciler;
use crate::router::{route, ArtifactWriter, Routed};
use crate::table::Table;

/// Outcome of one processed file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileReport {
    pub accepted: usize,
    pub rejected: usize,
    pub ambiguous: usize,
    pub processed_path: PathBuf,
    pub reject_path: Option<PathBuf>,
}

/// Apply `rule` to an in-memory table and split the result
pub fn transform_table(
    mut table: Table,
    rule: &MappingRule,
    reconciler: &Reconciler,
    date_column: &str,
) -> Result<Routed> {
    for required in [rule.employee_column.as_str(), date_column] {
        if !table.has_column(required) {
            return Err(SyncError::MissingColumn(required.to_string()));
        }
    }

    let formula = Formula::parse(&rule.formula)?;
    formula.apply(&mut table)?;

    route(&mut table, &rule.employee_column, date_column, reconciler)
}

/// Read a fetched file, transform it and write both artifacts
#[instrument(skip(rule, reconciler, writer), fields(file = %path.display()))]
pub fn process_file(
    path: &Path,
    source_directory: &str,
    rule: &MappingRule,
    reconciler: &Reconciler,
    writer: &ArtifactWriter,
    date_column: &str,
) -> Result<FileReport> {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| SyncError::Malformed(format!("no file name in {}", path.display())))?;

    let table = Table::read_csv(path)?;
    debug!(rows = table.len(), columns = table.width(), "Read source file");

    let routed = transform_table(table, rule, reconciler, date_column)?;
    let written = writer.write(source_directory, file_name, &routed)?;

    info!(
        accepted = routed.accepted.len(),
        rejected = routed.rejected.len(),
        "Processed file"
    );
    Ok(FileReport {
        accepted: routed.accepted.len(),
        rejected: routed.rejected.len(),
        ambiguous: routed.ambiguous,
        processed_path: written.processed,
        reject_path: written.reject,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::StorageLayout;
    use crate::mapping::AliasTable;
    use tempfile::TempDir;

    fn rule(formula: &str) -> MappingRule {
        MappingRule {
            source_directory: "plant-a".to_string(),
            employee_column: "Badge".to_string(),
            formula: formula.to_string(),
        }
    }

    fn reconciler() -> Reconciler {
        let aliases: AliasTable = [("jdoe@x.com".to_string(), "ATS9999".to_string())]
            .into_iter()
            .collect();
        Reconciler::new(aliases).unwrap()
    }

    const SOURCE: &str = "Badge,Raw Date,ClockIn,ClockOut\n\
                          jdoe@x.com,2024-03-01,08:00:00,16:30:10\n\
                          stranger,2024-03-01,09:00:00,10:00:00\n";

    #[test]
    fn test_process_file_writes_both_artifacts() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("uploads/plant-a/day.csv");
        std::fs::create_dir_all(source.parent().unwrap()).unwrap();
        std::fs::write(&source, SOURCE).unwrap();

        let writer = ArtifactWriter::new(&StorageLayout::under(dir.path()));
        let report = process_file(
            &source,
            "plant-a",
            &rule("ClockOut - ClockIn"),
            &reconciler(),
            &writer,
            "Raw Date",
        )
        .unwrap();

        assert_eq!((report.accepted, report.rejected), (1, 1));
        assert_eq!(
            std::fs::read_to_string(&report.processed_path).unwrap(),
            "EmpCode,Date,Minutes,IsWH\nATS9999,2024-03-01,511,N\n"
        );
        assert_eq!(
            std::fs::read_to_string(report.reject_path.unwrap()).unwrap(),
            "Badge,Raw Date,ClockIn,ClockOut,ClockOut_sec,ClockIn_sec,TotalSeconds,Minutes,EmpCode_Mapped\n\
             stranger,2024-03-01,09:00:00,10:00:00,36000,32400,3600,60,\n"
        );
    }

    #[test]
    fn test_numeric_looking_fields_pass_through_verbatim() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("day.csv");
        std::fs::write(
            &source,
            "Badge,Raw Date,ClockIn,ClockOut\n\
             00123,2024.10,08:00:00,09:00:00\n\
             0042,2024.10,1e3,09:00:00\n",
        )
        .unwrap();

        let aliases: AliasTable = [("00123".to_string(), "ATS5".to_string())].into_iter().collect();
        let writer = ArtifactWriter::new(&StorageLayout::under(dir.path()));
        let report = process_file(
            &source,
            "plant-a",
            &rule("ClockOut - ClockIn"),
            &Reconciler::new(aliases).unwrap(),
            &writer,
            "Raw Date",
        )
        .unwrap();

        assert_eq!((report.accepted, report.rejected), (1, 1));
        assert_eq!(
            std::fs::read_to_string(&report.processed_path).unwrap(),
            "EmpCode,Date,Minutes,IsWH\nATS5,2024.10,60,N\n"
        );
        assert_eq!(
            std::fs::read_to_string(report.reject_path.unwrap()).unwrap(),
            "Badge,Raw Date,ClockIn,ClockOut,ClockOut_sec,ClockIn_sec,TotalSeconds,Minutes,EmpCode_Mapped\n\
             0042,2024.10,1e3,09:00:00,32400,0,32400,540,\n"
        );
    }

    #[test]
    fn test_missing_employee_column_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("day.csv");
        std::fs::write(&source, "Login,Raw Date,ClockIn,ClockOut\nats1,d,08:00:00,09:00:00\n").unwrap();

        let writer = ArtifactWriter::new(&StorageLayout::under(dir.path()));
        let err = process_file(&source, "plant-a", &rule("ClockOut - ClockIn"), &reconciler(), &writer, "Raw Date")
            .unwrap_err();

        assert!(matches!(err, SyncError::MissingColumn(ref c) if c == "Badge"));
        assert!(!dir.path().join("processed").exists());
        assert!(!dir.path().join("fail").exists());
    }

    #[test]
    fn test_bad_formula_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("day.csv");
        std::fs::write(&source, SOURCE).unwrap();

        let writer = ArtifactWriter::new(&StorageLayout::under(dir.path()));
        let err = process_file(&source, "plant-a", &rule("ClockOut -"), &reconciler(), &writer, "Raw Date")
            .unwrap_err();

        assert!(matches!(err, SyncError::Formula { .. }));
        assert!(!dir.path().join("processed").exists());
    }

    #[test]
    fn test_transform_table_without_date_column() {
        let table = Table::from_reader("Badge,ClockIn\nats1,08:00:00\n".as_bytes()).unwrap();
        let err = transform_table(table, &rule("ClockIn"), &reconciler(), "Raw Date").unwrap_err();
        assert!(matches!(err, SyncError::MissingColumn(ref c) if c == "Raw Date"));
    }
}
