//! Accepted/rejected partitioning and artifact output
//!
//! After the formula has been applied, every row gets an `EmpCode_Mapped`
//! value and goes to exactly one side: accepted rows become output records
//! (`EmpCode, Date, Minutes, IsWH`), rejected rows are kept whole.

use atsync_common::{Result, SyncError};
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::config::StorageLayout;
use crate::formula::MINUTES_COLUMN;
use crate::reconcile::{Reconciler, Resolution};
use crate::table::{Cell, Table};

pub const EMP_CODE_MAPPED_COLUMN: &str = "EmpCode_Mapped";

/// Output record columns, in order
pub const OUTPUT_COLUMNS: [&str; 4] = ["EmpCode", "Date", "Minutes", "IsWH"];

/// Constant marker written into every output record
pub const IS_WH_MARKER: &str = "N";

/// One table split into its two destinations
#[derive(Debug, Clone)]
pub struct Routed {
    pub accepted: Table,
    pub rejected: Table,
    /// Rows whose embedded code disagreed with the alias table
    pub ambiguous: usize,
}

impl Routed {
    pub fn total_rows(&self) -> usize {
        self.accepted.len() + self.rejected.len()
    }
}

/// Resolve every row of `table` and split it.
///
/// `table` must already carry the `Minutes` column. The
/// `EmpCode_Mapped` column is added to it in place.
pub fn route(
    table: &mut Table,
    employee_column: &str,
    date_column: &str,
    reconciler: &Reconciler,
) -> Result<Routed> {
    let employee = table
        .column_index(employee_column)
        .ok_or_else(|| SyncError::MissingColumn(employee_column.to_string()))?;
    let date = table
        .column_index(date_column)
        .ok_or_else(|| SyncError::MissingColumn(date_column.to_string()))?;
    let minutes = table
        .column_index(MINUTES_COLUMN)
        .ok_or_else(|| SyncError::MissingColumn(MINUTES_COLUMN.to_string()))?;

    let mut ambiguous = 0;
    let mapped: Vec<Cell> = table
        .rows()
        .iter()
        .enumerate()
        .map(|(row_number, row)| {
            let resolution = reconciler.resolve_cell(&row[employee]);
            if let Resolution::Ambiguous { pattern, alias } = &resolution {
                ambiguous += 1;
                warn!(
                    row = row_number + 1,
                    raw = %row[employee],
                    pattern = %pattern,
                    alias = %alias,
                    "Identifier embeds a code that disagrees with its alias, using the embedded code"
                );
            }
            match resolution.canonical() {
                Some(id) => Cell::Text(id.to_string()),
                None => Cell::Missing,
            }
        })
        .collect();
    table.set_column(EMP_CODE_MAPPED_COLUMN, mapped);

    let mut accepted = Table::new(OUTPUT_COLUMNS.iter().map(|c| c.to_string()).collect());
    let mut rejected = Table::new(table.headers().to_vec());
    let mapped_index = table
        .column_index(EMP_CODE_MAPPED_COLUMN)
        .ok_or_else(|| SyncError::MissingColumn(EMP_CODE_MAPPED_COLUMN.to_string()))?;

    for row in table.rows() {
        match &row[mapped_index] {
            Cell::Missing => rejected.push_row(row.clone()),
            code => accepted.push_row(vec![
                code.clone(),
                row[date].clone(),
                row[minutes].clone(),
                Cell::Text(IS_WH_MARKER.to_string()),
            ]),
        }
    }

    debug!(
        accepted = accepted.len(),
        rejected = rejected.len(),
        ambiguous,
        "Routed rows"
    );
    Ok(Routed {
        accepted,
        rejected,
        ambiguous,
    })
}

/// Where the two artifacts for one source file ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenArtifacts {
    pub processed: PathBuf,
    pub reject: Option<PathBuf>,
}

/// Writes routed tables under `<processed>/<dir>/` and `<fail>/<dir>/`
#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    processed_dir: PathBuf,
    fail_dir: PathBuf,
    run_tag: Option<String>,
}

impl ArtifactWriter {
    pub fn new(storage: &StorageLayout) -> Self {
        Self {
            processed_dir: storage.processed_dir.clone(),
            fail_dir: storage.fail_dir.clone(),
            run_tag: None,
        }
    }

    /// Tag artifact names with the run start time so reruns do not
    /// overwrite earlier output
    pub fn with_run_tag(mut self, started: DateTime<Local>) -> Self {
        self.run_tag = Some(started.format("%Y%m%dT%H%M%S").to_string());
        self
    }

    /// `<stem>.<tag>.<ext>` when tagged, otherwise the source name unchanged
    pub fn artifact_name(&self, file_name: &str) -> String {
        let Some(tag) = &self.run_tag else {
            return file_name.to_string();
        };
        let path = Path::new(file_name);
        match (
            path.file_stem().and_then(|s| s.to_str()),
            path.extension().and_then(|e| e.to_str()),
        ) {
            (Some(stem), Some(ext)) => format!("{}.{}.{}", stem, tag, ext),
            _ => format!("{}.{}", file_name, tag),
        }
    }

    /// Write the reject artifact (only if there are rejects) and the
    /// processed artifact (always, possibly header-only).
    ///
    /// Both tables are staged next to their destinations first, so a failure
    /// on either side leaves neither artifact behind.
    pub fn write(
        &self,
        source_directory: &str,
        file_name: &str,
        routed: &Routed,
    ) -> Result<WrittenArtifacts> {
        let name = self.artifact_name(file_name);
        let processed = self.processed_dir.join(source_directory).join(&name);
        let reject = (!routed.rejected.is_empty()).then(|| self.fail_dir.join(source_directory).join(&name));

        let staged_reject = match &reject {
            Some(path) => Some(stage_table(&routed.rejected, path)?),
            None => None,
        };
        let staged_processed = stage_table(&routed.accepted, &processed)?;

        if let (Some(staged), Some(path)) = (staged_reject, &reject) {
            staged.persist(path).map_err(|e| e.error)?;
            info!(path = %path.display(), rows = routed.rejected.len(), "Wrote reject file");
        }

        if let Err(e) = staged_processed.persist(&processed) {
            if let Some(path) = &reject {
                if let Err(remove_err) = std::fs::remove_file(path) {
                    warn!(path = %path.display(), error = %remove_err, "Failed to remove reject file");
                }
            }
            return Err(e.error.into());
        }
        info!(path = %processed.display(), rows = routed.accepted.len(), "Wrote processed file");

        Ok(WrittenArtifacts { processed, reject })
    }
}

/// Write `table` to a temporary file in the directory of `path`
fn stage_table(table: &Table, path: &Path) -> Result<NamedTempFile> {
    let parent = path
        .parent()
        .ok_or_else(|| SyncError::Malformed(format!("no parent directory for {}", path.display())))?;
    std::fs::create_dir_all(parent)?;

    let mut staged = NamedTempFile::new_in(parent)?;
    table.to_writer(staged.as_file_mut())?;
    Ok(staged)
}
