//! Operator formulas over duration columns
//!
//! A mapping rule carries a free-form formula such as `ClockOut - ClockIn`
//! or `Clock Out - Clock In - Break`. Applying it to a table:
//!
//! 1. finds every referenced column name: a letter or underscore followed by
//!    letters, digits, underscores or spaces (trimmed);
//! 2. adds a `<name>_sec` column with each cell converted by
//!    [`crate::duration`], or all zeros when the table has no such column;
//! 3. rewrites the formula so each name becomes a back-quoted reference to
//!    its `_sec` column, in a single left-to-right pass;
//! 4. evaluates the rewritten formula per row with [`expr::Expr`] into
//!    `TotalSeconds`, and rounds `TotalSeconds / 60` up into `Minutes`.

pub mod expr;

use atsync_common::{Result, SyncError};
use regex::Regex;
use std::collections::HashMap;
use tracing::debug;

use crate::duration::cell_to_seconds;
use crate::table::{Cell, Table};
use expr::Expr;

/// Suffix of the per-column seconds columns
pub const SECONDS_SUFFIX: &str = "_sec";

pub const TOTAL_SECONDS_COLUMN: &str = "TotalSeconds";

pub const MINUTES_COLUMN: &str = "Minutes";

const COLUMN_NAME_PATTERN: &str = r"\b[A-Za-z_][A-Za-z0-9_ ]*\b";

/// Name of the seconds column derived from `column`
pub fn seconds_column(column: &str) -> String {
    format!("{}{}", column, SECONDS_SUFFIX)
}

/// Whole minutes for a seconds total, always rounded up
pub fn minutes_from_seconds(total_seconds: f64) -> i64 {
    (total_seconds / 60.0).ceil() as i64
}

/// A formula compiled against the column-name grammar
#[derive(Debug, Clone)]
pub struct Formula {
    source: String,
    columns: Vec<String>,
    rewritten: String,
    expr: Expr,
}

impl Formula {
    pub fn parse(source: &str) -> Result<Self> {
        let pattern = Regex::new(COLUMN_NAME_PATTERN).map_err(|e| SyncError::formula(source, e))?;

        let mut columns: Vec<String> = Vec::new();
        let rewritten = pattern.replace_all(source, |caps: &regex::Captures<'_>| {
            let name = caps[0].trim().to_string();
            let quoted = format!("`{}`", seconds_column(&name));
            if !columns.contains(&name) {
                columns.push(name);
            }
            quoted
        });
        let rewritten = rewritten.into_owned();

        let expr = Expr::parse(&rewritten).map_err(|e| SyncError::formula(source, e))?;
        debug!(formula = source, rewritten = %rewritten, "Compiled formula");

        Ok(Self {
            source: source.to_string(),
            columns,
            rewritten,
            expr,
        })
    }

    /// Referenced column names, in first-use order
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// The formula with every column replaced by its quoted `_sec` reference
    pub fn rewritten(&self) -> &str {
        &self.rewritten
    }

    /// Add the `_sec`, `TotalSeconds` and `Minutes` columns to `table`.
    ///
    /// Existing columns of the same names are overwritten, so applying a
    /// formula twice gives the same result as applying it once. On error the
    /// table may hold some derived columns and should be discarded.
    pub fn apply(&self, table: &mut Table) -> Result<()> {
        for column in &self.columns {
            let seconds: Vec<Cell> = match table.column(column) {
                Some(cells) => cells.into_iter().map(|c| Cell::from(cell_to_seconds(c))).collect(),
                None => {
                    debug!(column = %column, "Formula column absent, contributing zero");
                    vec![Cell::from(0); table.len()]
                },
            };
            table.set_column(&seconds_column(column), seconds);
        }

        let positions: HashMap<&str, usize> = self
            .expr
            .columns()
            .into_iter()
            .filter_map(|name| table.column_index(name).map(|index| (name, index)))
            .collect();

        let mut totals = Vec::with_capacity(table.len());
        let mut minutes = Vec::with_capacity(table.len());

        for (row_number, row) in table.rows().iter().enumerate() {
            let lookup = |name: &str| positions.get(name).and_then(|&i| row[i].as_number());
            let total = self
                .expr
                .eval(&lookup)
                .map_err(|e| SyncError::formula(&self.source, e))?;

            if !total.is_finite() {
                return Err(SyncError::formula(
                    &self.source,
                    format!("row {} evaluates to {}", row_number + 1, total),
                ));
            }

            totals.push(Cell::from(total));
            minutes.push(Cell::from(minutes_from_seconds(total)));
        }

        table.set_column(TOTAL_SECONDS_COLUMN, totals);
        table.set_column(MINUTES_COLUMN, minutes);
        Ok(())
    }
}
