//! In-memory tabular files
//!
//! Attendance exports are small, headed CSV files whose columns mix numbers,
//! duration text and free text. Each field is typed on read as a [`Cell`] so
//! that every later coercion (durations, identifiers) has to say explicitly
//! what it does with numbers and blanks.

use atsync_common::{Result, SyncError};
use std::fmt;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

/// A single typed field
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Text(String),
    /// `raw` is the field exactly as read; numbers computed here have none
    Number { value: f64, raw: Option<String> },
    Missing,
}

impl Cell {
    /// Type a raw CSV field. The text is kept, so writing the cell back out
    /// reproduces the field byte for byte.
    pub fn infer(raw: &str) -> Self {
        if raw.is_empty() {
            return Cell::Missing;
        }
        match raw.trim().parse::<f64>() {
            Ok(value) if value.is_finite() => Cell::Number {
                value,
                raw: Some(raw.to_string()),
            },
            _ => Cell::Text(raw.to_string()),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Cell::Number { value, .. } => Some(*value),
            _ => None,
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Text(text) => f.write_str(text),
            Cell::Number { raw: Some(raw), .. } => f.write_str(raw),
            Cell::Number { value, raw: None } => write_number(f, *value),
            Cell::Missing => Ok(()),
        }
    }
}

fn write_number(f: &mut fmt::Formatter<'_>, value: f64) -> fmt::Result {
    // Integral values print without ".0" so minute counts stay clean
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        write!(f, "{}", value as i64)
    } else {
        write!(f, "{}", value)
    }
}

impl From<i64> for Cell {
    fn from(value: i64) -> Self {
        Cell::from(value as f64)
    }
}

impl From<f64> for Cell {
    fn from(value: f64) -> Self {
        Cell::Number { value, raw: None }
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::Text(value.to_string())
    }
}

/// Column-named, order-preserving rows of cells
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl Table {
    pub fn new(headers: Vec<String>) -> Self {
        Self {
            headers,
            rows: Vec::new(),
        }
    }

    /// Read a headed CSV file
    pub fn read_csv(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_reader(file)
    }

    /// Parse headed CSV. Short rows are padded with [`Cell::Missing`]; rows
    /// wider than the header are rejected.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);

        let headers: Vec<String> = csv_reader.headers()?.iter().map(str::to_string).collect();
        let mut table = Table::new(headers);

        for (index, record) in csv_reader.records().enumerate() {
            let record = record?;
            if record.len() > table.width() {
                return Err(SyncError::Malformed(format!(
                    "row {} has {} fields, header has {}",
                    index + 1,
                    record.len(),
                    table.width()
                )));
            }
            table.push_row(record.iter().map(Cell::infer).collect());
        }

        Ok(table)
    }

    /// Write as headed CSV
    pub fn to_writer<W: Write>(&self, writer: W) -> Result<()> {
        let mut csv_writer = csv::Writer::from_writer(writer);
        csv_writer.write_record(&self.headers)?;
        for row in &self.rows {
            csv_writer.write_record(row.iter().map(|cell| cell.to_string()))?;
        }
        csv_writer.flush()?;
        Ok(())
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn width(&self) -> usize {
        self.headers.len()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Append a row, padded with [`Cell::Missing`] (or cut) to the header width
    pub fn push_row(&mut self, mut row: Vec<Cell>) {
        row.resize(self.width(), Cell::Missing);
        self.rows.push(row);
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|header| header == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Cells of a named column, top to bottom
    pub fn column(&self, name: &str) -> Option<Vec<&Cell>> {
        let index = self.column_index(name)?;
        Some(self.rows.iter().map(|row| &row[index]).collect())
    }

    /// Replace a column in place, or append it when the name is new.
    /// `cells` is padded with [`Cell::Missing`] (or cut) to the row count.
    pub fn set_column(&mut self, name: &str, mut cells: Vec<Cell>) {
        cells.resize(self.rows.len(), Cell::Missing);

        match self.column_index(name) {
            Some(index) => {
                for (row, cell) in self.rows.iter_mut().zip(cells) {
                    row[index] = cell;
                }
            },
            None => {
                self.headers.push(name.to_string());
                for (row, cell) in self.rows.iter_mut().zip(cells) {
                    row.push(cell);
                }
            },
        }
    }

    /// New table with the same headers holding the given rows, in order
    pub fn select(&self, indices: &[usize]) -> Table {
        Table {
            headers: self.headers.clone(),
            rows: indices
                .iter()
                .filter_map(|&i| self.rows.get(i).cloned())
                .collect(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Table {
        Table::from_reader(text.as_bytes()).unwrap()
    }

    #[test]
    fn test_infer_cell_types() {
        assert_eq!(Cell::infer("01:00:00"), Cell::Text("01:00:00".into()));
        assert_eq!(Cell::infer("42").as_number(), Some(42.0));
        assert_eq!(Cell::infer(" 1.5 ").as_number(), Some(1.5));
        assert_eq!(Cell::infer(""), Cell::Missing);
        assert_eq!(Cell::infer("NaN"), Cell::Text("NaN".into()));
        assert_eq!(Cell::infer("inf"), Cell::Text("inf".into()));
        assert_eq!(Cell::infer("NA"), Cell::Text("NA".into()));
        assert_eq!(Cell::infer("jdoe@x.com"), Cell::Text("jdoe@x.com".into()));
    }

    #[test]
    fn test_read_numbers_print_as_written() {
        for raw in ["00123", "2024.10", "1e3", " 7 ", "-0", "+5"] {
            assert_eq!(Cell::infer(raw).to_string(), raw);
        }
        assert_eq!(Cell::infer("00123").as_number(), Some(123.0));
    }

    #[test]
    fn test_derived_number_display() {
        assert_eq!(Cell::from(30).to_string(), "30");
        assert_eq!(Cell::from(-1800.0).to_string(), "-1800");
        assert_eq!(Cell::from(90.5).to_string(), "90.5");
        assert_eq!(Cell::Missing.to_string(), "");
    }

    #[test]
    fn test_read_headed_csv() {
        let table = parse("Badge,Raw Date,ClockIn\nATS1,2024-03-01,08:00:00\njdoe,2024-03-01,\n");

        assert_eq!(table.headers(), ["Badge", "Raw Date", "ClockIn"]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.column_index("Raw Date"), Some(1));
        assert_eq!(table.rows()[1][2], Cell::Missing);
    }

    #[test]
    fn test_short_rows_are_padded() {
        let table = parse("A,B,C\n1\n");
        assert_eq!(table.rows()[0], vec![Cell::infer("1"), Cell::Missing, Cell::Missing]);
    }

    #[test]
    fn test_wide_rows_are_rejected() {
        let err = Table::from_reader("A,B\n1,2,3\n".as_bytes()).unwrap_err();
        assert!(matches!(err, SyncError::Malformed(_)));
    }

    #[test]
    fn test_empty_input_has_no_columns() {
        let table = parse("");
        assert_eq!(table.width(), 0);
        assert!(table.is_empty());
    }

    #[test]
    fn test_set_column_appends_then_replaces() {
        let mut table = parse("A\n1\n2\n");

        table.set_column("A_sec", vec![Cell::from(10), Cell::from(20)]);
        assert_eq!(table.headers(), ["A", "A_sec"]);
        assert_eq!(table.column("A_sec").unwrap(), vec![&Cell::from(10), &Cell::from(20)]);

        table.set_column("A_sec", vec![Cell::from(0)]);
        assert_eq!(table.width(), 2);
        assert_eq!(table.column("A_sec").unwrap(), vec![&Cell::from(0), &Cell::Missing]);
    }

    #[test]
    fn test_select_keeps_headers_and_order() {
        let table = parse("A\n1\n2\n3\n");
        let picked = table.select(&[2, 0]);

        assert_eq!(picked.headers(), table.headers());
        assert_eq!(picked.rows(), &[vec![Cell::infer("3")], vec![Cell::infer("1")]]);
    }

    #[test]
    fn test_round_trip_keeps_fields_verbatim() {
        let text = "Badge,Raw Date,Hours,Note\n00123,2024.10,08:00:00,NA\n7.50,01/03/2024,,inf\n";
        let mut out = Vec::new();
        parse(text).to_writer(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), text);
    }

    #[test]
    fn test_write_csv_quotes_and_blanks() {
        let mut table = Table::new(vec!["EmpCode".into(), "Note".into()]);
        table.push_row(vec![Cell::from("ATS1"), Cell::from("late, again")]);
        table.push_row(vec![Cell::from("ATS2"), Cell::Missing]);

        let mut out = Vec::new();
        table.to_writer(&mut out).unwrap();

        assert_eq!(
            String::from_utf8(out).unwrap(),
            "EmpCode,Note\nATS1,\"late, again\"\nATS2,\n"
        );
    }
}
