//! Combined CSV export shared by all cohorts of a run
//!
//! The file has a `cohort` column followed by the configured columns. Each
//! cohort row becomes exactly one line, so the line count always equals the
//! sum of the individual row counts. Callers serialize access, an append is
//! written with a single `write_all` and can be rolled back by truncation.

use crate::domain::ids::CohortName;
use crate::domain::table::TableData;
use crate::domain::{CohortError, Result};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Name of the leading column holding the cohort name
pub const COHORT_COLUMN: &str = "cohort";

/// Undo information for one append
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendReceipt {
    /// File length before the append
    pub previous_len: u64,

    /// Data rows written (header excluded)
    pub rows: u64,
}

/// Append-only combined export file
#[derive(Debug)]
pub struct CombinedExport {
    path: PathBuf,
    columns: Vec<String>,
    rows_written: u64,
}

impl CombinedExport {
    pub fn new(path: impl Into<PathBuf>, columns: Vec<String>) -> Self {
        Self {
            path: path.into(),
            columns,
            rows_written: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Header fields, in order
    pub fn header(&self) -> Vec<&str> {
        std::iter::once(COHORT_COLUMN)
            .chain(self.columns.iter().map(String::as_str))
            .collect()
    }

    /// Data rows appended so far in this run
    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    fn encode(&self, cohort: &CohortName, table: &TableData, with_header: bool) -> Result<Vec<u8>> {
        let indices: Vec<Option<usize>> = self
            .columns
            .iter()
            .map(|name| table.column_index(name))
            .collect();

        let mut writer = csv::Writer::from_writer(Vec::new());
        if with_header {
            writer.write_record(self.header()).map_err(csv_error)?;
        }
        for row in &table.rows {
            let mut record = Vec::with_capacity(indices.len() + 1);
            record.push(cohort.to_string());
            for idx in &indices {
                record.push(idx.map(|i| row[i].to_field()).unwrap_or_default());
            }
            writer.write_record(&record).map_err(csv_error)?;
        }
        writer
            .into_inner()
            .map_err(|e| CohortError::Export(format!("Failed to encode combined rows: {e}")))
    }

    /// Appends a cohort's rows, writing the header if the file is new
    ///
    /// # Errors
    ///
    /// Returns an export error if the rows cannot be encoded or written.
    pub fn append(&mut self, cohort: &CohortName, table: &TableData) -> Result<AppendReceipt> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| io_error(&self.path, e))?;
        let previous_len = file
            .metadata()
            .map_err(|e| io_error(&self.path, e))?
            .len();

        let bytes = self.encode(cohort, table, previous_len == 0)?;
        if let Err(e) = file.write_all(&bytes).and_then(|()| file.flush()) {
            // Do not leave a partial line behind
            let _ = file.set_len(previous_len);
            return Err(io_error(&self.path, e));
        }

        let rows = table.row_count() as u64;
        self.rows_written += rows;
        Ok(AppendReceipt { previous_len, rows })
    }

    /// Reverts an append by truncating the file to its previous length
    ///
    /// # Errors
    ///
    /// Returns an export error if the file cannot be truncated.
    pub fn rollback(&mut self, receipt: AppendReceipt) -> Result<()> {
        let file = OpenOptions::new()
            .write(true)
            .open(&self.path)
            .map_err(|e| io_error(&self.path, e))?;
        file.set_len(receipt.previous_len)
            .map_err(|e| io_error(&self.path, e))?;
        self.rows_written = self.rows_written.saturating_sub(receipt.rows);
        Ok(())
    }
}

fn csv_error(e: csv::Error) -> CohortError {
    CohortError::Export(format!("Failed to encode combined rows: {e}"))
}

fn io_error(path: &Path, e: std::io::Error) -> CohortError {
    CohortError::Export(format!("Failed to write {}: {e}", path.display()))
}

/// Counts the data rows of a combined export file
///
/// # Errors
///
/// Returns an export error if the file cannot be parsed.
pub fn count_combined_rows(path: &Path) -> Result<u64> {
    let mut reader = csv::Reader::from_path(path)
        .map_err(|e| CohortError::Export(format!("Failed to open {}: {e}", path.display())))?;
    let mut count = 0;
    for record in reader.records() {
        record.map_err(|e| CohortError::Export(format!("Failed to parse {}: {e}", path.display())))?;
        count += 1;
    }
    Ok(count)
}
