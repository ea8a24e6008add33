//! Post-write verification of cohort files

use crate::core::export::parquet::parquet_row_count;
use crate::core::verification::checksum::checksum_file;
use crate::domain::{CohortError, Result};
use std::path::Path;

/// Facts established about a written cohort file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileVerification {
    /// Rows recorded in the file footer
    pub row_count: u64,

    /// Hex-encoded SHA-256 of the file
    pub checksum_sha256: String,

    /// File size in bytes
    pub size_bytes: u64,
}

/// Verifies a written Parquet file against the expected row count
///
/// # Errors
///
/// Returns an export error if the file is unreadable or the row counts differ.
pub fn verify_cohort_file(path: &Path, expected_rows: u64) -> Result<FileVerification> {
    let row_count = parquet_row_count(path)?;
    if row_count != expected_rows {
        return Err(CohortError::Export(format!(
            "{} holds {row_count} rows, expected {expected_rows}",
            path.display()
        )));
    }

    let size_bytes = std::fs::metadata(path)
        .map_err(|e| CohortError::Export(format!("Failed to stat {}: {e}", path.display())))?
        .len();

    Ok(FileVerification {
        row_count,
        checksum_sha256: checksum_file(path)?,
        size_bytes,
    })
}
