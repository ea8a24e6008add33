//! Checksum calculation for exported files

use crate::domain::{CohortError, Result};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io;
use std::path::Path;

/// Calculate SHA-256 checksum of raw bytes
///
/// Returns a hex-encoded SHA-256 checksum string (64 characters).
///
/// # Examples
///
/// ```
/// use cohort_extract::core::verification::checksum::calculate_checksum_bytes;
///
/// let checksum = calculate_checksum_bytes(b"member_id_hash");
/// assert_eq!(checksum.len(), 64);
/// ```
pub fn calculate_checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    format!("{result:x}")
}

/// Calculate the SHA-256 checksum of a file, streaming its contents
///
/// # Errors
///
/// Returns an export error if the file cannot be read.
pub fn checksum_file(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(|e| {
        CohortError::Export(format!("Failed to open {} for checksum: {e}", path.display()))
    })?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher).map_err(|e| {
        CohortError::Export(format!("Failed to read {} for checksum: {e}", path.display()))
    })?;
    Ok(format!("{:x}", hasher.finalize()))
}
