//! Verification of exported cohort files
//!
//! Every individual file is checked after it is written: the row count in
//! its footer must match the extracted result, and its SHA-256 is recorded
//! in the cohort's metadata record.

pub mod checksum;
pub mod verify;

pub use checksum::{calculate_checksum_bytes, checksum_file};
pub use verify::{verify_cohort_file, FileVerification};
