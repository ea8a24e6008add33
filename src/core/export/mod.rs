//! Cohort output writing
//!
//! - [`parquet`] converts result sets to and from Parquet files
//! - [`combined`] maintains the combined CSV shared by all cohorts of a run
//! - [`exporter`] stages, verifies and commits each cohort's output

pub mod combined;
pub mod exporter;
pub mod parquet;

pub use combined::{count_combined_rows, CombinedExport};
pub use exporter::{Exporter, COHORTS_DIR, RUN_METADATA_FILE, STAGING_DIR};
pub use parquet::{read_table, write_parquet};
