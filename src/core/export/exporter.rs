//! Cohort exporter
//!
//! Output layout under the run's output directory:
//!
//! ```text
//! <out>/combined_cohorts.csv
//! <out>/run_metadata.json
//! <out>/cohorts/<Name>/<Name>.parquet
//! <out>/cohorts/<Name>/<Name>.metadata.json
//! <out>/.staging/
//! ```
//!
//! A cohort's Parquet file and metadata record are written into a private
//! staging directory first. The commit appends the combined rows and then
//! renames the staged directory into place; if the rename fails the append
//! is truncated away again. Commits are serialized by one lock that also
//! guards the list of committed cohorts.

use crate::config::schema::{ExportConfig, ParquetCompression};
use crate::core::export::combined::{AppendReceipt, CombinedExport};
use crate::core::export::parquet::write_parquet;
use crate::core::verification::verify_cohort_file;
use crate::domain::cohort::CohortDefinition;
use crate::domain::metadata::{CohortParameters, RunMetadata};
use crate::domain::table::CohortResult;
use crate::domain::{CohortError, Result};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

/// Directory holding the per-cohort directories
pub const COHORTS_DIR: &str = "cohorts";

/// Scratch directory for uncommitted output
pub const STAGING_DIR: &str = ".staging";

/// Run-level metadata store
pub const RUN_METADATA_FILE: &str = "run_metadata.json";

struct CommitState {
    combined: CombinedExport,
    committed: Vec<RunMetadata>,
    sealed: bool,
}

/// Writes cohort results to the output directory
pub struct Exporter {
    output_dir: PathBuf,
    cohorts_dir: PathBuf,
    staging_dir: PathBuf,
    compression: ParquetCompression,
    state: Mutex<CommitState>,
}

impl Exporter {
    /// Prepares the output directory for a new run
    ///
    /// Creates the directory layout and removes everything a previous run
    /// left behind: cohort directories, combined export, run metadata and
    /// staging debris. Only cohorts committed by this run are on disk
    /// afterwards.
    ///
    /// # Errors
    ///
    /// Returns an export error if the directories cannot be created or
    /// cleaned.
    pub fn prepare(output_dir: impl AsRef<Path>, config: &ExportConfig) -> Result<Self> {
        let output_dir = output_dir.as_ref().to_path_buf();
        let cohorts_dir = output_dir.join(COHORTS_DIR);
        let staging_dir = output_dir.join(STAGING_DIR);

        if cohorts_dir.exists() {
            tracing::info!(path = %cohorts_dir.display(), "Removing previous cohort output");
            fs::remove_dir_all(&cohorts_dir).map_err(|e| fs_error("remove", &cohorts_dir, e))?;
        }
        fs::create_dir_all(&cohorts_dir).map_err(|e| fs_error("create", &cohorts_dir, e))?;

        if staging_dir.exists() {
            tracing::info!(path = %staging_dir.display(), "Removing stale staging data");
            fs::remove_dir_all(&staging_dir).map_err(|e| fs_error("remove", &staging_dir, e))?;
        }
        fs::create_dir_all(&staging_dir).map_err(|e| fs_error("create", &staging_dir, e))?;

        let combined_path = output_dir.join(config.combined_file_name.trim());
        for previous in [&combined_path, &output_dir.join(RUN_METADATA_FILE)] {
            if previous.exists() {
                fs::remove_file(previous).map_err(|e| fs_error("remove", previous, e))?;
            }
        }

        Ok(Self {
            output_dir,
            cohorts_dir,
            staging_dir,
            compression: config.compression,
            state: Mutex::new(CommitState {
                combined: CombinedExport::new(combined_path, config.combined_columns.clone()),
                committed: Vec::new(),
                sealed: false,
            }),
        })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Final directory of a cohort
    pub fn cohort_dir(&self, cohort: &str) -> PathBuf {
        self.cohorts_dir.join(cohort)
    }

    fn lock(&self) -> Result<MutexGuard<'_, CommitState>> {
        self.state
            .lock()
            .map_err(|_| CohortError::Export("export state lock poisoned".to_string()))
    }

    /// Exports one cohort result
    ///
    /// This does blocking file I/O; async callers use [`Exporter::export_blocking`].
    ///
    /// # Errors
    ///
    /// Returns an export error if any write fails or the exporter has been
    /// sealed. Nothing of the cohort remains visible in that case.
    pub fn export(&self, result: &CohortResult, def: &CohortDefinition) -> Result<RunMetadata> {
        let name = result.cohort.as_str();
        let staged = self.staging_dir.join(format!("{name}-{}", Uuid::new_v4()));

        let metadata = match self.stage(result, def, &staged) {
            Ok(metadata) => metadata,
            Err(e) => {
                remove_dir_quietly(&staged);
                return Err(e);
            }
        };

        match self.commit(result, &staged, metadata) {
            Ok(metadata) => Ok(metadata),
            Err(e) => {
                remove_dir_quietly(&staged);
                Err(e)
            }
        }
    }

    /// Runs [`Exporter::export`] on the blocking pool
    ///
    /// Once started, the export runs to completion even if the calling
    /// future is dropped.
    ///
    /// # Errors
    ///
    /// Returns the export error, or an error if the blocking task panicked.
    pub async fn export_blocking(
        self: &Arc<Self>,
        result: CohortResult,
        def: CohortDefinition,
    ) -> Result<RunMetadata> {
        let exporter = Arc::clone(self);
        tokio::task::spawn_blocking(move || exporter.export(&result, &def))
            .await
            .map_err(|e| CohortError::Export(format!("Export task failed: {e}")))?
    }

    fn stage(
        &self,
        result: &CohortResult,
        def: &CohortDefinition,
        staged: &Path,
    ) -> Result<RunMetadata> {
        let name = result.cohort.as_str();
        fs::create_dir_all(staged).map_err(|e| fs_error("create", staged, e))?;

        let data_path = staged.join(format!("{name}.parquet"));
        write_parquet(&result.table, &data_path, self.compression)?;
        let verification = verify_cohort_file(&data_path, result.row_count() as u64)?;

        let metadata = RunMetadata {
            cohort: result.cohort.clone(),
            description: def.description.clone(),
            row_count: verification.row_count,
            extracted_at: result.extracted_at,
            data_file: format!("{COHORTS_DIR}/{name}/{name}.parquet"),
            columns: result.table.columns.clone(),
            checksum_sha256: verification.checksum_sha256,
            parameters: CohortParameters::from(def),
            sql: result.sql.clone(),
        };

        write_json(&staged.join(format!("{name}.metadata.json")), &metadata)?;
        Ok(metadata)
    }

    fn commit(
        &self,
        result: &CohortResult,
        staged: &Path,
        metadata: RunMetadata,
    ) -> Result<RunMetadata> {
        let mut state = self.lock()?;
        if state.sealed {
            return Err(CohortError::Export(format!(
                "run was interrupted before cohort '{}' was committed",
                result.cohort
            )));
        }

        let receipt = state.combined.append(&result.cohort, &result.table)?;

        if let Err(e) = self.install(result.cohort.as_str(), staged) {
            rollback_append(&mut state.combined, receipt);
            return Err(e);
        }

        state.committed.push(metadata.clone());
        Ok(metadata)
    }

    /// Moves a staged directory to its final place, replacing an older one
    fn install(&self, name: &str, staged: &Path) -> Result<()> {
        let target = self.cohort_dir(name);
        let displaced = if target.exists() {
            let aside = self.staging_dir.join(format!("{name}-previous-{}", Uuid::new_v4()));
            fs::rename(&target, &aside).map_err(|e| fs_error("move aside", &target, e))?;
            Some(aside)
        } else {
            None
        };

        if let Err(e) = fs::rename(staged, &target) {
            if let Some(ref aside) = displaced {
                if let Err(restore) = fs::rename(aside, &target) {
                    tracing::error!(
                        path = %target.display(),
                        error = %restore,
                        "Failed to restore previous cohort directory"
                    );
                }
            }
            return Err(fs_error("install", &target, e));
        }

        if let Some(aside) = displaced {
            remove_dir_quietly(&aside);
        }
        Ok(())
    }

    /// Stops accepting commits and returns the committed cohorts
    ///
    /// Waits for a commit that is in progress.
    pub fn seal(&self) -> Result<Vec<RunMetadata>> {
        let mut state = self.lock()?;
        state.sealed = true;
        Ok(state.committed.clone())
    }

    /// Runs [`Exporter::seal`] on the blocking pool
    ///
    /// # Errors
    ///
    /// Returns an error if the state lock is poisoned or the task panicked.
    pub async fn seal_blocking(self: &Arc<Self>) -> Result<Vec<RunMetadata>> {
        let exporter = Arc::clone(self);
        tokio::task::spawn_blocking(move || exporter.seal())
            .await
            .map_err(|e| CohortError::Export(format!("Seal task failed: {e}")))?
    }

    /// Cohorts committed so far, in commit order
    pub fn committed(&self) -> Result<Vec<RunMetadata>> {
        Ok(self.lock()?.committed.clone())
    }

    /// Rows written to the combined export so far
    pub fn combined_rows(&self) -> Result<u64> {
        Ok(self.lock()?.combined.rows_written())
    }

    /// Path of the combined export
    pub fn combined_path(&self) -> Result<PathBuf> {
        Ok(self.lock()?.combined.path().to_path_buf())
    }

    /// Writes the run-level metadata store
    ///
    /// # Errors
    ///
    /// Returns an export error if the file cannot be written.
    pub fn write_run_metadata<T: Serialize>(&self, manifest: &T) -> Result<PathBuf> {
        let path = self.output_dir.join(RUN_METADATA_FILE);
        let tmp = self.staging_dir.join(format!("{RUN_METADATA_FILE}.{}", Uuid::new_v4()));
        write_json(&tmp, manifest)?;
        fs::rename(&tmp, &path).map_err(|e| fs_error("install", &path, e))?;
        Ok(path)
    }

    /// Removes the staging directory
    pub fn cleanup(&self) {
        remove_dir_quietly(&self.staging_dir);
    }
}

fn rollback_append(combined: &mut CombinedExport, receipt: AppendReceipt) {
    if let Err(e) = combined.rollback(receipt) {
        tracing::error!(error = %e, "Failed to roll back combined export");
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    fs::write(path, bytes).map_err(|e| fs_error("write", path, e))
}

fn remove_dir_quietly(path: &Path) {
    if path.exists() {
        if let Err(e) = fs::remove_dir_all(path) {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove directory");
        }
    }
}

fn fs_error(action: &str, path: &Path, e: std::io::Error) -> CohortError {
    CohortError::Export(format!("Failed to {action} {}: {e}", path.display()))
}
