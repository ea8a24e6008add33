//! Run orchestration
//!
//! Drives every resolved cohort through query and export, up to
//! `max_parallel` at a time. A failing cohort is recorded and the others
//! carry on. On shutdown the in-flight queries are dropped, the exporter is
//! sealed and its list of committed cohorts becomes the run's result.

use crate::adapters::database::QueryBackend;
use crate::config::schema::CohortConfig;
use crate::core::export::combined::count_combined_rows;
use crate::core::export::Exporter;
use crate::core::query::QueryExecutor;
use crate::core::run::summary::{CohortFailure, RunManifest, RunSummary};
use crate::domain::cohort::CohortDefinition;
use crate::domain::ids::CohortName;
use crate::domain::metadata::RunMetadata;
use crate::domain::Result;
use crate::{log_cohort_complete, log_cohort_start, log_error_with_context};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::path::Path;
use std::pin::pin;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;

type Outcome = std::result::Result<RunMetadata, CohortFailure>;

/// Runs a set of cohorts into one output directory
pub struct RunOrchestrator {
    executor: QueryExecutor,
    exporter: Arc<Exporter>,
    max_parallel: usize,
}

impl RunOrchestrator {
    pub fn new(executor: QueryExecutor, exporter: Arc<Exporter>, max_parallel: usize) -> Self {
        Self {
            executor,
            exporter,
            max_parallel: max_parallel.max(1),
        }
    }

    /// Builds the executor and prepares the output directory from configuration
    ///
    /// # Errors
    ///
    /// Returns an export error if the output directory cannot be prepared.
    pub fn from_config(
        backend: Arc<dyn QueryBackend>,
        config: &CohortConfig,
        output_dir: impl AsRef<Path>,
    ) -> Result<Self> {
        let executor = QueryExecutor::from_config(backend, config);
        let exporter = Arc::new(Exporter::prepare(output_dir, &config.export)?);
        Ok(Self::new(
            executor,
            exporter,
            config.export.max_parallel_cohorts,
        ))
    }

    /// Processes the cohorts and writes the run metadata store
    ///
    /// # Errors
    ///
    /// Per-cohort failures are reported in the summary. An error is returned
    /// only if the run-level bookkeeping itself fails.
    pub async fn run(
        &self,
        cohorts: Vec<CohortDefinition>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<RunSummary> {
        let started = Instant::now();
        let started_at = Utc::now();

        tracing::info!(
            cohorts = cohorts.len(),
            max_parallel = self.max_parallel,
            output_dir = %self.exporter.output_dir().display(),
            "Starting run"
        );

        let mut outcomes: Vec<Option<Outcome>> = vec![None; cohorts.len()];
        let mut interrupted = *shutdown.borrow();

        if !interrupted {
            let mut pending = pin!(stream::iter(cohorts.iter().enumerate())
                .map(|(idx, def)| async move { (idx, self.process(def).await) })
                .buffer_unordered(self.max_parallel));
            let mut listening = true;

            loop {
                tokio::select! {
                    changed = shutdown.changed(), if listening => match changed {
                        Ok(()) if *shutdown.borrow() => {
                            tracing::warn!("Shutdown requested, abandoning unfinished cohorts");
                            interrupted = true;
                            break;
                        }
                        Ok(()) => {}
                        Err(_) => listening = false,
                    },
                    next = pending.next() => match next {
                        Some((idx, outcome)) => outcomes[idx] = Some(outcome),
                        None => break,
                    },
                }
            }
        }

        // Waits for a commit in progress; later commits are refused.
        let committed = self.exporter.seal_blocking().await?;

        let mut succeeded = Vec::new();
        let mut failures = Vec::new();
        for (def, outcome) in cohorts.iter().zip(outcomes) {
            match outcome {
                Some(Ok(metadata)) => succeeded.push(metadata),
                Some(Err(failure)) => failures.push(failure),
                None => match committed.iter().find(|m| m.cohort == def.name) {
                    Some(metadata) => succeeded.push(metadata.clone()),
                    None => failures.push(CohortFailure::interrupted(def.name.clone())),
                },
            }
        }

        let combined_rows = self.exporter.combined_rows()?;
        self.check_combined_rows(&succeeded, combined_rows);

        let combined_path = self.exporter.combined_path()?;
        let manifest = RunManifest {
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            started_at,
            finished_at: Utc::now(),
            interrupted,
            cohorts: succeeded.clone(),
            failures: failures.clone(),
            combined_file: combined_path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
            combined_rows,
        };
        let manifest_path = self.exporter.write_run_metadata(&manifest)?;
        tracing::info!(path = %manifest_path.display(), "Wrote run metadata");

        self.exporter.cleanup();

        Ok(RunSummary {
            requested: cohorts.into_iter().map(|def| def.name).collect(),
            succeeded,
            failures,
            combined_rows,
            duration: started.elapsed(),
            interrupted,
        })
    }

    async fn process(&self, def: &CohortDefinition) -> Outcome {
        let started = Instant::now();
        log_cohort_start!(def.name, def.source);

        let result = self
            .executor
            .execute(def)
            .await
            .map_err(|e| failure(&def.name, e))?;
        let metadata = self
            .exporter
            .export_blocking(result, def.clone())
            .await
            .map_err(|e| failure(&def.name, e))?;

        log_cohort_complete!(def.name, metadata.row_count, started.elapsed());
        Ok(metadata)
    }

    fn check_combined_rows(&self, succeeded: &[RunMetadata], combined_rows: u64) {
        let expected: u64 = succeeded.iter().map(|m| m.row_count).sum();
        if combined_rows != expected {
            tracing::error!(
                combined_rows,
                expected,
                "Combined export row count does not match cohort row counts"
            );
            return;
        }

        let Ok(path) = self.exporter.combined_path() else {
            return;
        };
        if !path.exists() {
            return;
        }
        match count_combined_rows(&path) {
            Ok(on_disk) if on_disk != expected => tracing::error!(
                on_disk,
                expected,
                path = %path.display(),
                "Combined export file row count does not match cohort row counts"
            ),
            Ok(_) => {}
            Err(e) => {
                log_error_with_context!(e, "Failed to recount combined export");
            }
        }
    }
}

fn failure(cohort: &CohortName, error: crate::domain::CohortError) -> CohortFailure {
    tracing::error!(cohort = %cohort, error = %error, "Cohort failed");
    CohortFailure::from_error(cohort.clone(), &error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::ExportConfig;
    use crate::core::query::{CohortQuery, RetryPolicy};
    use crate::domain::table::{CellValue, Column, ColumnKind, TableData};
    use crate::domain::{CohortError, QueryError};
    use async_trait::async_trait;
    use std::str::FromStr;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Returns `rows` rows for every query on `source`; `down` fails, `slow` hangs
    struct SourceBackend;

    #[async_trait]
    impl QueryBackend for SourceBackend {
        async fn fetch_table(&self, query: &CohortQuery) -> Result<TableData> {
            if query.sql.contains("\"down\"") {
                return Err(QueryError::ConnectionFailed("connection refused".into()).into());
            }
            if query.sql.contains("\"slow\"") {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            let rows = if query.sql.contains("\"big\"") { 3 } else { 1 };
            let mut table = TableData::new(vec![Column::new("member_id_hash", ColumnKind::Text)]);
            for i in 0..rows {
                table
                    .push_row(vec![CellValue::Text(format!("m{i}"))])
                    .map_err(CohortError::Other)?;
            }
            Ok(table)
        }

        async fn test_connection(&self) -> Result<()> {
            Ok(())
        }

        fn describe(&self) -> String {
            "scripted".to_string()
        }
    }

    fn def(name: &str, source: &str) -> CohortDefinition {
        CohortDefinition::new(CohortName::from_str(name).unwrap(), source)
    }

    fn orchestrator(dir: &TempDir, parallel: usize) -> RunOrchestrator {
        let executor = QueryExecutor::new(
            Arc::new(SourceBackend),
            "public",
            RetryPolicy::none(),
            Duration::from_secs(60),
        );
        let exporter = Arc::new(Exporter::prepare(dir.path(), &ExportConfig::default()).unwrap());
        RunOrchestrator::new(executor, exporter, parallel)
    }

    #[tokio::test]
    async fn test_failures_are_isolated_and_ordered() {
        let dir = TempDir::new().unwrap();
        let (_tx, rx) = watch::channel(false);

        let summary = orchestrator(&dir, 2)
            .run(
                vec![def("A", "big"), def("B", "down"), def("C", "small")],
                rx,
            )
            .await
            .unwrap();

        let ok: Vec<&str> = summary.succeeded.iter().map(|m| m.cohort.as_str()).collect();
        assert_eq!(ok, vec!["A", "C"]);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].cohort.as_str(), "B");
        assert_eq!(summary.combined_rows, 4);
        assert_eq!(summary.combined_rows, summary.total_rows());
        assert_eq!(summary.exit_code(), 1);

        let manifest: RunManifest = serde_json::from_slice(
            &std::fs::read(dir.path().join("run_metadata.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(manifest.cohorts.len(), 2);
        assert_eq!(manifest.combined_file, "combined_cohorts.csv");
        assert_eq!(manifest.combined_rows, 4);
        assert!(!dir.path().join(".staging").exists());
    }

    #[tokio::test]
    async fn test_shutdown_marks_unfinished_cohorts_interrupted() {
        let dir = TempDir::new().unwrap();
        let (tx, rx) = watch::channel(false);

        let orchestrator = orchestrator(&dir, 1);
        let run = orchestrator.run(vec![def("Fast", "small"), def("Stuck", "slow")], rx);
        let signal = async {
            tokio::time::sleep(Duration::from_millis(300)).await;
            tx.send(true).unwrap();
        };
        let (summary, ()) = tokio::join!(run, signal);
        let summary = summary.unwrap();

        assert!(summary.interrupted);
        assert_eq!(summary.exit_code(), 130);
        assert_eq!(summary.succeeded.len(), 1);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].cohort.as_str(), "Stuck");
        assert_eq!(
            summary.failures[0].kind,
            crate::core::run::summary::FailureKind::Interrupted
        );
        assert!(dir.path().join("cohorts/Fast/Fast.parquet").exists());
        assert!(!dir.path().join("cohorts/Stuck").exists());
    }

    #[tokio::test]
    async fn test_already_interrupted_run_does_nothing() {
        let dir = TempDir::new().unwrap();
        let (_tx, rx) = watch::channel(true);

        let summary = orchestrator(&dir, 1)
            .run(vec![def("A", "small")], rx)
            .await
            .unwrap();
        assert!(summary.succeeded.is_empty());
        assert_eq!(summary.failures.len(), 1);
        assert!(!dir.path().join("combined_cohorts.csv").exists());
    }
}
