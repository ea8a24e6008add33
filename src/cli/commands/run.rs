//! Run command implementation
//!
//! This module implements the `run` command, which extracts the requested
//! cohorts into an output directory.

use crate::adapters::database::create_database_backend;
use crate::config::{load_config, load_registry};
use crate::core::resolver::{parse_cohort_list, resolve_cohorts};
use crate::core::run::{RunOrchestrator, RunSummary};
use crate::domain::CohortError;
use clap::Args;
use std::path::PathBuf;
use tokio::sync::watch;

/// Arguments for the run command
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Directory to write cohort files into
    #[arg(short, long)]
    pub output_dir: PathBuf,

    /// Cohort name(s) to extract (comma-separated, default: all)
    #[arg(long)]
    pub cohorts: Option<String>,

    /// Maximum number of cohorts processed concurrently
    #[arg(long)]
    pub max_parallel: Option<usize>,
}

impl RunArgs {
    /// Requested cohort names, empty for all
    pub fn requested(&self) -> Vec<String> {
        self.cohorts
            .as_deref()
            .map(parse_cohort_list)
            .unwrap_or_default()
    }

    /// Execute the run command
    pub async fn execute(
        &self,
        connection_path: &str,
        registry_path: &str,
        shutdown_signal: watch::Receiver<bool>,
    ) -> anyhow::Result<i32> {
        tracing::info!("Starting run command");

        let mut config = match load_config(connection_path) {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(error = %e, "Failed to load connection configuration");
                eprintln!("Failed to load connection configuration: {e}");
                return Ok(2);
            }
        };

        if let Some(max_parallel) = self.max_parallel {
            tracing::info!(max_parallel, "Overriding max parallel cohorts from CLI");
            config.export.max_parallel_cohorts = max_parallel;
            if let Err(e) = config.validate() {
                eprintln!("Configuration validation failed: {e}");
                return Ok(2);
            }
        }

        let registry = match load_registry(registry_path) {
            Ok(r) => r,
            Err(e) => {
                tracing::error!(error = %e, "Failed to load cohort registry");
                eprintln!("Failed to load cohort registry: {e}");
                return Ok(2);
            }
        };

        let cohorts = match resolve_cohorts(&registry, &self.requested()) {
            Ok(c) => c,
            Err(e @ CohortError::UnknownCohort(_)) => {
                tracing::error!(error = %e, "Unknown cohort requested");
                eprintln!("{e}");
                eprintln!("Available cohorts: {}", registry.names().join(", "));
                return Ok(2);
            }
            Err(e) => return Err(e.into()),
        };

        let (backend, _catalog) = match create_database_backend(&config) {
            Ok(b) => b,
            Err(e) => {
                tracing::error!(error = %e, "Failed to create database backend");
                eprintln!("Failed to initialize database connection: {e}");
                return Ok(4);
            }
        };

        let orchestrator = RunOrchestrator::from_config(backend, &config, &self.output_dir)?;

        println!(
            "🚀 Extracting {} cohort(s) into {}",
            cohorts.len(),
            self.output_dir.display()
        );
        println!();

        let summary = orchestrator.run(cohorts, shutdown_signal).await?;
        summary.log_summary();
        print_summary(&summary);

        Ok(summary.exit_code())
    }
}

fn print_summary(summary: &RunSummary) {
    println!("📊 Run Summary");
    println!("  Requested: {}", summary.requested.len());
    println!("  Exported: {}", summary.succeeded.len());
    println!("  Failed: {}", summary.failures.len());
    println!("  Combined rows: {}", summary.combined_rows);
    println!("  Duration: {:.2}s", summary.duration.as_secs_f64());
    println!();

    for metadata in &summary.succeeded {
        println!(
            "  ✅ {} ({} rows) -> {}",
            metadata.cohort, metadata.row_count, metadata.data_file
        );
    }
    for failure in &summary.failures {
        println!("  ❌ {} [{}]: {}", failure.cohort, failure.kind, failure.message);
    }
    println!();

    if summary.interrupted {
        println!("⚠️  Run interrupted; committed cohorts remain valid");
    } else if summary.is_successful() {
        println!("✅ All cohorts exported");
    } else {
        println!("⚠️  Run completed with failures");
    }
}
