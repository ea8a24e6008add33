//! Core business logic for cohort extraction.
//!
//! # Modules
//!
//! - [`resolver`] - Maps requested cohort names onto registry definitions
//! - [`query`] - SQL generation, retry policy and query execution
//! - [`export`] - Parquet, combined CSV and metadata output
//! - [`verification`] - Checksums and post-write checks
//! - [`run`] - Orchestration of a whole run and its summary
//! - [`inspect`] - Catalog checks behind `check-connection`
//!
//! # Run Workflow
//!
//! 1. **Resolve**: Turn the requested names into cohort definitions
//! 2. **Query**: Build and run one read-only query per cohort, retrying transient failures
//! 3. **Stage**: Write the Parquet file and metadata record into a staging directory
//! 4. **Verify**: Re-read the Parquet footer and compute its checksum
//! 5. **Commit**: Append to the combined export and move the cohort directory into place
//! 6. **Report**: Write `run_metadata.json` and log the summary
//!
//! # Example
//!
//! ```rust,no_run
//! use cohort_extract::adapters::database::create_database_backend;
//! use cohort_extract::config::{load_config, load_registry};
//! use cohort_extract::core::export::Exporter;
//! use cohort_extract::core::query::QueryExecutor;
//! use cohort_extract::core::resolver::resolve_cohorts;
//! use cohort_extract::core::run::RunOrchestrator;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = load_config("configs/db_connection.toml")?;
//! let registry = load_registry("configs/cohorts.toml")?;
//! let cohorts = resolve_cohorts(&registry, &["HTN_Conservative".to_string()])?;
//!
//! let (backend, _catalog) = create_database_backend(&config)?;
//! let executor = QueryExecutor::from_config(backend, &config);
//! let exporter = Arc::new(Exporter::prepare("out", &config.export)?);
//!
//! let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! let orchestrator = RunOrchestrator::new(executor, exporter, config.export.max_parallel_cohorts);
//! let summary = orchestrator.run(cohorts, shutdown_rx).await?;
//!
//! println!("Exported: {}", summary.succeeded.len());
//! println!("Failed: {}", summary.failures.len());
//! # Ok(())
//! # }
//! ```

pub mod export;
pub mod inspect;
pub mod query;
pub mod resolver;
pub mod run;
pub mod verification;
