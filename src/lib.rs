// Cohort Extract - PostgreSQL cohort extraction to Parquet and CSV
// Copyright (c) 2025 Cohort Extract Contributors
// Licensed under the MIT License

//! # Cohort Extract
//!
//! Cohort Extract pulls named patient cohorts out of a PostgreSQL claims
//! database and writes them as Parquet files, a combined CSV and metadata
//! records for downstream analysis.
//!
//! ## Overview
//!
//! This library provides the core functionality for:
//! - **Defining** cohorts declaratively in a TOML registry
//! - **Extracting** each cohort with one parameterised, read-only query
//! - **Exporting** per-cohort Parquet files and a combined CSV atomically
//! - **Recording** metadata with checksums for every exported file
//!
//! ## Architecture
//!
//! Cohort Extract follows a layered architecture:
//!
//! - [`cli`] - Command-line interface and argument parsing
//! - [`core`] - Business logic (resolution, query, export, run orchestration)
//! - [`adapters`] - External integrations (PostgreSQL)
//! - [`domain`] - Core domain types and models
//! - [`config`] - Configuration and cohort registry loading
//! - [`logging`] - Structured logging and observability
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cohort_extract::adapters::database::create_database_backend;
//! use cohort_extract::config::{load_config, load_registry};
//! use cohort_extract::core::resolver::resolve_cohorts;
//! use cohort_extract::core::run::RunOrchestrator;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = load_config("configs/db_connection.toml")?;
//!     let registry = load_registry("configs/cohorts.toml")?;
//!     let cohorts = resolve_cohorts(&registry, &[])?;
//!
//!     let (backend, _catalog) = create_database_backend(&config)?;
//!     let orchestrator = RunOrchestrator::from_config(backend, &config, "output")?;
//!
//!     let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//!     let summary = orchestrator.run(cohorts, shutdown_rx).await?;
//!
//!     println!("Exported {} cohorts", summary.succeeded.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Cohort Definitions
//!
//! A cohort names a source table, the columns to project and the criteria
//! rows must meet:
//!
//! ```toml
//! [[cohort]]
//! name = "HTN_Conservative"
//! source = "claims_diagnoses"
//! columns = ["member_id_hash", "icd_code", "date_of_service"]
//! patient_key = "member_id_hash"
//!
//! [[cohort.include]]
//! column = "icd_code"
//! op = "starts_with"
//! values = ["I10"]
//! ```
//!
//! ## Error Handling
//!
//! All operations return [`domain::CohortError`]. Configuration and
//! unknown-cohort errors abort a run; query and export errors fail only the
//! cohort they belong to:
//!
//! ```rust,no_run
//! use cohort_extract::domain::CohortError;
//!
//! fn example() -> Result<(), CohortError> {
//!     let registry = cohort_extract::config::load_registry("configs/cohorts.toml")?;
//!     println!("{} cohorts", registry.len());
//!     Ok(())
//! }
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod logging;
