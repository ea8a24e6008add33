//! External system integrations for cohort-extract.
//!
//! - [`database`] - Database abstraction layer (trait-based)
//! - [`postgresql`] - PostgreSQL implementation
//!
//! # Design Pattern
//!
//! Adapters isolate the database driver behind the [`database::QueryBackend`]
//! and [`database::CatalogInspector`] traits, so the pipeline can be tested
//! with a scripted backend and never sees driver types.
//!
//! ```rust,no_run
//! use cohort_extract::adapters::database::create_database_backend;
//! use cohort_extract::config::load_config;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = load_config("configs/db_connection.toml")?;
//! let (backend, _catalog) = create_database_backend(&config)?;
//! backend.test_connection().await?;
//! # Ok(())
//! # }
//! ```

pub mod database;
pub mod postgresql;
