//! Configuration management for cohort-extract.
//!
//! Two TOML files drive a run:
//!
//! - the **connection file** ([`CohortConfig`]): database descriptor, query
//!   limits, retry policy, export and logging settings;
//! - the **cohort registry** ([`CohortRegistry`]): one `[[cohort]]` table per
//!   cohort definition.
//!
//! Both support `${VAR_NAME}` environment variable substitution. The
//! connection file also honours `COHORT_<SECTION>_<KEY>` overrides.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use cohort_extract::config::{load_config, load_registry};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = load_config("configs/db_connection.toml")?;
//! let registry = load_registry("configs/cohorts.toml")?;
//!
//! println!("Database: {}", config.postgres.display_target());
//! println!("Cohorts: {}", registry.names().join(", "));
//! # Ok(())
//! # }
//! ```
//!
//! # Example Connection File
//!
//! ```toml
//! [postgres]
//! host = "db.internal"
//! user = "analyst"
//! password = "${COHORT_PG_PASSWORD}"
//! database = "claims"
//!
//! [query]
//! timeout_seconds = 300
//!
//! [export]
//! max_parallel_cohorts = 2
//! ```

pub mod loader;
pub mod registry;
pub mod schema;
pub mod secret;

// Re-export commonly used types
pub use loader::load_config;
pub use registry::{load_registry, parse_registry, CohortRegistry};
pub use schema::{
    ApplicationConfig, CohortConfig, ConnectionConfig, ExportConfig, LoggingConfig,
    ParquetCompression, QueryConfig, RetryConfig,
};
pub use secret::{secret_string, SecretString, SecretValue};
