//! Configuration schema types
//!
//! This module defines the structure of the connection/run configuration
//! file. The cohort registry has its own file, see [`crate::config::registry`].

use crate::config::SecretString;
use crate::core::export::{COHORTS_DIR, RUN_METADATA_FILE, STAGING_DIR};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Root configuration loaded from the connection file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CohortConfig {
    /// Application-level settings
    #[serde(default)]
    pub application: ApplicationConfig,

    /// Database connection descriptor
    pub postgres: ConnectionConfig,

    /// Query execution settings
    #[serde(default)]
    pub query: QueryConfig,

    /// Export settings
    #[serde(default)]
    pub export: ExportConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl CohortConfig {
    /// Validates the configuration
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid
    pub fn validate(&self) -> Result<(), String> {
        self.application.validate()?;
        self.postgres.validate()?;
        self.query.validate()?;
        self.export.validate()?;
        self.logging.validate()?;
        Ok(())
    }
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl ApplicationConfig {
    fn validate(&self) -> Result<(), String> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.as_str()) {
            return Err(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.log_level,
                valid_levels.join(", ")
            ));
        }
        Ok(())
    }
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

/// PostgreSQL connection descriptor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Server host name or address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Login role
    pub user: String,

    /// Login password
    /// Stored securely in memory and automatically zeroized on drop
    #[serde(default)]
    pub password: Option<SecretString>,

    /// Database name
    pub database: String,

    /// Schema the cohort source tables live in
    #[serde(default = "default_schema")]
    pub schema: String,

    /// SSL/TLS mode: disable | allow | prefer | require | verify-ca | verify-full
    #[serde(default = "default_ssl_mode")]
    pub ssl_mode: String,

    /// Maximum pooled connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Connect and pool-wait timeout in seconds
    #[serde(default = "default_connect_timeout_seconds")]
    pub connect_timeout_seconds: u64,

    /// Reported to the server as `application_name`
    #[serde(default = "default_application_name")]
    pub application_name: String,
}

impl ConnectionConfig {
    fn validate(&self) -> Result<(), String> {
        if self.host.trim().is_empty() {
            return Err("postgres.host cannot be empty".to_string());
        }
        if self.port == 0 {
            return Err("postgres.port must be > 0".to_string());
        }
        if self.user.trim().is_empty() {
            return Err("postgres.user cannot be empty".to_string());
        }
        if self.database.trim().is_empty() {
            return Err("postgres.database cannot be empty".to_string());
        }
        if !crate::domain::cohort::is_valid_identifier(&self.schema) {
            return Err(format!("postgres.schema '{}' is not a valid identifier", self.schema));
        }

        let valid_ssl_modes = [
            "disable",
            "allow",
            "prefer",
            "require",
            "verify-ca",
            "verify-full",
        ];
        if !valid_ssl_modes.contains(&self.ssl_mode.as_str()) {
            return Err(format!(
                "postgres.ssl_mode must be one of: {}, got '{}'",
                valid_ssl_modes.join(", "),
                self.ssl_mode
            ));
        }

        if self.max_connections == 0 || self.max_connections > 64 {
            return Err(format!(
                "postgres.max_connections must be between 1 and 64, got {}",
                self.max_connections
            ));
        }

        if self.connect_timeout_seconds == 0 {
            return Err("postgres.connect_timeout_seconds must be > 0".to_string());
        }

        Ok(())
    }

    /// Connection target without credentials, for display and logs
    pub fn display_target(&self) -> String {
        format!(
            "postgresql://{}@{}:{}/{}",
            self.user, self.host, self.port, self.database
        )
    }
}

/// Query execution configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Per-attempt timeout in seconds (server statement timeout and client deadline)
    #[serde(default = "default_query_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Retry policy for transient failures
    #[serde(default)]
    pub retry: RetryConfig,
}

impl QueryConfig {
    fn validate(&self) -> Result<(), String> {
        if self.timeout_seconds == 0 {
            return Err("query.timeout_seconds must be > 0".to_string());
        }
        self.retry.validate()
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_query_timeout_seconds(),
            retry: RetryConfig::default(),
        }
    }
}

/// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial delay in milliseconds
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Maximum delay in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Backoff multiplier
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add up to 25% random jitter to each delay
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl RetryConfig {
    fn validate(&self) -> Result<(), String> {
        if self.max_retries > 10 {
            return Err(format!(
                "query.retry.max_retries must be at most 10, got {}",
                self.max_retries
            ));
        }
        if self.initial_delay_ms > self.max_delay_ms {
            return Err(format!(
                "query.retry.initial_delay_ms ({}) cannot exceed max_delay_ms ({})",
                self.initial_delay_ms, self.max_delay_ms
            ));
        }
        if self.backoff_multiplier < 1.0 {
            return Err(format!(
                "query.retry.backoff_multiplier must be >= 1.0, got {}",
                self.backoff_multiplier
            ));
        }
        Ok(())
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Parquet compression codec for individual cohort files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ParquetCompression {
    None,
    #[default]
    Snappy,
    Zstd,
}

impl fmt::Display for ParquetCompression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ParquetCompression::None => "none",
            ParquetCompression::Snappy => "snappy",
            ParquetCompression::Zstd => "zstd",
        };
        write!(f, "{s}")
    }
}

/// Export configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Number of cohorts processed concurrently
    #[serde(default = "default_max_parallel_cohorts")]
    pub max_parallel_cohorts: usize,

    /// File name of the combined export inside the output directory
    #[serde(default = "default_combined_file_name")]
    pub combined_file_name: String,

    /// Columns carried into the combined export (after the cohort name)
    #[serde(default = "default_combined_columns")]
    pub combined_columns: Vec<String>,

    /// Parquet compression codec
    #[serde(default)]
    pub compression: ParquetCompression,
}

impl ExportConfig {
    fn validate(&self) -> Result<(), String> {
        if self.max_parallel_cohorts == 0 || self.max_parallel_cohorts > 32 {
            return Err(format!(
                "export.max_parallel_cohorts must be between 1 and 32, got {}",
                self.max_parallel_cohorts
            ));
        }
        let name = self.combined_file_name.trim();
        if name.is_empty() {
            return Err("export.combined_file_name cannot be empty".to_string());
        }
        if name.contains('/') || name.contains('\\') || name.starts_with('.') {
            return Err(format!(
                "export.combined_file_name must be a plain file name, got '{name}'"
            ));
        }
        if [COHORTS_DIR, STAGING_DIR, RUN_METADATA_FILE]
            .iter()
            .any(|reserved| name.eq_ignore_ascii_case(reserved))
        {
            return Err(format!(
                "export.combined_file_name '{name}' is reserved for run output"
            ));
        }
        if self
            .combined_columns
            .iter()
            .any(|c| c.trim().is_empty() || c == "cohort")
        {
            return Err(
                "export.combined_columns cannot contain empty names or 'cohort'".to_string(),
            );
        }
        Ok(())
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            max_parallel_cohorts: default_max_parallel_cohorts(),
            combined_file_name: default_combined_file_name(),
            combined_columns: default_combined_columns(),
            compression: ParquetCompression::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Enable local JSON file logging
    #[serde(default)]
    pub local_enabled: bool,

    /// Local log directory
    #[serde(default = "default_local_path")]
    pub local_path: String,

    /// Log rotation strategy (daily, hourly, never)
    #[serde(default = "default_local_rotation")]
    pub local_rotation: String,
}

impl LoggingConfig {
    fn validate(&self) -> Result<(), String> {
        let valid_rotations = ["daily", "hourly", "never"];
        if !valid_rotations.contains(&self.local_rotation.as_str()) {
            return Err(format!(
                "Invalid logging.local_rotation '{}'. Must be one of: {}",
                self.local_rotation,
                valid_rotations.join(", ")
            ));
        }
        if self.local_enabled && self.local_path.trim().is_empty() {
            return Err("logging.local_path cannot be empty when local_enabled".to_string());
        }
        Ok(())
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            local_enabled: false,
            local_path: default_local_path(),
            local_rotation: default_local_rotation(),
        }
    }
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_port() -> u16 {
    5432
}

fn default_schema() -> String {
    "public".to_string()
}

fn default_ssl_mode() -> String {
    "prefer".to_string()
}

fn default_max_connections() -> usize {
    4
}

fn default_connect_timeout_seconds() -> u64 {
    10
}

fn default_application_name() -> String {
    "cohort-extract".to_string()
}

fn default_query_timeout_seconds() -> u64 {
    300
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_max_parallel_cohorts() -> usize {
    1
}

fn default_combined_file_name() -> String {
    "combined_cohorts.csv".to_string()
}

fn default_combined_columns() -> Vec<String> {
    vec!["member_id_hash".to_string()]
}

fn default_local_path() -> String {
    "logs".to_string()
}

fn default_local_rotation() -> String {
    "daily".to_string()
}
