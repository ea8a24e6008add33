//! Logging and observability
//!
//! This module provides structured logging with support for:
//! - Configurable log levels, overridable through `RUST_LOG`
//! - Console output
//! - Local JSON file logging with rotation
//!
//! # Example
//!
//! ```no_run
//! use cohort_extract::logging::init_logging;
//! use cohort_extract::config::LoggingConfig;
//!
//! let config = LoggingConfig::default();
//! let _guard = init_logging("info", &config).expect("Failed to initialize logging");
//!
//! tracing::info!("Application started");
//! ```

pub mod structured;

// Re-export commonly used items
pub use structured::{init_console_logging, init_logging, LoggingGuard};

/// Log the start of a cohort
///
/// # Example
///
/// ```no_run
/// use cohort_extract::log_cohort_start;
///
/// log_cohort_start!("HTN_Conservative", "claims_diagnoses");
/// ```
#[macro_export]
macro_rules! log_cohort_start {
    ($cohort:expr, $source:expr) => {
        tracing::info!(
            cohort = %$cohort,
            source = %$source,
            "Starting cohort extraction"
        );
    };
}

/// Log the completion of a cohort
///
/// # Example
///
/// ```no_run
/// use cohort_extract::log_cohort_complete;
/// use std::time::Duration;
///
/// log_cohort_complete!("HTN_Conservative", 42, Duration::from_secs(3));
/// ```
#[macro_export]
macro_rules! log_cohort_complete {
    ($cohort:expr, $row_count:expr, $duration:expr) => {
        tracing::info!(
            cohort = %$cohort,
            row_count = $row_count,
            duration_ms = $duration.as_millis() as u64,
            "Cohort exported"
        );
    };
}

/// Log an error with context
///
/// # Example
///
/// ```no_run
/// use cohort_extract::log_error_with_context;
/// use cohort_extract::domain::CohortError;
///
/// let error = CohortError::Configuration("Invalid config".to_string());
/// log_error_with_context!(&error, "Failed to load configuration");
/// ```
#[macro_export]
macro_rules! log_error_with_context {
    ($error:expr, $context:expr) => {
        tracing::error!(
            error = %$error,
            context = $context,
            "Error occurred"
        );
    };
}

/// Log a retry attempt
///
/// # Example
///
/// ```no_run
/// use cohort_extract::log_retry_attempt;
///
/// log_retry_attempt!("HTN_Conservative", 2, 3, 2000u64, "Connection reset");
/// ```
#[macro_export]
macro_rules! log_retry_attempt {
    ($label:expr, $attempt:expr, $max_retries:expr, $delay_ms:expr, $reason:expr) => {
        tracing::warn!(
            cohort = %$label,
            attempt = $attempt,
            max_retries = $max_retries,
            delay_ms = $delay_ms,
            reason = %$reason,
            "Transient failure, retrying"
        );
    };
}
