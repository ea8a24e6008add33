//! Domain error types
//!
//! This module defines the error hierarchy for cohort extraction.
//! All errors are domain-specific and don't expose third-party types.

use thiserror::Error;

/// Main cohort extraction error type
///
/// Configuration and unknown-cohort errors are fatal for a run. Query,
/// timeout and export errors fail a single cohort only.
#[derive(Debug, Error)]
pub enum CohortError {
    /// Malformed or missing configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// One or more requested cohorts are not defined in the registry
    #[error("Unknown cohort(s): {}", .0.join(", "))]
    UnknownCohort(Vec<String>),

    /// Database query errors
    #[error("Query error: {0}")]
    Query(#[from] QueryError),

    /// Query exceeded its time budget
    #[error("Query timed out: {0}")]
    QueryTimeout(String),

    /// Filesystem write failures while exporting a cohort
    #[error("Export error: {0}")]
    Export(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    /// Generic errors with context
    #[error("{0}")]
    Other(String),
}

impl CohortError {
    /// Whether retrying the failed operation may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            CohortError::QueryTimeout(_) => true,
            CohortError::Query(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Whether the error must abort the whole run rather than a single cohort
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CohortError::Configuration(_) | CohortError::UnknownCohort(_)
        )
    }
}

/// Database query errors
///
/// These errors don't expose the PostgreSQL driver types.
#[derive(Debug, Error)]
pub enum QueryError {
    /// Failed to reach the database or the connection dropped
    #[error("Failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Credentials were rejected
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The role lacks privileges on a referenced object
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// The cohort criteria could not be translated or bound
    #[error("Invalid criteria: {0}")]
    InvalidCriteria(String),

    /// A referenced table, column or schema does not exist
    #[error("Undefined object: {0}")]
    UndefinedObject(String),

    /// A result column has a type that cannot be exported
    #[error("Unsupported type '{type_name}' for column '{column}'; add a cast for it in the cohort definition")]
    UnsupportedColumnType { column: String, type_name: String },

    /// Any other database failure
    #[error("Query failed: {0}")]
    Failed(String),
}

impl QueryError {
    /// Whether the failure is expected to resolve on retry
    pub fn is_transient(&self) -> bool {
        matches!(self, QueryError::ConnectionFailed(_))
    }
}

// Conversion from std::io::Error
impl From<std::io::Error> for CohortError {
    fn from(err: std::io::Error) -> Self {
        CohortError::Io(err.to_string())
    }
}

// Conversion from serde_json::Error
impl From<serde_json::Error> for CohortError {
    fn from(err: serde_json::Error) -> Self {
        CohortError::Serialization(err.to_string())
    }
}

// Conversion from toml parse errors
impl From<toml::de::Error> for CohortError {
    fn from(err: toml::de::Error) -> Self {
        CohortError::Configuration(format!("TOML parse error: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cohort_error_display() {
        let err = CohortError::Configuration("Invalid config".to_string());
        assert_eq!(err.to_string(), "Configuration error: Invalid config");
    }

    #[test]
    fn test_unknown_cohort_lists_all_names() {
        let err = CohortError::UnknownCohort(vec!["A".to_string(), "B".to_string()]);
        assert_eq!(err.to_string(), "Unknown cohort(s): A, B");
        assert!(err.is_fatal());
    }

    #[test]
    fn test_query_error_conversion() {
        let query_err = QueryError::ConnectionFailed("Network error".to_string());
        let err: CohortError = query_err.into();
        assert!(matches!(err, CohortError::Query(_)));
    }

    #[test]
    fn test_transient_classification() {
        assert!(CohortError::QueryTimeout("slow".to_string()).is_transient());
        assert!(CohortError::from(QueryError::ConnectionFailed("reset".to_string())).is_transient());
        assert!(!CohortError::from(QueryError::PermissionDenied("x".to_string())).is_transient());
        assert!(!CohortError::from(QueryError::AuthenticationFailed("x".to_string())).is_transient());
        assert!(!CohortError::Export("disk full".to_string()).is_transient());
    }

    #[test]
    fn test_per_cohort_errors_are_not_fatal() {
        assert!(!CohortError::Export("x".to_string()).is_fatal());
        assert!(!CohortError::QueryTimeout("x".to_string()).is_fatal());
        assert!(CohortError::Configuration("x".to_string()).is_fatal());
    }

    #[test]
    fn test_unsupported_column_type_message() {
        let err = QueryError::UnsupportedColumnType {
            column: "paid_amount".to_string(),
            type_name: "numeric".to_string(),
        };
        assert!(err.to_string().contains("paid_amount"));
        assert!(err.to_string().contains("numeric"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "File not found");
        let err: CohortError = io_err.into();
        assert!(matches!(err, CohortError::Io(_)));
    }

    #[test]
    fn test_toml_error_conversion() {
        let toml_err = toml::from_str::<toml::Value>("invalid = toml = syntax").unwrap_err();
        let err: CohortError = toml_err.into();
        assert!(matches!(err, CohortError::Configuration(_)));
        assert!(err.to_string().contains("TOML parse error"));
    }
}
