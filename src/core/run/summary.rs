//! Run summary and the run-level metadata store

use crate::domain::ids::CohortName;
use crate::domain::metadata::RunMetadata;
use crate::domain::{CohortError, QueryError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Category of a per-cohort failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Query rejected by the database or by criteria validation
    Query,
    /// Query exceeded its time budget after retries
    QueryTimeout,
    /// Database unreachable after retries
    Connection,
    /// Output could not be written
    Export,
    /// Run was interrupted before the cohort was committed
    Interrupted,
    /// Anything else
    Other,
}

impl From<&CohortError> for FailureKind {
    fn from(error: &CohortError) -> Self {
        match error {
            CohortError::Query(QueryError::ConnectionFailed(_)) => FailureKind::Connection,
            CohortError::Query(_) => FailureKind::Query,
            CohortError::QueryTimeout(_) => FailureKind::QueryTimeout,
            CohortError::Export(_) | CohortError::Io(_) | CohortError::Serialization(_) => {
                FailureKind::Export
            }
            _ => FailureKind::Other,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::Query => "query",
            FailureKind::QueryTimeout => "query timeout",
            FailureKind::Connection => "connection",
            FailureKind::Export => "export",
            FailureKind::Interrupted => "interrupted",
            FailureKind::Other => "other",
        };
        f.write_str(s)
    }
}

/// A cohort that did not make it into the output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CohortFailure {
    pub cohort: CohortName,
    pub kind: FailureKind,
    pub message: String,
}

impl CohortFailure {
    pub fn from_error(cohort: CohortName, error: &CohortError) -> Self {
        Self {
            cohort,
            kind: FailureKind::from(error),
            message: error.to_string(),
        }
    }

    pub fn interrupted(cohort: CohortName) -> Self {
        Self {
            cohort,
            kind: FailureKind::Interrupted,
            message: "run interrupted before the cohort completed".to_string(),
        }
    }
}

/// Outcome of a run
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Cohorts requested, in request order
    pub requested: Vec<CohortName>,

    /// Committed cohorts, in request order
    pub succeeded: Vec<RunMetadata>,

    /// Failed cohorts, in request order
    pub failures: Vec<CohortFailure>,

    /// Data rows in the combined export
    pub combined_rows: u64,

    /// Wall-clock duration of the run
    pub duration: Duration,

    /// Whether a shutdown signal cut the run short
    pub interrupted: bool,
}

impl RunSummary {
    /// True when every requested cohort was exported
    pub fn is_successful(&self) -> bool {
        self.failures.is_empty() && !self.interrupted
    }

    /// Sum of the individual cohort row counts
    pub fn total_rows(&self) -> u64 {
        self.succeeded.iter().map(|m| m.row_count).sum()
    }

    /// Process exit code for this outcome
    pub fn exit_code(&self) -> i32 {
        if self.interrupted {
            130
        } else if self.failures.is_empty() {
            0
        } else {
            1
        }
    }

    /// Log the summary
    pub fn log_summary(&self) {
        tracing::info!(
            requested = self.requested.len(),
            succeeded = self.succeeded.len(),
            failed = self.failures.len(),
            combined_rows = self.combined_rows,
            duration_ms = self.duration.as_millis() as u64,
            interrupted = self.interrupted,
            "Run completed"
        );

        for failure in &self.failures {
            tracing::warn!(
                cohort = %failure.cohort,
                kind = %failure.kind,
                message = %failure.message,
                "Cohort failed"
            );
        }
    }
}

/// Contents of `run_metadata.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    pub tool_version: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub interrupted: bool,
    pub cohorts: Vec<RunMetadata>,
    pub failures: Vec<CohortFailure>,
    pub combined_file: String,
    pub combined_rows: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use test_case::test_case;

    #[test_case(CohortError::Query(QueryError::ConnectionFailed("down".into())), FailureKind::Connection)]
    #[test_case(CohortError::Query(QueryError::PermissionDenied("no".into())), FailureKind::Query)]
    #[test_case(CohortError::QueryTimeout("slow".into()), FailureKind::QueryTimeout)]
    #[test_case(CohortError::Export("disk full".into()), FailureKind::Export)]
    #[test_case(CohortError::Other("?".into()), FailureKind::Other)]
    fn test_failure_kind(error: CohortError, expected: FailureKind) {
        assert_eq!(FailureKind::from(&error), expected);
    }

    fn summary(failures: Vec<CohortFailure>, interrupted: bool) -> RunSummary {
        RunSummary {
            requested: vec![CohortName::from_str("A").unwrap()],
            succeeded: Vec::new(),
            failures,
            combined_rows: 0,
            duration: Duration::from_millis(5),
            interrupted,
        }
    }

    #[test]
    fn test_exit_codes() {
        let name = CohortName::from_str("A").unwrap();
        assert_eq!(summary(Vec::new(), false).exit_code(), 0);
        assert!(summary(Vec::new(), false).is_successful());

        let failed = summary(
            vec![CohortFailure::from_error(
                name.clone(),
                &CohortError::Export("disk full".into()),
            )],
            false,
        );
        assert_eq!(failed.exit_code(), 1);
        assert!(!failed.is_successful());

        let interrupted = summary(vec![CohortFailure::interrupted(name)], true);
        assert_eq!(interrupted.exit_code(), 130);
    }

    #[test]
    fn test_failure_serializes_snake_case_kind() {
        let failure = CohortFailure::from_error(
            CohortName::from_str("A").unwrap(),
            &CohortError::QueryTimeout("cohort 'A' exceeded 5s".into()),
        );
        let json = serde_json::to_value(&failure).unwrap();
        assert_eq!(json["kind"], "query_timeout");
        assert_eq!(json["cohort"], "A");
    }
}
