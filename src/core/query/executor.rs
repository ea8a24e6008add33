//! Per-cohort query execution
//!
//! The executor turns a [`CohortDefinition`] into SQL, runs it through the
//! configured [`QueryBackend`] under a client-side deadline and retries
//! transient failures according to its [`RetryPolicy`].

use crate::adapters::database::QueryBackend;
use crate::config::schema::CohortConfig;
use crate::core::query::builder::build_query;
use crate::core::query::retry::RetryPolicy;
use crate::domain::cohort::CohortDefinition;
use crate::domain::table::CohortResult;
use crate::domain::{CohortError, Result};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

/// Slack added to the client deadline so the server-side timeout fires first
const CLIENT_DEADLINE_SLACK: Duration = Duration::from_secs(5);

/// Runs cohort queries against a backend
#[derive(Clone)]
pub struct QueryExecutor {
    backend: Arc<dyn QueryBackend>,
    schema: String,
    retry: RetryPolicy,
    timeout: Duration,
}

impl QueryExecutor {
    /// Create a new executor
    ///
    /// `timeout` bounds each attempt, not the total time including retries.
    pub fn new(
        backend: Arc<dyn QueryBackend>,
        schema: impl Into<String>,
        retry: RetryPolicy,
        timeout: Duration,
    ) -> Self {
        Self {
            backend,
            schema: schema.into(),
            retry,
            timeout,
        }
    }

    /// Create an executor from the loaded configuration
    pub fn from_config(backend: Arc<dyn QueryBackend>, config: &CohortConfig) -> Self {
        Self::new(
            backend,
            config.postgres.schema.clone(),
            RetryPolicy::from_config(&config.query.retry),
            Duration::from_secs(config.query.timeout_seconds) + CLIENT_DEADLINE_SLACK,
        )
    }

    /// Extracts the rows of one cohort
    ///
    /// # Errors
    ///
    /// Returns a query error for invalid criteria or a non-transient
    /// database failure, and [`CohortError::QueryTimeout`] or a connection
    /// error once retries are exhausted.
    pub async fn execute(&self, def: &CohortDefinition) -> Result<CohortResult> {
        let query = build_query(def, &self.schema)?;
        tracing::debug!(cohort = %def.name, sql = %query.sql, params = query.params.len(), "Built cohort query");

        let table = self
            .retry
            .run(def.name.as_str(), |attempt| {
                let query = &query;
                async move {
                    tracing::debug!(cohort = %def.name, attempt, "Executing cohort query");
                    match tokio::time::timeout(self.timeout, self.backend.fetch_table(query)).await {
                        Ok(result) => result,
                        Err(_) => Err(CohortError::QueryTimeout(format!(
                            "cohort '{}' exceeded {}s",
                            def.name,
                            self.timeout.as_secs()
                        ))),
                    }
                }
            })
            .await?;

        Ok(CohortResult {
            cohort: def.name.clone(),
            table,
            extracted_at: Utc::now(),
            sql: query.sql,
        })
    }
}
