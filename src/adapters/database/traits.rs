//! Database abstraction traits
//!
//! Cohort extraction only needs two capabilities from a database: running
//! a parameterised read-only query, and looking up catalog information for
//! connection checks. Both are traits so the pipeline can be driven by a
//! scripted backend in tests.

use crate::core::query::CohortQuery;
use crate::domain::table::TableData;
use crate::domain::Result;
use async_trait::async_trait;

/// Read-only query execution
#[async_trait]
pub trait QueryBackend: Send + Sync {
    /// Runs one cohort query and returns its rows
    ///
    /// # Errors
    ///
    /// Returns [`crate::domain::CohortError::Query`] or
    /// [`crate::domain::CohortError::QueryTimeout`]. Transient failures are
    /// reported as such, retrying is left to the caller.
    async fn fetch_table(&self, query: &CohortQuery) -> Result<TableData>;

    /// Test the database connection
    ///
    /// # Errors
    ///
    /// Returns an error if the connection test fails.
    async fn test_connection(&self) -> Result<()>;

    /// Connection target for display, never including credentials
    fn describe(&self) -> String;
}

/// Catalog lookups used by the connection check
#[async_trait]
pub trait CatalogInspector: Send + Sync {
    /// Server version string
    async fn server_version(&self) -> Result<String>;

    /// All schema names visible to the login role
    async fn list_schemas(&self) -> Result<Vec<String>>;

    /// Column names of a table or view, in ordinal order
    ///
    /// An empty list means the table does not exist or is not visible.
    async fn table_columns(&self, schema: &str, table: &str) -> Result<Vec<String>>;

    /// Row count of a table or view
    async fn count_rows(&self, schema: &str, table: &str) -> Result<u64>;
}
