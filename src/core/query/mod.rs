//! Cohort query building and execution
//!
//! - [`builder`] translates a cohort definition into parameterised SQL
//! - [`retry`] holds the backoff policy for transient failures
//! - [`executor`] runs the query through a [`crate::adapters::database::QueryBackend`]

pub mod builder;
pub mod executor;
pub mod retry;

pub use builder::{build_query, CohortQuery};
pub use executor::QueryExecutor;
pub use retry::RetryPolicy;
