//! Database backend factory
//!
//! Creates the database backend from configuration.

use crate::adapters::database::traits::{CatalogInspector, QueryBackend};
use crate::adapters::postgresql::PostgresClient;
use crate::config::schema::CohortConfig;
use crate::domain::Result;
use std::sync::Arc;
use std::time::Duration;

/// Create the query backend and catalog inspector from the same client
///
/// Both trait objects share one connection pool.
///
/// # Errors
///
/// Returns an error if the TLS connector or the connection pool cannot be
/// created. No connection is opened here.
pub fn create_database_backend(
    config: &CohortConfig,
) -> Result<(Arc<dyn QueryBackend>, Arc<dyn CatalogInspector>)> {
    tracing::info!(
        target = %config.postgres.display_target(),
        ssl_mode = %config.postgres.ssl_mode,
        "Creating PostgreSQL client"
    );

    let client = Arc::new(PostgresClient::new(
        &config.postgres,
        Duration::from_secs(config.query.timeout_seconds),
    )?);

    Ok((
        client.clone() as Arc<dyn QueryBackend>,
        client as Arc<dyn CatalogInspector>,
    ))
}
