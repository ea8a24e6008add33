//! PostgreSQL client implementation
//!
//! This module provides the pooled read-only client the cohort queries and
//! the connection check run through.

use crate::adapters::database::traits::{CatalogInspector, QueryBackend};
use crate::adapters::postgresql::decode::{column_kind, decode_cell};
use crate::adapters::postgresql::params::ParamConversionError;
use crate::config::schema::ConnectionConfig;
use crate::core::query::{builder::quote_ident, CohortQuery};
use crate::domain::table::{Column, TableData};
use crate::domain::{CohortError, QueryError, Result};
use async_trait::async_trait;
use deadpool_postgres::{
    Manager, ManagerConfig, Object, Pool, PoolError, RecyclingMethod, Runtime,
};
use native_tls::TlsConnector;
use postgres_native_tls::MakeTlsConnector;
use secrecy::ExposeSecret;
use std::error::Error as StdError;
use std::time::{Duration, Instant};
use tokio_postgres::config::SslMode;
use tokio_postgres::types::ToSql;

/// PostgreSQL client for cohort extraction
///
/// Holds a connection pool. Connections are opened lazily, so creating the
/// client never touches the network.
pub struct PostgresClient {
    /// Connection pool
    pool: Pool,

    /// Connection target without credentials
    target: String,

    /// Server-side statement timeout applied to every cohort query
    statement_timeout: Duration,
}

impl PostgresClient {
    /// Create a new PostgreSQL client
    ///
    /// # Errors
    ///
    /// Returns [`CohortError::Configuration`] if the TLS connector or the
    /// pool cannot be built.
    pub fn new(config: &ConnectionConfig, statement_timeout: Duration) -> Result<Self> {
        let pg_config = build_pg_config(config);
        let tls = build_tls_connector(&config.ssl_mode)?;

        let manager = Manager::from_config(
            pg_config,
            tls,
            ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            },
        );

        let timeout = Duration::from_secs(config.connect_timeout_seconds);
        let pool = Pool::builder(manager)
            .max_size(config.max_connections)
            .wait_timeout(Some(timeout))
            .create_timeout(Some(timeout))
            .recycle_timeout(Some(timeout))
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| {
                CohortError::Configuration(format!("Failed to create connection pool: {e}"))
            })?;

        Ok(Self {
            pool,
            target: config.display_target(),
            statement_timeout,
        })
    }

    /// Get a connection from the pool
    ///
    /// # Errors
    ///
    /// Returns a transient connection error on pool timeouts.
    pub async fn get_connection(&self) -> Result<Object> {
        self.pool.get().await.map_err(map_pool_error)
    }

    /// Get the pool statistics
    pub fn pool_status(&self) -> deadpool_postgres::Status {
        self.pool.status()
    }
}

#[async_trait]
impl QueryBackend for PostgresClient {
    async fn fetch_table(&self, query: &CohortQuery) -> Result<TableData> {
        let started = Instant::now();
        let mut conn = self.get_connection().await?;
        let client: &mut tokio_postgres::Client = &mut conn;

        let tx = client
            .build_transaction()
            .read_only(true)
            .start()
            .await
            .map_err(|e| classify_pg_error(&e))?;

        tx.batch_execute(&format!(
            "SET LOCAL statement_timeout = {}",
            self.statement_timeout.as_millis()
        ))
        .await
        .map_err(|e| classify_pg_error(&e))?;

        // Preparing first gives the column types even for empty results
        let statement = tx
            .prepare(&query.sql)
            .await
            .map_err(|e| classify_pg_error(&e))?;

        let columns = statement
            .columns()
            .iter()
            .map(|col| {
                column_kind(col.type_())
                    .map(|kind| Column::new(col.name(), kind))
                    .ok_or_else(|| QueryError::UnsupportedColumnType {
                        column: col.name().to_string(),
                        type_name: col.type_().name().to_string(),
                    })
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let params: Vec<&(dyn ToSql + Sync)> = query
            .params
            .iter()
            .map(|v| v as &(dyn ToSql + Sync))
            .collect();

        let rows = tx
            .query(&statement, &params)
            .await
            .map_err(|e| classify_pg_error(&e))?;

        let mut table = TableData::new(columns);
        for row in &rows {
            let cells = statement
                .columns()
                .iter()
                .enumerate()
                .map(|(idx, col)| decode_cell(row, idx, col.type_()))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| QueryError::Failed(format!("Failed to decode row: {e}")))?;
            table.push_row(cells).map_err(QueryError::Failed)?;
        }

        tx.commit().await.map_err(|e| classify_pg_error(&e))?;

        tracing::debug!(
            rows = table.row_count(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Query returned"
        );
        Ok(table)
    }

    async fn test_connection(&self) -> Result<()> {
        let client = self.get_connection().await?;

        client
            .query_one("SELECT 1", &[])
            .await
            .map_err(|e| classify_pg_error(&e))?;

        tracing::info!(target = %self.target, "PostgreSQL connection test successful");
        Ok(())
    }

    fn describe(&self) -> String {
        self.target.clone()
    }
}

#[async_trait]
impl CatalogInspector for PostgresClient {
    async fn server_version(&self) -> Result<String> {
        let client = self.get_connection().await?;
        let row = client
            .query_one("SHOW server_version", &[])
            .await
            .map_err(|e| classify_pg_error(&e))?;
        row.try_get::<_, String>(0)
            .map_err(|e| QueryError::Failed(e.to_string()).into())
    }

    async fn list_schemas(&self) -> Result<Vec<String>> {
        let client = self.get_connection().await?;
        let rows = client
            .query(
                "SELECT schema_name::text FROM information_schema.schemata ORDER BY 1",
                &[],
            )
            .await
            .map_err(|e| classify_pg_error(&e))?;
        rows.iter()
            .map(|row| row.try_get::<_, String>(0))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| QueryError::Failed(e.to_string()).into())
    }

    async fn table_columns(&self, schema: &str, table: &str) -> Result<Vec<String>> {
        let client = self.get_connection().await?;
        let rows = client
            .query(
                "SELECT column_name::text FROM information_schema.columns \
                 WHERE table_schema::text = $1 AND table_name::text = $2 \
                 ORDER BY ordinal_position",
                &[&schema, &table],
            )
            .await
            .map_err(|e| classify_pg_error(&e))?;
        rows.iter()
            .map(|row| row.try_get::<_, String>(0))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| QueryError::Failed(e.to_string()).into())
    }

    async fn count_rows(&self, schema: &str, table: &str) -> Result<u64> {
        let client = self.get_connection().await?;
        let sql = format!(
            "SELECT count(*) FROM {}.{}",
            quote_ident(schema),
            quote_ident(table)
        );
        let row = client
            .query_one(&sql, &[])
            .await
            .map_err(|e| classify_pg_error(&e))?;
        let count: i64 = row
            .try_get(0)
            .map_err(|e| QueryError::Failed(e.to_string()))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }
}

fn build_pg_config(config: &ConnectionConfig) -> tokio_postgres::Config {
    let mut pg_config = tokio_postgres::Config::new();
    pg_config
        .host(&config.host)
        .port(config.port)
        .user(&config.user)
        .dbname(&config.database)
        .application_name(&config.application_name)
        .connect_timeout(Duration::from_secs(config.connect_timeout_seconds))
        .ssl_mode(ssl_mode(&config.ssl_mode));

    if let Some(ref password) = config.password {
        let password: &str = password.expose_secret().as_ref();
        pg_config.password(password);
    }

    pg_config
}

/// Maps the libpq-style mode onto what tokio-postgres negotiates
fn ssl_mode(mode: &str) -> SslMode {
    match mode {
        "disable" => SslMode::Disable,
        "allow" | "prefer" => SslMode::Prefer,
        _ => SslMode::Require,
    }
}

/// Builds the TLS connector
///
/// Like libpq, only `verify-ca` and `verify-full` check the server
/// certificate, and only `verify-full` checks the host name.
fn build_tls_connector(mode: &str) -> Result<MakeTlsConnector> {
    let verify_cert = matches!(mode, "verify-ca" | "verify-full");
    let verify_host = mode == "verify-full";

    let connector = TlsConnector::builder()
        .danger_accept_invalid_certs(!verify_cert)
        .danger_accept_invalid_hostnames(!verify_host)
        .build()
        .map_err(|e| CohortError::Configuration(format!("Failed to build TLS connector: {e}")))?;

    Ok(MakeTlsConnector::new(connector))
}

fn map_pool_error(err: PoolError) -> CohortError {
    match err {
        PoolError::Backend(e) => classify_pg_error(&e),
        PoolError::Timeout(kind) => QueryError::ConnectionFailed(format!(
            "Timed out waiting for a database connection ({kind:?})"
        ))
        .into(),
        other => QueryError::ConnectionFailed(format!(
            "Failed to get connection from pool: {other}"
        ))
        .into(),
    }
}

/// Converts a driver error into a domain error, deciding transience
pub(crate) fn classify_pg_error(err: &tokio_postgres::Error) -> CohortError {
    if let Some(db_err) = err.as_db_error() {
        return classify_sqlstate(db_err.code().code(), db_err.message());
    }

    if err.is_closed() {
        return QueryError::ConnectionFailed(format!("Connection closed: {err}")).into();
    }

    if let Some(conversion) = err
        .source()
        .and_then(|source| source.downcast_ref::<ParamConversionError>())
    {
        return QueryError::InvalidCriteria(conversion.to_string()).into();
    }

    let message = err.to_string();
    if message.starts_with("error serializing") {
        return QueryError::InvalidCriteria(message).into();
    }
    if message.starts_with("error deserializing") {
        return QueryError::Failed(message).into();
    }

    // Remaining driver errors are I/O, TLS or connect failures
    QueryError::ConnectionFailed(message).into()
}

/// Maps a SQLSTATE code to a domain error
pub(crate) fn classify_sqlstate(code: &str, message: &str) -> CohortError {
    let detail = format!("{message} (SQLSTATE {code})");
    match code {
        "57014" => CohortError::QueryTimeout(detail),
        "57P01" | "57P02" | "57P03" | "53300" | "40001" => {
            QueryError::ConnectionFailed(detail).into()
        }
        c if c.starts_with("08") => QueryError::ConnectionFailed(detail).into(),
        "28P01" | "28000" => QueryError::AuthenticationFailed(detail).into(),
        "42501" => QueryError::PermissionDenied(detail).into(),
        "42P01" | "42703" | "42883" | "3F000" | "3D000" => {
            QueryError::UndefinedObject(detail).into()
        }
        "42601" | "42804" | "22P02" | "22007" | "22008" | "42725" => {
            QueryError::InvalidCriteria(detail).into()
        }
        _ => QueryError::Failed(detail).into(),
    }
}
