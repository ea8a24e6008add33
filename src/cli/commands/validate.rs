//! Validate config command implementation
//!
//! This module implements the `validate-config` command for validating
//! the connection configuration and the cohort registry.

use crate::config::{load_config, load_registry};
use clap::Args;

/// Arguments for the validate-config command
#[derive(Args, Debug)]
pub struct ValidateArgs {}

impl ValidateArgs {
    /// Execute the validate-config command
    pub async fn execute(&self, connection_path: &str, registry_path: &str) -> anyhow::Result<i32> {
        tracing::info!(
            connection_path = %connection_path,
            registry_path = %registry_path,
            "Validating configuration"
        );

        println!("🔍 Validating connection configuration: {connection_path}");
        let config = match load_config(connection_path) {
            Ok(c) => {
                println!("✅ Connection configuration is valid");
                c
            }
            Err(e) => {
                println!("❌ Connection configuration is invalid");
                println!("   Error: {e}");
                return Ok(2);
            }
        };

        println!("🔍 Validating cohort registry: {registry_path}");
        let registry = match load_registry(registry_path) {
            Ok(r) => {
                println!("✅ Cohort registry is valid");
                r
            }
            Err(e) => {
                println!("❌ Cohort registry is invalid");
                println!("   Error: {e}");
                return Ok(2);
            }
        };

        println!();
        println!("Configuration Summary:");
        println!("  Log Level: {}", config.application.log_level);
        println!("  Database: {}", config.postgres.display_target());
        println!("  Schema: {}", config.postgres.schema);
        println!("  SSL Mode: {}", config.postgres.ssl_mode);
        println!("  Max Connections: {}", config.postgres.max_connections);
        println!("  Query Timeout: {}s", config.query.timeout_seconds);
        println!("  Max Retries: {}", config.query.retry.max_retries);
        println!("  Max Parallel Cohorts: {}", config.export.max_parallel_cohorts);
        println!("  Combined File: {}", config.export.combined_file_name);
        println!("  Combined Columns: {}", config.export.combined_columns.join(", "));
        println!("  Parquet Compression: {}", config.export.compression);
        println!("  Cohorts: {} ({})", registry.len(), registry.names().join(", "));
        println!();
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const CONNECTION: &str = "[postgres]\nhost = \"localhost\"\nuser = \"reader\"\ndatabase = \"claims\"\n";

    #[tokio::test]
    async fn test_validate_valid_files() {
        let dir = TempDir::new().unwrap();
        let connection = dir.path().join("db_connection.toml");
        let registry = dir.path().join("cohorts.toml");
        std::fs::write(&connection, CONNECTION).unwrap();
        std::fs::write(&registry, "[[cohort]]\nname = \"A\"\nsource = \"members\"\n").unwrap();

        let code = ValidateArgs {}
            .execute(connection.to_str().unwrap(), registry.to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(code, 0);
    }

    #[tokio::test]
    async fn test_validate_invalid_registry() {
        let dir = TempDir::new().unwrap();
        let connection = dir.path().join("db_connection.toml");
        let registry = dir.path().join("cohorts.toml");
        std::fs::write(&connection, CONNECTION).unwrap();
        std::fs::write(&registry, "[[cohort]]\nname = \"A\"\nsource = \"members; drop\"\n").unwrap();

        let code = ValidateArgs {}
            .execute(connection.to_str().unwrap(), registry.to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(code, 2);
    }
}
