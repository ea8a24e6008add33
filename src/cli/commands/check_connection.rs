//! Check connection command implementation
//!
//! Connects to the configured database and checks that every table and
//! column the registry references is present.

use crate::adapters::database::create_database_backend;
use crate::config::{load_config, load_registry};
use crate::core::inspect::{inspect_connection, ConnectionReport};
use clap::Args;

/// Arguments for the check-connection command
#[derive(Args, Debug)]
pub struct CheckConnectionArgs {}

impl CheckConnectionArgs {
    /// Execute the check-connection command
    pub async fn execute(&self, connection_path: &str, registry_path: &str) -> anyhow::Result<i32> {
        println!("🔌 Checking database connection");
        println!();

        let config = match load_config(connection_path) {
            Ok(c) => c,
            Err(e) => {
                println!("❌ Failed to load connection configuration");
                println!("   Error: {e}");
                return Ok(2);
            }
        };
        let registry = match load_registry(registry_path) {
            Ok(r) => r,
            Err(e) => {
                println!("❌ Failed to load cohort registry");
                println!("   Error: {e}");
                return Ok(2);
            }
        };

        println!("  Target: {}", config.postgres.display_target());

        let (backend, catalog) = match create_database_backend(&config) {
            Ok(b) => b,
            Err(e) => {
                println!("❌ Failed to create database client");
                println!("   Error: {e}");
                return Ok(4);
            }
        };

        if let Err(e) = backend.test_connection().await {
            tracing::error!(error = %e, "Connection test failed");
            println!("❌ Connection failed");
            println!("   Error: {e}");
            return Ok(4);
        }

        let report = match inspect_connection(catalog.as_ref(), &config.postgres.schema, &registry).await {
            Ok(r) => r,
            Err(e) => {
                tracing::error!(error = %e, "Catalog inspection failed");
                println!("❌ Catalog inspection failed");
                println!("   Error: {e}");
                return Ok(1);
            }
        };

        print_report(&report);
        Ok(if report.is_ok() { 0 } else { 1 })
    }
}

fn print_report(report: &ConnectionReport) {
    println!("✅ Connected");
    println!("  Server Version: {}", report.server_version);
    println!();

    println!("Schemas ({}):", report.schemas.len());
    for schema in &report.schemas {
        println!("  - {schema}");
    }
    if report.schema_present {
        println!("✅ Configured schema '{}' found", report.schema);
    } else {
        println!("❌ Configured schema '{}' not found", report.schema);
    }
    println!();

    println!("Referenced tables:");
    for table in &report.tables {
        let users: Vec<&str> = table.used_by.iter().map(|c| c.as_str()).collect();
        if !table.present {
            println!("  ❌ {}.{} missing (used by {})", report.schema, table.table, users.join(", "));
            continue;
        }

        let rows = table
            .row_count
            .map(|n| n.to_string())
            .unwrap_or_else(|| "?".to_string());
        let marker = if table.is_ok() { "✅" } else { "❌" };
        println!(
            "  {marker} {}.{}: {} columns, {rows} rows",
            report.schema, table.table, table.column_count
        );
        if !table.missing_columns.is_empty() {
            println!("     Missing columns: {}", table.missing_columns.join(", "));
        }
    }
    println!();

    if report.is_ok() {
        println!("✅ All referenced objects are present");
    } else {
        println!("❌ Some referenced objects are missing");
    }
}
