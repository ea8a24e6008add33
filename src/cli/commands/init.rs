//! Init command implementation
//!
//! This module implements the `init` command for generating a sample
//! connection configuration and cohort registry.

use clap::Args;
use std::fs;
use std::path::Path;

/// Arguments for the init command
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Overwrite existing files
    #[arg(long)]
    pub force: bool,
}

impl InitArgs {
    /// Execute the init command
    ///
    /// Writes the sample files to the `--connection` and `--registry` paths.
    pub async fn execute(&self, connection_path: &str, registry_path: &str) -> anyhow::Result<i32> {
        tracing::info!(
            connection_path = %connection_path,
            registry_path = %registry_path,
            "Initializing configuration files"
        );

        println!("📝 Initializing cohort-extract configuration");
        println!();

        let targets = [
            (connection_path, Self::generate_connection_config()),
            (registry_path, Self::generate_registry()),
        ];

        if !self.force {
            let existing: Vec<&str> = targets
                .iter()
                .map(|(path, _)| *path)
                .filter(|path| Path::new(path).exists())
                .collect();
            if !existing.is_empty() {
                for path in existing {
                    println!("❌ File already exists: {path}");
                }
                println!("   Use --force to overwrite");
                return Ok(2);
            }
        }

        for (path, contents) in &targets {
            if let Err(e) = write_file(Path::new(path), contents) {
                println!("❌ Failed to write {path}");
                println!("   Error: {e}");
                return Ok(5);
            }
            println!("✅ Created {path}");
        }

        println!();
        println!("Next steps:");
        println!("  1. Edit {connection_path} with your database settings");
        println!("  2. Set COHORT_DB_PASSWORD in your environment or a .env file");
        println!("  3. Define your cohorts in {registry_path}");
        println!("  4. Validate configuration: cohort-extract validate-config");
        println!("  5. Check the database: cohort-extract check-connection");
        println!("  6. Extract cohorts: cohort-extract run --output-dir output");
        println!();
        Ok(0)
    }

    /// Sample connection configuration
    fn generate_connection_config() -> String {
        r#"# cohort-extract connection configuration

[application]
log_level = "info"  # trace | debug | info | warn | error

[postgres]
host = "localhost"
port = 5432
user = "cohort_reader"
password = "${COHORT_DB_PASSWORD}"
database = "claims"
schema = "public"
ssl_mode = "prefer"  # disable | allow | prefer | require | verify-ca | verify-full
max_connections = 4
connect_timeout_seconds = 10
application_name = "cohort-extract"

[query]
timeout_seconds = 300

[query.retry]
max_retries = 3
initial_delay_ms = 1000
max_delay_ms = 30000
backoff_multiplier = 2.0
jitter = true

[export]
max_parallel_cohorts = 1
combined_file_name = "combined_cohorts.csv"
combined_columns = ["member_id_hash"]
compression = "snappy"  # none | snappy | zstd

[logging]
local_enabled = false
local_path = "logs"
local_rotation = "daily"  # daily | hourly | never
"#
        .to_string()
    }

    /// Sample cohort registry
    fn generate_registry() -> String {
        r#"# cohort-extract cohort registry
#
# Each [[cohort]] selects rows from `source` where every include criterion
# holds and no exclude criterion holds. Operators: eq, ne, in, not_in,
# starts_with, gt, gte, lt, lte, between, is_null, is_not_null.

[[cohort]]
name = "HTN_Conservative"
description = "Essential hypertension diagnoses since 2023"
source = "claims_diagnoses"
columns = ["member_id_hash", "icd_code", "date_of_service"]
patient_key = "member_id_hash"
distinct = true

[[cohort.include]]
column = "icd_code"
op = "starts_with"
values = ["I10"]

[[cohort.include]]
column = "date_of_service"
op = "gte"
value = "2023-01-01"

[[cohort]]
name = "T2D_No_Insulin"
description = "Type 2 diabetes without an insulin prescription"
source = "claims_diagnoses"
columns = ["member_id_hash", "icd_code"]
patient_key = "member_id_hash"
exclude_source = "claims_drugs"

[[cohort.include]]
column = "icd_code"
op = "starts_with"
values = ["E11"]

[[cohort.exclude]]
column = "drug_class"
op = "eq"
value = "insulin"
"#
        .to_string()
    }
}

fn write_file(path: &Path, contents: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, contents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_registry;
    use crate::config::schema::CohortConfig;
    use tempfile::TempDir;

    #[test]
    fn test_generated_connection_config_parses() {
        let contents = InitArgs::generate_connection_config()
            .replace("${COHORT_DB_PASSWORD}", "secret");
        let config: CohortConfig = toml::from_str(&contents).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.postgres.database, "claims");
    }

    #[test]
    fn test_generated_registry_is_valid() {
        let registry = parse_registry(&InitArgs::generate_registry()).unwrap();
        assert_eq!(registry.names(), vec!["HTN_Conservative", "T2D_No_Insulin"]);
    }

    #[tokio::test]
    async fn test_init_refuses_to_overwrite() {
        let dir = TempDir::new().unwrap();
        let connection = dir.path().join("configs/db_connection.toml");
        let registry = dir.path().join("configs/cohorts.toml");
        let (connection, registry) = (connection.to_str().unwrap(), registry.to_str().unwrap());

        let args = InitArgs { force: false };
        assert_eq!(args.execute(connection, registry).await.unwrap(), 0);
        assert!(Path::new(connection).exists());
        assert!(Path::new(registry).exists());

        assert_eq!(args.execute(connection, registry).await.unwrap(), 2);
        assert_eq!(
            InitArgs { force: true }
                .execute(connection, registry)
                .await
                .unwrap(),
            0
        );
    }
}
