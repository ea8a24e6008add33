//! Connection and catalog checks
//!
//! Verifies that the configured database can serve every registered cohort:
//! the schema exists, every referenced table exists and has the columns
//! that cohorts project, filter, order or join on.

use crate::adapters::database::CatalogInspector;
use crate::config::CohortRegistry;
use crate::domain::cohort::CohortDefinition;
use crate::domain::ids::CohortName;
use crate::domain::Result;
use std::collections::{BTreeMap, BTreeSet};

/// Findings for one referenced table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableCheck {
    pub table: String,
    pub present: bool,
    /// Columns the table actually has
    pub column_count: usize,
    /// Referenced columns the table lacks
    pub missing_columns: Vec<String>,
    /// `None` if the table is missing or could not be counted
    pub row_count: Option<u64>,
    /// Cohorts referencing the table
    pub used_by: Vec<CohortName>,
}

impl TableCheck {
    pub fn is_ok(&self) -> bool {
        self.present && self.missing_columns.is_empty()
    }
}

/// Result of a connection check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionReport {
    pub server_version: String,
    pub schemas: Vec<String>,
    pub schema: String,
    pub schema_present: bool,
    pub tables: Vec<TableCheck>,
}

impl ConnectionReport {
    /// True when every referenced object exists
    pub fn is_ok(&self) -> bool {
        self.schema_present && self.tables.iter().all(TableCheck::is_ok)
    }
}

#[derive(Default)]
struct TableRequirements {
    columns: BTreeSet<String>,
    used_by: Vec<CohortName>,
}

impl TableRequirements {
    fn require(&mut self, cohort: &CohortName, columns: impl IntoIterator<Item = String>) {
        self.columns.extend(columns);
        if !self.used_by.contains(cohort) {
            self.used_by.push(cohort.clone());
        }
    }
}

/// Tables and columns the registry references
fn requirements(registry: &CohortRegistry) -> BTreeMap<String, TableRequirements> {
    let mut tables: BTreeMap<String, TableRequirements> = BTreeMap::new();

    for def in registry.iter() {
        tables
            .entry(def.source.clone())
            .or_default()
            .require(&def.name, source_columns(def));

        if let Some(exclude_source) = &def.exclude_source {
            let mut columns: Vec<String> =
                def.exclude.iter().map(|c| c.column.clone()).collect();
            columns.extend(def.patient_key.clone());
            tables
                .entry(exclude_source.clone())
                .or_default()
                .require(&def.name, columns);
        }
    }

    tables
}

fn source_columns(def: &CohortDefinition) -> Vec<String> {
    let mut columns = def.columns.clone();
    columns.extend(def.include.iter().map(|c| c.column.clone()));
    if def.exclude_source.is_none() {
        columns.extend(def.exclude.iter().map(|c| c.column.clone()));
    }
    columns.extend(def.patient_key.clone());
    columns.extend(def.effective_order_by().into_iter().map(str::to_string));
    columns
}

/// Checks the database against the registry
///
/// # Errors
///
/// Returns an error if the server cannot be reached or a catalog lookup
/// fails. Missing objects are reported, not returned as errors.
pub async fn inspect_connection(
    inspector: &dyn CatalogInspector,
    schema: &str,
    registry: &CohortRegistry,
) -> Result<ConnectionReport> {
    let server_version = inspector.server_version().await?;
    tracing::info!(version = %server_version, "Connected to server");

    let schemas = inspector.list_schemas().await?;
    let schema_present = schemas.iter().any(|s| s == schema);
    if !schema_present {
        tracing::warn!(schema, "Configured schema not found");
    }

    let mut tables = Vec::new();
    for (table, required) in requirements(registry) {
        let actual = inspector.table_columns(schema, &table).await?;
        let present = !actual.is_empty();

        let missing_columns = if present {
            required
                .columns
                .iter()
                .filter(|column| !actual.contains(column))
                .cloned()
                .collect()
        } else {
            Vec::new()
        };

        let row_count = if present {
            match inspector.count_rows(schema, &table).await {
                Ok(count) => Some(count),
                Err(e) => {
                    tracing::warn!(table = %table, error = %e, "Failed to count rows");
                    None
                }
            }
        } else {
            tracing::warn!(schema, table = %table, "Referenced table not found");
            None
        };

        tables.push(TableCheck {
            table,
            present,
            column_count: actual.len(),
            missing_columns,
            row_count,
            used_by: required.used_by,
        });
    }

    Ok(ConnectionReport {
        server_version,
        schemas,
        schema: schema.to_string(),
        schema_present,
        tables,
    })
}
