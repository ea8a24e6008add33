//! Shared fixtures for integration tests
//!
//! [`ScriptedBackend`] stands in for PostgreSQL: each source table is given
//! a script and queries are dispatched on the table named in their FROM
//! clause.

#![allow(dead_code)]

use async_trait::async_trait;
use cohort_extract::adapters::database::QueryBackend;
use cohort_extract::config::schema::CohortConfig;
use cohort_extract::config::{parse_registry, CohortRegistry};
use cohort_extract::core::query::CohortQuery;
use cohort_extract::domain::table::{CellValue, Column, ColumnKind, TableData};
use cohort_extract::domain::{CohortError, QueryError, Result};
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::Mutex;

/// Behaviour of one source table
pub enum Script {
    /// Always returns the table
    Rows(TableData),
    /// Fails with a connection error `failures` times, then returns the table
    Flaky { failures: u32, table: TableData },
    /// Every query fails with a connection error
    Unreachable,
    /// Every query fails with a permission error
    Denied,
}

#[derive(Default)]
pub struct ScriptedBackend {
    scripts: HashMap<String, Script>,
    calls: Mutex<HashMap<String, u32>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, table: &str, script: Script) -> Self {
        self.scripts.insert(table.to_string(), script);
        self
    }

    /// Queries issued against a table so far
    pub fn calls(&self, table: &str) -> u32 {
        self.calls
            .lock()
            .unwrap()
            .get(table)
            .copied()
            .unwrap_or_default()
    }

    fn source_of(&self, sql: &str) -> Option<String> {
        self.scripts
            .keys()
            .find(|table| sql.contains(&format!("FROM \"public\".\"{table}\" c")))
            .cloned()
    }
}

#[async_trait]
impl QueryBackend for ScriptedBackend {
    async fn fetch_table(&self, query: &CohortQuery) -> Result<TableData> {
        let table = self.source_of(&query.sql).ok_or_else(|| {
            CohortError::Query(QueryError::UndefinedObject(format!(
                "no script for query: {}",
                query.sql
            )))
        })?;

        let call = {
            let mut calls = self.calls.lock().unwrap();
            let count = calls.entry(table.clone()).or_default();
            *count += 1;
            *count
        };

        match &self.scripts[&table] {
            Script::Rows(data) => Ok(data.clone()),
            Script::Flaky { failures, table } if call > *failures => Ok(table.clone()),
            Script::Flaky { .. } | Script::Unreachable => Err(CohortError::Query(
                QueryError::ConnectionFailed("could not connect to server: Connection refused".into()),
            )),
            Script::Denied => Err(CohortError::Query(QueryError::PermissionDenied(format!(
                "permission denied for table {table} (SQLSTATE 42501)"
            )))),
        }
    }

    async fn test_connection(&self) -> Result<()> {
        Ok(())
    }

    fn describe(&self) -> String {
        "scripted backend".to_string()
    }
}

/// Diagnosis rows: member id, ICD code, service date
pub fn diagnoses(rows: &[(&str, &str, (i32, u32, u32))]) -> TableData {
    let mut table = TableData::new(vec![
        Column::new("member_id_hash", ColumnKind::Text),
        Column::new("icd_code", ColumnKind::Text),
        Column::new("date_of_service", ColumnKind::Date),
    ]);
    for (member, code, (y, m, d)) in rows {
        table
            .push_row(vec![
                CellValue::Text(member.to_string()),
                CellValue::Text(code.to_string()),
                CellValue::Date(NaiveDate::from_ymd_opt(*y, *m, *d).unwrap()),
            ])
            .unwrap();
    }
    table
}

/// Member rows: member id and age
pub fn members(count: usize) -> TableData {
    let mut table = TableData::new(vec![
        Column::new("member_id_hash", ColumnKind::Text),
        Column::new("age", ColumnKind::Integer),
    ]);
    for i in 0..count {
        table
            .push_row(vec![
                CellValue::Text(format!("member-{i:04}")),
                CellValue::Integer(40 + (i as i64 % 30)),
            ])
            .unwrap();
    }
    table
}

/// Member rows whose integer column holds text, which the Parquet writer rejects
pub fn mistyped(count: usize) -> TableData {
    let mut table = members(count);
    for row in &mut table.rows {
        row[1] = CellValue::Text("unknown".to_string());
    }
    table
}

pub const REGISTRY: &str = r#"
[[cohort]]
name = "HTN_Conservative"
description = "Essential hypertension"
source = "claims_diagnoses"
columns = ["member_id_hash", "icd_code", "date_of_service"]
patient_key = "member_id_hash"

[[cohort.include]]
column = "icd_code"
op = "starts_with"
values = ["I10"]

[[cohort]]
name = "Adults"
source = "members"
patient_key = "member_id_hash"

[[cohort.include]]
column = "age"
op = "gte"
value = 18

[[cohort]]
name = "Lab_Panel"
source = "labs"
patient_key = "member_id_hash"
"#;

pub fn registry() -> CohortRegistry {
    parse_registry(REGISTRY).unwrap()
}

/// Configuration with fast retries
pub fn config(max_retries: u32, max_parallel: usize) -> CohortConfig {
    let toml = format!(
        r#"
[postgres]
host = "localhost"
user = "reader"
database = "claims"

[query]
timeout_seconds = 30

[query.retry]
max_retries = {max_retries}
initial_delay_ms = 1
max_delay_ms = 5
jitter = false

[export]
max_parallel_cohorts = {max_parallel}
"#
    );
    let config: CohortConfig = toml::from_str(&toml).unwrap();
    config.validate().unwrap();
    config
}
