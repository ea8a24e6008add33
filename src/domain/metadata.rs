//! Per-cohort metadata records
//!
//! A [`RunMetadata`] is written next to every exported cohort file and is
//! also collected into the run-level metadata store.

use crate::domain::cohort::{CohortDefinition, Criterion};
use crate::domain::ids::CohortName;
use crate::domain::table::Column;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Filter parameters a cohort was extracted with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CohortParameters {
    pub source: String,
    pub columns: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub casts: BTreeMap<String, String>,
    pub distinct: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_source: Option<String>,
    pub order_by: Vec<String>,
    pub include: Vec<Criterion>,
    pub exclude: Vec<Criterion>,
}

impl From<&CohortDefinition> for CohortParameters {
    fn from(def: &CohortDefinition) -> Self {
        Self {
            source: def.source.clone(),
            columns: def.columns.clone(),
            casts: def.casts.clone(),
            distinct: def.distinct,
            patient_key: def.patient_key.clone(),
            exclude_source: def.exclude_source.clone(),
            order_by: def
                .effective_order_by()
                .into_iter()
                .map(str::to_string)
                .collect(),
            include: def.include.clone(),
            exclude: def.exclude.clone(),
        }
    }
}

/// Summary record of one exported cohort
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    /// Cohort name
    pub cohort: CohortName,

    /// Cohort description from the registry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Number of rows in the individual file
    pub row_count: u64,

    /// When the query completed
    pub extracted_at: DateTime<Utc>,

    /// Individual file path relative to the output directory
    pub data_file: String,

    /// Exported columns
    pub columns: Vec<Column>,

    /// SHA-256 of the individual file
    pub checksum_sha256: String,

    /// Filter parameters used
    pub parameters: CohortParameters,

    /// SQL text that produced the rows
    pub sql: String,
}
