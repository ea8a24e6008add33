//! Cohort definitions and filter criteria
//!
//! A cohort is a named selection over one source table: the rows that
//! satisfy every inclusion criterion and none of the exclusion criteria.
//! Definitions are loaded from the registry file and stay immutable for the
//! duration of a run.

use crate::domain::ids::CohortName;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern is valid")
});

/// SQL types a projected column may be cast to
pub const ALLOWED_CASTS: &[&str] = &[
    "text",
    "varchar",
    "smallint",
    "integer",
    "bigint",
    "real",
    "float8",
    "double precision",
    "boolean",
    "date",
    "timestamp",
    "timestamptz",
];

/// Returns true if `name` is a plain SQL identifier
pub fn is_valid_identifier(name: &str) -> bool {
    IDENTIFIER.is_match(name)
}

/// Comparison operator of a criterion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriterionOp {
    Eq,
    Ne,
    In,
    NotIn,
    StartsWith,
    Gt,
    Gte,
    Lt,
    Lte,
    Between,
    IsNull,
    IsNotNull,
}

impl CriterionOp {
    /// Checks the number of operands the operator takes
    fn check_arity(&self, count: usize) -> Result<(), String> {
        let ok = match self {
            CriterionOp::Eq
            | CriterionOp::Ne
            | CriterionOp::Gt
            | CriterionOp::Gte
            | CriterionOp::Lt
            | CriterionOp::Lte => count == 1,
            CriterionOp::In | CriterionOp::NotIn | CriterionOp::StartsWith => count >= 1,
            CriterionOp::Between => count == 2,
            CriterionOp::IsNull | CriterionOp::IsNotNull => count == 0,
        };
        if ok {
            Ok(())
        } else {
            Err(format!(
                "operator '{self}' does not accept {count} value(s)"
            ))
        }
    }
}

impl fmt::Display for CriterionOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CriterionOp::Eq => "eq",
            CriterionOp::Ne => "ne",
            CriterionOp::In => "in",
            CriterionOp::NotIn => "not_in",
            CriterionOp::StartsWith => "starts_with",
            CriterionOp::Gt => "gt",
            CriterionOp::Gte => "gte",
            CriterionOp::Lt => "lt",
            CriterionOp::Lte => "lte",
            CriterionOp::Between => "between",
            CriterionOp::IsNull => "is_null",
            CriterionOp::IsNotNull => "is_not_null",
        };
        write!(f, "{s}")
    }
}

/// A literal operand of a criterion
///
/// Values are always bound as query parameters. Text values are converted
/// to the column's type at bind time, so dates can be written as
/// `"2023-01-01"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CriterionValue {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl CriterionValue {
    /// Short name of the value's kind, for error messages
    pub fn kind_name(&self) -> &'static str {
        match self {
            CriterionValue::Boolean(_) => "boolean",
            CriterionValue::Integer(_) => "integer",
            CriterionValue::Float(_) => "float",
            CriterionValue::Text(_) => "text",
        }
    }
}

impl fmt::Display for CriterionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CriterionValue::Boolean(b) => write!(f, "{b}"),
            CriterionValue::Integer(i) => write!(f, "{i}"),
            CriterionValue::Float(v) => write!(f, "{v}"),
            CriterionValue::Text(s) => write!(f, "{s}"),
        }
    }
}

/// A single filter condition on one column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Criterion {
    /// Column the condition applies to
    pub column: String,

    /// Comparison operator
    pub op: CriterionOp,

    /// Single operand (shorthand for `values = [x]`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<CriterionValue>,

    /// Operands
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<CriterionValue>,
}

impl Criterion {
    /// Creates a criterion with the given operands
    pub fn new(column: impl Into<String>, op: CriterionOp, values: Vec<CriterionValue>) -> Self {
        Self {
            column: column.into(),
            op,
            value: None,
            values,
        }
    }

    /// All operands, with `value` first if present
    pub fn operands(&self) -> Vec<&CriterionValue> {
        self.value.iter().chain(self.values.iter()).collect()
    }

    fn validate(&self) -> Result<(), String> {
        if !is_valid_identifier(&self.column) {
            return Err(format!("invalid column name '{}'", self.column));
        }
        let operands = self.operands();
        self.op
            .check_arity(operands.len())
            .map_err(|e| format!("column '{}': {e}", self.column))?;
        if self.op == CriterionOp::StartsWith
            && operands
                .iter()
                .any(|v| !matches!(v, CriterionValue::Text(_)))
        {
            return Err(format!(
                "column '{}': starts_with requires text values",
                self.column
            ));
        }
        Ok(())
    }
}

/// A named cohort and its selection criteria
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CohortDefinition {
    /// Unique registry key
    pub name: CohortName,

    /// Human readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Table or view the cohort is selected from
    pub source: String,

    /// Projected columns (empty = all columns)
    #[serde(default)]
    pub columns: Vec<String>,

    /// Casts applied to projected columns
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub casts: BTreeMap<String, String>,

    /// Emit distinct rows only
    #[serde(default)]
    pub distinct: bool,

    /// Column identifying a patient; switches exclusions to patient level
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_key: Option<String>,

    /// Table used to evaluate patient-level exclusions (defaults to `source`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_source: Option<String>,

    /// Output ordering (defaults to `patient_key`)
    #[serde(default)]
    pub order_by: Vec<String>,

    /// Inclusion criteria, all must hold
    #[serde(default)]
    pub include: Vec<Criterion>,

    /// Exclusion criteria, any match removes the row or patient
    #[serde(default)]
    pub exclude: Vec<Criterion>,
}

impl CohortDefinition {
    /// Creates a definition selecting every row of `source`
    pub fn new(name: CohortName, source: impl Into<String>) -> Self {
        Self {
            name,
            description: None,
            source: source.into(),
            columns: Vec::new(),
            casts: BTreeMap::new(),
            distinct: false,
            patient_key: None,
            exclude_source: None,
            order_by: Vec::new(),
            include: Vec::new(),
            exclude: Vec::new(),
        }
    }

    /// Columns the output is ordered by
    pub fn effective_order_by(&self) -> Vec<&str> {
        if !self.order_by.is_empty() {
            return self.order_by.iter().map(String::as_str).collect();
        }
        self.patient_key.iter().map(String::as_str).collect()
    }

    /// Validates the definition
    ///
    /// # Errors
    ///
    /// Returns a message naming the cohort and the offending field.
    pub fn validate(&self) -> Result<(), String> {
        let name = self.name.as_str();
        let err = |msg: String| format!("cohort '{name}': {msg}");

        if !is_valid_identifier(&self.source) {
            return Err(err(format!("invalid source table '{}'", self.source)));
        }
        if let Some(ref exclude_source) = self.exclude_source {
            if !is_valid_identifier(exclude_source) {
                return Err(err(format!("invalid exclude_source '{exclude_source}'")));
            }
            if self.patient_key.is_none() {
                return Err(err("exclude_source requires patient_key".to_string()));
            }
        }
        if let Some(ref key) = self.patient_key {
            if !is_valid_identifier(key) {
                return Err(err(format!("invalid patient_key '{key}'")));
            }
        }
        for column in self.columns.iter().chain(self.order_by.iter()) {
            if !is_valid_identifier(column) {
                return Err(err(format!("invalid column name '{column}'")));
            }
        }
        if self.distinct && !self.columns.is_empty() {
            if let Some(column) = self
                .effective_order_by()
                .into_iter()
                .find(|c| !self.columns.iter().any(|p| p == c))
            {
                return Err(err(format!(
                    "order_by column '{column}' must be listed in columns when distinct is set"
                )));
            }
        }
        for (column, cast) in &self.casts {
            if !self.columns.contains(column) {
                return Err(err(format!(
                    "cast for '{column}' requires it to be listed in columns"
                )));
            }
            if !ALLOWED_CASTS.contains(&cast.to_lowercase().as_str()) {
                return Err(err(format!(
                    "cast type '{cast}' for '{column}' is not allowed. Must be one of: {}",
                    ALLOWED_CASTS.join(", ")
                )));
            }
        }
        for criterion in self.include.iter().chain(self.exclude.iter()) {
            criterion.validate().map_err(err)?;
        }
        Ok(())
    }
}
