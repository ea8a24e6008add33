//! Translation of cohort criteria into SQL
//!
//! Identifiers are validated and double-quoted. Values never appear in the
//! SQL text, they are carried as positional parameters in
//! [`CohortQuery::params`].

use crate::domain::cohort::{
    is_valid_identifier, CohortDefinition, Criterion, CriterionOp, CriterionValue,
};
use crate::domain::{QueryError, Result};

/// Source table alias in the outer query
const SOURCE_ALIAS: &str = "c";

/// Table alias inside the patient-level exclusion subquery
const EXCLUDE_ALIAS: &str = "x";

/// A parameterised read-only cohort query
#[derive(Debug, Clone, PartialEq)]
pub struct CohortQuery {
    /// SQL text with `$n` placeholders
    pub sql: String,

    /// Values bound to the placeholders, in order
    pub params: Vec<CriterionValue>,
}

/// Double-quotes an identifier
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Escapes LIKE wildcards so a prefix is matched literally
fn escape_like(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len() + 1);
    for ch in prefix.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('%');
    escaped
}

struct SqlBuilder {
    params: Vec<CriterionValue>,
}

impl SqlBuilder {
    fn bind(&mut self, value: CriterionValue) -> String {
        self.params.push(value);
        format!("${}", self.params.len())
    }

    fn render_criterion(&mut self, criterion: &Criterion, alias: &str) -> String {
        let column = format!("{alias}.{}", quote_ident(&criterion.column));
        let operands = criterion.operands();

        match criterion.op {
            CriterionOp::Eq
            | CriterionOp::Ne
            | CriterionOp::Gt
            | CriterionOp::Gte
            | CriterionOp::Lt
            | CriterionOp::Lte => {
                let symbol = match criterion.op {
                    CriterionOp::Eq => "=",
                    CriterionOp::Ne => "<>",
                    CriterionOp::Gt => ">",
                    CriterionOp::Gte => ">=",
                    CriterionOp::Lt => "<",
                    _ => "<=",
                };
                let placeholder = self.bind(operands[0].clone());
                format!("{column} {symbol} {placeholder}")
            }
            CriterionOp::In | CriterionOp::NotIn => {
                let placeholders: Vec<String> = operands
                    .into_iter()
                    .map(|v| self.bind(v.clone()))
                    .collect();
                let keyword = if criterion.op == CriterionOp::In {
                    "IN"
                } else {
                    "NOT IN"
                };
                format!("{column} {keyword} ({})", placeholders.join(", "))
            }
            CriterionOp::StartsWith => {
                let clauses: Vec<String> = operands
                    .into_iter()
                    .map(|v| {
                        let pattern = escape_like(&v.to_string());
                        let placeholder = self.bind(CriterionValue::Text(pattern));
                        format!("CAST({column} AS text) LIKE {placeholder} ESCAPE '\\'")
                    })
                    .collect();
                if clauses.len() == 1 {
                    clauses.join("")
                } else {
                    format!("({})", clauses.join(" OR "))
                }
            }
            CriterionOp::Between => {
                let low = self.bind(operands[0].clone());
                let high = self.bind(operands[1].clone());
                format!("{column} BETWEEN {low} AND {high}")
            }
            CriterionOp::IsNull => format!("{column} IS NULL"),
            CriterionOp::IsNotNull => format!("{column} IS NOT NULL"),
        }
    }

    fn render_any(&mut self, criteria: &[Criterion], alias: &str) -> String {
        let clauses: Vec<String> = criteria
            .iter()
            .map(|c| format!("({})", self.render_criterion(c, alias)))
            .collect();
        clauses.join(" OR ")
    }
}

/// Builds the query for one cohort
///
/// # Errors
///
/// Returns [`QueryError::InvalidCriteria`] if the definition or schema
/// name is invalid.
pub fn build_query(def: &CohortDefinition, schema: &str) -> Result<CohortQuery> {
    def.validate().map_err(QueryError::InvalidCriteria)?;
    if !is_valid_identifier(schema) {
        return Err(QueryError::InvalidCriteria(format!("invalid schema name '{schema}'")).into());
    }

    let mut builder = SqlBuilder { params: Vec::new() };
    let mut sql = String::from("SELECT ");
    if def.distinct {
        sql.push_str("DISTINCT ");
    }

    if def.columns.is_empty() {
        sql.push_str(&format!("{SOURCE_ALIAS}.*"));
    } else {
        let projection: Vec<String> = def
            .columns
            .iter()
            .map(|col| match def.casts.get(col) {
                Some(cast) => format!(
                    "CAST({SOURCE_ALIAS}.{} AS {}) AS {}",
                    quote_ident(col),
                    cast.to_lowercase(),
                    quote_ident(col)
                ),
                None => format!("{SOURCE_ALIAS}.{}", quote_ident(col)),
            })
            .collect();
        sql.push_str(&projection.join(", "));
    }

    sql.push_str(&format!(
        " FROM {}.{} {SOURCE_ALIAS}",
        quote_ident(schema),
        quote_ident(&def.source)
    ));

    let mut conditions: Vec<String> = def
        .include
        .iter()
        .map(|c| builder.render_criterion(c, SOURCE_ALIAS))
        .collect();

    if !def.exclude.is_empty() {
        match def.patient_key {
            Some(ref key) => {
                let exclude_source = def.exclude_source.as_deref().unwrap_or(&def.source);
                let any = builder.render_any(&def.exclude, EXCLUDE_ALIAS);
                conditions.push(format!(
                    "NOT EXISTS (SELECT 1 FROM {}.{} {EXCLUDE_ALIAS} WHERE {EXCLUDE_ALIAS}.{key_q} = {SOURCE_ALIAS}.{key_q} AND ({any}))",
                    quote_ident(schema),
                    quote_ident(exclude_source),
                    key_q = quote_ident(key),
                ));
            }
            None => {
                let any = builder.render_any(&def.exclude, SOURCE_ALIAS);
                conditions.push(format!("NOT COALESCE({any}, FALSE)"));
            }
        }
    }

    if !conditions.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
    }

    let order_by = def.effective_order_by();
    if !order_by.is_empty() {
        let keys: Vec<String> = order_by.iter().map(|c| quote_ident(c)).collect();
        sql.push_str(" ORDER BY ");
        sql.push_str(&keys.join(", "));
    }

    Ok(CohortQuery {
        sql,
        params: builder.params,
    })
}
