//! Domain models and types for cohort extraction.
//!
//! # Overview
//!
//! The domain layer provides:
//! - **Validated identifiers** ([`CohortName`])
//! - **Cohort definitions** ([`CohortDefinition`], [`Criterion`]) and their criteria grammar
//! - **Result sets** ([`TableData`], [`CohortResult`])
//! - **Metadata records** ([`RunMetadata`])
//! - **Error types** ([`CohortError`], [`QueryError`]) and the [`Result`] alias
//!
//! # Example
//!
//! ```rust
//! use cohort_extract::domain::{CohortDefinition, CohortName, Criterion, CriterionOp, CriterionValue};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut def = CohortDefinition::new(CohortName::new("HTN_Conservative")?, "claims_diagnoses");
//! def.include.push(Criterion::new(
//!     "icd_code",
//!     CriterionOp::StartsWith,
//!     vec![CriterionValue::Text("I10".to_string())],
//! ));
//! def.validate()?;
//! # Ok(())
//! # }
//! ```

pub mod cohort;
pub mod errors;
pub mod ids;
pub mod metadata;
pub mod result;
pub mod table;

// Re-export commonly used types for convenience
pub use cohort::{CohortDefinition, Criterion, CriterionOp, CriterionValue};
pub use errors::{CohortError, QueryError};
pub use ids::CohortName;
pub use metadata::{CohortParameters, RunMetadata};
pub use result::Result;
pub use table::{CellValue, CohortResult, Column, ColumnKind, TableData};
