//! Domain identifier types with validation

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Cohort name newtype wrapper
///
/// The name is the registry key and also names the cohort's output files,
/// so it is restricted to letters, digits, `_`, `-` and `.` and may not
/// start with a dot.
///
/// # Examples
///
/// ```
/// use cohort_extract::domain::ids::CohortName;
/// use std::str::FromStr;
///
/// let name = CohortName::from_str("HTN_Conservative").unwrap();
/// assert_eq!(name.as_str(), "HTN_Conservative");
/// assert!(CohortName::from_str("../etc").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CohortName(String);

impl CohortName {
    /// Creates a new CohortName from a string
    pub fn new(name: impl Into<String>) -> Result<Self, String> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err("Cohort name cannot be empty".to_string());
        }
        if name.starts_with('.') {
            return Err(format!("Cohort name cannot start with '.': {name}"));
        }
        if let Some(bad) = name
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')))
        {
            return Err(format!(
                "Invalid character '{bad}' in cohort name '{name}'. Allowed: letters, digits, '_', '-', '.'"
            ));
        }
        Ok(Self(name))
    }

    /// Returns the cohort name as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes self and returns the inner String
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for CohortName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CohortName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for CohortName {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<CohortName> for String {
    fn from(name: CohortName) -> Self {
        name.0
    }
}

impl AsRef<str> for CohortName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("HTN_Conservative" ; "underscore")]
    #[test_case("diabetes-type2" ; "hyphen")]
    #[test_case("ckd.stage3" ; "dot inside")]
    fn test_valid_cohort_names(name: &str) {
        assert!(CohortName::new(name).is_ok());
    }

    #[test_case("" ; "empty")]
    #[test_case("   " ; "whitespace")]
    #[test_case(".hidden" ; "leading dot")]
    #[test_case("a/b" ; "path separator")]
    #[test_case("with space" ; "space")]
    fn test_invalid_cohort_names(name: &str) {
        assert!(CohortName::new(name).is_err());
    }

    #[test]
    fn test_cohort_name_serde_validates() {
        let ok: CohortName = serde_json::from_str("\"HTN\"").unwrap();
        assert_eq!(ok.as_str(), "HTN");

        let bad = serde_json::from_str::<CohortName>("\"../x\"");
        assert!(bad.is_err());
    }

    #[test]
    fn test_cohort_name_display() {
        let name = CohortName::new("CKD").unwrap();
        assert_eq!(format!("{name}"), "CKD");
        assert_eq!(name.into_inner(), "CKD");
    }
}
