//! Resolution of requested cohort names against the registry

use crate::config::CohortRegistry;
use crate::domain::cohort::CohortDefinition;
use crate::domain::{CohortError, Result};
use std::collections::HashSet;

/// Keyword that requests every registered cohort
pub const ALL_COHORTS: &str = "all";

/// Resolves the cohorts a run should process
///
/// An empty request, or the single keyword `all` when no cohort carries that
/// name, selects the whole registry in file order. Otherwise the requested
/// names are returned in request order with repeats dropped.
///
/// # Errors
///
/// Returns [`CohortError::UnknownCohort`] naming every requested cohort that
/// is not registered.
pub fn resolve_cohorts(
    registry: &CohortRegistry,
    requested: &[String],
) -> Result<Vec<CohortDefinition>> {
    let requested: Vec<&str> = requested
        .iter()
        .map(|name| name.trim())
        .filter(|name| !name.is_empty())
        .collect();

    let wants_all = match requested.as_slice() {
        [] => true,
        [only] => only.eq_ignore_ascii_case(ALL_COHORTS) && !registry.contains(only),
        _ => false,
    };
    if wants_all {
        return Ok(registry.iter().cloned().collect());
    }

    let mut seen = HashSet::new();
    let mut resolved = Vec::with_capacity(requested.len());
    let mut unknown = Vec::new();

    for name in requested {
        if !seen.insert(name) {
            continue;
        }
        match registry.get(name) {
            Some(def) => resolved.push(def.clone()),
            None => unknown.push(name.to_string()),
        }
    }

    if !unknown.is_empty() {
        return Err(CohortError::UnknownCohort(unknown));
    }
    Ok(resolved)
}

/// Splits a comma-separated cohort list
pub fn parse_cohort_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_registry;
    use test_case::test_case;

    const REGISTRY: &str = r#"
[[cohort]]
name = "HTN_Conservative"
source = "claims_diagnoses"

[[cohort]]
name = "T2D"
source = "claims_diagnoses"

[[cohort]]
name = "CKD"
source = "labs"
"#;

    fn names(defs: &[CohortDefinition]) -> Vec<&str> {
        defs.iter().map(|d| d.name.as_str()).collect()
    }

    fn request(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test_case(&[] ; "empty request")]
    #[test_case(&["all"] ; "all keyword")]
    #[test_case(&["ALL"] ; "all keyword any case")]
    #[test_case(&[" ", ""] ; "blank names")]
    fn test_resolves_whole_registry(req: &[&str]) {
        let registry = parse_registry(REGISTRY).unwrap();
        let defs = resolve_cohorts(&registry, &request(req)).unwrap();
        assert_eq!(names(&defs), vec!["HTN_Conservative", "T2D", "CKD"]);
    }

    #[test]
    fn test_explicit_names_keep_request_order() {
        let registry = parse_registry(REGISTRY).unwrap();
        let defs = resolve_cohorts(&registry, &request(&["CKD", "HTN_Conservative", "CKD"])).unwrap();
        assert_eq!(names(&defs), vec!["CKD", "HTN_Conservative"]);
    }

    #[test]
    fn test_unknown_names_are_all_reported() {
        let registry = parse_registry(REGISTRY).unwrap();
        let err = resolve_cohorts(&registry, &request(&["T2D", "Nope", "htn_conservative"]))
            .unwrap_err();
        match err {
            CohortError::UnknownCohort(unknown) => {
                assert_eq!(unknown, vec!["Nope".to_string(), "htn_conservative".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_cohort_named_all_is_literal() {
        let registry = parse_registry(
            r#"
[[cohort]]
name = "all"
source = "members"

[[cohort]]
name = "Other"
source = "members"
"#,
        )
        .unwrap();
        let defs = resolve_cohorts(&registry, &request(&["all"])).unwrap();
        assert_eq!(names(&defs), vec!["all"]);
    }

    #[test]
    fn test_parse_cohort_list() {
        assert_eq!(parse_cohort_list(" A, B ,,C "), vec!["A", "B", "C"]);
        assert!(parse_cohort_list("").is_empty());
    }
}
