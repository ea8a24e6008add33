//! Cohort registry loading
//!
//! The registry file holds one `[[cohort]]` table per cohort definition.
//! Loading validates every definition and rejects duplicate names, so the
//! rest of the pipeline can assume a consistent registry.

use super::loader::{read_config_file, substitute_env_vars};
use crate::domain::cohort::CohortDefinition;
use crate::domain::errors::CohortError;
use crate::domain::result::Result;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct RegistryFile {
    #[serde(default, rename = "cohort")]
    cohorts: Vec<CohortDefinition>,
}

/// Immutable mapping of cohort name to definition, in file order
#[derive(Debug, Clone)]
pub struct CohortRegistry {
    definitions: Vec<CohortDefinition>,
    index: HashMap<String, usize>,
}

impl CohortRegistry {
    /// Builds a registry from definitions, validating each one
    ///
    /// # Errors
    ///
    /// Returns [`CohortError::Configuration`] if the list is empty, a name
    /// appears twice, or a definition is invalid.
    pub fn from_definitions(definitions: Vec<CohortDefinition>) -> Result<Self> {
        if definitions.is_empty() {
            return Err(CohortError::Configuration(
                "Cohort registry must define at least one cohort".to_string(),
            ));
        }

        let mut index = HashMap::with_capacity(definitions.len());
        let mut duplicates = Vec::new();
        for (pos, def) in definitions.iter().enumerate() {
            def.validate().map_err(CohortError::Configuration)?;
            if index.insert(def.name.to_string(), pos).is_some()
                && !duplicates.contains(&def.name.to_string())
            {
                duplicates.push(def.name.to_string());
            }
        }

        if !duplicates.is_empty() {
            return Err(CohortError::Configuration(format!(
                "Duplicate cohort name(s) in registry: {}",
                duplicates.join(", ")
            )));
        }

        Ok(Self { definitions, index })
    }

    /// Looks up a definition by exact name
    pub fn get(&self, name: &str) -> Option<&CohortDefinition> {
        self.index.get(name).map(|&pos| &self.definitions[pos])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Cohort names in file order
    pub fn names(&self) -> Vec<&str> {
        self.definitions.iter().map(|d| d.name.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CohortDefinition> {
        self.definitions.iter()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

/// Parses registry TOML text
///
/// # Errors
///
/// Returns [`CohortError::Configuration`] on malformed TOML or an invalid registry
pub fn parse_registry(contents: &str) -> Result<CohortRegistry> {
    let contents = substitute_env_vars(contents)?;
    let file: RegistryFile = toml::from_str(&contents).map_err(|e| {
        CohortError::Configuration(format!("Failed to parse cohort registry: {e}"))
    })?;
    CohortRegistry::from_definitions(file.cohorts)
}

/// Loads the cohort registry from a TOML file
///
/// # Errors
///
/// Returns [`CohortError::Configuration`] if the file is missing, malformed
/// or fails validation.
///
/// # Examples
///
/// ```no_run
/// use cohort_extract::config::load_registry;
///
/// let registry = load_registry("configs/cohorts.toml").expect("Failed to load registry");
/// println!("{} cohorts", registry.len());
/// ```
pub fn load_registry(path: impl AsRef<Path>) -> Result<CohortRegistry> {
    let path = path.as_ref();
    let contents = read_config_file(path)?;
    parse_registry(&contents).map_err(|e| match e {
        CohortError::Configuration(msg) => {
            CohortError::Configuration(format!("{}: {msg}", path.display()))
        }
        other => other,
    })
}
