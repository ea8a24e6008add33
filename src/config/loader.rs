//! Configuration loader with TOML parsing and environment variable overrides

use super::schema::CohortConfig;
use super::secret::secret_string;
use crate::domain::errors::CohortError;
use crate::domain::result::Result;
use regex::Regex;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::sync::LazyLock;

static ENV_PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("placeholder pattern is valid")
});

/// Loads the connection configuration from a TOML file
///
/// This function:
/// 1. Reads the TOML file
/// 2. Performs environment variable substitution (${VAR} syntax)
/// 3. Parses the TOML into CohortConfig
/// 4. Applies environment variable overrides (COHORT_* prefix)
/// 5. Validates the configuration
///
/// # Errors
///
/// Returns [`CohortError::Configuration`] if the file is missing or
/// unreadable, a referenced environment variable is unset, the TOML is
/// malformed, or validation fails.
///
/// # Examples
///
/// ```no_run
/// use cohort_extract::config::loader::load_config;
///
/// let config = load_config("configs/db_connection.toml").expect("Failed to load config");
/// ```
pub fn load_config(path: impl AsRef<Path>) -> Result<CohortConfig> {
    let path = path.as_ref();

    let contents = read_config_file(path)?;
    let contents = substitute_env_vars(&contents)?;

    let mut config: CohortConfig = toml::from_str(&contents).map_err(|e| {
        CohortError::Configuration(format!("Failed to parse {}: {e}", path.display()))
    })?;

    apply_env_overrides(&mut config)?;

    config.validate().map_err(|e| {
        CohortError::Configuration(format!("Configuration validation failed: {e}"))
    })?;

    Ok(config)
}

/// Reads a configuration file, mapping failures to configuration errors
pub(crate) fn read_config_file(path: &Path) -> Result<String> {
    if !path.exists() {
        return Err(CohortError::Configuration(format!(
            "Configuration file not found: {}",
            path.display()
        )));
    }

    fs::read_to_string(path).map_err(|e| {
        CohortError::Configuration(format!(
            "Failed to read configuration file {}: {e}",
            path.display()
        ))
    })
}

/// Substitutes environment variables in the format ${VAR_NAME}
///
/// Comment lines are copied untouched.
///
/// # Errors
///
/// Returns an error listing every referenced variable that is not set
pub(crate) fn substitute_env_vars(input: &str) -> Result<String> {
    let mut lines = Vec::new();
    let mut missing_vars: Vec<String> = Vec::new();

    for line in input.lines() {
        if line.trim_start().starts_with('#') {
            lines.push(line.to_string());
            continue;
        }

        let processed = ENV_PLACEHOLDER.replace_all(line, |cap: &regex::Captures<'_>| {
            let var_name = &cap[1];
            match std::env::var(var_name) {
                Ok(value) => value,
                Err(_) => {
                    if !missing_vars.iter().any(|v| v == var_name) {
                        missing_vars.push(var_name.to_string());
                    }
                    String::new()
                }
            }
        });
        lines.push(processed.into_owned());
    }

    if !missing_vars.is_empty() {
        return Err(CohortError::Configuration(format!(
            "Missing required environment variables: {}",
            missing_vars.join(", ")
        )));
    }

    Ok(lines.join("\n"))
}

/// Applies environment variable overrides using the COHORT_* prefix
///
/// Variables follow the pattern `COHORT_<SECTION>_<KEY>`, for example
/// `COHORT_POSTGRES_HOST`. A numeric override that does not parse is a
/// configuration error rather than being silently ignored.
fn apply_env_overrides(config: &mut CohortConfig) -> Result<()> {
    if let Ok(val) = std::env::var("COHORT_APPLICATION_LOG_LEVEL") {
        config.application.log_level = val;
    }

    // Connection overrides
    if let Ok(val) = std::env::var("COHORT_POSTGRES_HOST") {
        config.postgres.host = val;
    }
    if let Some(port) = parse_override("COHORT_POSTGRES_PORT")? {
        config.postgres.port = port;
    }
    if let Ok(val) = std::env::var("COHORT_POSTGRES_USER") {
        config.postgres.user = val;
    }
    if let Ok(val) = std::env::var("COHORT_POSTGRES_PASSWORD") {
        config.postgres.password = Some(secret_string(val));
    }
    if let Ok(val) = std::env::var("COHORT_POSTGRES_DATABASE") {
        config.postgres.database = val;
    }
    if let Ok(val) = std::env::var("COHORT_POSTGRES_SCHEMA") {
        config.postgres.schema = val;
    }
    if let Ok(val) = std::env::var("COHORT_POSTGRES_SSL_MODE") {
        config.postgres.ssl_mode = val;
    }

    // Query overrides
    if let Some(timeout) = parse_override("COHORT_QUERY_TIMEOUT_SECONDS")? {
        config.query.timeout_seconds = timeout;
    }
    if let Some(retries) = parse_override("COHORT_QUERY_MAX_RETRIES")? {
        config.query.retry.max_retries = retries;
    }

    // Export overrides
    if let Some(parallel) = parse_override("COHORT_EXPORT_MAX_PARALLEL_COHORTS")? {
        config.export.max_parallel_cohorts = parallel;
    }

    // Logging overrides
    if let Some(enabled) = parse_override("COHORT_LOGGING_LOCAL_ENABLED")? {
        config.logging.local_enabled = enabled;
    }
    if let Ok(val) = std::env::var("COHORT_LOGGING_LOCAL_PATH") {
        config.logging.local_path = val;
    }

    Ok(())
}

fn parse_override<T: FromStr>(var: &str) -> Result<Option<T>> {
    match std::env::var(var) {
        Ok(val) => val.trim().parse().map(Some).map_err(|_| {
            CohortError::Configuration(format!("{var} has an invalid value '{val}'"))
        }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_substitute_env_vars() {
        std::env::set_var("COHORT_LOADER_TEST_VAR", "test_value");
        let input = "password = \"${COHORT_LOADER_TEST_VAR}\"";
        let result = substitute_env_vars(input).unwrap();
        assert_eq!(result, "password = \"test_value\"");
        std::env::remove_var("COHORT_LOADER_TEST_VAR");
    }

    #[test]
    fn test_substitute_env_vars_missing() {
        std::env::remove_var("COHORT_LOADER_MISSING_VAR");
        let input = "password = \"${COHORT_LOADER_MISSING_VAR}\"";
        let err = substitute_env_vars(input).unwrap_err();
        assert!(err.to_string().contains("COHORT_LOADER_MISSING_VAR"));
    }

    #[test]
    fn test_substitute_env_vars_skips_comments() {
        std::env::remove_var("COHORT_LOADER_COMMENTED_VAR");
        let input = "# password = \"${COHORT_LOADER_COMMENTED_VAR}\"\nhost = \"db\"";
        let result = substitute_env_vars(input).unwrap();
        assert_eq!(result, input);
    }

    #[test]
    fn test_load_config_missing_file() {
        let err = load_config("nonexistent.toml").unwrap_err();
        assert!(matches!(err, CohortError::Configuration(_)));
    }

    #[test]
    fn test_load_config_valid() {
        let toml_content = r#"
[postgres]
host = "db.internal"
user = "analyst"
password = "pass"
database = "claims"

[query]
timeout_seconds = 120
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let config = load_config(temp_file.path()).unwrap();
        assert_eq!(config.postgres.database, "claims");
        assert_eq!(config.postgres.schema, "public");
        assert_eq!(config.postgres.connect_timeout_seconds, 10);
        assert_eq!(config.query.timeout_seconds, 120);
        assert_eq!(config.query.retry.max_retries, 3);
        assert_eq!(config.export.combined_file_name, "combined_cohorts.csv");
        assert!(config
            .postgres
            .password
            .as_ref()
            .is_some_and(|p| p.expose_secret() == "pass"));
    }

    #[test]
    fn test_load_config_missing_postgres_section() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file
            .write_all(b"[application]\nlog_level = \"info\"\n")
            .unwrap();
        temp_file.flush().unwrap();

        let err = load_config(temp_file.path()).unwrap_err();
        assert!(matches!(err, CohortError::Configuration(_)));
    }

    #[test]
    fn test_load_config_rejects_invalid_values() {
        let toml_content = r#"
[postgres]
host = "db.internal"
user = "analyst"
database = "claims"
ssl_mode = "sometimes"
"#;
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let err = load_config(temp_file.path()).unwrap_err();
        assert!(err.to_string().contains("ssl_mode"));
    }
}
