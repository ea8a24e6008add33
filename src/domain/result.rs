//! Result type alias for cohort extraction

use super::errors::CohortError;

/// Result type alias for cohort extraction operations
///
/// # Examples
///
/// ```
/// use cohort_extract::domain::result::Result;
/// use cohort_extract::domain::errors::CohortError;
///
/// fn failing_function() -> Result<()> {
///     Err(CohortError::Configuration("Invalid input".to_string()))
/// }
/// ```
pub type Result<T> = std::result::Result<T, CohortError>;
