//! Run orchestration and reporting

pub mod orchestrator;
pub mod summary;

pub use orchestrator::RunOrchestrator;
pub use summary::{CohortFailure, FailureKind, RunManifest, RunSummary};
