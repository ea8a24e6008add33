//! End-to-end runs against a scripted backend
//!
//! Each test resolves cohorts from a registry, runs them through the
//! orchestrator into a temporary output directory and inspects the files.

mod common;

use chrono::{TimeZone, Utc};
use cohort_extract::core::export::{count_combined_rows, read_table};
use cohort_extract::core::resolver::resolve_cohorts;
use cohort_extract::core::run::{FailureKind, RunManifest, RunOrchestrator};
use cohort_extract::domain::table::CellValue;
use cohort_extract::domain::{CohortError, RunMetadata};
use common::{config, diagnoses, members, mistyped, registry, ScriptedBackend, Script};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::watch;

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn htn_rows() -> Script {
    Script::Rows(diagnoses(&[
        ("a1", "I10", (2023, 2, 1)),
        ("b2", "I10.9", (2023, 3, 15)),
        ("c3", "I10", (2024, 1, 9)),
    ]))
}

fn read_manifest(dir: &Path) -> RunManifest {
    serde_json::from_slice(&fs::read(dir.join("run_metadata.json")).unwrap()).unwrap()
}

fn read_metadata(dir: &Path, cohort: &str) -> RunMetadata {
    let path = dir.join(format!("cohorts/{cohort}/{cohort}.metadata.json"));
    serde_json::from_slice(&fs::read(path).unwrap()).unwrap()
}

/// Sum of the row counts recorded by every cohort directory on disk
fn rows_on_disk(dir: &Path) -> u64 {
    fs::read_dir(dir.join("cohorts"))
        .unwrap()
        .map(|entry| {
            let name = entry.unwrap().file_name().to_string_lossy().into_owned();
            read_metadata(dir, &name).row_count
        })
        .sum()
}

#[tokio::test]
async fn test_single_cohort_run() {
    let out = TempDir::new().unwrap();
    let backend = Arc::new(ScriptedBackend::new().with("claims_diagnoses", htn_rows()));
    let cohorts = resolve_cohorts(&registry(), &names(&["HTN_Conservative"])).unwrap();

    let orchestrator = RunOrchestrator::from_config(backend.clone(), &config(0, 1), out.path()).unwrap();
    let (_tx, rx) = watch::channel(false);
    let summary = orchestrator.run(cohorts, rx).await.unwrap();

    assert!(summary.is_successful());
    assert_eq!(summary.exit_code(), 0);
    assert_eq!(summary.succeeded.len(), 1);

    let cohort_dir = out.path().join("cohorts/HTN_Conservative");
    let entries: Vec<_> = fs::read_dir(&cohort_dir).unwrap().collect();
    assert_eq!(entries.len(), 2);

    let metadata = read_metadata(out.path(), "HTN_Conservative");
    assert_eq!(metadata.row_count, 3);
    assert_eq!(metadata.description.as_deref(), Some("Essential hypertension"));
    assert_eq!(metadata.data_file, "cohorts/HTN_Conservative/HTN_Conservative.parquet");
    assert_eq!(metadata.checksum_sha256.len(), 64);
    assert!(metadata.sql.contains("LIKE $1"));

    let manifest = read_manifest(out.path());
    assert_eq!(manifest.cohorts.len(), 1);
    assert_eq!(manifest.cohorts[0], metadata);
    assert!(manifest.failures.is_empty());

    let combined = out.path().join("combined_cohorts.csv");
    assert_eq!(count_combined_rows(&combined).unwrap(), 3);
    assert_eq!(manifest.combined_rows, 3);

    assert_eq!(backend.calls("claims_diagnoses"), 1);
}

#[tokio::test]
async fn test_unknown_cohort_fails_before_any_query() {
    let backend = ScriptedBackend::new().with("claims_diagnoses", htn_rows());

    let err = resolve_cohorts(&registry(), &names(&["NonexistentCohort"])).unwrap_err();
    match err {
        CohortError::UnknownCohort(unknown) => assert_eq!(unknown, names(&["NonexistentCohort"])),
        other => panic!("unexpected error: {other}"),
    }
    assert!(err_is_fatal(&names(&["NonexistentCohort", "HTN_Conservative"])));
    assert_eq!(backend.calls("claims_diagnoses"), 0);
}

fn err_is_fatal(request: &[String]) -> bool {
    resolve_cohorts(&registry(), request)
        .err()
        .is_some_and(|e| e.is_fatal())
}

#[tokio::test]
async fn test_unreachable_cohort_fails_alone() {
    let out = TempDir::new().unwrap();
    let backend = Arc::new(
        ScriptedBackend::new()
            .with("claims_diagnoses", htn_rows())
            .with("members", Script::Unreachable)
            .with("labs", Script::Rows(members(5))),
    );
    let cohorts = resolve_cohorts(&registry(), &[]).unwrap();

    let orchestrator = RunOrchestrator::from_config(backend.clone(), &config(2, 2), out.path()).unwrap();
    let (_tx, rx) = watch::channel(false);
    let summary = orchestrator.run(cohorts, rx).await.unwrap();

    assert!(!summary.is_successful());
    assert_ne!(summary.exit_code(), 0);

    let exported: Vec<&str> = summary.succeeded.iter().map(|m| m.cohort.as_str()).collect();
    assert_eq!(exported, vec!["HTN_Conservative", "Lab_Panel"]);
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].cohort.as_str(), "Adults");
    assert_eq!(summary.failures[0].kind, FailureKind::Connection);

    // one attempt plus two retries
    assert_eq!(backend.calls("members"), 3);
    assert!(!out.path().join("cohorts/Adults").exists());

    let manifest = read_manifest(out.path());
    assert_eq!(manifest.failures.len(), 1);
    assert_eq!(manifest.combined_rows, 8);
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let out = TempDir::new().unwrap();
    let backend = Arc::new(ScriptedBackend::new().with(
        "members",
        Script::Flaky {
            failures: 2,
            table: members(4),
        },
    ));
    let cohorts = resolve_cohorts(&registry(), &names(&["Adults"])).unwrap();

    let orchestrator = RunOrchestrator::from_config(backend.clone(), &config(3, 1), out.path()).unwrap();
    let (_tx, rx) = watch::channel(false);
    let summary = orchestrator.run(cohorts, rx).await.unwrap();

    assert!(summary.is_successful());
    assert_eq!(summary.succeeded[0].row_count, 4);
    assert_eq!(backend.calls("members"), 3);
}

#[tokio::test]
async fn test_non_transient_failures_are_not_retried() {
    let out = TempDir::new().unwrap();
    let backend = Arc::new(ScriptedBackend::new().with("members", Script::Denied));
    let cohorts = resolve_cohorts(&registry(), &names(&["Adults"])).unwrap();

    let orchestrator = RunOrchestrator::from_config(backend.clone(), &config(3, 1), out.path()).unwrap();
    let (_tx, rx) = watch::channel(false);
    let summary = orchestrator.run(cohorts, rx).await.unwrap();

    assert_eq!(summary.failures[0].kind, FailureKind::Query);
    assert!(summary.failures[0].message.contains("42501"));
    assert_eq!(backend.calls("members"), 1);
}

#[tokio::test]
async fn test_combined_rows_equal_sum_of_cohorts() {
    let out = TempDir::new().unwrap();
    let backend = Arc::new(
        ScriptedBackend::new()
            .with("claims_diagnoses", htn_rows())
            .with("members", Script::Rows(members(120)))
            .with("labs", Script::Rows(members(0))),
    );
    let cohorts = resolve_cohorts(&registry(), &names(&["all"])).unwrap();

    let orchestrator = RunOrchestrator::from_config(backend, &config(0, 3), out.path()).unwrap();
    let (_tx, rx) = watch::channel(false);
    let summary = orchestrator.run(cohorts, rx).await.unwrap();

    assert!(summary.is_successful());
    assert_eq!(summary.total_rows(), 123);
    assert_eq!(summary.combined_rows, 123);
    assert_eq!(
        count_combined_rows(&out.path().join("combined_cohorts.csv")).unwrap(),
        123
    );

    // Requested order is kept regardless of completion order
    let exported: Vec<&str> = summary.succeeded.iter().map(|m| m.cohort.as_str()).collect();
    assert_eq!(exported, vec!["HTN_Conservative", "Adults", "Lab_Panel"]);

    let mut reader = csv::Reader::from_path(out.path().join("combined_cohorts.csv")).unwrap();
    let header: Vec<String> = reader.headers().unwrap().iter().map(String::from).collect();
    assert_eq!(header, vec!["cohort", "member_id_hash"]);
}

#[tokio::test]
async fn test_parquet_round_trip_preserves_values() {
    let out = TempDir::new().unwrap();
    let source = diagnoses(&[
        ("a1", "I10", (2023, 2, 1)),
        ("b2", "I10.9", (2023, 3, 15)),
    ]);
    let backend = Arc::new(ScriptedBackend::new().with("claims_diagnoses", Script::Rows(source.clone())));
    let cohorts = resolve_cohorts(&registry(), &names(&["HTN_Conservative"])).unwrap();

    let orchestrator = RunOrchestrator::from_config(backend, &config(0, 1), out.path()).unwrap();
    let (_tx, rx) = watch::channel(false);
    orchestrator.run(cohorts, rx).await.unwrap();

    let table = read_table(
        &out
            .path()
            .join("cohorts/HTN_Conservative/HTN_Conservative.parquet"),
    )
    .unwrap();
    assert_eq!(table.row_count(), source.row_count());
    assert_eq!(table.columns, source.columns);
    for column in ["member_id_hash", "date_of_service"] {
        assert_eq!(table.column_values(column), source.column_values(column));
    }
    assert_eq!(table.rows[1][1], CellValue::Text("I10.9".to_string()));
}

#[tokio::test]
async fn test_rerun_produces_identical_metadata() {
    let mut runs = Vec::new();
    let dirs = [TempDir::new().unwrap(), TempDir::new().unwrap()];

    for dir in &dirs {
        let backend = Arc::new(
            ScriptedBackend::new()
                .with("claims_diagnoses", htn_rows())
                .with("members", Script::Rows(members(10))),
        );
        let cohorts = resolve_cohorts(&registry(), &names(&["HTN_Conservative", "Adults"])).unwrap();
        let orchestrator = RunOrchestrator::from_config(backend, &config(0, 2), dir.path()).unwrap();
        let (_tx, rx) = watch::channel(false);
        orchestrator.run(cohorts, rx).await.unwrap();
        runs.push(read_manifest(dir.path()));
    }

    let strip = |manifest: &RunManifest| -> Vec<RunMetadata> {
        manifest
            .cohorts
            .iter()
            .cloned()
            .map(|mut m| {
                m.extracted_at = Utc.timestamp_opt(0, 0).unwrap();
                m
            })
            .collect()
    };
    assert_eq!(strip(&runs[0]), strip(&runs[1]));
    assert_eq!(runs[0].combined_rows, runs[1].combined_rows);
    assert_eq!(
        fs::read(dirs[0].path().join("combined_cohorts.csv")).unwrap(),
        fs::read(dirs[1].path().join("combined_cohorts.csv")).unwrap()
    );
}

#[tokio::test]
async fn test_rerun_into_same_directory_replaces_previous_output() {
    let out = TempDir::new().unwrap();
    for count in [10, 4] {
        let backend = Arc::new(ScriptedBackend::new().with("members", Script::Rows(members(count))));
        let cohorts = resolve_cohorts(&registry(), &names(&["Adults"])).unwrap();
        let orchestrator = RunOrchestrator::from_config(backend, &config(0, 1), out.path()).unwrap();
        let (_tx, rx) = watch::channel(false);
        orchestrator.run(cohorts, rx).await.unwrap();
    }

    assert_eq!(read_metadata(out.path(), "Adults").row_count, 4);
    assert_eq!(
        count_combined_rows(&out.path().join("combined_cohorts.csv")).unwrap(),
        4
    );
}

#[tokio::test]
async fn test_rerun_with_failed_cohort_leaves_no_stale_output() {
    let out = TempDir::new().unwrap();
    let request = names(&["HTN_Conservative", "Adults"]);

    let first = Arc::new(
        ScriptedBackend::new()
            .with("claims_diagnoses", htn_rows())
            .with("members", Script::Rows(members(10))),
    );
    let orchestrator = RunOrchestrator::from_config(first, &config(0, 2), out.path()).unwrap();
    let (_tx, rx) = watch::channel(false);
    orchestrator
        .run(resolve_cohorts(&registry(), &request).unwrap(), rx)
        .await
        .unwrap();
    assert!(out.path().join("cohorts/Adults").exists());

    let second = Arc::new(
        ScriptedBackend::new()
            .with("claims_diagnoses", htn_rows())
            .with("members", Script::Unreachable),
    );
    let orchestrator = RunOrchestrator::from_config(second, &config(0, 2), out.path()).unwrap();
    let (_tx, rx) = watch::channel(false);
    let summary = orchestrator
        .run(resolve_cohorts(&registry(), &request).unwrap(), rx)
        .await
        .unwrap();

    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].cohort.as_str(), "Adults");
    assert!(!out.path().join("cohorts/Adults").exists());

    let combined = count_combined_rows(&out.path().join("combined_cohorts.csv")).unwrap();
    assert_eq!(combined, 3);
    assert_eq!(rows_on_disk(out.path()), combined);
}

#[tokio::test]
async fn test_rerun_with_fewer_cohorts_drops_unrequested_output() {
    let out = TempDir::new().unwrap();
    for request in [names(&["all"]), names(&["Lab_Panel"])] {
        let backend = Arc::new(
            ScriptedBackend::new()
                .with("claims_diagnoses", htn_rows())
                .with("members", Script::Rows(members(6)))
                .with("labs", Script::Rows(members(2))),
        );
        let orchestrator = RunOrchestrator::from_config(backend, &config(0, 3), out.path()).unwrap();
        let (_tx, rx) = watch::channel(false);
        orchestrator
            .run(resolve_cohorts(&registry(), &request).unwrap(), rx)
            .await
            .unwrap();
    }

    let remaining: Vec<String> = fs::read_dir(out.path().join("cohorts"))
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(remaining, vec!["Lab_Panel"]);
    assert_eq!(read_manifest(out.path()).combined_rows, 2);
    assert_eq!(rows_on_disk(out.path()), 2);
}

#[tokio::test]
async fn test_export_failure_fails_only_that_cohort() {
    let out = TempDir::new().unwrap();
    let backend = Arc::new(
        ScriptedBackend::new()
            .with("claims_diagnoses", htn_rows())
            .with("members", Script::Rows(members(5)))
            .with("labs", Script::Rows(mistyped(4))),
    );
    let cohorts = resolve_cohorts(&registry(), &[]).unwrap();

    let orchestrator = RunOrchestrator::from_config(backend.clone(), &config(2, 3), out.path()).unwrap();
    let (_tx, rx) = watch::channel(false);
    let summary = orchestrator.run(cohorts, rx).await.unwrap();

    assert_eq!(summary.exit_code(), 1);
    let exported: Vec<&str> = summary.succeeded.iter().map(|m| m.cohort.as_str()).collect();
    assert_eq!(exported, vec!["HTN_Conservative", "Adults"]);
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].cohort.as_str(), "Lab_Panel");
    assert_eq!(summary.failures[0].kind, FailureKind::Export);

    // export errors are not retried
    assert_eq!(backend.calls("labs"), 1);
    assert!(!out.path().join("cohorts/Lab_Panel").exists());
    assert!(!out.path().join(".staging").exists());

    let combined = count_combined_rows(&out.path().join("combined_cohorts.csv")).unwrap();
    assert_eq!(combined, 8);
    assert_eq!(summary.combined_rows, 8);
    assert_eq!(rows_on_disk(out.path()), 8);
    assert_eq!(read_manifest(out.path()).failures[0].kind, FailureKind::Export);
}
