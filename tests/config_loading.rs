// tests/config_loading.rs

mod common;
use crate::common::{ScriptedExecutor, fast_dag_config};

use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;

use jobdag::config::{
    DagConfig, ExecutorKind, apply_env_overrides, load_and_validate, load_from_path,
};
use jobdag::dag::{Dag, DagContext};
use jobdag::errors::JobdagError;
use jobdag::load_dag_file;
use tempfile::{NamedTempFile, TempDir};

fn toml_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{contents}").unwrap();
    file
}

#[test]
fn missing_file_yields_defaults() {
    let dir = TempDir::new().unwrap();
    let cfg = load_and_validate(dir.path().join("jobdag.toml")).unwrap();

    assert_eq!(cfg.dag, DagConfig::default());
    assert_eq!(cfg.dag.max_concurrent_running_jobs, 15);
    assert_eq!(cfg.dag.time_between_status_check_seconds, 40);
    assert_eq!(cfg.dag.dag_execution_check_time_period_seconds, 10);
    assert_eq!(cfg.dag.delayed_jobs_min_delay_seconds, 30);
    assert_eq!(cfg.dag.delayed_jobs_randomized_added_delay_seconds, 600);
    assert_eq!(cfg.executor.kind, ExecutorKind::Local);
    assert_eq!(cfg.executor.local.program, "vdk");
}

#[test]
fn partial_file_keeps_other_defaults() {
    let file = toml_file(
        r#"
[dag]
max_concurrent_running_jobs = 4
start_retries = 5

[executor]
kind = "rest"

[executor.rest]
base_url = "https://control-plane.example.com"
"#,
    );

    let cfg = load_from_path(file.path()).unwrap();
    assert_eq!(cfg.dag.max_concurrent_running_jobs, 4);
    assert_eq!(cfg.dag.start_retries, 5);
    assert_eq!(cfg.dag.time_between_status_check_seconds, 40);
    assert_eq!(cfg.executor.kind, ExecutorKind::Rest);
    assert_eq!(cfg.executor.rest.base_url, "https://control-plane.example.com");
    assert_eq!(cfg.executor.rest.deployment_id, "production");
}

#[test]
fn zero_concurrency_is_rejected() {
    let file = toml_file("[dag]\nmax_concurrent_running_jobs = 0\n");

    match load_and_validate(file.path()) {
        Err(JobdagError::ConfigError(msg)) => {
            assert!(msg.contains("max_concurrent_running_jobs"));
        }
        other => panic!("expected a config error, got {other:?}"),
    }
}

#[test]
fn rest_executor_needs_a_base_url() {
    let file = toml_file("[executor]\nkind = \"rest\"\n\n[executor.rest]\nbase_url = \"\"\n");

    assert!(matches!(
        load_and_validate(file.path()),
        Err(JobdagError::ConfigError(_))
    ));
}

#[test]
fn malformed_toml_is_a_toml_error() {
    let file = toml_file("[dag\nmax = ");

    assert!(matches!(
        load_from_path(file.path()),
        Err(JobdagError::TomlError(_))
    ));
}

#[test]
fn env_overrides_replace_file_values() {
    let env: HashMap<&str, &str> = HashMap::from([
        ("JOBDAG_MAX_CONCURRENT_RUNNING_JOBS", "7"),
        ("JOBDAG_DELAYED_JOBS_MIN_DELAY_SECONDS", " 5 "),
    ]);
    let mut dag = DagConfig::default();

    apply_env_overrides(&mut dag, |key| env.get(key).map(|v| v.to_string())).unwrap();

    assert_eq!(dag.max_concurrent_running_jobs, 7);
    assert_eq!(dag.delayed_jobs_min_delay_seconds, 5);
    assert_eq!(dag.time_between_status_check_seconds, 40);
}

#[test]
fn start_retry_policy_can_be_overridden_from_env() {
    let env: HashMap<&str, &str> = HashMap::from([
        ("JOBDAG_START_RETRIES", "6"),
        ("JOBDAG_START_RETRY_BACKOFF_SECONDS", "2"),
    ]);
    let mut dag = DagConfig::default();

    apply_env_overrides(&mut dag, |key| env.get(key).map(|v| v.to_string())).unwrap();

    assert_eq!(dag.start_retries, 6);
    assert_eq!(dag.start_retry_backoff_seconds, 2);
    assert_eq!(dag.start_retry_backoff(), std::time::Duration::from_secs(2));
}

#[test]
fn start_retries_override_must_fit() {
    let mut dag = DagConfig::default();

    let err = apply_env_overrides(&mut dag, |key| {
        (key == "JOBDAG_START_RETRIES").then(|| "99999999999".to_string())
    })
    .unwrap_err();

    assert!(err.to_string().contains("start_retries"));
}

#[test]
fn non_numeric_env_override_is_rejected() {
    let mut dag = DagConfig::default();

    let err = apply_env_overrides(&mut dag, |key| {
        (key == "JOBDAG_TIME_BETWEEN_STATUS_CHECK_SECONDS").then(|| "soon".to_string())
    })
    .unwrap_err();

    assert!(err.to_string().contains("JOBDAG_TIME_BETWEEN_STATUS_CHECK_SECONDS"));
}

#[test]
fn dag_rejects_invalid_config_built_in_code() {
    let mut config = fast_dag_config();
    config.max_concurrent_running_jobs = 0;

    let result = Dag::new(ScriptedExecutor::new(), &config, DagContext::new("d", "t"));
    assert!(matches!(result, Err(JobdagError::ConfigError(_))));
}

#[test]
fn dag_file_must_be_an_array() {
    let dir = TempDir::new().unwrap();
    let good: PathBuf = dir.path().join("good.json");
    std::fs::write(&good, r#"[{"job_name": "a", "depends_on": []}]"#).unwrap();
    let bad: PathBuf = dir.path().join("bad.json");
    std::fs::write(&bad, r#"{"job_name": "a", "depends_on": []}"#).unwrap();

    assert_eq!(load_dag_file(&good).unwrap().len(), 1);
    assert!(matches!(load_dag_file(&bad), Err(JobdagError::Validation(_))));
}
