// tests/dag_execution.rs

mod common;
use crate::common::{
    DAG_NAME, ExecutorEvent, JobSpecBuilder, ScriptedExecutor, StartFailure, dag_with,
    diamond, fast_dag_config, init_tracing, job, with_timeout,
};

use std::time::Duration;

use jobdag::dag::{Dag, DagContext};
use jobdag::errors::{ExecutorError, JobdagError};
use jobdag::types::{ExecutionType, JobStatus};
use serde_json::json;
use tokio_util::sync::CancellationToken;

fn finished(job: &str, executor: &ScriptedExecutor) -> usize {
    let execution_id = executor.execution_ids(job).last().cloned().unwrap();
    executor
        .position_of(&ExecutorEvent::Finished {
            job: job.to_string(),
            execution_id,
            status: JobStatus::Succeeded,
        })
        .unwrap()
}

fn started(job: &str, executor: &ScriptedExecutor) -> usize {
    let execution_id = executor.execution_ids(job).last().cloned().unwrap();
    executor
        .position_of(&ExecutorEvent::Started {
            job: job.to_string(),
            execution_id,
        })
        .unwrap()
}

#[tokio::test]
async fn diamond_runs_in_dependency_order() {
    init_tracing();
    let executor = ScriptedExecutor::new();
    let mut dag = dag_with(&executor, &fast_dag_config());
    dag.build_dag(&diamond()).unwrap();

    let summary = with_timeout(dag.execute_dag()).await.unwrap();

    let order = executor.started_jobs();
    assert_eq!(order.len(), 4);
    assert_eq!(order.first().map(String::as_str), Some("A"));
    assert_eq!(order.last().map(String::as_str), Some("D"));

    assert!(finished("A", &executor) < started("B", &executor));
    assert!(finished("A", &executor) < started("C", &executor));
    assert!(finished("B", &executor) < started("D", &executor));
    assert!(finished("C", &executor) < started("D", &executor));

    assert_eq!(summary.succeeded(), 4);
    assert_eq!(summary.failed(), 0);
    assert_eq!(summary.dag_job_name, DAG_NAME);
}

#[tokio::test]
async fn empty_dag_finishes_immediately() {
    let executor = ScriptedExecutor::new();
    let mut dag = dag_with(&executor, &fast_dag_config());
    dag.build_dag(&[]).unwrap();

    let summary = with_timeout(dag.execute_dag()).await.unwrap();
    assert!(summary.jobs.is_empty());
    assert!(executor.start_calls().is_empty());
}

#[tokio::test]
async fn never_exceeds_max_concurrent_running_jobs() {
    init_tracing();
    let mut executor = ScriptedExecutor::new();
    let names = ["j1", "j2", "j3", "j4", "j5", "j6"];
    for name in names {
        executor = executor.with_polls_until_done(name, 2);
    }

    let mut config = fast_dag_config();
    config.max_concurrent_running_jobs = 2;

    let mut dag = dag_with(&executor, &config);
    let jobs: Vec<_> = names.iter().map(|n| job(n, &[])).collect();
    dag.build_dag(&jobs).unwrap();

    let summary = with_timeout(dag.execute_dag()).await.unwrap();

    assert_eq!(summary.succeeded(), 6);
    assert_eq!(executor.peak_in_flight(), 2);
    assert_eq!(executor.in_flight(), 0);
    // Every job got exactly one execution; delayed starts were not duplicated.
    for name in names {
        assert_eq!(executor.execution_ids(name).len(), 1, "job {name}");
    }
}

#[tokio::test]
async fn conflict_and_server_errors_requeue_the_start() {
    init_tracing();
    let executor = ScriptedExecutor::new()
        .with_start_failures("B", &[StartFailure::Conflict, StartFailure::ServerError(503)])
        .with_start_failures("C", &[StartFailure::ServerError(500)]);

    let mut dag = dag_with(&executor, &fast_dag_config());
    dag.build_dag(&diamond()).unwrap();

    let summary = with_timeout(dag.execute_dag()).await.unwrap();

    assert_eq!(summary.succeeded(), 4);
    assert_eq!(executor.start_calls_for("B"), 3);
    assert_eq!(executor.start_calls_for("C"), 2);
    assert_eq!(executor.execution_ids("B").len(), 1);
    assert!(finished("B", &executor) < started("D", &executor));

    let b = summary.job("B").unwrap();
    assert_eq!(b.start_attempts, 3);
}

#[tokio::test]
async fn fatal_start_error_fails_the_run() {
    let executor = ScriptedExecutor::new().with_start_failures("B", &[StartFailure::Fatal(400)]);

    let mut dag = dag_with(&executor, &fast_dag_config());
    dag.build_dag(&diamond()).unwrap();

    let err = with_timeout(dag.execute_dag()).await.unwrap_err();
    match err {
        JobdagError::Executor(ExecutorError::Api { status, .. }) => assert_eq!(status, 400),
        other => panic!("expected an API error, got {other:?}"),
    }
    assert!(!executor.started_jobs().contains(&"D".to_string()));
}

#[tokio::test]
async fn failed_job_with_fail_dag_on_error_false_does_not_stop_the_run() {
    init_tracing();
    let executor = ScriptedExecutor::new()
        .with_outcome("A", JobStatus::UserError)
        .with_message("A", "division by zero");

    let jobs = vec![
        JobSpecBuilder::new("A").fail_dag_on_error(false).build(),
        job("B", &["A"]),
    ];
    let mut dag = dag_with(&executor, &fast_dag_config());
    dag.build_dag(&jobs).unwrap();

    let summary = with_timeout(dag.execute_dag()).await.unwrap();

    let a = summary.job("A").unwrap();
    assert_eq!(a.status, Some(JobStatus::UserError));
    assert_eq!(a.message.as_deref(), Some("division by zero"));
    assert_eq!(summary.job("B").unwrap().status, Some(JobStatus::Succeeded));
    assert_eq!(summary.failed(), 1);
}

#[tokio::test]
async fn failed_job_aborts_the_run_and_leaves_siblings_running() {
    init_tracing();
    let executor = ScriptedExecutor::new()
        .with_outcome("B", JobStatus::PlatformError)
        .with_message("B", "out of memory")
        .never_finishes("C");

    let mut dag = dag_with(&executor, &fast_dag_config());
    dag.build_dag(&diamond()).unwrap();

    let err = with_timeout(dag.execute_dag()).await.unwrap_err();

    let failure = match err {
        JobdagError::JobFailure(failure) => failure,
        other => panic!("expected a job failure, got {other:?}"),
    };
    assert_eq!(failure.job_name, "B");
    assert_eq!(failure.status, Some(JobStatus::PlatformError));
    assert_eq!(failure.details.message.as_deref(), Some("out of memory"));

    let text = failure.to_string();
    assert!(text.contains("out of memory"));
    assert!(text.contains("https://logs.example.com/"));
    assert!(text.contains("fail_dag_on_error"));

    // C is still running at the backend and D never started.
    assert_eq!(executor.in_flight(), 1);
    assert!(!executor.started_jobs().contains(&"D".to_string()));
    let c = dag.executor().get_job("C").unwrap();
    assert!(c.is_active());
}

#[tokio::test]
async fn jobs_inherit_team_and_started_by_from_the_context() {
    let executor = ScriptedExecutor::new();
    let context = DagContext::new("nightly", "platform").with_execution_type(ExecutionType::Scheduled);
    let mut dag = Dag::new(executor.clone(), &fast_dag_config(), context).unwrap();

    dag.build_dag(&[
        JobSpecBuilder::new("own").argument("day", json!(3)).build(),
        JobSpecBuilder::new("foreign").team("other").build(),
    ])
    .unwrap();
    let summary = with_timeout(dag.execute_dag()).await.unwrap();

    assert_eq!(summary.job("own").unwrap().team_name, "platform");
    assert_eq!(summary.job("foreign").unwrap().team_name, "other");

    let id = summary.job("own").unwrap().execution_id.clone().unwrap();
    assert_eq!(executor.started_by_of(&id).as_deref(), Some("scheduled/nightly"));
    assert_eq!(
        executor.arguments_of(&id).unwrap().get("day"),
        Some(&json!(3))
    );
}

#[tokio::test]
async fn cancellation_interrupts_the_loop_sleep() {
    init_tracing();
    let executor = ScriptedExecutor::new().never_finishes("A");

    // Long loop sleep: the run only ends quickly if the sleep is cancellable.
    let mut config = fast_dag_config();
    config.dag_execution_check_time_period_seconds = 60;

    let cancel = CancellationToken::new();
    let mut dag = dag_with(&executor, &config).with_cancellation(cancel.clone());
    dag.build_dag(&[job("A", &[])]).unwrap();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    });

    let err = with_timeout(dag.execute_dag()).await.unwrap_err();
    assert!(matches!(err, JobdagError::Cancelled));
    assert_eq!(executor.started_jobs(), vec!["A".to_string()]);
}

#[tokio::test]
async fn status_polls_respect_the_check_interval() {
    let executor = ScriptedExecutor::new().with_polls_until_done("A", 3);

    let mut config = fast_dag_config();
    config.time_between_status_check_seconds = 60;

    let mut dag = dag_with(&executor, &config);
    dag.build_dag(&[job("A", &[])]).unwrap();

    // The first poll is immediate; the next one is 60s away.
    let result = tokio::time::timeout(Duration::from_millis(200), dag.execute_dag()).await;
    assert!(result.is_err(), "run should still be waiting for the next poll");
    assert_eq!(executor.status_calls_for("A"), 1);
}

#[tokio::test]
async fn timed_out_history_lookup_does_not_abort_the_run() {
    init_tracing();
    let executor = ScriptedExecutor::new().with_list_timeouts("only", 1);

    let mut dag = dag_with(&executor, &fast_dag_config());
    dag.build_dag(&[job("only", &[])]).unwrap();

    let summary = with_timeout(dag.execute_dag()).await.unwrap();

    assert_eq!(summary.succeeded(), 1);
    assert_eq!(executor.execution_ids("only").len(), 1);
}
