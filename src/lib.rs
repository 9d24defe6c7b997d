// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod types;

use std::fs;
use std::path::Path;

use anyhow::Result;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::{load_and_validate, ConfigFile, ExecutorKind};
use crate::dag::{validate, Dag, DagContext, TopologicalSorter};
use crate::errors::{DagValidationError, JobdagError, ValidationErrorKind};
use crate::exec::{DataJobExecutor, LocalDataJobExecutor, RestDataJobExecutor};
use crate::types::{ExecutionType, JobSpec};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config and DAG file loading
/// - executor selection
/// - Ctrl-C handling
/// - the DAG run itself
pub async fn run(args: CliArgs) -> Result<()> {
    let cfg = load_and_validate(&args.config)?;
    let jobs = load_dag_file(&args.dag)?;

    let execution_type = if args.scheduled {
        ExecutionType::Scheduled
    } else {
        ExecutionType::Manual
    };
    let context = DagContext::new(args.dag_name(), args.team.clone())
        .with_execution_type(execution_type);

    if args.dry_run {
        validate(&jobs)?;
        print_dry_run(&cfg, &context, &jobs)?;
        return Ok(());
    }

    let executor = build_executor(&cfg)?;

    // Ctrl-C → cancel the run; started executions keep running.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl+C");
                return;
            }
            info!("Ctrl+C received; stopping the DAG run");
            cancel.cancel();
        });
    }

    let mut dag = Dag::new(executor, &cfg.dag, context)?.with_cancellation(cancel);
    dag.build_dag(&jobs)?;
    let summary = dag.execute_dag().await?;

    print!("{summary}");
    Ok(())
}

/// Read a DAG file: a JSON array of job specifications.
pub fn load_dag_file(path: impl AsRef<Path>) -> errors::Result<Vec<Value>> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    match serde_json::from_str::<Value>(&contents)? {
        Value::Array(jobs) => Ok(jobs),
        other => Err(DagValidationError::new(
            ValidationErrorKind::Type,
            format!(
                "{} holds a JSON {}, not an array of job specifications",
                path.display(),
                if other.is_object() { "object" } else { "scalar" }
            ),
            "Wrap the job specifications in a JSON array: [ {\"job_name\": ..}, .. ].",
            Vec::new(),
        )
        .into()),
    }
}

fn build_executor(cfg: &ConfigFile) -> errors::Result<Box<dyn DataJobExecutor>> {
    let executor: Box<dyn DataJobExecutor> = match cfg.executor.kind {
        ExecutorKind::Local => {
            debug!(jobs_dir = %cfg.executor.local.jobs_dir.display(), "using local executor");
            Box::new(LocalDataJobExecutor::new(cfg.executor.local.clone()))
        }
        ExecutorKind::Rest => {
            debug!(base_url = %cfg.executor.rest.base_url, "using REST executor");
            Box::new(RestDataJobExecutor::new(&cfg.executor.rest).map_err(JobdagError::from)?)
        }
    };
    Ok(executor)
}

/// Print the effective settings and the jobs in the order they would start.
fn print_dry_run(cfg: &ConfigFile, context: &DagContext, jobs: &[Value]) -> errors::Result<()> {
    let specs = jobs
        .iter()
        .map(|job| serde_json::from_value::<JobSpec>(job.clone()))
        .collect::<Result<Vec<_>, _>>()?;

    println!("jobdag dry-run");
    println!("  dag = {}", context.dag_job_name);
    println!("  started_by = {}", context.started_by());
    println!("  executor = {:?}", cfg.executor.kind);
    println!(
        "  dag.max_concurrent_running_jobs = {}",
        cfg.dag.max_concurrent_running_jobs
    );
    println!();

    let mut sorter = TopologicalSorter::new();
    for spec in &specs {
        sorter.add(&spec.job_name, &spec.depends_on)?;
    }
    sorter.prepare()?;

    println!("jobs ({}), in start order:", specs.len());
    let mut wave = 0;
    while sorter.is_active() {
        wave += 1;
        let ready = sorter.get_ready();
        for name in &ready {
            let Some(spec) = specs.iter().find(|s| &s.job_name == name) else {
                continue;
            };
            println!("  {wave}. {name}");
            println!(
                "      team: {}",
                spec.team_name.as_deref().unwrap_or(&context.team_name)
            );
            if !spec.depends_on.is_empty() {
                println!("      depends_on: {:?}", spec.depends_on);
            }
            if !spec.arguments.is_empty() {
                println!("      arguments: {}", Value::Object(spec.arguments.clone()));
            }
            if !spec.fail_dag_on_error {
                println!("      fail_dag_on_error: false");
            }
        }
        for name in &ready {
            sorter.done(name)?;
        }
    }

    debug!("dry-run complete (no execution)");
    Ok(())
}
