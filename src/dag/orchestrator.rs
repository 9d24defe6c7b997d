// src/dag/orchestrator.rs

use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{validate_dag_config, DagConfig};
use crate::dag::delay_queue::DelayQueue;
use crate::dag::sorter::TopologicalSorter;
use crate::dag::trackable_job::{JobRunSummary, TrackableJob};
use crate::dag::validator::validate;
use crate::errors::{JobdagError, Result};
use crate::exec::{DataJobExecutor, TrackingDataJobExecutor};
use crate::types::{ExecutionType, JobName, JobSpec, JobStatus};

/// Who is running the DAG. Feeds the default team and the `started_by` label
/// of every job execution the DAG starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DagContext {
    pub dag_job_name: String,
    pub team_name: String,
    pub execution_type: ExecutionType,
    /// Replaces the default `"{execution_type}/{dag_job_name}"` label.
    pub started_by: Option<String>,
}

impl DagContext {
    pub fn new(dag_job_name: impl Into<String>, team_name: impl Into<String>) -> Self {
        Self {
            dag_job_name: dag_job_name.into(),
            team_name: team_name.into(),
            execution_type: ExecutionType::default(),
            started_by: None,
        }
    }

    pub fn with_execution_type(mut self, execution_type: ExecutionType) -> Self {
        self.execution_type = execution_type;
        self
    }

    pub fn with_started_by(mut self, label: impl Into<String>) -> Self {
        self.started_by = Some(label.into());
        self
    }

    pub fn started_by(&self) -> String {
        self.started_by
            .clone()
            .unwrap_or_else(|| format!("{}/{}", self.execution_type, self.dag_job_name))
    }
}

/// Outcome of a completed DAG run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DagRunSummary {
    pub dag_job_name: String,
    pub elapsed: Duration,
    pub jobs: Vec<JobRunSummary>,
}

impl DagRunSummary {
    pub fn job(&self, job_name: &str) -> Option<&JobRunSummary> {
        self.jobs.iter().find(|j| j.job_name == job_name)
    }

    pub fn succeeded(&self) -> usize {
        self.jobs
            .iter()
            .filter(|j| j.status == Some(JobStatus::Succeeded))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.jobs
            .iter()
            .filter(|j| j.status.is_some_and(|s| s.is_terminal() && s != JobStatus::Succeeded))
            .count()
    }
}

impl fmt::Display for DagRunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "DAG '{}' finished in {:.1}s: {} succeeded, {} failed, {} total",
            self.dag_job_name,
            self.elapsed.as_secs_f64(),
            self.succeeded(),
            self.failed(),
            self.jobs.len()
        )?;
        for job in &self.jobs {
            let status = job
                .status
                .map(|s| s.to_string())
                .unwrap_or_else(|| "not started".to_string());
            write!(f, "  - {} [{}] {}", job.job_name, job.team_name, status)?;
            if let Some(id) = &job.execution_id {
                write!(f, " (execution {id}, attempts {})", job.start_attempts)?;
            }
            if let Some(message) = &job.message {
                write!(f, ": {message}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Runs a DAG of data jobs against a [`DataJobExecutor`].
///
/// One `Dag` per run: it owns the topological sorter, the delay queue for
/// starts that must wait, and the tracking executor holding every job's
/// state.
#[derive(Debug)]
pub struct Dag<E> {
    context: DagContext,
    job_executor: TrackingDataJobExecutor<E>,
    topological_sorter: TopologicalSorter,
    delayed_starting_jobs: DelayQueue<JobName>,
    finalized_jobs: HashSet<JobName>,
    max_concurrent_running_jobs: usize,
    dag_execution_check_time_period: Duration,
    started_at: Option<Instant>,
    cancel: CancellationToken,
}

impl<E: DataJobExecutor> Dag<E> {
    pub fn new(executor: E, config: &DagConfig, context: DagContext) -> Result<Self> {
        validate_dag_config(config)?;

        Ok(Self {
            context,
            job_executor: TrackingDataJobExecutor::from_config(executor, config),
            topological_sorter: TopologicalSorter::new(),
            delayed_starting_jobs: DelayQueue::new(
                config.delayed_jobs_min_delay(),
                config.delayed_jobs_randomized_added_delay(),
            ),
            finalized_jobs: HashSet::new(),
            max_concurrent_running_jobs: config.max_concurrent_running_jobs,
            dag_execution_check_time_period: config.dag_execution_check_time_period(),
            started_at: None,
            cancel: CancellationToken::new(),
        })
    }

    /// Stop the run (between iterations or during a sleep) once `cancel`
    /// fires. Jobs already started are not cancelled at the backend.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.job_executor = self.job_executor.with_cancellation(cancel.clone());
        self.cancel = cancel;
        self
    }

    pub fn context(&self) -> &DagContext {
        &self.context
    }

    pub fn executor(&self) -> &TrackingDataJobExecutor<E> {
        &self.job_executor
    }

    /// Validate the job specifications and register every job.
    ///
    /// Nothing is started here; a [`crate::errors::DagValidationError`]
    /// leaves the backend untouched.
    pub fn build_dag(&mut self, jobs: &[Value]) -> Result<()> {
        validate(jobs)?;

        let started_by = self.context.started_by();
        for raw in jobs {
            let spec: JobSpec = serde_json::from_value(raw.clone())?;
            let job = TrackableJob::from_spec(&spec, &self.context.team_name, &started_by);
            self.job_executor.register_job(job);
            self.topological_sorter
                .add(&spec.job_name, &spec.depends_on)?;
        }

        info!(
            dag = %self.context.dag_job_name,
            jobs = jobs.len(),
            started_by = %started_by,
            "DAG built"
        );
        Ok(())
    }

    /// Run every job in dependency order until all of them finished.
    ///
    /// Fails fast: the first job failure that may fail the DAG, fatal start
    /// error or cancellation ends the run. Executions already running at
    /// that point are left alone.
    pub async fn execute_dag(&mut self) -> Result<DagRunSummary> {
        self.topological_sorter.prepare()?;
        self.started_at = Some(Instant::now());

        info!(
            dag = %self.context.dag_job_name,
            max_concurrent_running_jobs = self.max_concurrent_running_jobs,
            "executing DAG"
        );

        while self.topological_sorter.is_active() {
            if self.cancel.is_cancelled() {
                warn!(dag = %self.context.dag_job_name, "DAG run cancelled");
                return Err(JobdagError::Cancelled);
            }

            for node in self.topological_sorter.get_ready() {
                self.start_job(&node).await?;
            }

            self.start_delayed_jobs().await?;

            let finished: Vec<JobName> = self
                .job_executor
                .get_finished_job_names()
                .await?
                .into_iter()
                .filter(|name| !self.finalized_jobs.contains(name))
                .collect();

            for node in &finished {
                self.topological_sorter.done(node)?;
                self.finalized_jobs.insert(node.clone());
                self.job_executor.finalize_job(node).await?;
            }

            if finished.is_empty() {
                self.sleep_or_cancel(self.dag_execution_check_time_period)
                    .await?;
            }
        }

        let summary = self.summary();
        info!(dag = %self.context.dag_job_name, "{summary}");
        Ok(summary)
    }

    /// Snapshot of every job in the DAG, sorted by job name.
    pub fn summary(&self) -> DagRunSummary {
        DagRunSummary {
            dag_job_name: self.context.dag_job_name.clone(),
            elapsed: self
                .started_at
                .map(|t| t.elapsed())
                .unwrap_or_default(),
            jobs: self
                .job_executor
                .get_all_jobs()
                .into_iter()
                .map(TrackableJob::summary)
                .collect(),
        }
    }

    async fn start_job(&mut self, node: &str) -> Result<()> {
        let running = self.job_executor.get_currently_running_jobs().len();
        if running >= self.max_concurrent_running_jobs {
            debug!(
                job = %node,
                running,
                max = self.max_concurrent_running_jobs,
                "concurrency limit reached; delaying start"
            );
            self.delayed_starting_jobs.enqueue(node.to_string());
            return Ok(());
        }

        match self.job_executor.start_job(node).await {
            Ok(()) => Ok(()),
            Err(JobdagError::Executor(err)) if err.should_delay_start() => {
                warn!(
                    job = %node,
                    error = %err,
                    "backend refused the start for now; will retry later"
                );
                self.delayed_starting_jobs.enqueue(node.to_string());
                Ok(())
            }
            Err(err) => {
                error!(job = %node, error = %err, "failed to start data job");
                Err(err)
            }
        }
    }

    async fn start_delayed_jobs(&mut self) -> Result<()> {
        // Items re-queued during this pass wait for the next iteration.
        let pending = self.delayed_starting_jobs.len();
        for _ in 0..pending {
            if self.job_executor.get_currently_running_jobs().len()
                >= self.max_concurrent_running_jobs
            {
                break;
            }
            let Some(node) = self.delayed_starting_jobs.dequeue() else {
                break;
            };
            debug!(job = %node, "starting delayed job");
            self.start_job(&node).await?;
        }
        Ok(())
    }

    async fn sleep_or_cancel(&self, duration: Duration) -> Result<()> {
        tokio::select! {
            _ = sleep(duration) => Ok(()),
            _ = self.cancel.cancelled() => {
                warn!(dag = %self.context.dag_job_name, "DAG run cancelled");
                Err(JobdagError::Cancelled)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn started_by_defaults_to_execution_type_and_dag_name() {
        let ctx = DagContext::new("parent", "team");
        assert_eq!(ctx.started_by(), "manual/parent");

        let ctx = ctx.with_execution_type(ExecutionType::Scheduled);
        assert_eq!(ctx.started_by(), "scheduled/parent");

        let ctx = ctx.with_started_by("custom-label");
        assert_eq!(ctx.started_by(), "custom-label");
    }

    #[test]
    fn summary_counts_outcomes() {
        let job = |name: &str, status: Option<JobStatus>| JobRunSummary {
            job_name: name.to_string(),
            team_name: "t".to_string(),
            status,
            execution_id: None,
            start_attempts: 0,
            fail_dag_on_error: true,
            message: None,
        };
        let summary = DagRunSummary {
            dag_job_name: "dag".to_string(),
            elapsed: Duration::from_secs(2),
            jobs: vec![
                job("a", Some(JobStatus::Succeeded)),
                job("b", Some(JobStatus::UserError)),
                job("c", Some(JobStatus::Running)),
                job("d", None),
            ],
        };

        assert_eq!(summary.succeeded(), 1);
        assert_eq!(summary.failed(), 1);
        assert!(summary.job("c").is_some());

        let text = summary.to_string();
        assert!(text.contains("1 succeeded, 1 failed, 4 total"));
        assert!(text.contains("d [t] not started"));
    }
}
