// src/exec/tracking.rs

//! Caching, retrying wrapper around a [`DataJobExecutor`].

use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::DagConfig;
use crate::dag::TrackableJob;
use crate::errors::{DagJobFailure, ExecutorError, JobdagError, Result};
use crate::exec::DataJobExecutor;
use crate::types::{JobName, JobStatus};

/// Tracks every job of one DAG run on top of a raw executor.
///
/// Adds:
/// - the per-run job cache (the only place jobs enter a run)
/// - idempotent job starts over a non-idempotent backend call
/// - staggered status polling
/// - translation of failed jobs into [`DagJobFailure`]
#[derive(Debug)]
pub struct TrackingDataJobExecutor<E> {
    executor: E,
    jobs: BTreeMap<JobName, TrackableJob>,
    time_between_status_check: Duration,
    start_retries: u32,
    start_retry_backoff: Duration,
    cancel: CancellationToken,
}

impl<E: DataJobExecutor> TrackingDataJobExecutor<E> {
    pub fn new(executor: E, time_between_status_check: Duration) -> Self {
        let defaults = DagConfig::default();
        Self {
            executor,
            jobs: BTreeMap::new(),
            time_between_status_check,
            start_retries: defaults.start_retries,
            start_retry_backoff: defaults.start_retry_backoff(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn from_config(executor: E, config: &DagConfig) -> Self {
        Self::new(executor, config.time_between_status_check())
            .with_start_retry_policy(config.start_retries, config.start_retry_backoff())
    }

    /// Attempts (total, at least 1) and sleep used when starts time out.
    pub fn with_start_retry_policy(mut self, retries: u32, backoff: Duration) -> Self {
        self.start_retries = retries.max(1);
        self.start_retry_backoff = backoff;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn register_job(&mut self, job: TrackableJob) {
        if self.jobs.contains_key(&job.job_name) {
            warn!(job = %job.job_name, "job already registered; overwriting it");
        }
        debug!(job = %job.job_name, team = %job.team_name, "registered job");
        self.jobs.insert(job.job_name.clone(), job);
    }

    pub fn get_job(&self, job_name: &str) -> Option<&TrackableJob> {
        self.jobs.get(job_name)
    }

    fn job(&self, job_name: &str) -> Result<&TrackableJob> {
        self.jobs
            .get(job_name)
            .ok_or_else(|| JobdagError::UnknownJob(job_name.to_string()))
    }

    fn job_mut(&mut self, job_name: &str) -> Result<&mut TrackableJob> {
        self.jobs
            .get_mut(job_name)
            .ok_or_else(|| JobdagError::UnknownJob(job_name.to_string()))
    }

    /// Start a new execution of a registered job.
    pub async fn start_job(&mut self, job_name: &str) -> Result<()> {
        let (team_name, started_by, arguments, attempt) = {
            let job = self.job_mut(job_name)?;
            job.start_attempt += 1;
            (
                job.team_name.clone(),
                job.details.started_by.clone(),
                job.arguments.clone(),
                job.start_attempt,
            )
        };

        let execution_id = self
            .start_new_job_execution(job_name, &team_name, started_by.as_deref(), &arguments)
            .await?;

        info!(
            job = %job_name,
            team = %team_name,
            execution_id = %execution_id,
            attempt,
            "started data job execution"
        );

        {
            let job = self.job_mut(job_name)?;
            job.execution_id = Some(execution_id.clone());
            job.status = Some(JobStatus::Submitted);
        }

        // The execution exists at this point, so a failed detail fetch must
        // not make the caller believe the start failed.
        match self
            .executor
            .details_job(job_name, &team_name, &execution_id)
            .await
        {
            Ok(details) => self.job_mut(job_name)?.details.refresh_from(details),
            Err(err) => warn!(
                job = %job_name,
                execution_id = %execution_id,
                error = %err,
                "could not fetch details of the new execution"
            ),
        }

        Ok(())
    }

    /// Start a job execution, safe against starts that time out but still
    /// land on the backend.
    ///
    /// The newest execution id is recorded before the first start. When a
    /// start times out the history is checked again; a new id means the
    /// start went through and that id is returned instead of starting a
    /// duplicate. Timed-out history lookups count against the same attempt
    /// budget, and an unconfirmed start is checked again before the next one.
    pub async fn start_new_job_execution(
        &self,
        job_name: &str,
        team_name: &str,
        started_by: Option<&str>,
        arguments: &Map<String, Value>,
    ) -> Result<String> {
        let mut latest_before: Option<Option<String>> = None;
        let mut unconfirmed_start = false;
        let mut list_timeout = None;

        for attempt in 1..=self.start_retries {
            if attempt > 1 {
                self.sleep_or_cancel(self.start_retry_backoff).await?;
            }

            let before = match latest_before.clone() {
                Some(before) => before,
                None => match self.latest_execution_id(job_name, team_name).await {
                    Ok(before) => {
                        latest_before = Some(before.clone());
                        before
                    }
                    Err(err) if err.is_timeout() => {
                        warn!(
                            job = %job_name,
                            attempt,
                            max_attempts = self.start_retries,
                            error = %err,
                            "listing executions timed out before start"
                        );
                        list_timeout = Some(err);
                        continue;
                    }
                    Err(err) => return Err(err.into()),
                },
            };

            if unconfirmed_start {
                match self
                    .execution_created_since(job_name, team_name, before.as_deref())
                    .await
                {
                    Ok(Some(execution_id)) => return Ok(execution_id),
                    Ok(None) => unconfirmed_start = false,
                    Err(err) if err.is_timeout() => {
                        warn!(
                            job = %job_name,
                            attempt,
                            error = %err,
                            "still cannot check the timed-out start"
                        );
                        continue;
                    }
                    Err(err) => return Err(err.into()),
                }
            }

            match self
                .executor
                .start_job(job_name, team_name, started_by, arguments)
                .await
            {
                Ok(execution_id) => return Ok(execution_id),
                Err(err) if err.is_timeout() => {
                    warn!(
                        job = %job_name,
                        attempt,
                        max_attempts = self.start_retries,
                        error = %err,
                        "start request timed out; checking whether the execution was created"
                    );

                    match self
                        .execution_created_since(job_name, team_name, before.as_deref())
                        .await
                    {
                        Ok(Some(execution_id)) => return Ok(execution_id),
                        Ok(None) => {}
                        Err(err) if err.is_timeout() => {
                            warn!(
                                job = %job_name,
                                attempt,
                                error = %err,
                                "could not check the timed-out start"
                            );
                            unconfirmed_start = true;
                        }
                        Err(err) => return Err(err.into()),
                    }
                }
                Err(err) => return Err(err.into()),
            }
        }

        // No start was ever sent, so the outcome is not ambiguous.
        if let (None, Some(err)) = (&latest_before, list_timeout) {
            return Err(err.into());
        }

        error!(
            job = %job_name,
            attempts = self.start_retries,
            "could not determine whether the data job was started"
        );
        Err(JobdagError::StartAmbiguous {
            job_name: job_name.to_string(),
            attempts: self.start_retries,
        })
    }

    async fn latest_execution_id(
        &self,
        job_name: &str,
        team_name: &str,
    ) -> std::result::Result<Option<String>, ExecutorError> {
        let executions = self
            .executor
            .job_executions_list(job_name, team_name)
            .await?;
        Ok(executions.into_iter().last().map(|e| e.id))
    }

    /// Id of an execution newer than `before`, if the history shows one.
    async fn execution_created_since(
        &self,
        job_name: &str,
        team_name: &str,
        before: Option<&str>,
    ) -> std::result::Result<Option<String>, ExecutorError> {
        let latest = self.latest_execution_id(job_name, team_name).await?;
        let created = latest.filter(|id| before != Some(id.as_str()));
        if let Some(execution_id) = &created {
            info!(
                job = %job_name,
                execution_id = %execution_id,
                "timed-out start did reach the backend; using its execution"
            );
        }
        Ok(created)
    }

    async fn sleep_or_cancel(&self, duration: Duration) -> Result<()> {
        tokio::select! {
            _ = sleep(duration) => Ok(()),
            _ = self.cancel.cancelled() => Err(JobdagError::Cancelled),
        }
    }

    /// Current status of a job. Only active jobs cause a backend call;
    /// `None` means the job was never submitted.
    pub async fn status(&mut self, job_name: &str) -> Result<Option<JobStatus>> {
        let job = self.job(job_name)?;
        if !job.is_active() {
            return Ok(job.status);
        }
        self.refresh_status(job_name, Instant::now()).await
    }

    async fn refresh_status(&mut self, job_name: &str, now: Instant) -> Result<Option<JobStatus>> {
        let (team_name, execution_id) = {
            let job = self.job(job_name)?;
            match &job.execution_id {
                Some(id) => (job.team_name.clone(), id.clone()),
                None => return Ok(job.status),
            }
        };

        let status = self
            .executor
            .status_job(job_name, &team_name, &execution_id)
            .await?;

        let job = self.job_mut(job_name)?;
        if job.status != Some(status) {
            debug!(
                job = %job_name,
                execution_id = %execution_id,
                from = ?job.status,
                to = %status,
                "job status changed"
            );
        }
        job.status = Some(status);
        job.last_status_time = Some(now);
        Ok(job.status)
    }

    /// Poll active jobs that are due and return every job that has reached a
    /// terminal status.
    ///
    /// A job is due when its status was never polled or was polled longer
    /// than `time_between_status_check` ago, so polls of jobs started
    /// together drift apart instead of all hitting the backend at once.
    /// Transient poll failures are logged and retried on a later call.
    pub async fn get_finished_job_names(&mut self) -> Result<Vec<JobName>> {
        let now = Instant::now();
        let interval = self.time_between_status_check;

        let due: Vec<JobName> = self
            .jobs
            .values()
            .filter(|job| {
                job.is_active()
                    && job
                        .last_status_time
                        .is_none_or(|last| now.duration_since(last) >= interval)
            })
            .map(|job| job.job_name.clone())
            .collect();

        for job_name in due {
            match self.refresh_status(&job_name, now).await {
                Ok(_) => {}
                Err(JobdagError::Executor(err))
                    if err.should_delay_start() || err.is_timeout() =>
                {
                    warn!(job = %job_name, error = %err, "status poll failed; will retry");
                    if let Ok(job) = self.job_mut(&job_name) {
                        job.last_status_time = Some(now);
                    }
                }
                Err(err) => return Err(err),
            }
        }

        Ok(self
            .jobs
            .values()
            .filter(|job| job.is_finished())
            .map(|job| job.job_name.clone())
            .collect())
    }

    /// Jobs currently submitted or running at the backend.
    pub fn get_currently_running_jobs(&self) -> Vec<&TrackableJob> {
        self.jobs.values().filter(|job| job.is_active()).collect()
    }

    pub fn get_all_jobs(&self) -> Vec<&TrackableJob> {
        self.jobs.values().collect()
    }

    /// Record the final details of a finished job.
    ///
    /// Returns [`DagJobFailure`] when the job did not succeed and is allowed
    /// to fail the DAG; a failed job with `fail_dag_on_error = false` is only
    /// logged.
    pub async fn finalize_job(&mut self, job_name: &str) -> Result<()> {
        let (team_name, execution_id) = {
            let job = self.job(job_name)?;
            (job.team_name.clone(), job.execution_id.clone())
        };

        if let Some(execution_id) = &execution_id {
            let details = self
                .executor
                .details_job(job_name, &team_name, execution_id)
                .await?;
            self.job_mut(job_name)?.details.refresh_from(details);
        }

        let job = self.job(job_name)?;
        let status = job
            .status
            .map(|s| s.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        info!(
            job = %job_name,
            execution_id = ?job.execution_id,
            status = %status,
            start_time = ?job.details.start_time,
            end_time = ?job.details.end_time,
            message = ?job.details.message,
            "data job finished"
        );

        if job.status == Some(JobStatus::Succeeded) {
            return Ok(());
        }

        if job.fail_dag_on_error {
            return Err(DagJobFailure {
                job_name: job.job_name.clone(),
                execution_id: job.execution_id.clone(),
                status: job.status,
                details: job.details.clone(),
            }
            .into());
        }

        warn!(
            job = %job_name,
            status = %status,
            "data job failed; continuing because fail_dag_on_error is false"
        );
        Ok(())
    }
}
