// src/dag/trackable_job.rs

//! Per-run state of one data job inside a DAG.

use serde::Serialize;
use serde_json::{Map, Value};
use tokio::time::Instant;

use crate::types::{ExecutionDetails, JobName, JobSpec, JobStatus};

/// A data job as tracked while its DAG runs.
///
/// Owned exclusively by one [`crate::exec::TrackingDataJobExecutor`]; it lives
/// as long as the DAG run object does.
#[derive(Debug, Clone)]
pub struct TrackableJob {
    pub job_name: JobName,
    pub team_name: String,
    pub fail_dag_on_error: bool,
    pub arguments: Map<String, Value>,
    /// Last known execution details from the backend.
    pub details: ExecutionDetails,
    pub execution_id: Option<String>,
    /// `None` until the job has been submitted at least once.
    pub status: Option<JobStatus>,
    pub start_attempt: u32,
    /// When the status was last polled; `None` means never.
    pub last_status_time: Option<Instant>,
}

impl TrackableJob {
    pub fn new(job_name: impl Into<JobName>, team_name: impl Into<String>) -> Self {
        Self {
            job_name: job_name.into(),
            team_name: team_name.into(),
            fail_dag_on_error: true,
            arguments: Map::new(),
            details: ExecutionDetails::default(),
            execution_id: None,
            status: None,
            start_attempt: 0,
            last_status_time: None,
        }
    }

    /// Build the tracked job for a validated spec. Jobs without a team run
    /// under `default_team`.
    pub fn from_spec(spec: &JobSpec, default_team: &str, started_by: &str) -> Self {
        Self {
            job_name: spec.job_name.clone(),
            team_name: spec
                .team_name
                .clone()
                .unwrap_or_else(|| default_team.to_string()),
            fail_dag_on_error: spec.fail_dag_on_error,
            arguments: spec.arguments.clone(),
            details: ExecutionDetails::started_by(started_by),
            execution_id: None,
            status: None,
            start_attempt: 0,
            last_status_time: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status.is_some_and(JobStatus::is_active)
    }

    /// Submitted at least once and reached a terminal status.
    pub fn is_finished(&self) -> bool {
        self.status.is_some_and(JobStatus::is_terminal)
    }

    pub fn summary(&self) -> JobRunSummary {
        JobRunSummary {
            job_name: self.job_name.clone(),
            team_name: self.team_name.clone(),
            status: self.status,
            execution_id: self.execution_id.clone(),
            start_attempts: self.start_attempt,
            fail_dag_on_error: self.fail_dag_on_error,
            message: self.details.message.clone(),
        }
    }
}

/// Reporting snapshot of a [`TrackableJob`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobRunSummary {
    pub job_name: JobName,
    pub team_name: String,
    pub status: Option<JobStatus>,
    pub execution_id: Option<String>,
    pub start_attempts: u32,
    pub fail_dag_on_error: bool,
    pub message: Option<String>,
}
