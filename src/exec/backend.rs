// src/exec/backend.rs

//! Pluggable data job execution backend.
//!
//! The orchestrator never runs job bodies itself; it talks to a
//! `DataJobExecutor` that knows how to start a remote execution and report on
//! it. Production code uses [`super::RestDataJobExecutor`] or
//! [`super::LocalDataJobExecutor`]; tests plug in a scripted fake.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::errors::ExecutorError;
use crate::types::{Execution, ExecutionDetails, JobStatus};

#[async_trait]
pub trait DataJobExecutor: Send + Sync {
    /// Trigger one execution of `job_name` and return its id.
    ///
    /// Not required to be idempotent. Implementations must report a network
    /// timeout as [`ExecutorError::Timeout`] and an "already running" rejection
    /// as [`ExecutorError::Conflict`].
    async fn start_job(
        &self,
        job_name: &str,
        team_name: &str,
        started_by: Option<&str>,
        arguments: &Map<String, Value>,
    ) -> Result<String, ExecutorError>;

    async fn status_job(
        &self,
        job_name: &str,
        team_name: &str,
        execution_id: &str,
    ) -> Result<JobStatus, ExecutorError>;

    async fn details_job(
        &self,
        job_name: &str,
        team_name: &str,
        execution_id: &str,
    ) -> Result<ExecutionDetails, ExecutorError>;

    /// Past executions of the job, oldest first; the last element is the
    /// most recent one.
    async fn job_executions_list(
        &self,
        job_name: &str,
        team_name: &str,
    ) -> Result<Vec<Execution>, ExecutorError>;
}

#[async_trait]
impl<T> DataJobExecutor for Box<T>
where
    T: DataJobExecutor + ?Sized,
{
    async fn start_job(
        &self,
        job_name: &str,
        team_name: &str,
        started_by: Option<&str>,
        arguments: &Map<String, Value>,
    ) -> Result<String, ExecutorError> {
        (**self)
            .start_job(job_name, team_name, started_by, arguments)
            .await
    }

    async fn status_job(
        &self,
        job_name: &str,
        team_name: &str,
        execution_id: &str,
    ) -> Result<JobStatus, ExecutorError> {
        (**self).status_job(job_name, team_name, execution_id).await
    }

    async fn details_job(
        &self,
        job_name: &str,
        team_name: &str,
        execution_id: &str,
    ) -> Result<ExecutionDetails, ExecutorError> {
        (**self).details_job(job_name, team_name, execution_id).await
    }

    async fn job_executions_list(
        &self,
        job_name: &str,
        team_name: &str,
    ) -> Result<Vec<Execution>, ExecutorError> {
        (**self).job_executions_list(job_name, team_name).await
    }
}
