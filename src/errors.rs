// src/errors.rs

//! Crate-wide error types.

use std::fmt;

use thiserror::Error;

use crate::dag::sorter::SorterError;
use crate::types::{ExecutionDetails, JobName, JobStatus};

/// Category of a DAG validation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationErrorKind {
    /// A field has the wrong JSON type.
    Type,
    /// A job uses a key that is not allowed.
    Permission,
    /// A required key or referenced job is missing.
    Requirement,
    /// Jobs clash with each other (duplicates, cycles).
    Conflict,
}

impl fmt::Display for ValidationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationErrorKind::Type => f.write_str("type"),
            ValidationErrorKind::Permission => f.write_str("permission"),
            ValidationErrorKind::Requirement => f.write_str("requirement"),
            ValidationErrorKind::Conflict => f.write_str("conflict"),
        }
    }
}

/// The submitted DAG is malformed. Raised before any job starts.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error(
    "invalid DAG ({kind} error): {message} [jobs: {}]. {remediation}",
    .offending_job_names.join(", ")
)]
pub struct DagValidationError {
    pub kind: ValidationErrorKind,
    pub message: String,
    pub remediation: String,
    pub offending_job_names: Vec<JobName>,
}

impl DagValidationError {
    pub fn new(
        kind: ValidationErrorKind,
        message: impl Into<String>,
        remediation: impl Into<String>,
        offending_job_names: Vec<JobName>,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            remediation: remediation.into(),
            offending_job_names,
        }
    }
}

/// Failure reported by a [`crate::exec::DataJobExecutor`] implementation.
///
/// The variants are the tagged outcomes the orchestrator branches on:
/// `Conflict` and `Server` mean "try again later", `Timeout` means the
/// start may or may not have landed, everything else is fatal.
#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("conflict, another execution is already running: {0}")]
    Conflict(String),

    #[error("server error (HTTP {status}): {message}")]
    Server { status: u16, message: String },

    #[error("request rejected (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    #[error("execution '{execution_id}' of data job '{job_name}' not found")]
    ExecutionNotFound {
        job_name: JobName,
        execution_id: String,
    },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid response from backend: {0}")]
    InvalidResponse(String),
}

impl ExecutorError {
    /// Whether a failed start should be re-queued and attempted again later.
    pub fn should_delay_start(&self) -> bool {
        matches!(self, ExecutorError::Conflict(_) | ExecutorError::Server { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ExecutorError::Timeout(_))
    }

    /// Build the matching variant for a non-success HTTP status.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            409 => ExecutorError::Conflict(message),
            s if s >= 500 => ExecutorError::Server { status: s, message },
            s => ExecutorError::Api { status: s, message },
        }
    }
}

/// A data job finished without succeeding and was allowed to fail the DAG.
#[derive(Error, Debug, Clone)]
pub struct DagJobFailure {
    pub job_name: JobName,
    pub execution_id: Option<String>,
    pub status: Option<JobStatus>,
    pub details: ExecutionDetails,
}

impl fmt::Display for DagJobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = self
            .status
            .map(|s| s.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        write!(f, "data job '{}' finished with status {}", self.job_name, status)?;
        if let Some(id) = &self.execution_id {
            write!(f, " (execution {id})")?;
        }
        if let Some(message) = &self.details.message {
            write!(f, ": {message}")?;
        }
        write!(
            f,
            ". The DAG run was aborted; jobs that were already started keep running. \
             Inspect the execution logs"
        )?;
        if let Some(url) = &self.details.logs_url {
            write!(f, " at {url}")?;
        }
        write!(
            f,
            ", fix the job or set fail_dag_on_error = false for it, then re-run the DAG"
        )
    }
}

#[derive(Error, Debug)]
pub enum JobdagError {
    #[error(transparent)]
    Validation(#[from] DagValidationError),

    #[error(transparent)]
    JobFailure(#[from] DagJobFailure),

    #[error("backend error: {0}")]
    Executor(#[from] ExecutorError),

    #[error(
        "could not tell whether data job '{job_name}' was started after {attempts} timed-out \
         attempts; this points to a control-plane or network problem, not a job error. \
         Check the job's executions before re-running the DAG"
    )]
    StartAmbiguous { job_name: JobName, attempts: u32 },

    #[error("data job '{0}' is not part of this DAG")]
    UnknownJob(JobName),

    #[error("DAG structure error: {0}")]
    Sorter(#[from] SorterError),

    #[error("DAG run cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, JobdagError>;
