use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Canonical data job name type used throughout the crate.
pub type JobName = String;

/// Status of a single data job execution as reported by the backend.
///
/// `Submitted` and `Running` are the active states; everything else is
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[serde(alias = "SUBMITTED")]
    Submitted,
    #[serde(alias = "RUNNING")]
    Running,
    #[serde(alias = "SUCCEEDED")]
    Succeeded,
    #[serde(alias = "CANCELLED")]
    Cancelled,
    #[serde(alias = "SKIPPED")]
    Skipped,
    #[serde(alias = "USER_ERROR")]
    UserError,
    #[serde(alias = "PLATFORM_ERROR")]
    PlatformError,
}

impl JobStatus {
    pub fn is_active(self) -> bool {
        matches!(self, JobStatus::Submitted | JobStatus::Running)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Submitted => "submitted",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Skipped => "skipped",
            JobStatus::UserError => "user_error",
            JobStatus::PlatformError => "platform_error",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "submitted" => Ok(JobStatus::Submitted),
            "running" => Ok(JobStatus::Running),
            "succeeded" => Ok(JobStatus::Succeeded),
            "cancelled" => Ok(JobStatus::Cancelled),
            "skipped" => Ok(JobStatus::Skipped),
            "user_error" => Ok(JobStatus::UserError),
            "platform_error" => Ok(JobStatus::PlatformError),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// How the orchestrating DAG itself was invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionType {
    #[default]
    Manual,
    Scheduled,
}

impl fmt::Display for ExecutionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionType::Manual => f.write_str("manual"),
            ExecutionType::Scheduled => f.write_str("scheduled"),
        }
    }
}

/// Last known detail blob of a data job execution.
///
/// Field names follow the control plane's execution resource, so the REST
/// executor can deserialize responses straight into this type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionDetails {
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: Option<JobStatus>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub started_by: Option<String>,
    #[serde(default, rename = "type")]
    pub execution_type: Option<String>,
    #[serde(default)]
    pub deployment: Option<Value>,
    #[serde(default)]
    pub logs_url: Option<String>,
}

impl ExecutionDetails {
    /// Details seeded before the first start: only `started_by` is known.
    pub fn started_by(label: impl Into<String>) -> Self {
        Self {
            started_by: Some(label.into()),
            ..Default::default()
        }
    }

    /// Replace these details with a fresh blob from the backend, keeping
    /// `started_by` when the backend did not report one.
    pub fn refresh_from(&mut self, fresh: ExecutionDetails) {
        let started_by = fresh.started_by.clone().or_else(|| self.started_by.take());
        *self = fresh;
        self.started_by = started_by;
    }
}

/// One entry of a job's execution history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub id: String,
    #[serde(default)]
    pub status: Option<JobStatus>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
}

/// A single node of a DAG as submitted by the user.
///
/// Raw JSON is checked by [`crate::dag::validate`] before it is turned into
/// this type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub job_name: JobName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_name: Option<String>,
    #[serde(default = "default_fail_dag_on_error")]
    pub fail_dag_on_error: bool,
    pub depends_on: BTreeSet<JobName>,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

fn default_fail_dag_on_error() -> bool {
    true
}

impl JobSpec {
    pub fn new(job_name: impl Into<JobName>) -> Self {
        Self {
            job_name: job_name.into(),
            team_name: None,
            fail_dag_on_error: true,
            depends_on: BTreeSet::new(),
            arguments: Map::new(),
        }
    }
}
