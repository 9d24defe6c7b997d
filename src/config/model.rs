// src/config/model.rs

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Configuration as read from a TOML file, before validation.
///
/// ```toml
/// [dag]
/// max_concurrent_running_jobs = 15
/// dag_execution_check_time_period_seconds = 10
///
/// [executor]
/// kind = "rest"
///
/// [executor.rest]
/// base_url = "http://localhost:8092"
/// ```
///
/// All sections are optional and have reasonable defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub dag: DagConfig,

    #[serde(default)]
    pub executor: ExecutorSection,
}

/// Validated configuration. Only obtainable through `TryFrom<RawConfigFile>`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub dag: DagConfig,
    pub executor: ExecutorSection,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(dag: DagConfig, executor: ExecutorSection) -> Self {
        Self { dag, executor }
    }
}

/// `[dag]` section: the orchestrator's scheduling knobs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DagConfig {
    /// Upper bound of executions in flight at the backend at any time.
    pub max_concurrent_running_jobs: usize,

    /// Minimum time between two status polls of the same job.
    pub time_between_status_check_seconds: u64,

    /// Sleep between scheduling loop iterations in which nothing finished.
    pub dag_execution_check_time_period_seconds: u64,

    /// Minimum delay before a delayed job start is attempted again.
    pub delayed_jobs_min_delay_seconds: u64,

    /// Upper bound of the random delay added on top of the minimum.
    pub delayed_jobs_randomized_added_delay_seconds: u64,

    /// Total start attempts when the backend keeps timing out.
    pub start_retries: u32,

    /// Sleep between two timed-out start attempts.
    pub start_retry_backoff_seconds: u64,
}

impl Default for DagConfig {
    fn default() -> Self {
        Self {
            max_concurrent_running_jobs: 15,
            time_between_status_check_seconds: 40,
            dag_execution_check_time_period_seconds: 10,
            delayed_jobs_min_delay_seconds: 30,
            delayed_jobs_randomized_added_delay_seconds: 600,
            start_retries: 3,
            start_retry_backoff_seconds: 10,
        }
    }
}

impl DagConfig {
    pub fn time_between_status_check(&self) -> Duration {
        Duration::from_secs(self.time_between_status_check_seconds)
    }

    pub fn dag_execution_check_time_period(&self) -> Duration {
        Duration::from_secs(self.dag_execution_check_time_period_seconds)
    }

    pub fn delayed_jobs_min_delay(&self) -> Duration {
        Duration::from_secs(self.delayed_jobs_min_delay_seconds)
    }

    pub fn delayed_jobs_randomized_added_delay(&self) -> Duration {
        Duration::from_secs(self.delayed_jobs_randomized_added_delay_seconds)
    }

    pub fn start_retry_backoff(&self) -> Duration {
        Duration::from_secs(self.start_retry_backoff_seconds)
    }
}

/// Which [`crate::exec::DataJobExecutor`] the binary should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutorKind {
    #[default]
    Local,
    Rest,
}

/// `[executor]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExecutorSection {
    #[serde(default)]
    pub kind: ExecutorKind,

    #[serde(default)]
    pub local: LocalExecutorConfig,

    #[serde(default)]
    pub rest: RestExecutorConfig,
}

/// `[executor.local]`: run each data job as a local process.
///
/// `args` may contain the placeholders `{job_dir}`, `{job_name}`,
/// `{team_name}` and `{arguments}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LocalExecutorConfig {
    /// Directory holding one sub-directory per data job.
    pub jobs_dir: PathBuf,
    pub program: String,
    pub args: Vec<String>,
}

impl Default for LocalExecutorConfig {
    fn default() -> Self {
        Self {
            jobs_dir: PathBuf::from("jobs"),
            program: "vdk".to_string(),
            args: vec![
                "run".to_string(),
                "{job_dir}".to_string(),
                "--arguments".to_string(),
                "{arguments}".to_string(),
            ],
        }
    }
}

/// `[executor.rest]`: talk to a control plane over HTTP.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RestExecutorConfig {
    pub base_url: String,
    pub deployment_id: String,
    pub request_timeout_seconds: u64,
    /// Environment variable holding a bearer token, if any.
    pub token_env: Option<String>,
}

impl Default for RestExecutorConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8092".to_string(),
            deployment_id: "production".to_string(),
            request_timeout_seconds: 30,
            token_env: Some("JOBDAG_API_TOKEN".to_string()),
        }
    }
}

impl RestExecutorConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}
