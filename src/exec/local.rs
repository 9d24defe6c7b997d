// src/exec/local.rs

//! Runs data job executions as local processes.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::config::LocalExecutorConfig;
use crate::errors::ExecutorError;
use crate::exec::DataJobExecutor;
use crate::types::{Execution, ExecutionDetails, JobName, JobStatus};

/// Environment variable carrying the `started_by` label into the process.
pub const STARTED_BY_ENV: &str = "JOBDAG_STARTED_BY";

/// [`DataJobExecutor`] that spawns one process per execution.
///
/// The command line comes from [`LocalExecutorConfig`]; an exit code of 0
/// means the job succeeded, anything else is a user error. Processes keep
/// running when the executor is dropped, like remote executions outlive the
/// orchestrator that started them.
#[derive(Debug)]
pub struct LocalDataJobExecutor {
    config: LocalExecutorConfig,
    executions: Mutex<HashMap<JobName, Vec<LocalExecution>>>,
    seq: AtomicU64,
}

#[derive(Debug)]
struct LocalExecution {
    id: String,
    child: Option<Child>,
    status: JobStatus,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    started_by: Option<String>,
    message: Option<String>,
    last_stderr_line: Arc<Mutex<Option<String>>>,
}

impl LocalExecution {
    /// Check the process without blocking and record its exit.
    fn poll(&mut self, job_name: &str) {
        let Some(child) = self.child.as_mut() else {
            return;
        };

        match child.try_wait() {
            Ok(None) => self.status = JobStatus::Running,
            Ok(Some(exit)) => {
                let code = exit.code().unwrap_or(-1);
                self.status = if exit.success() {
                    JobStatus::Succeeded
                } else {
                    JobStatus::UserError
                };
                self.end_time = Some(Utc::now());
                if !exit.success() {
                    let stderr = lock(&self.last_stderr_line).clone();
                    self.message = Some(match stderr {
                        Some(line) => format!("process exited with code {code}: {line}"),
                        None => format!("process exited with code {code}"),
                    });
                }
                self.child = None;
                info!(
                    job = %job_name,
                    execution_id = %self.id,
                    exit_code = code,
                    status = %self.status,
                    "data job process exited"
                );
            }
            Err(err) => {
                warn!(job = %job_name, execution_id = %self.id, error = %err, "waiting for data job process failed");
                self.status = JobStatus::PlatformError;
                self.end_time = Some(Utc::now());
                self.message = Some(format!("could not wait for process: {err}"));
                self.child = None;
            }
        }
    }

    fn details(&self) -> ExecutionDetails {
        ExecutionDetails {
            start_time: Some(self.start_time),
            end_time: self.end_time,
            status: Some(self.status),
            message: self.message.clone(),
            started_by: self.started_by.clone(),
            execution_type: None,
            deployment: None,
            logs_url: None,
        }
    }

    fn summary(&self) -> Execution {
        Execution {
            id: self.id.clone(),
            status: Some(self.status),
            start_time: Some(self.start_time),
            end_time: self.end_time,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl LocalDataJobExecutor {
    pub fn new(config: LocalExecutorConfig) -> Self {
        Self {
            config,
            executions: Mutex::new(HashMap::new()),
            seq: AtomicU64::new(0),
        }
    }

    pub fn job_dir(&self, job_name: &str) -> PathBuf {
        self.config.jobs_dir.join(job_name)
    }

    /// Program arguments with all placeholders substituted.
    pub fn render_args(
        &self,
        job_name: &str,
        team_name: &str,
        arguments: &Map<String, Value>,
    ) -> Vec<String> {
        let job_dir = self.job_dir(job_name).display().to_string();
        let arguments = Value::Object(arguments.clone()).to_string();

        self.config
            .args
            .iter()
            .map(|arg| {
                arg.replace("{job_dir}", &job_dir)
                    .replace("{job_name}", job_name)
                    .replace("{team_name}", team_name)
                    .replace("{arguments}", &arguments)
            })
            .collect()
    }

    fn next_execution_id(&self, job_name: &str) -> String {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        format!("{job_name}-{}-{seq}", Utc::now().timestamp_millis())
    }

    fn spawn(
        &self,
        job_name: &str,
        team_name: &str,
        started_by: Option<&str>,
        arguments: &Map<String, Value>,
    ) -> std::io::Result<(Child, Arc<Mutex<Option<String>>>)> {
        let args = self.render_args(job_name, team_name, arguments);
        debug!(job = %job_name, program = %self.config.program, ?args, "spawning data job process");

        let mut cmd = Command::new(&self.config.program);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false);
        if let Some(label) = started_by {
            cmd.env(STARTED_BY_ENV, label);
        }

        let mut child = cmd.spawn()?;
        let last_stderr_line = Arc::new(Mutex::new(None));

        if let Some(stdout) = child.stdout.take() {
            let job = job_name.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(job = %job, "stdout: {}", line);
                }
            });
        }

        if let Some(stderr) = child.stderr.take() {
            let job = job_name.to_string();
            let last = Arc::clone(&last_stderr_line);
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(job = %job, "stderr: {}", line);
                    if !line.trim().is_empty() {
                        *lock(&last) = Some(line);
                    }
                }
            });
        }

        Ok((child, last_stderr_line))
    }

    fn with_execution<T>(
        &self,
        job_name: &str,
        execution_id: &str,
        f: impl FnOnce(&mut LocalExecution) -> T,
    ) -> Result<T, ExecutorError> {
        let mut executions = lock(&self.executions);
        let execution = executions
            .get_mut(job_name)
            .and_then(|list| list.iter_mut().find(|e| e.id == execution_id))
            .ok_or_else(|| ExecutorError::ExecutionNotFound {
                job_name: job_name.to_string(),
                execution_id: execution_id.to_string(),
            })?;
        execution.poll(job_name);
        Ok(f(execution))
    }
}

#[async_trait]
impl DataJobExecutor for LocalDataJobExecutor {
    async fn start_job(
        &self,
        job_name: &str,
        team_name: &str,
        started_by: Option<&str>,
        arguments: &Map<String, Value>,
    ) -> Result<String, ExecutorError> {
        {
            let mut executions = lock(&self.executions);
            if let Some(latest) = executions.get_mut(job_name).and_then(|list| list.last_mut()) {
                latest.poll(job_name);
                if latest.status.is_active() {
                    return Err(ExecutorError::Conflict(format!(
                        "execution '{}' of data job '{job_name}' is still running",
                        latest.id
                    )));
                }
            }
        }

        let id = self.next_execution_id(job_name);
        let start_time = Utc::now();

        let execution = match self.spawn(job_name, team_name, started_by, arguments) {
            Ok((child, last_stderr_line)) => LocalExecution {
                id: id.clone(),
                child: Some(child),
                status: JobStatus::Submitted,
                start_time,
                end_time: None,
                started_by: started_by.map(str::to_string),
                message: None,
                last_stderr_line,
            },
            Err(err) => {
                warn!(job = %job_name, program = %self.config.program, error = %err, "could not spawn data job process");
                LocalExecution {
                    id: id.clone(),
                    child: None,
                    status: JobStatus::PlatformError,
                    start_time,
                    end_time: Some(start_time),
                    started_by: started_by.map(str::to_string),
                    message: Some(format!(
                        "could not start '{}': {err}",
                        self.config.program
                    )),
                    last_stderr_line: Arc::new(Mutex::new(None)),
                }
            }
        };

        lock(&self.executions)
            .entry(job_name.to_string())
            .or_default()
            .push(execution);

        Ok(id)
    }

    async fn status_job(
        &self,
        job_name: &str,
        _team_name: &str,
        execution_id: &str,
    ) -> Result<JobStatus, ExecutorError> {
        self.with_execution(job_name, execution_id, |e| e.status)
    }

    async fn details_job(
        &self,
        job_name: &str,
        _team_name: &str,
        execution_id: &str,
    ) -> Result<ExecutionDetails, ExecutorError> {
        self.with_execution(job_name, execution_id, |e| e.details())
    }

    async fn job_executions_list(
        &self,
        job_name: &str,
        _team_name: &str,
    ) -> Result<Vec<Execution>, ExecutorError> {
        let executions = lock(&self.executions);
        Ok(executions
            .get(job_name)
            .map(|list| list.iter().map(LocalExecution::summary).collect())
            .unwrap_or_default())
    }
}
