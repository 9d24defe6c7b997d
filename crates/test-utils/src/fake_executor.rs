use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use jobdag::errors::ExecutorError;
use jobdag::exec::DataJobExecutor;
use jobdag::types::{Execution, ExecutionDetails, JobStatus};
use serde_json::{Map, Value};
use tracing::debug;

/// A scripted answer to one `start_job` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartFailure {
    /// HTTP 409: another execution is running.
    Conflict,
    /// HTTP 5xx.
    ServerError(u16),
    /// The request timed out and nothing was started.
    Timeout,
    /// The request timed out but the execution was created anyway.
    TimeoutButStarted,
    /// A non-retryable rejection such as HTTP 400.
    Fatal(u16),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutorEvent {
    Started { job: String, execution_id: String },
    Finished { job: String, execution_id: String, status: JobStatus },
}

#[derive(Debug, Clone)]
struct JobScript {
    outcome: JobStatus,
    /// Status polls until the execution reports `outcome`; `None` = never.
    polls_until_done: Option<u32>,
    start_failures: VecDeque<StartFailure>,
    /// 1-based `job_executions_list` calls that time out.
    list_timeouts: BTreeSet<usize>,
    message: Option<String>,
}

impl Default for JobScript {
    fn default() -> Self {
        Self {
            outcome: JobStatus::Succeeded,
            polls_until_done: Some(1),
            start_failures: VecDeque::new(),
            list_timeouts: BTreeSet::new(),
            message: None,
        }
    }
}

#[derive(Debug)]
struct FakeExecution {
    id: String,
    status: JobStatus,
    polls_left: Option<u32>,
    started_by: Option<String>,
    arguments: Map<String, Value>,
}

#[derive(Debug, Default)]
struct State {
    scripts: HashMap<String, JobScript>,
    executions: HashMap<String, Vec<FakeExecution>>,
    start_calls: Vec<String>,
    status_calls: Vec<String>,
    list_calls: Vec<String>,
    events: Vec<ExecutorEvent>,
    in_flight: usize,
    peak_in_flight: usize,
    seq: u64,
}

impl State {
    fn script(&mut self, job: &str) -> &mut JobScript {
        self.scripts.entry(job.to_string()).or_default()
    }

    fn create_execution(
        &mut self,
        job: &str,
        started_by: Option<&str>,
        arguments: &Map<String, Value>,
    ) -> String {
        self.seq += 1;
        let id = format!("{job}-{}", self.seq);
        let polls_left = self.script(job).polls_until_done;

        self.executions
            .entry(job.to_string())
            .or_default()
            .push(FakeExecution {
                id: id.clone(),
                status: JobStatus::Submitted,
                polls_left,
                started_by: started_by.map(str::to_string),
                arguments: arguments.clone(),
            });

        self.in_flight += 1;
        self.peak_in_flight = self.peak_in_flight.max(self.in_flight);
        self.events.push(ExecutorEvent::Started {
            job: job.to_string(),
            execution_id: id.clone(),
        });
        id
    }

    fn execution_mut(
        &mut self,
        job: &str,
        execution_id: &str,
    ) -> Result<&mut FakeExecution, ExecutorError> {
        self.executions
            .get_mut(job)
            .and_then(|list| list.iter_mut().find(|e| e.id == execution_id))
            .ok_or_else(|| ExecutorError::ExecutionNotFound {
                job_name: job.to_string(),
                execution_id: execution_id.to_string(),
            })
    }
}

/// In-memory [`DataJobExecutor`] whose behaviour is scripted per job.
///
/// - every job succeeds on its first status poll unless scripted otherwise
/// - start failures are consumed one per `start_job` call
/// - executions count as in flight from start until a poll finishes them
///
/// Clones share state, so a test can hand one clone to the DAG and inspect
/// the other afterwards.
#[derive(Debug, Clone, Default)]
pub struct ScriptedExecutor {
    state: Arc<Mutex<State>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn with_outcome(self, job: &str, status: JobStatus) -> Self {
        self.state().script(job).outcome = status;
        self
    }

    pub fn with_polls_until_done(self, job: &str, polls: u32) -> Self {
        self.state().script(job).polls_until_done = Some(polls.max(1));
        self
    }

    pub fn never_finishes(self, job: &str) -> Self {
        self.state().script(job).polls_until_done = None;
        self
    }

    pub fn with_message(self, job: &str, message: &str) -> Self {
        self.state().script(job).message = Some(message.to_string());
        self
    }

    pub fn with_start_failures(self, job: &str, failures: &[StartFailure]) -> Self {
        self.state()
            .script(job)
            .start_failures
            .extend(failures.iter().copied());
        self
    }

    /// Make the first `timeouts` history lookups of `job` time out.
    pub fn with_list_timeouts(self, job: &str, timeouts: usize) -> Self {
        self.state().script(job).list_timeouts.extend(1..=timeouts);
        self
    }

    /// Make the `call`-th history lookup of `job` (1-based) time out.
    pub fn with_list_timeout_on_call(self, job: &str, call: usize) -> Self {
        self.state().script(job).list_timeouts.insert(call);
        self
    }

    /// Seed a finished execution that happened before the test.
    pub fn with_previous_execution(self, job: &str, execution_id: &str) -> Self {
        self.state()
            .executions
            .entry(job.to_string())
            .or_default()
            .push(FakeExecution {
                id: execution_id.to_string(),
                status: JobStatus::Succeeded,
                polls_left: Some(0),
                started_by: None,
                arguments: Map::new(),
            });
        self
    }

    /// Every `start_job` call, including failed ones.
    pub fn start_calls(&self) -> Vec<String> {
        self.state().start_calls.clone()
    }

    pub fn start_calls_for(&self, job: &str) -> usize {
        self.state().start_calls.iter().filter(|j| *j == job).count()
    }

    /// Jobs in the order their executions were created.
    pub fn started_jobs(&self) -> Vec<String> {
        self.state()
            .events
            .iter()
            .filter_map(|e| match e {
                ExecutorEvent::Started { job, .. } => Some(job.clone()),
                ExecutorEvent::Finished { .. } => None,
            })
            .collect()
    }

    pub fn events(&self) -> Vec<ExecutorEvent> {
        self.state().events.clone()
    }

    pub fn position_of(&self, wanted: &ExecutorEvent) -> Option<usize> {
        self.state().events.iter().position(|e| e == wanted)
    }

    /// Ids of all executions of `job`, seeded ones included, oldest first.
    pub fn execution_ids(&self, job: &str) -> Vec<String> {
        self.state()
            .executions
            .get(job)
            .map(|list| list.iter().map(|e| e.id.clone()).collect())
            .unwrap_or_default()
    }

    pub fn started_by_of(&self, execution_id: &str) -> Option<String> {
        self.state()
            .executions
            .values()
            .flatten()
            .find(|e| e.id == execution_id)
            .and_then(|e| e.started_by.clone())
    }

    pub fn arguments_of(&self, execution_id: &str) -> Option<Map<String, Value>> {
        self.state()
            .executions
            .values()
            .flatten()
            .find(|e| e.id == execution_id)
            .map(|e| e.arguments.clone())
    }

    pub fn status_calls_for(&self, job: &str) -> usize {
        self.state().status_calls.iter().filter(|j| *j == job).count()
    }

    pub fn list_calls_for(&self, job: &str) -> usize {
        self.state().list_calls.iter().filter(|j| *j == job).count()
    }

    pub fn in_flight(&self) -> usize {
        self.state().in_flight
    }

    pub fn peak_in_flight(&self) -> usize {
        self.state().peak_in_flight
    }
}

#[async_trait]
impl DataJobExecutor for ScriptedExecutor {
    async fn start_job(
        &self,
        job_name: &str,
        _team_name: &str,
        started_by: Option<&str>,
        arguments: &Map<String, Value>,
    ) -> Result<String, ExecutorError> {
        let mut state = self.state();
        state.start_calls.push(job_name.to_string());

        let failure = state.script(job_name).start_failures.pop_front();
        match failure {
            None => Ok(state.create_execution(job_name, started_by, arguments)),
            Some(StartFailure::Conflict) => Err(ExecutorError::Conflict(format!(
                "data job '{job_name}' is already running"
            ))),
            Some(StartFailure::ServerError(status)) => Err(ExecutorError::Server {
                status,
                message: "internal server error".to_string(),
            }),
            Some(StartFailure::Timeout) => {
                Err(ExecutorError::Timeout("start request timed out".to_string()))
            }
            Some(StartFailure::TimeoutButStarted) => {
                state.create_execution(job_name, started_by, arguments);
                Err(ExecutorError::Timeout("start request timed out".to_string()))
            }
            Some(StartFailure::Fatal(status)) => Err(ExecutorError::Api {
                status,
                message: "bad request".to_string(),
            }),
        }
    }

    async fn status_job(
        &self,
        job_name: &str,
        _team_name: &str,
        execution_id: &str,
    ) -> Result<JobStatus, ExecutorError> {
        let mut state = self.state();
        state.status_calls.push(job_name.to_string());
        let outcome = state.script(job_name).outcome;

        let execution = state.execution_mut(job_name, execution_id)?;
        if execution.status.is_terminal() {
            return Ok(execution.status);
        }

        let finished = match execution.polls_left.as_mut() {
            Some(left) => {
                *left = left.saturating_sub(1);
                *left == 0
            }
            None => false,
        };

        if !finished {
            execution.status = JobStatus::Running;
            return Ok(JobStatus::Running);
        }

        execution.status = outcome;
        state.in_flight = state.in_flight.saturating_sub(1);
        state.events.push(ExecutorEvent::Finished {
            job: job_name.to_string(),
            execution_id: execution_id.to_string(),
            status: outcome,
        });
        Ok(outcome)
    }

    async fn details_job(
        &self,
        job_name: &str,
        _team_name: &str,
        execution_id: &str,
    ) -> Result<ExecutionDetails, ExecutorError> {
        let mut state = self.state();
        let message = state.script(job_name).message.clone();
        let execution = state.execution_mut(job_name, execution_id)?;

        let failed = execution.status.is_terminal() && execution.status != JobStatus::Succeeded;
        Ok(ExecutionDetails {
            status: Some(execution.status),
            message: if failed { message } else { None },
            started_by: execution.started_by.clone(),
            logs_url: Some(format!("https://logs.example.com/{execution_id}")),
            ..Default::default()
        })
    }

    async fn job_executions_list(
        &self,
        job_name: &str,
        _team_name: &str,
    ) -> Result<Vec<Execution>, ExecutorError> {
        let mut state = self.state();
        state.list_calls.push(job_name.to_string());
        let call = state.list_calls.iter().filter(|j| *j == job_name).count();

        if state.script(job_name).list_timeouts.contains(&call) {
            debug!(job = %job_name, call, "scripted history lookup timeout");
            return Err(ExecutorError::Timeout("list request timed out".to_string()));
        }

        Ok(state
            .executions
            .get(job_name)
            .map(|list| {
                list.iter()
                    .map(|e| Execution {
                        id: e.id.clone(),
                        status: Some(e.status),
                        start_time: None,
                        end_time: None,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}
