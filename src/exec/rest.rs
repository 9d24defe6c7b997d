// src/exec/rest.rs

//! HTTP client for a control plane's data job execution API.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, LOCATION};
use reqwest::{Client, Response, StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::config::RestExecutorConfig;
use crate::errors::ExecutorError;
use crate::exec::DataJobExecutor;
use crate::types::{Execution, ExecutionDetails, JobStatus};

/// [`DataJobExecutor`] backed by the control plane's REST endpoints:
///
/// - `POST {base}/data-jobs/for-team/{team}/jobs/{job}/deployments/{deployment}/executions`
/// - `GET  {base}/data-jobs/for-team/{team}/jobs/{job}/executions/{id}`
/// - `GET  {base}/data-jobs/for-team/{team}/jobs/{job}/executions`
#[derive(Debug, Clone)]
pub struct RestDataJobExecutor {
    client: Client,
    base_url: Url,
    deployment_id: String,
}

#[derive(Debug, Serialize)]
struct StartRequest<'a> {
    started_by: Option<&'a str>,
    args: &'a Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct StartResponse {
    id: String,
}

impl RestDataJobExecutor {
    /// Build the client. The bearer token is read from `token_env` when that
    /// variable is set.
    pub fn new(config: &RestExecutorConfig) -> Result<Self, ExecutorError> {
        let mut headers = HeaderMap::new();
        if let Some(var) = &config.token_env {
            match std::env::var(var) {
                Ok(token) if !token.trim().is_empty() => {
                    let value = HeaderValue::from_str(&format!("Bearer {}", token.trim()))
                        .map_err(|e| ExecutorError::Transport(format!("invalid token in {var}: {e}")))?;
                    headers.insert(AUTHORIZATION, value);
                }
                _ => debug!(env = %var, "no API token set; sending unauthenticated requests"),
            }
        }

        let client = Client::builder()
            .timeout(config.request_timeout())
            .default_headers(headers)
            .build()
            .map_err(|e| ExecutorError::Transport(e.to_string()))?;

        let base_url = Url::parse(config.base_url.trim())
            .map_err(|e| ExecutorError::Transport(format!("invalid base URL {:?}: {e}", config.base_url)))?;
        if base_url.cannot_be_a_base() {
            return Err(ExecutorError::Transport(format!(
                "base URL {:?} cannot carry a path",
                config.base_url
            )));
        }

        Ok(Self {
            client,
            base_url,
            deployment_id: config.deployment_id.clone(),
        })
    }

    /// `{base}/data-jobs/for-team/{team}/jobs/{job}/{tail..}`, with every
    /// name percent-encoded as a single path segment.
    fn job_url(&self, team_name: &str, job_name: &str, tail: &[&str]) -> Result<Url, ExecutorError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|()| {
                ExecutorError::Transport(format!("base URL {} cannot carry a path", self.base_url))
            })?;
            segments
                .pop_if_empty()
                .extend(["data-jobs", "for-team", team_name, "jobs", job_name])
                .extend(tail);
        }
        Ok(url)
    }

    pub fn executions_url(&self, team_name: &str, job_name: &str) -> Result<Url, ExecutorError> {
        self.job_url(team_name, job_name, &["executions"])
    }

    pub fn execution_url(
        &self,
        team_name: &str,
        job_name: &str,
        execution_id: &str,
    ) -> Result<Url, ExecutorError> {
        self.job_url(team_name, job_name, &["executions", execution_id])
    }

    pub fn start_url(&self, team_name: &str, job_name: &str) -> Result<Url, ExecutorError> {
        self.job_url(
            team_name,
            job_name,
            &["deployments", self.deployment_id.as_str(), "executions"],
        )
    }
}

fn transport_error(err: reqwest::Error) -> ExecutorError {
    if err.is_timeout() {
        ExecutorError::Timeout(err.to_string())
    } else {
        ExecutorError::Transport(err.to_string())
    }
}

/// Map a non-success response to the matching [`ExecutorError`].
async fn error_for_status(response: Response) -> Result<Response, ExecutorError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = if body.trim().is_empty() {
        status
            .canonical_reason()
            .unwrap_or("no response body")
            .to_string()
    } else {
        body
    };
    Err(ExecutorError::from_status(status.as_u16(), message))
}

/// Execution id from a `Location` header such as
/// `/data-jobs/for-team/t/jobs/j/executions/j-1700000000`.
pub fn execution_id_from_location(location: &str) -> Option<String> {
    let path = location.split(['?', '#']).next().unwrap_or(location);
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
}

#[async_trait]
impl DataJobExecutor for RestDataJobExecutor {
    async fn start_job(
        &self,
        job_name: &str,
        team_name: &str,
        started_by: Option<&str>,
        arguments: &Map<String, Value>,
    ) -> Result<String, ExecutorError> {
        let url = self.start_url(team_name, job_name)?;
        debug!(job = %job_name, %url, "starting execution");

        let response = self
            .client
            .post(url)
            .json(&StartRequest {
                started_by,
                args: arguments,
            })
            .send()
            .await
            .map_err(transport_error)?;
        let response = error_for_status(response).await?;

        if let Some(id) = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .and_then(execution_id_from_location)
        {
            return Ok(id);
        }

        let body = response.text().await.map_err(transport_error)?;
        serde_json::from_str::<StartResponse>(&body)
            .map(|r| r.id)
            .map_err(|e| {
                warn!(job = %job_name, body = %body, "start response carries no execution id");
                ExecutorError::InvalidResponse(format!(
                    "no Location header and no execution id in body: {e}"
                ))
            })
    }

    async fn status_job(
        &self,
        job_name: &str,
        team_name: &str,
        execution_id: &str,
    ) -> Result<JobStatus, ExecutorError> {
        let details = self.details_job(job_name, team_name, execution_id).await?;
        details.status.ok_or_else(|| {
            ExecutorError::InvalidResponse(format!(
                "execution '{execution_id}' of data job '{job_name}' has no status"
            ))
        })
    }

    async fn details_job(
        &self,
        job_name: &str,
        team_name: &str,
        execution_id: &str,
    ) -> Result<ExecutionDetails, ExecutorError> {
        let url = self.execution_url(team_name, job_name, execution_id)?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(transport_error)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(ExecutorError::ExecutionNotFound {
                job_name: job_name.to_string(),
                execution_id: execution_id.to_string(),
            });
        }

        error_for_status(response)
            .await?
            .json::<ExecutionDetails>()
            .await
            .map_err(|e| ExecutorError::InvalidResponse(e.to_string()))
    }

    async fn job_executions_list(
        &self,
        job_name: &str,
        team_name: &str,
    ) -> Result<Vec<Execution>, ExecutorError> {
        let url = self.executions_url(team_name, job_name)?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(transport_error)?;

        let mut executions = error_for_status(response)
            .await?
            .json::<Vec<Execution>>()
            .await
            .map_err(|e| ExecutorError::InvalidResponse(e.to_string()))?;

        // Executions without a start time have not started yet; keep them last.
        executions.sort_by_key(|e| (e.start_time.is_none(), e.start_time));
        Ok(executions)
    }
}
