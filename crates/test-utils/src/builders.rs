#![allow(dead_code)]

use jobdag::config::DagConfig;
use serde_json::{json, Map, Value};

/// Builder for raw job specifications, as they appear in a DAG file.
pub struct JobSpecBuilder {
    job: Map<String, Value>,
}

impl JobSpecBuilder {
    pub fn new(job_name: &str) -> Self {
        let mut job = Map::new();
        job.insert("job_name".to_string(), json!(job_name));
        job.insert("depends_on".to_string(), json!([]));
        Self { job }
    }

    pub fn depends_on(mut self, dep: &str) -> Self {
        if let Some(Value::Array(deps)) = self.job.get_mut("depends_on") {
            deps.push(json!(dep));
        }
        self
    }

    pub fn team(mut self, team_name: &str) -> Self {
        self.job.insert("team_name".to_string(), json!(team_name));
        self
    }

    pub fn fail_dag_on_error(mut self, val: bool) -> Self {
        self.job.insert("fail_dag_on_error".to_string(), json!(val));
        self
    }

    pub fn argument(mut self, key: &str, value: Value) -> Self {
        let args = self
            .job
            .entry("arguments".to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(args) = args {
            args.insert(key.to_string(), value);
        }
        self
    }

    /// Set an arbitrary key, valid or not.
    pub fn raw(mut self, key: &str, value: Value) -> Self {
        self.job.insert(key.to_string(), value);
        self
    }

    pub fn without(mut self, key: &str) -> Self {
        self.job.remove(key);
        self
    }

    pub fn build(self) -> Value {
        Value::Object(self.job)
    }
}

/// Shorthand for a job with the given dependencies.
pub fn job(job_name: &str, deps: &[&str]) -> Value {
    deps.iter()
        .fold(JobSpecBuilder::new(job_name), |b, dep| b.depends_on(dep))
        .build()
}

/// The A → {B, C} → D diamond.
pub fn diamond() -> Vec<Value> {
    vec![
        job("A", &[]),
        job("B", &["A"]),
        job("C", &["A"]),
        job("D", &["B", "C"]),
    ]
}

/// `[dag]` settings without any waiting, so runs finish in milliseconds.
pub fn fast_dag_config() -> DagConfig {
    DagConfig {
        max_concurrent_running_jobs: 15,
        time_between_status_check_seconds: 0,
        dag_execution_check_time_period_seconds: 0,
        delayed_jobs_min_delay_seconds: 0,
        delayed_jobs_randomized_added_delay_seconds: 0,
        start_retries: 3,
        start_retry_backoff_seconds: 0,
    }
}
