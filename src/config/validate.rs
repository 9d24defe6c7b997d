// src/config/validate.rs

use crate::config::model::{ConfigFile, DagConfig, ExecutorKind, RawConfigFile};
use crate::errors::{JobdagError, Result};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = JobdagError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw.dag, raw.executor))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    validate_dag_config(&cfg.dag)?;
    validate_executor(cfg)?;
    Ok(())
}

/// Check the `[dag]` knobs. Also used for configs built in code.
pub fn validate_dag_config(dag: &DagConfig) -> Result<()> {
    if dag.max_concurrent_running_jobs == 0 {
        return Err(JobdagError::ConfigError(
            "[dag].max_concurrent_running_jobs must be >= 1 (got 0)".to_string(),
        ));
    }

    if dag.start_retries == 0 {
        return Err(JobdagError::ConfigError(
            "[dag].start_retries must be >= 1 (got 0)".to_string(),
        ));
    }

    Ok(())
}

fn validate_executor(cfg: &RawConfigFile) -> Result<()> {
    match cfg.executor.kind {
        ExecutorKind::Rest => {
            if cfg.executor.rest.base_url.trim().is_empty() {
                return Err(JobdagError::ConfigError(
                    "[executor.rest].base_url must not be empty when kind = \"rest\"".to_string(),
                ));
            }
            if cfg.executor.rest.deployment_id.trim().is_empty() {
                return Err(JobdagError::ConfigError(
                    "[executor.rest].deployment_id must not be empty".to_string(),
                ));
            }
        }
        ExecutorKind::Local => {
            if cfg.executor.local.program.trim().is_empty() {
                return Err(JobdagError::ConfigError(
                    "[executor.local].program must not be empty".to_string(),
                ));
            }
        }
    }
    Ok(())
}
