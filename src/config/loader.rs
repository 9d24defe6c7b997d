// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::model::{ConfigFile, DagConfig, RawConfigFile};
use crate::errors::{JobdagError, Result};

/// Load a configuration file and return the raw, unvalidated `RawConfigFile`.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let config: RawConfigFile = toml::from_str(&contents)?;

    Ok(config)
}

/// Load a configuration file, apply `JOBDAG_*` environment overrides and
/// validate the result.
///
/// A missing file is not an error: the defaults (plus overrides) are used.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let path = path.as_ref();

    let mut raw = if path.exists() {
        load_from_path(path)?
    } else {
        info!(path = %path.display(), "config file not found; using defaults");
        RawConfigFile::default()
    };

    apply_env_overrides(&mut raw.dag, |key| std::env::var(key).ok())?;

    ConfigFile::try_from(raw)
}

/// Override `[dag]` knobs from `JOBDAG_<KNOB>` variables, looked up through
/// `lookup` so callers (and tests) control the source.
pub fn apply_env_overrides<F>(dag: &mut DagConfig, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    let parse = |key: &str| -> Result<Option<u64>> {
        match lookup(key) {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .map(Some)
                .map_err(|e| JobdagError::ConfigError(format!("{key}={raw:?} is not a number: {e}"))),
        }
    };

    if let Some(v) = parse("JOBDAG_MAX_CONCURRENT_RUNNING_JOBS")? {
        dag.max_concurrent_running_jobs = usize::try_from(v)
            .map_err(|e| JobdagError::ConfigError(format!("max_concurrent_running_jobs: {e}")))?;
    }
    if let Some(v) = parse("JOBDAG_TIME_BETWEEN_STATUS_CHECK_SECONDS")? {
        dag.time_between_status_check_seconds = v;
    }
    if let Some(v) = parse("JOBDAG_DAG_EXECUTION_CHECK_TIME_PERIOD_SECONDS")? {
        dag.dag_execution_check_time_period_seconds = v;
    }
    if let Some(v) = parse("JOBDAG_DELAYED_JOBS_MIN_DELAY_SECONDS")? {
        dag.delayed_jobs_min_delay_seconds = v;
    }
    if let Some(v) = parse("JOBDAG_DELAYED_JOBS_RANDOMIZED_ADDED_DELAY_SECONDS")? {
        dag.delayed_jobs_randomized_added_delay_seconds = v;
    }
    if let Some(v) = parse("JOBDAG_START_RETRIES")? {
        dag.start_retries = u32::try_from(v)
            .map_err(|e| JobdagError::ConfigError(format!("start_retries: {e}")))?;
    }
    if let Some(v) = parse("JOBDAG_START_RETRY_BACKOFF_SECONDS")? {
        dag.start_retry_backoff_seconds = v;
    }

    debug!(?dag, "effective [dag] configuration");
    Ok(())
}

/// Default config location: `jobdag.toml` in the current directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("jobdag.toml")
}
