#![allow(dead_code)]

pub use jobdag_test_utils::builders::{JobSpecBuilder, diamond, fast_dag_config, job};
pub use jobdag_test_utils::fake_executor::{ExecutorEvent, ScriptedExecutor, StartFailure};
pub use jobdag_test_utils::{init_tracing, with_timeout};

use jobdag::config::DagConfig;
use jobdag::dag::{Dag, DagContext};

pub const DAG_NAME: &str = "parent-dag";
pub const TEAM: &str = "data-team";

/// A DAG run against `executor` (a clone, so the caller keeps a handle).
pub fn dag_with(executor: &ScriptedExecutor, config: &DagConfig) -> Dag<ScriptedExecutor> {
    Dag::new(executor.clone(), config, DagContext::new(DAG_NAME, TEAM))
        .expect("valid DAG config")
}
