// src/dag/mod.rs

//! DAG validation and execution.
//!
//! - [`validator`] checks raw job specifications before anything runs.
//! - [`sorter`] hands out jobs in dependency order.
//! - [`delay_queue`] holds starts that must wait and retry later.
//! - [`trackable_job`] is the per-run state of a single job.
//! - [`orchestrator`] drives a whole DAG run.

pub mod delay_queue;
pub mod orchestrator;
pub mod sorter;
pub mod trackable_job;
pub mod validator;

pub use delay_queue::DelayQueue;
pub use orchestrator::{Dag, DagContext, DagRunSummary};
pub use sorter::{SorterError, TopologicalSorter};
pub use trackable_job::{JobRunSummary, TrackableJob};
pub use validator::validate;
