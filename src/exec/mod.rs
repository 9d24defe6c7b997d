// src/exec/mod.rs

//! Data job execution layer.
//!
//! - [`backend`] defines the `DataJobExecutor` trait the orchestrator talks
//!   to; tests replace it with a scripted fake.
//! - [`tracking`] wraps any backend with the per-run job cache, idempotent
//!   starts and staggered status polling.
//! - [`local`] runs each execution as a local process.
//! - [`rest`] drives executions through a control plane's HTTP API.

pub mod backend;
pub mod local;
pub mod rest;
pub mod tracking;

pub use backend::DataJobExecutor;
pub use local::LocalDataJobExecutor;
pub use rest::RestDataJobExecutor;
pub use tracking::TrackingDataJobExecutor;
