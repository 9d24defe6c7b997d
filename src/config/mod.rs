// src/config/mod.rs

//! Configuration loading and validation for jobdag.
//!
//! - [`model`] defines the TOML-backed data model.
//! - [`loader`] reads a config file and applies environment overrides.
//! - [`validate`] turns a `RawConfigFile` into a checked `ConfigFile`.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{apply_env_overrides, default_config_path, load_and_validate, load_from_path};
pub use model::{
    ConfigFile, DagConfig, ExecutorKind, ExecutorSection, LocalExecutorConfig, RawConfigFile,
    RestExecutorConfig,
};
pub use validate::validate_dag_config;
