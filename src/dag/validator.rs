// src/dag/validator.rs

//! Validation of raw DAG job specifications.
//!
//! Works on `serde_json::Value`s rather than [`crate::types::JobSpec`] so that
//! type mistakes in a submitted DAG surface as precise validation errors
//! instead of generic deserialization failures.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use petgraph::algo::tarjan_scc;
use petgraph::graphmap::DiGraphMap;
use serde_json::{Map, Value};
use tracing::debug;

use crate::errors::{DagValidationError, ValidationErrorKind};
use crate::types::JobName;

const ALLOWED_KEYS: [&str; 5] = [
    "job_name",
    "team_name",
    "fail_dag_on_error",
    "depends_on",
    "arguments",
];
const REQUIRED_KEYS: [&str; 2] = ["job_name", "depends_on"];

const FIX_DAG: &str = "Fix the DAG definition and submit it again.";

/// Validate a DAG given as a list of job specifications.
///
/// Checks run in a fixed order and the first violation is returned:
/// 1. duplicate job names
/// 2. per-job shape and field types
/// 3. dependencies that reference unknown jobs
/// 4. cycles
pub fn validate(jobs: &[Value]) -> Result<(), DagValidationError> {
    validate_no_duplicates(jobs)?;
    for (index, job) in jobs.iter().enumerate() {
        validate_job(index, job)?;
    }
    validate_dependencies_exist(jobs)?;
    validate_no_cycles(jobs)?;

    debug!(jobs = jobs.len(), "DAG validated");
    Ok(())
}

fn job_name_of(job: &Value) -> Option<&str> {
    job.get("job_name").and_then(Value::as_str)
}

/// Name used in error messages; falls back to the job's position.
fn job_label(index: usize, job: &Value) -> String {
    job_name_of(job)
        .map(str::to_string)
        .unwrap_or_else(|| format!("<job #{index}>"))
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

fn validate_no_duplicates(jobs: &[Value]) -> Result<(), DagValidationError> {
    let mut seen = HashSet::new();
    let mut duplicates = BTreeSet::new();

    for name in jobs.iter().filter_map(job_name_of) {
        if !seen.insert(name) {
            duplicates.insert(name.to_string());
        }
    }

    if duplicates.is_empty() {
        return Ok(());
    }

    let names: Vec<JobName> = duplicates.into_iter().collect();
    Err(DagValidationError::new(
        ValidationErrorKind::Conflict,
        format!("job name(s) {} appear more than once", names.join(", ")),
        "Make every job_name in the DAG unique by removing the duplicated entries.",
        names,
    ))
}

fn validate_job(index: usize, job: &Value) -> Result<(), DagValidationError> {
    let label = job_label(index, job);

    let Some(obj) = job.as_object() else {
        return Err(type_error(
            &label,
            format!(
                "job #{index} is {}, expected an object",
                json_type_name(job)
            ),
        ));
    };

    let unknown: Vec<&str> = obj
        .keys()
        .map(String::as_str)
        .filter(|k| !ALLOWED_KEYS.contains(k))
        .collect();
    if !unknown.is_empty() {
        return Err(DagValidationError::new(
            ValidationErrorKind::Permission,
            format!(
                "job '{label}' contains unsupported key(s) {}",
                unknown.join(", ")
            ),
            format!(
                "Remove the unsupported keys; allowed keys are {}.",
                ALLOWED_KEYS.join(", ")
            ),
            vec![label],
        ));
    }

    let missing: Vec<&str> = REQUIRED_KEYS
        .iter()
        .copied()
        .filter(|k| !obj.contains_key(*k))
        .collect();
    if !missing.is_empty() {
        return Err(DagValidationError::new(
            ValidationErrorKind::Requirement,
            format!("job '{label}' is missing required key(s) {}", missing.join(", ")),
            format!("Add the keys {} to the job.", REQUIRED_KEYS.join(", ")),
            vec![label],
        ));
    }

    validate_field_types(&label, obj)
}

fn validate_field_types(label: &str, obj: &Map<String, Value>) -> Result<(), DagValidationError> {
    if let Some(value) = obj.get("job_name") {
        if !value.is_string() {
            return Err(type_error(
                label,
                format!("job_name is {}, expected a string", json_type_name(value)),
            ));
        }
    }

    if let Some(value) = obj.get("depends_on") {
        let is_list_of_strings = value
            .as_array()
            .is_some_and(|deps| deps.iter().all(Value::is_string));
        if !is_list_of_strings {
            return Err(type_error(
                label,
                format!(
                    "depends_on of job '{label}' is {}, expected a list of job names",
                    json_type_name(value)
                ),
            ));
        }
    }

    if let Some(value) = obj.get("team_name") {
        if !value.is_string() {
            return Err(type_error(
                label,
                format!("team_name of job '{label}' is {}, expected a string", json_type_name(value)),
            ));
        }
    }

    if let Some(value) = obj.get("fail_dag_on_error") {
        if !value.is_boolean() {
            return Err(type_error(
                label,
                format!(
                    "fail_dag_on_error of job '{label}' is {}, expected a boolean",
                    json_type_name(value)
                ),
            ));
        }
    }

    if let Some(value) = obj.get("arguments") {
        if !value.is_object() {
            return Err(type_error(
                label,
                format!(
                    "arguments of job '{label}' is {}, expected a JSON object",
                    json_type_name(value)
                ),
            ));
        }
    }

    Ok(())
}

fn type_error(label: &str, message: String) -> DagValidationError {
    DagValidationError::new(
        ValidationErrorKind::Type,
        message,
        FIX_DAG,
        vec![label.to_string()],
    )
}

/// `job_name -> depends_on` for jobs that already passed the shape checks.
fn dependency_map(jobs: &[Value]) -> BTreeMap<&str, Vec<&str>> {
    jobs.iter()
        .filter_map(|job| {
            let name = job_name_of(job)?;
            let deps = job
                .get("depends_on")
                .and_then(Value::as_array)
                .map(|deps| deps.iter().filter_map(Value::as_str).collect())
                .unwrap_or_default();
            Some((name, deps))
        })
        .collect()
}

fn validate_dependencies_exist(jobs: &[Value]) -> Result<(), DagValidationError> {
    let deps = dependency_map(jobs);

    for (name, job_deps) in deps.iter() {
        let unknown: Vec<&str> = job_deps
            .iter()
            .copied()
            .filter(|dep| !deps.contains_key(dep))
            .collect();
        if !unknown.is_empty() {
            return Err(DagValidationError::new(
                ValidationErrorKind::Requirement,
                format!(
                    "job '{name}' depends on job(s) {} which are not part of the DAG",
                    unknown.join(", ")
                ),
                "Add the missing jobs to the DAG or remove them from depends_on.",
                vec![name.to_string()],
            ));
        }
    }

    Ok(())
}

fn validate_no_cycles(jobs: &[Value]) -> Result<(), DagValidationError> {
    let deps = dependency_map(jobs);

    // Edge direction: dependency -> dependent.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
    for name in deps.keys() {
        graph.add_node(*name);
    }
    for (name, job_deps) in deps.iter() {
        for dep in job_deps {
            graph.add_edge(*dep, *name, ());
        }
    }

    let cycle = tarjan_scc(&graph).into_iter().find(|component| match component.as_slice() {
        [single] => graph.contains_edge(*single, *single),
        _ => true,
    });

    match cycle {
        None => Ok(()),
        Some(members) => {
            let mut names: Vec<JobName> = members.iter().map(|s| s.to_string()).collect();
            names.sort();
            Err(DagValidationError::new(
                ValidationErrorKind::Conflict,
                format!("cycle detected between jobs {}", names.join(" <-> ")),
                "Remove one of the depends_on entries that close the cycle so the jobs form a DAG.",
                names,
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn job_label_falls_back_to_position() {
        assert_eq!(job_label(3, &json!({"depends_on": []})), "<job #3>");
        assert_eq!(job_label(0, &json!({"job_name": "a"})), "a");
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let jobs = vec![json!({"job_name": "a", "depends_on": ["a"]})];
        let err = validate(&jobs).unwrap_err();
        assert_eq!(err.kind, ValidationErrorKind::Conflict);
        assert_eq!(err.offending_job_names, vec!["a".to_string()]);
    }

    #[test]
    fn empty_dag_is_valid() {
        assert!(validate(&[]).is_ok());
    }
}
