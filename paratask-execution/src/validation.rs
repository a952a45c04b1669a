//! Submission validation
//!
//! Checks the shape of a submission before any worker is spawned for it.
//! The list itself is checked up front; individual entries are checked as
//! they are dispatched, so an invalid entry at index `n` fails the
//! submission after tasks `0..n` have already started.

use crate::error::ExecutionError;
use crate::task::Task;
use paratask_js::{is_invocable, is_valid_identifier};
use serde_json::{Map, Value as JsonValue};

/// Legacy spelling of `logic`
const LOGIC_ALIAS: &str = "fork";
/// Legacy spelling of `scope`, consulted only when `scope` is absent
const SCOPE_ALIAS: &str = "context";

/// Check that a raw submission is a non-empty list and return its entries
pub fn validate_submission(input: &JsonValue) -> Result<&[JsonValue], ExecutionError> {
    match input {
        JsonValue::Array(entries) if !entries.is_empty() => Ok(entries),
        other => Err(ExecutionError::InvalidArgument(format!(
            "1st argument must be a non-empty Array of task objects but was: {}",
            describe(other)
        ))),
    }
}

/// Build a task from one raw submission entry
pub fn task_from_json(index: usize, entry: &JsonValue) -> Result<Task, ExecutionError> {
    let object = match entry {
        JsonValue::Object(object) => object,
        other => {
            return Err(ExecutionError::InvalidArgument(format!(
                "Task with index {} is invalid object: {}",
                index,
                describe(other)
            )))
        }
    };

    let logic = match object.get("logic").or_else(|| object.get(LOGIC_ALIAS)) {
        Some(JsonValue::String(source)) => source.clone(),
        other => return Err(logic_error(index, other)),
    };

    let scope_value = match object.get("scope") {
        Some(JsonValue::Null) | None => object.get(SCOPE_ALIAS),
        present => present,
    };
    let scope = match scope_value {
        None | Some(JsonValue::Null) => Map::new(),
        Some(JsonValue::Object(scope)) => scope.clone(),
        Some(other) => return Err(scope_error(index, Some(other))),
    };

    let task = Task { logic, scope };
    validate_task(index, &task)?;
    Ok(task)
}

/// Check a typed task: invocable logic and identifier-shaped scope keys
pub fn validate_task(index: usize, task: &Task) -> Result<(), ExecutionError> {
    if !is_invocable(&task.logic) {
        return Err(logic_error(
            index,
            Some(&JsonValue::String(task.logic.clone())),
        ));
    }

    if let Some(key) = task.scope.keys().find(|key| !is_valid_identifier(key)) {
        return Err(ExecutionError::InvalidArgument(format!(
            "Task with index {}, \"scope\" key {:?} is not a valid identifier",
            index, key
        )));
    }

    Ok(())
}

fn logic_error(index: usize, found: Option<&JsonValue>) -> ExecutionError {
    ExecutionError::InvalidArgument(format!(
        "Task with index {} must have \"logic\" property as a function but was: {}",
        index,
        found.map(describe).unwrap_or_else(|| "{undefined}".to_string())
    ))
}

fn scope_error(index: usize, found: Option<&JsonValue>) -> ExecutionError {
    ExecutionError::InvalidArgument(format!(
        "Task with index {}, if sent, \"scope\" property must be of type {{object}} but was: {}",
        index,
        found.map(describe).unwrap_or_else(|| "{undefined}".to_string())
    ))
}

/// `{type} value` rendering used in validation messages
fn describe(value: &JsonValue) -> String {
    let kind = match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    };
    format!("{{{}}} {}", kind, value)
}
