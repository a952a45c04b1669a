//! Conversions between Rust data and the worker's JavaScript context

use crate::params::is_valid_identifier;
use crate::JsExecutionError;
use boa_engine::{property::PropertyKey, Context, JsResult, JsString, JsValue};
use paratask_ipc::{TaskValue, ValueKind, WorkerOutcome};
use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};

/// Outcome as recorded by the prelude
#[derive(Debug, Deserialize)]
struct RecordedOutcome {
    failure: bool,
    kind: String,
    #[serde(default)]
    encoded: Option<String>,
}

/// `var` declarations binding every scope entry inside the logic wrapper
pub fn scope_declarations(scope: &Map<String, JsonValue>) -> Result<String, JsExecutionError> {
    let mut declarations = String::new();
    for (key, value) in scope {
        if !is_valid_identifier(key) {
            return Err(JsExecutionError::InvalidScopeKey(key.clone()));
        }
        let literal = serde_json::to_string(value)
            .map_err(|e| JsExecutionError::OutputError(e.to_string()))?;
        declarations.push_str(&format!("var {} = {};\n", key, literal));
    }
    Ok(declarations)
}

/// JavaScript string literal for arbitrary text
pub fn string_literal(text: &str) -> String {
    JsonValue::String(text.to_string()).to_string()
}

/// Parse the prelude's JSON record into a wire outcome
pub fn read_outcome(json: &str) -> Result<WorkerOutcome, JsExecutionError> {
    let recorded: RecordedOutcome =
        serde_json::from_str(json).map_err(|e| JsExecutionError::OutputError(e.to_string()))?;

    let value = match recorded.encoded {
        Some(encoded) => serde_json::from_str(&encoded)
            .map_err(|e| JsExecutionError::OutputError(e.to_string()))?,
        None => JsonValue::Null,
    };
    let value = TaskValue::new(value, ValueKind::from_tag(&recorded.kind));

    Ok(if recorded.failure {
        WorkerOutcome::failure(value)
    } else {
        WorkerOutcome::success(value)
    })
}

/// Store a value on the global object
pub fn set_global(context: &mut Context, name: &str, value: JsValue) -> JsResult<()> {
    context.global_object().set(
        PropertyKey::from(JsString::from(name)),
        value,
        true,
        context,
    )?;
    Ok(())
}

/// Read an argument as a Rust string; missing arguments read as empty
pub fn arg_string(args: &[JsValue], index: usize, context: &mut Context) -> JsResult<String> {
    match args.get(index) {
        Some(value) => Ok(value.to_string(context)?.to_std_string_escaped()),
        None => Ok(String::new()),
    }
}

pub fn js_str(text: &str) -> JsValue {
    JsValue::from(JsString::from(text))
}
