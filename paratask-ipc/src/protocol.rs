//! IPC protocol definitions and message types

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::path::PathBuf;

/// IPC protocol version for compatibility checking
pub const IPC_PROTOCOL_VERSION: u32 = 1;

static ERROR_HEAD: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\w+): (.*)$").unwrap());

/// Messages sent from the orchestrator to a worker process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrchestratorMessage {
    /// Run the payload staged at the given path
    ExecutePayload { shared_payload_path: PathBuf },
}

/// The single message a worker sends back
///
/// Serialized as either `{"result": .., "result_kind": ..}` or
/// `{"error": .., "error_kind": ..}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WorkerOutcome {
    Success {
        #[serde(default)]
        result: JsonValue,
        result_kind: ValueKind,
    },
    Failure {
        #[serde(default)]
        error: JsonValue,
        error_kind: ValueKind,
    },
}

impl WorkerOutcome {
    pub fn success(value: TaskValue) -> Self {
        WorkerOutcome::Success {
            result: value.value,
            result_kind: value.kind,
        }
    }

    pub fn failure(value: TaskValue) -> Self {
        WorkerOutcome::Failure {
            error: value.value,
            error_kind: value.kind,
        }
    }

    /// Failure carrying rendered `Name: message` text
    pub fn error(name: &str, message: impl fmt::Display) -> Self {
        Self::failure(TaskValue::error(name, message))
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, WorkerOutcome::Failure { .. })
    }

    /// The transported value, regardless of which side it came from
    pub fn into_value(self) -> TaskValue {
        match self {
            WorkerOutcome::Success {
                result,
                result_kind,
            } => TaskValue::new(result, result_kind),
            WorkerOutcome::Failure { error, error_kind } => TaskValue::new(error, error_kind),
        }
    }
}

/// Exact runtime type tag of a transported value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    Undefined,
    Null,
    Boolean,
    Number,
    String,
    Array,
    Object,
    Error,
    Function,
    Date,
    RegExp,
    Symbol,
    BigInt,
    Promise,
    #[serde(other)]
    Other,
}

impl ValueKind {
    /// Map a runtime tag (as produced by `Object.prototype.toString`) to a kind.
    /// Every `*Error` tag collapses to `Error`.
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "Undefined" => ValueKind::Undefined,
            "Null" => ValueKind::Null,
            "Boolean" => ValueKind::Boolean,
            "Number" => ValueKind::Number,
            "String" => ValueKind::String,
            "Array" => ValueKind::Array,
            "Object" => ValueKind::Object,
            "Function" | "AsyncFunction" | "GeneratorFunction" => ValueKind::Function,
            "Date" => ValueKind::Date,
            "RegExp" => ValueKind::RegExp,
            "Symbol" => ValueKind::Symbol,
            "BigInt" => ValueKind::BigInt,
            "Promise" => ValueKind::Promise,
            t if t.ends_with("Error") => ValueKind::Error,
            _ => ValueKind::Other,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ValueKind::Error)
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// A value reported by a task together with its runtime kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskValue {
    pub value: JsonValue,
    pub kind: ValueKind,
}

impl TaskValue {
    pub fn new(value: JsonValue, kind: ValueKind) -> Self {
        Self { value, kind }
    }

    /// Placeholder for a task that exited without reporting
    pub fn undefined() -> Self {
        Self::new(JsonValue::Null, ValueKind::Undefined)
    }

    /// Error-kind value holding rendered `Name: message` text
    pub fn error(name: &str, message: impl fmt::Display) -> Self {
        Self::new(
            JsonValue::String(format!("{}: {}", name, message)),
            ValueKind::Error,
        )
    }

    pub fn is_error(&self) -> bool {
        self.kind.is_error()
    }

    /// Rebuild an error from rendered diagnostic text
    pub fn as_error(&self) -> Option<RemoteError> {
        if !self.is_error() {
            return None;
        }
        match &self.value {
            JsonValue::String(text) => Some(RemoteError::parse(text)),
            other => Some(RemoteError::parse(&other.to_string())),
        }
    }
}

impl fmt::Display for TaskValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.kind, &self.value) {
            (ValueKind::Undefined, _) => f.write_str("undefined"),
            (_, JsonValue::String(s)) => f.write_str(s),
            (_, other) => write!(f, "{}", other),
        }
    }
}

/// An error raised inside a worker, reconstructed from its rendered text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    pub name: String,
    pub message: String,
    pub stack: Option<String>,
}

impl RemoteError {
    /// Parse `Name: message` from the first line; later lines are kept as the stack
    pub fn parse(text: &str) -> Self {
        let mut lines = text.splitn(2, '\n');
        let head = lines.next().unwrap_or_default();
        let stack = lines
            .next()
            .map(str::trim_end)
            .filter(|s| !s.is_empty())
            .map(|_| text.to_string());

        match ERROR_HEAD.captures(head) {
            Some(caps) => Self {
                name: caps[1].to_string(),
                message: caps[2].to_string(),
                stack,
            },
            None => Self {
                name: "Error".to_string(),
                message: head.to_string(),
                stack,
            },
        }
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

impl std::error::Error for RemoteError {}

/// Message envelope for versioning and metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEnvelope<T> {
    pub protocol_version: u32,
    pub timestamp: DateTime<Utc>,
    pub message: T,
}

impl<T> MessageEnvelope<T> {
    /// Create a new message envelope
    pub fn new(message: T) -> Self {
        Self {
            protocol_version: IPC_PROTOCOL_VERSION,
            timestamp: Utc::now(),
            message,
        }
    }

    /// Check if protocol version is compatible
    pub fn is_compatible(&self) -> bool {
        self.protocol_version == IPC_PROTOCOL_VERSION
    }
}
