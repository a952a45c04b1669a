//! Task definition

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// A unit of work: JavaScript logic source plus the data injected into it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Source text of a function taking up to two callbacks,
    /// e.g. `function (resolve, reject) { ... }`
    pub logic: String,

    /// Plain data bound by name inside the logic
    #[serde(default)]
    pub scope: Map<String, JsonValue>,
}

impl Task {
    pub fn new(logic: impl Into<String>) -> Self {
        Self {
            logic: logic.into(),
            scope: Map::new(),
        }
    }

    pub fn with_scope(mut self, scope: Map<String, JsonValue>) -> Self {
        self.scope = scope;
        self
    }

    /// Add a single scope entry
    pub fn with_value(mut self, name: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.scope.insert(name.into(), value.into());
        self
    }
}
