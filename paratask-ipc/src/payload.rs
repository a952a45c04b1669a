//! Payload codec
//!
//! A payload is the transferable form of a task: the logic's source text and
//! its scope mapping. It travels through the shared payload store as pretty
//! printed JSON.

use crate::error::IpcError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    /// Source text of the task logic, verbatim
    pub logic_source: String,

    /// Names injected into the logic's environment
    #[serde(default)]
    pub scope: Map<String, JsonValue>,

    /// Directory `require()` resolves relative specifiers against
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module_root: Option<PathBuf>,
}

impl Payload {
    pub fn new(logic_source: impl Into<String>, scope: Map<String, JsonValue>) -> Self {
        Self {
            logic_source: logic_source.into(),
            scope,
            module_root: None,
        }
    }

    pub fn with_module_root(mut self, module_root: Option<PathBuf>) -> Self {
        self.module_root = module_root;
        self
    }

    /// Encode to the on-disk representation
    pub fn encode(&self) -> Result<Vec<u8>, IpcError> {
        serde_json::to_vec_pretty(self).map_err(|e| IpcError::SerializationError(e.to_string()))
    }

    /// Decode from the on-disk representation
    pub fn decode(bytes: &[u8]) -> Result<Self, IpcError> {
        serde_json::from_slice(bytes).map_err(|e| IpcError::PayloadCorrupt(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_encode_is_human_readable() {
        let mut scope = Map::new();
        scope.insert("count".to_string(), json!(10));
        let payload = Payload::new("function (resolve) { resolve(count); }", scope);

        let text = String::from_utf8(payload.encode().unwrap()).unwrap();
        assert!(text.contains("\n  \"logic_source\""));
        assert!(text.contains("\"count\": 10"));
        assert!(!text.contains("module_root"));

        assert_eq!(Payload::decode(text.as_bytes()).unwrap(), payload);
    }

    #[test]
    fn test_decode_missing_scope_defaults_to_empty() {
        let payload = Payload::decode(br#"{"logic_source": "resolve => resolve(1)"}"#).unwrap();
        assert!(payload.scope.is_empty());
        assert!(payload.module_root.is_none());
    }

    #[test]
    fn test_decode_corrupt() {
        let err = Payload::decode(b"{\"logic_source\": ").unwrap_err();
        assert!(matches!(err, IpcError::PayloadCorrupt(_)));

        let err = Payload::decode(br#"{"scope": {}}"#).unwrap_err();
        assert!(matches!(err, IpcError::PayloadCorrupt(_)));
    }
}
