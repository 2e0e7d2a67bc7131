use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A JSON schema document.
///
/// `true` (or an empty object) accepts any value, `false` rejects every value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JsonSchema(JsonValue);

impl JsonSchema {
    /// Schema accepting any value.
    pub fn any() -> Self {
        Self(JsonValue::Bool(true))
    }

    /// Schema rejecting every value.
    pub fn nothing() -> Self {
        Self(JsonValue::Bool(false))
    }

    pub fn new(schema: JsonValue) -> Self {
        Self(schema)
    }

    pub fn as_value(&self) -> &JsonValue {
        &self.0
    }

    /// Whether the schema places no constraint at all on values.
    pub fn is_any(&self) -> bool {
        match &self.0 {
            JsonValue::Bool(accept) => *accept,
            JsonValue::Object(keywords) => keywords.is_empty(),
            _ => false,
        }
    }
}

impl Default for JsonSchema {
    fn default() -> Self {
        Self::any()
    }
}

impl From<JsonValue> for JsonSchema {
    fn from(schema: JsonValue) -> Self {
        Self(schema)
    }
}

/// A single validation failure, located by a JSON pointer into the value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// JSON pointer to the offending value; empty for the root.
    pub path: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path = if self.path.is_empty() { "/" } else { &self.path };
        write!(f, "{}: {}", path, self.message)
    }
}

/// Result of validating one value against one schema.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationOutcome {
    pub success: bool,
    /// The value with the schema applied (e.g. defaults injected).
    pub value: JsonValue,
    pub errors: Vec<ValidationIssue>,
}

impl ValidationOutcome {
    pub fn valid(value: JsonValue) -> Self {
        Self {
            success: true,
            value,
            errors: Vec::new(),
        }
    }

    pub fn invalid(value: JsonValue, errors: Vec<ValidationIssue>) -> Self {
        Self {
            success: false,
            value,
            errors,
        }
    }
}

/// The schema validation engine consumed by the scheduler and dispatcher.
///
/// Validation is asynchronous so that implementations can resolve remote
/// references or run asynchronous format checks.
#[async_trait]
pub trait SchemaValidator: Send + Sync {
    async fn validate(&self, schema: &JsonSchema, value: JsonValue) -> ValidationOutcome;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_any_schema_detection() {
        assert!(JsonSchema::any().is_any());
        assert!(JsonSchema::new(json!({})).is_any());
        assert!(!JsonSchema::nothing().is_any());
        assert!(!JsonSchema::new(json!({"type": "number"})).is_any());
    }

    #[test]
    fn test_issue_display_uses_root_marker() {
        assert_eq!(
            ValidationIssue::new("", "must be number").to_string(),
            "/: must be number"
        );
        assert_eq!(
            ValidationIssue::new("/items/0", "must be number").to_string(),
            "/items/0: must be number"
        );
    }

    #[test]
    fn test_schema_deserializes_transparently() {
        let schema: JsonSchema = serde_json::from_value(json!({"type": "string"})).unwrap();
        assert_eq!(schema.as_value(), &json!({"type": "string"}));
    }
}
