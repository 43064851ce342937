//! Contract validation: programmatic and schema-backed.
//!
//! A zero-length result means valid. Both validator kinds run before
//! compression on publish and, optionally, after decompression on consume.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

/// Programmatic validator: arbitrary caller-supplied logic over raw bytes.
pub trait Validator: Send + Sync {
    fn validate(&self, payload: &[u8]) -> Vec<String>;
}

/// Schema-backed validator: payload checked against a named schema.
pub trait SchemaValidator: Send + Sync {
    fn validate_schema(&self, payload: &[u8], schema: &str) -> Vec<String>;
}

/// A closure-backed `Validator`, for registering ad hoc checks without a
/// new type per validator.
pub struct FnValidator<F>(pub F)
where
    F: Fn(&[u8]) -> Vec<String> + Send + Sync;

impl<F> Validator for FnValidator<F>
where
    F: Fn(&[u8]) -> Vec<String> + Send + Sync,
{
    fn validate(&self, payload: &[u8]) -> Vec<String> {
        (self.0)(payload)
    }
}

/// One field requirement in a lightweight JSON shape schema: a required
/// field name and the JSON type it must have.
#[derive(Debug, Clone)]
pub struct FieldRule {
    pub name: String,
    pub expected_type: JsonType,
    pub required: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonType {
    String,
    Number,
    Bool,
    Object,
    Array,
}

impl JsonType {
    fn matches(&self, value: &Value) -> bool {
        match self {
            JsonType::String => value.is_string(),
            JsonType::Number => value.is_number(),
            JsonType::Bool => value.is_boolean(),
            JsonType::Object => value.is_object(),
            JsonType::Array => value.is_array(),
        }
    }
}

/// A named collection of field rules, checked against parsed JSON payloads.
/// Deliberately not a full JSON Schema engine: the specification requires
/// only that a schema reference resolve to a pass/fail-with-reasons check.
#[derive(Debug, Clone, Default)]
pub struct JsonSchema {
    pub fields: Vec<FieldRule>,
}

impl JsonSchema {
    pub fn require(mut self, name: impl Into<String>, expected_type: JsonType) -> Self {
        self.fields.push(FieldRule {
            name: name.into(),
            expected_type,
            required: true,
        });
        self
    }

    pub fn optional(mut self, name: impl Into<String>, expected_type: JsonType) -> Self {
        self.fields.push(FieldRule {
            name: name.into(),
            expected_type,
            required: false,
        });
        self
    }

    fn check(&self, payload: &[u8]) -> Vec<String> {
        let parsed: Value = match serde_json::from_slice(payload) {
            Ok(v) => v,
            Err(e) => return vec![format!("payload is not valid JSON: {e}")],
        };

        let mut errors = Vec::new();
        let Some(obj) = parsed.as_object() else {
            return vec!["payload is not a JSON object".to_string()];
        };

        for rule in &self.fields {
            match obj.get(&rule.name) {
                Some(value) if !rule.expected_type.matches(value) => {
                    errors.push(format!(
                        "field '{}' has wrong type, expected {:?}",
                        rule.name, rule.expected_type
                    ));
                }
                None if rule.required => {
                    errors.push(format!("missing required field '{}'", rule.name));
                }
                _ => {}
            }
        }
        errors
    }
}

/// Default schema-backed validator: a name → `JsonSchema` registry.
#[derive(Clone, Default)]
pub struct JsonSchemaValidator {
    schemas: Arc<HashMap<String, JsonSchema>>,
}

impl JsonSchemaValidator {
    pub fn new(schemas: HashMap<String, JsonSchema>) -> Self {
        Self {
            schemas: Arc::new(schemas),
        }
    }
}

impl SchemaValidator for JsonSchemaValidator {
    fn validate_schema(&self, payload: &[u8], schema: &str) -> Vec<String> {
        match self.schemas.get(schema) {
            Some(s) => s.check(payload),
            None => vec![format!("unknown schema reference '{schema}'")],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_payload_yields_no_errors() {
        let schema = JsonSchema::default()
            .require("id", JsonType::Number)
            .require("amount", JsonType::Number);
        let validator = JsonSchemaValidator::new(HashMap::from([("order.v1".to_string(), schema)]));
        let payload = br#"{"id": 7, "amount": 12.5}"#;
        assert!(validator.validate_schema(payload, "order.v1").is_empty());
    }

    #[test]
    fn missing_field_is_reported() {
        let schema = JsonSchema::default().require("id", JsonType::Number);
        let validator = JsonSchemaValidator::new(HashMap::from([("order.v1".to_string(), schema)]));
        let payload = br#"{"amount": 12.5}"#;
        let errors = validator.validate_schema(payload, "order.v1");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("id"));
    }

    #[test]
    fn unknown_schema_reference_is_an_error() {
        let validator = JsonSchemaValidator::new(HashMap::new());
        let errors = validator.validate_schema(b"{}", "missing.v1");
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn fn_validator_runs_closure() {
        let validator = FnValidator(|bytes: &[u8]| {
            if bytes.is_empty() {
                vec!["payload must not be empty".to_string()]
            } else {
                vec![]
            }
        });
        assert_eq!(validator.validate(b""), vec!["payload must not be empty"]);
        assert!(validator.validate(b"x").is_empty());
    }
}
