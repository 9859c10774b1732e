//! Schema validation and JSON Schema conversion.
//!
//! The engine never interprets schemas itself. Every tool, prompt and
//! elicitation schema is a [`Schema`] object that can validate input, and a
//! [`SchemaAdapter`] turns it into the JSON Schema document advertised to
//! clients. Swapping the adapter swaps the schema library.
//!
//! [`JsonSchema`] and [`JsonSchemaAdapter`] are the built-in pair: the schema
//! *is* a JSON Schema document, compiled once with the `jsonschema` crate.
//! Top-level `default` values are filled in before validation.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use jsonschema::error::ValidationErrorKind;
use jsonschema::{JSONSchema, ValidationError};
use serde::Serialize;
use serde_json::Value;

use crate::error::McpError;

/// A single validation problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Issue {
    /// Location of the offending value, as property names / array indices.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub path: Vec<String>,
    /// Human-readable description.
    pub message: String,
}

impl Issue {
    /// Creates an issue at a dotted path (empty for the root).
    pub fn new(path: &str, message: impl Into<String>) -> Self {
        Self {
            path: path
                .split('.')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            message: message.into(),
        }
    }

}

impl From<ValidationError<'_>> for Issue {
    fn from(error: ValidationError<'_>) -> Self {
        let message = error.to_string();
        let mut path = error.instance_path.into_vec();
        match error.kind {
            ValidationErrorKind::Required { property } => {
                if let Some(name) = property.as_str() {
                    path.push(name.to_string());
                }
            }
            ValidationErrorKind::AdditionalProperties { unexpected } if unexpected.len() == 1 => {
                path.extend(unexpected);
            }
            _ => {}
        }
        Self { path, message }
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.path.join("."), self.message)
        }
    }
}

/// Outcome of validating input against a schema.
#[derive(Debug, Clone, PartialEq)]
pub enum Validation {
    /// Input is acceptable; carries the (possibly normalised) value.
    Valid(Value),
    /// Input was rejected; carries every issue found.
    Invalid(Vec<Issue>),
}

impl Validation {
    /// Converts into a `Result`, aggregating issues into one error.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::Validation`] when the input was rejected.
    pub fn into_result(self) -> Result<Value, McpError> {
        match self {
            Self::Valid(value) => Ok(value),
            Self::Invalid(issues) => Err(McpError::Validation { issues }),
        }
    }
}

/// An input schema that can validate values.
#[async_trait]
pub trait Schema: Send + Sync + 'static {
    /// Validates `input`, returning the accepted value or all issues.
    async fn validate(&self, input: &Value) -> Validation;

    /// Exposes the concrete type so adapters can downcast.
    fn as_any(&self) -> &dyn Any;
}

/// Converts schemas into JSON Schema documents.
#[async_trait]
pub trait SchemaAdapter: Send + Sync + 'static {
    /// Produces the JSON Schema document describing `schema`.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::Schema`] if the schema type is not supported.
    async fn to_json_schema(&self, schema: &dyn Schema) -> Result<Value, McpError>;
}

/// A schema expressed directly as a JSON Schema document.
///
/// The document is compiled when the schema is created. A document that does
/// not compile rejects every input with a single issue naming the problem.
#[derive(Clone)]
pub struct JsonSchema {
    document: Value,
    compiled: Result<Arc<JSONSchema>, String>,
}

impl fmt::Debug for JsonSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonSchema")
            .field("document", &self.document)
            .field("compiled", &self.compiled.is_ok())
            .finish()
    }
}

impl JsonSchema {
    /// Wraps and compiles a JSON Schema document.
    #[must_use]
    pub fn new(document: Value) -> Self {
        let compiled = JSONSchema::compile(&document)
            .map(Arc::new)
            .map_err(|e| e.to_string());
        if let Err(ref e) = compiled {
            tracing::warn!(error = %e, "JSON Schema failed to compile");
        }
        Self { document, compiled }
    }

    /// Wraps a document, failing if it is not a valid JSON Schema.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::Schema`] if the document does not compile.
    pub fn try_new(document: Value) -> Result<Self, McpError> {
        let schema = Self::new(document);
        match schema.compiled {
            Ok(_) => Ok(schema),
            Err(e) => Err(McpError::Schema(format!("Invalid JSON Schema: {e}"))),
        }
    }

    /// The wrapped document.
    #[must_use]
    pub const fn document(&self) -> &Value {
        &self.document
    }

    /// Copies top-level property defaults into an object input.
    fn with_defaults(&self, input: &Value) -> Value {
        let (Some(properties), Value::Object(object)) =
            (self.document.get("properties").and_then(Value::as_object), input)
        else {
            return input.clone();
        };

        let mut filled = object.clone();
        for (name, property) in properties {
            if let Some(default) = property.get("default") {
                filled
                    .entry(name.clone())
                    .or_insert_with(|| default.clone());
            }
        }
        Value::Object(filled)
    }
}

#[async_trait]
impl Schema for JsonSchema {
    async fn validate(&self, input: &Value) -> Validation {
        let compiled = match &self.compiled {
            Ok(compiled) => compiled,
            Err(e) => return Validation::Invalid(vec![Issue::new("", format!("invalid schema: {e}"))]),
        };

        let value = self.with_defaults(input);
        let issues: Vec<Issue> = match compiled.validate(&value) {
            Ok(()) => Vec::new(),
            Err(errors) => errors.map(Issue::from).collect(),
        };
        if issues.is_empty() {
            Validation::Valid(value)
        } else {
            Validation::Invalid(issues)
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Adapter for [`JsonSchema`]: the document is already JSON Schema.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSchemaAdapter;

#[async_trait]
impl SchemaAdapter for JsonSchemaAdapter {
    async fn to_json_schema(&self, schema: &dyn Schema) -> Result<Value, McpError> {
        schema
            .as_any()
            .downcast_ref::<JsonSchema>()
            .map(|schema| schema.document().clone())
            .ok_or_else(|| McpError::Schema("JsonSchemaAdapter only converts JsonSchema".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn add_schema() -> JsonSchema {
        JsonSchema::new(json!({
            "type": "object",
            "properties": {
                "a": { "type": "number" },
                "b": { "type": "number" }
            },
            "required": ["a", "b"]
        }))
    }

    #[tokio::test]
    async fn accepts_valid_input() {
        let outcome = add_schema().validate(&json!({"a": 2, "b": 3})).await;
        assert_eq!(outcome, Validation::Valid(json!({"a": 2, "b": 3})));
    }

    fn paths(issues: &[Issue]) -> Vec<String> {
        let mut paths: Vec<String> = issues.iter().map(|i| i.path.join(".")).collect();
        paths.sort();
        paths
    }

    #[tokio::test]
    async fn reports_every_issue() {
        let Validation::Invalid(issues) = add_schema().validate(&json!({"a": "x"})).await else {
            panic!("expected issues");
        };
        assert_eq!(paths(&issues), vec!["a", "b"]);
        assert!(issues.iter().all(|i| !i.message.is_empty()));
    }

    #[tokio::test]
    async fn fills_defaults() {
        let schema = JsonSchema::new(json!({
            "type": "object",
            "properties": { "unit": { "type": "string", "default": "mm" } },
            "required": ["unit"]
        }));
        let outcome = schema.validate(&json!({})).await;
        assert_eq!(outcome, Validation::Valid(json!({"unit": "mm"})));

        let outcome = schema.validate(&json!({"unit": "in"})).await;
        assert_eq!(outcome, Validation::Valid(json!({"unit": "in"})));
    }

    #[tokio::test]
    async fn checks_nested_arrays_and_bounds() {
        let schema = JsonSchema::new(json!({
            "type": "object",
            "properties": {
                "tags": { "type": "array", "items": { "type": "string", "maxLength": 3 } },
                "count": { "type": "integer", "minimum": 1 }
            },
            "additionalProperties": false
        }));
        let Validation::Invalid(issues) = schema
            .validate(&json!({"tags": ["ok", "toolong"], "count": 0, "extra": true}))
            .await
        else {
            panic!("expected issues");
        };
        assert_eq!(paths(&issues), vec!["count", "extra", "tags.1"]);
    }

    #[tokio::test]
    async fn enforces_full_keyword_set() {
        let schema = JsonSchema::new(json!({
            "type": "object",
            "properties": {
                "code": { "type": "string", "pattern": "^[A-Z]{3}$" },
                "mode": { "const": "fast" },
                "ids": { "type": "array", "minItems": 1 },
                "n": { "type": "integer", "multipleOf": 2 },
                "pick": { "oneOf": [{ "type": "string" }, { "type": "number" }] }
            }
        }));

        let Validation::Invalid(issues) = schema
            .validate(&json!({"code": "lower", "mode": "slow", "ids": [], "n": 3, "pick": true}))
            .await
        else {
            panic!("expected issues");
        };
        assert_eq!(paths(&issues), vec!["code", "ids", "mode", "n", "pick"]);

        let valid = json!({"code": "ABC", "mode": "fast", "ids": [1], "n": 4, "pick": 1});
        assert_eq!(schema.validate(&valid).await, Validation::Valid(valid.clone()));
    }

    #[tokio::test]
    async fn resolves_local_refs() {
        let schema = JsonSchema::new(json!({
            "type": "object",
            "definitions": { "id": { "type": "string", "minLength": 2 } },
            "properties": { "id": { "$ref": "#/definitions/id" } }
        }));
        assert!(matches!(schema.validate(&json!({"id": "x"})).await, Validation::Invalid(_)));
        assert!(matches!(schema.validate(&json!({"id": "xy"})).await, Validation::Valid(_)));
    }

    #[tokio::test]
    async fn uncompilable_schema_rejects_everything() {
        let document = json!({"type": 12});
        assert!(matches!(JsonSchema::try_new(document.clone()), Err(McpError::Schema(_))));

        let Validation::Invalid(issues) = JsonSchema::new(document).validate(&json!({})).await else {
            panic!("expected issues");
        };
        assert_eq!(issues.len(), 1);
        assert!(issues[0].path.is_empty());
    }

    #[tokio::test]
    async fn adapter_returns_document() {
        let schema = add_schema();
        let document = JsonSchemaAdapter.to_json_schema(&schema).await.unwrap();
        assert_eq!(document["required"], json!(["a", "b"]));
    }

    #[tokio::test]
    async fn adapter_rejects_foreign_schemas() {
        struct Anything;

        #[async_trait]
        impl Schema for Anything {
            async fn validate(&self, input: &Value) -> Validation {
                Validation::Valid(input.clone())
            }

            fn as_any(&self) -> &dyn Any {
                self
            }
        }

        let err = JsonSchemaAdapter.to_json_schema(&Anything).await.unwrap_err();
        assert!(matches!(err, McpError::Schema(_)));
    }
}
