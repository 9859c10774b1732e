//! Error types for mcp-engine.
//!
//! [`ConfigError`] covers configuration loading. [`McpError`] covers every
//! failure the protocol engine can report, and knows which JSON-RPC error code
//! it maps to on the wire.

use std::path::PathBuf;
use std::time::Duration;

use serde_json::json;
use thiserror::Error;

use crate::mcp::protocol::{ErrorCode, JsonRpcErrorData};
use crate::mcp::schema::Issue;
use crate::mcp::uri_template::UriTemplateError;

/// Boxed error returned by tool, prompt and resource handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur during configuration operations.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file could not be read.
    #[error("failed to read configuration file: {path}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Configuration file could not be parsed.
    #[error("failed to parse configuration file: {path}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// Configuration file not found.
    #[error("configuration file not found: {path}")]
    NotFound {
        /// Path where the configuration file was expected.
        path: PathBuf,
    },

    /// Configuration validation failed.
    #[error("configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation failure.
        message: String,
    },
}

/// Errors raised by the protocol engine.
#[derive(Error, Debug)]
pub enum McpError {
    /// A tool, prompt or resource is not registered (or is disabled).
    #[error("{kind} {key} not found")]
    NotFound {
        /// What was looked up ("Tool", "Prompt", "Resource").
        kind: &'static str,
        /// The missing name or URI.
        key: String,
    },

    /// Input failed schema validation.
    #[error("Invalid input: {}", join_issues(.issues))]
    Validation {
        /// Every issue reported by the schema, in order.
        issues: Vec<Issue>,
    },

    /// Request parameters did not have the expected shape.
    #[error("Invalid params: {0}")]
    InvalidParams(String),

    /// A pagination cursor could not be decoded.
    #[error("Invalid cursor: {0}")]
    InvalidCursor(String),

    /// The requested protocol version is not a `YYYY-MM-DD` string.
    #[error("Invalid protocol version format: {0}")]
    InvalidProtocolVersion(String),

    /// The requested protocol version is well formed but not supported.
    #[error("Unsupported protocol version: {requested}")]
    UnsupportedProtocolVersion {
        /// The version the client asked for.
        requested: String,
        /// Versions this server accepts.
        supported: Vec<&'static str>,
    },

    /// A server-initiated request needs a client capability that was not negotiated.
    #[error("client did not negotiate the '{capability}' capability")]
    CapabilityNotNegotiated {
        /// Name of the missing client capability.
        capability: &'static str,
    },

    /// The client did not answer a server-initiated request in time.
    #[error("request '{method}' timed out after {timeout:?}")]
    RequestTimeout {
        /// Method of the abandoned request.
        method: String,
        /// Configured timeout.
        timeout: Duration,
    },

    /// The session closed while a server-initiated request was pending.
    #[error("session closed before the client responded")]
    SessionClosed,

    /// The client answered a server-initiated request with an error.
    #[error("client error {}: {}", .0.code, .0.message)]
    Client(JsonRpcErrorData),

    /// A resource template could not be parsed.
    #[error(transparent)]
    InvalidTemplate(#[from] UriTemplateError),

    /// A schema could not be converted by the configured adapter.
    #[error("schema error: {0}")]
    Schema(String),

    /// The engine was constructed with inconsistent options.
    #[error("invalid server configuration: {0}")]
    Config(String),

    /// Any other failure, typically raised by a handler.
    #[error("{0}")]
    Internal(String),
}

fn join_issues(issues: &[Issue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl McpError {
    /// Creates a not-found error.
    pub fn not_found(kind: &'static str, key: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            key: key.into(),
        }
    }

    /// Creates an internal error with the given message.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Converts an error returned by a user handler.
    ///
    /// An `McpError` keeps its own code; anything else becomes an internal
    /// error carrying the original message.
    #[must_use]
    pub fn from_handler(error: BoxError) -> Self {
        match error.downcast::<Self>() {
            Ok(mcp) => *mcp,
            Err(other) => Self::Internal(other.to_string()),
        }
    }

    /// The JSON-RPC error code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound { .. } => ErrorCode::NotFound,
            Self::Validation { .. } => ErrorCode::ValidationFailed,
            Self::InvalidParams(_)
            | Self::InvalidCursor(_)
            | Self::InvalidProtocolVersion(_)
            | Self::UnsupportedProtocolVersion { .. } => ErrorCode::InvalidParams,
            Self::CapabilityNotNegotiated { .. }
            | Self::RequestTimeout { .. }
            | Self::SessionClosed
            | Self::Client(_)
            | Self::Schema(_)
            | Self::InvalidTemplate(_)
            | Self::Config(_)
            | Self::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Builds the JSON-RPC `error` member for this error.
    #[must_use]
    pub fn to_error_data(&self) -> JsonRpcErrorData {
        let data = match self {
            Self::Validation { issues } => Some(json!({ "issues": issues })),
            Self::UnsupportedProtocolVersion { requested, supported } => Some(json!({
                "requested": requested,
                "supported": supported,
            })),
            Self::NotFound { key, .. } => Some(json!({ "key": key })),
            _ => None,
        };

        let error = JsonRpcErrorData::with_message(self.code(), self.to_string());
        match data {
            Some(data) => error.with_data(data),
            None => error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_display() {
        let error = ConfigError::NotFound {
            path: PathBuf::from("/path/to/config.json"),
        };
        let msg = error.to_string();
        assert!(msg.contains("not found"));
        assert!(msg.contains("config.json"));
    }

    #[test]
    fn validation_error_display() {
        let error = ConfigError::ValidationError {
            message: "invalid setting".to_string(),
        };
        let msg = error.to_string();
        assert!(msg.contains("invalid setting"));
    }

    #[test]
    fn not_found_names_the_key() {
        let error = McpError::not_found("Resource", "foo://bar");
        assert_eq!(error.to_string(), "Resource foo://bar not found");
        assert_eq!(error.code(), ErrorCode::NotFound);
        assert_eq!(error.to_error_data().data.unwrap()["key"], "foo://bar");
    }

    #[test]
    fn validation_error_lists_every_issue() {
        let error = McpError::Validation {
            issues: vec![Issue::new("a", "expected number"), Issue::new("b", "required")],
        };
        let data = error.to_error_data();
        assert_eq!(data.code, -32003);
        assert!(data.message.contains("a: expected number"));
        assert!(data.message.contains("b: required"));
        assert_eq!(data.data.unwrap()["issues"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn handler_errors_keep_mcp_codes() {
        let boxed: BoxError = Box::new(McpError::not_found("Tool", "x"));
        assert!(matches!(
            McpError::from_handler(boxed),
            McpError::NotFound { .. }
        ));

        let boxed: BoxError = "disk on fire".into();
        let error = McpError::from_handler(boxed);
        assert_eq!(error.code(), ErrorCode::InternalError);
        assert_eq!(error.to_string(), "disk on fire");
    }
}
