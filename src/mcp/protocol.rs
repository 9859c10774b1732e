//! JSON-RPC 2.0 envelopes as used by MCP.
//!
//! Traffic flows both ways. The client sends requests and notifications, and
//! answers the requests the engine itself issues (sampling, elicitation,
//! roots). [`IncomingMessage::from_value`] sorts a decoded value into one of
//! those three shapes or produces the error response to send back.
//!
//! Request ids are strings or integers, never `null`. The engine only issues
//! integer ids, counted per session.
//!
//! # Error Codes
//!
//! Besides the reserved JSON-RPC codes, the engine uses a small stable domain range:
//!
//! | code     | meaning                                        |
//! |----------|------------------------------------------------|
//! | `-32002` | tool, prompt or resource not found             |
//! | `-32003` | input failed schema validation                 |

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The JSON-RPC version string carried by every message.
pub const JSONRPC_VERSION: &str = "2.0";

/// MCP protocol versions this engine accepts, newest first.
pub const SUPPORTED_PROTOCOL_VERSIONS: [&str; 3] = ["2025-06-18", "2025-03-26", "2024-11-05"];

/// The newest supported protocol version.
pub const LATEST_PROTOCOL_VERSION: &str = SUPPORTED_PROTOCOL_VERSIONS[0];

/// A request id: an integer or a string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Integer id; the only kind the engine issues.
    Number(i64),
    /// String id.
    String(String),
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => f.write_str(s),
        }
    }
}

/// A request, inbound from the client or outbound from the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Always "2.0".
    pub jsonrpc: String,
    /// Correlates the response.
    pub id: RequestId,
    /// Method name.
    pub method: String,
    /// Method parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Creates an outgoing request.
    #[must_use]
    pub fn new(id: RequestId, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

/// A message that expects no answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    /// Always "2.0".
    pub jsonrpc: String,
    /// Notification name.
    pub method: String,
    /// Notification payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    /// Creates an outgoing notification.
    #[must_use]
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }
}

/// A successful response to a client request.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcResponse {
    /// Always "2.0".
    pub jsonrpc: &'static str,
    /// Id of the request being answered.
    pub id: RequestId,
    /// Method result.
    pub result: Value,
}

impl JsonRpcResponse {
    /// Creates a success response.
    #[must_use]
    #[allow(clippy::missing_const_for_fn)] // Value is not const-compatible
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result,
        }
    }
}

/// Error codes the engine can put on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// The input was not JSON.
    ParseError,
    /// The JSON was not a JSON-RPC message.
    InvalidRequest,
    /// Unknown method, or one whose capability was not declared.
    MethodNotFound,
    /// Params had the wrong shape, or a cursor or protocol version was rejected.
    InvalidParams,
    /// Anything that went wrong inside the engine or a handler.
    InternalError,
    /// A named tool, prompt or resource does not exist.
    NotFound,
    /// Input did not satisfy the registered schema.
    ValidationFailed,
}

impl ErrorCode {
    /// The numeric code.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::InternalError => -32603,
            Self::NotFound => -32002,
            Self::ValidationFailed => -32003,
        }
    }

    /// Message used when nothing more specific is known.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::ParseError => "Parse error",
            Self::InvalidRequest => "Invalid Request",
            Self::MethodNotFound => "Method not found",
            Self::InvalidParams => "Invalid params",
            Self::InternalError => "Internal error",
            Self::NotFound => "Not found",
            Self::ValidationFailed => "Validation failed",
        }
    }
}

/// The `error` member of an error response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcErrorData {
    /// Numeric code.
    pub code: i32,
    /// Short description.
    pub message: String,
    /// Structured details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcErrorData {
    /// Creates an error with a custom message.
    #[must_use]
    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.code(),
            message: message.into(),
            data: None,
        }
    }

    /// Attaches structured details.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

impl From<ErrorCode> for JsonRpcErrorData {
    fn from(code: ErrorCode) -> Self {
        Self::with_message(code, code.message())
    }
}

/// An error response.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcError {
    /// Always "2.0".
    pub jsonrpc: &'static str,
    /// Id of the failed request; `null` when it could not be read.
    pub id: Option<RequestId>,
    /// What went wrong.
    pub error: JsonRpcErrorData,
}

impl JsonRpcError {
    /// Creates an error response.
    #[must_use]
    #[allow(clippy::missing_const_for_fn)] // JsonRpcErrorData contains String
    pub fn new(id: Option<RequestId>, error: JsonRpcErrorData) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            error,
        }
    }

    /// The input could not be decoded as JSON.
    #[must_use]
    pub fn parse_error() -> Self {
        Self::new(None, ErrorCode::ParseError.into())
    }

    /// The input was JSON but not a JSON-RPC message.
    #[must_use]
    pub fn invalid_request(id: Option<RequestId>) -> Self {
        Self::new(id, ErrorCode::InvalidRequest.into())
    }

    /// No dispatchable method has this name.
    #[must_use]
    pub fn method_not_found(id: RequestId, method: &str) -> Self {
        Self::new(
            Some(id),
            JsonRpcErrorData::with_message(ErrorCode::MethodNotFound, format!("Method not found: {method}")),
        )
    }
}

/// The client's answer to a request the engine issued.
#[derive(Debug, Clone)]
pub struct IncomingResponse {
    /// Id of the engine request being answered.
    pub id: RequestId,
    /// The `result` member, or the `error` member when the client failed.
    pub outcome: Result<Value, JsonRpcErrorData>,
}

/// A decoded inbound message.
#[derive(Debug, Clone)]
pub enum IncomingMessage {
    /// Needs a response.
    Request(JsonRpcRequest),
    /// Needs nothing back.
    Notification(JsonRpcNotification),
    /// Settles one of the engine's own requests.
    Response(IncomingResponse),
}

impl IncomingMessage {
    /// Classifies a decoded JSON value.
    ///
    /// A message with `method` is a request when it also has `id`, else a
    /// notification. A message without `method` must be a response carrying
    /// an `id` and exactly one of `result` or `error`.
    ///
    /// # Errors
    ///
    /// Returns the invalid-request response to send back, carrying the
    /// message's id when one could be read.
    pub fn from_value(value: Value) -> Result<Self, JsonRpcError> {
        let Value::Object(obj) = value else {
            return Err(JsonRpcError::invalid_request(None));
        };

        let id = obj.get("id").and_then(|id| RequestId::deserialize(id).ok());

        if obj.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
            return Err(JsonRpcError::invalid_request(id));
        }

        let Some(method) = obj.get("method") else {
            return Self::response_from(&obj, id);
        };
        if method.as_str().is_some_and(str::is_empty) {
            return Err(JsonRpcError::invalid_request(id));
        }

        let has_id = obj.contains_key("id");
        let message = Value::Object(obj);
        let decoded = if has_id {
            serde_json::from_value(message).map(Self::Request)
        } else {
            serde_json::from_value(message).map(Self::Notification)
        };
        decoded.map_err(|_| JsonRpcError::invalid_request(id))
    }

    fn response_from(obj: &Map<String, Value>, id: Option<RequestId>) -> Result<Self, JsonRpcError> {
        let Some(id) = id else {
            return Err(JsonRpcError::invalid_request(None));
        };

        let outcome = match (obj.get("result"), obj.get("error")) {
            (Some(result), None) => Ok(result.clone()),
            (None, Some(error)) => Err(JsonRpcErrorData::deserialize(error)
                .map_err(|_| JsonRpcError::invalid_request(Some(id.clone())))?),
            _ => return Err(JsonRpcError::invalid_request(Some(id))),
        };

        Ok(Self::Response(IncomingResponse { id, outcome }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn classify(value: Value) -> IncomingMessage {
        IncomingMessage::from_value(value).unwrap()
    }

    fn rejected(value: Value) -> JsonRpcError {
        IncomingMessage::from_value(value).unwrap_err()
    }

    #[test]
    fn request_with_numeric_id() {
        let IncomingMessage::Request(req) =
            classify(json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}}))
        else {
            panic!("Expected Request");
        };
        assert_eq!(req.id, RequestId::Number(1));
        assert_eq!(req.method, "initialize");
    }

    #[test]
    fn request_with_string_id() {
        let IncomingMessage::Request(req) = classify(json!({"jsonrpc": "2.0", "id": "abc-123", "method": "ping"}))
        else {
            panic!("Expected Request");
        };
        assert_eq!(req.id, RequestId::String("abc-123".to_string()));
        assert_eq!(req.id.to_string(), "abc-123");
    }

    #[test]
    fn notification_has_no_id() {
        let IncomingMessage::Notification(notif) =
            classify(json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
        else {
            panic!("Expected Notification");
        };
        assert_eq!(notif.method, "notifications/initialized");
    }

    #[test]
    fn result_response() {
        let IncomingMessage::Response(resp) = classify(json!({"jsonrpc": "2.0", "id": 7, "result": {"roots": []}}))
        else {
            panic!("Expected Response");
        };
        assert_eq!(resp.id, RequestId::Number(7));
        assert_eq!(resp.outcome.unwrap(), json!({"roots": []}));
    }

    #[test]
    fn error_response() {
        let IncomingMessage::Response(resp) =
            classify(json!({"jsonrpc": "2.0", "id": 3, "error": {"code": -1, "message": "declined"}}))
        else {
            panic!("Expected Response");
        };
        let error = resp.outcome.unwrap_err();
        assert_eq!(error.code, -1);
        assert_eq!(error.message, "declined");
    }

    #[test]
    fn malformed_envelopes_are_invalid_requests() {
        let invalid = ErrorCode::InvalidRequest.code();

        assert_eq!(rejected(json!([1, 2])).error.code, invalid);
        assert_eq!(rejected(json!({"jsonrpc": "2.0", "result": {}})).error.code, invalid);
        assert_eq!(rejected(json!({"jsonrpc": "1.0", "id": 1, "method": "ping"})).error.code, invalid);
        assert_eq!(
            rejected(json!({"jsonrpc": "2.0", "id": 1, "result": {}, "error": {"code": 1, "message": "x"}}))
                .error
                .code,
            invalid
        );

        let missing_version = rejected(json!({"id": 1, "method": "ping"}));
        assert_eq!(missing_version.error.code, invalid);
        assert_eq!(missing_version.id, Some(RequestId::Number(1)));

        let empty_method = rejected(json!({"jsonrpc": "2.0", "id": 2, "method": ""}));
        assert_eq!(empty_method.id, Some(RequestId::Number(2)));
    }

    #[test]
    fn null_id_is_not_a_request_id() {
        let err = rejected(json!({"jsonrpc": "2.0", "id": null, "method": "ping"}));
        assert_eq!(err.error.code, ErrorCode::InvalidRequest.code());
        assert_eq!(err.id, None);
    }

    #[test]
    fn serialise_error_response() {
        let error = JsonRpcError::method_not_found(RequestId::Number(1), "unknown/method");
        let json = serde_json::to_value(&error).unwrap();
        assert_eq!(json["jsonrpc"], "2.0");
        assert_eq!(json["id"], 1);
        assert_eq!(json["error"]["code"], -32601);
        assert_eq!(json["error"]["message"], "Method not found: unknown/method");
        assert!(json["error"].get("data").is_none());
    }

    #[test]
    fn parse_error_serialises_null_id() {
        let json = serde_json::to_value(JsonRpcError::parse_error()).unwrap();
        assert!(json["id"].is_null());
        assert_eq!(json["error"]["code"], -32700);
        assert_eq!(json["error"]["message"], "Parse error");
    }

    #[test]
    fn domain_codes_are_stable() {
        assert_eq!(ErrorCode::NotFound.code(), -32002);
        assert_eq!(ErrorCode::ValidationFailed.code(), -32003);
    }
}
