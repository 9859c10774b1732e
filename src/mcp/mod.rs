//! Model Context Protocol (MCP) server engine.
//!
//! The engine turns registered tools, prompts, resources and resource
//! templates into a JSON-RPC 2.0 server. It is transport-agnostic: a
//! transport feeds inbound messages to [`McpServer::receive`] and forwards
//! [`ServerEvent::Send`] events back to the client. [`StdioTransport`] is the
//! built-in newline-delimited transport.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          McpServer                           │
//! │                                                              │
//! │   ┌─────────────┐    ┌─────────────┐    ┌──────────────┐     │
//! │   │  Transport  │───▶│  Dispatch   │───▶│  Registries  │     │
//! │   │   (stdio)   │    │ (lifecycle) │    │  (handlers)  │     │
//! │   └─────────────┘    └─────────────┘    └──────────────┘     │
//! │          ▲                  │                  │             │
//! │          │                  ▼                  ▼             │
//! │   ┌─────────────┐    ┌─────────────┐    ┌──────────────┐     │
//! │   │   Events    │◀───│  Sessions   │    │   Schemas    │     │
//! │   │   (Send)    │    │   (store)   │    │ (validation) │     │
//! │   └─────────────┘    └─────────────┘    └──────────────┘     │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Protocol Version
//!
//! Versions 2025-06-18, 2025-03-26 and 2024-11-05 are accepted. A client must
//! request one of them exactly; anything else fails `initialize`.

pub mod completion;
pub mod context;
pub mod events;
pub mod pagination;
pub mod protocol;
pub mod registry;
pub mod schema;
pub mod server;
pub mod session;
pub mod transport;
pub mod types;
pub mod uri_template;

pub use context::RequestContext;
pub use events::{EventKind, ListenOptions, Listener, SendTarget, ServerEvent};
pub use protocol::{
    ErrorCode, JsonRpcError, JsonRpcRequest, JsonRpcResponse, LATEST_PROTOCOL_VERSION, SUPPORTED_PROTOCOL_VERSIONS,
};
pub use registry::{Prompt, Resource, ResourceTemplate, Tool};
pub use schema::{Issue, JsonSchema, JsonSchemaAdapter, Schema, SchemaAdapter, Validation};
pub use server::{
    ChangeKind, LoggingOptions, McpServer, PaginationOptions, ServerOptions, DEFAULT_LOG_LEVEL,
    DEFAULT_REQUEST_TIMEOUT,
};
pub use session::{InMemorySessionStore, SessionId, SessionStore};
pub use transport::StdioTransport;
pub use types::*;
pub use uri_template::{ParamValue, Params, UriTemplate, UriTemplateMatcher};
