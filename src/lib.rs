//! mcp-engine: a transport-agnostic Model Context Protocol server engine
//!
//! This library lets an application expose tools, prompts and resources to
//! AI assistants over MCP.
//!
//! # Architecture
//!
//! The engine owns protocol mechanics; the application owns behaviour:
//!
//! - **Lifecycle**: version negotiation, capability gating, per-session state
//! - **Registries**: tools, prompts, resources and URI templates, each with
//!   an optional enable check
//! - **Bidirectional calls**: sampling, elicitation and roots requests to the
//!   client, correlated by id and bounded by a timeout
//! - **Notifications**: list changes, resource updates and log messages
//!
//! # Modules
//!
//! - [`config`] — Configuration loading and validation
//! - [`error`] — Error types
//! - [`mcp`] — MCP protocol engine and stdio transport

pub mod config;
pub mod error;
pub mod mcp;

pub use error::{BoxError, McpError};
