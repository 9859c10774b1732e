//! Per-request handle passed to every handler.

use serde_json::Value;

use crate::error::McpError;
use crate::mcp::schema::Schema;
use crate::mcp::server::McpServer;
use crate::mcp::session::SessionId;
use crate::mcp::types::{CreateMessageParams, CreateMessageResult, ElicitResult, LogLevel, Root};

/// The server and session a handler is running for.
///
/// Bidirectional calls made through the context go to the session that sent
/// the request being handled.
#[derive(Clone)]
pub struct RequestContext {
    server: McpServer,
    session_id: SessionId,
}

impl RequestContext {
    pub(crate) const fn new(server: McpServer, session_id: SessionId) -> Self {
        Self { server, session_id }
    }

    /// The engine handling this request.
    #[must_use]
    pub const fn server(&self) -> &McpServer {
        &self.server
    }

    /// The session the request came from.
    #[must_use]
    pub const fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Asks the client's model for a completion.
    ///
    /// # Errors
    ///
    /// See [`McpServer::message`].
    pub async fn message(&self, params: CreateMessageParams) -> Result<CreateMessageResult, McpError> {
        self.server.message(&self.session_id, params).await
    }

    /// Asks the user for structured input.
    ///
    /// # Errors
    ///
    /// See [`McpServer::elicitation`].
    pub async fn elicitation(&self, message: &str, schema: &dyn Schema) -> Result<ElicitResult, McpError> {
        self.server.elicitation(&self.session_id, message, schema).await
    }

    /// Re-fetches the client's roots.
    ///
    /// # Errors
    ///
    /// See [`McpServer::refresh_roots`].
    pub async fn refresh_roots(&self) -> Result<Vec<Root>, McpError> {
        self.server.refresh_roots(&self.session_id).await
    }

    /// Last roots reported by the client.
    #[must_use]
    pub fn roots(&self) -> Vec<Root> {
        self.server.roots(&self.session_id)
    }

    /// Sends a log message to this session only, if its level admits it.
    ///
    /// # Errors
    ///
    /// Returns an error if the session store fails.
    pub async fn log(&self, level: LogLevel, data: Value, logger: Option<&str>) -> Result<(), McpError> {
        self.server.log_to(&self.session_id, level, data, logger).await
    }
}
