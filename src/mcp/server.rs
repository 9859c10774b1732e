//! The MCP protocol engine.
//!
//! [`McpServer`] owns the registries, dispatches inbound JSON-RPC messages and
//! correlates the client's answers to server-initiated requests. It never
//! talks to a transport directly:
//!
//! 1. **Inbound**: the transport calls [`McpServer::receive`] with each decoded
//!    message and the session it arrived on, and writes back whatever response
//!    is returned.
//! 2. **Outbound**: notifications and server-initiated requests are raised as
//!    [`ServerEvent::Send`] events; the transport subscribes with
//!    [`McpServer::on`] and routes them to the target sessions.
//! 3. **Teardown**: the transport calls [`McpServer::close_session`] when a
//!    connection goes away.
//!
//! A handler that awaits the client (sampling, elicitation, roots) only makes
//! progress if the transport keeps feeding `receive` while it waits, so
//! transports must not process one session's messages strictly one at a time.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::join_all;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::oneshot;

use crate::error::{BoxError, McpError};
use crate::mcp::completion::{self, CompleteParams, CompletionRef};
use crate::mcp::context::RequestContext;
use crate::mcp::events::{EventBus, EventKind, ListenOptions, Listener, SendTarget, ServerEvent};
use crate::mcp::pagination::{paginate, DEFAULT_PAGE_SIZE};
use crate::mcp::protocol::{
    ErrorCode, IncomingMessage, IncomingResponse, JsonRpcError, JsonRpcErrorData,
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId, SUPPORTED_PROTOCOL_VERSIONS,
};
use crate::mcp::registry::{
    is_enabled, Entry, Prompt, PromptEntry, PromptHandler, Registry, Resource, ResourceEntry,
    ResourceHandler, ResourceTemplate, TemplateRegistry, Tool, ToolEntry, ToolHandler,
};
use crate::mcp::schema::{JsonSchemaAdapter, Schema, SchemaAdapter, Validation};
use crate::mcp::session::{InMemorySessionStore, SessionId, SessionStore};
use crate::mcp::types::{
    CallToolResult, ClientCapabilities, Completion, CreateMessageParams, CreateMessageResult,
    ElicitAction, ElicitResult, GetPromptResult, Icon, InitializeParams, ListRootsResult, LogLevel,
    ReadResourceResult, Root, ServerCapabilities, ServerInfo, ToolAnnotations,
};
use crate::mcp::uri_template::Params;

/// How long a server-initiated request waits for the client by default.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Log level assumed for sessions that never sent `logging/setLevel`.
pub const DEFAULT_LOG_LEVEL: LogLevel = LogLevel::Info;

/// Page size for list methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationOptions {
    /// Entries per page; must be at least 1.
    pub page_size: usize,
}

/// Server-side logging defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoggingOptions {
    /// Level applied to sessions that have not chosen one.
    pub default_level: LogLevel,
}

/// Construction options for [`McpServer`].
#[derive(Clone)]
pub struct ServerOptions {
    /// Converts tool and prompt schemas into JSON Schema documents.
    pub adapter: Arc<dyn SchemaAdapter>,
    /// Declared capabilities; they decide which methods are dispatchable.
    pub capabilities: ServerCapabilities,
    /// Usage hints returned from `initialize`.
    pub instructions: Option<String>,
    /// List pagination; defaults to [`DEFAULT_PAGE_SIZE`].
    pub pagination: Option<PaginationOptions>,
    /// Logging defaults; requires the `logging` capability.
    pub logging: Option<LoggingOptions>,
    /// How long server-initiated requests wait for the client.
    pub request_timeout: Duration,
    /// Where session state lives.
    pub session_store: Arc<dyn SessionStore>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            adapter: Arc::new(JsonSchemaAdapter),
            capabilities: ServerCapabilities::default(),
            instructions: None,
            pagination: None,
            logging: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            session_store: Arc::new(InMemorySessionStore::new()),
        }
    }
}

/// What changed, for [`McpServer::changed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// The contents behind a resource URI.
    Resource,
}

/// Every method the engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Method {
    Initialize,
    Ping,
    Initialized,
    RootsListChanged,
    Cancelled,
    ToolsList,
    ToolsCall,
    PromptsList,
    PromptsGet,
    ResourcesList,
    ResourceTemplatesList,
    ResourcesRead,
    ResourcesSubscribe,
    ResourcesUnsubscribe,
    Complete,
    SetLevel,
}

impl Method {
    const ALL: [Self; 16] = [
        Self::Initialize,
        Self::Ping,
        Self::Initialized,
        Self::RootsListChanged,
        Self::Cancelled,
        Self::ToolsList,
        Self::ToolsCall,
        Self::PromptsList,
        Self::PromptsGet,
        Self::ResourcesList,
        Self::ResourceTemplatesList,
        Self::ResourcesRead,
        Self::ResourcesSubscribe,
        Self::ResourcesUnsubscribe,
        Self::Complete,
        Self::SetLevel,
    ];

    const fn as_str(self) -> &'static str {
        match self {
            Self::Initialize => "initialize",
            Self::Ping => "ping",
            Self::Initialized => "notifications/initialized",
            Self::RootsListChanged => "notifications/roots/list_changed",
            Self::Cancelled => "notifications/cancelled",
            Self::ToolsList => "tools/list",
            Self::ToolsCall => "tools/call",
            Self::PromptsList => "prompts/list",
            Self::PromptsGet => "prompts/get",
            Self::ResourcesList => "resources/list",
            Self::ResourceTemplatesList => "resources/templates/list",
            Self::ResourcesRead => "resources/read",
            Self::ResourcesSubscribe => "resources/subscribe",
            Self::ResourcesUnsubscribe => "resources/unsubscribe",
            Self::Complete => "completion/complete",
            Self::SetLevel => "logging/setLevel",
        }
    }

    fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.as_str() == name)
    }

    const fn is_notification(self) -> bool {
        matches!(self, Self::Initialized | Self::RootsListChanged | Self::Cancelled)
    }

    const fn is_enabled(self, capabilities: &ServerCapabilities) -> bool {
        match self {
            Self::Initialize
            | Self::Ping
            | Self::Initialized
            | Self::RootsListChanged
            | Self::Cancelled => true,
            Self::ToolsList | Self::ToolsCall => capabilities.tools.is_some(),
            Self::PromptsList | Self::PromptsGet => capabilities.prompts.is_some(),
            Self::ResourcesList | Self::ResourceTemplatesList | Self::ResourcesRead => {
                capabilities.resources.is_some()
            }
            Self::ResourcesSubscribe | Self::ResourcesUnsubscribe => {
                matches!(capabilities.resources, Some(r) if r.subscribe)
            }
            Self::Complete => capabilities.completions.is_some(),
            Self::SetLevel => capabilities.logging.is_some(),
        }
    }
}

type PendingKey = (SessionId, i64);
type PendingSender = oneshot::Sender<Result<Value, JsonRpcErrorData>>;

/// Server-initiated requests awaiting a client response.
#[derive(Default)]
struct Pending {
    next_ids: HashMap<SessionId, i64>,
    waiting: HashMap<PendingKey, PendingSender>,
}

struct Inner {
    info: ServerInfo,
    adapter: Arc<dyn SchemaAdapter>,
    capabilities: ServerCapabilities,
    instructions: Option<String>,
    page_size: usize,
    default_log_level: LogLevel,
    request_timeout: Duration,
    store: Arc<dyn SessionStore>,
    methods: HashSet<Method>,
    tools: Registry<Tool, ToolHandler>,
    prompts: Registry<Prompt, PromptHandler>,
    resources: Registry<Resource, ResourceHandler>,
    templates: TemplateRegistry,
    events: Arc<EventBus>,
    pending: Mutex<Pending>,
    roots: Mutex<HashMap<SessionId, Vec<Root>>>,
}

impl Inner {
    fn pending(&self) -> MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn roots(&self) -> MutexGuard<'_, HashMap<SessionId, Vec<Root>>> {
        self.roots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Removes a pending entry when the waiting request finishes or is dropped.
struct PendingSlot<'a> {
    inner: &'a Inner,
    key: PendingKey,
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        self.inner.pending().waiting.remove(&self.key);
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InitializeResult<'a> {
    protocol_version: &'a str,
    capabilities: ServerCapabilities,
    server_info: &'a ServerInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    instructions: Option<&'a str>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolListing<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<&'a str>,
    description: &'a str,
    input_schema: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_schema: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    annotations: Option<&'a ToolAnnotations>,
    #[serde(skip_serializing_if = "<[Icon]>::is_empty")]
    icons: &'a [Icon],
}

#[derive(Serialize)]
struct PromptArgument {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    required: bool,
}

#[derive(Serialize)]
struct PromptListing<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<&'a str>,
    description: &'a str,
    arguments: Vec<PromptArgument>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TemplateListing<'a> {
    uri_template: &'a str,
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<&'a str>,
    description: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    mime_type: Option<&'a str>,
}

#[derive(Deserialize)]
struct ListParams {
    #[serde(default)]
    cursor: Option<String>,
}

#[derive(Deserialize)]
struct CallParams {
    name: String,
    #[serde(default)]
    arguments: Option<Value>,
}

#[derive(Deserialize)]
struct UriParams {
    uri: String,
}

#[derive(Deserialize)]
struct SetLevelParams {
    level: LogLevel,
}

/// Decodes method params; absent params count as an empty object.
fn parse_params<T: DeserializeOwned>(params: Option<Value>) -> Result<T, McpError> {
    serde_json::from_value(params.unwrap_or_else(|| json!({})))
        .map_err(|e| McpError::InvalidParams(e.to_string()))
}

fn to_json<T: Serialize>(value: &T) -> Result<Value, McpError> {
    serde_json::to_value(value).map_err(|e| McpError::internal(format!("failed to serialise result: {e}")))
}

/// Serialises an outbound message. Only fails for non-string map keys, which
/// none of the protocol types have.
fn encode<T: Serialize>(message: &T) -> Value {
    serde_json::to_value(message).unwrap_or_else(|e| {
        tracing::error!(error = %e, "Failed to serialise outbound message");
        json!({
            "jsonrpc": "2.0",
            "id": null,
            "error": {"code": -32603, "message": "failed to serialise response"},
        })
    })
}

/// Checks a requested protocol version.
///
/// # Errors
///
/// Returns [`McpError::InvalidProtocolVersion`] if `requested` is not a
/// `YYYY-MM-DD` string, or [`McpError::UnsupportedProtocolVersion`] if it is
/// well formed but unknown.
pub fn negotiate_protocol_version(requested: &str) -> Result<&'static str, McpError> {
    let well_formed = requested.len() == 10
        && requested.bytes().enumerate().all(|(i, b)| match i {
            4 | 7 => b == b'-',
            _ => b.is_ascii_digit(),
        });
    if !well_formed {
        return Err(McpError::InvalidProtocolVersion(requested.to_string()));
    }

    SUPPORTED_PROTOCOL_VERSIONS
        .into_iter()
        .find(|v| *v == requested)
        .ok_or_else(|| McpError::UnsupportedProtocolVersion {
            requested: requested.to_string(),
            supported: SUPPORTED_PROTOCOL_VERSIONS.to_vec(),
        })
}

/// Derives prompt arguments from a JSON Schema's `properties` and `required`.
fn prompt_arguments(schema: &Value) -> Vec<PromptArgument> {
    let required: Vec<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|r| r.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    schema
        .get("properties")
        .and_then(Value::as_object)
        .map(|properties| {
            properties
                .iter()
                .map(|(name, property)| PromptArgument {
                    name: name.clone(),
                    description: property
                        .get("description")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    required: required.contains(&name.as_str()),
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Model Context Protocol server engine.
///
/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct McpServer {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for McpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpServer")
            .field("info", &self.inner.info)
            .field("capabilities", &self.inner.capabilities)
            .finish_non_exhaustive()
    }
}

impl McpServer {
    /// Creates an engine.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::Config`] if the page size or request timeout is
    /// zero, or if logging options are given without the `logging` capability.
    pub fn new(info: ServerInfo, options: ServerOptions) -> Result<Self, McpError> {
        let page_size = options.pagination.map_or(DEFAULT_PAGE_SIZE, |p| p.page_size);
        if page_size == 0 {
            return Err(McpError::Config("page size must be at least 1".to_string()));
        }
        if options.logging.is_some() && options.capabilities.logging.is_none() {
            return Err(McpError::Config(
                "logging options require the logging capability".to_string(),
            ));
        }
        if options.request_timeout.is_zero() {
            return Err(McpError::Config("request timeout must be positive".to_string()));
        }

        let methods = Method::ALL
            .into_iter()
            .filter(|m| m.is_enabled(&options.capabilities))
            .collect();

        Ok(Self {
            inner: Arc::new(Inner {
                info,
                adapter: options.adapter,
                capabilities: options.capabilities,
                instructions: options.instructions,
                page_size,
                default_log_level: options.logging.map_or(DEFAULT_LOG_LEVEL, |l| l.default_level),
                request_timeout: options.request_timeout,
                store: options.session_store,
                methods,
                tools: Registry::default(),
                prompts: Registry::default(),
                resources: Registry::default(),
                templates: TemplateRegistry::default(),
                events: Arc::new(EventBus::default()),
                pending: Mutex::new(Pending::default()),
                roots: Mutex::new(HashMap::new()),
            }),
        })
    }

    /// Server identity.
    #[must_use]
    pub fn info(&self) -> &ServerInfo {
        &self.inner.info
    }

    /// Declared capabilities.
    #[must_use]
    pub fn capabilities(&self) -> ServerCapabilities {
        self.inner.capabilities
    }

    /// The session store.
    #[must_use]
    pub fn session_store(&self) -> &Arc<dyn SessionStore> {
        &self.inner.store
    }

    // --- events ---

    /// Subscribes to an event kind.
    pub fn on<F>(&self, kind: EventKind, callback: F) -> Listener
    where
        F: Fn(&ServerEvent) + Send + Sync + 'static,
    {
        self.on_with(kind, ListenOptions::default(), callback)
    }

    /// Subscribes to an event kind with options.
    pub fn on_with<F>(&self, kind: EventKind, options: ListenOptions, callback: F) -> Listener
    where
        F: Fn(&ServerEvent) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(kind, options, Arc::new(callback))
    }

    fn emit(&self, event: &ServerEvent) {
        self.inner.events.emit(event);
    }

    fn notify(&self, method: &str, params: Option<Value>, target: SendTarget) {
        let message = encode(&JsonRpcNotification::new(method, params));
        self.emit(&ServerEvent::Send { message, target });
    }

    fn notify_list_changed(&self, method: &str, declared: bool) {
        if declared {
            self.notify(method, None, SendTarget::Broadcast);
        }
    }

    // --- registration ---

    /// Registers or replaces a tool.
    pub fn tool<F, Fut>(&self, tool: Tool, execute: F)
    where
        F: Fn(Option<Value>, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<CallToolResult, BoxError>> + Send + 'static,
    {
        use futures::FutureExt as _;

        let name = tool.name.clone();
        let entry: ToolEntry = Entry {
            def: tool,
            execute: Arc::new(move |input: Option<Value>, ctx: RequestContext| execute(input, ctx).boxed()),
        };
        let replaced = self.inner.tools.insert(name.clone(), entry);
        tracing::debug!(tool = %name, replaced, "Registered tool");
        self.notify_list_changed(
            "notifications/tools/list_changed",
            self.inner.capabilities.tools.is_some_and(|t| t.list_changed),
        );
    }

    /// Registers or replaces a prompt.
    pub fn prompt<F, Fut>(&self, prompt: Prompt, execute: F)
    where
        F: Fn(Option<Value>, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<GetPromptResult, BoxError>> + Send + 'static,
    {
        use futures::FutureExt as _;

        let name = prompt.name.clone();
        let entry: PromptEntry = Entry {
            def: prompt,
            execute: Arc::new(move |input: Option<Value>, ctx: RequestContext| execute(input, ctx).boxed()),
        };
        let replaced = self.inner.prompts.insert(name.clone(), entry);
        tracing::debug!(prompt = %name, replaced, "Registered prompt");
        self.notify_list_changed(
            "notifications/prompts/list_changed",
            self.inner.capabilities.prompts.is_some_and(|p| p.list_changed),
        );
    }

    /// Registers or replaces a resource.
    pub fn resource<F, Fut>(&self, resource: Resource, execute: F)
    where
        F: Fn(String, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<ReadResourceResult, BoxError>> + Send + 'static,
    {
        use futures::FutureExt as _;

        let uri = resource.uri.clone();
        let entry: ResourceEntry = Entry {
            def: resource,
            execute: Arc::new(move |uri: String, ctx: RequestContext| execute(uri, ctx).boxed()),
        };
        let replaced = self.inner.resources.insert(uri.clone(), entry);
        tracing::debug!(uri = %uri, replaced, "Registered resource");
        self.notify_resources_changed();
    }

    /// Registers or replaces a resource template.
    pub fn template<F, Fut>(&self, template: ResourceTemplate, execute: F)
    where
        F: Fn(String, Params, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<ReadResourceResult, BoxError>> + Send + 'static,
    {
        use futures::FutureExt as _;

        let key = template.uri_template().to_string();
        let replaced = self.inner.templates.insert(Entry {
            def: template,
            execute: Arc::new(move |uri: String, params: Params, ctx: RequestContext| {
                execute(uri, params, ctx).boxed()
            }),
        });
        tracing::debug!(template = %key, replaced, "Registered resource template");
        self.notify_resources_changed();
    }

    fn notify_resources_changed(&self) {
        self.notify_list_changed(
            "notifications/resources/list_changed",
            self.inner.capabilities.resources.is_some_and(|r| r.list_changed),
        );
    }

    // --- inbound ---

    /// Handles one inbound JSON-RPC message or batch.
    ///
    /// Returns the response to write back, or `None` for notifications and
    /// for the client's responses to server-initiated requests. A batch is
    /// answered with an array of its non-empty responses.
    pub async fn receive(&self, message: Value, session_id: Option<&str>) -> Option<Value> {
        let session: SessionId = session_id.map(str::to_string);

        match message {
            Value::Array(batch) if batch.is_empty() => Some(encode(&JsonRpcError::invalid_request(None))),
            Value::Array(batch) => {
                let responses: Vec<Value> =
                    join_all(batch.into_iter().map(|message| self.receive_one(message, &session)))
                        .await
                        .into_iter()
                        .flatten()
                        .collect();
                (!responses.is_empty()).then_some(Value::Array(responses))
            }
            message => self.receive_one(message, &session).await,
        }
    }

    async fn receive_one(&self, message: Value, session: &SessionId) -> Option<Value> {
        match IncomingMessage::from_value(message) {
            Ok(IncomingMessage::Request(request)) => Some(self.handle_request(request, session).await),
            Ok(IncomingMessage::Notification(notification)) => {
                self.handle_notification(notification, session);
                None
            }
            Ok(IncomingMessage::Response(response)) => {
                self.resolve_pending(session, response);
                None
            }
            Err(error) => {
                tracing::debug!(session = ?session, code = error.error.code, "Rejected malformed message");
                Some(encode(&error))
            }
        }
    }

    async fn handle_request(&self, request: JsonRpcRequest, session: &SessionId) -> Value {
        let id = request.id;
        let method = Method::parse(&request.method)
            .filter(|m| !m.is_notification() && self.inner.methods.contains(m));

        let Some(method) = method else {
            tracing::debug!(method = %request.method, "Method not found");
            return encode(&JsonRpcError::method_not_found(id, &request.method));
        };

        match self.dispatch(method, request.params, session).await {
            Ok(result) => {
                tracing::debug!(method = method.as_str(), session = ?session, "Request handled");
                encode(&JsonRpcResponse::success(id, result))
            }
            Err(error) => {
                let data = error.to_error_data();
                if data.code == ErrorCode::InternalError.code() {
                    tracing::warn!(method = method.as_str(), session = ?session, error = %error, "Request failed");
                } else {
                    tracing::debug!(method = method.as_str(), session = ?session, error = %error, "Request rejected");
                }
                encode(&JsonRpcError::new(Some(id), data))
            }
        }
    }

    async fn dispatch(&self, method: Method, params: Option<Value>, session: &SessionId) -> Result<Value, McpError> {
        match method {
            Method::Initialize => self.initialize(params, session).await,
            Method::Ping => Ok(json!({})),
            Method::ToolsList => self.list_tools(params).await,
            Method::ToolsCall => self.call_tool(params, session).await,
            Method::PromptsList => self.list_prompts(params).await,
            Method::PromptsGet => self.get_prompt(params, session).await,
            Method::ResourcesList => self.list_resources(params, session).await,
            Method::ResourceTemplatesList => self.list_templates(params),
            Method::ResourcesRead => self.read_resource(params, session).await,
            Method::ResourcesSubscribe => self.subscribe(params, session).await,
            Method::ResourcesUnsubscribe => self.unsubscribe(params, session).await,
            Method::Complete => self.complete(params).await,
            Method::SetLevel => self.set_level(params, session).await,
            Method::Initialized | Method::RootsListChanged | Method::Cancelled => {
                Err(McpError::internal(format!("{} is a notification", method.as_str())))
            }
        }
    }

    fn handle_notification(&self, notification: JsonRpcNotification, session: &SessionId) {
        match Method::parse(&notification.method) {
            Some(Method::Initialized) => {
                tracing::debug!(session = ?session, "Client finished initialisation");
            }
            Some(Method::RootsListChanged) => {
                let server = self.clone();
                let session = session.clone();
                tokio::spawn(async move {
                    if let Err(e) = server.refresh_roots(&session).await {
                        tracing::warn!(session = ?session, error = %e, "Failed to refresh roots");
                    }
                });
            }
            Some(Method::Cancelled) => {
                tracing::debug!(session = ?session, params = ?notification.params, "Client cancelled a request");
            }
            _ => {
                tracing::debug!(method = %notification.method, "Ignoring unknown notification");
            }
        }
    }

    fn context(&self, session: &SessionId) -> RequestContext {
        RequestContext::new(self.clone(), session.clone())
    }

    // --- lifecycle ---

    async fn initialize(&self, params: Option<Value>, session: &SessionId) -> Result<Value, McpError> {
        let params: InitializeParams = parse_params(params)?;
        let version = negotiate_protocol_version(&params.protocol_version)?;

        let store = &self.inner.store;
        store.set_client_info(session, params.client_info.clone()).await?;
        store
            .set_client_capabilities(session, params.capabilities.clone())
            .await?;
        store.set_protocol_version(session, version.to_string()).await?;

        tracing::info!(
            session = ?session,
            version,
            client = params.client_info.as_ref().map_or("unknown", |c| c.name.as_str()),
            "Session initialised"
        );

        self.emit(&ServerEvent::Initialize {
            session_id: session.clone(),
            protocol_version: version.to_string(),
            params,
        });

        to_json(&InitializeResult {
            protocol_version: version,
            capabilities: self.inner.capabilities,
            server_info: &self.inner.info,
            instructions: self.inner.instructions.as_deref(),
        })
    }

    /// Forgets a session: its info, subscriptions and cached roots. Requests
    /// still waiting on its client fail with [`McpError::SessionClosed`].
    ///
    /// # Errors
    ///
    /// Returns an error if the session store fails.
    pub async fn close_session(&self, session: &SessionId) -> Result<(), McpError> {
        let abandoned = {
            let mut pending = self.inner.pending();
            pending.next_ids.remove(session);
            let before = pending.waiting.len();
            pending.waiting.retain(|(owner, _), _| owner != session);
            before - pending.waiting.len()
        };
        self.inner.roots().remove(session);
        self.inner.store.delete(session).await?;
        tracing::debug!(session = ?session, abandoned, "Session closed");
        Ok(())
    }

    // --- tools ---

    async fn list_tools(&self, params: Option<Value>) -> Result<Value, McpError> {
        let ListParams { cursor } = parse_params(params)?;
        let visible: Vec<_> = self
            .inner
            .tools
            .snapshot()
            .into_iter()
            .filter(|e| is_enabled(e.def.enabled.as_ref(), &e.def.name))
            .collect();
        let page = paginate(visible, cursor.as_deref(), self.inner.page_size)?;

        let mut tools = Vec::with_capacity(page.items.len());
        for entry in &page.items {
            let tool = &entry.def;
            let input_schema = match &tool.schema {
                Some(schema) => self.inner.adapter.to_json_schema(schema.as_ref()).await?,
                None => json!({"type": "object"}),
            };
            let output_schema = match &tool.output_schema {
                Some(schema) => Some(self.inner.adapter.to_json_schema(schema.as_ref()).await?),
                None => None,
            };
            tools.push(to_json(&ToolListing {
                name: &tool.name,
                title: tool.title.as_deref(),
                description: &tool.description,
                input_schema,
                output_schema,
                annotations: tool.annotations.as_ref(),
                icons: &tool.icons,
            })?);
        }

        Ok(with_cursor(json!({ "tools": tools }), page.next_cursor))
    }

    async fn call_tool(&self, params: Option<Value>, session: &SessionId) -> Result<Value, McpError> {
        let CallParams { name, arguments } = parse_params(params)?;
        let entry = self
            .inner
            .tools
            .get(&name)
            .filter(|e| is_enabled(e.def.enabled.as_ref(), &name))
            .ok_or_else(|| McpError::not_found("Tool", &name))?;

        let input = validate_input(entry.def.schema.as_deref(), arguments).await?;
        let result = (entry.execute)(input, self.context(session))
            .await
            .map_err(McpError::from_handler)?;

        if let Some(schema) = entry.def.output_schema.as_deref() {
            check_structured_content(&name, schema, &result).await?;
        }

        to_json(&result)
    }

    // --- prompts ---

    async fn list_prompts(&self, params: Option<Value>) -> Result<Value, McpError> {
        let ListParams { cursor } = parse_params(params)?;
        let visible: Vec<_> = self
            .inner
            .prompts
            .snapshot()
            .into_iter()
            .filter(|e| is_enabled(e.def.enabled.as_ref(), &e.def.name))
            .collect();
        let page = paginate(visible, cursor.as_deref(), self.inner.page_size)?;

        let mut prompts = Vec::with_capacity(page.items.len());
        for entry in &page.items {
            let prompt = &entry.def;
            let arguments = match &prompt.schema {
                Some(schema) => prompt_arguments(&self.inner.adapter.to_json_schema(schema.as_ref()).await?),
                None => Vec::new(),
            };
            prompts.push(to_json(&PromptListing {
                name: &prompt.name,
                title: prompt.title.as_deref(),
                description: &prompt.description,
                arguments,
            })?);
        }

        Ok(with_cursor(json!({ "prompts": prompts }), page.next_cursor))
    }

    async fn get_prompt(&self, params: Option<Value>, session: &SessionId) -> Result<Value, McpError> {
        let CallParams { name, arguments } = parse_params(params)?;
        let entry = self
            .inner
            .prompts
            .get(&name)
            .filter(|e| is_enabled(e.def.enabled.as_ref(), &name))
            .ok_or_else(|| McpError::not_found("Prompt", &name))?;

        let input = validate_input(entry.def.schema.as_deref(), arguments).await?;
        let result = (entry.execute)(input, self.context(session))
            .await
            .map_err(McpError::from_handler)?;

        to_json(&result)
    }

    // --- resources ---

    async fn list_resources(&self, params: Option<Value>, session: &SessionId) -> Result<Value, McpError> {
        let ListParams { cursor } = parse_params(params)?;

        let mut resources: Vec<_> = self
            .inner
            .resources
            .snapshot()
            .iter()
            .filter(|e| is_enabled(e.def.enabled.as_ref(), &e.def.uri))
            .map(|e| e.def.info())
            .collect();

        for entry in self.inner.templates.snapshot() {
            if let Some(list) = &entry.def.list {
                let listed = list(self.context(session)).await.map_err(McpError::from_handler)?;
                resources.extend(listed);
            }
        }

        let page = paginate(resources, cursor.as_deref(), self.inner.page_size)?;
        Ok(with_cursor(json!({ "resources": page.items }), page.next_cursor))
    }

    fn list_templates(&self, params: Option<Value>) -> Result<Value, McpError> {
        let ListParams { cursor } = parse_params(params)?;
        let page = paginate(self.inner.templates.snapshot(), cursor.as_deref(), self.inner.page_size)?;

        let templates = page
            .items
            .iter()
            .map(|entry| {
                let template = &entry.def;
                to_json(&TemplateListing {
                    uri_template: template.uri_template(),
                    name: &template.name,
                    title: template.title.as_deref(),
                    description: &template.description,
                    mime_type: template.mime_type.as_deref(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(with_cursor(json!({ "resourceTemplates": templates }), page.next_cursor))
    }

    async fn read_resource(&self, params: Option<Value>, session: &SessionId) -> Result<Value, McpError> {
        let UriParams { uri } = parse_params(params)?;

        let exact = self
            .inner
            .resources
            .get(&uri)
            .filter(|e| is_enabled(e.def.enabled.as_ref(), &uri));

        let result = if let Some(entry) = exact {
            (entry.execute)(uri, self.context(session)).await
        } else if let Some((entry, variables)) = self.inner.templates.resolve(&uri) {
            tracing::debug!(uri = %uri, template = entry.def.uri_template(), "Resolved resource by template");
            (entry.execute)(uri, variables, self.context(session)).await
        } else {
            return Err(McpError::not_found("Resource", uri));
        };

        to_json(&result.map_err(McpError::from_handler)?)
    }

    async fn subscribe(&self, params: Option<Value>, session: &SessionId) -> Result<Value, McpError> {
        let UriParams { uri } = parse_params(params)?;
        self.inner.store.add_subscriber(&uri, session).await?;
        tracing::debug!(session = ?session, uri = %uri, "Subscribed");
        self.emit(&ServerEvent::Subscription {
            session_id: session.clone(),
            uri,
        });
        Ok(json!({}))
    }

    async fn unsubscribe(&self, params: Option<Value>, session: &SessionId) -> Result<Value, McpError> {
        let UriParams { uri } = parse_params(params)?;
        self.inner.store.remove_subscriber(&uri, session).await?;
        tracing::debug!(session = ?session, uri = %uri, "Unsubscribed");
        Ok(json!({}))
    }

    /// Tells subscribers that something changed.
    ///
    /// For [`ChangeKind::Resource`], sends `notifications/resources/updated`
    /// to the sessions subscribed to `id`. A subscription from the
    /// no-session sentinel turns this into a broadcast.
    ///
    /// # Errors
    ///
    /// Returns an error if the session store fails.
    pub async fn changed(&self, kind: ChangeKind, id: &str) -> Result<(), McpError> {
        match kind {
            ChangeKind::Resource => {
                let subscribers = self.inner.store.subscribers(id).await?;
                if subscribers.is_empty() {
                    tracing::debug!(uri = %id, "Resource changed with no subscribers");
                    return Ok(());
                }
                let target = if subscribers.contains(&None) {
                    SendTarget::Broadcast
                } else {
                    SendTarget::Sessions(subscribers)
                };
                self.notify("notifications/resources/updated", Some(json!({ "uri": id })), target);
            }
        }
        Ok(())
    }

    // --- completion and logging ---

    async fn complete(&self, params: Option<Value>) -> Result<Value, McpError> {
        let params: CompleteParams = parse_params(params)?;
        let argument = &params.argument.name;

        let callback = match &params.reference {
            CompletionRef::Prompt { name } => self
                .inner
                .prompts
                .get(name)
                .and_then(|e| e.def.complete.get(argument).cloned()),
            CompletionRef::Resource { uri } => self
                .inner
                .templates
                .get(uri)
                .and_then(|e| e.def.complete.get(argument).cloned()),
        };

        let completion = match callback {
            Some(complete) => completion::finish(
                complete(params.argument.value, params.context.arguments)
                    .await
                    .map_err(McpError::from_handler)?,
            ),
            None => Completion::default(),
        };

        Ok(json!({ "completion": completion }))
    }

    async fn set_level(&self, params: Option<Value>, session: &SessionId) -> Result<Value, McpError> {
        let SetLevelParams { level } = parse_params(params)?;
        self.inner.store.set_log_level(session, level).await?;
        tracing::debug!(session = ?session, level = %level, "Log level changed");
        self.emit(&ServerEvent::LogLevelChange {
            session_id: session.clone(),
            level,
        });
        Ok(json!({}))
    }

    async fn admits(&self, session: &SessionId, level: LogLevel) -> Result<bool, McpError> {
        let threshold = self
            .inner
            .store
            .log_level(session)
            .await?
            .unwrap_or(self.inner.default_log_level);
        Ok(level >= threshold)
    }

    /// Sends `notifications/message` to every session whose log level admits
    /// `level`. Does nothing unless the `logging` capability is declared.
    ///
    /// # Errors
    ///
    /// Returns an error if the session store fails.
    pub async fn log(&self, level: LogLevel, data: Value, logger: Option<&str>) -> Result<(), McpError> {
        if self.inner.capabilities.logging.is_none() {
            return Ok(());
        }

        let mut targets = Vec::new();
        for session in self.inner.store.sessions().await? {
            if self.admits(&session, level).await? {
                targets.push(session);
            }
        }
        if !targets.is_empty() {
            self.notify("notifications/message", Some(log_params(level, data, logger)), SendTarget::Sessions(targets));
        }
        Ok(())
    }

    /// Sends `notifications/message` to one session if its level admits `level`.
    ///
    /// # Errors
    ///
    /// Returns an error if the session store fails.
    pub async fn log_to(
        &self,
        session: &SessionId,
        level: LogLevel,
        data: Value,
        logger: Option<&str>,
    ) -> Result<(), McpError> {
        if self.inner.capabilities.logging.is_some() && self.admits(session, level).await? {
            self.notify(
                "notifications/message",
                Some(log_params(level, data, logger)),
                SendTarget::Sessions(vec![session.clone()]),
            );
        }
        Ok(())
    }

    // --- server-initiated requests ---

    async fn require_client_capability(
        &self,
        session: &SessionId,
        capability: &'static str,
        negotiated: impl FnOnce(&ClientCapabilities) -> bool + Send,
    ) -> Result<(), McpError> {
        let capabilities = self.inner.store.client_capabilities(session).await?;
        if capabilities.as_ref().is_some_and(negotiated) {
            Ok(())
        } else {
            Err(McpError::CapabilityNotNegotiated { capability })
        }
    }

    async fn request<R: DeserializeOwned>(
        &self,
        session: &SessionId,
        method: &str,
        params: Value,
    ) -> Result<R, McpError> {
        let (tx, rx) = oneshot::channel();
        let id = {
            let mut pending = self.inner.pending();
            let next = pending.next_ids.entry(session.clone()).or_insert(0);
            *next += 1;
            let id = *next;
            pending.waiting.insert((session.clone(), id), tx);
            id
        };
        let _slot = PendingSlot {
            inner: &self.inner,
            key: (session.clone(), id),
        };

        tracing::debug!(session = ?session, method, id, "Sending request to client");
        let request = JsonRpcRequest::new(RequestId::Number(id), method, Some(params));
        self.emit(&ServerEvent::Send {
            message: encode(&request),
            target: SendTarget::Sessions(vec![session.clone()]),
        });

        let timeout = self.inner.request_timeout;
        let outcome = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => return Err(McpError::SessionClosed),
            Err(_) => {
                tracing::warn!(session = ?session, method, id, ?timeout, "Client did not answer in time");
                return Err(McpError::RequestTimeout {
                    method: method.to_string(),
                    timeout,
                });
            }
        };

        let value = outcome.map_err(McpError::Client)?;
        serde_json::from_value(value)
            .map_err(|e| McpError::internal(format!("malformed {method} response from client: {e}")))
    }

    fn resolve_pending(&self, session: &SessionId, response: IncomingResponse) {
        let RequestId::Number(id) = response.id else {
            tracing::warn!(session = ?session, id = %response.id, "Response with an id this server never issued");
            return;
        };

        let sender = self.inner.pending().waiting.remove(&(session.clone(), id));
        match sender {
            Some(sender) => {
                if sender.send(response.outcome).is_err() {
                    tracing::debug!(session = ?session, id, "Response arrived after the request was abandoned");
                }
            }
            None => tracing::warn!(session = ?session, id, "Response for unknown request"),
        }
    }

    /// Asks the session's client to sample its model (`sampling/createMessage`).
    ///
    /// # Errors
    ///
    /// Fails with [`McpError::CapabilityNotNegotiated`] before anything is
    /// sent if the client did not declare `sampling`; otherwise with
    /// [`McpError::RequestTimeout`], [`McpError::SessionClosed`] or
    /// [`McpError::Client`] if the round trip does not complete.
    pub async fn message(
        &self,
        session: &SessionId,
        params: CreateMessageParams,
    ) -> Result<CreateMessageResult, McpError> {
        self.require_client_capability(session, "sampling", |c| c.sampling.is_some())
            .await?;
        self.request(session, "sampling/createMessage", to_json(&params)?).await
    }

    /// Asks the session's client to collect input matching `schema`
    /// (`elicitation/create`). Accepted content is validated against the
    /// schema before it is returned.
    ///
    /// # Errors
    ///
    /// As for [`McpServer::message`], with the `elicitation` capability, plus
    /// [`McpError::Schema`] if the adapter cannot convert the schema and
    /// [`McpError::Validation`] if the submitted content does not validate.
    pub async fn elicitation(
        &self,
        session: &SessionId,
        message: &str,
        schema: &dyn Schema,
    ) -> Result<ElicitResult, McpError> {
        self.require_client_capability(session, "elicitation", |c| c.elicitation.is_some())
            .await?;
        let requested_schema = self.inner.adapter.to_json_schema(schema).await?;

        let mut result: ElicitResult = self
            .request(
                session,
                "elicitation/create",
                json!({ "message": message, "requestedSchema": requested_schema }),
            )
            .await?;

        if result.action == ElicitAction::Accept {
            if let Some(content) = result.content.take() {
                let valid = schema.validate(&Value::Object(content)).await.into_result()?;
                result.content = match valid {
                    Value::Object(map) => Some(map),
                    _ => None,
                };
            }
        }
        Ok(result)
    }

    /// Fetches the session's roots (`roots/list`) and caches them.
    ///
    /// # Errors
    ///
    /// As for [`McpServer::message`], with the `roots` capability.
    pub async fn refresh_roots(&self, session: &SessionId) -> Result<Vec<Root>, McpError> {
        self.require_client_capability(session, "roots", |c| c.roots.is_some())
            .await?;
        let ListRootsResult { roots } = self.request(session, "roots/list", json!({})).await?;
        tracing::debug!(session = ?session, count = roots.len(), "Roots refreshed");
        self.inner.roots().insert(session.clone(), roots.clone());
        Ok(roots)
    }

    /// Roots from the session's last `roots/list` answer.
    #[must_use]
    pub fn roots(&self, session: &SessionId) -> Vec<Root> {
        self.inner.roots().get(session).cloned().unwrap_or_default()
    }

    /// Number of engine requests still waiting on the session's client.
    #[must_use]
    pub fn pending_requests(&self, session: &SessionId) -> usize {
        self.inner
            .pending()
            .waiting
            .keys()
            .filter(|(owner, _)| owner == session)
            .count()
    }
}

fn with_cursor(mut result: Value, next_cursor: Option<String>) -> Value {
    if let Some(cursor) = next_cursor {
        result["nextCursor"] = Value::String(cursor);
    }
    result
}

fn log_params(level: LogLevel, data: Value, logger: Option<&str>) -> Value {
    let mut params = json!({ "level": level, "data": data });
    if let Some(logger) = logger {
        params["logger"] = Value::String(logger.to_string());
    }
    params
}

/// Validates arguments against an optional schema. Without a schema the
/// handler gets no input at all.
async fn validate_input(schema: Option<&dyn Schema>, arguments: Option<Value>) -> Result<Option<Value>, McpError> {
    let Some(schema) = schema else {
        return Ok(None);
    };
    let input = arguments.unwrap_or_else(|| json!({}));
    schema.validate(&input).await.into_result().map(Some)
}

async fn check_structured_content(name: &str, schema: &dyn Schema, result: &CallToolResult) -> Result<(), McpError> {
    if result.is_error {
        return Ok(());
    }
    let Some(structured) = &result.structured_content else {
        return Err(McpError::internal(format!(
            "Tool {name} has an output schema but returned no structured content"
        )));
    };
    if let Validation::Invalid(issues) = schema.validate(structured).await {
        let issues: Vec<String> = issues.iter().map(ToString::to_string).collect();
        return Err(McpError::internal(format!(
            "Tool {name} returned invalid structured content: {}",
            issues.join("; ")
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::schema::JsonSchema;
    use crate::mcp::types::{Enabled, ListChangedCapability, ResourcesCapability};

    fn all_capabilities() -> ServerCapabilities {
        ServerCapabilities {
            tools: Some(ListChangedCapability { list_changed: true }),
            prompts: Some(ListChangedCapability { list_changed: true }),
            resources: Some(ResourcesCapability {
                subscribe: true,
                list_changed: true,
            }),
            logging: Some(Enabled {}),
            completions: Some(Enabled {}),
        }
    }

    fn server(capabilities: ServerCapabilities) -> McpServer {
        McpServer::new(
            ServerInfo::new("test", "0.0.1"),
            ServerOptions {
                capabilities,
                ..ServerOptions::default()
            },
        )
        .unwrap()
    }

    fn request(id: i64, method: &str, params: Value) -> Value {
        json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params})
    }

    #[test]
    fn protocol_version_negotiation() {
        assert_eq!(negotiate_protocol_version("2025-06-18").unwrap(), "2025-06-18");
        assert_eq!(negotiate_protocol_version("2024-11-05").unwrap(), "2024-11-05");
        assert!(matches!(
            negotiate_protocol_version("2020-01-01"),
            Err(McpError::UnsupportedProtocolVersion { .. })
        ));
        for bad in ["", "latest", "2025-6-18", "2025/06/18", "2025-06-18x"] {
            assert!(matches!(
                negotiate_protocol_version(bad),
                Err(McpError::InvalidProtocolVersion(_))
            ));
        }
    }

    #[test]
    fn constructor_rejects_inconsistent_options() {
        let zero_page = ServerOptions {
            pagination: Some(PaginationOptions { page_size: 0 }),
            ..ServerOptions::default()
        };
        assert!(matches!(
            McpServer::new(ServerInfo::new("t", "1"), zero_page),
            Err(McpError::Config(_))
        ));

        let logging_without_capability = ServerOptions {
            logging: Some(LoggingOptions {
                default_level: LogLevel::Debug,
            }),
            ..ServerOptions::default()
        };
        assert!(matches!(
            McpServer::new(ServerInfo::new("t", "1"), logging_without_capability),
            Err(McpError::Config(_))
        ));
    }

    #[test]
    fn methods_follow_capabilities() {
        let caps = ServerCapabilities {
            resources: Some(ResourcesCapability::default()),
            ..ServerCapabilities::default()
        };
        assert!(Method::Ping.is_enabled(&caps));
        assert!(Method::ResourcesRead.is_enabled(&caps));
        assert!(!Method::ResourcesSubscribe.is_enabled(&caps));
        assert!(!Method::ToolsList.is_enabled(&caps));
        assert_eq!(Method::parse("logging/setLevel"), Some(Method::SetLevel));
        assert_eq!(Method::parse("tools/destroy"), None);
    }

    #[test]
    fn prompt_arguments_come_from_properties() {
        let arguments = prompt_arguments(&json!({
            "type": "object",
            "properties": {
                "code": {"type": "string", "description": "Code to review"},
                "style": {"type": "string"}
            },
            "required": ["code"]
        }));
        assert_eq!(arguments.len(), 2);
        let code = arguments.iter().find(|a| a.name == "code").unwrap();
        assert!(code.required);
        assert_eq!(code.description.as_deref(), Some("Code to review"));
        assert!(!arguments.iter().find(|a| a.name == "style").unwrap().required);
    }

    #[tokio::test]
    async fn ping_and_unknown_methods() {
        let server = server(ServerCapabilities::default());
        let response = server.receive(request(1, "ping", json!({})), None).await.unwrap();
        assert_eq!(response["result"], json!({}));

        let response = server.receive(request(2, "tools/list", json!({})), None).await.unwrap();
        assert_eq!(response["error"]["code"], -32601);
    }

    #[tokio::test]
    async fn malformed_envelope_is_invalid_request() {
        let server = server(ServerCapabilities::default());
        let response = server.receive(json!({"id": 1, "method": "ping"}), None).await.unwrap();
        assert_eq!(response["error"]["code"], -32600);
        assert_eq!(response["id"], 1);
    }

    #[tokio::test]
    async fn notifications_have_no_response() {
        let server = server(ServerCapabilities::default());
        let response = server
            .receive(json!({"jsonrpc": "2.0", "method": "notifications/initialized"}), None)
            .await;
        assert!(response.is_none());
    }

    #[tokio::test]
    async fn batches_answer_requests_only() {
        let server = server(ServerCapabilities::default());
        let batch = json!([
            request(1, "ping", json!({})),
            {"jsonrpc": "2.0", "method": "notifications/initialized"},
            request(2, "nope", json!({})),
        ]);
        let responses = server.receive(batch, None).await.unwrap();
        let responses = responses.as_array().unwrap();
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0]["id"], 1);
        assert_eq!(responses[1]["error"]["code"], -32601);

        let empty = server.receive(json!([]), None).await.unwrap();
        assert_eq!(empty["error"]["code"], -32600);
    }

    #[tokio::test]
    async fn handler_errors_become_internal_errors() {
        let server = server(all_capabilities());
        server.tool(Tool::new("fail", "Always fails"), |_, _| async {
            Err::<CallToolResult, BoxError>("disk on fire".into())
        });

        let response = server
            .receive(request(1, "tools/call", json!({"name": "fail"})), None)
            .await
            .unwrap();
        assert_eq!(response["error"]["code"], -32603);
        assert_eq!(response["error"]["message"], "disk on fire");
    }

    #[tokio::test]
    async fn output_schema_is_enforced() {
        let server = server(all_capabilities());
        let output = JsonSchema::new(json!({
            "type": "object",
            "properties": {"sum": {"type": "number"}},
            "required": ["sum"]
        }));
        server.tool(Tool::new("bad", "Wrong output").with_output_schema(output), |_, _| async {
            Ok::<_, BoxError>(CallToolResult::structured(json!({"total": 1})))
        });

        let response = server
            .receive(request(1, "tools/call", json!({"name": "bad"})), None)
            .await
            .unwrap();
        assert_eq!(response["error"]["code"], -32603);
        assert!(response["error"]["message"].as_str().unwrap().contains("sum"));
    }

    #[tokio::test]
    async fn disabled_tools_are_hidden_and_not_callable() {
        let server = server(all_capabilities());
        server.tool(Tool::new("hidden", "Off").with_enabled(|| Ok(false)), |_, _| async {
            Ok::<_, BoxError>(CallToolResult::text("ran"))
        });

        let list = server.receive(request(1, "tools/list", json!({})), None).await.unwrap();
        assert_eq!(list["result"]["tools"], json!([]));

        let call = server
            .receive(request(2, "tools/call", json!({"name": "hidden"})), None)
            .await
            .unwrap();
        assert_eq!(call["error"]["code"], -32002);
    }

    #[tokio::test]
    async fn set_level_filters_log_messages() {
        let server = server(all_capabilities());
        let sent = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&sent);
        let _listener = server.on(EventKind::Send, move |event| {
            if let ServerEvent::Send { message, target } = event {
                sink.lock().unwrap().push((message.clone(), target.clone()));
            }
        });

        for session in ["quiet", "chatty"] {
            server
                .receive(
                    request(1, "initialize", json!({"protocolVersion": "2025-06-18", "capabilities": {}})),
                    Some(session),
                )
                .await
                .unwrap();
        }
        server
            .receive(request(2, "logging/setLevel", json!({"level": "error"})), Some("quiet"))
            .await
            .unwrap();
        server
            .receive(request(2, "logging/setLevel", json!({"level": "debug"})), Some("chatty"))
            .await
            .unwrap();

        server.log(LogLevel::Info, json!("hello"), Some("test")).await.unwrap();

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let (message, target) = &sent[0];
        assert_eq!(message["method"], "notifications/message");
        assert_eq!(message["params"]["logger"], "test");
        assert_eq!(*target, SendTarget::Sessions(vec![Some("chatty".to_string())]));
    }

    #[tokio::test]
    async fn unknown_completion_ref_is_empty() {
        let server = server(all_capabilities());
        let response = server
            .receive(
                request(
                    1,
                    "completion/complete",
                    json!({"ref": {"type": "ref/prompt", "name": "missing"}, "argument": {"name": "x", "value": ""}}),
                ),
                None,
            )
            .await
            .unwrap();
        assert_eq!(response["result"]["completion"]["values"], json!([]));
        assert_eq!(response["result"]["completion"]["hasMore"], false);
    }

    #[tokio::test]
    async fn bad_cursor_is_invalid_params() {
        let server = server(all_capabilities());
        let response = server
            .receive(request(1, "tools/list", json!({"cursor": "%%%"})), None)
            .await
            .unwrap();
        assert_eq!(response["error"]["code"], -32602);
    }
}
