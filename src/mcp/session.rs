//! Per-session state and resource subscriptions.
//!
//! The engine keeps nothing session-scoped in itself: negotiated client
//! capabilities, client info, protocol version, log level and subscriber sets
//! all live behind [`SessionStore`], so a deployment can back them with an
//! external service. Every method is async for that reason, even though the
//! bundled [`InMemorySessionStore`] never suspends.
//!
//! Sessions are keyed by [`SessionId`]. `None` stands for transports without a
//! session concept (a single stdio client, stateless HTTP).

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use indexmap::{IndexMap, IndexSet};

use crate::error::McpError;
use crate::mcp::types::{ClientCapabilities, ClientInfo, LogLevel};

/// Session key; `None` is the no-session sentinel.
pub type SessionId = Option<String>;

/// Everything the engine remembers about one session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionInfo {
    /// Client identity from `initialize`.
    pub client_info: Option<ClientInfo>,
    /// Client capabilities from `initialize`.
    pub client_capabilities: Option<ClientCapabilities>,
    /// Negotiated protocol version.
    pub protocol_version: Option<String>,
    /// Level set by `logging/setLevel`.
    pub log_level: Option<LogLevel>,
}

/// Storage for session info and subscriptions.
#[async_trait]
pub trait SessionStore: Send + Sync + 'static {
    /// Client identity for a session.
    async fn client_info(&self, session: &SessionId) -> Result<Option<ClientInfo>, McpError>;

    /// Records client identity.
    async fn set_client_info(&self, session: &SessionId, info: Option<ClientInfo>) -> Result<(), McpError>;

    /// Negotiated client capabilities; `None` if the session never initialised.
    async fn client_capabilities(&self, session: &SessionId) -> Result<Option<ClientCapabilities>, McpError>;

    /// Records negotiated client capabilities.
    async fn set_client_capabilities(
        &self,
        session: &SessionId,
        capabilities: ClientCapabilities,
    ) -> Result<(), McpError>;

    /// Negotiated protocol version.
    async fn protocol_version(&self, session: &SessionId) -> Result<Option<String>, McpError>;

    /// Records the negotiated protocol version.
    async fn set_protocol_version(&self, session: &SessionId, version: String) -> Result<(), McpError>;

    /// Log level chosen by the client, if any.
    async fn log_level(&self, session: &SessionId) -> Result<Option<LogLevel>, McpError>;

    /// Records the client's log level.
    async fn set_log_level(&self, session: &SessionId, level: LogLevel) -> Result<(), McpError>;

    /// Every session with stored info.
    async fn sessions(&self) -> Result<Vec<SessionId>, McpError>;

    /// Sessions subscribed to `uri`, in subscription order.
    async fn subscribers(&self, uri: &str) -> Result<Vec<SessionId>, McpError>;

    /// Subscribes a session to `uri`.
    async fn add_subscriber(&self, uri: &str, session: &SessionId) -> Result<(), McpError>;

    /// Unsubscribes a session from `uri`.
    async fn remove_subscriber(&self, uri: &str, session: &SessionId) -> Result<(), McpError>;

    /// Forgets a session entirely, including all its subscriptions.
    async fn delete(&self, session: &SessionId) -> Result<(), McpError>;
}

#[derive(Debug, Default)]
struct Inner {
    sessions: HashMap<SessionId, SessionInfo>,
    subscriptions: IndexMap<String, IndexSet<SessionId>>,
}

/// Process-local session store.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    inner: Mutex<Inner>,
}

impl InMemorySessionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update(&self, session: &SessionId, f: impl FnOnce(&mut SessionInfo)) {
        f(self.lock().sessions.entry(session.clone()).or_default());
    }

    /// Snapshot of a session's info.
    #[must_use]
    pub fn info(&self, session: &SessionId) -> Option<SessionInfo> {
        self.lock().sessions.get(session).cloned()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn client_info(&self, session: &SessionId) -> Result<Option<ClientInfo>, McpError> {
        Ok(self.lock().sessions.get(session).and_then(|s| s.client_info.clone()))
    }

    async fn set_client_info(&self, session: &SessionId, info: Option<ClientInfo>) -> Result<(), McpError> {
        self.update(session, |s| s.client_info = info);
        Ok(())
    }

    async fn client_capabilities(&self, session: &SessionId) -> Result<Option<ClientCapabilities>, McpError> {
        Ok(self
            .lock()
            .sessions
            .get(session)
            .and_then(|s| s.client_capabilities.clone()))
    }

    async fn set_client_capabilities(
        &self,
        session: &SessionId,
        capabilities: ClientCapabilities,
    ) -> Result<(), McpError> {
        self.update(session, |s| s.client_capabilities = Some(capabilities));
        Ok(())
    }

    async fn protocol_version(&self, session: &SessionId) -> Result<Option<String>, McpError> {
        Ok(self
            .lock()
            .sessions
            .get(session)
            .and_then(|s| s.protocol_version.clone()))
    }

    async fn set_protocol_version(&self, session: &SessionId, version: String) -> Result<(), McpError> {
        self.update(session, |s| s.protocol_version = Some(version));
        Ok(())
    }

    async fn log_level(&self, session: &SessionId) -> Result<Option<LogLevel>, McpError> {
        Ok(self.lock().sessions.get(session).and_then(|s| s.log_level))
    }

    async fn set_log_level(&self, session: &SessionId, level: LogLevel) -> Result<(), McpError> {
        self.update(session, |s| s.log_level = Some(level));
        Ok(())
    }

    async fn sessions(&self) -> Result<Vec<SessionId>, McpError> {
        Ok(self.lock().sessions.keys().cloned().collect())
    }

    async fn subscribers(&self, uri: &str) -> Result<Vec<SessionId>, McpError> {
        Ok(self
            .lock()
            .subscriptions
            .get(uri)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn add_subscriber(&self, uri: &str, session: &SessionId) -> Result<(), McpError> {
        self.lock()
            .subscriptions
            .entry(uri.to_string())
            .or_default()
            .insert(session.clone());
        Ok(())
    }

    async fn remove_subscriber(&self, uri: &str, session: &SessionId) -> Result<(), McpError> {
        let mut inner = self.lock();
        if let Some(set) = inner.subscriptions.get_mut(uri) {
            set.shift_remove(session);
            if set.is_empty() {
                inner.subscriptions.shift_remove(uri);
            }
        }
        Ok(())
    }

    async fn delete(&self, session: &SessionId) -> Result<(), McpError> {
        let mut inner = self.lock();
        inner.sessions.remove(session);
        inner.subscriptions.retain(|_, set| {
            set.shift_remove(session);
            !set.is_empty()
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(name: &str) -> SessionId {
        Some(name.to_string())
    }

    #[tokio::test]
    async fn sessions_are_partitioned() {
        let store = InMemorySessionStore::new();
        store.set_log_level(&id("a"), LogLevel::Error).await.unwrap();
        store.set_protocol_version(&id("b"), "2025-06-18".to_string()).await.unwrap();

        assert_eq!(store.log_level(&id("a")).await.unwrap(), Some(LogLevel::Error));
        assert_eq!(store.log_level(&id("b")).await.unwrap(), None);
        assert_eq!(store.protocol_version(&id("a")).await.unwrap(), None);
        assert_eq!(store.sessions().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn no_session_sentinel_is_a_valid_key() {
        let store = InMemorySessionStore::new();
        store
            .set_client_capabilities(&None, ClientCapabilities::default())
            .await
            .unwrap();
        assert!(store.client_capabilities(&None).await.unwrap().is_some());
        assert!(store.client_capabilities(&id("x")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn subscriptions_keep_order_and_deduplicate() {
        let store = InMemorySessionStore::new();
        store.add_subscriber("file://a", &id("1")).await.unwrap();
        store.add_subscriber("file://a", &id("2")).await.unwrap();
        store.add_subscriber("file://a", &id("1")).await.unwrap();

        assert_eq!(store.subscribers("file://a").await.unwrap(), vec![id("1"), id("2")]);

        store.remove_subscriber("file://a", &id("1")).await.unwrap();
        assert_eq!(store.subscribers("file://a").await.unwrap(), vec![id("2")]);
        assert!(store.subscribers("file://b").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_drops_info_and_subscriptions() {
        let store = InMemorySessionStore::new();
        store.set_log_level(&id("gone"), LogLevel::Debug).await.unwrap();
        store.add_subscriber("file://a", &id("gone")).await.unwrap();
        store.add_subscriber("file://a", &id("stays")).await.unwrap();
        store.add_subscriber("file://b", &id("gone")).await.unwrap();

        store.delete(&id("gone")).await.unwrap();

        assert!(store.info(&id("gone")).is_none());
        assert_eq!(store.subscribers("file://a").await.unwrap(), vec![id("stays")]);
        assert!(store.subscribers("file://b").await.unwrap().is_empty());
    }
}
