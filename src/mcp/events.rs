//! Lifecycle events and the listener list behind `McpServer::on`.
//!
//! Events are delivered synchronously, in subscription order, on the task
//! that raised them. Callbacks run without any engine lock held, so they may
//! call back into the server (though not `.await` on it).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde_json::Value;

use crate::mcp::session::SessionId;
use crate::mcp::types::{InitializeParams, LogLevel};

/// Which event a listener wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A client completed protocol negotiation.
    Initialize,
    /// The engine has a message for one or more sessions.
    Send,
    /// A client changed its log level.
    LogLevelChange,
    /// A client subscribed to a resource.
    Subscription,
}

/// Where an outbound message should go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendTarget {
    /// Every connected session.
    Broadcast,
    /// Only these sessions.
    Sessions(Vec<SessionId>),
}

impl SendTarget {
    /// Whether `session` is among the recipients.
    #[must_use]
    pub fn includes(&self, session: &SessionId) -> bool {
        match self {
            Self::Broadcast => true,
            Self::Sessions(sessions) => sessions.contains(session),
        }
    }
}

/// An event raised by the engine.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// Negotiation succeeded.
    Initialize {
        /// Session that initialised.
        session_id: SessionId,
        /// Agreed protocol version.
        protocol_version: String,
        /// What the client sent.
        params: InitializeParams,
    },
    /// Outbound JSON-RPC message (notification or server-initiated request).
    Send {
        /// The serialised message.
        message: Value,
        /// Recipients.
        target: SendTarget,
    },
    /// `logging/setLevel` was handled.
    LogLevelChange {
        /// Session that changed its level.
        session_id: SessionId,
        /// New level.
        level: LogLevel,
    },
    /// `resources/subscribe` was handled.
    Subscription {
        /// Subscribing session.
        session_id: SessionId,
        /// Subscribed URI.
        uri: String,
    },
}

impl ServerEvent {
    /// The kind of this event.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Initialize { .. } => EventKind::Initialize,
            Self::Send { .. } => EventKind::Send,
            Self::LogLevelChange { .. } => EventKind::LogLevelChange,
            Self::Subscription { .. } => EventKind::Subscription,
        }
    }
}

/// Listener callback.
pub type EventCallback = Arc<dyn Fn(&ServerEvent) + Send + Sync>;

/// Options for `McpServer::on_with`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ListenOptions {
    /// Remove the listener after its first delivery.
    pub once: bool,
}

struct Subscriber {
    id: u64,
    kind: EventKind,
    once: bool,
    callback: EventCallback,
}

/// Ordered listener list shared by all clones of a server.
#[derive(Default)]
pub(crate) struct EventBus {
    next_id: AtomicU64,
    subscribers: Mutex<Vec<Subscriber>>,
}

impl EventBus {
    fn lock(&self) -> MutexGuard<'_, Vec<Subscriber>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe(self: &Arc<Self>, kind: EventKind, options: ListenOptions, callback: EventCallback) -> Listener {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().push(Subscriber {
            id,
            kind,
            once: options.once,
            callback,
        });
        Listener {
            id,
            bus: Arc::downgrade(self),
        }
    }

    fn remove(&self, id: u64) -> bool {
        let mut subscribers = self.lock();
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        subscribers.len() != before
    }

    pub fn emit(&self, event: &ServerEvent) {
        let kind = event.kind();
        let callbacks: Vec<EventCallback> = {
            let mut subscribers = self.lock();
            let callbacks = subscribers
                .iter()
                .filter(|s| s.kind == kind)
                .map(|s| Arc::clone(&s.callback))
                .collect();
            subscribers.retain(|s| !(s.once && s.kind == kind));
            callbacks
        };

        for callback in callbacks {
            callback(event);
        }
    }
}

/// Handle to a registered listener.
///
/// Dropping the handle keeps the listener registered; call
/// [`Listener::unsubscribe`] to remove it.
#[derive(Debug)]
pub struct Listener {
    id: u64,
    bus: Weak<EventBus>,
}

impl Listener {
    /// Removes the listener. Returns `false` if it was already gone.
    #[allow(clippy::must_use_candidate)]
    pub fn unsubscribe(self) -> bool {
        self.bus.upgrade().is_some_and(|bus| bus.remove(self.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder(
        bus: &Arc<EventBus>,
        kind: EventKind,
        tag: &'static str,
        log: &Arc<Mutex<Vec<&'static str>>>,
    ) -> Listener {
        let log = Arc::clone(log);
        bus.subscribe(
            kind,
            ListenOptions::default(),
            Arc::new(move |_: &ServerEvent| log.lock().unwrap().push(tag)),
        )
    }

    fn send_event() -> ServerEvent {
        ServerEvent::Send {
            message: Value::Null,
            target: SendTarget::Broadcast,
        }
    }

    #[test]
    fn delivers_in_subscription_order_by_kind() {
        let bus = Arc::new(EventBus::default());
        let log = Arc::new(Mutex::new(Vec::new()));
        let _a = recorder(&bus, EventKind::Send, "a", &log);
        let _b = recorder(&bus, EventKind::Subscription, "b", &log);
        let _c = recorder(&bus, EventKind::Send, "c", &log);

        bus.emit(&send_event());
        assert_eq!(*log.lock().unwrap(), vec!["a", "c"]);
    }

    #[test]
    fn unsubscribe_is_independent() {
        let bus = Arc::new(EventBus::default());
        let log = Arc::new(Mutex::new(Vec::new()));
        let a = recorder(&bus, EventKind::Send, "a", &log);
        let _b = recorder(&bus, EventKind::Send, "b", &log);

        assert!(a.unsubscribe());
        bus.emit(&send_event());
        assert_eq!(*log.lock().unwrap(), vec!["b"]);
    }

    #[test]
    fn once_listeners_fire_once() {
        let bus = Arc::new(EventBus::default());
        let count = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&count);
        let listener = bus.subscribe(
            EventKind::Send,
            ListenOptions { once: true },
            Arc::new(move |_: &ServerEvent| {
                counter.fetch_add(1, Ordering::Relaxed);
            }),
        );

        bus.emit(&send_event());
        bus.emit(&send_event());
        assert_eq!(count.load(Ordering::Relaxed), 1);
        assert!(!listener.unsubscribe());
    }

    #[test]
    fn send_target_membership() {
        let target = SendTarget::Sessions(vec![Some("a".into()), None]);
        assert!(target.includes(&Some("a".into())));
        assert!(target.includes(&None));
        assert!(!target.includes(&Some("b".into())));
        assert!(SendTarget::Broadcast.includes(&Some("z".into())));
    }
}
