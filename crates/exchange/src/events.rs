use hlkit_core::HlError;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Lifecycle and traffic notifications published by a connection.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Open,
    Message(Value),
    Close { code: Option<u16>, reason: String },
    Error(String),
    /// The connection was re-established; `attempt` is the attempt that succeeded.
    Reconnect { attempt: u32 },
    /// Terminal: the retry budget is spent and no further attempts are scheduled.
    MaxReconnectAttemptsReached { attempts: u32 },
}

impl ConnectionEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ConnectionEvent::Open => EventKind::Open,
            ConnectionEvent::Message(_) => EventKind::Message,
            ConnectionEvent::Close { .. } => EventKind::Close,
            ConnectionEvent::Error(_) => EventKind::Error,
            ConnectionEvent::Reconnect { .. } => EventKind::Reconnect,
            ConnectionEvent::MaxReconnectAttemptsReached { .. } => EventKind::MaxReconnectAttemptsReached,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Open,
    Message,
    Close,
    Error,
    Reconnect,
    MaxReconnectAttemptsReached,
}

impl EventKind {
    pub const ALL: [EventKind; 6] = [
        EventKind::Open,
        EventKind::Message,
        EventKind::Close,
        EventKind::Error,
        EventKind::Reconnect,
        EventKind::MaxReconnectAttemptsReached,
    ];
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::Open => "open",
            EventKind::Message => "message",
            EventKind::Close => "close",
            EventKind::Error => "error",
            EventKind::Reconnect => "reconnect",
            EventKind::MaxReconnectAttemptsReached => "maxReconnectAttemptsReached",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for EventKind {
    type Err = HlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .into_iter()
            .find(|kind| kind.to_string() == s)
            .ok_or_else(|| HlError::InvalidData(format!("Unknown event name: {}", s)))
    }
}

pub type ListenerId = u64;
pub type EventListener = Arc<dyn Fn(&ConnectionEvent) + Send + Sync>;

/// Multi-listener event surface keyed by [`EventKind`].
///
/// Listeners run on the emitting task, outside the registry lock, so a listener may
/// register or remove listeners while handling an event.
#[derive(Default)]
pub struct EventEmitter {
    listeners: RwLock<HashMap<EventKind, Vec<(ListenerId, EventListener)>>>,
    next_id: AtomicU64,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&ConnectionEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .write()
            .entry(kind)
            .or_default()
            .push((id, Arc::new(listener)));
        id
    }

    pub fn off(&self, kind: EventKind, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        match listeners.get_mut(&kind) {
            Some(list) => {
                let before = list.len();
                list.retain(|(listener_id, _)| *listener_id != id);
                before != list.len()
            }
            None => false,
        }
    }

    pub fn remove_all(&self, kind: EventKind) {
        self.listeners.write().remove(&kind);
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners.read().get(&kind).map_or(0, Vec::len)
    }

    pub fn emit(&self, event: &ConnectionEvent) {
        let snapshot: Vec<EventListener> = match self.listeners.read().get(&event.kind()) {
            Some(list) => list.iter().map(|(_, listener)| Arc::clone(listener)).collect(),
            None => return,
        };

        for listener in snapshot {
            listener(event);
        }
    }
}

impl fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let listeners = self.listeners.read();
        let counts: HashMap<String, usize> = listeners
            .iter()
            .map(|(kind, list)| (kind.to_string(), list.len()))
            .collect();
        f.debug_struct("EventEmitter").field("listeners", &counts).finish()
    }
}
