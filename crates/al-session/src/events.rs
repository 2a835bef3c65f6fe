use tokio::sync::broadcast;

use crate::connection::ConnectionState;
use crate::error::SessionError;

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    ConnectionStateChanged(ConnectionState),
    MessagesUpdated {
        session_id: String,
    },
    StreamingChanged {
        session_id: String,
        is_streaming: bool,
    },
    ActiveSessionChanged {
        session_id: Option<String>,
    },
    SessionMigrated {
        from: String,
        to: String,
    },
    SessionRemoved {
        session_id: String,
    },
    SessionListUpdated {
        count: usize,
    },
    /// Session-scoped failures and warnings. Never alters connection state.
    Error {
        session_id: Option<String>,
        error: SessionError,
    },
}

pub trait EventDelegate: Send + Sync {
    fn on_event(&self, event: &SessionEvent);
}

/// Fans events out to any number of async readers.
pub struct BroadcastEvents {
    tx: broadcast::Sender<SessionEvent>,
}

impl BroadcastEvents {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastEvents {
    fn default() -> Self {
        Self::new(512)
    }
}

impl EventDelegate for BroadcastEvents {
    fn on_event(&self, event: &SessionEvent) {
        let _ = self.tx.send(event.clone());
    }
}
