pub mod cache;
pub mod connection;
pub mod delegate;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod model;
pub mod registry;
pub mod transport;

pub use cache::{CacheDelegate, SessionCache};
pub use connection::{ConnectionController, ConnectionState, ConnectionStatus};
pub use error::SessionError;
pub use events::{BroadcastEvents, EventDelegate, SessionEvent};
pub use lifecycle::{
    BackgroundHost, BackgroundLifecycleBridge, BackgroundOutcome, BackgroundTaskHandle,
    DeadlineHost, ExpirationHandler,
};
pub use model::{
    is_placeholder_id, AgentModeOption, AgentProfile, ChatMessage, HandshakeResult,
    ImageAttachment, MessageRole, SessionModes, SessionState, SessionSummary, SessionUpdate,
};
pub use registry::SessionRegistry;
pub use transport::{
    AgentTransport, ConnectRequest, LoadedSession, PromptRequest, StopReason, TransportEvent,
};
