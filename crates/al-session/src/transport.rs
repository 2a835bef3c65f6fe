//! Contract with the wire client. Encoding, framing and reconnect backoff
//! all live behind [`AgentTransport`]; this crate only reacts to outcomes.

use al_config::{ProtocolKind, ServerProfile};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::error::SessionError;
use crate::model::{
    ChatMessage, HandshakeResult, ImageAttachment, SessionModes, SessionSummary, SessionUpdate,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub endpoint: String,
    pub headers: Vec<(String, String)>,
    pub protocol: ProtocolKind,
    pub working_directory: PathBuf,
}

impl ConnectRequest {
    pub fn from_profile(profile: &ServerProfile) -> Self {
        Self {
            endpoint: profile.endpoint_url_string(),
            headers: profile.auth_headers(),
            protocol: profile.protocol,
            working_directory: profile.working_directory.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptRequest {
    pub session_id: String,
    pub text: String,
    pub images: Vec<ImageAttachment>,
    /// Server-defined command to run instead of a free-text prompt.
    pub command_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    Refusal,
    Cancelled,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadedSession {
    pub messages: Vec<ChatMessage>,
    pub modes: Option<SessionModes>,
}

/// Lifecycle and session notifications emitted by the wire client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    NetworkAvailabilityChanged(bool),
    /// Link dropped; the transport is retrying on its own schedule.
    ConnectionLost { reason: String },
    /// Link re-established after a loss; a fresh handshake is required.
    Reconnected,
    RetriesExhausted { reason: String },
    AuthenticationFailed { reason: String },
    /// Server closed the connection deliberately.
    Closed,
    SessionUpdate {
        session_id: String,
        update: SessionUpdate,
    },
}

#[async_trait]
pub trait AgentTransport: Send + Sync {
    async fn handshake(&self, request: ConnectRequest) -> Result<HandshakeResult, SessionError>;
    async fn disconnect(&self);
    async fn list_sessions(&self, cwd: &Path) -> Result<Vec<SessionSummary>, SessionError>;
    /// Returns the server-assigned session id.
    async fn new_session(&self, cwd: &Path, mode_id: Option<&str>) -> Result<String, SessionError>;
    async fn load_session(&self, session_id: &str, cwd: &Path) -> Result<LoadedSession, SessionError>;
    /// Resolves when the turn ends; chunks arrive as [`TransportEvent::SessionUpdate`].
    async fn prompt(&self, request: PromptRequest) -> Result<StopReason, SessionError>;
    async fn cancel(&self, session_id: &str) -> Result<(), SessionError>;
    async fn delete_session(&self, session_id: &str) -> Result<(), SessionError>;
}
