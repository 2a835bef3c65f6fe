#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("Network unavailable")]
    NetworkUnavailable,
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),
    #[error("Session not found: {0}")]
    SessionNotFound(String),
    #[error("No active session")]
    NoActiveSession,
    #[error("Session {from} already migrated or unknown (target {to})")]
    DuplicateMigration { from: String, to: String },
    #[error("Cache read failed: {0}")]
    CacheReadFailure(String),
    #[error("Cache write failed: {0}")]
    CacheWriteFailure(String),
    #[error("A response is already streaming for session {0}")]
    PromptInFlight(String),
    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),
    #[error("Transport error: {0}")]
    Transport(String),
}

impl SessionError {
    pub fn error_code(&self) -> &'static str {
        match self {
            SessionError::NetworkUnavailable => "NETWORK_UNAVAILABLE",
            SessionError::HandshakeFailed(_) => "HANDSHAKE_FAILED",
            SessionError::SessionNotFound(_) => "SESSION_NOT_FOUND",
            SessionError::NoActiveSession => "NO_ACTIVE_SESSION",
            SessionError::DuplicateMigration { .. } => "DUPLICATE_MIGRATION",
            SessionError::CacheReadFailure(_) => "CACHE_READ_FAILURE",
            SessionError::CacheWriteFailure(_) => "CACHE_WRITE_FAILURE",
            SessionError::PromptInFlight(_) => "PROMPT_IN_FLIGHT",
            SessionError::StreamInterrupted(_) => "STREAM_INTERRUPTED",
            SessionError::Transport(_) => "TRANSPORT_ERROR",
        }
    }

    /// Warning-level conditions are reported but never treated as failures.
    pub fn is_warning(&self) -> bool {
        matches!(self, SessionError::DuplicateMigration { .. })
    }
}

impl From<al_store::StoreError> for SessionError {
    fn from(err: al_store::StoreError) -> Self {
        SessionError::CacheReadFailure(err.to_string())
    }
}
