use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Prefix for identifiers synthesized locally before the server assigns one.
pub const PLACEHOLDER_PREFIX: &str = "pending-";

pub fn is_placeholder_id(session_id: &str) -> bool {
    session_id.starts_with(PLACEHOLDER_PREFIX)
}

pub(crate) fn generate_placeholder_id() -> String {
    format!("{}{}", PLACEHOLDER_PREFIX, uuid::Uuid::new_v4())
}

/// Capabilities the server announced during the handshake.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentProfile {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub protocol_version: u32,
    pub supports_load_session: bool,
    pub supports_images: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentModeOption {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResult {
    pub agent: AgentProfile,
    pub modes: Vec<AgentModeOption>,
    pub default_mode_id: Option<String>,
}

impl HandshakeResult {
    /// The server's default if it names an advertised mode, otherwise the
    /// first advertised mode.
    pub fn resolved_default_mode(&self) -> Option<String> {
        if let Some(requested) = &self.default_mode_id {
            if self.modes.iter().any(|m| &m.id == requested) {
                return Some(requested.clone());
            }
            tracing::warn!(
                mode_id = %requested,
                available = self.modes.len(),
                "server default mode is not in the advertised mode list, falling back",
            );
        }
        self.modes.first().map(|m| m.id.clone())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionModes {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_mode_id: Option<String>,
    #[serde(default)]
    pub available: Vec<AgentModeOption>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    Thought,
    Tool,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageAttachment {
    pub mime_type: String,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<ImageAttachment>,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            images: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_images(mut self, images: Vec<ImageAttachment>) -> Self {
        self.images = images;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionSummary {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub is_pending: bool,
}

/// Incremental change to a session, tagged by the transport with its id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionUpdate {
    AgentMessageChunk { text: String },
    AgentThoughtChunk { text: String },
    UserMessage { text: String },
    ToolCall { tool_call_id: String, title: String },
    CurrentModeChanged { mode_id: String },
    TitleChanged { title: String },
}

/// Live, registry-owned state of one session.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub session_id: String,
    pub title: Option<String>,
    pub cwd: PathBuf,
    pub is_streaming: bool,
    pub is_pending: bool,
    pub messages: Vec<ChatMessage>,
    pub modes: SessionModes,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionState {
    pub fn new(session_id: impl Into<String>, cwd: PathBuf, modes: SessionModes) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            title: None,
            cwd,
            is_streaming: false,
            is_pending: false,
            messages: Vec::new(),
            modes,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn pending(session_id: impl Into<String>, cwd: PathBuf, modes: SessionModes) -> Self {
        let mut state = Self::new(session_id, cwd, modes);
        state.is_pending = true;
        state
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.session_id.clone(),
            title: self.title.clone(),
            cwd: Some(self.cwd.clone()),
            updated_at: self.updated_at,
            is_pending: self.is_pending,
        }
    }

    /// Applies one update. Returns true when the message buffer changed.
    pub fn apply_update(&mut self, update: SessionUpdate) -> bool {
        self.updated_at = Utc::now();
        match update {
            SessionUpdate::AgentMessageChunk { text } => {
                self.append_chunk(MessageRole::Assistant, &text);
                true
            }
            SessionUpdate::AgentThoughtChunk { text } => {
                self.append_chunk(MessageRole::Thought, &text);
                true
            }
            SessionUpdate::UserMessage { text } => {
                self.messages.push(ChatMessage::new(MessageRole::User, text));
                true
            }
            SessionUpdate::ToolCall {
                tool_call_id,
                title,
            } => {
                let mut message = ChatMessage::new(MessageRole::Tool, title);
                message.id = tool_call_id;
                self.messages.push(message);
                true
            }
            SessionUpdate::CurrentModeChanged { mode_id } => {
                self.modes.current_mode_id = Some(mode_id);
                false
            }
            SessionUpdate::TitleChanged { title } => {
                self.title = Some(title);
                false
            }
        }
    }

    // Chunks extend the trailing message of the same role while a response
    // is streaming; anything else starts a new message.
    fn append_chunk(&mut self, role: MessageRole, text: &str) {
        if self.is_streaming {
            if let Some(last) = self.messages.last_mut() {
                if last.role == role {
                    tracing::trace!(session_id = %self.session_id, len = text.len(), "appending chunk");
                    last.content.push_str(text);
                    return;
                }
            }
        }
        self.messages.push(ChatMessage::new(role, text));
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mode(id: &str) -> AgentModeOption {
        AgentModeOption {
            id: id.to_string(),
            name: id.to_uppercase(),
            description: None,
        }
    }

    fn handshake(modes: Vec<AgentModeOption>, default: Option<&str>) -> HandshakeResult {
        HandshakeResult {
            agent: AgentProfile::default(),
            modes,
            default_mode_id: default.map(str::to_string),
        }
    }

    // ── resolved_default_mode ────────────────────────────────────────

    #[test]
    fn default_mode_used_when_advertised() {
        let h = handshake(vec![mode("ask"), mode("code")], Some("code"));
        assert_eq!(h.resolved_default_mode(), Some("code".to_string()));
    }

    #[test]
    fn default_mode_falls_back_to_first_when_absent() {
        let h = handshake(vec![mode("ask"), mode("code")], Some("architect"));
        assert_eq!(h.resolved_default_mode(), Some("ask".to_string()));
    }

    #[test]
    fn default_mode_falls_back_when_unset() {
        let h = handshake(vec![mode("ask")], None);
        assert_eq!(h.resolved_default_mode(), Some("ask".to_string()));
    }

    #[test]
    fn default_mode_none_without_modes() {
        let h = handshake(vec![], Some("code"));
        assert_eq!(h.resolved_default_mode(), None);
    }

    // ── placeholder ids ──────────────────────────────────────────────

    #[test]
    fn placeholder_ids_are_unique_and_recognised() {
        let a = generate_placeholder_id();
        let b = generate_placeholder_id();
        assert_ne!(a, b);
        assert!(is_placeholder_id(&a));
        assert!(!is_placeholder_id("sess_123"));
    }

    // ── apply_update ─────────────────────────────────────────────────

    #[test]
    fn chunks_merge_while_streaming() {
        let mut state = SessionState::new("s1", PathBuf::from("/tmp"), SessionModes::default());
        state.is_streaming = true;
        state.apply_update(SessionUpdate::AgentMessageChunk {
            text: "Hel".to_string(),
        });
        state.apply_update(SessionUpdate::AgentMessageChunk {
            text: "lo".to_string(),
        });
        assert_eq!(state.messages.len(), 1);
        assert_eq!(state.messages[0].content, "Hello");
        assert_eq!(state.messages[0].role, MessageRole::Assistant);
    }

    #[test]
    fn role_change_starts_new_message() {
        let mut state = SessionState::new("s1", PathBuf::from("/tmp"), SessionModes::default());
        state.is_streaming = true;
        state.apply_update(SessionUpdate::AgentThoughtChunk {
            text: "thinking".to_string(),
        });
        state.apply_update(SessionUpdate::AgentMessageChunk {
            text: "answer".to_string(),
        });
        assert_eq!(state.messages.len(), 2);
        assert_eq!(state.messages[0].role, MessageRole::Thought);
    }

    #[test]
    fn chunks_do_not_merge_when_idle() {
        let mut state = SessionState::new("s1", PathBuf::from("/tmp"), SessionModes::default());
        state.apply_update(SessionUpdate::AgentMessageChunk {
            text: "a".to_string(),
        });
        state.apply_update(SessionUpdate::AgentMessageChunk {
            text: "b".to_string(),
        });
        assert_eq!(state.messages.len(), 2);
    }

    #[test]
    fn mode_and_title_updates_leave_messages_alone() {
        let mut state = SessionState::new("s1", PathBuf::from("/tmp"), SessionModes::default());
        assert!(!state.apply_update(SessionUpdate::CurrentModeChanged {
            mode_id: "code".to_string()
        }));
        assert!(!state.apply_update(SessionUpdate::TitleChanged {
            title: "Fix tests".to_string()
        }));
        assert!(state.messages.is_empty());
        assert_eq!(state.modes.current_mode_id.as_deref(), Some("code"));
        assert_eq!(state.summary().title.as_deref(), Some("Fix tests"));
    }

    #[test]
    fn tool_call_keeps_its_id() {
        let mut state = SessionState::new("s1", PathBuf::from("/tmp"), SessionModes::default());
        state.apply_update(SessionUpdate::ToolCall {
            tool_call_id: "call_1".to_string(),
            title: "Read file".to_string(),
        });
        assert_eq!(state.messages[0].id, "call_1");
        assert_eq!(state.messages[0].role, MessageRole::Tool);
    }

    // ── serialization ────────────────────────────────────────────────

    #[test]
    fn image_data_serializes_as_base64() {
        let message = ChatMessage::new(MessageRole::User, "look").with_images(vec![
            ImageAttachment {
                mime_type: "image/png".to_string(),
                data: vec![0x89, b'P', b'N', b'G'],
            },
        ]);
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["images"][0]["data"], "iVBORw==");
        let back: ChatMessage = serde_json::from_value(value).unwrap();
        assert_eq!(back.images[0].data, vec![0x89, b'P', b'N', b'G']);
    }

    #[test]
    fn message_without_images_omits_field() {
        let message = ChatMessage::new(MessageRole::Assistant, "hi");
        let json = serde_json::to_string(&message).unwrap();
        assert!(!json.contains("images"));
        assert!(json.contains("\"role\":\"assistant\""));
    }

    #[test]
    fn pending_state_summary_is_pending() {
        let state = SessionState::pending("pending-1", PathBuf::from("/w"), SessionModes::default());
        let summary = state.summary();
        assert!(summary.is_pending);
        assert_eq!(summary.cwd, Some(PathBuf::from("/w")));
    }
}
