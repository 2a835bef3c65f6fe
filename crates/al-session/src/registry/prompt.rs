use std::path::PathBuf;

use super::SessionRegistry;
use crate::error::SessionError;
use crate::events::SessionEvent;
use crate::model::{
    generate_placeholder_id, ChatMessage, ImageAttachment, MessageRole, SessionState,
    SessionUpdate,
};
use crate::transport::{PromptRequest, StopReason};

impl SessionRegistry {
    /// Inserts a pending session under a fresh placeholder id, activates it
    /// and asks the server for a real one in the background. The returned
    /// id stays valid until the confirmation migrates it.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn send_new_session(&self, cwd: PathBuf) -> String {
        let placeholder = generate_placeholder_id();
        let mode_id = {
            let mut state = self.write_state();
            let modes = state.new_session_modes();
            let mode_id = modes.current_mode_id.clone();
            let session = SessionState::pending(placeholder.clone(), cwd.clone(), modes);
            state.summaries.insert(0, session.summary());
            state.sessions.insert(placeholder.clone(), session);
            state.pending_order.push(placeholder.clone());
            state.active_session_id = Some(placeholder.clone());
            mode_id
        };
        self.persist_summaries();
        tracing::info!(placeholder = %placeholder, cwd = %cwd.display(), "requesting new session");
        self.emit(SessionEvent::ActiveSessionChanged {
            session_id: Some(placeholder.clone()),
        });

        let registry = self.clone();
        let pending_id = placeholder.clone();
        tokio::spawn(async move {
            match registry
                .transport
                .new_session(&cwd, mode_id.as_deref())
                .await
            {
                Ok(resolved) => registry.confirm_new_session(&pending_id, &resolved),
                Err(err) => registry.abandon_placeholder(&pending_id, err),
            }
        });
        placeholder
    }

    fn abandon_placeholder(&self, placeholder: &str, error: SessionError) {
        let (removed, was_active) = {
            let mut state = self.write_state();
            let removed = state.sessions.remove(placeholder).is_some();
            state.pending_order.retain(|id| id != placeholder);
            state.summaries.retain(|s| s.session_id != placeholder);
            let was_active = state.active_session_id.as_deref() == Some(placeholder);
            if was_active {
                state.active_session_id = None;
            }
            (removed, was_active)
        };
        if removed {
            self.persist_summaries();
            self.emit(SessionEvent::SessionRemoved {
                session_id: placeholder.to_string(),
            });
        }
        if was_active {
            self.emit(SessionEvent::ActiveSessionChanged { session_id: None });
        }
        self.report(Some(placeholder), error);
    }

    /// Activates a session, seeding its buffer from the cache when it is not
    /// live yet. Protocols that need an explicit load fetch history for
    /// sessions that still have none.
    pub async fn open_session(&self, session_id: &str) -> Result<(), SessionError> {
        let needs_history = match self.session(session_id) {
            Some(session) => session.messages.is_empty() && !session.is_pending,
            None => {
                let (cwd, title) = self
                    .read_state()
                    .summaries
                    .iter()
                    .find(|s| s.session_id == session_id)
                    .map(|s| (s.cwd.clone(), s.title.clone()))
                    .unwrap_or_default();
                let cached = self
                    .cache_delegate()
                    .and_then(|cache| match cache.load_messages(session_id) {
                        Ok(messages) => messages,
                        Err(err) => {
                            tracing::warn!(session_id, error = %err, "failed to read cached messages");
                            None
                        }
                    })
                    .unwrap_or_default();
                let seeded = !cached.is_empty();
                self.set_active_session(session_id, cwd, None);
                let mut state = self.write_state();
                if let Some(session) = state.sessions.get_mut(session_id) {
                    session.title = title;
                    session.messages = cached;
                }
                !seeded
            }
        };
        self.set_active_session(session_id, None, None);

        if needs_history && self.connected_protocol().requires_explicit_load() {
            return self.send_load_session(session_id).await;
        }
        Ok(())
    }

    /// Requests server-side history for a session. A no-op for protocols
    /// that load on selection.
    pub async fn send_load_session(&self, session_id: &str) -> Result<(), SessionError> {
        if !self.connected_protocol().requires_explicit_load() {
            tracing::debug!(session_id, "protocol loads on selection, skipping explicit load");
            return Ok(());
        }
        let Some(cwd) = self.session(session_id).map(|s| s.cwd) else {
            let err = SessionError::SessionNotFound(session_id.to_string());
            self.report(Some(session_id), err.clone());
            return Err(err);
        };

        let loaded = match self.transport.load_session(session_id, &cwd).await {
            Ok(loaded) => loaded,
            Err(err) => {
                self.report(Some(session_id), err.clone());
                return Err(err);
            }
        };

        let messages = {
            let mut state = self.write_state();
            match state.sessions.get_mut(session_id) {
                Some(session) => {
                    if !loaded.messages.is_empty() {
                        session.messages = loaded.messages;
                    }
                    if let Some(modes) = loaded.modes {
                        session.modes = modes;
                    }
                    Some(session.messages.clone())
                }
                None => None,
            }
        };
        let Some(messages) = messages else {
            tracing::warn!(session_id, "session removed while loading, dropping history");
            return Ok(());
        };
        tracing::debug!(session_id, count = messages.len(), "session history loaded");
        self.persist_messages(session_id, &messages);
        self.emit(SessionEvent::MessagesUpdated {
            session_id: session_id.to_string(),
        });
        Ok(())
    }

    /// Sends a prompt to the active session. The reply streams in through
    /// [`SessionRegistry::apply_session_update`]; this returns once the
    /// request is dispatched.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn send_prompt(
        &self,
        text: &str,
        images: Vec<ImageAttachment>,
        command_name: Option<&str>,
    ) -> Result<(), SessionError> {
        let dispatched = {
            let mut state = self.write_state();
            let session = match state.active_session_id.clone() {
                Some(id) => state.sessions.get_mut(&id),
                None => None,
            };
            match session {
                None => Err(SessionError::NoActiveSession),
                Some(session) if session.is_pending => Err(SessionError::NoActiveSession),
                Some(session) if session.is_streaming => {
                    Err(SessionError::PromptInFlight(session.session_id.clone()))
                }
                Some(session) => {
                    let shown = match command_name {
                        Some(command) if text.is_empty() => format!("/{command}"),
                        Some(command) => format!("/{command} {text}"),
                        None => text.to_string(),
                    };
                    session
                        .messages
                        .push(ChatMessage::new(MessageRole::User, shown).with_images(images.clone()));
                    session.is_streaming = true;
                    session.updated_at = chrono::Utc::now();
                    Ok(session.session_id.clone())
                }
            }
        };
        let session_id = match dispatched {
            Ok(session_id) => session_id,
            Err(err) => {
                let active = self.active_session_id();
                self.report(active.as_deref(), err.clone());
                return Err(err);
            }
        };

        self.emit(SessionEvent::MessagesUpdated {
            session_id: session_id.clone(),
        });
        self.emit(SessionEvent::StreamingChanged {
            session_id: session_id.clone(),
            is_streaming: true,
        });

        let request = PromptRequest {
            session_id: session_id.clone(),
            text: text.to_string(),
            images,
            command_name: command_name.map(str::to_string),
        };
        let registry = self.clone();
        let stream_id = session_id.clone();
        // Held across the spawn so a reply that lands at once cannot run
        // `finish_stream` before the handle is registered.
        let mut streams = self.streams.lock().unwrap_or_else(|e| e.into_inner());
        let handle = tokio::spawn(async move {
            let result = registry.transport.prompt(request).await;
            registry.finish_stream(&stream_id, result);
        });
        streams.insert(session_id, handle);
        Ok(())
    }

    fn finish_stream(&self, session_id: &str, result: Result<StopReason, SessionError>) {
        self.streams
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(session_id);

        let messages = {
            let mut state = self.write_state();
            let messages = state.sessions.get_mut(session_id).map(|session| {
                session.is_streaming = false;
                session.updated_at = chrono::Utc::now();
                session.messages.clone()
            });
            if messages.is_some() {
                let now = chrono::Utc::now();
                if let Some(summary) = state
                    .summaries
                    .iter_mut()
                    .find(|s| s.session_id == session_id)
                {
                    summary.updated_at = now;
                }
            }
            messages
        };
        let Some(messages) = messages else {
            tracing::debug!(session_id, "stream finished for a removed session");
            return;
        };

        self.persist_messages(session_id, &messages);
        self.persist_summaries();
        self.emit(SessionEvent::StreamingChanged {
            session_id: session_id.to_string(),
            is_streaming: false,
        });

        match result {
            Ok(stop_reason) => {
                tracing::debug!(session_id, ?stop_reason, "prompt turn finished");
            }
            Err(err) => {
                let err = match err {
                    SessionError::StreamInterrupted(_) => err,
                    other => SessionError::StreamInterrupted(other.to_string()),
                };
                self.report(Some(session_id), err);
            }
        }
    }

    /// Asks the server to stop the active session's turn. Streaming clears
    /// when the turn actually ends.
    pub async fn cancel_prompt(&self) -> Result<(), SessionError> {
        let Some(session) = self.active_session() else {
            return Err(SessionError::NoActiveSession);
        };
        if !session.is_streaming {
            return Ok(());
        }
        tracing::info!(session_id = %session.session_id, "cancelling prompt");
        self.transport.cancel(&session.session_id).await.map_err(|err| {
            self.report(Some(&session.session_id), err.clone());
            err
        })
    }

    /// Applies a transport notification to the session it names. Updates
    /// for sessions the registry no longer holds are dropped.
    pub fn apply_session_update(&self, session_id: &str, update: SessionUpdate) {
        let title = match &update {
            SessionUpdate::TitleChanged { title } => Some(title.clone()),
            _ => None,
        };
        let changed = {
            let mut state = self.write_state();
            let Some(session) = state.sessions.get_mut(session_id) else {
                tracing::debug!(session_id, "update for unknown session dropped");
                return;
            };
            let changed = session.apply_update(update);
            if let Some(title) = title {
                if let Some(summary) = state
                    .summaries
                    .iter_mut()
                    .find(|s| s.session_id == session_id)
                {
                    summary.title = Some(title);
                }
            }
            changed
        };
        if changed {
            self.emit(SessionEvent::MessagesUpdated {
                session_id: session_id.to_string(),
            });
        }
    }
}
