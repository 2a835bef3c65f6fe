mod prompt;
mod reconcile;

use al_config::{ProtocolKind, ServerProfile};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use tokio::task::JoinHandle;

use crate::cache::CacheDelegate;
use crate::delegate::DelegateSlot;
use crate::error::SessionError;
use crate::events::{EventDelegate, SessionEvent};
use crate::model::{
    AgentModeOption, AgentProfile, ChatMessage, SessionModes, SessionState, SessionSummary,
};
use crate::transport::AgentTransport;

use reconcile::InFlightFetch;

#[derive(Default)]
pub(crate) struct RegistryState {
    pub sessions: HashMap<String, SessionState>,
    /// Live placeholder ids, oldest first.
    pub pending_order: Vec<String>,
    /// Placeholders a server list migrated before their confirmation came
    /// back, mapped to the id the list picked.
    pub list_claims: HashMap<String, String>,
    pub active_session_id: Option<String>,
    pub summaries: Vec<SessionSummary>,
    pub agent: Option<AgentProfile>,
    pub protocol: ProtocolKind,
    pub available_modes: Vec<AgentModeOption>,
    pub default_mode_id: Option<String>,
}

impl RegistryState {
    fn new_session_modes(&self) -> SessionModes {
        SessionModes {
            current_mode_id: self.default_mode_id.clone(),
            available: self.available_modes.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub flushed: usize,
    pub interrupted: bool,
}

/// Owns every live session for one server profile.
///
/// State sits behind a single lock so mutations never interleave; network
/// round trips always happen with the lock released. Cloning yields another
/// handle onto the same registry.
#[derive(Clone)]
pub struct SessionRegistry {
    pub(crate) profile_id: Arc<str>,
    pub(crate) working_directory: Arc<PathBuf>,
    pub(crate) transport: Arc<dyn AgentTransport>,
    pub(crate) state: Arc<RwLock<RegistryState>>,
    pub(crate) streams: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
    pub(crate) list_fetch: Arc<Mutex<Option<InFlightFetch>>>,
    pub(crate) fetch_generation: Arc<AtomicU64>,
    cache: Arc<DelegateSlot<dyn CacheDelegate>>,
    events: Arc<DelegateSlot<dyn EventDelegate>>,
}

impl SessionRegistry {
    pub fn new(profile: &ServerProfile, transport: Arc<dyn AgentTransport>) -> Self {
        let state = RegistryState {
            protocol: profile.protocol,
            ..RegistryState::default()
        };
        Self {
            profile_id: Arc::from(profile.id.to_string()),
            working_directory: Arc::new(profile.working_directory.clone()),
            transport,
            state: Arc::new(RwLock::new(state)),
            streams: Arc::new(Mutex::new(HashMap::new())),
            list_fetch: Arc::new(Mutex::new(None)),
            fetch_generation: Arc::new(AtomicU64::new(0)),
            cache: Arc::new(DelegateSlot::new()),
            events: Arc::new(DelegateSlot::new()),
        }
    }

    pub fn profile_id(&self) -> &str {
        &self.profile_id
    }

    pub fn set_cache_delegate(&self, delegate: Weak<dyn CacheDelegate>) {
        self.cache.set(delegate);
    }

    pub fn set_event_delegate(&self, delegate: Weak<dyn EventDelegate>) {
        self.events.set(delegate);
    }

    pub(crate) fn cache_delegate(&self) -> Option<Arc<dyn CacheDelegate>> {
        self.cache.get()
    }

    pub(crate) fn read_state(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn write_state(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        if let Some(delegate) = self.events.get() {
            delegate.on_event(&event);
        }
    }

    pub(crate) fn report(&self, session_id: Option<&str>, error: SessionError) {
        if error.is_warning() {
            tracing::warn!(session_id = ?session_id, error = %error, "session warning");
        } else {
            tracing::error!(session_id = ?session_id, error = %error, "session operation failed");
        }
        self.emit(SessionEvent::Error {
            session_id: session_id.map(str::to_string),
            error,
        });
    }

    // ── snapshots ────────────────────────────────────────────────────

    pub fn session_summaries(&self) -> Vec<SessionSummary> {
        self.read_state().summaries.clone()
    }

    pub fn session(&self, session_id: &str) -> Option<SessionState> {
        self.read_state().sessions.get(session_id).cloned()
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.read_state().sessions.contains_key(session_id)
    }

    pub fn session_count(&self) -> usize {
        self.read_state().sessions.len()
    }

    pub fn session_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.read_state().sessions.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn active_session_id(&self) -> Option<String> {
        self.read_state().active_session_id.clone()
    }

    pub fn active_session(&self) -> Option<SessionState> {
        let state = self.read_state();
        state
            .active_session_id
            .as_ref()
            .and_then(|id| state.sessions.get(id))
            .cloned()
    }

    /// True while the active session is still waiting for its server id.
    pub fn is_pending_session(&self) -> bool {
        self.active_session().is_some_and(|s| s.is_pending)
    }

    pub fn pending_session_count(&self) -> usize {
        self.read_state().pending_order.len()
    }

    pub fn is_streaming(&self) -> bool {
        self.active_session().is_some_and(|s| s.is_streaming)
    }

    pub fn agent_info(&self) -> Option<AgentProfile> {
        self.read_state().agent.clone()
    }

    pub fn connected_protocol(&self) -> ProtocolKind {
        self.read_state().protocol
    }

    pub fn default_mode_id(&self) -> Option<String> {
        self.read_state().default_mode_id.clone()
    }

    // ── post-handshake setters ───────────────────────────────────────

    pub fn update_agent_info(&self, agent: Option<AgentProfile>) {
        self.write_state().agent = agent;
    }

    pub fn update_connected_protocol(&self, protocol: ProtocolKind) {
        self.write_state().protocol = protocol;
    }

    /// Applies to sessions created afterwards; existing sessions keep theirs.
    pub fn set_default_mode_id(&self, mode_id: Option<String>) {
        self.write_state().default_mode_id = mode_id;
    }

    pub fn set_available_modes(&self, modes: Vec<AgentModeOption>) {
        self.write_state().available_modes = modes;
    }

    // ── activation & migration ───────────────────────────────────────

    /// Moves the current pointer. Only the target session may change: an
    /// unknown id gets a bare entry, and supplied modes apply to the target.
    pub fn set_active_session(
        &self,
        session_id: &str,
        cwd: Option<PathBuf>,
        modes: Option<SessionModes>,
    ) {
        let changed = {
            let mut state = self.write_state();
            let default_modes = state.new_session_modes();
            match state.sessions.get_mut(session_id) {
                Some(session) => {
                    if let Some(modes) = modes {
                        session.modes = modes;
                    }
                }
                None => {
                    tracing::debug!(session_id, "activating unknown session, creating bare entry");
                    let cwd = cwd.unwrap_or_else(|| self.working_directory.as_ref().clone());
                    let session =
                        SessionState::new(session_id, cwd, modes.unwrap_or(default_modes));
                    state.sessions.insert(session_id.to_string(), session);
                }
            }
            let changed = state.active_session_id.as_deref() != Some(session_id);
            state.active_session_id = Some(session_id.to_string());
            changed
        };
        if changed {
            self.emit(SessionEvent::ActiveSessionChanged {
                session_id: Some(session_id.to_string()),
            });
        }
    }

    /// Re-keys a placeholder under its server id, keeping the buffer and
    /// streaming flag. A missing source is a warning-level no-op.
    pub fn migrate_session_view_model(&self, from: &str, to: &str) -> Result<(), SessionError> {
        let migrated = {
            let mut state = self.write_state();
            match state.sessions.remove(from) {
                None => None,
                Some(mut session) => {
                    session.session_id = to.to_string();
                    session.is_pending = false;
                    let messages = session.messages.clone();
                    let summary = session.summary();
                    state.sessions.insert(to.to_string(), session);
                    state.pending_order.retain(|id| id != from);

                    let was_active = state.active_session_id.as_deref() == Some(from);
                    if was_active {
                        state.active_session_id = Some(to.to_string());
                    }

                    if state.summaries.iter().any(|s| s.session_id == from) {
                        state.summaries.retain(|s| s.session_id != to);
                        if let Some(existing) =
                            state.summaries.iter_mut().find(|s| s.session_id == from)
                        {
                            existing.session_id = to.to_string();
                            existing.is_pending = false;
                        }
                    } else if let Some(existing) =
                        state.summaries.iter_mut().find(|s| s.session_id == to)
                    {
                        existing.is_pending = false;
                    } else {
                        state.summaries.insert(0, summary);
                    }
                    Some((messages, was_active))
                }
            }
        };

        let Some((messages, was_active)) = migrated else {
            let err = SessionError::DuplicateMigration {
                from: from.to_string(),
                to: to.to_string(),
            };
            self.report(Some(from), err.clone());
            return Err(err);
        };

        {
            let mut streams = self.streams.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(handle) = streams.remove(from) {
                streams.insert(to.to_string(), handle);
            }
        }

        if let Some(cache) = self.cache.get() {
            if !messages.is_empty() {
                if let Err(err) = cache.save_messages(to, &messages) {
                    tracing::warn!(session_id = to, error = %err, "failed to cache migrated messages");
                }
            }
            if let Err(err) = cache.delete_messages(from) {
                tracing::warn!(session_id = from, error = %err, "failed to drop placeholder cache entry");
            }
        }
        self.persist_summaries();

        tracing::info!(from, to, "placeholder session migrated");
        self.emit(SessionEvent::SessionMigrated {
            from: from.to_string(),
            to: to.to_string(),
        });
        if was_active {
            self.emit(SessionEvent::ActiveSessionChanged {
                session_id: Some(to.to_string()),
            });
        }
        Ok(())
    }

    // ── removal ──────────────────────────────────────────────────────

    fn release_stream(&self, session_id: &str) {
        let handle = self
            .streams
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(session_id);
        if let Some(handle) = handle {
            tracing::debug!(session_id, "releasing stream subscription");
            handle.abort();
        }
    }

    /// Drops the live view model; summaries and cache entries stay. Returns
    /// whether anything was removed.
    pub fn remove_session_view_model(&self, session_id: &str) -> bool {
        self.release_stream(session_id);
        let removed = {
            let mut state = self.write_state();
            let removed = state.sessions.remove(session_id);
            state.pending_order.retain(|id| id != session_id);
            if state.active_session_id.as_deref() == Some(session_id) {
                state.active_session_id = None;
            }
            removed
        };
        let Some(session) = removed else {
            return false;
        };
        if !session.is_pending {
            self.persist_messages(&session.session_id, &session.messages);
        }
        self.emit(SessionEvent::SessionRemoved {
            session_id: session_id.to_string(),
        });
        true
    }

    /// Teardown path: releases every stream and empties the registry.
    pub fn remove_all_session_view_models(&self) -> usize {
        let handles: Vec<(String, JoinHandle<()>)> = self
            .streams
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .collect();
        for (session_id, handle) in handles {
            tracing::debug!(session_id = %session_id, "releasing stream subscription");
            handle.abort();
        }

        let (sessions, had_active) = {
            let mut state = self.write_state();
            state.pending_order.clear();
            state.list_claims.clear();
            let had_active = state.active_session_id.take().is_some();
            let sessions: Vec<SessionState> =
                state.sessions.drain().map(|(_, session)| session).collect();
            (sessions, had_active)
        };

        for session in sessions.iter().filter(|s| !s.is_pending) {
            let was_streaming = session.is_streaming;
            self.persist_messages(&session.session_id, &session.messages);
            if was_streaming {
                self.emit(SessionEvent::StreamingChanged {
                    session_id: session.session_id.clone(),
                    is_streaming: false,
                });
            }
        }
        for session in &sessions {
            self.emit(SessionEvent::SessionRemoved {
                session_id: session.session_id.clone(),
            });
        }
        if had_active {
            self.emit(SessionEvent::ActiveSessionChanged { session_id: None });
        }
        if !sessions.is_empty() {
            tracing::info!(count = sessions.len(), "removed all session view models");
        }
        sessions.len()
    }

    /// Removes a session locally and from the cache, then asks the server to
    /// forget it. Unknown ids fail without touching the registry.
    pub async fn delete_session(&self, session_id: &str) -> Result<(), SessionError> {
        let removed = {
            let mut state = self.write_state();
            let known = state.sessions.contains_key(session_id)
                || state.summaries.iter().any(|s| s.session_id == session_id);
            if known {
                state.sessions.remove(session_id);
                state.pending_order.retain(|id| id != session_id);
                state.summaries.retain(|s| s.session_id != session_id);
                if state.active_session_id.as_deref() == Some(session_id) {
                    state.active_session_id = None;
                }
            }
            known
        };
        if !removed {
            let err = SessionError::SessionNotFound(session_id.to_string());
            self.report(Some(session_id), err.clone());
            return Err(err);
        }

        self.release_stream(session_id);
        if let Some(cache) = self.cache.get() {
            if let Err(err) = cache.delete_messages(session_id) {
                tracing::warn!(session_id, error = %err, "failed to drop cached messages");
            }
        }
        self.persist_summaries();
        self.emit(SessionEvent::SessionRemoved {
            session_id: session_id.to_string(),
        });

        if crate::model::is_placeholder_id(session_id) {
            return Ok(());
        }
        if let Err(err) = self.transport.delete_session(session_id).await {
            self.report(Some(session_id), err);
        }
        Ok(())
    }

    // ── cache writes ─────────────────────────────────────────────────

    /// Writes the summary list (placeholders included). Failures are logged
    /// and absorbed.
    pub fn persist_summaries(&self) -> bool {
        let Some(cache) = self.cache.get() else {
            return false;
        };
        let summaries = self.session_summaries();
        match cache.save_summaries(&self.profile_id, &summaries) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(profile_id = %self.profile_id, error = %err, "failed to cache session summaries");
                false
            }
        }
    }

    pub fn persist_messages(&self, session_id: &str, messages: &[ChatMessage]) -> bool {
        let Some(cache) = self.cache.get() else {
            return false;
        };
        match cache.save_messages(session_id, messages) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(session_id, error = %err, "failed to cache messages");
                false
            }
        }
    }

    /// Snapshots of every confirmed session's buffer, streaming ones first.
    pub fn buffer_snapshots(&self) -> Vec<(String, Vec<ChatMessage>)> {
        let state = self.read_state();
        let mut sessions: Vec<&SessionState> = state
            .sessions
            .values()
            .filter(|s| !s.is_pending && !s.messages.is_empty())
            .collect();
        sessions.sort_by_key(|s| (!s.is_streaming, s.session_id.clone()));
        sessions
            .into_iter()
            .map(|s| (s.session_id.clone(), s.messages.clone()))
            .collect()
    }

    /// Writes the summary list unconditionally, then each confirmed buffer
    /// in turn, checking `should_stop` before every buffer.
    pub fn flush_to_cache(&self, should_stop: impl Fn() -> bool) -> FlushReport {
        let mut report = FlushReport::default();
        self.persist_summaries();
        for (session_id, messages) in self.buffer_snapshots() {
            if should_stop() {
                tracing::warn!(flushed = report.flushed, "flush stopped early");
                report.interrupted = true;
                break;
            }
            if self.persist_messages(&session_id, &messages) {
                report.flushed += 1;
            }
        }
        report
    }

    pub fn has_cached_messages(&self, session_id: &str) -> bool {
        let Some(cache) = self.cache.get() else {
            return false;
        };
        cache.has_messages(session_id).unwrap_or_else(|err| {
            tracing::warn!(session_id, error = %err, "cache lookup failed");
            false
        })
    }
}
