use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashSet;
use std::sync::atomic::Ordering;

use super::{RegistryState, SessionRegistry};
use crate::error::SessionError;
use crate::events::SessionEvent;
use crate::model::SessionSummary;

type ListFuture = Shared<BoxFuture<'static, Result<Vec<SessionSummary>, SessionError>>>;

/// The list request currently on the wire, tagged with its generation so a
/// finished fetch only clears its own slot.
pub(crate) struct InFlightFetch {
    generation: u64,
    future: ListFuture,
}

impl SessionRegistry {
    /// Seeds the summary list from local storage only. Live placeholders
    /// stay at the front.
    pub fn load_cached_sessions(&self) -> Vec<SessionSummary> {
        let mut cached = match self.cache_delegate() {
            Some(cache) => cache.load_summaries(&self.profile_id).unwrap_or_else(|err| {
                tracing::warn!(profile_id = %self.profile_id, error = %err, "cache read failed, treating as empty");
                Vec::new()
            }),
            None => Vec::new(),
        };
        cached.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

        let (summaries, count) = {
            let mut state = self.write_state();
            let mut merged: Vec<SessionSummary> = state
                .summaries
                .iter()
                .filter(|s| s.is_pending && state.sessions.contains_key(&s.session_id))
                .cloned()
                .collect();
            for summary in cached {
                if !merged.iter().any(|s| s.session_id == summary.session_id) {
                    merged.push(summary);
                }
            }
            state.summaries = merged;
            (state.summaries.clone(), state.summaries.len())
        };
        tracing::debug!(count, "loaded cached session summaries");
        self.emit(SessionEvent::SessionListUpdated { count });
        summaries
    }

    /// Asks the server for its session list and reconciles the result.
    ///
    /// Without `force`, a caller arriving while a request is outstanding
    /// waits on that request instead of issuing another. A forced fetch
    /// always goes to the wire, and only the newest fetch gets applied.
    pub async fn fetch_session_list(
        &self,
        force: bool,
    ) -> Result<Vec<SessionSummary>, SessionError> {
        let (generation, future) = {
            let mut slot = self.list_fetch.lock().unwrap_or_else(|e| e.into_inner());
            match slot.as_ref() {
                Some(in_flight) if !force => {
                    tracing::debug!("joining in-flight session list request");
                    (in_flight.generation, in_flight.future.clone())
                }
                _ => {
                    let generation = self.fetch_generation.fetch_add(1, Ordering::SeqCst) + 1;
                    let future = self.list_future(generation);
                    *slot = Some(InFlightFetch {
                        generation,
                        future: future.clone(),
                    });
                    (generation, future)
                }
            }
        };

        let result = future.await;

        let mut slot = self.list_fetch.lock().unwrap_or_else(|e| e.into_inner());
        if slot.as_ref().is_some_and(|f| f.generation == generation) {
            *slot = None;
        }
        result
    }

    fn list_future(&self, generation: u64) -> ListFuture {
        let registry = self.clone();
        async move {
            let cwd = registry.working_directory.as_ref().clone();
            let listed = registry.transport.list_sessions(&cwd).await.map_err(|err| {
                tracing::warn!(error = %err, "session list request failed");
                err
            })?;
            if registry.fetch_generation.load(Ordering::SeqCst) == generation {
                registry.handle_session_list_result(listed);
            } else {
                tracing::debug!(generation, "discarding superseded session list");
            }
            Ok(registry.session_summaries())
        }
        .boxed()
        .shared()
    }

    /// Reconciles a server list with local state.
    ///
    /// Each live placeholder, oldest first, claims the first unclaimed
    /// server entry with the same cwd that this client has never seen, and
    /// is migrated onto it. Ids already held in the registry or listed by an
    /// earlier reconcile cannot be claimed. Unmatched placeholders stay
    /// pending at the front. Cached pending entries without a live session
    /// are stale and dropped.
    pub fn handle_session_list_result(&self, listed: Vec<SessionSummary>) {
        let migrations = {
            let mut state = self.write_state();
            let migrations = match_placeholders(&state, &listed);
            for (from, to) in &migrations {
                state.list_claims.insert(from.clone(), to.clone());
            }
            migrations
        };

        for (from, to) in &migrations {
            tracing::info!(from = %from, to = %to, "server list confirmed pending session");
            if self.migrate_session_view_model(from, to).is_err() {
                self.write_state().list_claims.remove(from);
            }
        }

        let count = {
            let mut state = self.write_state();
            let mut merged: Vec<SessionSummary> = state
                .summaries
                .iter()
                .filter(|s| s.is_pending && state.pending_order.contains(&s.session_id))
                .cloned()
                .collect();
            for mut entry in listed {
                if merged.iter().any(|s| s.session_id == entry.session_id) {
                    continue;
                }
                entry.is_pending = false;
                if let Some(session) = state.sessions.get_mut(&entry.session_id) {
                    if session.title.is_none() {
                        session.title = entry.title.clone();
                    }
                }
                merged.push(entry);
            }
            state.summaries = merged;
            state.summaries.len()
        };

        self.persist_summaries();
        tracing::debug!(count, migrated = migrations.len(), "session list reconciled");
        self.emit(SessionEvent::SessionListUpdated { count });
    }

    /// Applies the server's reply to a new-session request.
    ///
    /// When a server list already migrated the placeholder onto a different
    /// id, the list guessed wrong: the live session moves to the id the
    /// server actually assigned and the claimed entry goes back to being an
    /// ordinary listed session.
    pub(crate) fn confirm_new_session(&self, placeholder: &str, resolved: &str) {
        let claimed = self.write_state().list_claims.remove(placeholder);
        match claimed {
            Some(claimed) if claimed != resolved => {
                if !self.reassign_list_claim(placeholder, &claimed, resolved) {
                    let _ = self.migrate_session_view_model(placeholder, resolved);
                }
            }
            // Already migrated by a server list, or never claimed.
            _ => {
                let _ = self.migrate_session_view_model(placeholder, resolved);
            }
        }
    }

    fn reassign_list_claim(&self, placeholder: &str, claimed: &str, resolved: &str) -> bool {
        let moved = {
            let mut state = self.write_state();
            if state.sessions.contains_key(resolved) {
                None
            } else {
                match state.sessions.remove(claimed) {
                    None => None,
                    Some(mut session) => {
                        session.session_id = resolved.to_string();
                        let messages = session.messages.clone();
                        let summary = session.summary();
                        state.sessions.insert(resolved.to_string(), session);
                        let was_active = state.active_session_id.as_deref() == Some(claimed);
                        if was_active {
                            state.active_session_id = Some(resolved.to_string());
                        }
                        if !state.summaries.iter().any(|s| s.session_id == resolved) {
                            state.summaries.insert(0, summary);
                        }
                        Some((messages, was_active))
                    }
                }
            }
        };
        let Some((messages, was_active)) = moved else {
            return false;
        };

        {
            let mut streams = self.streams.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(handle) = streams.remove(claimed) {
                streams.insert(resolved.to_string(), handle);
            }
        }
        if let Some(cache) = self.cache.get() {
            if !messages.is_empty() {
                if let Err(err) = cache.save_messages(resolved, &messages) {
                    tracing::warn!(session_id = resolved, error = %err, "failed to cache reassigned messages");
                }
            }
            if let Err(err) = cache.delete_messages(claimed) {
                tracing::warn!(session_id = claimed, error = %err, "failed to drop misattributed cache entry");
            }
        }
        self.persist_summaries();

        tracing::warn!(
            placeholder,
            claimed,
            resolved,
            "server list matched the wrong session, moving to the confirmed id"
        );
        self.emit(SessionEvent::SessionMigrated {
            from: claimed.to_string(),
            to: resolved.to_string(),
        });
        if was_active {
            self.emit(SessionEvent::ActiveSessionChanged {
                session_id: Some(resolved.to_string()),
            });
        }
        true
    }
}

/// Pairs each live placeholder, oldest first, with the first unclaimed
/// listed entry in the same cwd whose id this client has never seen.
fn match_placeholders(state: &RegistryState, listed: &[SessionSummary]) -> Vec<(String, String)> {
    let known: HashSet<&str> = state
        .summaries
        .iter()
        .filter(|s| !s.is_pending)
        .map(|s| s.session_id.as_str())
        .chain(state.sessions.keys().map(String::as_str))
        .collect();
    let mut claimed: HashSet<&str> = HashSet::new();
    let mut migrations = Vec::new();
    for placeholder in &state.pending_order {
        let Some(session) = state.sessions.get(placeholder) else {
            continue;
        };
        let candidate = listed.iter().find(|entry| {
            !claimed.contains(entry.session_id.as_str())
                && !known.contains(entry.session_id.as_str())
                && entry.cwd.as_deref() == Some(session.cwd.as_path())
        });
        if let Some(entry) = candidate {
            claimed.insert(entry.session_id.as_str());
            migrations.push((placeholder.clone(), entry.session_id.clone()));
        }
    }
    migrations
}
