use al_store::Storage;
use std::sync::Arc;

use crate::error::SessionError;
use crate::model::{ChatMessage, SessionSummary};

const SUMMARIES_PREFIX: &str = "sessions/";
const MESSAGES_PREFIX: &str = "messages/";

fn summaries_key(profile_id: &str) -> String {
    format!("{SUMMARIES_PREFIX}{profile_id}")
}

fn messages_key(session_id: &str) -> String {
    format!("{MESSAGES_PREFIX}{session_id}")
}

/// Durable snapshots of session summaries and message buffers. Every
/// operation may fail on its own; callers absorb failures.
pub trait CacheDelegate: Send + Sync {
    fn save_summaries(
        &self,
        profile_id: &str,
        summaries: &[SessionSummary],
    ) -> Result<(), SessionError>;
    fn load_summaries(&self, profile_id: &str) -> Result<Vec<SessionSummary>, SessionError>;
    fn save_messages(
        &self,
        session_id: &str,
        messages: &[ChatMessage],
    ) -> Result<(), SessionError>;
    fn load_messages(&self, session_id: &str) -> Result<Option<Vec<ChatMessage>>, SessionError>;
    fn delete_messages(&self, session_id: &str) -> Result<(), SessionError>;
    fn has_messages(&self, session_id: &str) -> Result<bool, SessionError>;
}

pub struct SessionCache {
    storage: Arc<dyn Storage>,
}

impl SessionCache {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Summaries for a profile, newest first. Never touches the network;
    /// a failed read behaves like an empty cache.
    pub fn load_cached_sessions(&self, profile_id: &str) -> Vec<SessionSummary> {
        match self.load_summaries(profile_id) {
            Ok(mut summaries) => {
                summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
                summaries
            }
            Err(err) => {
                tracing::warn!(profile_id, error = %err, "cache read failed, treating as empty");
                Vec::new()
            }
        }
    }

    pub fn has_cached_messages(&self, session_id: &str) -> bool {
        match self.has_messages(session_id) {
            Ok(found) => found,
            Err(err) => {
                tracing::warn!(session_id, error = %err, "cache lookup failed");
                false
            }
        }
    }

    /// Ids of every session with a stored message buffer, in key order.
    pub fn cached_message_ids(&self) -> Result<Vec<String>, SessionError> {
        let keys = self
            .storage
            .keys_with_prefix(MESSAGES_PREFIX)
            .map_err(|e| SessionError::CacheReadFailure(e.to_string()))?;
        Ok(keys
            .into_iter()
            .filter_map(|key| key.strip_prefix(MESSAGES_PREFIX).map(str::to_string))
            .collect())
    }

    /// Drops everything stored for a deleted profile.
    pub fn purge_profile(&self, profile_id: &str) -> Result<usize, SessionError> {
        let summaries = self.load_summaries(profile_id).unwrap_or_default();
        let mut removed = 0;
        for summary in &summaries {
            self.delete_messages(&summary.session_id)?;
            removed += 1;
        }
        self.storage
            .delete(&summaries_key(profile_id))
            .map_err(write_failure)?;
        Ok(removed)
    }
}

fn write_failure(err: al_store::StoreError) -> SessionError {
    SessionError::CacheWriteFailure(err.to_string())
}

fn decode<T: serde::de::DeserializeOwned>(key: &str, bytes: &[u8]) -> Result<T, SessionError> {
    serde_json::from_slice(bytes)
        .map_err(|e| SessionError::CacheReadFailure(format!("{key}: {e}")))
}

fn encode<T: serde::Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, SessionError> {
    serde_json::to_vec(value).map_err(|e| SessionError::CacheWriteFailure(e.to_string()))
}

impl CacheDelegate for SessionCache {
    fn save_summaries(
        &self,
        profile_id: &str,
        summaries: &[SessionSummary],
    ) -> Result<(), SessionError> {
        let bytes = encode(summaries)?;
        self.storage
            .set(&summaries_key(profile_id), &bytes)
            .map_err(write_failure)
    }

    fn load_summaries(&self, profile_id: &str) -> Result<Vec<SessionSummary>, SessionError> {
        let key = summaries_key(profile_id);
        match self.storage.get(&key)? {
            Some(bytes) => decode(&key, &bytes),
            None => Ok(Vec::new()),
        }
    }

    fn save_messages(
        &self,
        session_id: &str,
        messages: &[ChatMessage],
    ) -> Result<(), SessionError> {
        let bytes = encode(messages)?;
        self.storage
            .set(&messages_key(session_id), &bytes)
            .map_err(write_failure)
    }

    fn load_messages(&self, session_id: &str) -> Result<Option<Vec<ChatMessage>>, SessionError> {
        let key = messages_key(session_id);
        match self.storage.get(&key)? {
            Some(bytes) => decode(&key, &bytes).map(Some),
            None => Ok(None),
        }
    }

    fn delete_messages(&self, session_id: &str) -> Result<(), SessionError> {
        self.storage
            .delete(&messages_key(session_id))
            .map_err(write_failure)
    }

    fn has_messages(&self, session_id: &str) -> Result<bool, SessionError> {
        Ok(self.storage.get(&messages_key(session_id))?.is_some())
    }
}
