mod support;

use al_config::ServerProfile;
use al_session::{
    is_placeholder_id, CacheDelegate, EventDelegate, SessionCache, SessionError, SessionEvent,
    SessionRegistry, SessionUpdate,
};
use al_store::SqliteStorage;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use support::{eventually, server_entry, Recorder, ScriptedTransport};

struct Harness {
    registry: SessionRegistry,
    transport: Arc<ScriptedTransport>,
    cache: Arc<SessionCache>,
    recorder: Arc<Recorder>,
    _dir: tempfile::TempDir,
}

fn harness(transport: ScriptedTransport) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let storage = SqliteStorage::open(&dir.path().join("cache.db")).unwrap();
    let cache = Arc::new(SessionCache::new(Arc::new(storage)));
    let transport = Arc::new(transport);
    let profile = ServerProfile::new("dev box", "ws", "127.0.0.1:7000");
    let registry = SessionRegistry::new(&profile, transport.clone());

    let recorder = Arc::new(Recorder::default());
    let cache_delegate: Arc<dyn CacheDelegate> = cache.clone();
    let event_delegate: Arc<dyn EventDelegate> = recorder.clone();
    registry.set_cache_delegate(Arc::downgrade(&cache_delegate));
    registry.set_event_delegate(Arc::downgrade(&event_delegate));

    Harness {
        registry,
        transport,
        cache,
        recorder,
        _dir: dir,
    }
}

// ── creation & migration ─────────────────────────────────────────────

#[tokio::test]
async fn new_session_migrates_once_confirmed() {
    let h = harness(ScriptedTransport::new().with_gated_new_session());

    let placeholder = h.registry.send_new_session(PathBuf::from("/tmp"));
    assert!(is_placeholder_id(&placeholder));
    assert_eq!(h.registry.session_count(), 1);
    assert!(h.registry.is_pending_session());

    h.transport.new_session_gate.release();
    eventually(|| h.registry.contains("s1")).await;

    assert!(!h.registry.is_pending_session());
    assert!(!h.registry.contains(&placeholder));
    assert_eq!(h.registry.session_count(), 1);
    assert_eq!(h.registry.active_session_id().as_deref(), Some("s1"));
    assert!(h.recorder.events().contains(&SessionEvent::SessionMigrated {
        from: placeholder,
        to: "s1".to_string(),
    }));
}

#[tokio::test]
async fn migration_keeps_buffered_history() {
    let h = harness(ScriptedTransport::new().with_gated_new_session());
    let placeholder = h.registry.send_new_session(PathBuf::from("/proj"));
    h.registry.apply_session_update(
        &placeholder,
        SessionUpdate::UserMessage {
            text: "draft".to_string(),
        },
    );
    let before = h.registry.session(&placeholder).unwrap();

    h.transport.new_session_gate.release();
    eventually(|| h.registry.contains("s1")).await;

    let after = h.registry.session("s1").unwrap();
    assert_eq!(after.messages, before.messages);
    assert_eq!(after.is_streaming, before.is_streaming);
    assert!(h.cache.has_cached_messages("s1"));
    assert!(!h.cache.has_cached_messages(&placeholder));
}

#[tokio::test]
async fn failed_confirmation_drops_placeholder() {
    let transport = ScriptedTransport::new();
    *transport.next_session_id.lock().unwrap() =
        Err(SessionError::Transport("server refused".to_string()));
    let h = harness(transport);

    let placeholder = h.registry.send_new_session(PathBuf::from("/tmp"));
    eventually(|| !h.registry.contains(&placeholder)).await;

    assert_eq!(h.registry.session_count(), 0);
    assert!(h.registry.active_session_id().is_none());
    assert!(h.registry.session_summaries().is_empty());
    assert_eq!(
        h.recorder.errors(),
        vec![SessionError::Transport("server refused".to_string())]
    );
}

#[tokio::test]
async fn server_list_confirms_placeholder_before_reply() {
    let transport = ScriptedTransport::new().with_gated_new_session();
    *transport.server_sessions.lock().unwrap() = vec![server_entry("s7", "/proj")];
    let h = harness(transport);

    let placeholder = h.registry.send_new_session(PathBuf::from("/proj"));
    h.registry.fetch_session_list(false).await.unwrap();

    assert!(h.registry.contains("s7"));
    assert!(!h.registry.contains(&placeholder));

    // The late confirmation finds nothing left to migrate.
    *h.transport.next_session_id.lock().unwrap() = Ok("s7".to_string());
    h.transport.new_session_gate.release();
    eventually(|| {
        h.recorder
            .errors()
            .iter()
            .any(|e| matches!(e, SessionError::DuplicateMigration { .. }))
    })
    .await;
    assert_eq!(h.registry.session_ids(), vec!["s7".to_string()]);
}

#[tokio::test]
async fn refresh_does_not_claim_previously_listed_session() {
    let transport = ScriptedTransport::new().with_gated_new_session();
    *transport.server_sessions.lock().unwrap() = vec![server_entry("s-old", "/proj")];
    let h = harness(transport);
    h.registry.fetch_session_list(true).await.unwrap();

    let placeholder = h.registry.send_new_session(PathBuf::from("/proj"));
    h.registry.fetch_session_list(true).await.unwrap();
    assert!(h.registry.contains(&placeholder));
    assert!(!h.registry.contains("s-old"));
    assert_eq!(h.registry.active_session_id(), Some(placeholder.clone()));

    *h.transport.next_session_id.lock().unwrap() = Ok("s-new".to_string());
    h.transport.new_session_gate.release();
    eventually(|| h.registry.contains("s-new")).await;

    assert_eq!(h.registry.active_session_id().as_deref(), Some("s-new"));
    assert!(!h.registry.contains("s-old"));
    assert!(h.recorder.errors().is_empty());
}

#[tokio::test]
async fn confirmation_overrides_wrong_list_match() {
    let transport = ScriptedTransport::new().with_gated_new_session();
    *transport.server_sessions.lock().unwrap() = vec![server_entry("s-old", "/proj")];
    let h = harness(transport);

    // No earlier list, so the refresh mistakes s-old for the new session.
    let placeholder = h.registry.send_new_session(PathBuf::from("/proj"));
    h.registry.apply_session_update(
        &placeholder,
        SessionUpdate::UserMessage {
            text: "draft".to_string(),
        },
    );
    h.registry.fetch_session_list(true).await.unwrap();
    assert_eq!(h.registry.active_session_id().as_deref(), Some("s-old"));

    *h.transport.next_session_id.lock().unwrap() = Ok("s-new".to_string());
    h.transport.new_session_gate.release();
    eventually(|| h.registry.contains("s-new")).await;

    assert_eq!(h.registry.active_session_id().as_deref(), Some("s-new"));
    assert!(!h.registry.contains("s-old"));
    assert_eq!(h.registry.session("s-new").unwrap().messages[0].content, "draft");
    assert!(h.cache.has_cached_messages("s-new"));
    assert!(!h.cache.has_cached_messages("s-old"));

    let ids: Vec<String> = h
        .registry
        .session_summaries()
        .into_iter()
        .map(|s| s.session_id)
        .collect();
    assert!(ids.contains(&"s-new".to_string()));
    assert!(ids.contains(&"s-old".to_string()));
    assert!(h.recorder.events().contains(&SessionEvent::SessionMigrated {
        from: "s-old".to_string(),
        to: "s-new".to_string(),
    }));
}

// ── session list ─────────────────────────────────────────────────────

#[tokio::test]
async fn empty_cache_loads_no_summaries() {
    let h = harness(ScriptedTransport::new());
    assert!(h.registry.load_cached_sessions().is_empty());
    assert!(h.registry.session_summaries().is_empty());
    assert_eq!(h.transport.list_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn concurrent_fetches_share_one_request() {
    let transport = ScriptedTransport::new().with_gated_list();
    *transport.server_sessions.lock().unwrap() =
        vec![server_entry("a", "/x"), server_entry("b", "/y")];
    let h = harness(transport);

    let (first, second, _) = tokio::join!(
        h.registry.fetch_session_list(false),
        h.registry.fetch_session_list(false),
        async {
            tokio::task::yield_now().await;
            h.transport.list_gate.release();
        }
    );

    assert_eq!(first.unwrap().len(), 2);
    assert_eq!(second.unwrap().len(), 2);
    assert_eq!(h.transport.list_calls.load(Ordering::SeqCst), 1);

    h.registry.fetch_session_list(true).await.unwrap();
    assert_eq!(h.transport.list_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn set_active_does_not_touch_summaries() {
    let transport = ScriptedTransport::new();
    *transport.server_sessions.lock().unwrap() =
        vec![server_entry("a", "/x"), server_entry("b", "/y")];
    let h = harness(transport);
    h.registry.fetch_session_list(false).await.unwrap();
    let before = h.registry.session_summaries();

    h.registry.set_active_session("b", None, None);
    h.registry.set_active_session("unknown", None, None);

    assert_eq!(h.registry.session_summaries(), before);
}

#[tokio::test]
async fn cached_summaries_survive_restart() {
    let transport = ScriptedTransport::new();
    *transport.server_sessions.lock().unwrap() = vec![server_entry("a", "/x")];
    let h = harness(transport);
    h.registry.fetch_session_list(false).await.unwrap();

    let profile_id = h.registry.profile_id().to_string();
    let restored = h.cache.load_cached_sessions(&profile_id);
    assert_eq!(restored.len(), 1);
    assert_eq!(restored[0].session_id, "a");
}

// ── deletion ─────────────────────────────────────────────────────────

#[tokio::test]
async fn deleting_unknown_session_changes_nothing() {
    let h = harness(ScriptedTransport::new());
    h.registry.set_active_session("s1", None, None);

    let err = h.registry.delete_session("missing").await.unwrap_err();
    assert_eq!(err, SessionError::SessionNotFound("missing".to_string()));
    assert_eq!(h.registry.session_ids(), vec!["s1".to_string()]);
    assert_eq!(h.transport.delete_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.recorder.errors(), vec![err]);
}

#[tokio::test]
async fn deleting_session_clears_cache_and_server() {
    let transport = ScriptedTransport::new();
    *transport.server_sessions.lock().unwrap() = vec![server_entry("a", "/x")];
    let h = harness(transport);
    h.registry.fetch_session_list(false).await.unwrap();
    h.registry.open_session("a").await.unwrap();
    h.registry.send_prompt("hello", Vec::new(), None).unwrap();
    eventually(|| !h.registry.is_streaming()).await;
    assert!(h.cache.has_cached_messages("a"));

    h.registry.delete_session("a").await.unwrap();
    assert!(!h.registry.contains("a"));
    assert!(h.registry.session_summaries().is_empty());
    assert!(!h.cache.has_cached_messages("a"));
    assert_eq!(h.transport.delete_calls.load(Ordering::SeqCst), 1);
}

// ── prompting ────────────────────────────────────────────────────────

#[tokio::test]
async fn prompt_without_active_session_is_reported() {
    let h = harness(ScriptedTransport::new());
    let err = h.registry.send_prompt("hi", Vec::new(), None).unwrap_err();
    assert_eq!(err, SessionError::NoActiveSession);
    assert!(!h.registry.is_streaming());
    assert_eq!(h.recorder.errors(), vec![SessionError::NoActiveSession]);
    assert_eq!(h.transport.prompt_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn late_chunks_follow_their_session() {
    let h = harness(ScriptedTransport::new().with_gated_prompt());
    h.registry.set_active_session("s1", None, None);
    h.registry.send_prompt("explain", Vec::new(), None).unwrap();
    assert!(h.registry.is_streaming());

    h.registry.set_active_session("s2", None, None);
    h.registry.apply_session_update(
        "s1",
        SessionUpdate::AgentMessageChunk {
            text: "Sure, ".to_string(),
        },
    );
    h.registry.apply_session_update(
        "s1",
        SessionUpdate::AgentMessageChunk {
            text: "here goes.".to_string(),
        },
    );

    let s1 = h.registry.session("s1").unwrap();
    assert!(s1.is_streaming);
    assert_eq!(s1.messages.len(), 2);
    assert_eq!(s1.messages[1].content, "Sure, here goes.");
    assert!(h.registry.session("s2").unwrap().messages.is_empty());

    h.transport.prompt_gate.release();
    eventually(|| !h.registry.session("s1").unwrap().is_streaming).await;
    assert!(h.cache.has_cached_messages("s1"));
}

#[tokio::test]
async fn interrupted_stream_clears_streaming() {
    let transport = ScriptedTransport::new();
    *transport.prompt_result.lock().unwrap() =
        Err(SessionError::Transport("socket closed".to_string()));
    let h = harness(transport);
    h.registry.set_active_session("s1", None, None);

    h.registry.send_prompt("hi", Vec::new(), None).unwrap();
    eventually(|| !h.registry.is_streaming()).await;

    assert!(h
        .recorder
        .errors()
        .iter()
        .any(|e| matches!(e, SessionError::StreamInterrupted(_))));
    assert!(h.recorder.events().contains(&SessionEvent::StreamingChanged {
        session_id: "s1".to_string(),
        is_streaming: false,
    }));
}

#[tokio::test]
async fn cancel_ends_streaming_turn() {
    let h = harness(ScriptedTransport::new().with_gated_prompt());
    h.registry.set_active_session("s1", None, None);
    h.registry.send_prompt("long task", Vec::new(), None).unwrap();

    h.registry.cancel_prompt().await.unwrap();
    eventually(|| !h.registry.is_streaming()).await;
}

// ── open / load ──────────────────────────────────────────────────────

#[tokio::test]
async fn open_session_seeds_from_cache_and_loads() {
    let h = harness(ScriptedTransport::new());
    h.cache
        .save_messages(
            "old",
            &[al_session::ChatMessage::new(
                al_session::MessageRole::User,
                "from cache",
            )],
        )
        .unwrap();

    h.registry.open_session("old").await.unwrap();
    let session = h.registry.active_session().unwrap();
    assert_eq!(session.session_id, "old");
    assert_eq!(session.messages[0].content, "from cache");
    // Seeded from cache, so no explicit load is needed.
    assert_eq!(h.transport.load_calls.load(Ordering::SeqCst), 0);

    h.registry.open_session("fresh").await.unwrap();
    assert_eq!(h.transport.load_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.registry.active_session_id().as_deref(), Some("fresh"));
}
