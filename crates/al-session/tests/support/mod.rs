#![allow(dead_code)]

use al_session::{
    AgentModeOption, AgentProfile, AgentTransport, ConnectRequest, EventDelegate, HandshakeResult,
    LoadedSession, PromptRequest, SessionError, SessionEvent, SessionSummary, StopReason,
};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;

/// Holds a transport call until the test opens it.
pub struct Gate {
    open: AtomicBool,
    notify: Notify,
}

impl Gate {
    pub fn open() -> Self {
        Self {
            open: AtomicBool::new(true),
            notify: Notify::new(),
        }
    }

    pub fn closed() -> Self {
        Self {
            open: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    pub fn release(&self) {
        self.open.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            if self.open.load(Ordering::SeqCst) {
                return;
            }
            notified.await;
        }
    }
}

pub struct ScriptedTransport {
    pub handshake_calls: AtomicUsize,
    pub list_calls: AtomicUsize,
    pub new_session_calls: AtomicUsize,
    pub prompt_calls: AtomicUsize,
    pub delete_calls: AtomicUsize,
    pub load_calls: AtomicUsize,

    pub list_gate: Gate,
    pub new_session_gate: Gate,
    pub prompt_gate: Gate,

    pub handshake_error: Mutex<Option<String>>,
    pub modes: Mutex<Vec<AgentModeOption>>,
    pub default_mode_id: Mutex<Option<String>>,
    pub server_sessions: Mutex<Vec<SessionSummary>>,
    pub next_session_id: Mutex<Result<String, SessionError>>,
    pub last_mode_requested: Mutex<Option<String>>,
    pub prompt_result: Mutex<Result<StopReason, SessionError>>,
    pub history: Mutex<LoadedSession>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            handshake_calls: AtomicUsize::new(0),
            list_calls: AtomicUsize::new(0),
            new_session_calls: AtomicUsize::new(0),
            prompt_calls: AtomicUsize::new(0),
            delete_calls: AtomicUsize::new(0),
            load_calls: AtomicUsize::new(0),
            list_gate: Gate::open(),
            new_session_gate: Gate::open(),
            prompt_gate: Gate::open(),
            handshake_error: Mutex::new(None),
            modes: Mutex::new(Vec::new()),
            default_mode_id: Mutex::new(None),
            server_sessions: Mutex::new(Vec::new()),
            next_session_id: Mutex::new(Ok("s1".to_string())),
            last_mode_requested: Mutex::new(None),
            prompt_result: Mutex::new(Ok(StopReason::EndTurn)),
            history: Mutex::new(LoadedSession::default()),
        }
    }

    pub fn with_gated_new_session(mut self) -> Self {
        self.new_session_gate = Gate::closed();
        self
    }

    pub fn with_gated_list(mut self) -> Self {
        self.list_gate = Gate::closed();
        self
    }

    pub fn with_gated_prompt(mut self) -> Self {
        self.prompt_gate = Gate::closed();
        self
    }
}

#[async_trait]
impl AgentTransport for ScriptedTransport {
    async fn handshake(&self, _request: ConnectRequest) -> Result<HandshakeResult, SessionError> {
        self.handshake_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = self.handshake_error.lock().unwrap().clone() {
            return Err(SessionError::HandshakeFailed(reason));
        }
        Ok(HandshakeResult {
            agent: AgentProfile {
                name: "scripted-agent".to_string(),
                protocol_version: 1,
                supports_load_session: true,
                ..AgentProfile::default()
            },
            modes: self.modes.lock().unwrap().clone(),
            default_mode_id: self.default_mode_id.lock().unwrap().clone(),
        })
    }

    async fn disconnect(&self) {}

    async fn list_sessions(&self, _cwd: &Path) -> Result<Vec<SessionSummary>, SessionError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.list_gate.wait().await;
        Ok(self.server_sessions.lock().unwrap().clone())
    }

    async fn new_session(&self, _cwd: &Path, mode_id: Option<&str>) -> Result<String, SessionError> {
        self.new_session_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_mode_requested.lock().unwrap() = mode_id.map(str::to_string);
        self.new_session_gate.wait().await;
        self.next_session_id.lock().unwrap().clone()
    }

    async fn load_session(&self, _session_id: &str, _cwd: &Path) -> Result<LoadedSession, SessionError> {
        self.load_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.history.lock().unwrap().clone())
    }

    async fn prompt(&self, _request: PromptRequest) -> Result<StopReason, SessionError> {
        self.prompt_calls.fetch_add(1, Ordering::SeqCst);
        self.prompt_gate.wait().await;
        self.prompt_result.lock().unwrap().clone()
    }

    async fn cancel(&self, _session_id: &str) -> Result<(), SessionError> {
        self.prompt_gate.release();
        Ok(())
    }

    async fn delete_session(&self, _session_id: &str) -> Result<(), SessionError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Captures every event for later assertions.
#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<SessionEvent>>,
}

impl Recorder {
    pub fn events(&self) -> Vec<SessionEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<SessionError> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                SessionEvent::Error { error, .. } => Some(error),
                _ => None,
            })
            .collect()
    }
}

impl EventDelegate for Recorder {
    fn on_event(&self, event: &SessionEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

pub fn server_entry(id: &str, cwd: &str) -> SessionSummary {
    SessionSummary {
        session_id: id.to_string(),
        title: Some(format!("Session {id}")),
        cwd: Some(PathBuf::from(cwd)),
        updated_at: chrono::Utc::now(),
        is_pending: false,
    }
}

/// Polls `check` until it holds or two seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    let result = tokio::time::timeout(Duration::from_secs(2), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "condition not reached in time");
}
