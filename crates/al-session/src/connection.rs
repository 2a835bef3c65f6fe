use al_config::ServerProfile;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, RwLock, Weak};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::delegate::DelegateSlot;
use crate::error::SessionError;
use crate::events::{EventDelegate, SessionEvent};
use crate::model::{AgentModeOption, AgentProfile, HandshakeResult};
use crate::registry::SessionRegistry;
use crate::transport::{AgentTransport, ConnectRequest, TransportEvent};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Initialized,
    Reconnecting,
    Failed(String),
}

impl ConnectionState {
    pub fn can_transition_to(&self, next: &ConnectionState) -> bool {
        use ConnectionState::*;
        match (self, next) {
            (Disconnected, Disconnected) => false,
            (_, Disconnected) => true,
            (_, Failed(_)) => true,
            (Disconnected | Reconnecting | Failed(_) | Initialized, Connecting) => true,
            (Connecting, Initialized) => true,
            (Connecting | Initialized, Reconnecting) => true,
            _ => false,
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Initialized)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Initialized => write!(f, "initialized"),
            ConnectionState::Reconnecting => write!(f, "reconnecting"),
            ConnectionState::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Everything observers need to render connection health.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    /// Last availability signal from the transport.
    pub network_signal: bool,
    pub last_connected_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            network_signal: true,
            last_connected_at: None,
            last_error: None,
        }
    }
}

/// Drives one profile's connection and keeps the registry in step with it.
///
/// Retry cadence belongs to the transport; the controller only reacts to
/// the outcomes it reports.
#[derive(Clone)]
pub struct ConnectionController {
    profile: Arc<ServerProfile>,
    registry: SessionRegistry,
    transport: Arc<dyn AgentTransport>,
    status: Arc<watch::Sender<ConnectionStatus>>,
    handshake: Arc<RwLock<Option<HandshakeResult>>>,
    handshake_task: Arc<Mutex<Option<JoinHandle<()>>>>,
    events: Arc<DelegateSlot<dyn EventDelegate>>,
}

impl ConnectionController {
    pub fn new(profile: ServerProfile, transport: Arc<dyn AgentTransport>) -> Self {
        let registry = SessionRegistry::new(&profile, transport.clone());
        let (status, _) = watch::channel(ConnectionStatus::default());
        Self {
            profile: Arc::new(profile),
            registry,
            transport,
            status: Arc::new(status),
            handshake: Arc::new(RwLock::new(None)),
            handshake_task: Arc::new(Mutex::new(None)),
            events: Arc::new(DelegateSlot::new()),
        }
    }

    pub fn profile(&self) -> &ServerProfile {
        &self.profile
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Registers one observer for both connection and session events.
    pub fn set_event_delegate(&self, delegate: Weak<dyn EventDelegate>) {
        self.events.set(delegate.clone());
        self.registry.set_event_delegate(delegate);
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.status.borrow().state.clone()
    }

    pub fn is_connecting(&self) -> bool {
        matches!(
            self.status.borrow().state,
            ConnectionState::Connecting | ConnectionState::Reconnecting
        )
    }

    pub fn is_network_available(&self) -> bool {
        let status = self.status.borrow();
        status.network_signal && !matches!(status.state, ConnectionState::Reconnecting)
    }

    pub fn last_connected_at(&self) -> Option<DateTime<Utc>> {
        self.status.borrow().last_connected_at
    }

    pub fn agent_profile(&self) -> Option<AgentProfile> {
        self.read_handshake().as_ref().map(|h| h.agent.clone())
    }

    pub fn available_modes(&self) -> Vec<AgentModeOption> {
        self.read_handshake()
            .as_ref()
            .map(|h| h.modes.clone())
            .unwrap_or_default()
    }

    pub fn default_mode_id(&self) -> Option<String> {
        self.read_handshake()
            .as_ref()
            .and_then(|h| h.default_mode_id.clone())
    }

    fn read_handshake(&self) -> std::sync::RwLockReadGuard<'_, Option<HandshakeResult>> {
        self.handshake.read().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: SessionEvent) {
        if let Some(delegate) = self.events.get() {
            delegate.on_event(&event);
        }
    }

    /// Applies a transition if the state machine allows it.
    fn transition(&self, next: ConnectionState) -> bool {
        let mut previous = None;
        self.status.send_if_modified(|status| {
            if !status.state.can_transition_to(&next) {
                return false;
            }
            if let ConnectionState::Failed(reason) = &next {
                status.last_error = Some(reason.clone());
            }
            previous = Some(std::mem::replace(&mut status.state, next.clone()));
            true
        });
        match previous {
            Some(from) => {
                tracing::info!(profile = %self.profile.name, from = %from, to = %next, "connection state changed");
                self.emit(SessionEvent::ConnectionStateChanged(next));
                true
            }
            None => {
                tracing::debug!(profile = %self.profile.name, to = %next, "transition rejected");
                false
            }
        }
    }

    // ── lifecycle ────────────────────────────────────────────────────

    /// Starts a handshake unless one is running or already succeeded. A
    /// failed connection only restarts through [`Self::reconnect`].
    ///
    /// Must be called from within a Tokio runtime.
    pub fn connect(&self) {
        match self.state() {
            ConnectionState::Connecting | ConnectionState::Initialized => {
                tracing::debug!(profile = %self.profile.name, "connect ignored, already connecting or connected");
            }
            ConnectionState::Failed(reason) => {
                tracing::warn!(profile = %self.profile.name, reason = %reason, "connect ignored after failure, reconnect explicitly");
            }
            ConnectionState::Disconnected => {
                self.registry.load_cached_sessions();
                self.start_handshake();
            }
            ConnectionState::Reconnecting => self.start_handshake(),
        }
    }

    /// Explicit retry, the only way out of `Failed`.
    pub fn reconnect(&self) {
        if self.state() == ConnectionState::Connecting {
            tracing::debug!(profile = %self.profile.name, "reconnect ignored, handshake in flight");
            return;
        }
        self.start_handshake();
    }

    fn start_handshake(&self) {
        if !self.transition(ConnectionState::Connecting) {
            return;
        }
        let controller = self.clone();
        let handle = tokio::spawn(async move {
            let request = ConnectRequest::from_profile(&controller.profile);
            match controller.transport.handshake(request).await {
                Ok(result) => {
                    if controller.handle_handshake_result(result) {
                        controller.refresh_sessions().await;
                    }
                }
                Err(err) => controller.handle_handshake_failure(err),
            }
        });
        let previous = self
            .handshake_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Records the handshake outcome and settles into `Initialized`.
    /// Results arriving after the attempt was abandoned are dropped.
    pub fn handle_handshake_result(&self, result: HandshakeResult) -> bool {
        if self.state() != ConnectionState::Connecting {
            tracing::debug!(profile = %self.profile.name, "late handshake result ignored");
            return false;
        }
        let default_mode_id = result.resolved_default_mode();
        let agent = result.agent.clone();
        let modes = result.modes.clone();
        *self.handshake.write().unwrap_or_else(|e| e.into_inner()) = Some(HandshakeResult {
            default_mode_id: default_mode_id.clone(),
            ..result
        });

        self.registry.update_agent_info(Some(agent.clone()));
        self.registry.update_connected_protocol(self.profile.protocol);
        self.registry.set_available_modes(modes);
        self.registry.set_default_mode_id(default_mode_id);

        self.status.send_modify(|status| {
            status.last_connected_at = Some(Utc::now());
            status.last_error = None;
        });
        tracing::info!(
            profile = %self.profile.name,
            agent = %agent.name,
            protocol_version = agent.protocol_version,
            "handshake complete"
        );
        self.transition(ConnectionState::Initialized)
    }

    fn handle_handshake_failure(&self, err: SessionError) {
        let reason = match err {
            SessionError::HandshakeFailed(reason) => reason,
            other => other.to_string(),
        };
        tracing::error!(profile = %self.profile.name, reason = %reason, "handshake failed");
        self.transition(ConnectionState::Failed(reason));
    }

    async fn refresh_sessions(&self) {
        if let Err(err) = self.registry.fetch_session_list(true).await {
            tracing::warn!(profile = %self.profile.name, error = %err, "session list refresh failed");
        }
    }

    /// Tears the connection down and drops every live session.
    pub async fn disconnect(&self) {
        if let Some(task) = self
            .handshake_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            task.abort();
        }
        self.transition(ConnectionState::Disconnected);
        self.registry.remove_all_session_view_models();
        self.clear_handshake();
        self.transport.disconnect().await;
    }

    fn clear_handshake(&self) {
        *self.handshake.write().unwrap_or_else(|e| e.into_inner()) = None;
        self.registry.update_agent_info(None);
    }

    // ── transport events ─────────────────────────────────────────────

    pub fn handle_transport_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::NetworkAvailabilityChanged(available) => {
                self.status.send_if_modified(|status| {
                    let changed = status.network_signal != available;
                    status.network_signal = available;
                    changed
                });
                if !available && self.state() == ConnectionState::Initialized {
                    tracing::warn!(profile = %self.profile.name, "network lost, waiting for transport to recover");
                    self.transition(ConnectionState::Reconnecting);
                }
            }
            TransportEvent::ConnectionLost { reason } => {
                tracing::warn!(profile = %self.profile.name, reason = %reason, "connection lost");
                self.transition(ConnectionState::Reconnecting);
            }
            TransportEvent::Reconnected => {
                if self.state() == ConnectionState::Reconnecting {
                    self.start_handshake();
                }
            }
            TransportEvent::RetriesExhausted { reason } => {
                self.transition(ConnectionState::Failed(reason));
            }
            TransportEvent::AuthenticationFailed { reason } => {
                self.transition(ConnectionState::Failed(format!(
                    "authentication failed: {reason}"
                )));
            }
            TransportEvent::Closed => {
                // Sessions survive a close; the handshake does not.
                self.transition(ConnectionState::Disconnected);
                self.clear_handshake();
            }
            TransportEvent::SessionUpdate { session_id, update } => {
                self.registry.apply_session_update(&session_id, update);
            }
        }
    }

    /// Feeds transport events into the controller in arrival order.
    pub fn attach_transport_events(
        &self,
        mut events: mpsc::Receiver<TransportEvent>,
    ) -> JoinHandle<()> {
        let controller = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                controller.handle_transport_event(event);
            }
            tracing::debug!(profile = %controller.profile.name, "transport event stream ended");
        })
    }
}
