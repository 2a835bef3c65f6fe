//! Bounded flush when the host process is about to be suspended.

use al_config::BackgroundConfig;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::registry::SessionRegistry;

/// Opaque token for one granted extension window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BackgroundTaskHandle(pub u64);

pub type ExpirationHandler = Box<dyn FnOnce() + Send + 'static>;

/// Grants a bounded window of extra execution time.
pub trait BackgroundHost: Send + Sync {
    /// Returns `None` when no window can be granted. The handler runs at
    /// most once, when the window runs out before [`BackgroundHost::end`].
    fn begin(&self, on_expiration: ExpirationHandler) -> Option<BackgroundTaskHandle>;
    fn end(&self, handle: BackgroundTaskHandle);
    fn remaining_time(&self) -> Duration;
}

/// Host with a fixed budget per window, expiring on a Tokio timer.
pub struct DeadlineHost {
    budget: Duration,
    next_id: AtomicU64,
    windows: Mutex<HashMap<u64, (Instant, JoinHandle<()>)>>,
}

impl DeadlineHost {
    pub fn new(budget: Duration) -> Self {
        Self {
            budget,
            next_id: AtomicU64::new(1),
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn open_windows(&self) -> usize {
        self.windows.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl BackgroundHost for DeadlineHost {
    fn begin(&self, on_expiration: ExpirationHandler) -> Option<BackgroundTaskHandle> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let deadline = Instant::now() + self.budget;
        let timer = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            on_expiration();
        });
        self.windows
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, (deadline, timer));
        Some(BackgroundTaskHandle(id))
    }

    fn end(&self, handle: BackgroundTaskHandle) {
        let window = self
            .windows
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&handle.0);
        if let Some((_, timer)) = window {
            timer.abort();
        }
    }

    fn remaining_time(&self) -> Duration {
        let now = Instant::now();
        self.windows
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .map(|(deadline, _)| deadline.saturating_duration_since(now))
            .min()
            .unwrap_or(Duration::ZERO)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackgroundOutcome {
    /// Everything was written before the deadline.
    Completed { flushed: usize },
    /// The window closed first; `flushed` buffers made it to the cache.
    Expired { flushed: usize },
    /// A flush for this background cycle already ran or is running.
    Skipped,
    /// The host refused a window; only bookkeeping was written.
    Unavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Foreground,
    Flushing,
    Background,
}

pub struct BackgroundLifecycleBridge {
    registry: SessionRegistry,
    host: Arc<dyn BackgroundHost>,
    config: BackgroundConfig,
    phase: Mutex<Phase>,
}

impl BackgroundLifecycleBridge {
    pub fn new(
        registry: SessionRegistry,
        host: Arc<dyn BackgroundHost>,
        config: BackgroundConfig,
    ) -> Self {
        Self {
            registry,
            host,
            config,
            phase: Mutex::new(Phase::Foreground),
        }
    }

    fn set_phase(&self, from: Phase, to: Phase) -> bool {
        let mut phase = self.phase.lock().unwrap_or_else(|e| e.into_inner());
        if *phase != from {
            return false;
        }
        *phase = to;
        true
    }

    /// Persists pending bookkeeping and streaming buffers inside one
    /// extension window, finishing before the host's deadline minus the
    /// configured margin. Repeated calls in the same cycle are skipped.
    ///
    /// Must be called from within a Tokio runtime when the host arms its
    /// expiration on a timer, as [`DeadlineHost`] does.
    pub fn handle_did_enter_background(&self) -> BackgroundOutcome {
        if !self.set_phase(Phase::Foreground, Phase::Flushing) {
            tracing::debug!("background flush already handled for this cycle");
            return BackgroundOutcome::Skipped;
        }

        let expired = CancellationToken::new();
        let on_expiration = expired.clone();
        let Some(handle) = self.host.begin(Box::new(move || on_expiration.cancel())) else {
            tracing::warn!("no background window granted, saving session list only");
            self.registry.persist_summaries();
            self.set_phase(Phase::Flushing, Phase::Background);
            return BackgroundOutcome::Unavailable;
        };

        let remaining = self.host.remaining_time();
        let outcome = if remaining < self.config.minimum_window() {
            tracing::warn!(remaining_ms = remaining.as_millis() as u64, "background window too short, saving session list only");
            self.registry.persist_summaries();
            BackgroundOutcome::Completed { flushed: 0 }
        } else {
            let budget = remaining.saturating_sub(self.config.expiration_margin());
            self.flush_within(budget, &expired)
        };

        self.host.end(handle);
        self.set_phase(Phase::Flushing, Phase::Background);
        tracing::info!(
            ?outcome,
            pending = self.registry.pending_session_count(),
            "background flush finished"
        );
        outcome
    }

    fn flush_within(&self, budget: Duration, expired: &CancellationToken) -> BackgroundOutcome {
        let deadline = Instant::now() + budget;
        let report = self
            .registry
            .flush_to_cache(|| expired.is_cancelled() || Instant::now() >= deadline);
        if report.interrupted {
            tracing::warn!(flushed = report.flushed, "background window closed before flush finished");
            BackgroundOutcome::Expired {
                flushed: report.flushed,
            }
        } else {
            BackgroundOutcome::Completed {
                flushed: report.flushed,
            }
        }
    }

    /// Re-arms the bridge for the next background transition.
    pub fn handle_will_enter_foreground(&self) {
        let mut phase = self.phase.lock().unwrap_or_else(|e| e.into_inner());
        if *phase == Phase::Flushing {
            tracing::debug!("returned to foreground during flush");
        }
        *phase = Phase::Foreground;
    }
}
