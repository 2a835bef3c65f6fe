use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables for the flush performed when the host app is suspended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackgroundConfig {
    /// Slack kept between the end of our work and the host's expiration.
    #[serde(default = "default_expiration_margin_ms")]
    pub expiration_margin_ms: u64,
    /// Below this budget only session bookkeeping is written.
    #[serde(default = "default_minimum_window_ms")]
    pub minimum_window_ms: u64,
}

fn default_expiration_margin_ms() -> u64 {
    500
}

fn default_minimum_window_ms() -> u64 {
    1000
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            expiration_margin_ms: default_expiration_margin_ms(),
            minimum_window_ms: default_minimum_window_ms(),
        }
    }
}

impl BackgroundConfig {
    pub fn expiration_margin(&self) -> Duration {
        Duration::from_millis(self.expiration_margin_ms)
    }

    pub fn minimum_window(&self) -> Duration {
        Duration::from_millis(self.minimum_window_ms)
    }
}
