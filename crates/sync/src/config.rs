//! Engine configuration

use std::time::Duration;

/// Reconnect backoff tuning.
///
/// Delays double per attempt from `base_delay` up to `max_delay`, with a
/// random jitter of up to `max_jitter_frac` of the capped delay added on
/// top so a fleet of clients does not reconnect in lockstep.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_jitter_frac: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            max_jitter_frac: 0.25,
        }
    }
}

impl BackoffConfig {
    /// Delay to wait before reconnect attempt `attempt` (0-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        // Exponent clamped so the multiplication cannot overflow
        let doubled = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt.min(16)));
        let capped = doubled.min(self.max_delay);
        if self.max_jitter_frac <= 0.0 {
            return capped;
        }
        let jitter = capped.mul_f64(rand::random::<f64>() * self.max_jitter_frac);
        capped + jitter
    }
}

/// Top-level sync engine configuration
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// WebSocket endpoint of the docket server, e.g. `ws://127.0.0.1:4000/ws`
    pub endpoint: String,
    pub backoff: BackoffConfig,
    /// Interval between keepalive pings on an established connection
    pub ping_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            endpoint: "ws://127.0.0.1:4000/ws".to_string(),
            backoff: BackoffConfig::default(),
            ping_interval: Duration::from_secs(20),
        }
    }
}

impl SyncConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }
}
