//! How long to wait before reconnecting.
//!
//! The default is [`FixedDelay`] of 2 seconds: no growth, no jitter, no
//! attempt limit. The remote agent is expected to run on the same machine,
//! so retrying it is cheap. Deployments that talk to something further
//! away can plug in [`ExponentialBackoff`] without touching the connection
//! state machine.

use std::time::Duration;

/// Default pause between a close and the next connect attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(2000);

pub trait ReconnectPolicy: Send + Sync + std::fmt::Debug {
    /// Delay before the next attempt.
    ///
    /// `retry` counts consecutive attempts that never got connected:
    /// 0 right after a connection that was up, then 1, 2, ...
    fn delay(&self, retry: u32) -> Duration;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedDelay(pub Duration);

impl Default for FixedDelay {
    fn default() -> Self {
        Self(DEFAULT_RECONNECT_DELAY)
    }
}

impl ReconnectPolicy for FixedDelay {
    fn delay(&self, _retry: u32) -> Duration {
        self.0
    }
}

/// `base * 2^retry`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoff {
    pub base: Duration,
    pub max: Duration,
}

impl ReconnectPolicy for ExponentialBackoff {
    fn delay(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.min(31));
        self.base.saturating_mul(factor).min(self.max)
    }
}
