//! Exponential backoff policy with jitter.
//!
//! Shared by the RPC client (transient network errors) and the webhook
//! dispatcher (delivery retry scheduling) — same math, different configs.

use std::time::Duration;

/// Configuration for a backoff policy.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts allowed (first try included).
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base: Duration,
    /// Upper bound on any computed delay, jitter included.
    pub cap: Duration,
    /// Multiplier applied per attempt.
    pub multiplier: f64,
    /// Fraction of the delay randomized away (0.0 = deterministic).
    pub jitter_fraction: f64,
}

impl RetryConfig {
    /// RPC defaults: base 500ms, cap 30s, 8 attempts.
    pub fn rpc() -> Self {
        Self {
            max_attempts: 8,
            base: Duration::from_millis(500),
            cap: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_fraction: 0.2,
        }
    }

    /// Webhook delivery defaults: base 1s, cap 10min, 8 attempts.
    pub fn delivery() -> Self {
        Self {
            max_attempts: 8,
            base: Duration::from_secs(1),
            cap: Duration::from_secs(600),
            multiplier: 2.0,
            jitter_fraction: 0.2,
        }
    }
}

/// Stateless backoff policy — computes delays from the attempt number.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Deterministic delay after `attempt` failures (1-based), capped.
    /// Non-decreasing in `attempt`.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(63) as i32;
        let ms = self.config.base.as_millis() as f64 * self.config.multiplier.powi(exp);
        let capped = ms.min(self.config.cap.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    /// `base_delay` with jitter subtracted, so the result never exceeds the
    /// cap. Jitter is derived from the clock's subsecond nanos — enough to
    /// de-synchronize a fleet without pulling in a rand dependency.
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if self.config.jitter_fraction <= 0.0 {
            return base;
        }
        let unit = (std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos() as f64)
            / f64::from(u32::MAX);
        let jitter = base.as_millis() as f64 * self.config.jitter_fraction * unit;
        Duration::from_millis((base.as_millis() as f64 - jitter) as u64)
    }

    /// Delay before the next try, or `None` once the budget is spent.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.config.max_attempts {
            return None;
        }
        Some(self.delay(attempt))
    }
}
