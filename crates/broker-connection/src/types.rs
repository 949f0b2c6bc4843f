//! Public types for the broker connection.

use std::time::Duration;

use gnbwatch_protocol::StompFrame;
use gnbwatch_protocol::constants::CONNECT_RETRY_INTERVAL;

/// Callback invoked for every MESSAGE frame of a subscription.
///
/// Runs on the connection's read pump; it must not block.
pub type MessageCallback = Box<dyn Fn(StompFrame) + Send + Sync>;

/// Callback invoked once when the link drops without being closed locally.
pub type DisconnectCallback = Box<dyn Fn() + Send + Sync>;

/// How the wait between connection attempts grows.
#[derive(Debug, Clone, PartialEq)]
pub enum Backoff {
    /// Always wait exactly the base interval.
    Fixed,
    /// Multiply the interval per attempt, capped at `max`, with ±25% jitter.
    Exponential { factor: f64, max: Duration },
}

/// Connection retry policy.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Base wait between attempts. Never waited less than this.
    pub interval: Duration,
    /// Total attempts before giving up; `None` retries until cancelled.
    pub max_attempts: Option<u32>,
    pub backoff: Backoff,
}

/// Default cap: one minute of attempts at the fixed interval.
pub const DEFAULT_MAX_CONNECT_ATTEMPTS: u32 = 120;

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval: CONNECT_RETRY_INTERVAL,
            max_attempts: Some(DEFAULT_MAX_CONNECT_ATTEMPTS),
            backoff: Backoff::Fixed,
        }
    }
}

impl RetryPolicy {
    /// Retry forever at a fixed interval.
    pub fn unbounded(interval: Duration) -> Self {
        Self {
            interval,
            max_attempts: None,
            backoff: Backoff::Fixed,
        }
    }

    /// Whether another attempt may follow attempt number `attempt` (1-based).
    pub fn allows_retry_after(&self, attempt: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempt < max)
    }

    /// Wait after failed attempt number `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match &self.backoff {
            Backoff::Fixed => self.interval,
            Backoff::Exponential { factor, max } => {
                let exp = attempt.saturating_sub(1).min(63) as i32;
                let secs = self.interval.as_secs_f64() * factor.powi(exp);
                let capped = secs.min(max.as_secs_f64());
                // Add ±25% jitter.
                let jitter = capped * 0.25;
                let offset = (std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .unwrap_or_default()
                    .subsec_nanos() as f64
                    / u32::MAX as f64)
                    * 2.0
                    - 1.0; // [-1.0, 1.0)
                let with_jitter = (capped + jitter * offset).max(self.interval.as_secs_f64());
                Duration::from_secs_f64(with_jitter)
            }
        }
    }
}
