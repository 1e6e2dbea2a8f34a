//! Connection retry policy.

use std::time::Duration;

/// How an initiator retries opening its channel.
///
/// Retries use a fixed delay. Only the initial connection is retried; once a
/// channel is open, I/O failures are fatal to its worker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay between a failed attempt and the next one.
    pub delay: Duration,

    /// Maximum number of attempts. `None` retries forever.
    pub max_attempts: Option<u32>,

    /// Upper bound on a single connection attempt. `None` waits as long as
    /// the network provider does.
    pub connect_timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(500),
            max_attempts: None, // Peers may start in any order
            connect_timeout: None,
        }
    }
}

impl RetryPolicy {
    /// Unbounded retries with the given fixed delay.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    /// Give up after `attempts` attempts.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Bound each attempt by `timeout`.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Preset for nodes sharing one host or one process.
    pub fn local_network() -> Self {
        Self {
            delay: Duration::from_millis(10),
            max_attempts: None,
            connect_timeout: Some(Duration::from_secs(1)),
        }
    }

    /// Whether attempt number `attempt` (1-based) may be followed by another.
    pub(crate) fn allows_retry_after(&self, attempt: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempt < max)
    }
}
