//! Exponential backoff for transient failures
//!
//! Workers use [`RetryPolicy::backoff_for`] between storage attempts; adapters
//! can use [`retry_with_backoff`] for connection bootstrap.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry policy shared by store calls and connection bootstrap
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,

    /// Delay before the second attempt
    pub initial_backoff: Duration,

    /// Upper bound for any single delay
    pub max_backoff: Duration,

    /// Multiplier for exponential backoff (typically 2.0)
    pub backoff_multiplier: f64,

    /// Scale each delay to 50-100% to spread out retries
    pub use_jitter: bool,
}

impl RetryPolicy {
    /// Defaults: 3 attempts, 50ms initial delay doubling up to 2s, with jitter
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_initial_backoff(mut self, delay: Duration) -> Self {
        self.initial_backoff = delay;
        self
    }

    pub fn with_max_backoff(mut self, delay: Duration) -> Self {
        self.max_backoff = delay;
        self
    }

    pub fn without_jitter(mut self) -> Self {
        self.use_jitter = false;
        self
    }

    /// Delay to wait after the given failed attempt (1-based)
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let base_ms = self.initial_backoff.as_millis() as f64 * self.backoff_multiplier.powi(exponent);
        let capped_ms = base_ms.min(self.max_backoff.as_millis() as f64);
        let delay_ms = if self.use_jitter {
            capped_ms * jitter_factor()
        } else {
            capped_ms
        };
        Duration::from_millis(delay_ms.max(0.0) as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(2),
            backoff_multiplier: 2.0,
            use_jitter: true,
        }
    }
}

/// Random value in [0.5, 1.0)
fn jitter_factor() -> f64 {
    use std::collections::hash_map::RandomState;
    use std::hash::BuildHasher;

    let seed = RandomState::new().hash_one(std::time::SystemTime::now());
    (seed % 50) as f64 / 100.0 + 0.5
}

/// Retry an async operation with exponential backoff
///
/// # Example
/// ```ignore
/// use event_pipeline::{retry_with_backoff, RetryPolicy};
///
/// let db = retry_with_backoff(
///     || async { Database::connect(options.clone()).await },
///     RetryPolicy::new().with_max_attempts(5),
/// ).await?;
/// ```
pub async fn retry_with_backoff<F, Fut, T, E>(mut operation: F, policy: RetryPolicy) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(attempt, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if attempt >= policy.max_attempts => {
                warn!(attempts = attempt, error = %e, "Operation failed, giving up");
                return Err(e);
            }
            Err(e) => {
                let delay = policy.backoff_for(attempt);
                debug!(
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Operation failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
