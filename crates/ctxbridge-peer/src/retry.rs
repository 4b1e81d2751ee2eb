//! Caller-side retry with backoff, composed around a call.
//!
//! The channel never retries on its own. Wrap the call instead:
//!
//! ```ignore
//! let policy = RetryPolicy::exponential_backoff(3, Duration::from_millis(100));
//! let value = retry(&policy, |err| matches!(err, PeerError::Reconnected { .. }), || {
//!     channel.call("Tabs.state", vec![])
//! })
//! .await?;
//! ```

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::error::{PeerError, Result};

/// Bounded retry behavior with backoff.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt (0 = no retries).
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub backoff_multiplier: f64,
    /// Upper bound on a single backoff.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

impl RetryPolicy {
    /// Fail on the first error.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            initial_backoff: Duration::ZERO,
            backoff_multiplier: 1.0,
            max_backoff: Duration::ZERO,
        }
    }

    pub fn fixed(max_retries: u32, backoff: Duration) -> Self {
        Self {
            max_retries,
            initial_backoff: backoff,
            backoff_multiplier: 1.0,
            max_backoff: backoff,
        }
    }

    /// Doubling backoff, capped at 30 seconds.
    pub fn exponential_backoff(max_retries: u32, initial_backoff: Duration) -> Self {
        Self {
            max_retries,
            initial_backoff,
            backoff_multiplier: 2.0,
            max_backoff: Duration::from_secs(30),
        }
    }

    /// Backoff before retry number `attempt` (0-based).
    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        let factor = self
            .backoff_multiplier
            .max(1.0)
            .powi(i32::try_from(attempt).unwrap_or(i32::MAX));
        let cap = self.max_backoff.max(self.initial_backoff);
        let nanos = self.initial_backoff.as_nanos() as f64 * factor;
        if !nanos.is_finite() || nanos >= cap.as_nanos() as f64 {
            return cap;
        }
        Duration::from_nanos(nanos as u64)
    }
}

/// Run `op` until it succeeds, fails with an error `should_retry` rejects,
/// or the policy runs out of retries. The last error is returned.
pub async fn retry<T, F, Fut>(
    policy: &RetryPolicy,
    should_retry: impl Fn(&PeerError) -> bool,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < policy.max_retries && should_retry(&err) => {
                let backoff = policy.backoff_duration(attempt);
                debug!(attempt = attempt + 1, ?backoff, error = %err, "retrying call");
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Errors that are usually worth another attempt.
pub fn is_transient(err: &PeerError) -> bool {
    matches!(
        err,
        PeerError::Reconnected { .. } | PeerError::Timeout { .. }
    )
}
