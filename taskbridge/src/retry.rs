use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::errors::AutomationError;

/// Bounded-retry policy shared by the element resolver, session manager
/// and verification client.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(500),
        }
    }
}

/// Run `op` up to `policy.max_attempts` times, sleeping `backoff * attempt`
/// between attempts. Only transient errors are retried; anything else is
/// returned immediately so callers can escalate (e.g. session loss).
pub async fn with_retry<T, F, Fut>(
    label: &str,
    policy: RetryPolicy,
    mut op: F,
) -> Result<T, AutomationError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AutomationError>>,
{
    let mut last_err = None;
    for attempt in 1..=policy.max_attempts.max(1) {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < policy.max_attempts => {
                warn!(
                    "{label}: attempt {attempt}/{} failed: {e}",
                    policy.max_attempts
                );
                tokio::time::sleep(policy.backoff * attempt).await;
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_err
        .unwrap_or_else(|| AutomationError::Timeout(format!("{label}: retries exhausted"))))
}
