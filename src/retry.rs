//! Capped exponential backoff for transient driver errors.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::errors::{PoiesisError, Result};

/// Retry policy applied at the driver boundary: a fixed number of attempts
/// with exponentially growing, capped delays between them.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub attempts: u32,
    pub base: Duration,
    pub cap: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            attempts: 3,
            base: Duration::from_millis(500),
            cap: Duration::from_secs(5),
        }
    }
}

impl Backoff {
    /// Delay before the retry following attempt `n` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = self.base.saturating_mul(2u32.saturating_pow(attempt));
        exp.min(self.cap)
    }
}

/// Run `op` until it succeeds, the error is not transient, or the policy
/// is exhausted. The last error is promoted to the caller unchanged; the
/// workload boundary decides whether that becomes a `SYSTEM_ERROR`.
pub async fn retry<T, F, Fut>(policy: Backoff, what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt + 1 < policy.attempts => {
                let delay = policy.delay(attempt);
                warn!(
                    operation = what,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient failure, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Promote an exhausted transient error into a `SystemFailure`.
pub fn promote(err: PoiesisError) -> PoiesisError {
    if err.is_transient() {
        PoiesisError::SystemFailure(err.to_string())
    } else {
        err
    }
}
