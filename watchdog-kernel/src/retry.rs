//! Exponential backoff with jitter for remediation calls.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub max_attempts: u32,
    pub initial: Duration,
    pub max_backoff: Duration,
    /// Fraction max ajoutée à chaque attente (0.2 = jusqu'à +20%).
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial: Duration::from_secs(1),
            max_backoff: Duration::from_secs(16),
            jitter: 0.2,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("cancelled during retry")]
    Cancelled,
    #[error("max retries exceeded after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },
}

impl BackoffPolicy {
    fn sleep_for(&self, backoff: Duration) -> Duration {
        if self.jitter <= 0.0 {
            return backoff;
        }
        let factor = 1.0 + rand::thread_rng().gen_range(0.0..=self.jitter);
        backoff.mul_f64(factor)
    }
}

/// Exécute `op` jusqu'à `max_attempts` fois.
///
/// Entre deux échecs : attente `backoff * (1 + jitter)` puis doublement du
/// backoff jusqu'au plafond. L'annulation interrompt immédiatement l'attente.
pub async fn with_backoff<T, E, F, Fut>(
    cancel: &CancellationToken,
    policy: &BackoffPolicy,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let attempts = policy.max_attempts.max(1);
    let mut backoff = policy.initial;
    let mut attempt = 0;

    loop {
        attempt += 1;
        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled);
        }
        if attempt >= attempts {
            return Err(RetryError::Exhausted { attempts: attempt, last: err });
        }

        let wait = policy.sleep_for(backoff);
        debug!(attempt, error = %err, wait_ms = wait.as_millis() as u64, "attempt failed, backing off");

        tokio::select! {
            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
            _ = tokio::time::sleep(wait) => {}
        }
        backoff = (backoff * 2).min(policy.max_backoff);
    }
}
