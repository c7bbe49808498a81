//! Retry-with-delay for fallible async operations.

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Waits used when no delay schedule is configured.
pub const DEFAULT_DELAYS: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(3),
    Duration::from_secs(5),
];

/// Returned when cancellation interrupts a wait between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("retry aborted by cancellation")]
pub struct Cancelled;

/// How many times to retry, how long to wait in between, and which errors
/// deserve another attempt.
///
/// The delay list may be shorter than `max_retries`; once it runs out the
/// next attempt starts immediately.
pub struct RetryConfig<E> {
    pub max_retries: usize,
    pub delays: Vec<Duration>,
    pub is_retryable: fn(&E) -> bool,
}

impl<E> RetryConfig<E> {
    /// `delays: None` selects [`DEFAULT_DELAYS`].
    pub fn new(max_retries: usize, delays: Option<Vec<Duration>>, is_retryable: fn(&E) -> bool) -> Self {
        Self {
            max_retries,
            delays: delays.unwrap_or_else(|| DEFAULT_DELAYS.to_vec()),
            is_retryable,
        }
    }
}

impl<E> Clone for RetryConfig<E> {
    fn clone(&self) -> Self {
        Self {
            max_retries: self.max_retries,
            delays: self.delays.clone(),
            is_retryable: self.is_retryable,
        }
    }
}

impl<E> std::fmt::Debug for RetryConfig<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryConfig")
            .field("max_retries", &self.max_retries)
            .field("delays", &self.delays)
            .finish()
    }
}

/// Runs `op` up to `max_retries + 1` times.
///
/// A non-retryable error is returned immediately. Between attempts the next
/// configured delay is awaited; cancellation during that wait aborts with
/// [`Cancelled`].
pub async fn run<T, E, F, Fut>(
    cancel: &CancellationToken,
    config: &RetryConfig<E>,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<Cancelled> + std::fmt::Display,
{
    let max_attempts = config.max_retries + 1;
    let mut attempt = 0usize;

    loop {
        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        attempt += 1;

        if !(config.is_retryable)(&err) {
            tracing::debug!(attempt, error = %err, "Non-retryable error, giving up");
            return Err(err);
        }
        if attempt >= max_attempts {
            tracing::warn!(attempts = attempt, error = %err, "Retry budget exhausted");
            return Err(err);
        }

        match config.delays.get(attempt - 1) {
            Some(delay) => {
                tracing::warn!(
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Transient failure, retrying"
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Err(Cancelled.into()),
                    _ = tokio::time::sleep(*delay) => {}
                }
            }
            None => {
                if cancel.is_cancelled() {
                    return Err(Cancelled.into());
                }
                tracing::warn!(attempt, max_attempts, error = %err, "Transient failure, retrying now");
            }
        }
    }
}
