use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Diagnostic class of a failed download attempt.
///
/// Every class currently gets the same fixed delay; the class is carried
/// through so logs and the final summary can say why an event failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The recording exists but the source has not finished processing it.
    NotReadyYet,
    GatewayTimeout,
    RemoteDisconnected,
    Unrecognized,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorKind::NotReadyYet => "Not Ready Yet",
            ErrorKind::GatewayTimeout => "Gateway Timeout",
            ErrorKind::RemoteDisconnected => "Remote Disconnected",
            ErrorKind::Unrecognized => "Unrecognized Error",
        };
        f.write_str(label)
    }
}

/// Fixed-delay retry configuration.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    /// Total attempts per download, including the first.
    pub max_retries: u32,
    pub delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 50,
            delay_secs: 5,
        }
    }
}

impl RetryConfig {
    /// Delay before the attempt following failed attempt number `attempt`
    /// (1-indexed). Independent of `kind` and `attempt` for now.
    pub fn delay_for(&self, _kind: ErrorKind, _attempt: u32) -> Duration {
        Duration::from_secs(self.delay_secs)
    }

    fn attempt_cap(&self) -> u32 {
        self.max_retries.max(1)
    }
}

/// Why [`retry_with_delay`] gave up.
#[derive(Debug)]
pub enum RetryError<E> {
    /// Every allowed attempt failed.
    Exhausted { attempts: u32, kind: ErrorKind, last: E },
    /// Shutdown was requested while waiting to retry.
    Cancelled { attempts: u32, last: E },
}

/// Retry an async operation with a fixed delay between attempts.
///
/// - `classifier` maps each error to an [`ErrorKind`]; all kinds are retried
/// - `operation` receives the 1-indexed attempt number
///
/// Gives up after `config.max_retries` attempts, or early when `shutdown`
/// fires during a retry sleep. No sleep follows the final attempt.
pub async fn retry_with_delay<F, Fut, T, E, C>(
    config: &RetryConfig,
    shutdown: &CancellationToken,
    classifier: C,
    operation: F,
) -> Result<T, RetryError<E>>
where
    F: Fn(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> ErrorKind,
    E: fmt::Display,
{
    let total_attempts = config.attempt_cap();
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let err = match operation(attempt).await {
            Ok(val) => return Ok(val),
            Err(e) => e,
        };

        let kind = classifier(&err);
        if attempt >= total_attempts {
            return Err(RetryError::Exhausted {
                attempts: attempt,
                kind,
                last: err,
            });
        }

        let delay = config.delay_for(kind, attempt);
        tracing::warn!(
            "[{}] Download failed ({}). Retrying {}/{} in {}s...",
            kind,
            err,
            attempt,
            total_attempts,
            delay.as_secs()
        );
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.cancelled() => {
                return Err(RetryError::Cancelled {
                    attempts: attempt,
                    last: err,
                });
            }
        }
    }
}
