use std::fmt;
use std::path::Path;
use std::sync::Arc;

use tokio::fs;
use tokio_util::sync::CancellationToken;

use super::paths::part_path;
use crate::retry::{self, ErrorKind, RetryConfig, RetryError};
use crate::ring::{Event, EventSource, SourceError};

/// Terminal result of archiving one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// A complete file was already at the destination.
    Skipped,
    Downloaded,
    Failed(FailureReason),
}

/// Why an event could not be archived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// Every allowed attempt failed; `kind` and `message` describe the last.
    Exhausted {
        kind: ErrorKind,
        attempts: u32,
        message: String,
    },
    /// Shutdown arrived while waiting to retry.
    Cancelled { attempts: u32, message: String },
    /// The destination directory could not be prepared.
    Filesystem(String),
    /// The worker handling the event panicked.
    Panicked(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Exhausted {
                kind,
                attempts,
                message,
            } => write!(f, "[{}] gave up after {} attempts: {}", kind, attempts, message),
            FailureReason::Cancelled { attempts, message } => {
                write!(f, "interrupted by shutdown after {} attempts: {}", attempts, message)
            }
            FailureReason::Filesystem(message) => write!(f, "filesystem error: {}", message),
            FailureReason::Panicked(message) => write!(f, "worker panicked: {}", message),
        }
    }
}

/// Map a source error to its diagnostic retry class.
///
/// 404 means the recording is still being processed. A 504 and a request
/// that hit the client timeout both count as a gateway timeout. Dropped
/// connections are told apart from everything else.
pub fn classify(err: &SourceError) -> ErrorKind {
    match err {
        SourceError::HttpStatus { status: 404, .. } => ErrorKind::NotReadyYet,
        SourceError::HttpStatus { status: 504, .. } => ErrorKind::GatewayTimeout,
        SourceError::Disconnected(_) => ErrorKind::RemoteDisconnected,
        SourceError::Http(e) if e.is_timeout() => ErrorKind::GatewayTimeout,
        SourceError::Http(e) if e.is_connect() || e.is_body() || e.is_request() => {
            ErrorKind::RemoteDisconnected
        }
        SourceError::Io(e) => match e.kind() {
            std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::UnexpectedEof => ErrorKind::RemoteDisconnected,
            _ => ErrorKind::Unrecognized,
        },
        _ => ErrorKind::Unrecognized,
    }
}

/// Downloads one event's recording, retrying every failure with a fixed
/// delay. Each attempt streams into `<path>.part` and only a complete
/// transfer is renamed onto `path`.
#[derive(Clone)]
pub struct DownloadExecutor {
    source: Arc<dyn EventSource>,
    retry: RetryConfig,
    shutdown: CancellationToken,
}

impl DownloadExecutor {
    pub fn new(source: Arc<dyn EventSource>, retry: RetryConfig, shutdown: CancellationToken) -> Self {
        Self {
            source,
            retry,
            shutdown,
        }
    }

    pub async fn download(&self, event: &Event, path: &Path) -> Outcome {
        let part = part_path(path);

        let result = retry::retry_with_delay(&self.retry, &self.shutdown, classify, |attempt| {
            self.attempt(event, path, &part, attempt)
        })
        .await;

        match result {
            Ok(()) => Outcome::Downloaded,
            Err(e) => {
                let _ = fs::remove_file(&part).await;
                Outcome::Failed(match e {
                    RetryError::Exhausted {
                        attempts,
                        kind,
                        last,
                    } => FailureReason::Exhausted {
                        kind,
                        attempts,
                        message: last.to_string(),
                    },
                    RetryError::Cancelled { attempts, last } => FailureReason::Cancelled {
                        attempts,
                        message: last.to_string(),
                    },
                })
            }
        }
    }

    async fn attempt(
        &self,
        event: &Event,
        path: &Path,
        part: &Path,
        attempt: u32,
    ) -> Result<(), SourceError> {
        // Never build on a previous attempt's bytes.
        let _ = fs::remove_file(part).await;
        tracing::debug!(id = %event.id, attempt, path = %path.display(), "downloading");
        self.source.download(event.id, part).await?;
        fs::rename(part, path).await?;
        Ok(())
    }
}
