use thiserror::Error;

use crate::ring::{EventId, SourceError};

/// Run-level failures. Anything that happens to a single event is an
/// [`Outcome`](super::Outcome), not one of these.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Event source unavailable fetching history older than {cursor}: {source}")]
    SourceUnavailable {
        cursor: EventId,
        #[source]
        source: SourceError,
    },

    /// The source returned events, but none older than the cursor, so the
    /// walk cannot make progress.
    #[error("History did not advance past cursor {cursor}: {discarded} events were not older")]
    CursorStalled { cursor: EventId, discarded: usize },
}
