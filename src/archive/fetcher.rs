use std::sync::Arc;

use crate::ring::{Event, EventId, EventSource, SourceError};

/// One normalized page of history.
#[derive(Debug, Default)]
pub struct Page {
    /// Newest first, all strictly older than the requested cursor.
    pub events: Vec<Event>,
    /// Events the source returned that were not older than the cursor.
    pub discarded: usize,
}

/// Wraps the source's paginated history call. Read-only, never retries:
/// a failed call is the caller's problem.
#[derive(Clone)]
pub struct EventPageFetcher {
    source: Arc<dyn EventSource>,
}

impl EventPageFetcher {
    pub fn new(source: Arc<dyn EventSource>) -> Self {
        Self { source }
    }

    pub async fn fetch_page(&self, cursor: EventId, page_size: usize) -> Result<Page, SourceError> {
        let raw = self.source.history(cursor, page_size).await?;
        let returned = raw.len();

        let mut events: Vec<Event> = raw.into_iter().filter(|e| e.id < cursor).collect();
        let discarded = returned - events.len();
        if discarded > 0 {
            tracing::warn!(
                "Source returned {} events not older than cursor {}, ignoring them",
                discarded,
                cursor
            );
        }

        events.sort_by(|a, b| b.id.cmp(&a.id));
        events.truncate(page_size);

        tracing::debug!(
            cursor = %cursor,
            count = events.len(),
            "Fetched history page"
        );
        Ok(Page { events, discarded })
    }
}
