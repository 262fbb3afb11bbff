//! In-memory event source for engine tests.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use chrono::DateTime;

use crate::ring::{Event, EventId, EventSource, SourceError};

pub(crate) const DEVICE: &str = "High from Garage";

pub(crate) fn event(id: u64) -> Event {
    Event {
        id: EventId(id),
        created_at: DateTime::from_timestamp(1_692_694_740 + id as i64, 0).unwrap(),
        device_name: DEVICE.to_string(),
    }
}

type ErrorFactory = fn() -> SourceError;

pub(crate) fn not_ready() -> SourceError {
    SourceError::HttpStatus {
        status: 404,
        url: "https://api.example/recording".into(),
    }
}

pub(crate) fn gateway_timeout() -> SourceError {
    SourceError::HttpStatus {
        status: 504,
        url: "https://api.example/recording".into(),
    }
}

/// Fake camera with scripted failures and concurrency instrumentation.
pub(crate) struct FakeSource {
    events: Vec<Event>,
    ignore_cursor: bool,
    unavailable: bool,
    download_delay: Duration,
    panic_on: Option<EventId>,
    /// Remaining failures per event id, and the error each one produces.
    failures: Mutex<HashMap<EventId, (u32, ErrorFactory)>>,
    downloads: Mutex<Vec<EventId>>,
    history_calls: Mutex<Vec<(EventId, usize)>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeSource {
    pub(crate) fn new(ids: &[u64]) -> Self {
        let mut events: Vec<Event> = ids.iter().map(|&id| event(id)).collect();
        events.sort_by(|a, b| b.id.cmp(&a.id));
        Self::with_events(events)
    }

    pub(crate) fn with_events(events: Vec<Event>) -> Self {
        Self {
            events,
            ignore_cursor: false,
            unavailable: false,
            download_delay: Duration::ZERO,
            panic_on: None,
            failures: Mutex::new(HashMap::new()),
            downloads: Mutex::new(Vec::new()),
            history_calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Return every event on every history call, whatever the cursor.
    pub(crate) fn ignoring_cursor(mut self) -> Self {
        self.ignore_cursor = true;
        self
    }

    /// Fail every history call with a 503.
    pub(crate) fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }

    pub(crate) fn with_download_delay(mut self, delay: Duration) -> Self {
        self.download_delay = delay;
        self
    }

    /// Panic instead of downloading `id`.
    pub(crate) fn panicking(mut self, id: u64) -> Self {
        self.panic_on = Some(EventId(id));
        self
    }

    /// Fail the first `times` download attempts of `id` with `error()`.
    pub(crate) fn failing(self, id: u64, times: u32, error: ErrorFactory) -> Self {
        self.failures
            .lock()
            .unwrap()
            .insert(EventId(id), (times, error));
        self
    }

    /// Every download attempt, in start order.
    pub(crate) fn downloads(&self) -> Vec<EventId> {
        self.downloads.lock().unwrap().clone()
    }

    pub(crate) fn attempts_for(&self, id: u64) -> usize {
        self.downloads()
            .iter()
            .filter(|&&d| d == EventId(id))
            .count()
    }

    pub(crate) fn history_calls(&self) -> Vec<(EventId, usize)> {
        self.history_calls.lock().unwrap().clone()
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl EventSource for FakeSource {
    fn device_name(&self) -> &str {
        DEVICE
    }

    async fn history(&self, older_than: EventId, limit: usize) -> Result<Vec<Event>, SourceError> {
        self.history_calls.lock().unwrap().push((older_than, limit));
        if self.unavailable {
            return Err(SourceError::HttpStatus {
                status: 503,
                url: "https://api.example/history".into(),
            });
        }
        Ok(self
            .events
            .iter()
            .filter(|e| self.ignore_cursor || e.id < older_than)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn download(&self, id: EventId, dest: &Path) -> Result<(), SourceError> {
        self.downloads.lock().unwrap().push(id);
        if self.panic_on == Some(id) {
            panic!("fake source refuses event {}", id);
        }
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.download_delay.is_zero() {
            tokio::time::sleep(self.download_delay).await;
        }

        let failure = {
            let mut failures = self.failures.lock().unwrap();
            match failures.get_mut(&id) {
                Some((remaining, error)) if *remaining > 0 => {
                    *remaining -= 1;
                    Some(*error)
                }
                _ => None,
            }
        };

        let result = match failure {
            // Leave a half-written file behind, like a dropped transfer.
            Some(error) => match tokio::fs::write(dest, b"partial").await {
                Ok(()) => Err(error()),
                Err(e) => Err(e.into()),
            },
            None => tokio::fs::write(dest, format!("video-{}", id))
                .await
                .map_err(SourceError::from),
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}
