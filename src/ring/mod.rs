//! Ring event source: the remote camera history the archiver walks.
//!
//! The archive engine only sees the [`EventSource`] trait. [`client`] holds
//! the HTTP implementation and [`auth`] the OAuth token cache behind it.

pub mod auth;
pub mod client;
pub mod error;

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use self::error::SourceError;

/// Opaque, totally ordered event identifier. Larger ids are newer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub u64);

impl EventId {
    /// Cursor that is newer than every real event: start from the latest.
    pub const NEWEST: EventId = EventId(u64::MAX);
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EventId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(EventId)
    }
}

/// One recorded event from a camera's history. Immutable once fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub id: EventId,
    pub created_at: DateTime<Utc>,
    pub device_name: String,
}

/// Paginated event history plus recording download for a single camera.
///
/// Implemented by [`client::Camera`] against the Ring API and by an
/// in-memory fake in tests.
#[async_trait::async_trait]
pub trait EventSource: Send + Sync {
    /// Display name of the camera this source is bound to.
    fn device_name(&self) -> &str;

    /// Events strictly older than `older_than`, newest first, at most `limit`.
    /// An empty result means the history is exhausted.
    async fn history(&self, older_than: EventId, limit: usize) -> Result<Vec<Event>, SourceError>;

    /// Write the recording for `id` to `dest`, creating or truncating it.
    async fn download(&self, id: EventId, dest: &Path) -> Result<(), SourceError>;
}
