//! Archive engine: walks a camera's event history backward from a cursor,
//! page by page, downloading every recording in the window exactly once.
//!
//! Pages are fetched strictly one after another. Within a page, downloads run
//! on a bounded worker pool and report back in completion order; the
//! controller here is the only owner of run state (counters, cursor, stop
//! decision). Existing files are skipped, so repeated runs over the same
//! window converge without re-downloading anything.

pub mod error;
pub mod executor;
pub mod fetcher;
pub mod lock;
pub mod paths;
pub mod scheduler;
#[cfg(test)]
pub(crate) mod testing;

use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;

pub use self::error::ArchiveError;
pub use self::executor::{FailureReason, Outcome};

use self::executor::DownloadExecutor;
use self::fetcher::EventPageFetcher;
use self::paths::PathResolver;
use crate::retry::RetryConfig;
use crate::ring::{Event, EventId, EventSource};

/// Range of history to archive: everything older than `initial_cursor`
/// down to and including `lower_bound`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveWindow {
    pub lower_bound: EventId,
    pub initial_cursor: EventId,
}

impl ArchiveWindow {
    pub fn contains(&self, id: EventId) -> bool {
        id >= self.lower_bound && id < self.initial_cursor
    }
}

/// Subset of application config consumed by the archive engine.
/// Decoupled from CLI parsing so the engine can be tested independently.
#[derive(Debug, Clone)]
pub struct ArchiveConfig {
    pub(crate) directory: PathBuf,
    pub(crate) page_size: usize,
    pub(crate) concurrency: usize,
    pub(crate) retry: RetryConfig,
    pub(crate) throttle: Duration,
    pub(crate) no_progress_bar: bool,
}

/// Why the pagination loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The source returned an empty page.
    HistoryExhausted,
    /// An event older than the lower bound was observed.
    BoundaryReached,
    /// Shutdown was requested.
    Cancelled,
}

/// Event that could not be archived, kept for the final report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedEvent {
    pub id: EventId,
    pub reason: FailureReason,
}

/// Result of one archive run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub downloaded: usize,
    pub skipped: usize,
    pub failed: Vec<FailedEvent>,
    pub pages: usize,
    pub stop_reason: StopReason,
    /// Cursor of the last page that was fully processed. Everything newer
    /// has an outcome; a later run can resume from here.
    pub cursor: EventId,
}

impl ArchiveSummary {
    fn new(cursor: EventId) -> Self {
        Self {
            downloaded: 0,
            skipped: 0,
            failed: Vec::new(),
            pages: 0,
            stop_reason: StopReason::HistoryExhausted,
            cursor,
        }
    }

    fn record(&mut self, event: &Event, outcome: Outcome) {
        match outcome {
            Outcome::Downloaded => self.downloaded += 1,
            Outcome::Skipped => self.skipped += 1,
            Outcome::Failed(reason) => self.failed.push(FailedEvent {
                id: event.id,
                reason,
            }),
        }
    }

    pub fn total(&self) -> usize {
        self.downloaded + self.skipped + self.failed.len()
    }

    pub fn failed_ids(&self) -> Vec<EventId> {
        self.failed.iter().map(|f| f.id).collect()
    }
}

/// Spinner for an unknown-length walk.
///
/// Returns `ProgressBar::hidden()` when the user passed `--no-progress-bar`
/// or stdout is not a TTY, so piped output and cron logs stay clean.
fn create_progress_bar(no_progress_bar: bool) -> ProgressBar {
    if no_progress_bar || !std::io::stdout().is_terminal() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner} [{elapsed_precise}] {pos} events {msg}") {
        pb.set_style(style);
    }
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

/// Archive every event in `window` from `source` into `config.directory`.
///
/// 1. Fetch the page older than the cursor (starting at `initial_cursor`).
/// 2. An empty page ends the run: history is exhausted.
/// 3. Events below the lower bound are never dispatched; the rest go to the
///    worker pool and are recorded as they complete.
/// 4. If the page reached below the lower bound, the run ends once the
///    in-window part has drained. Otherwise the cursor moves to the oldest id
///    in the page and the loop continues.
///
/// Per-event failures are recorded in the summary and never end the run.
/// Only a failed history fetch (or a source that stops moving backward) is
/// an error.
pub async fn archive(
    source: Arc<dyn EventSource>,
    window: ArchiveWindow,
    config: &ArchiveConfig,
    shutdown: CancellationToken,
) -> Result<ArchiveSummary, ArchiveError> {
    let started = Instant::now();
    let fetcher = EventPageFetcher::new(source.clone());
    let resolver = PathResolver::new(config.directory.clone());
    let executor = DownloadExecutor::new(source.clone(), config.retry, shutdown.clone());
    let pb = create_progress_bar(config.no_progress_bar);

    tracing::info!(
        device = source.device_name(),
        lower_bound = %window.lower_bound,
        initial_cursor = %window.initial_cursor,
        concurrency = config.concurrency,
        "Archiving into {}",
        resolver.root().display()
    );

    let mut summary = ArchiveSummary::new(window.initial_cursor);
    let mut cursor = window.initial_cursor;

    loop {
        if shutdown.is_cancelled() {
            summary.stop_reason = StopReason::Cancelled;
            break;
        }

        let page = fetcher
            .fetch_page(cursor, config.page_size)
            .await
            .map_err(|source| ArchiveError::SourceUnavailable { cursor, source })?;
        summary.pages += 1;

        let Some(oldest) = page.events.iter().map(|e| e.id).min() else {
            if page.discarded > 0 {
                return Err(ArchiveError::CursorStalled {
                    cursor,
                    discarded: page.discarded,
                });
            }
            pb.suspend(|| tracing::info!("Reached the end of the event history"));
            summary.stop_reason = StopReason::HistoryExhausted;
            break;
        };

        let (in_window, below): (Vec<Event>, Vec<Event>) = page
            .events
            .into_iter()
            .partition(|e| window.contains(e.id));
        pb.suspend(|| {
            tracing::info!(
                "Page {}: {} recordings older than {} ({} in window)",
                summary.pages,
                in_window.len() + below.len(),
                cursor,
                in_window.len()
            )
        });

        // Only in-window events are dispatched, so the bound is decided here.
        let boundary_reached = !below.is_empty();
        let mut run = scheduler::run_page(
            in_window,
            resolver.clone(),
            executor.clone(),
            config.concurrency,
            config.throttle,
            shutdown.clone(),
        );
        while let Some((event, outcome)) = run.next().await {
            report(&pb, &event, &outcome, summary.downloaded + 1);
            summary.record(&event, outcome);
            pb.inc(1);
            pb.set_message(format!(
                "({} downloaded, {} skipped, {} failed)",
                summary.downloaded,
                summary.skipped,
                summary.failed.len()
            ));
        }

        if boundary_reached {
            pb.suspend(|| {
                tracing::info!("Reached the lower bound {} for {}", window.lower_bound, source.device_name())
            });
            summary.stop_reason = StopReason::BoundaryReached;
            break;
        }
        if shutdown.is_cancelled() {
            summary.stop_reason = StopReason::Cancelled;
            break;
        }

        cursor = oldest;
        summary.cursor = cursor;
    }

    pb.finish_and_clear();
    log_summary(&summary, started.elapsed());
    Ok(summary)
}

fn report(pb: &ProgressBar, event: &Event, outcome: &Outcome, next_count: usize) {
    let date = event.created_at.format("%Y-%m-%d %H:%M:%S");
    pb.suspend(|| match outcome {
        Outcome::Downloaded => tracing::info!("Downloaded #{} -> {} @ {}", next_count, event.id, date),
        Outcome::Skipped => tracing::info!("Skipped {} @ {} (already archived)", event.id, date),
        Outcome::Failed(reason) => tracing::error!("Failed to download {} @ {}: {}", event.id, date, reason),
    });
}

fn log_summary(summary: &ArchiveSummary, elapsed: Duration) {
    let stop = match summary.stop_reason {
        StopReason::HistoryExhausted => "history exhausted",
        StopReason::BoundaryReached => "lower bound reached",
        StopReason::Cancelled => "interrupted",
    };
    tracing::info!("── Summary ──");
    tracing::info!(
        "  {} downloaded, {} skipped, {} failed, {} total",
        summary.downloaded,
        summary.skipped,
        summary.failed.len(),
        summary.total()
    );
    tracing::info!("  {} pages, stopped: {}", summary.pages, stop);
    tracing::info!("  elapsed: {}", format_duration(elapsed));
    if summary.stop_reason == StopReason::Cancelled && summary.cursor != EventId::NEWEST {
        tracing::info!("  resume with --initial-cursor {}", summary.cursor);
    }
    if !summary.failed.is_empty() {
        let ids: Vec<String> = summary.failed_ids().iter().map(|id| id.to_string()).collect();
        tracing::error!("  failed event ids (rerun to retry): {}", ids.join(", "));
        for failed in &summary.failed {
            tracing::debug!("    {}: {}", failed.id, failed.reason);
        }
    }
}

fn format_duration(d: Duration) -> String {
    let total_secs = d.as_secs();
    let hours = total_secs / 3600;
    let mins = (total_secs % 3600) / 60;
    let secs = total_secs % 60;

    if hours > 0 {
        format!("{}h {:02}m {:02}s", hours, mins, secs)
    } else if mins > 0 {
        format!("{}m {:02}s", mins, secs)
    } else {
        format!("{}s", secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::testing::{not_ready, FakeSource, DEVICE};
    use crate::retry::ErrorKind;
    use std::collections::BTreeSet;

    fn test_config(root: &std::path::Path, page_size: usize, concurrency: usize) -> ArchiveConfig {
        ArchiveConfig {
            directory: root.to_path_buf(),
            page_size,
            concurrency,
            retry: RetryConfig {
                max_retries: 3,
                delay_secs: 0,
            },
            throttle: Duration::ZERO,
            no_progress_bar: true,
        }
    }

    fn window(lower_bound: u64, initial_cursor: u64) -> ArchiveWindow {
        ArchiveWindow {
            lower_bound: EventId(lower_bound),
            initial_cursor: EventId(initial_cursor),
        }
    }

    fn archived_files(root: &std::path::Path) -> BTreeSet<String> {
        let device_dir = root.join(DEVICE);
        match std::fs::read_dir(&device_dir) {
            Ok(entries) => entries
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .collect(),
            Err(_) => BTreeSet::new(),
        }
    }

    fn archived_ids(root: &std::path::Path) -> BTreeSet<u64> {
        archived_files(root)
            .iter()
            .filter_map(|name| name.split('_').next()?.parse().ok())
            .collect()
    }

    #[tokio::test]
    async fn test_boundary_is_exact_for_any_concurrency() {
        for concurrency in [1, 2, 4, 8] {
            for page_size in [1, 2, 3, 10] {
                let dir = tempfile::tempdir().unwrap();
                let source = Arc::new(FakeSource::new(&[100, 90, 80, 70, 60]));
                let summary = archive(
                    source.clone(),
                    window(75, 101),
                    &test_config(dir.path(), page_size, concurrency),
                    CancellationToken::new(),
                )
                .await
                .unwrap();

                assert_eq!(summary.stop_reason, StopReason::BoundaryReached);
                assert_eq!(summary.downloaded, 3);
                assert_eq!(archived_ids(dir.path()), BTreeSet::from([100, 90, 80]));
                let attempted: BTreeSet<u64> = source.downloads().iter().map(|id| id.0).collect();
                assert_eq!(
                    attempted,
                    BTreeSet::from([100, 90, 80]),
                    "concurrency {} page size {}",
                    concurrency,
                    page_size
                );
            }
        }
    }

    #[tokio::test]
    async fn test_initial_cursor_is_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(FakeSource::new(&[100, 90, 80]));
        let summary = archive(
            source.clone(),
            window(0, 90),
            &test_config(dir.path(), 10, 2),
            CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(archived_ids(dir.path()), BTreeSet::from([80]));
        assert_eq!(summary.stop_reason, StopReason::HistoryExhausted);
    }

    #[tokio::test]
    async fn test_empty_page_means_history_exhausted() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(FakeSource::new(&[100, 90]));
        let summary = archive(
            source.clone(),
            window(0, 200),
            &test_config(dir.path(), 2, 1),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(summary.stop_reason, StopReason::HistoryExhausted);
        assert_eq!(summary.pages, 2);
        assert_eq!(summary.downloaded, 2);
        assert!(summary.failed.is_empty());
        assert_eq!(summary.cursor, EventId(90));
        assert_eq!(
            source.history_calls(),
            vec![(EventId(200), 2), (EventId(90), 2)]
        );
    }

    #[tokio::test]
    async fn test_cursor_only_moves_backward() {
        let dir = tempfile::tempdir().unwrap();
        let ids: Vec<u64> = (1..=10).map(|i| i * 10).collect();
        let source = Arc::new(FakeSource::new(&ids));
        archive(
            source.clone(),
            window(0, 1000),
            &test_config(dir.path(), 3, 3),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        let cursors: Vec<EventId> = source.history_calls().iter().map(|(c, _)| *c).collect();
        assert_eq!(
            cursors,
            vec![EventId(1000), EventId(80), EventId(50), EventId(20), EventId(10)]
        );
        assert!(cursors.windows(2).all(|w| w[1] < w[0]));
        assert_eq!(archived_ids(dir.path()).len(), 10);
    }

    #[tokio::test]
    async fn test_second_run_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path(), 2, 2);

        let first_source = Arc::new(FakeSource::new(&[100, 90, 80, 70]));
        let first = archive(first_source, window(75, 101), &config, CancellationToken::new())
            .await
            .unwrap();
        let files_after_first = archived_files(dir.path());
        assert_eq!(first.downloaded, 3);

        let second_source = Arc::new(FakeSource::new(&[100, 90, 80, 70]));
        let second = archive(
            second_source.clone(),
            window(75, 101),
            &config,
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(second.downloaded, 0);
        assert_eq!(second.skipped, 3);
        assert!(second_source.downloads().is_empty());
        assert_eq!(archived_files(dir.path()), files_after_first);
    }

    #[tokio::test]
    async fn test_retry_exhaustion_does_not_abort_run() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(FakeSource::new(&[100, 90, 80]).failing(90, u32::MAX, not_ready));
        let summary = archive(
            source.clone(),
            window(0, 101),
            &test_config(dir.path(), 10, 1),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(source.attempts_for(90), 3);
        assert_eq!(summary.downloaded, 2);
        assert_eq!(summary.failed_ids(), vec![EventId(90)]);
        assert!(matches!(
            summary.failed[0].reason,
            FailureReason::Exhausted {
                kind: ErrorKind::NotReadyYet,
                attempts: 3,
                ..
            }
        ));
        assert_eq!(archived_ids(dir.path()), BTreeSet::from([100, 80]));
        assert_eq!(summary.stop_reason, StopReason::HistoryExhausted);
    }

    #[tokio::test]
    async fn test_failed_event_is_retried_by_next_run() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path(), 10, 1);

        let flaky = Arc::new(FakeSource::new(&[100, 90]).failing(90, 3, not_ready));
        let first = archive(flaky, window(0, 101), &config, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(first.failed_ids(), vec![EventId(90)]);

        let healthy = Arc::new(FakeSource::new(&[100, 90]));
        let second = archive(healthy.clone(), window(0, 101), &config, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(second.skipped, 1);
        assert_eq!(second.downloaded, 1);
        assert_eq!(healthy.downloads(), vec![EventId(90)]);
    }

    #[tokio::test]
    async fn test_fetch_failure_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(FakeSource::new(&[100]).unavailable());
        let err = archive(
            source,
            window(0, 101),
            &test_config(dir.path(), 10, 1),
            CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            ArchiveError::SourceUnavailable { cursor: EventId(101), .. }
        ));
    }

    #[tokio::test]
    async fn test_non_monotonic_source_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(FakeSource::new(&[100, 90]).ignoring_cursor());
        let err = archive(
            source,
            window(0, 101),
            &test_config(dir.path(), 10, 1),
            CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            ArchiveError::CursorStalled { cursor: EventId(90), discarded: 2 }
        ));
    }

    #[tokio::test]
    async fn test_cancelled_before_start_fetches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(FakeSource::new(&[100, 90]));
        let token = CancellationToken::new();
        token.cancel();

        let summary = archive(
            source.clone(),
            window(0, 101),
            &test_config(dir.path(), 10, 1),
            token,
        )
        .await
        .unwrap();
        assert_eq!(summary.stop_reason, StopReason::Cancelled);
        assert_eq!(summary.pages, 0);
        assert_eq!(summary.cursor, EventId(101));
        assert!(source.history_calls().is_empty());
    }

    #[test]
    fn test_window_contains() {
        let w = window(75, 101);
        assert!(w.contains(EventId(75)));
        assert!(w.contains(EventId(100)));
        assert!(!w.contains(EventId(101)));
        assert!(!w.contains(EventId(74)));
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(42)), "42s");
        assert_eq!(format_duration(Duration::from_secs(754)), "12m 34s");
        assert_eq!(format_duration(Duration::from_secs(5025)), "1h 23m 45s");
    }

    #[test]
    fn test_create_progress_bar_hidden_when_disabled() {
        assert!(create_progress_bar(true).is_hidden());
    }
}
