use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::fs;
use tokio::sync::{RwLock, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::journal::sha256_file;
use super::{
    AggregateStats, Connection, ConnectionSupplier, DownloadItem, Fetcher, ItemOutcome, Journal,
    JournalStatus, NullSink, ProgressEvent, ProgressSink, RetryPolicy,
};
use crate::error::FetchError;
use crate::pacing::{PacingHandle, SessionStats};
use crate::proxy::RequestProfile;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Sequential,
    Concurrent { workers: usize },
}

#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    pub output_dir: PathBuf,
    pub mode: ExecutionMode,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("ROM_Downloads"),
            mode: ExecutionMode::Sequential,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub stats: AggregateStats,
    /// Unique items in the run after deduplication.
    pub items: usize,
    pub duplicates_removed: usize,
    /// Items already complete according to the journal, included in `stats.completed`.
    pub skipped: u32,
    pub cancelled_items: u32,
    /// The run was interrupted before every item was processed.
    pub cancelled: bool,
    pub elapsed: Duration,
    pub session: SessionStats,
}

#[derive(Debug, Default)]
struct RunCounters {
    stats: AggregateStats,
    skipped: u32,
    cancelled: u32,
}

/// Drives a worklist through the fetcher with retries, pacing and session rotation.
pub struct Orchestrator {
    options: OrchestratorOptions,
    supplier: Arc<dyn ConnectionSupplier>,
    fetcher: Fetcher,
    pacing: PacingHandle,
    retry: RetryPolicy,
    sink: Arc<dyn ProgressSink>,
    journal: Option<Journal>,
    cancel: CancellationToken,
    counters: Mutex<RunCounters>,
    // Fetch attempts hold a read guard; session rotation takes the write guard.
    session_gate: RwLock<()>,
}

impl Orchestrator {
    pub fn new(
        options: OrchestratorOptions,
        supplier: Arc<dyn ConnectionSupplier>,
        pacing: PacingHandle,
    ) -> Self {
        Self {
            options,
            supplier,
            fetcher: Fetcher::default(),
            pacing,
            retry: RetryPolicy::default(),
            sink: Arc::new(NullSink),
            journal: None,
            cancel: CancellationToken::new(),
            counters: Mutex::new(RunCounters::default()),
            session_gate: RwLock::new(()),
        }
    }

    pub fn with_fetcher(mut self, fetcher: Fetcher) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Process every item once. Per-item failures end up in the summary;
    /// only an unusable output directory fails the run.
    pub async fn run(self, items: Vec<DownloadItem>) -> Result<RunSummary> {
        let started = Instant::now();

        fs::create_dir_all(&self.options.output_dir)
            .await
            .with_context(|| {
                format!(
                    "Failed to create output directory: {:?}",
                    self.options.output_dir
                )
            })?;

        let (items, duplicates_removed) = dedup_items(items);
        if duplicates_removed > 0 {
            info!("Dropped {} duplicate worklist entries", duplicates_removed);
        }

        let items = self.pacing.randomize_order(items).await?;
        let total = items.len();
        info!(
            "Starting run of {} items into {:?} ({:?})",
            total, self.options.output_dir, self.options.mode
        );

        let this = Arc::new(self);
        match this.options.mode {
            ExecutionMode::Sequential => this.run_sequential(items).await,
            ExecutionMode::Concurrent { workers } => {
                Arc::clone(&this).run_concurrent(items, workers).await?
            }
        }

        let session = this.pacing.stats().await?;
        let counters = this.snapshot();
        let cancelled = this.cancel.is_cancelled() && counters.stats.finished() < total as u32;

        let summary = RunSummary {
            stats: counters.stats,
            items: total,
            duplicates_removed,
            skipped: counters.skipped,
            cancelled_items: counters.cancelled,
            cancelled,
            elapsed: started.elapsed(),
            session,
        };
        info!(
            "Run finished: {} completed, {} failed, {} skipped, {} bytes",
            summary.stats.completed, summary.stats.failed, summary.skipped, summary.stats.total_bytes
        );
        Ok(summary)
    }

    async fn run_sequential(&self, items: Vec<DownloadItem>) {
        let total = items.len();
        for (index, item) in items.into_iter().enumerate() {
            if self.cancel.is_cancelled() {
                break;
            }

            let outcome = self.process_item(&item).await;
            let fetched = !matches!(outcome, ItemOutcome::Skipped { .. });
            self.finish_item(&item, outcome).await;

            if fetched && index + 1 < total {
                self.pause().await;
            }
            self.maybe_rotate_session().await;
        }
    }

    async fn run_concurrent(self: Arc<Self>, items: Vec<DownloadItem>, workers: usize) -> Result<()> {
        let semaphore = Arc::new(Semaphore::new(workers.max(1)));
        let mut tasks = JoinSet::new();

        for item in items {
            let permit = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                permit = Arc::clone(&semaphore).acquire_owned() => permit?,
            };

            let this = Arc::clone(&self);
            tasks.spawn(async move {
                let _permit = permit;
                let outcome = this.process_item(&item).await;
                let fetched = !matches!(outcome, ItemOutcome::Skipped { .. });
                this.finish_item(&item, outcome).await;

                if fetched {
                    this.pause().await;
                }
                this.maybe_rotate_session().await;
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!("Download worker panicked: {}", e);
            }
        }
        Ok(())
    }

    /// The full retry loop for one item.
    async fn process_item(&self, item: &DownloadItem) -> ItemOutcome {
        let destination = item.destination(&self.options.output_dir);
        let bytes_on_disk = fs::metadata(&destination)
            .await
            .map(|m| m.len())
            .unwrap_or(0);

        if let Some(journal) = &self.journal {
            if bytes_on_disk > 0 && journal.is_complete(&item.source_url, bytes_on_disk).await {
                debug!("{} already complete, skipping", item.display_name);
                return ItemOutcome::Skipped { bytes_on_disk };
            }
            self.journal_write(item, JournalStatus::Started, bytes_on_disk, None)
                .await;
        }

        let mut connection: Option<Connection> = None;
        let mut attempt = 0;

        loop {
            if self.cancel.is_cancelled() {
                return ItemOutcome::Cancelled;
            }
            attempt += 1;

            let profile = RequestProfile::random();
            let (result, route) = {
                let _session = self.session_gate.read().await;
                let current = match connection.take() {
                    Some(current) => current,
                    None => self.supplier.acquire().await,
                };
                debug!(
                    "{} attempt {} via {} as {}",
                    item.display_name,
                    attempt,
                    current.route(),
                    profile.family()
                );
                let result = self
                    .fetcher
                    .fetch(
                        item,
                        &destination,
                        &current,
                        &profile,
                        self.sink.as_ref(),
                        &self.cancel,
                    )
                    .await;
                let route = current.route();
                connection = Some(current);
                (result, route)
            };

            match result {
                Ok(report) => {
                    self.note_attempt(true);
                    return ItemOutcome::Succeeded {
                        report,
                        route,
                        attempts: attempt,
                    };
                }
                Err(FetchError::Cancelled) => return ItemOutcome::Cancelled,
                Err(error) => {
                    self.note_attempt(false);

                    if !self.retry.should_retry(&error, attempt) {
                        return ItemOutcome::Failed {
                            error,
                            route,
                            attempts: attempt,
                        };
                    }

                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        "{} attempt {}/{} failed ({}), retrying in {:.1}s",
                        item.display_name,
                        attempt,
                        self.retry.max_attempts(),
                        error,
                        delay.as_secs_f64()
                    );
                    self.sink.emit(ProgressEvent::Retry {
                        id: item.source_url.clone(),
                        attempt,
                        max_attempts: self.retry.max_attempts(),
                        delay,
                        error: error.to_string(),
                    });

                    if error.should_rotate_proxy() {
                        connection = None;
                    }

                    tokio::select! {
                        _ = self.cancel.cancelled() => return ItemOutcome::Cancelled,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn finish_item(&self, item: &DownloadItem, outcome: ItemOutcome) {
        let id = item.source_url.clone();

        match &outcome {
            ItemOutcome::Succeeded { report, route, .. } => {
                info!(
                    "Completed {} ({} bytes via {})",
                    item.display_name, report.file_size, route
                );
                self.sink.emit(ProgressEvent::Completed {
                    id: id.clone(),
                    bytes_written: report.file_size,
                });
                if self.journal.is_some() {
                    let destination = item.destination(&self.options.output_dir);
                    let digest = match sha256_file(&destination).await {
                        Ok(digest) => Some(digest),
                        Err(e) => {
                            warn!("Could not hash {:?}: {:#}", destination, e);
                            None
                        }
                    };
                    self.journal_write(item, JournalStatus::Completed, report.file_size, digest)
                        .await;
                }
            }
            ItemOutcome::Skipped { bytes_on_disk } => {
                self.sink.emit(ProgressEvent::Skipped {
                    id: id.clone(),
                    bytes_on_disk: *bytes_on_disk,
                });
            }
            ItemOutcome::Failed { error, attempts, .. } => {
                error!(
                    "Failed {} after {} attempts: {}",
                    item.display_name, attempts, error
                );
                self.sink.emit(ProgressEvent::Failed {
                    id: id.clone(),
                    error: error.to_string(),
                    attempts: *attempts,
                });
                let on_disk = self.bytes_on_disk(item).await;
                self.journal_write(item, JournalStatus::Failed, on_disk, None)
                    .await;
            }
            ItemOutcome::Cancelled => {
                info!("Cancelled {}", item.display_name);
                self.sink.emit(ProgressEvent::Cancelled { id: id.clone() });
                let on_disk = self.bytes_on_disk(item).await;
                self.journal_write(item, JournalStatus::Cancelled, on_disk, None)
                    .await;
            }
        }

        let totals = self.record_outcome(&outcome);
        self.sink.emit(ProgressEvent::ItemFinished {
            id,
            success: outcome.is_success(),
            totals,
        });
    }

    /// The only place run counters change.
    fn record_outcome(&self, outcome: &ItemOutcome) -> AggregateStats {
        let mut counters = match self.counters.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        match outcome {
            ItemOutcome::Succeeded { report, route, .. } => {
                counters.stats.completed += 1;
                counters.stats.total_bytes += report.file_size;
                if route.is_proxy() {
                    counters.stats.proxy_used += 1;
                } else {
                    counters.stats.direct_used += 1;
                }
            }
            ItemOutcome::Failed { route, .. } => {
                counters.stats.failed += 1;
                if route.is_proxy() {
                    counters.stats.proxy_used += 1;
                } else {
                    counters.stats.direct_used += 1;
                }
            }
            ItemOutcome::Skipped { .. } => {
                counters.stats.completed += 1;
                counters.skipped += 1;
            }
            ItemOutcome::Cancelled => counters.cancelled += 1,
        }

        counters.stats
    }

    fn snapshot(&self) -> RunCounters {
        let counters = match self.counters.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        RunCounters {
            stats: counters.stats,
            skipped: counters.skipped,
            cancelled: counters.cancelled,
        }
    }

    async fn pause(&self) {
        let delay = match self.pacing.next_delay().await {
            Ok(delay) => delay,
            Err(e) => {
                warn!("Pacing unavailable: {:#}", e);
                return;
            }
        };
        debug!("Pausing {:.1}s before the next item", delay.as_secs_f64());

        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = tokio::time::sleep(delay) => {}
        }
    }

    async fn maybe_rotate_session(&self) {
        if self.cancel.is_cancelled() || !self.pacing.should_rotate_session().await.unwrap_or(false)
        {
            return;
        }

        let _exclusive = self.session_gate.write().await;
        // Another worker may have rotated while this one waited for the gate.
        if !self.pacing.should_rotate_session().await.unwrap_or(false) {
            return;
        }

        if let Err(e) = self.supplier.rebuild().await {
            warn!("Failed to rebuild network session: {:#}", e);
        }
        match self.pacing.rotate_session().await {
            Ok(session) => {
                info!(
                    "Started session {} with pattern {}",
                    session.sessions_started, session.pattern
                );
                self.sink.emit(ProgressEvent::SessionRotated { session });
            }
            Err(e) => warn!("Failed to rotate pacing session: {:#}", e),
        }
    }

    fn note_attempt(&self, success: bool) {
        if let Err(e) = self.pacing.record_attempt(success) {
            debug!("Attempt not recorded: {:#}", e);
        }
    }

    async fn bytes_on_disk(&self, item: &DownloadItem) -> u64 {
        fs::metadata(item.destination(&self.options.output_dir))
            .await
            .map(|m| m.len())
            .unwrap_or(0)
    }

    async fn journal_write(
        &self,
        item: &DownloadItem,
        status: JournalStatus,
        byte_count: u64,
        sha256: Option<String>,
    ) {
        if let Some(journal) = &self.journal {
            if let Err(e) = journal
                .record(&item.source_url, status, byte_count, sha256)
                .await
            {
                warn!("Journal write failed for {}: {:#}", item.display_name, e);
            }
        }
    }
}

/// Keep the first occurrence of each source URL.
fn dedup_items(items: Vec<DownloadItem>) -> (Vec<DownloadItem>, usize) {
    let before = items.len();
    let mut seen = HashSet::with_capacity(before);
    let unique: Vec<DownloadItem> = items
        .into_iter()
        .filter(|item| seen.insert(item.source_url.clone()))
        .collect();
    let removed = before - unique.len();
    (unique, removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::{ClientSettings, DirectSupplier};
    use crate::pacing::PacingSession;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    struct CountingSupplier {
        inner: DirectSupplier,
        rebuilds: AtomicUsize,
    }

    #[async_trait]
    impl ConnectionSupplier for CountingSupplier {
        async fn acquire(&self) -> Connection {
            self.inner.acquire().await
        }

        async fn rebuild(&self) -> Result<()> {
            self.rebuilds.fetch_add(1, Ordering::SeqCst);
            self.inner.rebuild().await
        }

        async fn pool_size(&self) -> usize {
            0
        }
    }

    fn item(name: &str) -> DownloadItem {
        DownloadItem::new(name, &format!("http://127.0.0.1:1/{}", name), "NES")
    }

    fn orchestrator(output_dir: PathBuf, mode: ExecutionMode) -> Orchestrator {
        let supplier = Arc::new(DirectSupplier::new(ClientSettings::default()).unwrap());
        Orchestrator::new(
            OrchestratorOptions { output_dir, mode },
            supplier,
            PacingHandle::spawn(PacingSession::fixed(0.0, 0.0)),
        )
        .with_retry_policy(RetryPolicy::immediate(1))
    }

    #[test]
    fn test_dedup_keeps_first_occurrence() {
        let mut second = item("a.zip");
        second.display_name = "renamed.zip".to_string();
        let (unique, removed) = dedup_items(vec![item("a.zip"), item("b.zip"), second]);

        assert_eq!(removed, 1);
        assert_eq!(unique.len(), 2);
        assert_eq!(unique[0].display_name, "a.zip");
    }

    #[tokio::test]
    async fn test_unreachable_items_fail_once_each() {
        let dir = TempDir::new().unwrap();
        let (sender, mut receiver) = mpsc::unbounded_channel();
        let summary = orchestrator(dir.path().join("out"), ExecutionMode::Sequential)
            .with_sink(Arc::new(sender))
            .run(vec![item("a.zip"), item("b.zip"), item("a.zip")])
            .await
            .unwrap();

        assert_eq!(summary.items, 2);
        assert_eq!(summary.duplicates_removed, 1);
        assert_eq!(summary.stats.failed, 2);
        assert_eq!(summary.stats.completed, 0);
        assert_eq!(summary.stats.direct_used, 2);
        assert!(!summary.cancelled);

        let mut finished = 0;
        let mut retries = 0;
        while let Ok(event) = receiver.try_recv() {
            match event {
                ProgressEvent::ItemFinished { success, .. } => {
                    assert!(!success);
                    finished += 1;
                }
                ProgressEvent::Retry { .. } => retries += 1,
                _ => {}
            }
        }
        assert_eq!(finished, 2);
        assert_eq!(retries, 2);
    }

    #[tokio::test]
    async fn test_session_rotates_once_threshold_is_reached() {
        let session = PacingSession::with_seed(17).with_delay_scale(0.0);
        let threshold = session.stats().rotation_threshold as usize;
        let items: Vec<DownloadItem> = (0..threshold + 2)
            .map(|i| item(&format!("rom{}.zip", i)))
            .collect();

        let supplier = Arc::new(CountingSupplier {
            inner: DirectSupplier::new(ClientSettings::default()).unwrap(),
            rebuilds: AtomicUsize::new(0),
        });
        let dir = TempDir::new().unwrap();
        let (sender, mut receiver) = mpsc::unbounded_channel();

        let summary = Orchestrator::new(
            OrchestratorOptions {
                output_dir: dir.path().join("out"),
                mode: ExecutionMode::Sequential,
            },
            supplier.clone(),
            PacingHandle::spawn(session),
        )
        .with_retry_policy(RetryPolicy::immediate(0))
        .with_sink(Arc::new(sender))
        .run(items)
        .await
        .unwrap();

        assert_eq!(summary.stats.failed as usize, threshold + 2);
        assert_eq!(supplier.rebuilds.load(Ordering::SeqCst), 1);
        assert_eq!(summary.session.sessions_started, 2);
        assert_eq!(summary.session.downloads_this_session, 2);

        let mut rotations = Vec::new();
        while let Ok(event) = receiver.try_recv() {
            if let ProgressEvent::SessionRotated { session } = event {
                rotations.push(session);
            }
        }
        assert_eq!(rotations.len(), 1);
        assert_eq!(rotations[0].sessions_started, 2);
        assert_eq!(rotations[0].downloads_this_session, 0);
    }

    #[tokio::test]
    async fn test_cancelled_run_processes_nothing() {
        let dir = TempDir::new().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let summary = orchestrator(
            dir.path().join("out"),
            ExecutionMode::Concurrent { workers: 2 },
        )
        .with_cancellation(cancel)
        .run(vec![item("a.zip"), item("b.zip")])
        .await
        .unwrap();

        assert!(summary.cancelled);
        assert_eq!(summary.stats.finished(), 0);
    }

    #[tokio::test]
    async fn test_output_directory_failure_is_fatal() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"not a directory").unwrap();

        let result = orchestrator(blocker.join("out"), ExecutionMode::Sequential)
            .run(vec![item("a.zip")])
            .await;
        assert!(result.is_err());
    }
}
