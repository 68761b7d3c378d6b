//! The scan driver runs batch scans as background tasks: fetch a page of ids,
//! classify the batch through the orchestrator, checkpoint, repeat. Pause and
//! cancel requests are delivered over a watch channel and observed only at
//! batch boundaries, so an in-flight batch always finishes and checkpoints
//! before the status changes.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::clients::{EmailPage, EmailSource};
use crate::config::RetryPolicy;
use crate::error::{AppResult, ScanError, SourceError};
use crate::model::EmailToClassify;
use crate::observability::ScanTracker;
use crate::orchestrator::ClassificationOrchestrator;
use crate::scan::progress::{ScanConfig, ScanProgress, ScanStatus};
use crate::scan::store::CheckpointStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ControlSignal {
    Run,
    Pause,
    Cancel,
}

struct ScanHandle {
    progress: Arc<RwLock<ScanProgress>>,
    control: watch::Sender<ControlSignal>,
    task: JoinHandle<()>,
}

/// Owns all running scans in this process. Cheap to clone; clones share the
/// registry. Each scan id has exactly one worker task writing its progress.
#[derive(Clone)]
pub struct ScanDriver {
    orchestrator: Arc<ClassificationOrchestrator>,
    source: Arc<dyn EmailSource>,
    store: Arc<dyn CheckpointStore>,
    retry: RetryPolicy,
    tracker: ScanTracker,
    scans: Arc<RwLock<HashMap<Uuid, ScanHandle>>>,
}

impl ScanDriver {
    pub fn new(
        orchestrator: Arc<ClassificationOrchestrator>,
        source: Arc<dyn EmailSource>,
        store: Arc<dyn CheckpointStore>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            orchestrator,
            source,
            store,
            retry,
            tracker: ScanTracker::new(),
            scans: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn tracker(&self) -> &ScanTracker {
        &self.tracker
    }

    /// Start a new scan and return its initial progress. The scan runs in a
    /// background task; poll [`ScanDriver::progress`] for updates.
    pub async fn start(&self, config: ScanConfig) -> AppResult<ScanProgress> {
        let config = config.normalized();
        let scan_id = Uuid::new_v4();
        let mut progress = ScanProgress::new(scan_id, config);
        progress.status = ScanStatus::InProgress;

        self.store.save_progress(&progress).await?;
        info!(%scan_id, account_id = %progress.account_id, "scan started");

        self.spawn_worker(progress.clone());
        Ok(progress)
    }

    /// Pick up a scan persisted by a previous process. The cursor is rewound
    /// to the last durable checkpoint; anything after it is re-fetched, and
    /// `skip_already_processed` keeps the re-fetched items from being
    /// classified twice.
    pub async fn recover(&self, scan_id: Uuid) -> AppResult<ScanProgress> {
        let mut progress = self
            .store
            .load_progress(scan_id)
            .await?
            .ok_or(ScanError::NotFound(scan_id))?;

        if progress.status.is_terminal() {
            return Err(ScanError::InvalidTransition {
                from: progress.status,
                op: "recover",
            }
            .into());
        }

        match self.store.load_checkpoint(scan_id).await? {
            Some(cp) => {
                progress.batch_number = cp.batch_number;
                progress.last_email_id = cp.last_email_id;
                progress.next_page_token = cp.next_page_token;
                progress.counters.processed = progress.counters.processed.max(cp.processed_count);
            }
            // Crashed before the first checkpoint: restart from the top.
            None => {
                progress.batch_number = 0;
                progress.last_email_id = None;
                progress.next_page_token = None;
            }
        }

        progress.status = ScanStatus::InProgress;
        progress.error = None;
        progress.error_detail = None;
        progress.touch();

        self.store.save_progress(&progress).await?;
        info!(%scan_id, batch = progress.batch_number, "scan recovered from checkpoint");

        self.spawn_worker(progress.clone());
        Ok(progress)
    }

    /// Request a pause. Takes effect at the next batch boundary; until then
    /// the scan reports `InProgress`.
    pub fn pause(&self, scan_id: Uuid) -> AppResult<()> {
        self.signal(scan_id, ControlSignal::Pause, "pause", |status| {
            status == ScanStatus::InProgress
        })
    }

    /// Resume a paused scan.
    pub fn resume(&self, scan_id: Uuid) -> AppResult<()> {
        self.signal(scan_id, ControlSignal::Run, "resume", |status| {
            status == ScanStatus::Paused
        })
    }

    /// Cancel a running or paused scan. Terminal; the scan cannot be resumed,
    /// but its checkpoint and progress records are kept.
    pub fn cancel(&self, scan_id: Uuid) -> AppResult<()> {
        self.signal(scan_id, ControlSignal::Cancel, "cancel", |status| {
            matches!(status, ScanStatus::InProgress | ScanStatus::Paused)
        })
    }

    fn signal(
        &self,
        scan_id: Uuid,
        signal: ControlSignal,
        op: &'static str,
        allowed: impl Fn(ScanStatus) -> bool,
    ) -> AppResult<()> {
        let scans = self.scans.read().unwrap_or_else(|e| e.into_inner());
        let handle = scans.get(&scan_id).ok_or(ScanError::NotFound(scan_id))?;
        let status = handle
            .progress
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .status;
        if !allowed(status) {
            return Err(ScanError::InvalidTransition { from: status, op }.into());
        }
        handle
            .control
            .send(signal)
            .map_err(|_| ScanError::InvalidTransition { from: status, op })?;
        Ok(())
    }

    /// Number of scans with a live worker in this process. Terminal scans are
    /// evicted from the registry, so this never grows with scan history.
    pub fn active_scan_count(&self) -> usize {
        self.scans.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Snapshot of a scan's progress: live if the scan is running in this
    /// process, otherwise whatever the checkpoint store holds.
    pub async fn progress(&self, scan_id: Uuid) -> AppResult<ScanProgress> {
        let live = {
            let scans = self.scans.read().unwrap_or_else(|e| e.into_inner());
            scans
                .get(&scan_id)
                .map(|h| h.progress.read().unwrap_or_else(|e| e.into_inner()).clone())
        };
        if let Some(progress) = live {
            return Ok(progress);
        }
        self.store
            .load_progress(scan_id)
            .await?
            .ok_or_else(|| ScanError::NotFound(scan_id).into())
    }

    /// Abort all worker tasks without touching persisted state. Simulates a
    /// process exit: interrupted scans are recoverable via
    /// [`ScanDriver::recover`].
    pub fn shutdown(&self) {
        let mut scans = self.scans.write().unwrap_or_else(|e| e.into_inner());
        for (scan_id, handle) in scans.drain() {
            handle.task.abort();
            info!(%scan_id, "scan worker aborted for shutdown");
        }
    }

    fn spawn_worker(&self, progress: ScanProgress) {
        let scan_id = progress.scan_id;
        let shared = Arc::new(RwLock::new(progress));
        let (control_tx, control_rx) = watch::channel(ControlSignal::Run);

        let driver = self.clone();
        let worker_progress = shared.clone();

        // Hold the registry lock across the spawn so a scan that finishes
        // immediately cannot evict its handle before the insert lands.
        let mut scans = self.scans.write().unwrap_or_else(|e| e.into_inner());
        let task = tokio::spawn(async move {
            driver.run_scan(worker_progress, control_rx).await;
        });
        scans.insert(
            scan_id,
            ScanHandle {
                progress: shared,
                control: control_tx,
                task,
            },
        );
    }

    async fn run_scan(
        &self,
        progress: Arc<RwLock<ScanProgress>>,
        mut control: watch::Receiver<ControlSignal>,
    ) {
        self.tracker.update(&snapshot(&progress));

        loop {
            // Batch boundary: the only place pause/cancel take effect. The
            // signal is copied out so no watch guard is held across awaits.
            let signal = *control.borrow();
            match signal {
                ControlSignal::Cancel => {
                    self.finish(&progress, ScanStatus::Cancelled, None).await;
                    return;
                }
                ControlSignal::Pause => {
                    self.set_status(&progress, ScanStatus::Paused).await;
                    loop {
                        if control.changed().await.is_err() {
                            return;
                        }
                        let signal = *control.borrow();
                        match signal {
                            ControlSignal::Run => {
                                self.set_status(&progress, ScanStatus::InProgress).await;
                                break;
                            }
                            ControlSignal::Cancel => {
                                self.finish(&progress, ScanStatus::Cancelled, None).await;
                                return;
                            }
                            ControlSignal::Pause => {}
                        }
                    }
                }
                ControlSignal::Run => {}
            }

            let (config, page_token, seen) = {
                let p = progress.read().unwrap_or_else(|e| e.into_inner());
                (p.config.clone(), p.next_page_token.clone(), p.items_seen())
            };

            if let Some(cap) = config.max_results {
                if seen >= cap as u64 {
                    self.finish(&progress, ScanStatus::Completed, None).await;
                    return;
                }
            }

            let page = match self.fetch_page(&config, page_token.as_deref()).await {
                Ok(page) => page,
                Err(e) => {
                    self.finish(&progress, ScanStatus::Failed, Some(e.to_string()))
                        .await;
                    return;
                }
            };

            if page.items.is_empty() && page.next_page_token.is_none() {
                self.finish(&progress, ScanStatus::Completed, None).await;
                return;
            }

            let remaining = config
                .max_results
                .map(|cap| (cap as u64).saturating_sub(seen) as usize);
            let batch = match self.assemble_batch(&config, &page, remaining).await {
                Ok(batch) => batch,
                Err(e) => {
                    self.finish(&progress, ScanStatus::Failed, Some(e.to_string()))
                        .await;
                    return;
                }
            };

            let stats = self
                .orchestrator
                .process_emails(&batch.emails, &config.account_id)
                .await;

            {
                let mut p = progress.write().unwrap_or_else(|e| e.into_inner());
                p.counters.absorb(&stats);
                p.counters.skipped += batch.skipped;
                p.counters.failed += batch.fetch_failures;
                p.batch_number += 1;
                if batch.last_email_id.is_some() {
                    p.last_email_id = batch.last_email_id;
                }
                p.next_page_token = page.next_page_token.clone();
                p.touch();
            }

            // The checkpoint is the durable cursor: it must land before the
            // batch counts as done. Exhausting the retries fails the scan.
            let checkpoint = {
                let p = progress.read().unwrap_or_else(|e| e.into_inner());
                p.checkpoint()
            };
            if let Err(e) = self.write_checkpoint(&checkpoint).await {
                self.finish(&progress, ScanStatus::Failed, Some(e.to_string()))
                    .await;
                return;
            }

            let current = snapshot(&progress);
            if let Err(e) = self.store.save_progress(&current).await {
                // Checkpoint already landed; the next batch retries this.
                warn!(scan_id = %current.scan_id, "progress save failed: {e}");
            }
            self.tracker.update(&current);

            if page.next_page_token.is_none() {
                self.finish(&progress, ScanStatus::Completed, None).await;
                return;
            }
        }
    }

    /// Hydrate one page of ids into full emails, honoring the results cap and
    /// the already-processed skip. Transient per-item fetch failures are
    /// counted and skipped; a permanent source error aborts the batch.
    async fn assemble_batch(
        &self,
        config: &ScanConfig,
        page: &EmailPage,
        remaining: Option<usize>,
    ) -> Result<AssembledBatch, ScanError> {
        let mut batch = AssembledBatch::default();
        let mut budget = remaining;

        for email_id in &page.items {
            if budget == Some(0) {
                break;
            }
            batch.last_email_id = Some(email_id.clone());

            if config.skip_already_processed {
                match self
                    .orchestrator
                    .record_store()
                    .is_processed(&config.account_id, email_id)
                    .await
                {
                    Ok(true) => {
                        batch.skipped += 1;
                        if let Some(b) = budget.as_mut() {
                            *b -= 1;
                        }
                        continue;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        // Treat as unprocessed; idempotent saves make the
                        // worst case a harmless re-classification.
                        warn!(email_id, "is_processed lookup failed: {e}");
                    }
                }
            }

            match self.source.get_full(email_id).await {
                Ok(email) => {
                    batch.emails.push(email);
                    if let Some(b) = budget.as_mut() {
                        *b -= 1;
                    }
                }
                Err(SourceError::Transient(msg)) => {
                    warn!(email_id, "email fetch failed, skipping item: {msg}");
                    batch.fetch_failures += 1;
                }
                Err(SourceError::Permanent(msg)) => {
                    return Err(ScanError::SourceUnavailable(msg));
                }
            }
        }

        Ok(batch)
    }

    async fn fetch_page(
        &self,
        config: &ScanConfig,
        page_token: Option<&str>,
    ) -> Result<EmailPage, ScanError> {
        let mut attempt: u32 = 0;
        loop {
            match self
                .source
                .list(config.query.as_deref(), page_token, config.batch_size)
                .await
            {
                Ok(page) => return Ok(page),
                Err(SourceError::Permanent(msg)) => {
                    return Err(ScanError::SourceUnavailable(msg));
                }
                Err(SourceError::Transient(msg)) => {
                    if attempt >= self.retry.max_source_retries {
                        return Err(ScanError::SourceUnavailable(format!(
                            "giving up after {attempt} retries: {msg}"
                        )));
                    }
                    let backoff = Duration::from_millis(
                        self.retry.source_backoff_ms.saturating_mul(1 << attempt),
                    );
                    warn!(
                        account_id = %config.account_id,
                        attempt,
                        "page fetch failed, retrying in {backoff:?}: {msg}"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn write_checkpoint(
        &self,
        checkpoint: &crate::scan::progress::ScanCheckpoint,
    ) -> Result<(), ScanError> {
        let mut attempt: u32 = 0;
        loop {
            match self.store.save_checkpoint(checkpoint).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    if attempt >= self.retry.checkpoint_write_retries {
                        return Err(e);
                    }
                    warn!(
                        scan_id = %checkpoint.scan_id,
                        attempt,
                        "checkpoint write failed, retrying: {e}"
                    );
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn set_status(&self, progress: &Arc<RwLock<ScanProgress>>, status: ScanStatus) {
        let current = {
            let mut p = progress.write().unwrap_or_else(|e| e.into_inner());
            p.status = status;
            p.touch();
            p.clone()
        };
        if let Err(e) = self.store.save_progress(&current).await {
            warn!(scan_id = %current.scan_id, "progress save failed: {e}");
        }
        self.tracker.update(&current);
        info!(scan_id = %current.scan_id, status = %status, "scan status changed");
    }

    async fn finish(
        &self,
        progress: &Arc<RwLock<ScanProgress>>,
        status: ScanStatus,
        error_message: Option<String>,
    ) {
        // The status flip and the registry eviction share one lock, so no
        // caller can see a terminal scan that still accepts control signals.
        // Evicted scans stay queryable through the store fallback in
        // [`ScanDriver::progress`]; control calls on them report `NotFound`.
        let current = {
            let mut scans = self.scans.write().unwrap_or_else(|e| e.into_inner());
            let current = {
                let mut p = progress.write().unwrap_or_else(|e| e.into_inner());
                p.status = status;
                p.completed_at = Some(Utc::now());
                if let Some(message) = error_message {
                    p.error_detail = Some(serde_json::json!({
                        "batch_number": p.batch_number,
                        "last_email_id": p.last_email_id,
                    }));
                    p.error = Some(message);
                }
                p.touch();
                p.clone()
            };
            scans.remove(&current.scan_id);
            current
        };

        if let Err(e) = self.store.save_progress(&current).await {
            error!(scan_id = %current.scan_id, "final progress save failed: {e}");
        }
        self.tracker.update(&current);

        match status {
            ScanStatus::Failed => error!(
                scan_id = %current.scan_id,
                error = current.error.as_deref().unwrap_or("unknown"),
                "scan failed"
            ),
            _ => info!(
                scan_id = %current.scan_id,
                status = %status,
                processed = current.counters.processed,
                skipped = current.counters.skipped,
                failed = current.counters.failed,
                "scan finished"
            ),
        }
    }
}

#[derive(Default)]
struct AssembledBatch {
    emails: Vec<EmailToClassify>,
    skipped: u64,
    fetch_failures: u64,
    last_email_id: Option<String>,
}

fn snapshot(progress: &Arc<RwLock<ScanProgress>>) -> ScanProgress {
    progress.read().unwrap_or_else(|e| e.into_inner()).clone()
}
