//! Test doubles for the collaborator traits. Shipped as a normal module so
//! integration tests and downstream crates can wire a full pipeline without
//! any real infrastructure.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Semaphore;

use crate::clients::{
    ApplyOutcome, ChatRequest, ChatResponse, EmailPage, EmailSource, ExtractionAgent, LlmProvider,
    PreferenceStore, ProviderApplyHandler, RecordStore, ReviewQueueManager, SenderPreference,
};
use crate::error::{AppResult, ProviderError, ScanError, SourceError};
use crate::model::{
    Category, EmailToClassify, EnsembleClassification, ExtractionOutcome, LayerKind, LayerScore,
    RoutedClassification,
};
use crate::scan::progress::{ScanCheckpoint, ScanProgress};
use crate::scan::store::{CheckpointStore, InMemoryCheckpointStore};
use crate::scoring::LayerScorer;

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Debug, Clone)]
enum ScriptedOutcome {
    Score(Category, f32, f32),
    NoSignal,
    Unavailable,
}

/// A scoring layer that replays a script. With a single entry the script
/// repeats forever; with several, each call consumes one and the last entry
/// repeats once the rest are used up.
pub struct ScriptedScorer {
    kind: LayerKind,
    script: Mutex<VecDeque<ScriptedOutcome>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl ScriptedScorer {
    fn from_script(kind: LayerKind, script: Vec<ScriptedOutcome>) -> Self {
        assert!(!script.is_empty(), "scorer script must not be empty");
        Self {
            kind,
            script: Mutex::new(script.into()),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Always returns the same score. Argument order: category, confidence,
    /// importance.
    pub fn score(kind: LayerKind, category: Category, confidence: f32, importance: f32) -> Self {
        Self::from_script(
            kind,
            vec![ScriptedOutcome::Score(category, confidence, importance)],
        )
    }

    /// Always fails with `ScoringError::Unavailable`.
    pub fn unavailable(kind: LayerKind) -> Self {
        Self::from_script(kind, vec![ScriptedOutcome::Unavailable])
    }

    /// Always returns a zero-confidence score.
    pub fn no_signal(kind: LayerKind) -> Self {
        Self::from_script(kind, vec![ScriptedOutcome::NoSignal])
    }

    /// One entry per call: `Ok((category, confidence, importance))` scores,
    /// `Err(reason)` fails as unavailable.
    pub fn sequence(kind: LayerKind, entries: Vec<Result<(Category, f32, f32), String>>) -> Self {
        let script = entries
            .into_iter()
            .map(|entry| match entry {
                Ok((category, confidence, importance)) => {
                    ScriptedOutcome::Score(category, confidence, importance)
                }
                Err(_) => ScriptedOutcome::Unavailable,
            })
            .collect();
        Self::from_script(kind, script)
    }

    /// Sleep before answering; pairs with short layer timeouts.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LayerScorer for ScriptedScorer {
    fn kind(&self) -> LayerKind {
        self.kind
    }

    async fn score(&self, _email: &EmailToClassify) -> Result<LayerScore, crate::error::ScoringError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let outcome = {
            let mut script = lock(&self.script);
            if script.len() > 1 {
                script.pop_front().expect("script checked non-empty")
            } else {
                script.front().cloned().expect("script checked non-empty")
            }
        };

        match outcome {
            ScriptedOutcome::Score(category, confidence, importance) => Ok(LayerScore {
                layer: self.kind,
                category,
                importance,
                confidence,
                reasoning: "scripted".into(),
                latency: Duration::ZERO,
            }),
            ScriptedOutcome::NoSignal => Ok(LayerScore::no_signal(
                self.kind,
                "scripted no-signal",
                Duration::ZERO,
            )),
            ScriptedOutcome::Unavailable => Err(crate::error::ScoringError::Unavailable(
                "scripted outage".into(),
            )),
        }
    }
}

/// LLM provider replaying canned responses in order. Exhausting the script is
/// a transient error, so tests fail loudly instead of looping.
pub struct MockLlmProvider {
    responses: Mutex<VecDeque<Result<ChatResponse, ProviderError>>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl MockLlmProvider {
    pub fn returning(responses: Vec<Result<ChatResponse, ProviderError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        lock(&self.requests).len()
    }

    pub fn last_request(&self) -> Option<ChatRequest> {
        lock(&self.requests).last().cloned()
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        lock(&self.requests).push(request);
        lock(&self.responses)
            .pop_front()
            .unwrap_or_else(|| Err(ProviderError::Transient("mock responses exhausted".into())))
    }
}

/// Fixed sender-preference map.
#[derive(Default)]
pub struct StaticPreferenceStore {
    prefs: HashMap<String, SenderPreference>,
}

impl StaticPreferenceStore {
    pub fn with(sender: impl Into<String>, preference: SenderPreference) -> Self {
        Self::default().and(sender, preference)
    }

    pub fn and(mut self, sender: impl Into<String>, preference: SenderPreference) -> Self {
        self.prefs.insert(sender.into(), preference);
        self
    }
}

#[async_trait]
impl PreferenceStore for StaticPreferenceStore {
    async fn lookup(
        &self,
        sender: &str,
        _account_id: &str,
    ) -> AppResult<Option<SenderPreference>> {
        Ok(self.prefs.get(sender).cloned())
    }
}

/// Extraction agent that never finds anything.
pub struct NullExtractionAgent;

#[async_trait]
impl ExtractionAgent for NullExtractionAgent {
    async fn extract(&self, _email: &EmailToClassify) -> AppResult<ExtractionOutcome> {
        Ok(ExtractionOutcome::default())
    }
}

/// Record store backed by in-process maps. `save` marks the item processed,
/// matching the idempotency contract real backends provide.
#[derive(Default)]
pub struct RecordingRecordStore {
    saved: Mutex<Vec<(String, String)>>,
    processed: Mutex<HashSet<(String, String)>>,
}

impl RecordingRecordStore {
    pub fn saved_count(&self) -> usize {
        lock(&self.saved).len()
    }

    pub fn saved_email_ids(&self) -> Vec<String> {
        lock(&self.saved).iter().map(|(_, id)| id.clone()).collect()
    }

    pub fn mark_processed(&self, account_id: &str, email_id: &str) {
        lock(&self.processed).insert((account_id.to_string(), email_id.to_string()));
    }
}

#[async_trait]
impl RecordStore for RecordingRecordStore {
    async fn save(
        &self,
        email: &EmailToClassify,
        _routed: &RoutedClassification,
    ) -> AppResult<()> {
        lock(&self.saved).push((email.account_id.clone(), email.email_id.clone()));
        lock(&self.processed).insert((email.account_id.clone(), email.email_id.clone()));
        Ok(())
    }

    async fn is_processed(&self, account_id: &str, email_id: &str) -> AppResult<bool> {
        Ok(lock(&self.processed).contains(&(account_id.to_string(), email_id.to_string())))
    }
}

#[derive(Default)]
pub struct RecordingReviewQueue {
    entries: Mutex<Vec<(String, String)>>,
}

impl RecordingReviewQueue {
    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ReviewQueueManager for RecordingReviewQueue {
    async fn add(
        &self,
        email_id: &str,
        account_id: &str,
        _classification: &EnsembleClassification,
    ) -> AppResult<()> {
        lock(&self.entries).push((account_id.to_string(), email_id.to_string()));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingApplyHandler {
    calls: AtomicUsize,
}

impl RecordingApplyHandler {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderApplyHandler for RecordingApplyHandler {
    async fn apply(
        &self,
        _email: &EmailToClassify,
        _routed: &RoutedClassification,
    ) -> AppResult<ApplyOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ApplyOutcome::default())
    }
}

/// Paginated email source over fixed pages of ids. Page tokens are the page
/// index rendered as a string.
///
/// Failure injection is per page index (for `list`) or per email id (for
/// `get_full`), each consumed in order. An optional pacing semaphore makes
/// every `list` call await a permit, giving tests exact control over batch
/// boundaries.
pub struct MockEmailSource {
    account_id: String,
    pages: Vec<Vec<String>>,
    pacing: Option<Arc<Semaphore>>,
    list_failures: Mutex<HashMap<usize, VecDeque<SourceError>>>,
    fetch_failures: Mutex<HashMap<String, VecDeque<SourceError>>>,
    list_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
}

impl MockEmailSource {
    pub fn new(account_id: impl Into<String>, pages: Vec<Vec<String>>) -> Self {
        Self {
            account_id: account_id.into(),
            pages,
            pacing: None,
            list_failures: Mutex::new(HashMap::new()),
            fetch_failures: Mutex::new(HashMap::new()),
            list_calls: AtomicUsize::new(0),
            fetch_calls: AtomicUsize::new(0),
        }
    }

    /// Convenience: `total` sequential ids (`msg-0`, `msg-1`, ...) split into
    /// pages of `page_size`.
    pub fn with_sequential_emails(
        account_id: impl Into<String>,
        total: usize,
        page_size: usize,
    ) -> Self {
        let ids: Vec<String> = (0..total).map(|i| format!("msg-{i}")).collect();
        let pages = ids.chunks(page_size).map(|c| c.to_vec()).collect();
        Self::new(account_id, pages)
    }

    /// Every `list` call waits for one permit on `semaphore`.
    pub fn paced_by(mut self, semaphore: Arc<Semaphore>) -> Self {
        self.pacing = Some(semaphore);
        self
    }

    /// Queue an error for the next `list` of the given page index.
    pub fn fail_listing(&self, page_index: usize, error: SourceError) {
        lock(&self.list_failures)
            .entry(page_index)
            .or_default()
            .push_back(error);
    }

    /// Queue an error for the next `get_full` of the given id.
    pub fn fail_fetch(&self, email_id: &str, error: SourceError) {
        lock(&self.fetch_failures)
            .entry(email_id.to_string())
            .or_default()
            .push_back(error);
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmailSource for MockEmailSource {
    async fn list(
        &self,
        _query: Option<&str>,
        page_token: Option<&str>,
        _page_size: usize,
    ) -> Result<EmailPage, SourceError> {
        // Counted before pacing so tests can observe a call blocked on its
        // permit.
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(semaphore) = &self.pacing {
            let permit = semaphore
                .acquire()
                .await
                .map_err(|_| SourceError::Permanent("pacing semaphore closed".into()))?;
            permit.forget();
        }

        let index: usize = match page_token {
            Some(token) => token
                .parse()
                .map_err(|_| SourceError::Permanent(format!("bad page token: {token}")))?,
            None => 0,
        };

        if let Some(queued) = lock(&self.list_failures).get_mut(&index) {
            if let Some(error) = queued.pop_front() {
                return Err(error);
            }
        }

        let items = self.pages.get(index).cloned().unwrap_or_default();
        let next_page_token = if index + 1 < self.pages.len() {
            Some((index + 1).to_string())
        } else {
            None
        };
        Ok(EmailPage {
            items,
            next_page_token,
        })
    }

    async fn get_full(&self, email_id: &str) -> Result<EmailToClassify, SourceError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(queued) = lock(&self.fetch_failures).get_mut(email_id) {
            if let Some(error) = queued.pop_front() {
                return Err(error);
            }
        }

        Ok(EmailToClassify {
            email_id: email_id.to_string(),
            account_id: self.account_id.clone(),
            from: Some("sender@example.com".into()),
            subject: Some(format!("subject of {email_id}")),
            body: Some("body".into()),
            received_at: Utc::now(),
        })
    }
}

/// Checkpoint store that injects failures into `save_checkpoint` before
/// delegating to an in-memory store. Progress operations always pass through.
pub struct FlakyCheckpointStore {
    inner: InMemoryCheckpointStore,
    checkpoint_failures: AtomicUsize,
}

impl FlakyCheckpointStore {
    /// Fail the first `n` checkpoint writes. Pass `usize::MAX` for a store
    /// whose checkpoint writes never succeed.
    pub fn failing_first(n: usize) -> Self {
        Self {
            inner: InMemoryCheckpointStore::new(),
            checkpoint_failures: AtomicUsize::new(n),
        }
    }
}

#[async_trait]
impl CheckpointStore for FlakyCheckpointStore {
    async fn save_checkpoint(&self, checkpoint: &ScanCheckpoint) -> Result<(), ScanError> {
        let remaining = self.checkpoint_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            if remaining != usize::MAX {
                self.checkpoint_failures.fetch_sub(1, Ordering::SeqCst);
            }
            return Err(ScanError::CheckpointWrite("injected write failure".into()));
        }
        self.inner.save_checkpoint(checkpoint).await
    }

    async fn load_checkpoint(&self, scan_id: uuid::Uuid) -> Result<Option<ScanCheckpoint>, ScanError> {
        self.inner.load_checkpoint(scan_id).await
    }

    async fn save_progress(&self, progress: &ScanProgress) -> Result<(), ScanError> {
        self.inner.save_progress(progress).await
    }

    async fn load_progress(&self, scan_id: uuid::Uuid) -> Result<Option<ScanProgress>, ScanError> {
        self.inner.load_progress(scan_id).await
    }
}
