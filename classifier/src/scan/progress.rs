//! Durable state describing a batch scan's position and counters: the status
//! state machine, running counters, the resume cursor and the per-batch
//! checkpoint snapshot.

use chrono::{DateTime, Duration, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use crate::model::{Category, EmailProcessingStats};

pub const MIN_BATCH_SIZE: usize = 10;
pub const MAX_BATCH_SIZE: usize = 500;

/// Scan lifecycle. `Completed`, `Failed` and `Cancelled` are terminal;
/// nothing transitions out of them.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    NotStarted,
    InProgress,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl ScanStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ScanStatus::Completed | ScanStatus::Failed | ScanStatus::Cancelled
        )
    }
}

/// Immutable once a scan starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    pub account_id: String,
    pub batch_size: usize,
    #[serde(default)]
    pub max_results: Option<usize>,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default = "default_true")]
    pub skip_already_processed: bool,
    #[serde(default)]
    pub include_attachments: bool,
    #[serde(default)]
    pub summarize_threads: bool,
}

fn default_true() -> bool {
    true
}

impl ScanConfig {
    pub fn new(account_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            batch_size: 100,
            max_results: None,
            query: None,
            skip_already_processed: true,
            include_attachments: false,
            summarize_threads: false,
        }
    }

    /// Batch size clamped into the supported range; the rest passes through.
    pub fn normalized(mut self) -> Self {
        self.batch_size = self.batch_size.clamp(MIN_BATCH_SIZE, MAX_BATCH_SIZE);
        self
    }
}

/// Running counters mirroring [`EmailProcessingStats`] plus the scan-level
/// skip/fail counts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanCounters {
    pub processed: u64,
    pub skipped: u64,
    pub failed: u64,

    pub auto_actioned: u64,
    pub review_queued: u64,
    pub manual_review: u64,

    pub high_confidence: u64,
    pub medium_confidence: u64,
    pub low_confidence: u64,

    pub by_category: IndexMap<Category, u64>,

    pub tasks_extracted: u64,
    pub decisions_extracted: u64,
    pub questions_extracted: u64,
}

impl ScanCounters {
    /// Fold one batch's processing stats into the scan totals.
    pub fn absorb(&mut self, stats: &EmailProcessingStats) {
        self.processed += stats.total_processed;
        self.failed += stats.failed;
        self.auto_actioned += stats.auto_actioned;
        self.review_queued += stats.review_queued;
        self.manual_review += stats.manual_review;
        self.high_confidence += stats.high_confidence;
        self.medium_confidence += stats.medium_confidence;
        self.low_confidence += stats.low_confidence;
        for (category, count) in &stats.by_category {
            *self.by_category.entry(*category).or_insert(0) += count;
        }
        self.tasks_extracted += stats.tasks_extracted;
        self.decisions_extracted += stats.decisions_extracted;
        self.questions_extracted += stats.questions_extracted;
    }
}

/// The live (and persisted) view of one scan. Mutated exclusively by the
/// driver that owns the scan id; status queries get a cloned snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanProgress {
    pub scan_id: Uuid,
    pub account_id: String,
    pub status: ScanStatus,
    pub config: ScanConfig,
    pub counters: ScanCounters,

    pub batch_number: u64,
    /// Resume cursor: the last item processed and the opaque token for the
    /// next page.
    pub last_email_id: Option<String>,
    pub next_page_token: Option<String>,

    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,

    pub error: Option<String>,
    pub error_detail: Option<serde_json::Value>,
}

impl ScanProgress {
    pub fn new(scan_id: Uuid, config: ScanConfig) -> Self {
        let now = Utc::now();
        Self {
            scan_id,
            account_id: config.account_id.clone(),
            status: ScanStatus::NotStarted,
            config,
            counters: ScanCounters::default(),
            batch_number: 0,
            last_email_id: None,
            next_page_token: None,
            started_at: now,
            updated_at: now,
            completed_at: None,
            error: None,
            error_detail: None,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Total items this scan has dealt with, including skips and failures.
    pub fn items_seen(&self) -> u64 {
        self.counters.processed + self.counters.skipped
    }

    /// Estimated completion time, derived from elapsed time and the
    /// processed/total ratio. Only available when the scan has a results cap
    /// to measure against.
    pub fn estimated_completion(&self) -> Option<DateTime<Utc>> {
        let total = self.config.max_results? as u64;
        let seen = self.items_seen();
        if seen == 0 || seen >= total {
            return None;
        }
        let elapsed = Utc::now().signed_duration_since(self.started_at);
        let per_item = elapsed.num_milliseconds() as f64 / seen as f64;
        let remaining_ms = per_item * (total - seen) as f64;
        Some(Utc::now() + Duration::milliseconds(remaining_ms as i64))
    }

    pub fn checkpoint(&self) -> ScanCheckpoint {
        ScanCheckpoint {
            scan_id: self.scan_id,
            batch_number: self.batch_number,
            last_email_id: self.last_email_id.clone(),
            next_page_token: self.next_page_token.clone(),
            processed_count: self.counters.processed,
        }
    }
}

/// Point-in-time snapshot written after every successfully completed batch.
/// A crash or pause loses at most one in-flight batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanCheckpoint {
    pub scan_id: Uuid,
    pub batch_number: u64,
    pub last_email_id: Option<String>,
    pub next_page_token: Option<String>,
    pub processed_count: u64,
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn batch_size_is_clamped_to_supported_range() {
        let tiny = ScanConfig {
            batch_size: 1,
            ..ScanConfig::new("acct")
        }
        .normalized();
        assert_eq!(tiny.batch_size, MIN_BATCH_SIZE);

        let huge = ScanConfig {
            batch_size: 100_000,
            ..ScanConfig::new("acct")
        }
        .normalized();
        assert_eq!(huge.batch_size, MAX_BATCH_SIZE);
    }

    #[test]
    fn terminal_statuses() {
        assert!(ScanStatus::Completed.is_terminal());
        assert!(ScanStatus::Failed.is_terminal());
        assert!(ScanStatus::Cancelled.is_terminal());
        assert!(!ScanStatus::InProgress.is_terminal());
        assert!(!ScanStatus::Paused.is_terminal());
        assert!(!ScanStatus::NotStarted.is_terminal());
    }

    #[test]
    fn eta_requires_progress_and_a_cap() {
        let mut progress = ScanProgress::new(
            Uuid::new_v4(),
            ScanConfig {
                max_results: Some(100),
                ..ScanConfig::new("acct")
            },
        );
        assert!(progress.estimated_completion().is_none());

        progress.counters.processed = 50;
        progress.started_at = Utc::now() - Duration::seconds(60);
        let eta = progress.estimated_completion().unwrap();
        assert!(eta > Utc::now());

        progress.config.max_results = None;
        assert!(progress.estimated_completion().is_none());
    }

    #[test]
    fn checkpoint_snapshots_the_cursor() {
        let mut progress = ScanProgress::new(Uuid::new_v4(), ScanConfig::new("acct"));
        progress.batch_number = 3;
        progress.last_email_id = Some("msg-42".into());
        progress.next_page_token = Some("page-4".into());
        progress.counters.processed = 300;

        let cp = progress.checkpoint();
        assert_eq!(cp.batch_number, 3);
        assert_eq!(cp.last_email_id.as_deref(), Some("msg-42"));
        assert_eq!(cp.next_page_token.as_deref(), Some("page-4"));
        assert_eq!(cp.processed_count, 300);
    }

    #[test]
    fn progress_round_trips_through_json() {
        let progress = ScanProgress::new(Uuid::new_v4(), ScanConfig::new("acct"));
        let json = serde_json::to_string(&progress).unwrap();
        let back: ScanProgress = serde_json::from_str(&json).unwrap();
        assert_eq!(back.scan_id, progress.scan_id);
        assert_eq!(back.status, ScanStatus::NotStarted);
    }
}
