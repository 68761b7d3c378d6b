use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::model::{
    Category, ConfidenceBucket, ExtractionOutcome, RoutedClassification, RoutingAction,
};

/// Per-run counters for one `process_emails` invocation. Accumulated in place
/// while the run is live, read-only once `finish` has been called.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailProcessingStats {
    pub total_processed: u64,
    pub failed: u64,

    pub high_confidence: u64,
    pub medium_confidence: u64,
    pub low_confidence: u64,

    pub auto_actioned: u64,
    pub review_queued: u64,
    pub manual_review: u64,

    pub by_category: IndexMap<Category, u64>,

    pub tasks_extracted: u64,
    pub decisions_extracted: u64,
    pub questions_extracted: u64,

    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl EmailProcessingStats {
    pub fn start() -> Self {
        Self {
            total_processed: 0,
            failed: 0,
            high_confidence: 0,
            medium_confidence: 0,
            low_confidence: 0,
            auto_actioned: 0,
            review_queued: 0,
            manual_review: 0,
            by_category: IndexMap::new(),
            tasks_extracted: 0,
            decisions_extracted: 0,
            questions_extracted: 0,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn record(
        &mut self,
        routed: &RoutedClassification,
        bucket: ConfidenceBucket,
        extraction: &ExtractionOutcome,
    ) {
        self.total_processed += 1;
        if routed.failure.is_some() {
            self.failed += 1;
        }

        match bucket {
            ConfidenceBucket::High => self.high_confidence += 1,
            ConfidenceBucket::Medium => self.medium_confidence += 1,
            ConfidenceBucket::Low => self.low_confidence += 1,
        }

        match routed.action {
            RoutingAction::AutoAction => self.auto_actioned += 1,
            RoutingAction::ReviewQueue => self.review_queued += 1,
            RoutingAction::ManualReview => self.manual_review += 1,
        }

        *self
            .by_category
            .entry(routed.classification.final_category)
            .or_insert(0) += 1;

        self.tasks_extracted += extraction.tasks.len() as u64;
        self.decisions_extracted += extraction.decisions.len() as u64;
        self.questions_extracted += extraction.questions.len() as u64;
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }
}
