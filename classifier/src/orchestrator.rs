//! ClassificationOrchestrator: drives one email (or a scan batch, one item at
//! a time) through combiner -> extraction -> router -> provider apply ->
//! persistence. A single item's failure is recorded and never aborts the run.

use std::sync::Arc;

use crate::clients::{ExtractionAgent, ProviderApplyHandler, RecordStore, ReviewQueueManager};
use crate::error::AppResult;
use crate::model::{
    EmailProcessingStats, EmailToClassify, EnsembleClassification, ExtractionOutcome,
    RoutedClassification, RoutingAction,
};
use crate::routing::ConfidenceRouter;
use crate::scoring::EnsembleCombiner;

pub struct ClassificationOrchestrator {
    combiner: EnsembleCombiner,
    router: ConfidenceRouter,
    extraction: Arc<dyn ExtractionAgent>,
    review_queue: Arc<dyn ReviewQueueManager>,
    record_store: Arc<dyn RecordStore>,
    apply_handler: Arc<dyn ProviderApplyHandler>,
}

impl ClassificationOrchestrator {
    pub fn new(
        combiner: EnsembleCombiner,
        router: ConfidenceRouter,
        extraction: Arc<dyn ExtractionAgent>,
        review_queue: Arc<dyn ReviewQueueManager>,
        record_store: Arc<dyn RecordStore>,
        apply_handler: Arc<dyn ProviderApplyHandler>,
    ) -> Self {
        Self {
            combiner,
            router,
            extraction,
            review_queue,
            record_store,
            apply_handler,
        }
    }

    pub fn record_store(&self) -> &Arc<dyn RecordStore> {
        &self.record_store
    }

    /// Process a slice of emails sequentially. Items are never parallelized
    /// across each other: statistics stay deterministic and concurrent load
    /// on the LLM provider stays bounded. A fresh accumulator is created per
    /// call and returned read-only.
    pub async fn process_emails(
        &self,
        emails: &[EmailToClassify],
        account_id: &str,
    ) -> EmailProcessingStats {
        let mut stats = EmailProcessingStats::start();

        for email in emails {
            let (routed, extraction) = self.classify_and_route(email).await;
            let bucket = self.router.bucket(routed.classification.final_confidence);
            stats.record(&routed, bucket, &extraction);

            tracing::debug!(
                account_id,
                email_id = %email.email_id,
                category = %routed.classification.final_category,
                confidence = routed.classification.final_confidence,
                action = %routed.action,
                "email classified"
            );
        }

        stats.finish();
        tracing::info!(
            account_id,
            total = stats.total_processed,
            failed = stats.failed,
            auto = stats.auto_actioned,
            review = stats.review_queued,
            manual = stats.manual_review,
            "processing run finished"
        );

        stats
    }

    /// Real-time entry point: classify and route a single email, returning
    /// the outcome to the caller (e.g. a push-notification handler).
    pub async fn process_email(&self, email: &EmailToClassify) -> AppResult<RoutedClassification> {
        let (routed, _) = self.classify_and_route(email).await;
        Ok(routed)
    }

    /// Classification failures still yield a result: at minimum a manual
    /// review routing with the failure reason attached, so no email is
    /// silently dropped.
    async fn classify_and_route(
        &self,
        email: &EmailToClassify,
    ) -> (RoutedClassification, ExtractionOutcome) {
        let started = std::time::Instant::now();

        let routed = match self.combiner.classify(email).await {
            Ok(classification) => {
                let action = self.router.route(&classification);
                RoutedClassification::new(classification, action)
            }
            Err(e) => {
                tracing::error!(email_id = %email.email_id, "classification failed: {e}");
                RoutedClassification::failed(
                    EnsembleClassification::unscored(started.elapsed()),
                    e.to_string(),
                )
            }
        };

        let extraction = match self.extraction.extract(email).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(
                    email_id = %email.email_id,
                    "extraction failed, continuing with empty outcome: {e}"
                );
                ExtractionOutcome::default()
            }
        };

        if let Err(e) = self.apply_handler.apply(email, &routed).await {
            tracing::warn!(email_id = %email.email_id, "provider apply failed: {e}");
        }

        if routed.action == RoutingAction::ReviewQueue {
            if let Err(e) = self
                .review_queue
                .add(&email.email_id, &email.account_id, &routed.classification)
                .await
            {
                tracing::warn!(email_id = %email.email_id, "review queue add failed: {e}");
            }
        }

        if let Err(e) = self.record_store.save(email, &routed).await {
            tracing::error!(email_id = %email.email_id, "record save failed: {e}");
        }

        (routed, extraction)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    use crate::config::{ScoringWeights, ThresholdProfile};
    use crate::model::{Category, LayerKind};
    use crate::testing::{
        NullExtractionAgent, RecordingApplyHandler, RecordingRecordStore, RecordingReviewQueue,
        ScriptedScorer,
    };

    use super::*;

    fn email(id: &str) -> EmailToClassify {
        EmailToClassify {
            email_id: id.into(),
            account_id: "acct".into(),
            from: Some("alice@example.com".into()),
            subject: Some("subject".into()),
            body: Some("body".into()),
            received_at: Utc::now(),
        }
    }

    fn orchestrator_with(
        rules: ScriptedScorer,
        history: ScriptedScorer,
        llm: ScriptedScorer,
    ) -> (
        ClassificationOrchestrator,
        Arc<RecordingRecordStore>,
        Arc<RecordingReviewQueue>,
    ) {
        let combiner = EnsembleCombiner::new(
            Arc::new(rules),
            Arc::new(history),
            Arc::new(llm),
            ScoringWeights::default(),
        );
        let records = Arc::new(RecordingRecordStore::default());
        let reviews = Arc::new(RecordingReviewQueue::default());
        let orchestrator = ClassificationOrchestrator::new(
            combiner,
            ConfidenceRouter::new(ThresholdProfile::ensemble()),
            Arc::new(NullExtractionAgent),
            reviews.clone(),
            records.clone(),
            Arc::new(RecordingApplyHandler::default()),
        );
        (orchestrator, records, reviews)
    }

    #[tokio::test]
    async fn per_item_failure_does_not_abort_the_run() {
        // Every layer fails for every item, so each item is a NoScoreAvailable.
        let (orchestrator, records, _) = orchestrator_with(
            ScriptedScorer::unavailable(LayerKind::Rules),
            ScriptedScorer::unavailable(LayerKind::History),
            ScriptedScorer::unavailable(LayerKind::Llm),
        );

        let emails = vec![email("a"), email("b"), email("c")];
        let stats = orchestrator.process_emails(&emails, "acct").await;

        assert_eq!(stats.total_processed, 3);
        assert_eq!(stats.failed, 3);
        assert_eq!(stats.manual_review, 3);
        // Failed items are still persisted, nothing is silently dropped.
        assert_eq!(records.saved_count(), 3);
    }

    #[tokio::test]
    async fn medium_confidence_lands_in_review_queue() {
        let (orchestrator, _, reviews) = orchestrator_with(
            ScriptedScorer::unavailable(LayerKind::Rules),
            ScriptedScorer::unavailable(LayerKind::History),
            ScriptedScorer::score(LayerKind::Llm, Category::Work, 0.70, 0.5),
        );

        let stats = orchestrator.process_emails(&[email("a")], "acct").await;
        assert_eq!(stats.review_queued, 1);
        assert_eq!(reviews.len(), 1);
    }

    #[tokio::test]
    async fn stats_bucket_by_confidence_and_action() {
        let (orchestrator, _, _) = orchestrator_with(
            ScriptedScorer::unavailable(LayerKind::Rules),
            ScriptedScorer::unavailable(LayerKind::History),
            ScriptedScorer::sequence(
                LayerKind::Llm,
                vec![
                    Ok((Category::Spam, 0.95, 0.1)),
                    Ok((Category::Work, 0.70, 0.5)),
                    Ok((Category::Personal, 0.40, 0.5)),
                ],
            ),
        );

        let emails = vec![email("a"), email("b"), email("c")];
        let stats = orchestrator.process_emails(&emails, "acct").await;

        assert_eq!(stats.high_confidence, 1);
        assert_eq!(stats.medium_confidence, 1);
        assert_eq!(stats.low_confidence, 1);
        assert_eq!(stats.auto_actioned, 1);
        assert_eq!(stats.review_queued, 1);
        assert_eq!(stats.manual_review, 1);
        assert_eq!(stats.by_category[&Category::Spam], 1);
        assert!(stats.finished_at.is_some());
    }
}
