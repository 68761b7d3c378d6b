//! ConfidenceRouter: a pure function from final confidence to an operational
//! action. Thresholds come from a named profile, never constants, so legacy
//! and ensemble pipelines can run with different cutoffs.

use crate::config::ThresholdProfile;
use crate::model::{ConfidenceBucket, EnsembleClassification, RoutingAction};

#[derive(Debug, Clone)]
pub struct ConfidenceRouter {
    profile: ThresholdProfile,
}

impl ConfidenceRouter {
    pub fn new(profile: ThresholdProfile) -> Self {
        Self { profile }
    }

    pub fn profile(&self) -> &ThresholdProfile {
        &self.profile
    }

    pub fn route(&self, classification: &EnsembleClassification) -> RoutingAction {
        match self.bucket(classification.final_confidence) {
            ConfidenceBucket::High => RoutingAction::AutoAction,
            ConfidenceBucket::Medium => RoutingAction::ReviewQueue,
            ConfidenceBucket::Low => RoutingAction::ManualReview,
        }
    }

    pub fn bucket(&self, confidence: f32) -> ConfidenceBucket {
        if confidence >= self.profile.auto_action {
            ConfidenceBucket::High
        } else if confidence >= self.profile.review_queue {
            ConfidenceBucket::Medium
        } else {
            ConfidenceBucket::Low
        }
    }
}

impl Default for ConfidenceRouter {
    fn default() -> Self {
        Self::new(ThresholdProfile::ensemble())
    }
}
