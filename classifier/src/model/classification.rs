use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};

/// The closed category set every layer votes within. Free-text model answers
/// that do not parse into one of these are rejected as invalid output.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Important,
    Work,
    Personal,
    Finance,
    Travel,
    Shopping,
    Newsletter,
    Social,
    Notification,
    Spam,
    Unknown,
}

/// Which scoring method produced a score. Carried on every [`LayerScore`] so
/// downstream consumers see one stable result shape with an explicit
/// discriminant instead of probing for layer-specific fields.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LayerKind {
    Rules,
    History,
    Llm,
}

/// One layer's opinion about one email. Produced once, never mutated, owned
/// by the combiner invocation that requested it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerScore {
    pub layer: LayerKind,
    pub category: Category,
    /// 0.0..=1.0
    pub importance: f32,
    /// 0.0..=1.0
    pub confidence: f32,
    pub reasoning: String,
    pub latency: Duration,
}

impl LayerScore {
    /// A score that expresses "this layer has nothing to say": zero
    /// confidence, excluded from consensus arithmetic by its own weightlessness
    /// but retained in the output for observability.
    pub fn no_signal(layer: LayerKind, reasoning: impl Into<String>, latency: Duration) -> Self {
        Self {
            layer,
            category: Category::Unknown,
            importance: 0.0,
            confidence: 0.0,
            reasoning: reasoning.into(),
            latency,
        }
    }
}

/// The ensemble's final, reduced verdict for one email.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleClassification {
    pub final_category: Category,
    pub final_importance: f32,
    pub final_confidence: f32,
    /// Every score that contributed, including layers outvoted on category.
    pub layer_scores: Vec<LayerScore>,
    pub layers_agreed: bool,
    pub elapsed: Duration,
}

impl EnsembleClassification {
    /// Placeholder verdict used when no layer could score an email. The item
    /// is still routed (to manual review) so nothing is silently dropped.
    pub fn unscored(elapsed: Duration) -> Self {
        Self {
            final_category: Category::Unknown,
            final_importance: 0.0,
            final_confidence: 0.0,
            layer_scores: Vec::new(),
            layers_agreed: false,
            elapsed,
        }
    }
}

/// Where a classified email goes next.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RoutingAction {
    AutoAction,
    ReviewQueue,
    ManualReview,
}

/// Confidence band the final score landed in, independent of the action
/// actually taken (a scoring failure forces manual review regardless of band).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceBucket {
    High,
    Medium,
    Low,
}

/// Classification plus the routing decision made for it. This is the one
/// shape the record store and provider handlers consume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutedClassification {
    pub classification: EnsembleClassification,
    pub action: RoutingAction,
    /// Present when classification failed and the item was forced into
    /// manual review.
    pub failure: Option<String>,
}

impl RoutedClassification {
    pub fn new(classification: EnsembleClassification, action: RoutingAction) -> Self {
        Self {
            classification,
            action,
            failure: None,
        }
    }

    pub fn failed(classification: EnsembleClassification, reason: impl Into<String>) -> Self {
        Self {
            classification,
            action: RoutingAction::ManualReview,
            failure: Some(reason.into()),
        }
    }
}
