pub mod classification;
pub mod email;
pub mod extraction;
pub mod stats;

pub use classification::{
    Category, ConfidenceBucket, EnsembleClassification, LayerKind, LayerScore,
    RoutedClassification, RoutingAction,
};
pub use email::EmailToClassify;
pub use extraction::{ExtractedDecision, ExtractedQuestion, ExtractedTask, ExtractionOutcome};
pub use stats::EmailProcessingStats;
