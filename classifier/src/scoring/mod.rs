pub mod ensemble;
pub mod history;
pub mod llm;
pub mod rules;

pub use ensemble::EnsembleCombiner;
pub use history::HistoryLayer;
pub use llm::LlmLayer;
pub use rules::RuleLayer;

use async_trait::async_trait;

use crate::error::ScoringError;
use crate::model::{EmailToClassify, LayerKind, LayerScore};

/// One independent scoring method contributing a category/importance/
/// confidence opinion. Layers are stateless with respect to a single
/// classification call.
#[async_trait]
pub trait LayerScorer: Send + Sync {
    fn kind(&self) -> LayerKind;

    async fn score(&self, email: &EmailToClassify) -> Result<LayerScore, ScoringError>;
}
