//! Email classification engine: a three-layer scoring ensemble with
//! confidence-threshold routing, plus a resumable batch scan driver for
//! working through months of mail history without losing progress.
//!
//! The crate deliberately owns only the classification core. Mail providers,
//! preference storage, the LLM backend, extraction, review queues and record
//! persistence are all reached through the traits in [`clients`] so callers
//! can wire in whatever infrastructure they run.

pub mod clients;
pub mod config;
pub mod error;
pub mod llm_client;
pub mod model;
pub mod observability;
pub mod orchestrator;
pub mod rate_limiters;
pub mod routing;
pub mod scan;
pub mod scoring;
pub mod testing;

pub use config::{EngineConfig, ScoringWeights, ThresholdProfile};
pub use error::{AppError, AppResult};
pub use model::{
    Category, EmailProcessingStats, EmailToClassify, EnsembleClassification, LayerKind,
    LayerScore, RoutedClassification, RoutingAction,
};
pub use orchestrator::ClassificationOrchestrator;
pub use routing::ConfidenceRouter;
pub use scan::{ScanConfig, ScanDriver, ScanProgress, ScanStatus};
pub use scoring::EnsembleCombiner;

pub type HttpClient = reqwest::Client;

/// Install a tracing subscriber reading `RUST_LOG`, defaulting to `info`.
/// Intended for binaries and integration tests; safe to call more than once.
pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::Layer::default().with_ansi(false))
        .try_init();
}
