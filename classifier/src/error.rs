use derive_more::derive::Display;

use crate::scan::ScanStatus;

pub type AppResult<T> = Result<T, AppError>;

/// Per-layer scoring failures. Both variants exclude the layer from the
/// ensemble reduction; `Invalid` exists so malformed model output is visible
/// in logs as its own failure class.
#[derive(Debug, Display)]
pub enum ScoringError {
    #[display("scoring unavailable: {_0}")]
    Unavailable(String),
    #[display("invalid scoring output: {_0}")]
    Invalid(String),
}

impl std::error::Error for ScoringError {}

/// The only hard failure of the ensemble combiner: every layer either errored
/// or timed out, so there is nothing to reduce.
#[derive(Debug, Display)]
pub enum EnsembleError {
    #[display("no layer produced a score")]
    NoScoreAvailable,
}

impl std::error::Error for EnsembleError {}

/// LLM provider failures, split by whether retrying can ever help.
/// `Permanent` covers misconfiguration (bad credentials, unknown model) and
/// is surfaced at construction time wherever possible.
#[derive(Debug, Display)]
pub enum ProviderError {
    #[display("transient provider error: {_0}")]
    Transient(String),
    #[display("permanent provider error: {_0}")]
    Permanent(String),
}

impl std::error::Error for ProviderError {}

/// Email source failures observed by the scan driver. Transient errors are
/// retried with backoff; permanent ones fail the scan immediately.
#[derive(Debug, Display)]
pub enum SourceError {
    #[display("transient source error: {_0}")]
    Transient(String),
    #[display("permanent source error: {_0}")]
    Permanent(String),
}

impl std::error::Error for SourceError {}

#[derive(Debug, Display)]
pub enum ScanError {
    #[display("scan {_0} not found")]
    NotFound(uuid::Uuid),
    #[display("cannot {op} a scan in state {from}")]
    InvalidTransition { from: ScanStatus, op: &'static str },
    #[display("email source unavailable: {_0}")]
    SourceUnavailable(String),
    #[display("checkpoint write failed: {_0}")]
    CheckpointWrite(String),
}

impl std::error::Error for ScanError {}

// This centralizes all different errors from the engine in one place
#[derive(Debug, Display)]
pub enum AppError {
    #[display("configuration error: {_0}")]
    Config(String),
    Scoring(ScoringError),
    Ensemble(EnsembleError),
    Provider(ProviderError),
    Scan(ScanError),
    Internal(anyhow::Error),
}

impl std::error::Error for AppError {}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        AppError::Internal(error)
    }
}

impl From<ScoringError> for AppError {
    fn from(error: ScoringError) -> Self {
        AppError::Scoring(error)
    }
}

impl From<EnsembleError> for AppError {
    fn from(error: EnsembleError) -> Self {
        AppError::Ensemble(error)
    }
}

impl From<ProviderError> for AppError {
    fn from(error: ProviderError) -> Self {
        AppError::Provider(error)
    }
}

impl From<ScanError> for AppError {
    fn from(error: ScanError) -> Self {
        AppError::Scan(error)
    }
}

impl From<reqwest::Error> for AppError {
    fn from(error: reqwest::Error) -> Self {
        tracing::error!("Reqwest error: {:?}", error);
        AppError::Internal(error.into())
    }
}
