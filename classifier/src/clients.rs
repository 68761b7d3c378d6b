//! Contracts for the collaborators the engine does not own: the paginated
//! mail source, preference storage, the LLM backend, extraction, the review
//! queue, the classification record store and the provider label handler.
//! Wire/API detail lives behind these traits; the engine only sees the shapes
//! below.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{AppResult, ProviderError, SourceError};
use crate::model::{
    Category, EmailToClassify, EnsembleClassification, ExtractionOutcome, RoutedClassification,
};

/// One page of message ids from the email source.
#[derive(Debug, Clone)]
pub struct EmailPage {
    pub items: Vec<String>,
    /// Opaque; feed back into the next `list` call. `None` means exhausted.
    pub next_page_token: Option<String>,
}

/// Paginated access to a mailbox.
#[async_trait]
pub trait EmailSource: Send + Sync {
    async fn list(
        &self,
        query: Option<&str>,
        page_token: Option<&str>,
        page_size: usize,
    ) -> Result<EmailPage, SourceError>;

    async fn get_full(&self, email_id: &str) -> Result<EmailToClassify, SourceError>;
}

/// Stored per-sender preferences consulted by the history layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SenderPreference {
    pub whitelisted: bool,
    pub blacklisted: bool,
    pub muted_categories: Vec<Category>,
}

#[async_trait]
pub trait PreferenceStore: Send + Sync {
    /// `None` when the store holds nothing for this sender.
    async fn lookup(&self, sender: &str, account_id: &str)
        -> AppResult<Option<SenderPreference>>;
}

/// A structured-output chat request as the scoring layer issues it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub temperature: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub content: String,
    pub total_tokens: i64,
}

/// Opaque scoring oracle. Implementations distinguish transient outages
/// (excluded from the current classification only) from permanent
/// misconfiguration (a startup-time error).
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError>;
}

#[async_trait]
pub trait ExtractionAgent: Send + Sync {
    async fn extract(&self, email: &EmailToClassify) -> AppResult<ExtractionOutcome>;
}

#[async_trait]
pub trait ReviewQueueManager: Send + Sync {
    async fn add(
        &self,
        email_id: &str,
        account_id: &str,
        classification: &EnsembleClassification,
    ) -> AppResult<()>;
}

/// Persistence for classification outcomes. `save` must be idempotent on
/// (account_id, email_id).
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn save(&self, email: &EmailToClassify, routed: &RoutedClassification)
        -> AppResult<()>;

    async fn is_processed(&self, account_id: &str, email_id: &str) -> AppResult<bool>;
}

/// What the provider handler did with an email's labels/folders.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplyOutcome {
    pub applied: Vec<String>,
    pub created: Vec<String>,
    pub archived: bool,
}

/// Gmail-style multi-label vs single-folder IMAP application lives behind
/// this trait; the engine only hands over the routed classification.
#[async_trait]
pub trait ProviderApplyHandler: Send + Sync {
    async fn apply(
        &self,
        email: &EmailToClassify,
        routed: &RoutedClassification,
    ) -> AppResult<ApplyOutcome>;
}
