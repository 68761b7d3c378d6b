use serde::{Deserialize, Serialize};

/// An actionable task pulled out of an email by the extraction agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedTask {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    /// ISO 8601 date (YYYY-MM-DD) when a deadline was mentioned.
    #[serde(default)]
    pub due_date: Option<String>,
    /// "high", "medium" or "low" when urgency indicators were present.
    #[serde(default)]
    pub priority: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedDecision {
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedQuestion {
    pub question: String,
}

/// Everything the extraction agent found in one email. Extraction failures
/// degrade to `ExtractionOutcome::default()` plus a logged warning; they never
/// block routing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionOutcome {
    #[serde(default)]
    pub tasks: Vec<ExtractedTask>,
    #[serde(default)]
    pub decisions: Vec<ExtractedDecision>,
    #[serde(default)]
    pub questions: Vec<ExtractedQuestion>,
}

impl ExtractionOutcome {
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty() && self.decisions.is_empty() && self.questions.is_empty()
    }
}
