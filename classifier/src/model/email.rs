use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One email as handed to the classification pipeline. Immutable input,
/// built per item by the caller (real-time notification or scan batch).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailToClassify {
    pub email_id: String,
    pub account_id: String,
    pub from: Option<String>,
    pub subject: Option<String>,
    pub body: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl EmailToClassify {
    pub fn subject_str(&self) -> &str {
        self.subject.as_deref().unwrap_or("")
    }

    pub fn body_str(&self) -> &str {
        self.body.as_deref().unwrap_or("")
    }

    pub fn from_str(&self) -> &str {
        self.from.as_deref().unwrap_or("")
    }
}

impl std::fmt::Display for EmailToClassify {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (account {}, from {})",
            self.email_id,
            self.account_id,
            self.from_str()
        )
    }
}
