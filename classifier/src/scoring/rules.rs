//! Rule layer: a pure, deterministic function of sender/subject/body
//! patterns. First matching rule wins, so ordering in the table is part of
//! the contract. This layer never fails with an availability error.

use std::time::Instant;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::ScoringError;
use crate::model::{Category, EmailToClassify, LayerKind, LayerScore};
use crate::scoring::LayerScorer;

/// A single pattern rule. A rule matches when any of its present matchers
/// hits: a sender substring, a subject regex or a body regex.
#[derive(Debug, Clone)]
pub struct PatternRule {
    pub name: &'static str,
    pub sender_contains: Vec<&'static str>,
    pub subject: Option<Regex>,
    pub body: Option<Regex>,
    pub category: Category,
    pub importance: f32,
    pub confidence: f32,
}

impl PatternRule {
    fn matches(&self, email: &EmailToClassify) -> bool {
        let from = email.from_str().to_ascii_lowercase();
        if self.sender_contains.iter().any(|s| from.contains(s)) {
            return true;
        }
        if let Some(re) = &self.subject {
            if re.is_match(email.subject_str()) {
                return true;
            }
        }
        if let Some(re) = &self.body {
            if re.is_match(email.body_str()) {
                return true;
            }
        }
        false
    }
}

fn re(pattern: &str) -> Option<Regex> {
    Some(Regex::new(pattern).unwrap())
}

static BUILTIN_RULES: Lazy<Vec<PatternRule>> = Lazy::new(|| {
    vec![
        PatternRule {
            name: "security",
            sender_contains: vec![],
            subject: re(
                r"(?i)\b(verification code|security alert|one.?time passcode|two.?factor|password reset|sign.?in attempt)\b",
            ),
            body: None,
            category: Category::Important,
            importance: 0.90,
            confidence: 0.95,
        },
        PatternRule {
            name: "spam_bait",
            sender_contains: vec![],
            subject: re(
                r"(?i)\b(you('| ha)?ve won|claim your prize|lottery|crypto giveaway|act now|risk.?free)\b",
            ),
            body: None,
            category: Category::Spam,
            importance: 0.05,
            confidence: 0.90,
        },
        PatternRule {
            name: "urgent",
            sender_contains: vec![],
            subject: re(r"(?i)\b(urgent|action required|asap|final notice|deadline)\b"),
            body: None,
            category: Category::Important,
            importance: 0.85,
            confidence: 0.80,
        },
        PatternRule {
            name: "finance",
            sender_contains: vec!["billing@", "payments@", "invoices@"],
            subject: re(
                r"(?i)\b(invoice|receipt|payment (due|received|failed)|statement|billing|wire transfer|direct deposit)\b",
            ),
            body: None,
            category: Category::Finance,
            importance: 0.70,
            confidence: 0.85,
        },
        PatternRule {
            name: "travel",
            sender_contains: vec![],
            subject: re(
                r"(?i)\b(itinerary|boarding pass|flight confirmation|reservation confirmed|check.?in (open|reminder)|booking reference)\b",
            ),
            body: None,
            category: Category::Travel,
            importance: 0.70,
            confidence: 0.85,
        },
        PatternRule {
            name: "shopping",
            sender_contains: vec![],
            subject: re(
                r"(?i)\b(order (confirmation|confirmed|shipped)|tracking number|your order|out for delivery|delivery update)\b",
            ),
            body: None,
            category: Category::Shopping,
            importance: 0.50,
            confidence: 0.85,
        },
        PatternRule {
            name: "social",
            sender_contains: vec![
                "facebookmail.com",
                "linkedin.com",
                "twitter.com",
                "x.com",
                "instagram.com",
                "reddit.com",
            ],
            subject: None,
            body: None,
            category: Category::Social,
            importance: 0.30,
            confidence: 0.90,
        },
        PatternRule {
            name: "newsletter",
            sender_contains: vec!["newsletter@", "digest@", "weekly@", "news@"],
            subject: re(r"(?i)\b(newsletter|weekly digest|daily digest|this week in)\b"),
            body: re(r"(?i)\bunsubscribe\b"),
            category: Category::Newsletter,
            importance: 0.30,
            confidence: 0.75,
        },
        PatternRule {
            name: "notification",
            sender_contains: vec![
                "no-reply@",
                "noreply@",
                "notifications@",
                "alerts@",
                "mailer-daemon@",
                "do-not-reply@",
            ],
            subject: None,
            body: None,
            category: Category::Notification,
            importance: 0.35,
            confidence: 0.70,
        },
    ]
});

pub struct RuleLayer {
    rules: Vec<PatternRule>,
}

impl RuleLayer {
    pub fn new() -> Self {
        Self {
            rules: BUILTIN_RULES.clone(),
        }
    }

    /// Custom rule table, evaluated ahead of nothing else: the given rules
    /// are the whole table. Used by accounts with their own heuristics and by
    /// tests.
    pub fn with_rules(rules: Vec<PatternRule>) -> Self {
        Self { rules }
    }

    /// Pure evaluation, exposed for direct use and property tests.
    pub fn evaluate(&self, email: &EmailToClassify) -> (Category, f32, f32, String) {
        for rule in &self.rules {
            if rule.matches(email) {
                return (
                    rule.category,
                    rule.importance,
                    rule.confidence,
                    format!("matched rule '{}'", rule.name),
                );
            }
        }
        // Nothing matched: a weak Unknown vote rather than no vote, so the
        // combiner can still fall back to rules when other layers are out.
        (Category::Unknown, 0.50, 0.20, "no rule matched".to_string())
    }
}

impl Default for RuleLayer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LayerScorer for RuleLayer {
    fn kind(&self) -> LayerKind {
        LayerKind::Rules
    }

    async fn score(&self, email: &EmailToClassify) -> Result<LayerScore, ScoringError> {
        let started = Instant::now();
        let (category, importance, confidence, reasoning) = self.evaluate(email);
        Ok(LayerScore {
            layer: LayerKind::Rules,
            category,
            importance,
            confidence,
            reasoning,
            latency: started.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    use super::*;

    fn email(from: &str, subject: &str, body: &str) -> EmailToClassify {
        EmailToClassify {
            email_id: "e1".into(),
            account_id: "acct".into(),
            from: Some(from.into()),
            subject: Some(subject.into()),
            body: Some(body.into()),
            received_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn security_outranks_notification_sender() {
        let layer = RuleLayer::new();
        let score = layer
            .score(&email(
                "no-reply@accounts.example.com",
                "Your verification code is 834920",
                "",
            ))
            .await
            .unwrap();
        assert_eq!(score.category, Category::Important);
        assert!(score.confidence >= 0.90);
    }

    #[tokio::test]
    async fn newsletter_detected_from_body_unsubscribe() {
        let layer = RuleLayer::new();
        let score = layer
            .score(&email(
                "updates@example.org",
                "March roundup",
                "Read more on our site. Unsubscribe at any time.",
            ))
            .await
            .unwrap();
        assert_eq!(score.category, Category::Newsletter);
    }

    #[tokio::test]
    async fn unmatched_email_gets_weak_unknown_vote() {
        let layer = RuleLayer::new();
        let score = layer
            .score(&email("alice@example.com", "lunch tomorrow?", "see you at noon"))
            .await
            .unwrap();
        assert_eq!(score.category, Category::Unknown);
        assert_eq!(score.confidence, 0.20);
    }

    #[tokio::test]
    async fn evaluation_is_deterministic() {
        let layer = RuleLayer::new();
        let input = email("billing@vendor.com", "Invoice #4417", "amount due");
        let first = layer.score(&input).await.unwrap();
        for _ in 0..10 {
            let again = layer.score(&input).await.unwrap();
            assert_eq!(again.category, first.category);
            assert_eq!(again.confidence, first.confidence);
            assert_eq!(again.importance, first.importance);
        }
        assert_eq!(first.category, Category::Finance);
    }
}
