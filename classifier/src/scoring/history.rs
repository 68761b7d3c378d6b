//! History layer: scores an email from stored sender/domain preferences.
//! Deterministic given stored state. Returns a weightless "no signal" score
//! when the store holds nothing for the sender.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use crate::clients::PreferenceStore;
use crate::error::ScoringError;
use crate::model::{Category, EmailToClassify, LayerKind, LayerScore};
use crate::scoring::LayerScorer;

pub struct HistoryLayer {
    store: Arc<dyn PreferenceStore>,
}

impl HistoryLayer {
    pub fn new(store: Arc<dyn PreferenceStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl LayerScorer for HistoryLayer {
    fn kind(&self) -> LayerKind {
        LayerKind::History
    }

    async fn score(&self, email: &EmailToClassify) -> Result<LayerScore, ScoringError> {
        let started = Instant::now();
        let sender = email.from_str();
        if sender.is_empty() {
            return Ok(LayerScore::no_signal(
                LayerKind::History,
                "email has no sender",
                started.elapsed(),
            ));
        }

        let preference = self
            .store
            .lookup(sender, &email.account_id)
            .await
            .map_err(|e| ScoringError::Unavailable(format!("preference lookup failed: {e}")))?;

        let Some(preference) = preference else {
            return Ok(LayerScore::no_signal(
                LayerKind::History,
                "no sender history",
                started.elapsed(),
            ));
        };

        // Blacklist beats whitelist when both are somehow set.
        let score = if preference.blacklisted {
            LayerScore {
                layer: LayerKind::History,
                category: Category::Spam,
                importance: 0.05,
                confidence: 0.95,
                reasoning: format!("sender {sender} is blacklisted"),
                latency: started.elapsed(),
            }
        } else if preference.whitelisted {
            LayerScore {
                layer: LayerKind::History,
                category: Category::Important,
                importance: 0.90,
                confidence: 0.90,
                reasoning: format!("sender {sender} is whitelisted"),
                latency: started.elapsed(),
            }
        } else if let Some(muted) = preference.muted_categories.first() {
            // The user explicitly muted this sender's traffic under a
            // category; vote for it with low importance.
            LayerScore {
                layer: LayerKind::History,
                category: *muted,
                importance: 0.15,
                confidence: 0.70,
                reasoning: format!("sender {sender} muted under {muted}"),
                latency: started.elapsed(),
            }
        } else {
            LayerScore::no_signal(
                LayerKind::History,
                "sender known but no strong preference",
                started.elapsed(),
            )
        };

        Ok(score)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    use crate::clients::SenderPreference;
    use crate::testing::StaticPreferenceStore;

    use super::*;

    fn email(from: &str) -> EmailToClassify {
        EmailToClassify {
            email_id: "e1".into(),
            account_id: "acct".into(),
            from: Some(from.into()),
            subject: None,
            body: None,
            received_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn unknown_sender_yields_no_signal() {
        let layer = HistoryLayer::new(Arc::new(StaticPreferenceStore::default()));
        let score = layer.score(&email("stranger@example.com")).await.unwrap();
        assert_eq!(score.confidence, 0.0);
        assert_eq!(score.category, Category::Unknown);
    }

    #[tokio::test]
    async fn blacklist_wins_over_whitelist() {
        let store = StaticPreferenceStore::with(
            "bad@example.com",
            SenderPreference {
                whitelisted: true,
                blacklisted: true,
                muted_categories: vec![],
            },
        );
        let layer = HistoryLayer::new(Arc::new(store));
        let score = layer.score(&email("bad@example.com")).await.unwrap();
        assert_eq!(score.category, Category::Spam);
        assert!(score.confidence > 0.9);
    }

    #[tokio::test]
    async fn whitelisted_sender_scores_important() {
        let store = StaticPreferenceStore::with(
            "boss@example.com",
            SenderPreference {
                whitelisted: true,
                ..Default::default()
            },
        );
        let layer = HistoryLayer::new(Arc::new(store));
        let score = layer.score(&email("boss@example.com")).await.unwrap();
        assert_eq!(score.category, Category::Important);
        assert_eq!(score.importance, 0.90);
    }

    #[tokio::test]
    async fn muted_sender_votes_muted_category_with_low_importance() {
        let store = StaticPreferenceStore::with(
            "promos@shop.example",
            SenderPreference {
                muted_categories: vec![Category::Shopping],
                ..Default::default()
            },
        );
        let layer = HistoryLayer::new(Arc::new(store));
        let score = layer.score(&email("promos@shop.example")).await.unwrap();
        assert_eq!(score.category, Category::Shopping);
        assert!(score.importance < 0.2);
    }
}
