//! EnsembleCombiner: fans out to the scoring layers, applies the cost-aware
//! LLM skip, and reduces the surviving scores into one final classification
//! via weighted consensus with agreement boosting.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::ScoringWeights;
use crate::error::EnsembleError;
use crate::model::{Category, EmailToClassify, EnsembleClassification, LayerScore};
use crate::scoring::LayerScorer;

pub struct EnsembleCombiner {
    rules: Arc<dyn LayerScorer>,
    history: Arc<dyn LayerScorer>,
    llm: Arc<dyn LayerScorer>,
    weights: ScoringWeights,
}

impl EnsembleCombiner {
    pub fn new(
        rules: Arc<dyn LayerScorer>,
        history: Arc<dyn LayerScorer>,
        llm: Arc<dyn LayerScorer>,
        weights: ScoringWeights,
    ) -> Self {
        Self {
            rules,
            history,
            llm,
            weights,
        }
    }

    pub fn weights(&self) -> &ScoringWeights {
        &self.weights
    }

    /// Classify one email. Fails only when zero layers produced a usable
    /// score; everything else degrades to fewer contributing layers.
    pub async fn classify(
        &self,
        email: &EmailToClassify,
    ) -> Result<EnsembleClassification, EnsembleError> {
        let started = Instant::now();
        let w = &self.weights;

        let rules_timeout = Duration::from_millis(w.rules_timeout_ms);
        let history_timeout = Duration::from_millis(w.history_timeout_ms);
        let llm_timeout = Duration::from_millis(w.llm_timeout_ms);

        // The rule layer is cheap and synchronous under the hood; its result
        // decides whether the expensive LLM call can be skipped at all.
        let rules_score = run_layer(&*self.rules, email, rules_timeout).await;

        let rules_confident = rules_score
            .as_ref()
            .is_some_and(|s| s.confidence >= w.llm_skip_min_rule_confidence);

        let (history_score, llm_score) = if rules_confident {
            // Cost-aware skip: the LLM only stays out when the history layer
            // independently lands on the same category.
            let history_score = run_layer(&*self.history, email, history_timeout).await;
            let history_agrees = match (&rules_score, &history_score) {
                (Some(r), Some(h)) => h.confidence > 0.0 && h.category == r.category,
                _ => false,
            };

            if history_agrees {
                tracing::debug!(
                    email_id = %email.email_id,
                    category = %rules_score.as_ref().map(|s| s.category).unwrap_or(Category::Unknown),
                    "rule and history layers agree confidently, skipping LLM call"
                );
                (history_score, None)
            } else {
                let llm_score = run_layer(&*self.llm, email, llm_timeout).await;
                (history_score, llm_score)
            }
        } else {
            tokio::join!(
                run_layer(&*self.history, email, history_timeout),
                run_layer(&*self.llm, email, llm_timeout),
            )
        };

        let mut all_scores = Vec::with_capacity(3);
        all_scores.extend(rules_score);
        all_scores.extend(history_score);
        all_scores.extend(llm_score);

        let reduced = reduce(&all_scores, w)?;

        Ok(EnsembleClassification {
            final_category: reduced.category,
            final_importance: reduced.importance,
            final_confidence: reduced.confidence,
            layer_scores: all_scores,
            layers_agreed: reduced.agreed,
            elapsed: started.elapsed(),
        })
    }
}

/// Run one layer under its own timeout. Errors and timeouts exclude the layer
/// from the reduction, never the whole classification.
async fn run_layer(
    layer: &dyn LayerScorer,
    email: &EmailToClassify,
    timeout: Duration,
) -> Option<LayerScore> {
    match tokio::time::timeout(timeout, layer.score(email)).await {
        Ok(Ok(score)) => Some(score),
        Ok(Err(e)) => {
            tracing::warn!(
                email_id = %email.email_id,
                layer = %layer.kind(),
                "layer excluded from ensemble: {e}"
            );
            None
        }
        Err(_) => {
            tracing::warn!(
                email_id = %email.email_id,
                layer = %layer.kind(),
                "layer timed out after {timeout:?}"
            );
            None
        }
    }
}

struct Reduced {
    category: Category,
    importance: f32,
    confidence: f32,
    agreed: bool,
}

/// Weighted consensus over the scores that actually carry signal
/// (confidence > 0). Ties prefer the category backed by the single
/// highest-weighted layer, then the lexicographically smaller category name.
fn reduce(scores: &[LayerScore], weights: &ScoringWeights) -> Result<Reduced, EnsembleError> {
    struct Tally<'a> {
        total: f32,
        max_layer_weight: f32,
        voters: Vec<&'a LayerScore>,
    }

    let mut tallies: Vec<(Category, Tally)> = Vec::new();
    for score in scores.iter().filter(|s| s.confidence > 0.0) {
        let weight = weights.weight_for(score.layer);
        match tallies.iter_mut().find(|(c, _)| *c == score.category) {
            Some((_, tally)) => {
                tally.total += weight * score.confidence;
                tally.max_layer_weight = tally.max_layer_weight.max(weight);
                tally.voters.push(score);
            }
            None => tallies.push((
                score.category,
                Tally {
                    total: weight * score.confidence,
                    max_layer_weight: weight,
                    voters: vec![score],
                },
            )),
        }
    }

    if tallies.is_empty() {
        return Err(EnsembleError::NoScoreAvailable);
    }

    tallies.sort_by(|a, b| {
        b.1.total
            .total_cmp(&a.1.total)
            .then(b.1.max_layer_weight.total_cmp(&a.1.max_layer_weight))
            .then(a.0.as_ref().cmp(b.0.as_ref()))
    });

    let (category, tally) = &tallies[0];

    // Only layers that voted for the winning category contribute to its
    // importance/confidence; outvoted layers stay visible in the output.
    let weight_sum: f32 = tally
        .voters
        .iter()
        .map(|s| weights.weight_for(s.layer))
        .sum();
    let importance = tally
        .voters
        .iter()
        .map(|s| weights.weight_for(s.layer) * s.importance)
        .sum::<f32>()
        / weight_sum;
    let mut confidence = tally
        .voters
        .iter()
        .map(|s| weights.weight_for(s.layer) * s.confidence)
        .sum::<f32>()
        / weight_sum;

    let agreed = tally.voters.len() >= weights.agreement_threshold;
    if agreed {
        confidence = (confidence + weights.agreement_boost_cap).min(1.0);
    }

    Ok(Reduced {
        category: *category,
        importance,
        confidence: confidence.clamp(0.0, 1.0),
        agreed,
    })
}
