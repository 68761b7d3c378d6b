use config::{Config, ConfigError};
use serde::Deserialize;

use crate::error::{AppError, AppResult};

/// Per-layer weights and ensemble policy knobs. Weights need not sum to 1.0;
/// the combiner normalizes over the layers that actually voted.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub rules_weight: f32,
    pub history_weight: f32,
    pub llm_weight: f32,

    /// Number of layers that must agree on a category to trigger boosting.
    pub agreement_threshold: usize,
    /// Upper bound on the confidence boost applied on agreement.
    pub agreement_boost_cap: f32,
    /// Minimum rule-layer confidence required to skip the LLM call when the
    /// history layer agrees on category.
    pub llm_skip_min_rule_confidence: f32,

    pub rules_timeout_ms: u64,
    pub history_timeout_ms: u64,
    /// Independent and larger: the LLM layer is the only one expected to
    /// suspend on network I/O for a non-trivial duration.
    pub llm_timeout_ms: u64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            rules_weight: 1.0,
            history_weight: 1.5,
            llm_weight: 2.0,
            agreement_threshold: 2,
            agreement_boost_cap: 0.10,
            llm_skip_min_rule_confidence: 0.90,
            rules_timeout_ms: 1_000,
            history_timeout_ms: 2_000,
            llm_timeout_ms: 20_000,
        }
    }
}

impl ScoringWeights {
    pub fn weight_for(&self, layer: crate::model::LayerKind) -> f32 {
        match layer {
            crate::model::LayerKind::Rules => self.rules_weight,
            crate::model::LayerKind::History => self.history_weight,
            crate::model::LayerKind::Llm => self.llm_weight,
        }
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.rules_weight <= 0.0 || self.history_weight <= 0.0 || self.llm_weight <= 0.0 {
            return Err(AppError::Config("layer weights must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.agreement_boost_cap) {
            return Err(AppError::Config(
                "agreement_boost_cap must be within 0.0..=1.0".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.llm_skip_min_rule_confidence) {
            return Err(AppError::Config(
                "llm_skip_min_rule_confidence must be within 0.0..=1.0".into(),
            ));
        }
        if self.agreement_threshold < 2 {
            return Err(AppError::Config(
                "agreement_threshold below 2 would boost every classification".into(),
            ));
        }
        Ok(())
    }
}

/// Confidence thresholds for routing. Two named presets exist because the
/// single-model pipeline and the ensemble ran with different cutoffs in
/// production: consensus among layers raises baseline reliability, so the
/// ensemble profile routes with higher bars.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
pub struct ThresholdProfile {
    /// `final_confidence >= auto_action` routes to automatic action.
    pub auto_action: f32,
    /// `auto_action > final_confidence >= review_queue` routes to the review
    /// queue; anything lower goes to manual review.
    pub review_queue: f32,
}

impl ThresholdProfile {
    pub fn legacy() -> Self {
        Self {
            auto_action: 0.85,
            review_queue: 0.60,
        }
    }

    pub fn ensemble() -> Self {
        Self {
            auto_action: 0.90,
            review_queue: 0.65,
        }
    }

    pub fn named(name: &str) -> AppResult<Self> {
        match name {
            "legacy" => Ok(Self::legacy()),
            "ensemble" => Ok(Self::ensemble()),
            other => Err(AppError::Config(format!(
                "unknown threshold profile: {other}"
            ))),
        }
    }

    pub fn validate(&self) -> AppResult<()> {
        if !(0.0..=1.0).contains(&self.auto_action) || !(0.0..=1.0).contains(&self.review_queue) {
            return Err(AppError::Config(
                "thresholds must be within 0.0..=1.0".into(),
            ));
        }
        if self.review_queue > self.auto_action {
            return Err(AppError::Config(
                "review_queue threshold must not exceed auto_action threshold".into(),
            ));
        }
        Ok(())
    }
}

impl Default for ThresholdProfile {
    fn default() -> Self {
        Self::ensemble()
    }
}

/// Retry/backoff policy for the scan driver's interactions with the email
/// source and the checkpoint store.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_source_retries: u32,
    pub source_backoff_ms: u64,
    pub checkpoint_write_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_source_retries: 3,
            source_backoff_ms: 500,
            checkpoint_write_retries: 3,
        }
    }
}

/// Connection settings for the HTTP chat-completions provider.
#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    pub endpoint: String,
    /// Tried when the primary endpoint fails transiently (local vs cloud
    /// failover).
    #[serde(default)]
    pub fallback_endpoint: Option<String>,
    pub model_id: String,
    pub api_key: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_sec: usize,
    #[serde(default = "default_refill_ms")]
    pub refill_interval_ms: u64,
    #[serde(default = "default_backoff_secs")]
    pub backoff_secs: u64,
}

fn default_temperature() -> f64 {
    0.2
}

fn default_rate_limit() -> usize {
    5
}

fn default_refill_ms() -> u64 {
    250
}

fn default_backoff_secs() -> u64 {
    60
}

impl LlmConfig {
    /// Missing credentials are a startup failure, never a per-item one.
    pub fn validate(&self) -> AppResult<()> {
        if self.endpoint.is_empty() {
            return Err(AppError::Config("llm endpoint is required".into()));
        }
        if self.model_id.is_empty() {
            return Err(AppError::Config("llm model_id is required".into()));
        }
        if self.api_key.is_empty() {
            return Err(AppError::Config("llm api_key is required".into()));
        }
        Ok(())
    }
}

/// Top-level engine configuration. Constructed once at startup and passed by
/// reference into the components that need it; no process-wide statics.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub weights: ScoringWeights,
    pub thresholds: ThresholdProfile,
    pub retry: RetryPolicy,
    pub llm: Option<LlmConfig>,
}

impl EngineConfig {
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(config::File::with_name(path))
            .build()?;

        builder.try_deserialize()
    }

    pub fn validate(&self) -> AppResult<()> {
        self.weights.validate()?;
        self.thresholds.validate()?;
        if let Some(llm) = &self.llm {
            llm.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn preset_threshold_values() {
        let legacy = ThresholdProfile::legacy();
        assert_eq!(legacy.auto_action, 0.85);
        assert_eq!(legacy.review_queue, 0.60);

        let ensemble = ThresholdProfile::ensemble();
        assert_eq!(ensemble.auto_action, 0.90);
        assert_eq!(ensemble.review_queue, 0.65);

        assert_eq!(ThresholdProfile::named("legacy").unwrap(), legacy);
        assert_eq!(ThresholdProfile::named("ensemble").unwrap(), ensemble);
        assert!(ThresholdProfile::named("aggressive").is_err());
    }

    #[test]
    fn default_weights_pass_validation() {
        let weights = ScoringWeights::default();
        weights.validate().unwrap();
        assert_eq!(weights.agreement_threshold, 2);
        assert_eq!(weights.agreement_boost_cap, 0.10);
        assert_eq!(weights.llm_skip_min_rule_confidence, 0.90);
    }

    #[test]
    fn inverted_thresholds_rejected() {
        let profile = ThresholdProfile {
            auto_action: 0.5,
            review_queue: 0.9,
        };
        assert!(profile.validate().is_err());
    }

    #[test]
    fn missing_llm_credentials_fail_at_startup() {
        let cfg = EngineConfig {
            llm: Some(LlmConfig {
                endpoint: "http://localhost:11434/v1/chat/completions".into(),
                fallback_endpoint: None,
                model_id: "mistral-small".into(),
                api_key: String::new(),
                temperature: 0.2,
                rate_limit_per_sec: 5,
                refill_interval_ms: 250,
                backoff_secs: 60,
            }),
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(AppError::Config(_))));
    }

    #[test]
    fn config_loads_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(
            file,
            r#"
            [weights]
            rules_weight = 1.0
            history_weight = 2.0
            llm_weight = 3.0

            [thresholds]
            auto_action = 0.85
            review_queue = 0.60

            [retry]
            max_source_retries = 5
            "#
        )
        .unwrap();

        let cfg = EngineConfig::from_file(path.to_str().unwrap()).unwrap();
        assert_eq!(cfg.weights.history_weight, 2.0);
        assert_eq!(cfg.thresholds, ThresholdProfile::legacy());
        assert_eq!(cfg.retry.max_source_retries, 5);
        // Unspecified sections keep their defaults.
        assert_eq!(cfg.weights.agreement_threshold, 2);
        cfg.validate().unwrap();
    }
}
