//! Language-model layer: issues a structured-output request to the LLM
//! provider and parses its answer into a [`LayerScore`]. Provider outages are
//! optional evidence lost, never a hard dependency of a classification.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use indoc::formatdoc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use strum::IntoEnumIterator;

use crate::clients::{ChatRequest, LlmProvider};
use crate::error::{ProviderError, ScoringError};
use crate::model::{Category, EmailToClassify, LayerKind, LayerScore};
use crate::scoring::LayerScorer;

fn system_prompt() -> String {
    let categories = Category::iter()
        .map(|c| c.as_ref().to_string())
        .collect::<Vec<_>>()
        .join(", ");

    formatdoc! {r#"
        You are a helpful assistant that categorizes emails into exactly one of the categories inside the square brackets below.
        [{categories}]
        Estimate how important the email is to its recipient as a number between 0.0 and 1.0, and how confident you are in the category as a number between 0.0 and 1.0.
        You will only respond with a JSON object with the keys category, importance, confidence and reasoning. Do not provide explanations outside the JSON or multiple categories."#}
}

fn user_prompt(email: &EmailToClassify) -> String {
    format!(
        "Categorize the following email based on the sender between the <from> tags, the subject between the <subject> tags and the body between the <body> tags.\n<from>{}</from>\n<subject>{}</subject>\n<body>{}</body>",
        email.from_str(),
        email.subject_str(),
        email.body_str(),
    )
}

#[derive(Debug, Deserialize)]
struct AnswerJson {
    category: String,
    #[serde(default)]
    importance: Option<f32>,
    confidence: f32,
    #[serde(default)]
    reasoning: Option<String>,
}

/// Parse the model's answer, falling back to field-by-field regex extraction
/// when the JSON does not deserialize cleanly (models occasionally wrap the
/// object in prose or code fences).
fn parse_answer(content: &str) -> Result<AnswerJson, ScoringError> {
    if let Ok(answer) = serde_json::from_str::<AnswerJson>(content) {
        return Ok(answer);
    }

    static RE_CAT: Lazy<Regex> = Lazy::new(|| Regex::new(r#""category":\s*"([^"]*)""#).unwrap());
    static RE_CONF: Lazy<Regex> =
        Lazy::new(|| Regex::new(r#""confidence":\s*([0-9.]+)"#).unwrap());
    static RE_IMP: Lazy<Regex> =
        Lazy::new(|| Regex::new(r#""importance":\s*([0-9.]+)"#).unwrap());

    let category = RE_CAT
        .captures(content)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| ScoringError::Invalid(format!("no category in model output: {content}")))?;

    let confidence = RE_CONF
        .captures(content)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<f32>().ok())
        .ok_or_else(|| {
            ScoringError::Invalid(format!("no confidence in model output: {content}"))
        })?;

    let importance = RE_IMP
        .captures(content)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<f32>().ok());

    Ok(AnswerJson {
        category,
        importance,
        confidence,
        reasoning: None,
    })
}

pub struct LlmLayer {
    provider: Arc<dyn LlmProvider>,
    temperature: f64,
}

impl LlmLayer {
    pub fn new(provider: Arc<dyn LlmProvider>, temperature: f64) -> Self {
        Self {
            provider,
            temperature,
        }
    }
}

#[async_trait]
impl LayerScorer for LlmLayer {
    fn kind(&self) -> LayerKind {
        LayerKind::Llm
    }

    async fn score(&self, email: &EmailToClassify) -> Result<LayerScore, ScoringError> {
        let started = Instant::now();

        let response = self
            .provider
            .complete(ChatRequest {
                system_prompt: system_prompt(),
                user_prompt: user_prompt(email),
                temperature: self.temperature,
            })
            .await
            .map_err(|e| match e {
                ProviderError::Transient(msg) => ScoringError::Unavailable(msg),
                // Misconfiguration is caught when the provider is built; a
                // permanent failure mid-run still only costs this layer's vote.
                ProviderError::Permanent(msg) => {
                    tracing::error!("permanent LLM provider failure: {msg}");
                    ScoringError::Unavailable(msg)
                }
            })?;

        let answer = parse_answer(&response.content)?;

        let category = Category::from_str(answer.category.trim()).map_err(|_| {
            ScoringError::Invalid(format!("model chose unknown category: {}", answer.category))
        })?;

        let confidence = answer.confidence.clamp(0.0, 1.0);
        let importance = answer.importance.unwrap_or(0.5).clamp(0.0, 1.0);

        Ok(LayerScore {
            layer: LayerKind::Llm,
            category,
            importance,
            confidence,
            reasoning: answer
                .reasoning
                .unwrap_or_else(|| "model gave no reasoning".to_string()),
            latency: started.elapsed(),
        })
    }
}
