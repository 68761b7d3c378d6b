//! HTTP chat-completions backend for the [`LlmProvider`] trait, speaking the
//! OpenAI/Mistral-style wire format. Supports a fallback endpoint for
//! local-vs-cloud failover and cooperates with [`RateLimiters`] on 429s.

use anyhow::Context;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::clients::{ChatRequest, ChatResponse, LlmProvider};
use crate::config::LlmConfig;
use crate::error::{AppResult, ProviderError};
use crate::rate_limiters::RateLimiters;
use crate::HttpClient;

pub struct HttpLlmProvider {
    http_client: HttpClient,
    config: LlmConfig,
    rate_limiters: RateLimiters,
}

impl HttpLlmProvider {
    /// Validates the configuration up front: missing credentials surface here
    /// as a startup error rather than as per-email scoring failures.
    pub fn new(http_client: HttpClient, config: LlmConfig) -> AppResult<Self> {
        config.validate()?;
        let rate_limiters = RateLimiters::from_config(&config);
        Ok(Self {
            http_client,
            config,
            rate_limiters,
        })
    }

    pub fn rate_limiters(&self) -> &RateLimiters {
        &self.rate_limiters
    }

    async fn send_to(
        &self,
        endpoint: &str,
        request: &ChatRequest,
    ) -> Result<ChatResponse, ProviderError> {
        let resp = self
            .http_client
            .post(endpoint)
            .bearer_auth(&self.config.api_key)
            .json(&json!(
              {
                "model": &self.config.model_id,
                "temperature": request.temperature,
                "messages": [
                  {
                    "role": "system",
                    "content": request.system_prompt
                  },
                  {
                    "role": "user",
                    "content": request.user_prompt
                  }
                ],
                "response_format": { "type": "json_object" }
              }
            ))
            .send()
            .await
            .map_err(|e| ProviderError::Transient(format!("request to {endpoint} failed: {e}")))?;

        match resp.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(ProviderError::Permanent(format!(
                    "rejected credentials ({})",
                    resp.status()
                )));
            }
            StatusCode::BAD_REQUEST => {
                return Err(ProviderError::Permanent("bad request".into()));
            }
            StatusCode::TOO_MANY_REQUESTS => {
                self.rate_limiters.trigger_backoff();
                return Err(ProviderError::Transient("rate limit exceeded".into()));
            }
            status if status.is_server_error() => {
                return Err(ProviderError::Transient(format!(
                    "server error ({status})"
                )));
            }
            _ => {}
        }

        let body = resp
            .json::<serde_json::Value>()
            .await
            .map_err(|e| ProviderError::Transient(format!("could not read response: {e}")))?;

        let parsed = serde_json::from_value::<ChatApiResponseOrError>(body.clone())
            .context(format!("Could not parse chat response: {}", body))
            .map_err(|e| ProviderError::Transient(e.to_string()))?;

        let parsed = match parsed {
            ChatApiResponseOrError::Error(error) => {
                if error.message == "Requests rate limit exceeded" {
                    self.rate_limiters.trigger_backoff();
                }
                return Err(ProviderError::Transient(format!(
                    "chat API error: {}",
                    error.message
                )));
            }
            ChatApiResponseOrError::Response(parsed) => parsed,
        };

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Transient("no choices in response".into()))?;

        Ok(ChatResponse {
            content: choice.message.content,
            total_tokens: parsed.usage.total_tokens,
        })
    }
}

#[async_trait]
impl LlmProvider for HttpLlmProvider {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        self.rate_limiters.acquire_one().await;

        match self.send_to(&self.config.endpoint, &request).await {
            Ok(response) => Ok(response),
            // Permanent errors are configuration problems; the fallback would
            // fail the same way.
            Err(ProviderError::Permanent(e)) => Err(ProviderError::Permanent(e)),
            Err(ProviderError::Transient(primary_err)) => {
                let Some(fallback) = &self.config.fallback_endpoint else {
                    return Err(ProviderError::Transient(primary_err));
                };
                tracing::warn!(
                    endpoint = %self.config.endpoint,
                    "primary endpoint failed, trying fallback: {primary_err}"
                );
                self.send_to(fallback, &request).await
            }
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PromptUsage {
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ModelLength,
    Error,
    ToolCalls,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatChoice {
    pub index: i32,
    pub message: ChatMessage,
    pub finish_reason: FinishReason,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatApiResponse {
    pub choices: Vec<ChatChoice>,
    pub usage: PromptUsage,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatApiError {
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChatApiResponseOrError {
    Response(ChatApiResponse),
    Error(ChatApiError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_response_parses() {
        let raw = r#"{
            "id": "cmpl-1",
            "choices": [
                {
                    "index": 0,
                    "message": { "role": "assistant", "content": "{\"category\": \"work\"}" },
                    "finish_reason": "stop"
                }
            ],
            "usage": { "prompt_tokens": 120, "completion_tokens": 14, "total_tokens": 134 }
        }"#;

        let parsed: ChatApiResponseOrError = serde_json::from_str(raw).unwrap();
        match parsed {
            ChatApiResponseOrError::Response(resp) => {
                assert_eq!(resp.usage.total_tokens, 134);
                assert_eq!(resp.choices[0].message.content, "{\"category\": \"work\"}");
            }
            ChatApiResponseOrError::Error(_) => panic!("parsed as error"),
        }
    }

    #[test]
    fn chat_error_parses() {
        let raw = r#"{ "message": "Requests rate limit exceeded" }"#;
        let parsed: ChatApiResponseOrError = serde_json::from_str(raw).unwrap();
        assert!(matches!(parsed, ChatApiResponseOrError::Error(_)));
    }

    #[tokio::test]
    async fn missing_credentials_rejected_at_construction() {
        let config = LlmConfig {
            endpoint: "https://api.mistral.ai/v1/chat/completions".into(),
            fallback_endpoint: None,
            model_id: "mistral-small-latest".into(),
            api_key: String::new(),
            temperature: 0.2,
            rate_limit_per_sec: 5,
            refill_interval_ms: 250,
            backoff_secs: 60,
        };
        assert!(HttpLlmProvider::new(HttpClient::new(), config).is_err());
    }
}
