//! Chat-completion capability.
//!
//! [`ChatModel`] is the narrow contract the batch runner and the answer
//! synthesizer depend on: given the conversation so far, produce one reply
//! and its token usage. [`OpenAIChat`] implements it against any
//! OpenAI-compatible `/chat/completions` endpoint.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::config::ChatConfig;
use crate::conversation::ChatMessage;
use crate::error::ModelCallError;

/// Sampling and decoding options forwarded verbatim in the request body.
///
/// Unset fields are omitted. Keys the connector does not recognize are kept
/// in `extra` and forwarded as-is.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChatOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub echo: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_of: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logprobs: Option<bool>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt_tokens: Option<u64>,
    #[serde(default)]
    pub completion_tokens: Option<u64>,
    #[serde(default)]
    pub total_tokens: Option<u64>,
}

/// One model reply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatResponse {
    pub content: Option<String>,
    pub model: Option<String>,
    pub usage: Option<TokenUsage>,
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_name(&self) -> &str;

    /// Request a single completion for `messages`.
    async fn chat(&self, messages: &[ChatMessage]) -> Result<ChatResponse, ModelCallError>;
}

pub struct OpenAIChat {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    options: ChatOptions,
    max_retries: u32,
}

impl OpenAIChat {
    /// `api_key` falls back to `OPENAI_API_KEY`. A missing key is reported
    /// per call as [`ModelCallError::MissingCredential`].
    pub fn new(
        config: &ChatConfig,
        model: &str,
        api_key: Option<String>,
        options: ChatOptions,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        let api_key = api_key
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var("OPENAI_API_KEY").ok());

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model: model.to_string(),
            api_key,
            options,
            max_retries: config.max_retries,
        })
    }

    /// Same endpoint and credential, different options (used by the
    /// answer synthesizer, which must not inherit e.g. stop sequences).
    pub fn with_options(&self, options: ChatOptions) -> Self {
        Self {
            client: self.client.clone(),
            endpoint: self.endpoint.clone(),
            model: self.model.clone(),
            api_key: self.api_key.clone(),
            options,
            max_retries: self.max_retries,
        }
    }

    fn request_body(&self, messages: &[ChatMessage]) -> Result<Value, ModelCallError> {
        let mut body = match serde_json::to_value(&self.options) {
            Ok(Value::Object(map)) => map,
            Ok(_) => serde_json::Map::new(),
            Err(e) => return Err(ModelCallError::InvalidResponse(e.to_string())),
        };
        let messages = serde_json::to_value(messages)
            .map_err(|e| ModelCallError::InvalidResponse(e.to_string()))?;
        body.insert("model".to_string(), Value::String(self.model.clone()));
        body.insert("messages".to_string(), messages);
        Ok(Value::Object(body))
    }
}

#[async_trait]
impl ChatModel for OpenAIChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn chat(&self, messages: &[ChatMessage]) -> Result<ChatResponse, ModelCallError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(ModelCallError::MissingCredential)?;
        let body = self.request_body(messages)?;
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tracing::debug!(attempt, ?delay, "retrying chat completion");
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&self.endpoint)
                .bearer_auth(api_key)
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let json: Value = response
                            .json()
                            .await
                            .map_err(|e| ModelCallError::InvalidResponse(e.to_string()))?;
                        return parse_chat_response(&json);
                    }
                    let body_text = response.text().await.unwrap_or_default();
                    let err = ModelCallError::Api {
                        status: status.as_u16(),
                        body: body_text,
                    };
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(err);
                        continue;
                    }
                    return Err(err);
                }
                Err(e) => last_err = Some(ModelCallError::Transport(e.to_string())),
            }
        }

        Err(last_err
            .unwrap_or_else(|| ModelCallError::Transport("chat failed after retries".to_string())))
    }
}

/// Parse a `/chat/completions` response body.
pub fn parse_chat_response(json: &Value) -> Result<ChatResponse, ModelCallError> {
    let choice = json
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .ok_or_else(|| ModelCallError::InvalidResponse("no choices returned".to_string()))?;

    let content = choice
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(str::to_string);

    let usage = json
        .get("usage")
        .filter(|u| !u.is_null())
        .map(|u| serde_json::from_value::<TokenUsage>(u.clone()))
        .transpose()
        .map_err(|e| ModelCallError::InvalidResponse(format!("usage: {}", e)))?;

    Ok(ChatResponse {
        content,
        model: json.get("model").and_then(|m| m.as_str()).map(str::to_string),
        usage,
    })
}
