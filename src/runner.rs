//! Batch execution: one model call per prompt over a shared history.
//!
//! # Pipeline
//!
//! ```text
//! prompt ─▶ references ─▶ loader ─▶ conversation builder ─▶ chat model ─▶ Outcome
//!                            │              ▲
//!                            └─ index ──────┘ (one query per document)
//! ```
//!
//! Prompts run strictly in order. A reference that fails to load is logged
//! and skipped; a model call that fails becomes that prompt's error
//! completion. Neither stops the batch.

use anyhow::Context;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::chat::{ChatModel, ChatOptions, OpenAIChat};
use crate::config::{Config, ResponseMode};
use crate::conversation::{ChatMessage, ConversationBuilder, ConversationHistory, HistoryPolicy};
use crate::embedding::create_embedder;
use crate::index::DocumentIndexBuilder;
use crate::loader::DocumentLoader;
use crate::properties::{api_key, parse_properties, ConnectorDeclaration};
use crate::references::{PatternMatcher, ReferenceMatcher};
use crate::response::{to_response, ConnectorResponse, Outcome};

/// Assistant text recorded in history when the model returns no content.
pub const NO_RESPONSE: &str = "No response.";

pub struct BatchRunner {
    chat: Arc<dyn ChatModel>,
    loader: DocumentLoader,
    builder: ConversationBuilder,
    matcher: Arc<dyn ReferenceMatcher>,
}

impl BatchRunner {
    pub fn new(chat: Arc<dyn ChatModel>, loader: DocumentLoader, policy: HistoryPolicy) -> Self {
        Self::with_matcher(chat, loader, policy, Arc::new(PatternMatcher))
    }

    /// Use `matcher` both to find references and to strip them from user turns.
    pub fn with_matcher(
        chat: Arc<dyn ChatModel>,
        loader: DocumentLoader,
        policy: HistoryPolicy,
        matcher: Arc<dyn ReferenceMatcher>,
    ) -> Self {
        Self {
            chat,
            loader,
            builder: ConversationBuilder::with_matcher(policy, matcher.clone()),
            matcher,
        }
    }

    /// Run `prompts` against a fresh history seeded with `system_prompt`.
    pub async fn run(&self, model_id: &str, prompts: &[String], system_prompt: &str) -> ConnectorResponse {
        let mut history = ConversationHistory::new(system_prompt);
        let outcomes = self.run_prompts(&mut history, prompts).await;
        to_response(outcomes, model_id)
    }

    /// Run `prompts` in order, appending every turn to `history`.
    pub async fn run_prompts(&self, history: &mut ConversationHistory, prompts: &[String]) -> Vec<Outcome> {
        let total = prompts.len();
        let mut outcomes = Vec::with_capacity(total);
        for (i, prompt) in prompts.iter().enumerate() {
            let outcome = self.run_prompt(history, prompt).await;
            info!("Response to prompt {} of {}", i + 1, total);
            outcomes.push(outcome);
        }
        outcomes
    }

    async fn run_prompt(&self, history: &mut ConversationHistory, prompt: &str) -> Outcome {
        let mut appended = 0usize;
        for reference in self.matcher.find(prompt) {
            match self.loader.load(&reference).await {
                Ok(loaded) => {
                    for document in loaded.into_documents() {
                        self.builder.append(history, &document, prompt).await;
                        appended += 1;
                    }
                }
                Err(e) => warn!(reference = %reference.text, error = %e, "skipping reference"),
            }
        }
        if appended == 0 {
            self.builder.append_prompt(history, prompt);
        }

        match serde_json::to_string(history.messages()) {
            Ok(dump) => debug!(messages = history.len(), history = %dump, "sending conversation"),
            Err(e) => debug!(error = %e, "could not serialize history"),
        }

        match self.chat.chat(history.messages()).await {
            Ok(reply) => {
                let reply_text = reply.content.clone().unwrap_or_else(|| NO_RESPONSE.to_string());
                history.push(ChatMessage::assistant(reply_text));
                Outcome::Success {
                    content: reply.content,
                    token_usage: reply.usage.and_then(|u| u.prompt_tokens),
                }
            }
            Err(e) => {
                error!(model = self.chat.model_name(), error = %e, "model call failed");
                Outcome::Failure {
                    error: e.to_string(),
                }
            }
        }
    }
}

/// Run one batch with the default OpenAI client and in-process index.
///
/// `properties` may override the system prompt (`prompt`); every other
/// key is forwarded to the chat request. `settings.API_KEY` supplies the
/// credential, falling back to `OPENAI_API_KEY`. Malformed properties or
/// settings abort the batch before any prompt runs.
pub async fn run_connector(
    config: &Config,
    model_id: &str,
    prompts: &[String],
    properties: &Map<String, Value>,
    settings: &Map<String, Value>,
) -> anyhow::Result<ConnectorResponse> {
    let (prompt_override, options) = parse_properties(properties)?;
    let key = api_key(settings)?;
    let system_prompt = prompt_override
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| config.connector.system_prompt.clone());

    if !ConnectorDeclaration::describe().supports_model(model_id) {
        warn!(model = model_id, "model is not in the declared model list");
    }

    let chat = OpenAIChat::new(&config.chat, model_id, key.clone(), options)
        .context("Failed to create chat client")?;
    let synthesizer: Option<Arc<dyn ChatModel>> = match config.retrieval.response_mode {
        ResponseMode::Synthesize => Some(Arc::new(chat.with_options(ChatOptions::default()))),
        ResponseMode::Compact => None,
    };
    let embedder = create_embedder(&config.embedding, key.as_deref())
        .context("Failed to create embedding provider")?;

    let index_builder = DocumentIndexBuilder::new(config, embedder, synthesizer);
    let loader = DocumentLoader::new(&config.loader, Arc::new(index_builder))
        .context("Failed to create document loader")?;
    let runner = BatchRunner::new(Arc::new(chat), loader, config.connector.history_policy);

    info!(model = model_id, prompts = prompts.len(), "running batch");
    Ok(runner.run(model_id, prompts, &system_prompt).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::{ChatResponse, TokenUsage};
    use crate::config::LoaderConfig;
    use crate::conversation::Role;
    use crate::error::ModelCallError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Scripted {
        calls: Mutex<Vec<Vec<ChatMessage>>>,
        fail_on: Option<usize>,
    }

    #[async_trait]
    impl ChatModel for Scripted {
        fn model_name(&self) -> &str {
            "scripted"
        }
        async fn chat(&self, messages: &[ChatMessage]) -> Result<ChatResponse, ModelCallError> {
            let mut calls = self.calls.lock().unwrap();
            calls.push(messages.to_vec());
            if Some(calls.len() - 1) == self.fail_on {
                return Err(ModelCallError::Transport("connection reset".into()));
            }
            Ok(ChatResponse {
                content: Some(format!("reply {}", calls.len())),
                model: None,
                usage: Some(TokenUsage {
                    prompt_tokens: Some(10 * calls.len() as u64),
                    ..TokenUsage::default()
                }),
            })
        }
    }

    fn runner(model: Arc<Scripted>) -> BatchRunner {
        let mut config = Config::default();
        config.retrieval.response_mode = ResponseMode::Compact;
        let loader = DocumentLoader::new(
            &LoaderConfig::default(),
            Arc::new(DocumentIndexBuilder::new(&config, None, None)),
        )
        .unwrap();
        BatchRunner::new(model, loader, HistoryPolicy::StrippedQuery)
    }

    fn scripted(fail_on: Option<usize>) -> Arc<Scripted> {
        Arc::new(Scripted {
            calls: Mutex::new(Vec::new()),
            fail_on,
        })
    }

    #[tokio::test]
    async fn history_carries_across_prompts() {
        let model = scripted(None);
        let response = runner(model.clone())
            .run("gpt-4o", &["hello".to_string(), "and again".to_string()], "sys")
            .await;

        assert_eq!(response.completions.len(), 2);
        assert_eq!(response.completions[1].content.as_deref(), Some("reply 2"));
        assert_eq!(response.completions[1].token_usage, Some(20));

        let calls = model.calls.lock().unwrap();
        let second: Vec<(Role, Option<String>)> =
            calls[1].iter().map(|m| (m.role, m.text())).collect();
        assert_eq!(
            second,
            vec![
                (Role::System, Some("sys".to_string())),
                (Role::User, Some("hello".to_string())),
                (Role::Assistant, Some("reply 1".to_string())),
                (Role::User, Some("and again".to_string())),
            ]
        );
    }

    #[tokio::test]
    async fn model_failure_is_isolated() {
        let model = scripted(Some(1));
        let prompts: Vec<String> = vec!["one".into(), "two".into(), "three".into()];
        let response = runner(model).run("gpt-4o", &prompts, "sys").await;

        assert_eq!(response.completions.len(), 3);
        assert!(response.completions[0].error.is_none());
        assert!(response.completions[1].content.is_none());
        assert!(response.completions[1]
            .error
            .as_deref()
            .is_some_and(|e| e.contains("connection reset")));
        assert_eq!(response.completions[2].content.as_deref(), Some("reply 3"));
    }

    #[tokio::test]
    async fn missing_reference_is_skipped() {
        let model = scripted(None);
        let prompts = vec!["read /no/such/notes.txt please".to_string()];
        let response = runner(model.clone()).run("gpt-4o", &prompts, "sys").await;

        assert!(response.completions[0].error.is_none());
        let calls = model.calls.lock().unwrap();
        assert_eq!(calls[0].len(), 2);
        assert_eq!(calls[0][1].text().as_deref(), Some("read please"));
    }

    #[tokio::test]
    async fn malformed_properties_abort_the_batch() {
        let mut properties = Map::new();
        properties.insert("temperature".into(), Value::String("hot".into()));
        let err = run_connector(
            &Config::default(),
            "gpt-4o",
            &["hi".to_string()],
            &properties,
            &Map::new(),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("temperature"));
    }

    #[tokio::test]
    async fn null_properties_do_not_abort_the_batch() {
        let mut config = Config::default();
        config.chat.base_url = "http://127.0.0.1:9".to_string();
        config.chat.max_retries = 0;
        let mut properties = Map::new();
        properties.insert("prompt".into(), Value::Null);
        properties.insert("max_tokens".into(), Value::Null);

        let response = run_connector(
            &config,
            "gpt-4o",
            &["hi".to_string()],
            &properties,
            &Map::new(),
        )
        .await
        .unwrap();
        assert_eq!(response.completions.len(), 1);
        assert!(response.completions[0].error.is_some());
    }
}
