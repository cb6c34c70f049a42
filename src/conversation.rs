//! Conversation history and retrieved-context assembly.
//!
//! A [`ConversationHistory`] is created once per batch, seeded with the
//! system prompt, and passed by `&mut` through every prompt so later
//! prompts see earlier turns. [`ConversationBuilder::append`] adds the two
//! messages contributed by one resolved document: the user's turn and the
//! system message carrying what the document's index answered.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::loader::LoadedDocument;
use crate::references::{strip_with, PatternMatcher, ReferenceMatcher};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }
}

/// One chat turn. `content: None` is serialized as JSON `null`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: Option<Vec<ContentPart>>,
}

impl ChatMessage {
    pub fn new(role: Role, parts: Vec<ContentPart>) -> Self {
        Self {
            role,
            content: Some(parts),
        }
    }

    pub fn absent(role: Role) -> Self {
        Self {
            role,
            content: None,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, vec![ContentPart::text(text)])
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![ContentPart::text(text)])
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, vec![ContentPart::text(text)])
    }

    /// All text parts joined with newlines, or `None` when content is absent.
    pub fn text(&self) -> Option<String> {
        self.content.as_ref().map(|parts| {
            parts
                .iter()
                .map(|ContentPart::Text { text }| text.as_str())
                .collect::<Vec<_>>()
                .join("\n")
        })
    }
}

/// Append-only message log shared by every prompt of one batch.
#[derive(Debug, Clone, Serialize)]
#[serde(transparent)]
pub struct ConversationHistory {
    messages: Vec<ChatMessage>,
}

impl ConversationHistory {
    /// Start a history with exactly one system message.
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![ChatMessage::system(system_prompt)],
        }
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Always false: the seed message is never removed.
    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }
}

/// How a resolved document is folded into the history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum HistoryPolicy {
    /// User turn is the prompt with references removed; the index is
    /// queried with the same text.
    #[default]
    StrippedQuery,
    /// User turn carries the unmodified prompt plus the document text; the
    /// index is queried with the unmodified prompt.
    VerbatimEcho,
}

impl std::str::FromStr for HistoryPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stripped-query" => Ok(HistoryPolicy::StrippedQuery),
            "verbatim-echo" => Ok(HistoryPolicy::VerbatimEcho),
            other => Err(format!(
                "unknown history policy '{}': expected stripped-query or verbatim-echo",
                other
            )),
        }
    }
}

pub struct ConversationBuilder {
    policy: HistoryPolicy,
    matcher: Arc<dyn ReferenceMatcher>,
}

impl ConversationBuilder {
    pub fn new(policy: HistoryPolicy) -> Self {
        Self::with_matcher(policy, Arc::new(PatternMatcher))
    }

    pub fn with_matcher(policy: HistoryPolicy, matcher: Arc<dyn ReferenceMatcher>) -> Self {
        Self { policy, matcher }
    }

    pub fn policy(&self) -> HistoryPolicy {
        self.policy
    }

    /// Push only the user turn, for prompts that resolved no document.
    pub fn append_prompt(&self, history: &mut ConversationHistory, user_prompt: &str) {
        let text = match self.policy {
            HistoryPolicy::StrippedQuery => strip_with(self.matcher.as_ref(), user_prompt),
            HistoryPolicy::VerbatimEcho => user_prompt.to_string(),
        };
        history.push(ChatMessage::user(text));
    }

    /// Push the user turn, query `document` once, then push the retrieved
    /// context as a system message. A failed or empty query still pushes
    /// the system message, with absent content.
    pub async fn append(
        &self,
        history: &mut ConversationHistory,
        document: &LoadedDocument,
        user_prompt: &str,
    ) {
        let (user_message, query) = match self.policy {
            HistoryPolicy::StrippedQuery => {
                let stripped = strip_with(self.matcher.as_ref(), user_prompt);
                (ChatMessage::user(stripped.clone()), stripped)
            }
            HistoryPolicy::VerbatimEcho => (
                ChatMessage::new(
                    Role::User,
                    vec![
                        ContentPart::text(user_prompt),
                        ContentPart::text(document.text.as_str()),
                    ],
                ),
                user_prompt.to_string(),
            ),
        };
        history.push(user_message);

        let context = match document.index.query(&query).await {
            Ok(response) => {
                if response.response.is_none() {
                    debug!(source = %document.source, "index returned no answer");
                }
                response.response
            }
            Err(e) => {
                warn!(source = %document.source, error = %e, "retrieval query failed");
                None
            }
        };

        history.push(match context {
            Some(text) => ChatMessage::system(text),
            None => ChatMessage::absent(Role::System),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConnectorError;
    use crate::index::{QueryEngine, QueryResponse};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Recording {
        queries: Arc<Mutex<Vec<String>>>,
        answer: Option<String>,
        fail: bool,
    }

    #[async_trait]
    impl QueryEngine for Recording {
        async fn query(&self, text: &str) -> Result<QueryResponse, ConnectorError> {
            self.queries.lock().unwrap().push(text.to_string());
            if self.fail {
                return Err(ConnectorError::RetrievalQuery(anyhow::anyhow!("boom")));
            }
            Ok(QueryResponse::new(self.answer.clone()))
        }
    }

    fn document(answer: Option<&str>, fail: bool) -> (LoadedDocument, Arc<Mutex<Vec<String>>>) {
        let queries = Arc::new(Mutex::new(Vec::new()));
        let doc = LoadedDocument::new(
            "quarterly revenue grew",
            "/tmp/report.pdf",
            Box::new(Recording {
                queries: queries.clone(),
                answer: answer.map(str::to_string),
                fail,
            }),
        );
        (doc, queries)
    }

    #[test]
    fn history_starts_with_system_prompt() {
        let history = ConversationHistory::new("You are a helpful assistant.");
        assert_eq!(history.len(), 1);
        assert!(!history.is_empty());
        assert_eq!(history.messages()[0].role, Role::System);
        assert_eq!(
            history.messages()[0].text().as_deref(),
            Some("You are a helpful assistant.")
        );
    }

    #[test]
    fn absent_content_serializes_as_null() {
        let json = serde_json::to_value(ChatMessage::absent(Role::System)).unwrap();
        assert_eq!(json, serde_json::json!({"role": "system", "content": null}));
        let json = serde_json::to_value(ChatMessage::user("hi")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"role": "user", "content": [{"type": "text", "text": "hi"}]})
        );
    }

    #[test]
    fn policy_parses_from_cli_names() {
        assert_eq!(
            "verbatim-echo".parse::<HistoryPolicy>().unwrap(),
            HistoryPolicy::VerbatimEcho
        );
        assert!("echo".parse::<HistoryPolicy>().is_err());
    }

    #[tokio::test]
    async fn stripped_query_appends_two_messages() {
        let (doc, queries) = document(Some("Revenue grew 12%."), false);
        let mut history = ConversationHistory::new("sys");
        ConversationBuilder::new(HistoryPolicy::StrippedQuery)
            .append(&mut history, &doc, "summarize /tmp/report.pdf please")
            .await;

        assert_eq!(history.len(), 3);
        assert_eq!(history.messages()[1].text().as_deref(), Some("summarize please"));
        assert_eq!(history.messages()[2].role, Role::System);
        assert_eq!(history.messages()[2].text().as_deref(), Some("Revenue grew 12%."));
        assert_eq!(*queries.lock().unwrap(), vec!["summarize please".to_string()]);
    }

    #[test]
    fn bare_prompt_is_stripped_under_default_policy() {
        let mut history = ConversationHistory::new("sys");
        ConversationBuilder::new(HistoryPolicy::StrippedQuery)
            .append_prompt(&mut history, "open /missing/file.txt now");
        assert_eq!(history.len(), 2);
        assert_eq!(history.messages()[1].role, Role::User);
        assert_eq!(history.messages()[1].text().as_deref(), Some("open now"));
    }

    #[tokio::test]
    async fn failed_query_appends_absent_context() {
        let (doc, queries) = document(None, true);
        let mut history = ConversationHistory::new("sys");
        ConversationBuilder::new(HistoryPolicy::StrippedQuery)
            .append(&mut history, &doc, "what is in /tmp/report.pdf")
            .await;

        assert_eq!(history.len(), 3);
        assert!(history.messages()[2].content.is_none());
        assert_eq!(queries.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn verbatim_echo_sends_prompt_and_document() {
        let (doc, queries) = document(Some("ctx"), false);
        let mut history = ConversationHistory::new("sys");
        ConversationBuilder::new(HistoryPolicy::VerbatimEcho)
            .append(&mut history, &doc, "summarize /tmp/report.pdf")
            .await;

        let user = &history.messages()[1];
        assert_eq!(
            user.content.as_deref(),
            Some(
                &[
                    ContentPart::text("summarize /tmp/report.pdf"),
                    ContentPart::text("quarterly revenue grew"),
                ][..]
            )
        );
        assert_eq!(
            *queries.lock().unwrap(),
            vec!["summarize /tmp/report.pdf".to_string()]
        );
    }
}
