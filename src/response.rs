//! Mapping per-prompt outcomes to the connector's response shape.

use serde::Serialize;

/// What happened to one prompt.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success {
        content: Option<String>,
        token_usage: Option<u64>,
    },
    Failure {
        error: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Completion {
    pub content: Option<String>,
    pub token_usage: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ConnectorResponse {
    pub completions: Vec<Completion>,
    pub model_type: String,
}

impl From<Outcome> for Completion {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Success {
                content,
                token_usage,
            } => Completion {
                content,
                token_usage,
                error: None,
            },
            Outcome::Failure { error } => Completion {
                content: None,
                token_usage: None,
                error: Some(error),
            },
        }
    }
}

/// One completion per outcome, in the same order.
pub fn to_response(outcomes: Vec<Outcome>, model_id: &str) -> ConnectorResponse {
    ConnectorResponse {
        completions: outcomes.into_iter().map(Completion::from).collect(),
        model_type: model_id.to_string(),
    }
}
