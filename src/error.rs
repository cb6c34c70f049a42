//! Error taxonomy for the connector pipeline.
//!
//! Errors are contained at the smallest unit that produced them:
//!
//! | Variant | Raised by | Recovery |
//! |---------|-----------|----------|
//! | [`ConnectorError::ReferenceResolution`] | [`loader`](crate::loader) | reference skipped, logged |
//! | [`ConnectorError::Indexing`] | [`index`](crate::index) builders | document skipped, logged |
//! | [`ConnectorError::RetrievalQuery`] | [`index`](crate::index) engines | absent context message appended |
//! | [`ConnectorError::ModelCall`] | [`chat`](crate::chat) | error completion for that prompt |
//! | [`ConnectorError::InvalidInput`] | [`properties`](crate::properties) | whole batch aborted |

use thiserror::Error;

/// Errors raised while resolving references, indexing, querying, or
/// calling the language model.
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("could not resolve reference '{reference}': {reason}")]
    ReferenceResolution { reference: String, reason: String },

    #[error("failed to build retrieval index: {0}")]
    Indexing(#[source] anyhow::Error),

    #[error("retrieval query failed: {0}")]
    RetrievalQuery(#[source] anyhow::Error),

    #[error(transparent)]
    ModelCall(#[from] ModelCallError),

    #[error("invalid connector input: {0}")]
    InvalidInput(String),
}

impl ConnectorError {
    pub fn reference(reference: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        ConnectorError::ReferenceResolution {
            reference: reference.into(),
            reason: reason.to_string(),
        }
    }
}

/// Failures of the chat-completion capability.
#[derive(Debug, Error)]
pub enum ModelCallError {
    #[error("missing API credential: set the API_KEY setting or OPENAI_API_KEY")]
    MissingCredential,

    #[error("chat API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("chat request failed: {0}")]
    Transport(String),

    #[error("invalid chat response: {0}")]
    InvalidResponse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_call_error_is_transparent() {
        let err: ConnectorError = ModelCallError::Api {
            status: 429,
            body: "rate limited".to_string(),
        }
        .into();
        assert_eq!(err.to_string(), "chat API error 429: rate limited");
    }

    #[test]
    fn reference_error_names_the_reference() {
        let err = ConnectorError::reference("/tmp/missing.pdf", "file not found");
        let msg = err.to_string();
        assert!(msg.contains("/tmp/missing.pdf"));
        assert!(msg.contains("file not found"));
    }
}
