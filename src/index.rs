//! Retrieval index contracts and the default in-process index.
//!
//! [`IndexBuilder`] turns extracted documents into a [`QueryEngine`]; the
//! conversation builder queries that engine once per resolved reference.
//! [`DocumentIndexBuilder`] is the implementation wired up by
//! [`run_connector`](crate::runner::run_connector):
//!
//! 1. documents are split with [`chunk_text`],
//! 2. with an embedder configured, each distinct chunk is embedded once and
//!    queries rank by cosine similarity; otherwise chunks rank by how many
//!    query terms they contain,
//! 3. the top `retrieval.top_k` chunks either go to the chat model for a
//!    synthesized answer or are returned joined by blank lines.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::chat::ChatModel;
use crate::chunk::{chunk_text, Chunk};
use crate::config::{Config, ResponseMode};
use crate::conversation::ChatMessage;
use crate::embedding::{cosine_similarity, embed_query, Embedder};
use crate::error::ConnectorError;
use crate::formats::RawDocument;

/// What a query produced. `response: None` means the index had nothing to
/// say; callers append absent context rather than a placeholder.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResponse {
    pub response: Option<String>,
    /// Sources of the chunks the response was built from, best first.
    pub sources: Vec<String>,
}

impl QueryResponse {
    pub fn new(response: Option<String>) -> Self {
        Self {
            response,
            sources: Vec::new(),
        }
    }
}

#[async_trait]
pub trait QueryEngine: Send + Sync {
    async fn query(&self, text: &str) -> Result<QueryResponse, ConnectorError>;
}

#[async_trait]
pub trait IndexBuilder: Send + Sync {
    async fn build(&self, documents: &[RawDocument]) -> Result<Box<dyn QueryEngine>, ConnectorError>;
}

pub struct DocumentIndexBuilder {
    max_tokens: usize,
    top_k: usize,
    response_mode: ResponseMode,
    embedder: Option<Arc<dyn Embedder>>,
    synthesizer: Option<Arc<dyn ChatModel>>,
}

impl DocumentIndexBuilder {
    pub fn new(
        config: &Config,
        embedder: Option<Arc<dyn Embedder>>,
        synthesizer: Option<Arc<dyn ChatModel>>,
    ) -> Self {
        Self {
            max_tokens: config.chunking.max_tokens,
            top_k: config.retrieval.top_k.max(1),
            response_mode: config.retrieval.response_mode,
            embedder,
            synthesizer,
        }
    }
}

#[async_trait]
impl IndexBuilder for DocumentIndexBuilder {
    async fn build(&self, documents: &[RawDocument]) -> Result<Box<dyn QueryEngine>, ConnectorError> {
        let id = Uuid::new_v4();
        let chunks: Vec<Chunk> = documents
            .iter()
            .enumerate()
            .flat_map(|(i, doc)| chunk_text(i, &doc.text, self.max_tokens))
            .collect();

        let vectors = match &self.embedder {
            Some(embedder) if !chunks.is_empty() => Some(
                embed_chunks(embedder.as_ref(), &chunks)
                    .await
                    .map_err(ConnectorError::Indexing)?,
            ),
            _ => None,
        };

        debug!(
            index = %id,
            documents = documents.len(),
            chunks = chunks.len(),
            embedded = vectors.is_some(),
            "built retrieval index"
        );

        Ok(Box::new(DocumentIndex {
            id,
            sources: documents.iter().map(|d| d.source.clone()).collect(),
            chunks,
            vectors,
            top_k: self.top_k,
            response_mode: self.response_mode,
            embedder: self.embedder.clone(),
            synthesizer: self.synthesizer.clone(),
        }))
    }
}

/// Embed each distinct chunk text once, then fan vectors back out to chunks.
async fn embed_chunks(embedder: &dyn Embedder, chunks: &[Chunk]) -> anyhow::Result<Vec<Vec<f32>>> {
    let mut slot_by_hash: HashMap<&str, usize> = HashMap::new();
    let mut unique: Vec<String> = Vec::new();
    for chunk in chunks {
        slot_by_hash.entry(chunk.hash.as_str()).or_insert_with(|| {
            unique.push(chunk.text.clone());
            unique.len() - 1
        });
    }

    let vectors = embedder.embed(&unique).await?;
    if vectors.len() != unique.len() {
        anyhow::bail!(
            "embedder returned {} vectors for {} chunks",
            vectors.len(),
            unique.len()
        );
    }

    Ok(chunks
        .iter()
        .map(|chunk| vectors[slot_by_hash[chunk.hash.as_str()]].clone())
        .collect())
}

pub struct DocumentIndex {
    id: Uuid,
    sources: Vec<String>,
    chunks: Vec<Chunk>,
    vectors: Option<Vec<Vec<f32>>>,
    top_k: usize,
    response_mode: ResponseMode,
    embedder: Option<Arc<dyn Embedder>>,
    synthesizer: Option<Arc<dyn ChatModel>>,
}

impl DocumentIndex {
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Chunk positions, best first, at most `top_k`.
    async fn rank(&self, query: &str) -> Result<Vec<usize>, ConnectorError> {
        let scores: Vec<f64> = match (&self.vectors, &self.embedder) {
            (Some(vectors), Some(embedder)) => {
                let query_vec = embed_query(embedder.as_ref(), query)
                    .await
                    .map_err(ConnectorError::RetrievalQuery)?;
                vectors
                    .iter()
                    .map(|v| cosine_similarity(&query_vec, v) as f64)
                    .collect()
            }
            _ => keyword_scores(&self.chunks, query),
        };

        let mut order: Vec<usize> = (0..self.chunks.len()).collect();
        // Stable: ties keep document order.
        order.sort_by(|&a, &b| {
            scores[b]
                .partial_cmp(&scores[a])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        order.truncate(self.top_k);
        Ok(order)
    }

    async fn synthesize(
        &self,
        synthesizer: &dyn ChatModel,
        context: &[&str],
        query: &str,
    ) -> Result<Option<String>, ConnectorError> {
        let prompt = format!(
            "Context information is below.\n\
             ---------------------\n\
             {}\n\
             ---------------------\n\
             Given the context information and not prior knowledge, answer the query.\n\
             Query: {}\n\
             Answer: ",
            context.join("\n\n"),
            query
        );
        let reply = synthesizer
            .chat(&[ChatMessage::user(prompt)])
            .await
            .map_err(|e| ConnectorError::RetrievalQuery(e.into()))?;
        Ok(reply.content)
    }
}

/// Count of query terms each chunk contains, case-insensitively.
fn keyword_scores(chunks: &[Chunk], query: &str) -> Vec<f64> {
    let query_lower = query.to_lowercase();
    let terms: Vec<&str> = query_lower.split_whitespace().collect();
    chunks
        .iter()
        .map(|chunk| {
            let text_lower = chunk.text.to_lowercase();
            terms.iter().filter(|t| text_lower.contains(*t)).count() as f64
        })
        .collect()
}

#[async_trait]
impl QueryEngine for DocumentIndex {
    async fn query(&self, text: &str) -> Result<QueryResponse, ConnectorError> {
        if self.chunks.is_empty() {
            debug!(index = %self.id, "query against empty index");
            return Ok(QueryResponse::default());
        }

        let ranked = self.rank(text).await?;
        let context: Vec<&str> = ranked.iter().map(|&i| self.chunks[i].text.as_str()).collect();
        let mut sources: Vec<String> = Vec::new();
        for &i in &ranked {
            let source = &self.sources[self.chunks[i].document];
            if !sources.contains(source) {
                sources.push(source.clone());
            }
        }
        debug!(index = %self.id, hits = ranked.len(), "retrieved context");

        let response = match (self.response_mode, &self.synthesizer) {
            (ResponseMode::Synthesize, Some(synthesizer)) => {
                self.synthesize(synthesizer.as_ref(), &context, text).await?
            }
            _ => Some(context.join("\n\n")),
        };

        Ok(QueryResponse { response, sources })
    }
}
