//! TOML configuration.
//!
//! Every section has defaults, so an empty file (or no file at all) is a
//! valid configuration: keyword retrieval, synthesized answers, and the
//! OpenAI chat endpoint.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::conversation::HistoryPolicy;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub connector: ConnectorConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub loader: LoaderConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ConnectorConfig {
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default)]
    pub history_policy: HistoryPolicy,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            history_policy: HistoryPolicy::default(),
        }
    }
}

fn default_system_prompt() -> String {
    crate::properties::DEFAULT_SYSTEM_PROMPT.to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    #[serde(default = "default_chat_base_url")]
    pub base_url: String,
    #[serde(default = "default_chat_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_chat_max_retries")]
    pub max_retries: u32,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            base_url: default_chat_base_url(),
            timeout_secs: default_chat_timeout_secs(),
            max_retries: default_chat_max_retries(),
        }
    }
}

fn default_chat_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_chat_timeout_secs() -> u64 {
    60
}
fn default_chat_max_retries() -> u32 {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_max_tokens() -> usize {
    700
}

/// How a query engine turns retrieved chunks into a response.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ResponseMode {
    /// Ask the chat model to answer from the retrieved chunks.
    #[default]
    Synthesize,
    /// Return the retrieved chunk texts as-is.
    Compact,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub response_mode: ResponseMode,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            response_mode: ResponseMode::default(),
        }
    }
}

fn default_top_k() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoaderConfig {
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    /// Index builds in flight at once while loading a directory.
    #[serde(default = "default_index_concurrency")]
    pub index_concurrency: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            exclude_globs: Vec::new(),
            follow_symlinks: false,
            max_file_bytes: default_max_file_bytes(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            index_concurrency: default_index_concurrency(),
        }
    }
}

fn default_max_file_bytes() -> u64 {
    50 * 1024 * 1024
}
fn default_fetch_timeout_secs() -> u64 {
    30
}
fn default_index_concurrency() -> usize {
    4
}

/// Read and validate a config file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Load `path` if given, otherwise fall back to defaults.
pub fn load_or_default(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(p) => load_config(p),
        None => Ok(Config::default()),
    }
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.chunking.max_tokens == 0 {
        anyhow::bail!("chunking.max_tokens must be > 0");
    }

    if config.retrieval.top_k == 0 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }

    if config.loader.max_file_bytes == 0 {
        anyhow::bail!("loader.max_file_bytes must be > 0");
    }

    if config.loader.index_concurrency == 0 {
        anyhow::bail!("loader.index_concurrency must be >= 1");
    }

    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.connector.system_prompt, "You are a helpful assistant.");
        assert_eq!(config.connector.history_policy, HistoryPolicy::StrippedQuery);
        assert_eq!(config.chunking.max_tokens, 700);
        assert_eq!(config.retrieval.top_k, 4);
        assert_eq!(config.retrieval.response_mode, ResponseMode::Synthesize);
        assert!(!config.embedding.is_enabled());
        assert_eq!(config.chat.base_url, "https://api.openai.com/v1");
        assert_eq!(config.loader.index_concurrency, 4);
    }

    #[test]
    fn sections_override_defaults() {
        let config = parse_config(
            r#"
[connector]
system_prompt = "Be terse."
history_policy = "verbatim-echo"

[retrieval]
top_k = 2
response_mode = "compact"

[embedding]
provider = "openai"
model = "text-embedding-3-small"
dims = 1536
"#,
        )
        .unwrap();
        assert_eq!(config.connector.system_prompt, "Be terse.");
        assert_eq!(config.connector.history_policy, HistoryPolicy::VerbatimEcho);
        assert_eq!(config.retrieval.top_k, 2);
        assert_eq!(config.retrieval.response_mode, ResponseMode::Compact);
        assert!(config.embedding.is_enabled());
    }

    #[test]
    fn rejects_zero_max_tokens() {
        let err = parse_config("[chunking]\nmax_tokens = 0\n").unwrap_err();
        assert!(err.to_string().contains("max_tokens"));
    }

    #[test]
    fn rejects_zero_index_concurrency() {
        let err = parse_config("[loader]\nindex_concurrency = 0\n").unwrap_err();
        assert!(err.to_string().contains("index_concurrency"));
    }

    #[test]
    fn rejects_enabled_embedding_without_dims() {
        let err = parse_config("[embedding]\nprovider = \"openai\"\nmodel = \"m\"\n").unwrap_err();
        assert!(err.to_string().contains("dims"));
    }

    #[test]
    fn rejects_unknown_provider() {
        let err =
            parse_config("[embedding]\nprovider = \"magic\"\nmodel = \"m\"\ndims = 3\n").unwrap_err();
        assert!(err.to_string().contains("Unknown embedding provider"));
    }
}
