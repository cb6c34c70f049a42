//! Reference resolution: turn a [`DocumentReference`] into indexed documents.
//!
//! A reference that names an existing directory is walked recursively and
//! every file becomes its own [`LoadedDocument`] with its own index. Any
//! other reference (file path or URL) is read, run through its
//! [`DocumentFormat`], and indexed as one [`LoadedDocument`].

use anyhow::Result;
use futures::stream::{self, StreamExt};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::LoaderConfig;
use crate::error::ConnectorError;
use crate::formats::{DocumentFormat, RawDocument};
use crate::index::{IndexBuilder, QueryEngine};
use crate::references::{final_segment_extension, DocumentReference};

/// Extracted text plus the index built over it.
pub struct LoadedDocument {
    pub text: String,
    pub source: String,
    pub index: Box<dyn QueryEngine>,
}

impl LoadedDocument {
    pub fn new(
        text: impl Into<String>,
        source: impl Into<String>,
        index: Box<dyn QueryEngine>,
    ) -> Self {
        Self {
            text: text.into(),
            source: source.into(),
            index,
        }
    }
}

impl std::fmt::Debug for LoadedDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedDocument")
            .field("source", &self.source)
            .field("text_len", &self.text.len())
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub enum Loaded {
    Single(LoadedDocument),
    /// One entry per directory document, in walk order.
    Many(Vec<LoadedDocument>),
}

impl Loaded {
    pub fn into_documents(self) -> Vec<LoadedDocument> {
        match self {
            Loaded::Single(doc) => vec![doc],
            Loaded::Many(docs) => docs,
        }
    }
}

pub struct DocumentLoader {
    builder: Arc<dyn IndexBuilder>,
    excludes: GlobSet,
    follow_symlinks: bool,
    max_file_bytes: u64,
    index_concurrency: usize,
    http: reqwest::Client,
}

impl DocumentLoader {
    pub fn new(config: &LoaderConfig, builder: Arc<dyn IndexBuilder>) -> Result<Self> {
        let mut excludes = vec![
            "**/.git/**".to_string(),
            "**/target/**".to_string(),
            "**/node_modules/**".to_string(),
        ];
        excludes.extend(config.exclude_globs.clone());

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.fetch_timeout_secs))
            .build()?;

        Ok(Self {
            builder,
            excludes: build_globset(&excludes)?,
            follow_symlinks: config.follow_symlinks,
            max_file_bytes: config.max_file_bytes,
            index_concurrency: config.index_concurrency.max(1),
            http,
        })
    }

    pub async fn load(&self, reference: &DocumentReference) -> Result<Loaded, ConnectorError> {
        if self.is_directory(reference).await {
            self.load_directory(reference).await
        } else {
            self.load_single(reference).await.map(Loaded::Single)
        }
    }

    async fn is_directory(&self, reference: &DocumentReference) -> bool {
        if reference.is_url() {
            return false;
        }
        match tokio::fs::metadata(&reference.text).await {
            Ok(meta) => meta.is_dir(),
            Err(e) => {
                debug!(reference = %reference.text, error = %e, "stat failed");
                false
            }
        }
    }

    async fn load_single(&self, reference: &DocumentReference) -> Result<LoadedDocument, ConnectorError> {
        let raw = if reference.is_url() {
            self.fetch_url(&reference.text).await
        } else {
            let format = DocumentFormat::from_path(&reference.text);
            self.read_file(Path::new(&reference.text))
                .await
                .and_then(|bytes| {
                    format
                        .load_documents(&bytes, &reference.text)
                        .map_err(|e| e.to_string())
                })
        };
        let raw = raw.map_err(|reason| ConnectorError::reference(&reference.text, reason))?;

        let index = self.builder.build(&raw).await?;
        Ok(LoadedDocument::new(joined_text(&raw), &reference.text, index))
    }

    async fn load_directory(&self, reference: &DocumentReference) -> Result<Loaded, ConnectorError> {
        let root = PathBuf::from(&reference.text);
        let files = self.walk(&root);

        let mut documents: Vec<RawDocument> = Vec::new();
        for path in files {
            let source = path.display().to_string();
            let format = DocumentFormat::from_path(&source);
            match self.read_file(&path).await.and_then(|bytes| {
                format
                    .load_documents(&bytes, &source)
                    .map_err(|e| e.to_string())
            }) {
                Ok(docs) => documents.extend(docs),
                Err(reason) => warn!(file = %source, %reason, "skipping file"),
            }
        }

        if documents.is_empty() {
            return Err(ConnectorError::reference(
                &reference.text,
                "directory contains no loadable documents",
            ));
        }

        let indexes: Vec<_> = stream::iter(
            documents
                .iter()
                .map(|doc| self.builder.build(std::slice::from_ref(doc))),
        )
        .buffered(self.index_concurrency)
        .collect()
        .await;

        let mut loaded = Vec::with_capacity(documents.len());
        for (doc, index) in documents.into_iter().zip(indexes) {
            match index {
                Ok(index) => loaded.push(LoadedDocument::new(doc.text, doc.source, index)),
                Err(e) => warn!(source = %doc.source, error = %e, "skipping document"),
            }
        }
        debug!(reference = %reference.text, documents = loaded.len(), "loaded directory");
        Ok(Loaded::Many(loaded))
    }

    /// Files under `root`, sorted by name at each level, excludes applied.
    /// Entries the walker cannot read are skipped.
    fn walk(&self, root: &Path) -> Vec<PathBuf> {
        let mut files = Vec::new();
        let walker = WalkDir::new(root)
            .follow_links(self.follow_symlinks)
            .sort_by_file_name();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(root = %root.display(), error = %e, "skipping directory entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let relative = path.strip_prefix(root).unwrap_or(path);
            if self.excludes.is_match(relative) {
                continue;
            }
            files.push(path.to_path_buf());
        }
        files
    }

    async fn read_file(&self, path: &Path) -> Result<Vec<u8>, String> {
        let meta = tokio::fs::metadata(path).await.map_err(|e| e.to_string())?;
        if meta.len() > self.max_file_bytes {
            return Err(format!(
                "file is {} bytes, limit is {}",
                meta.len(),
                self.max_file_bytes
            ));
        }
        tokio::fs::read(path).await.map_err(|e| e.to_string())
    }

    async fn fetch_url(&self, url: &str) -> Result<Vec<RawDocument>, String> {
        let response = self.http.get(url).send().await.map_err(|e| e.to_string())?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!("HTTP {}", status));
        }
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        if let Some(len) = response.content_length() {
            if len > self.max_file_bytes {
                return Err(format!("response is {} bytes, limit is {}", len, self.max_file_bytes));
            }
        }
        let bytes = response.bytes().await.map_err(|e| e.to_string())?;
        if bytes.len() as u64 > self.max_file_bytes {
            return Err(format!(
                "response is {} bytes, limit is {}",
                bytes.len(),
                self.max_file_bytes
            ));
        }

        let path_extension = url::Url::parse(url)
            .ok()
            .and_then(|u| final_segment_extension(u.path()));
        let format = DocumentFormat::for_url(path_extension.as_deref(), content_type.as_deref());
        debug!(url, format = format.name(), "fetched");
        format.load_documents(&bytes, url).map_err(|e| e.to_string())
    }
}

fn joined_text(documents: &[RawDocument]) -> String {
    documents
        .iter()
        .map(|d| d.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
