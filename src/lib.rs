//! # doclink
//!
//! A retrieval-augmented chat connector. Prompts may mention documents
//! inline, as URLs or filesystem paths; each mentioned document is loaded,
//! indexed, and queried, and the answers are spliced into a conversation
//! that is then sent to a chat model, one completion per prompt.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌───────────┐   ┌──────────────┐   ┌────────────┐
//! │ references │──▶│  loader   │──▶│ conversation │──▶│    chat    │
//! │ URL / path │   │ formats + │   │   history    │   │ completion │
//! └────────────┘   │   index   │   └──────────────┘   └─────┬──────┘
//!                  └───────────┘                            ▼
//!                                                     ┌────────────┐
//!                                                     │  response  │
//!                                                     └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! doclink describe
//! doclink refs "summarize /tmp/report.pdf and https://example.com/a.html"
//! doclink run --model gpt-4o --prompt "what changed in /srv/docs/CHANGELOG.md?" \
//!     --setting API_KEY=sk-...
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`references`] | Find and strip URL/path references in prompt text |
//! | [`formats`] | Per-extension text extraction |
//! | [`loader`] | Resolve a reference to one or more indexed documents |
//! | [`chunk`] | Paragraph chunking for the default index |
//! | [`embedding`] | Embedding providers |
//! | [`index`] | Index contracts and the default in-process index |
//! | [`chat`] | Chat model contract and OpenAI-compatible client |
//! | [`conversation`] | Message history and context assembly |
//! | [`runner`] | Per-prompt batch execution |
//! | [`response`] | Connector response shape |
//! | [`properties`] | Connector declaration and property parsing |
//! | [`config`] | TOML configuration |
//! | [`error`] | Error types |

pub mod chat;
pub mod chunk;
pub mod config;
pub mod conversation;
pub mod embedding;
pub mod error;
pub mod formats;
pub mod index;
pub mod loader;
pub mod properties;
pub mod references;
pub mod response;
pub mod runner;

pub use error::{ConnectorError, ModelCallError};
pub use response::ConnectorResponse;
pub use runner::run_connector;
