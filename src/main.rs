//! # doclink CLI
//!
//! Runs prompt batches through the connector and inspects how prompts are
//! interpreted. Logs go to stderr; stdout carries only JSON.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `doclink run --model <id> --prompt <text>...` | Run a batch and print the connector response |
//! | `doclink refs <text>` | Show the references found in a prompt and its stripped text |
//! | `doclink describe` | Print the connector declaration |
//!
//! ## Examples
//!
//! ```bash
//! # Two prompts sharing one conversation
//! doclink run --model gpt-4o \
//!     --prompt "summarize /srv/reports/q3.pdf" \
//!     --prompt "how does that compare to last year?" \
//!     --property temperature=0.2 --setting API_KEY=sk-...
//!
//! # Prompts from a file, one per line, with a config file
//! doclink --config ./doclink.toml run --model gpt-4o --prompts-file prompts.txt --pretty
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use doclink::config;
use doclink::conversation::HistoryPolicy;
use doclink::properties::ConnectorDeclaration;
use doclink::references::{extract_references, strip_references};

#[derive(Parser)]
#[command(
    name = "doclink",
    about = "Answer prompts with retrieval over the documents they reference",
    version
)]
struct Cli {
    /// Path to a TOML configuration file. Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a batch of prompts and print the connector response as JSON.
    Run {
        /// Chat model identifier (e.g. `gpt-4o`).
        #[arg(long)]
        model: String,

        /// A prompt. Repeat for a batch; prompts run in the given order.
        #[arg(long = "prompt")]
        prompts: Vec<String>,

        /// File with one prompt per non-empty line, run after any `--prompt`.
        #[arg(long)]
        prompts_file: Option<PathBuf>,

        /// Connector property as `key=value`; value parsed as JSON when possible.
        #[arg(long = "property", value_name = "KEY=VALUE")]
        properties: Vec<String>,

        /// Connector setting as `key=value` (e.g. `API_KEY=sk-...`).
        #[arg(long = "setting", value_name = "KEY=VALUE")]
        settings: Vec<String>,

        /// How resolved documents enter the history (overrides config).
        #[arg(long)]
        policy: Option<HistoryPolicy>,

        /// Pretty-print the JSON output.
        #[arg(long)]
        pretty: bool,
    },

    /// Print the references found in `text` and the text with them removed.
    Refs {
        text: String,
    },

    /// Print the connector declaration: models, properties, and settings.
    Describe,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match std::env::var("RUST_LOG") {
        Ok(_) => EnvFilter::from_default_env(),
        Err(_) => match cli.verbose {
            0 => EnvFilter::new("warn"),
            1 => EnvFilter::new("info"),
            2 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        },
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Describe => {
            print_json(&ConnectorDeclaration::describe(), true)?;
        }
        Commands::Refs { text } => {
            let output = serde_json::json!({
                "references": extract_references(&text),
                "stripped": strip_references(&text),
            });
            print_json(&output, true)?;
        }
        Commands::Run {
            model,
            mut prompts,
            prompts_file,
            properties,
            settings,
            policy,
            pretty,
        } => {
            let mut cfg = config::load_or_default(cli.config.as_ref())?;
            if let Some(policy) = policy {
                cfg.connector.history_policy = policy;
            }

            if let Some(path) = prompts_file {
                let content = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read prompts file: {}", path.display()))?;
                prompts.extend(
                    content
                        .lines()
                        .map(str::trim)
                        .filter(|l| !l.is_empty())
                        .map(str::to_string),
                );
            }
            if prompts.is_empty() {
                bail!("No prompts given. Use --prompt or --prompts-file.");
            }

            let properties = parse_pairs(&properties)?;
            let settings = parse_pairs(&settings)?;
            let response =
                doclink::run_connector(&cfg, &model, &prompts, &properties, &settings).await?;
            print_json(&response, pretty)?;
        }
    }

    Ok(())
}

/// Parse `key=value` pairs; values that are valid JSON keep their type.
fn parse_pairs(pairs: &[String]) -> Result<Map<String, Value>> {
    let mut map = Map::new();
    for pair in pairs {
        let (key, raw) = pair
            .split_once('=')
            .with_context(|| format!("Expected KEY=VALUE, got '{}'", pair))?;
        if key.is_empty() {
            bail!("Empty key in '{}'", pair);
        }
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        map.insert(key.to_string(), value);
    }
    Ok(map)
}

fn print_json<T: serde::Serialize>(value: &T, pretty: bool) -> Result<()> {
    let out = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{}", out);
    Ok(())
}
