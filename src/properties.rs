//! Connector declaration and per-call property parsing.
//!
//! The declaration advertises the supported models and the tunable
//! properties a host tool can present to its user. At call time the host
//! passes back a `properties` map (system prompt override plus sampling
//! options) and a `settings` map (credentials); [`parse_properties`] and
//! [`api_key`] turn those into typed values.

use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::chat::ChatOptions;
use crate::error::ConnectorError;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

pub const CONNECTOR_NAME: &str = "Llamaindex Connector";

pub const SUPPORTED_MODELS: &[&str] = &[
    "gpt-4o",
    "gpt-4o-2024-05-13",
    "gpt-4-turbo",
    "gpt-4-turbo-2024-04-09",
    "gpt-4-0125-preview",
    "gpt-4-turbo-preview",
    "gpt-4-vision-preview",
    "gpt-4-1106-vision-preview",
    "gpt-4-1106-preview",
    "gpt-4",
    "gpt-4-32k",
    "gpt-3.5-turbo-0125",
    "gpt-3.5-turbo-1106",
    "gpt-3.5-turbo",
    "gpt-3.5-turbo-instruct",
    "gpt-3.5-turbo-16k",
    "gpt-3.5-turbo-0613",
    "gpt-3.5-turbo-16k-0613",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyType {
    String,
    Number,
    Boolean,
    Array,
}

#[derive(Debug, Clone, Serialize)]
pub struct PropertyDescriptor {
    pub id: &'static str,
    pub name: &'static str,
    pub value: Value,
    #[serde(rename = "type")]
    pub kind: PropertyType,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectorDeclaration {
    pub connector_name: &'static str,
    pub models: Vec<&'static str>,
    pub description: &'static str,
    pub author: &'static str,
    pub properties: Vec<PropertyDescriptor>,
    pub settings: Vec<PropertyDescriptor>,
}

impl ConnectorDeclaration {
    pub fn describe() -> Self {
        let prop = |id, name, value, kind| PropertyDescriptor {
            id,
            name,
            value,
            kind,
        };

        Self {
            connector_name: CONNECTOR_NAME,
            models: SUPPORTED_MODELS.to_vec(),
            description: "Works with documents referenced in prompts by indexing them and \
                          answering from the retrieved context.",
            author: "Prompt Mixer",
            properties: vec![
                prop("prompt", "System Prompt", json!(DEFAULT_SYSTEM_PROMPT), PropertyType::String),
                prop("max_tokens", "Max Tokens", json!(4096), PropertyType::Number),
                prop("temperature", "Temperature", json!(0.7), PropertyType::Number),
                prop("top_p", "Top P", json!(1), PropertyType::Number),
                prop("frequency_penalty", "Frequency Penalty", json!(0.5), PropertyType::Number),
                prop("presence_penalty", "Presence Penalty", json!(0.5), PropertyType::Number),
                prop("stop", "Stop Sequences", json!(["\n"]), PropertyType::Array),
                prop("echo", "Echo", json!(false), PropertyType::Boolean),
                prop("best_of", "Best Of", json!(1), PropertyType::Number),
                prop("logprobs", "LogProbs", json!(false), PropertyType::Boolean),
            ],
            settings: vec![prop("API_KEY", "API Key", json!(""), PropertyType::String)],
        }
    }

    pub fn supports_model(&self, model: &str) -> bool {
        self.models.contains(&model)
    }
}

/// Split `properties` into the system prompt override and chat options.
///
/// Recognized keys must carry the declared JSON type; anything else is
/// forwarded untouched in [`ChatOptions::extra`]. A `null` value counts as
/// unset, as does an empty `prompt`.
pub fn parse_properties(
    properties: &Map<String, Value>,
) -> Result<(Option<String>, ChatOptions), ConnectorError> {
    let mut system_prompt = None;
    let mut options = ChatOptions::default();

    for (key, value) in properties {
        if value.is_null() {
            continue;
        }
        match key.as_str() {
            "prompt" => system_prompt = Some(as_string(key, value)?).filter(|p| !p.is_empty()),
            "max_tokens" => options.max_tokens = Some(as_count(key, value)?),
            "temperature" => options.temperature = Some(as_number(key, value)?),
            "top_p" => options.top_p = Some(as_number(key, value)?),
            "frequency_penalty" => options.frequency_penalty = Some(as_number(key, value)?),
            "presence_penalty" => options.presence_penalty = Some(as_number(key, value)?),
            "stop" => options.stop = Some(as_string_list(key, value)?),
            "echo" => options.echo = Some(as_bool(key, value)?),
            "best_of" => options.best_of = Some(as_count(key, value)?),
            "logprobs" => options.logprobs = Some(as_bool(key, value)?),
            _ => {
                options.extra.insert(key.clone(), value.clone());
            }
        }
    }

    Ok((system_prompt, options))
}

/// The `API_KEY` setting, if present and non-empty.
pub fn api_key(settings: &Map<String, Value>) -> Result<Option<String>, ConnectorError> {
    match settings.get("API_KEY") {
        None | Some(Value::Null) => Ok(None),
        Some(value) => {
            let key = as_string("API_KEY", value)?;
            Ok(Some(key).filter(|k| !k.is_empty()))
        }
    }
}

fn invalid(key: &str, expected: &str, value: &Value) -> ConnectorError {
    ConnectorError::InvalidInput(format!("property '{}' must be {}, got {}", key, expected, value))
}

fn as_string(key: &str, value: &Value) -> Result<String, ConnectorError> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| invalid(key, "a string", value))
}

fn as_number(key: &str, value: &Value) -> Result<f64, ConnectorError> {
    value.as_f64().ok_or_else(|| invalid(key, "a number", value))
}

fn as_count(key: &str, value: &Value) -> Result<u64, ConnectorError> {
    if let Some(n) = value.as_u64() {
        return Ok(n);
    }
    // Hosts often send whole numbers as floats (4096.0).
    match value.as_f64() {
        Some(f) if f >= 0.0 && f.fract() == 0.0 => Ok(f as u64),
        _ => Err(invalid(key, "a non-negative integer", value)),
    }
}

fn as_bool(key: &str, value: &Value) -> Result<bool, ConnectorError> {
    value.as_bool().ok_or_else(|| invalid(key, "a boolean", value))
}

fn as_string_list(key: &str, value: &Value) -> Result<Vec<String>, ConnectorError> {
    match value {
        Value::String(s) => Ok(vec![s.clone()]),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| invalid(key, "an array of strings", value))
            })
            .collect(),
        _ => Err(invalid(key, "an array of strings", value)),
    }
}
