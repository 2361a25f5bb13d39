//! Per-request configuration, decoded from the URL path token
//!
//! Clients encode the gateway's behavior for a request inside the path:
//! either a URL-encoded JSON document or `!ENV_VAR` naming an environment
//! variable that holds the JSON. The decoded record is immutable for the
//! rest of the request.

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;

use crate::transform::FromSpec;

/// Keyword-filter tier settings
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct BasicModeration {
    pub enabled: bool,
    pub keywords_file: String,
    /// Embedded in the block reason and used as the envelope code
    pub error_code: String,
}

impl Default for BasicModeration {
    fn default() -> Self {
        Self {
            enabled: false,
            keywords_file: "configs/keywords.txt".to_string(),
            error_code: "BASIC_MODERATION_BLOCKED".to_string(),
        }
    }
}

/// Classifier tier settings
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct SmartModeration {
    pub enabled: bool,
    /// Profile name; selects the model and sample database paths
    pub profile: String,
}

impl Default for SmartModeration {
    fn default() -> Self {
        Self {
            enabled: false,
            profile: "default".to_string(),
        }
    }
}

/// Streaming override: follow the body's `stream` field or force a value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamMode {
    #[default]
    Auto,
    Fixed(bool),
}

impl StreamMode {
    /// Resolve against the request body's own stream flag
    pub fn resolve(&self, body_stream: bool) -> bool {
        match self {
            StreamMode::Auto => body_stream,
            StreamMode::Fixed(value) => *value,
        }
    }
}

impl<'de> Deserialize<'de> for StreamMode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        match value {
            Value::Bool(b) => Ok(StreamMode::Fixed(b)),
            Value::String(s) if s == "auto" => Ok(StreamMode::Auto),
            other => Err(serde::de::Error::custom(format!(
                "stream must be \"auto\" or a boolean, got {}",
                other
            ))),
        }
    }
}

/// Format translation settings
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FormatTransform {
    pub enabled: bool,
    /// `"auto"`, one dialect name, or a list of candidates
    pub from: FromSpec,
    /// Target dialect; absent means re-emit in the detected dialect
    pub to: Option<String>,
    pub stream: StreamMode,
    /// Return an error when detection fails instead of passing through
    pub strict_parse: bool,
    /// Reject requests carrying tool content
    pub disable_tools: bool,
}

/// The full per-request configuration record
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RequestConfig {
    pub basic_moderation: BasicModeration,
    pub smart_moderation: SmartModeration,
    pub format_transform: FormatTransform,
}

impl RequestConfig {
    pub fn moderation_enabled(&self) -> bool {
        self.basic_moderation.enabled || self.smart_moderation.enabled
    }
}

/// Decode a config token from the path: `!NAME` loads JSON from the
/// environment, anything else is URL-encoded JSON.
pub fn decode_config_token(token: &str) -> Result<RequestConfig> {
    let raw = if let Some(env_name) = token.strip_prefix('!') {
        std::env::var(env_name)
            .with_context(|| format!("config environment variable {} is not set", env_name))?
    } else {
        urlencoding::decode(token)
            .context("config token is not valid percent-encoded UTF-8")?
            .into_owned()
    };

    serde_json::from_str(&raw).context("config token is not a valid configuration document")
}
