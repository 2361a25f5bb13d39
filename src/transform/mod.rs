//! Format translation - dialect detection and neutral-model dispatch
//!
//! The gateway understands several vendor chat dialects. Each one implements
//! [`FormatAdapter`]; this module owns the detection order and the resolution
//! of the `format_transform.from` spec into a candidate set.
//!
//! ```text
//! Client request (dialect A)
//!     ↓
//! detect() over the candidate set  →  adapter A
//!     ↓
//! adapter_A.request_to_neutral()   →  ChatRequest
//!     ↓ (moderation reads the neutral text)
//! adapter_B.neutral_to_request()   →  upstream body (dialect B)
//! ```

pub mod formats;
pub mod neutral;

use anyhow::Result;
use axum::http::HeaderMap;
use serde::Deserialize;
use serde_json::{Map, Value};

use neutral::{ChatRequest, ChatResponse};

/// The five-function quintuple every dialect implements.
///
/// Adapters are stateless; `can_parse` must positively assert on
/// dialect-specific signals and negatively exclude known conflicts, because
/// detection returns the first positive adapter in order.
pub trait FormatAdapter: Send + Sync {
    /// Dialect name as used in `format_transform.from` / `.to`
    fn name(&self) -> &'static str;

    /// Whether `disable_tools` removes this dialect from the candidate set
    fn excluded_when_tools_disabled(&self) -> bool {
        false
    }

    fn can_parse(&self, path: &str, headers: &HeaderMap, body: &Map<String, Value>) -> bool;

    fn request_to_neutral(&self, body: &Map<String, Value>) -> Result<ChatRequest>;

    fn neutral_to_request(&self, req: &ChatRequest) -> Result<Map<String, Value>>;

    fn response_to_neutral(&self, body: &Map<String, Value>) -> Result<ChatResponse>;

    fn neutral_to_response(&self, resp: &ChatResponse) -> Result<Map<String, Value>>;
}

/// Detection order, most specific dialect first. Earlier adapters win ties.
static DETECTION_ORDER: [&dyn FormatAdapter; 5] = [
    &formats::claude_code::ClaudeCodeAdapter,
    &formats::claude_chat::ClaudeChatAdapter,
    &formats::openai_chat::OpenAiChatAdapter,
    &formats::gemini_chat::GeminiChatAdapter,
    &formats::openai_codex::OpenAiCodexAdapter,
];

/// All registered adapters in detection order
pub fn adapters() -> &'static [&'static dyn FormatAdapter] {
    &DETECTION_ORDER
}

/// Look up an adapter by its dialect name
pub fn adapter_by_name(name: &str) -> Option<&'static dyn FormatAdapter> {
    DETECTION_ORDER.iter().copied().find(|a| a.name() == name)
}

/// Run detection over a candidate set, returning the first adapter that
/// recognizes the request.
pub fn detect(
    candidates: &[&'static dyn FormatAdapter],
    path: &str,
    headers: &HeaderMap,
    body: &Map<String, Value>,
) -> Option<&'static dyn FormatAdapter> {
    candidates
        .iter()
        .copied()
        .find(|a| a.can_parse(path, headers, body))
}

/// The `format_transform.from` value: `"auto"`, one dialect name, or a list
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum FromSpec {
    One(String),
    Many(Vec<String>),
}

impl Default for FromSpec {
    fn default() -> Self {
        FromSpec::One("auto".to_string())
    }
}

impl FromSpec {
    /// Resolve the candidate set in detection order. `disable_tools` drops
    /// the dialects that exist only to carry tools.
    pub fn candidates(&self, disable_tools: bool) -> Vec<&'static dyn FormatAdapter> {
        let allowed: Box<dyn Fn(&str) -> bool> = match self {
            FromSpec::One(name) if name == "auto" => Box::new(|_| true),
            FromSpec::One(name) => {
                let name = name.clone();
                Box::new(move |n| n == name)
            }
            FromSpec::Many(names) => {
                let names = names.clone();
                Box::new(move |n| names.iter().any(|x| x == n))
            }
        };

        DETECTION_ORDER
            .iter()
            .copied()
            .filter(|a| allowed(a.name()))
            .filter(|a| !(disable_tools && a.excluded_when_tools_disabled()))
            .collect()
    }
}
