//! Per-dialect format adapters
//!
//! Each adapter implements the five-function quintuple over its dialect:
//! recognize (`can_parse`), request to/from neutral, response to/from
//! neutral. Adapters are stateless; the dispatcher in [`crate::transform`]
//! owns ordering and candidate filtering.

pub mod claude_chat;
pub mod claude_code;
pub mod gemini_chat;
pub mod openai_chat;
pub mod openai_codex;

use serde_json::{Map, Value};

/// Copy every body field not named in `modeled` into an `extra` map.
///
/// This is what makes round-trips lossless: sampling parameters, penalties,
/// vendor extensions and anything else outside the neutral model ride along
/// untouched.
pub(crate) fn extra_without(body: &Map<String, Value>, modeled: &[&str]) -> Map<String, Value> {
    body.iter()
        .filter(|(k, _)| !modeled.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Render a tool result output for dialects that want a plain string:
/// strings pass through, structured values are serialized as JSON.
pub(crate) fn output_to_string(output: &Value) -> String {
    match output {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Parse a dialect `arguments` value into an argument object. OpenAI ships
/// arguments as a JSON-encoded string; a parse failure yields `{}`.
pub(crate) fn parse_arguments(raw: Option<&Value>) -> Value {
    match raw {
        Some(Value::String(s)) => serde_json::from_str(s).unwrap_or_else(|_| Value::Object(Map::new())),
        Some(Value::Object(o)) => Value::Object(o.clone()),
        _ => Value::Object(Map::new()),
    }
}

/// Fetch a string field, defaulting to empty
pub(crate) fn str_field(obj: &Map<String, Value>, key: &str) -> String {
    obj.get(key).and_then(Value::as_str).unwrap_or("").to_string()
}
