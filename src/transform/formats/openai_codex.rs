//! OpenAI prompt-style completions dialect
//!
//! The legacy `{model, prompt, ...}` completion shape. It models no tools
//! and no structured messages: the prompt becomes a single user message and
//! the completion text a single assistant text block. Everything else rides
//! in `extra`.

use anyhow::Result;
use axum::http::HeaderMap;
use serde_json::{json, Map, Value};

use super::{extra_without, str_field};
use crate::transform::neutral::{ChatRequest, ChatResponse, ContentBlock, Message, Role};
use crate::transform::FormatAdapter;

const MODELED_REQUEST_FIELDS: &[&str] = &["model", "prompt", "stream"];
const MODELED_RESPONSE_FIELDS: &[&str] = &["id", "model", "choices", "usage"];

pub struct OpenAiCodexAdapter;

impl FormatAdapter for OpenAiCodexAdapter {
    fn name(&self) -> &'static str {
        "openai_codex"
    }

    fn excluded_when_tools_disabled(&self) -> bool {
        true
    }

    fn can_parse(&self, path: &str, _headers: &HeaderMap, body: &Map<String, Value>) -> bool {
        if path.contains("/chat/") {
            return false;
        }
        body.contains_key("prompt") && !body.contains_key("messages")
    }

    fn request_to_neutral(&self, body: &Map<String, Value>) -> Result<ChatRequest> {
        let prompt = match body.get("prompt") {
            Some(Value::String(s)) => s.clone(),
            // Batched prompts collapse into one user message
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join("\n"),
            _ => String::new(),
        };

        Ok(ChatRequest {
            messages: vec![Message::text(Role::User, prompt)],
            model: str_field(body, "model"),
            stream: body.get("stream").and_then(Value::as_bool).unwrap_or(false),
            tools: Vec::new(),
            tool_choice: None,
            extra: extra_without(body, MODELED_REQUEST_FIELDS),
        })
    }

    fn neutral_to_request(&self, req: &ChatRequest) -> Result<Map<String, Value>> {
        let prompt: Vec<&str> = req
            .messages
            .iter()
            .filter(|m| matches!(m.role, Role::User | Role::System))
            .flat_map(|m| m.text_parts())
            .collect();

        let mut body = Map::new();
        body.insert("model".to_string(), json!(req.model));
        body.insert("prompt".to_string(), json!(prompt.join("\n")));
        body.insert("stream".to_string(), json!(req.stream));
        body.extend(req.extra.clone());
        Ok(body)
    }

    fn response_to_neutral(&self, body: &Map<String, Value>) -> Result<ChatResponse> {
        let choice = body
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|c| c.first())
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        let text = str_field(&choice, "text");

        Ok(ChatResponse {
            id: str_field(body, "id"),
            model: str_field(body, "model"),
            messages: vec![Message::new(
                Role::Assistant,
                vec![ContentBlock::text(text)],
            )],
            finish_reason: choice
                .get("finish_reason")
                .and_then(Value::as_str)
                .map(String::from),
            usage: body.get("usage").cloned(),
            extra: extra_without(body, MODELED_RESPONSE_FIELDS),
        })
    }

    fn neutral_to_response(&self, resp: &ChatResponse) -> Result<Map<String, Value>> {
        let last = resp.last_message();
        let text = last.text_parts().join("\n");

        let mut body = Map::new();
        body.insert("id".to_string(), json!(resp.id));
        body.insert("object".to_string(), json!("text_completion"));
        body.insert("model".to_string(), json!(resp.model));
        body.insert(
            "choices".to_string(),
            json!([{
                "index": 0,
                "text": text,
                "finish_reason": resp.finish_reason,
            }]),
        );
        if let Some(usage) = &resp.usage {
            body.insert("usage".to_string(), usage.clone());
        }
        body.extend(resp.extra.clone());
        Ok(body)
    }
}
