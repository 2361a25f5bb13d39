//! Claude Messages dialect
//!
//! # Mapping
//!
//! | Claude                          | Neutral                           |
//! |---------------------------------|-----------------------------------|
//! | top-level `system` (str/blocks) | one `system` message              |
//! | `content[].type: "text"`        | `text` block                      |
//! | `content[].type: "tool_use"`    | `tool_call` block                 |
//! | `content[].type: "tool_result"` | `tool_result` block               |
//! | `tools[]`                       | `ToolDef` (same field names)      |
//!
//! On the way out, neutral `system` messages merge into the top-level
//! `system` field (newline-joined), and a structured tool-result output is
//! wrapped as a single-element `[{type:"text", text:<json>}]` content array.
//!
//! A `prompt`-shaped body without `messages` is the Agent-SDK variant and is
//! delegated to the Claude Code adapter's conversion.

use anyhow::Result;
use axum::http::HeaderMap;
use serde_json::{json, Map, Value};

use super::{claude_code, extra_without, str_field};
use crate::transform::neutral::{ChatRequest, ChatResponse, ContentBlock, Message, Role, ToolDef};
use crate::transform::FormatAdapter;

const MODELED_REQUEST_FIELDS: &[&str] =
    &["system", "messages", "model", "stream", "tools", "tool_choice"];
const MODELED_RESPONSE_FIELDS: &[&str] = &["id", "model", "content", "stop_reason", "usage"];

pub struct ClaudeChatAdapter;

impl FormatAdapter for ClaudeChatAdapter {
    fn name(&self) -> &'static str {
        "claude_chat"
    }

    fn can_parse(&self, path: &str, headers: &HeaderMap, body: &Map<String, Value>) -> bool {
        // Gemini bodies carry contents[].parts
        if body
            .get("contents")
            .and_then(Value::as_array)
            .and_then(|c| c.first())
            .and_then(Value::as_object)
            .map_or(false, |first| first.contains_key("parts"))
        {
            return false;
        }

        // Dialect-unique path markers of other formats win over the generic
        // messages shape, since this adapter runs early in the order
        if path.contains("/chat/completions") || path.contains("generateContent") {
            return false;
        }

        // role="tool" messages and image_url parts are OpenAI markers
        if let Some(messages) = body.get("messages").and_then(Value::as_array) {
            for msg in messages.iter().filter_map(Value::as_object) {
                if msg.get("role").and_then(Value::as_str) == Some("tool") {
                    return false;
                }
                if let Some(parts) = msg.get("content").and_then(Value::as_array) {
                    if parts
                        .iter()
                        .filter_map(Value::as_object)
                        .any(|p| p.get("type").and_then(Value::as_str) == Some("image_url"))
                    {
                        return false;
                    }
                }
            }
        }

        if path.contains("/messages")
            || headers.contains_key("anthropic-version")
            || body.contains_key("anthropic_version")
        {
            return true;
        }

        if body.get("messages").map_or(false, Value::is_array) {
            return true;
        }

        // Agent-SDK shape, handled by delegation
        body.get("prompt").map_or(false, Value::is_string)
    }

    fn request_to_neutral(&self, body: &Map<String, Value>) -> Result<ChatRequest> {
        if body.contains_key("prompt") && !body.contains_key("messages") {
            return claude_code::ClaudeCodeAdapter.request_to_neutral(body);
        }

        let mut tools = Vec::new();
        if let Some(defs) = body.get("tools").and_then(Value::as_array) {
            for def in defs.iter().filter_map(Value::as_object) {
                tools.push(ToolDef {
                    name: str_field(def, "name"),
                    description: def
                        .get("description")
                        .and_then(Value::as_str)
                        .map(String::from),
                    input_schema: def
                        .get("input_schema")
                        .cloned()
                        .unwrap_or_else(|| json!({})),
                });
            }
        }

        let mut messages = Vec::new();
        if let Some(system_text) = system_text(body.get("system")) {
            if !system_text.is_empty() {
                messages.push(Message::text(Role::System, system_text));
            }
        }

        let empty = Vec::new();
        let raw_messages = body
            .get("messages")
            .and_then(Value::as_array)
            .unwrap_or(&empty);
        for msg in raw_messages.iter().filter_map(Value::as_object) {
            let mut blocks = Vec::new();

            match msg.get("content") {
                Some(Value::String(s)) => blocks.push(ContentBlock::text(s.clone())),
                Some(Value::Array(parts)) => {
                    for part in parts.iter().filter_map(Value::as_object) {
                        match part.get("type").and_then(Value::as_str) {
                            Some("text") => blocks.push(ContentBlock::text(str_field(part, "text"))),
                            Some("tool_use") => blocks.push(ContentBlock::ToolCall {
                                id: str_field(part, "id"),
                                name: str_field(part, "name"),
                                arguments: part
                                    .get("input")
                                    .filter(|v| v.is_object())
                                    .cloned()
                                    .unwrap_or_else(|| json!({})),
                            }),
                            Some("tool_result") => blocks.push(ContentBlock::ToolResult {
                                call_id: str_field(part, "tool_use_id"),
                                name: None,
                                output: tool_result_output(part.get("content")),
                            }),
                            _ => {}
                        }
                    }
                }
                _ => {}
            }

            if blocks.is_empty() {
                blocks.push(ContentBlock::text(""));
            }

            let role = if msg.get("role").and_then(Value::as_str) == Some("user") {
                Role::User
            } else {
                Role::Assistant
            };
            messages.push(Message::new(role, blocks));
        }

        Ok(ChatRequest {
            messages,
            model: str_field(body, "model"),
            stream: body.get("stream").and_then(Value::as_bool).unwrap_or(false),
            tools,
            tool_choice: body.get("tool_choice").cloned(),
            extra: extra_without(body, MODELED_REQUEST_FIELDS),
        })
    }

    fn neutral_to_request(&self, req: &ChatRequest) -> Result<Map<String, Value>> {
        let mut body = Map::new();
        body.insert("model".to_string(), json!(req.model));
        body.insert("stream".to_string(), json!(req.stream));

        // All system messages merge into the top-level system field
        let system_texts: Vec<&str> = req
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .flat_map(|m| m.text_parts())
            .collect();
        if !system_texts.is_empty() {
            body.insert("system".to_string(), json!(system_texts.join("\n")));
        }

        let mut messages: Vec<Value> = Vec::new();
        for msg in req.messages.iter().filter(|m| m.role != Role::System) {
            let mut content: Vec<Value> = Vec::new();
            for block in &msg.content {
                match block {
                    ContentBlock::Text { text } if !text.is_empty() => {
                        content.push(json!({"type": "text", "text": text}));
                    }
                    ContentBlock::ToolCall { id, name, arguments } => {
                        content.push(json!({
                            "type": "tool_use",
                            "id": id,
                            "name": name,
                            "input": arguments,
                        }));
                    }
                    ContentBlock::ToolResult { call_id, output, .. } => {
                        let wrapped = match output {
                            Value::String(s) => json!([{"type": "text", "text": s}]),
                            other => json!([{"type": "text", "text": other.to_string()}]),
                        };
                        content.push(json!({
                            "type": "tool_result",
                            "tool_use_id": call_id,
                            "content": wrapped,
                        }));
                    }
                    _ => {}
                }
            }

            if content.is_empty() {
                continue;
            }
            let role = if msg.role == Role::User { "user" } else { "assistant" };
            messages.push(json!({"role": role, "content": content}));
        }
        body.insert("messages".to_string(), Value::Array(messages));

        if !req.tools.is_empty() {
            let tools: Vec<Value> = req
                .tools
                .iter()
                .map(|t| {
                    let mut def = Map::new();
                    def.insert("name".to_string(), json!(t.name));
                    if let Some(description) = &t.description {
                        def.insert("description".to_string(), json!(description));
                    }
                    def.insert("input_schema".to_string(), t.input_schema.clone());
                    Value::Object(def)
                })
                .collect();
            body.insert("tools".to_string(), Value::Array(tools));
        }
        if let Some(choice) = &req.tool_choice {
            body.insert("tool_choice".to_string(), choice.clone());
        }
        body.extend(req.extra.clone());

        Ok(body)
    }

    fn response_to_neutral(&self, body: &Map<String, Value>) -> Result<ChatResponse> {
        let mut blocks = Vec::new();
        if let Some(content) = body.get("content").and_then(Value::as_array) {
            for part in content.iter().filter_map(Value::as_object) {
                match part.get("type").and_then(Value::as_str) {
                    Some("text") => blocks.push(ContentBlock::text(str_field(part, "text"))),
                    Some("tool_use") => blocks.push(ContentBlock::ToolCall {
                        id: str_field(part, "id"),
                        name: str_field(part, "name"),
                        arguments: part.get("input").cloned().unwrap_or_else(|| json!({})),
                    }),
                    _ => {}
                }
            }
        }
        if blocks.is_empty() {
            blocks.push(ContentBlock::text(""));
        }

        Ok(ChatResponse {
            id: str_field(body, "id"),
            model: str_field(body, "model"),
            messages: vec![Message::new(Role::Assistant, blocks)],
            finish_reason: body
                .get("stop_reason")
                .and_then(Value::as_str)
                .map(String::from),
            usage: body.get("usage").cloned(),
            extra: extra_without(body, MODELED_RESPONSE_FIELDS),
        })
    }

    fn neutral_to_response(&self, resp: &ChatResponse) -> Result<Map<String, Value>> {
        let last = resp.last_message();

        let mut content: Vec<Value> = Vec::new();
        for block in &last.content {
            match block {
                ContentBlock::Text { text } if !text.is_empty() => {
                    content.push(json!({"type": "text", "text": text}));
                }
                ContentBlock::ToolCall { id, name, arguments } => {
                    content.push(json!({
                        "type": "tool_use",
                        "id": id,
                        "name": name,
                        "input": arguments,
                    }));
                }
                _ => {}
            }
        }
        if content.is_empty() {
            content.push(json!({"type": "text", "text": ""}));
        }

        let mut body = Map::new();
        body.insert("id".to_string(), json!(resp.id));
        body.insert("model".to_string(), json!(resp.model));
        body.insert("type".to_string(), json!("message"));
        body.insert("role".to_string(), json!("assistant"));
        body.insert("content".to_string(), Value::Array(content));
        body.insert("stop_reason".to_string(), json!(resp.finish_reason));
        if let Some(usage) = &resp.usage {
            body.insert("usage".to_string(), usage.clone());
        }
        body.extend(resp.extra.clone());

        Ok(body)
    }
}

/// Flatten a top-level `system` value (string or block list) into plain text
fn system_text(system: Option<&Value>) -> Option<String> {
    match system? {
        Value::String(s) => Some(s.clone()),
        Value::Array(blocks) => {
            let texts: Vec<&str> = blocks
                .iter()
                .filter_map(Value::as_object)
                .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|b| b.get("text").and_then(Value::as_str))
                .collect();
            Some(texts.join("\n"))
        }
        _ => None,
    }
}

/// A tool_result content value may be a string or a list of text blocks;
/// lists collapse to their newline-joined text.
fn tool_result_output(content: Option<&Value>) -> Value {
    match content {
        Some(Value::Array(items)) => {
            let texts: Vec<&str> = items
                .iter()
                .filter_map(Value::as_object)
                .filter(|i| i.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|i| i.get("text").and_then(Value::as_str))
                .collect();
            json!(texts.join("\n"))
        }
        Some(other) => other.clone(),
        None => json!(""),
    }
}
