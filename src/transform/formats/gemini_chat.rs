//! Gemini generateContent dialect
//!
//! # Mapping
//!
//! | Gemini                              | Neutral                       |
//! |-------------------------------------|-------------------------------|
//! | `systemInstruction.parts[].text`    | one `system` message          |
//! | `contents[].role` user / model      | `user` / `assistant`          |
//! | `parts[].text`                      | `text` block                  |
//! | `parts[].inlineData`                | `image` block (data URL)      |
//! | `parts[].functionCall`              | `tool_call` block             |
//! | `parts[].functionResponse`          | `tool_result` block           |
//! | `tools[].functionDeclarations[]`    | `ToolDef`                     |
//!
//! Gemini carries no tool-call identifiers, so `functionCall` blocks take
//! `id = name`; ids are dropped on the way out and results re-bind by name.

use anyhow::Result;
use axum::http::HeaderMap;
use serde_json::{json, Map, Value};

use super::{extra_without, str_field};
use crate::transform::neutral::{ChatRequest, ChatResponse, ContentBlock, Message, Role, ToolDef};
use crate::transform::FormatAdapter;

const MODELED_REQUEST_FIELDS: &[&str] =
    &["contents", "systemInstruction", "tools", "model", "stream"];
const MODELED_RESPONSE_FIELDS: &[&str] = &["candidates", "usageMetadata", "modelVersion"];

pub struct GeminiChatAdapter;

impl FormatAdapter for GeminiChatAdapter {
    fn name(&self) -> &'static str {
        "gemini_chat"
    }

    fn can_parse(&self, _path: &str, _headers: &HeaderMap, body: &Map<String, Value>) -> bool {
        // contents[].parts is the Gemini-unique shape
        body.get("contents")
            .and_then(Value::as_array)
            .and_then(|c| c.first())
            .and_then(Value::as_object)
            .map_or(false, |first| first.contains_key("parts"))
    }

    fn request_to_neutral(&self, body: &Map<String, Value>) -> Result<ChatRequest> {
        let mut messages = Vec::new();

        if let Some(instruction) = body.get("systemInstruction") {
            let text = match instruction {
                Value::String(s) => s.clone(),
                Value::Object(o) => parts_text(o.get("parts")),
                _ => String::new(),
            };
            if !text.is_empty() {
                messages.push(Message::text(Role::System, text));
            }
        }

        let empty = Vec::new();
        let contents = body
            .get("contents")
            .and_then(Value::as_array)
            .unwrap_or(&empty);
        for content in contents.iter().filter_map(Value::as_object) {
            let role = if content.get("role").and_then(Value::as_str) == Some("model") {
                Role::Assistant
            } else {
                Role::User
            };

            let mut blocks = Vec::new();
            if let Some(parts) = content.get("parts").and_then(Value::as_array) {
                for part in parts.iter().filter_map(Value::as_object) {
                    if let Some(text) = part.get("text").and_then(Value::as_str) {
                        blocks.push(ContentBlock::text(text));
                    } else if let Some(call) = part.get("functionCall").and_then(Value::as_object) {
                        let name = str_field(call, "name");
                        blocks.push(ContentBlock::ToolCall {
                            id: name.clone(),
                            name,
                            arguments: call.get("args").cloned().unwrap_or_else(|| json!({})),
                        });
                    } else if let Some(resp) =
                        part.get("functionResponse").and_then(Value::as_object)
                    {
                        let name = str_field(resp, "name");
                        blocks.push(ContentBlock::ToolResult {
                            call_id: name.clone(),
                            name: Some(name),
                            output: resp.get("response").cloned().unwrap_or_else(|| json!("")),
                        });
                    } else if let Some(inline) = part
                        .get("inlineData")
                        .or_else(|| part.get("inline_data"))
                        .and_then(Value::as_object)
                    {
                        let mime = inline
                            .get("mimeType")
                            .or_else(|| inline.get("mime_type"))
                            .and_then(Value::as_str)
                            .unwrap_or("image/png");
                        blocks.push(ContentBlock::Image {
                            url: format!("data:{};base64,{}", mime, str_field(inline, "data")),
                            detail: None,
                        });
                    }
                }
            }

            if blocks.is_empty() {
                blocks.push(ContentBlock::text(""));
            }
            messages.push(Message::new(role, blocks));
        }

        let mut tools = Vec::new();
        if let Some(defs) = body.get("tools").and_then(Value::as_array) {
            for group in defs.iter().filter_map(Value::as_object) {
                let Some(decls) = group.get("functionDeclarations").and_then(Value::as_array)
                else {
                    continue;
                };
                for decl in decls.iter().filter_map(Value::as_object) {
                    tools.push(ToolDef {
                        name: str_field(decl, "name"),
                        description: decl
                            .get("description")
                            .and_then(Value::as_str)
                            .map(String::from),
                        input_schema: decl
                            .get("parameters")
                            .cloned()
                            .unwrap_or_else(|| json!({})),
                    });
                }
            }
        }

        Ok(ChatRequest {
            messages,
            model: str_field(body, "model"),
            stream: body.get("stream").and_then(Value::as_bool).unwrap_or(false),
            tools,
            tool_choice: None,
            extra: extra_without(body, MODELED_REQUEST_FIELDS),
        })
    }

    fn neutral_to_request(&self, req: &ChatRequest) -> Result<Map<String, Value>> {
        let mut body = Map::new();

        let system_texts: Vec<&str> = req
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .flat_map(|m| m.text_parts())
            .collect();
        if !system_texts.is_empty() {
            body.insert(
                "systemInstruction".to_string(),
                json!({"parts": [{"text": system_texts.join("\n")}]}),
            );
        }

        let mut contents: Vec<Value> = Vec::new();
        for msg in req.messages.iter().filter(|m| m.role != Role::System) {
            let mut parts: Vec<Value> = Vec::new();
            for block in &msg.content {
                match block {
                    ContentBlock::Text { text } if !text.is_empty() => {
                        parts.push(json!({"text": text}));
                    }
                    ContentBlock::ToolCall { name, arguments, .. } => {
                        parts.push(json!({"functionCall": {"name": name, "args": arguments}}));
                    }
                    ContentBlock::ToolResult { call_id, name, output } => {
                        parts.push(json!({
                            "functionResponse": {
                                "name": name.as_deref().unwrap_or(call_id.as_str()),
                                "response": output,
                            }
                        }));
                    }
                    ContentBlock::Image { url, .. } => {
                        if let Some((mime, data)) = split_data_url(url) {
                            parts.push(json!({"inlineData": {"mimeType": mime, "data": data}}));
                        }
                    }
                    _ => {}
                }
            }
            if parts.is_empty() {
                continue;
            }
            let role = if msg.role == Role::Assistant { "model" } else { "user" };
            contents.push(json!({"role": role, "parts": parts}));
        }
        body.insert("contents".to_string(), Value::Array(contents));

        if !req.tools.is_empty() {
            let decls: Vec<Value> = req
                .tools
                .iter()
                .map(|t| {
                    let mut decl = Map::new();
                    decl.insert("name".to_string(), json!(t.name));
                    if let Some(description) = &t.description {
                        decl.insert("description".to_string(), json!(description));
                    }
                    decl.insert("parameters".to_string(), t.input_schema.clone());
                    Value::Object(decl)
                })
                .collect();
            body.insert("tools".to_string(), json!([{"functionDeclarations": decls}]));
        }

        body.extend(req.extra.clone());
        Ok(body)
    }

    fn response_to_neutral(&self, body: &Map<String, Value>) -> Result<ChatResponse> {
        let content = body
            .get("candidates")
            .and_then(Value::as_array)
            .and_then(|c| c.first())
            .and_then(Value::as_object);

        let mut blocks = Vec::new();
        if let Some(parts) = content
            .and_then(|c| c.get("content"))
            .and_then(Value::as_object)
            .and_then(|c| c.get("parts"))
            .and_then(Value::as_array)
        {
            for part in parts.iter().filter_map(Value::as_object) {
                if let Some(text) = part.get("text").and_then(Value::as_str) {
                    blocks.push(ContentBlock::text(text));
                } else if let Some(call) = part.get("functionCall").and_then(Value::as_object) {
                    let name = str_field(call, "name");
                    blocks.push(ContentBlock::ToolCall {
                        id: name.clone(),
                        name,
                        arguments: call.get("args").cloned().unwrap_or_else(|| json!({})),
                    });
                }
            }
        }
        if blocks.is_empty() {
            blocks.push(ContentBlock::text(""));
        }

        Ok(ChatResponse {
            id: str_field(body, "responseId"),
            model: str_field(body, "modelVersion"),
            messages: vec![Message::new(Role::Assistant, blocks)],
            finish_reason: content
                .and_then(|c| c.get("finishReason"))
                .and_then(Value::as_str)
                .map(String::from),
            usage: body.get("usageMetadata").cloned(),
            extra: extra_without(body, MODELED_RESPONSE_FIELDS),
        })
    }

    fn neutral_to_response(&self, resp: &ChatResponse) -> Result<Map<String, Value>> {
        let last = resp.last_message();

        let mut parts: Vec<Value> = Vec::new();
        for block in &last.content {
            match block {
                ContentBlock::Text { text } if !text.is_empty() => {
                    parts.push(json!({"text": text}));
                }
                ContentBlock::ToolCall { name, arguments, .. } => {
                    parts.push(json!({"functionCall": {"name": name, "args": arguments}}));
                }
                _ => {}
            }
        }
        if parts.is_empty() {
            parts.push(json!({"text": ""}));
        }

        let mut body = Map::new();
        body.insert(
            "candidates".to_string(),
            json!([{
                "content": {"role": "model", "parts": parts},
                "finishReason": resp.finish_reason,
                "index": 0,
            }]),
        );
        if let Some(usage) = &resp.usage {
            body.insert("usageMetadata".to_string(), usage.clone());
        }
        if !resp.model.is_empty() {
            body.insert("modelVersion".to_string(), json!(resp.model));
        }
        body.extend(resp.extra.clone());
        Ok(body)
    }
}

/// Newline-joined text of a `parts` array
fn parts_text(parts: Option<&Value>) -> String {
    parts
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(Value::as_object)
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default()
}

/// Split a `data:<mime>;base64,<data>` URL; other URLs cannot be expressed
/// inline in this dialect.
fn split_data_url(url: &str) -> Option<(&str, &str)> {
    let rest = url.strip_prefix("data:")?;
    let (header, data) = rest.split_once(',')?;
    let mime = header.split(';').next().unwrap_or("image/png");
    Some((mime, data))
}
