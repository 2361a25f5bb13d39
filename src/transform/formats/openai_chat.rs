//! OpenAI Chat Completions dialect
//!
//! # Mapping
//!
//! | OpenAI                           | Neutral                          |
//! |----------------------------------|----------------------------------|
//! | `messages[].content` (str/parts) | `text` / `image` blocks          |
//! | `messages[].tool_calls[]`        | `tool_call` blocks               |
//! | `role: "tool"` + `tool_call_id`  | single `tool_result` block       |
//! | `tools[].function`               | `ToolDef`                        |
//! | everything else                  | `extra` (preserved round-trip)   |
//!
//! Tool-call arguments arrive as a JSON-encoded string; a parse failure maps
//! to `{}`. On the way out every `tool_result` block becomes its own
//! `role: "tool"` message placed right after the message that produced it.

use anyhow::{Context, Result};
use axum::http::HeaderMap;
use serde_json::{json, Map, Value};

use super::{extra_without, output_to_string, parse_arguments, str_field};
use crate::transform::neutral::{ChatRequest, ChatResponse, ContentBlock, Message, Role, ToolDef};
use crate::transform::FormatAdapter;

/// Fields of an OpenAI chat request covered by the neutral model
const MODELED_REQUEST_FIELDS: &[&str] = &["messages", "model", "stream", "tools", "tool_choice"];
/// Fields of an OpenAI chat response covered by the neutral model
const MODELED_RESPONSE_FIELDS: &[&str] = &["id", "model", "choices", "usage"];

pub struct OpenAiChatAdapter;

impl FormatAdapter for OpenAiChatAdapter {
    fn name(&self) -> &'static str {
        "openai_chat"
    }

    fn can_parse(&self, path: &str, _headers: &HeaderMap, body: &Map<String, Value>) -> bool {
        // Gemini bodies carry contents[].parts, not messages
        if has_gemini_contents(body) {
            return false;
        }

        // Prompt-style bodies belong to Claude Code / Codex
        if body.contains_key("prompt") && !body.contains_key("messages") {
            return false;
        }

        // cache_control inside content blocks is a Claude-only caching marker
        if let Some(messages) = body.get("messages").and_then(Value::as_array) {
            for msg in messages.iter().filter_map(Value::as_object) {
                if let Some(parts) = msg.get("content").and_then(Value::as_array) {
                    if parts
                        .iter()
                        .filter_map(Value::as_object)
                        .any(|p| p.contains_key("cache_control"))
                    {
                        return false;
                    }
                }
            }
        }

        if path.contains("/chat/completions") {
            return true;
        }

        body.get("messages")
            .and_then(Value::as_array)
            .and_then(|m| m.first())
            .and_then(Value::as_object)
            .map_or(false, |first| first.contains_key("role"))
    }

    fn request_to_neutral(&self, body: &Map<String, Value>) -> Result<ChatRequest> {
        let mut tools = Vec::new();
        if let Some(defs) = body.get("tools").and_then(Value::as_array) {
            for def in defs.iter().filter_map(Value::as_object) {
                if def.get("type").and_then(Value::as_str) != Some("function") {
                    continue;
                }
                let func = def
                    .get("function")
                    .and_then(Value::as_object)
                    .context("tool entry has no function object")?;
                tools.push(ToolDef {
                    name: str_field(func, "name"),
                    description: func
                        .get("description")
                        .and_then(Value::as_str)
                        .map(String::from),
                    input_schema: func
                        .get("parameters")
                        .cloned()
                        .unwrap_or_else(|| json!({})),
                });
            }
        }

        let mut messages = Vec::new();
        let empty = Vec::new();
        let raw_messages = body
            .get("messages")
            .and_then(Value::as_array)
            .unwrap_or(&empty);
        for msg in raw_messages.iter().filter_map(Value::as_object) {
            let role = Role::parse(msg.get("role").and_then(Value::as_str).unwrap_or("user"));
            let mut blocks = Vec::new();

            if role == Role::Tool {
                // A tool message is exactly one tool_result bound by tool_call_id
                blocks.push(ContentBlock::ToolResult {
                    call_id: str_field(msg, "tool_call_id"),
                    name: msg.get("name").and_then(Value::as_str).map(String::from),
                    output: msg.get("content").cloned().unwrap_or_else(|| json!("")),
                });
            } else {
                match msg.get("content") {
                    Some(Value::String(s)) if !s.is_empty() => {
                        blocks.push(ContentBlock::text(s.clone()));
                    }
                    Some(Value::Array(parts)) => {
                        for part in parts.iter().filter_map(Value::as_object) {
                            match part.get("type").and_then(Value::as_str) {
                                Some("text") => blocks.push(ContentBlock::text(str_field(part, "text"))),
                                Some("image_url") => {
                                    let image = part
                                        .get("image_url")
                                        .and_then(Value::as_object);
                                    if let Some(url) =
                                        image.and_then(|i| i.get("url")).and_then(Value::as_str)
                                    {
                                        blocks.push(ContentBlock::Image {
                                            url: url.to_string(),
                                            detail: image
                                                .and_then(|i| i.get("detail"))
                                                .and_then(Value::as_str)
                                                .map(String::from),
                                        });
                                    }
                                }
                                _ => {}
                            }
                        }
                    }
                    _ => {}
                }

                if let Some(calls) = msg.get("tool_calls").and_then(Value::as_array) {
                    for call in calls.iter().filter_map(Value::as_object) {
                        let func = call.get("function").and_then(Value::as_object);
                        blocks.push(ContentBlock::ToolCall {
                            id: str_field(call, "id"),
                            name: func.map(|f| str_field(f, "name")).unwrap_or_default(),
                            arguments: parse_arguments(func.and_then(|f| f.get("arguments"))),
                        });
                    }
                }
            }

            if blocks.is_empty() {
                blocks.push(ContentBlock::text(""));
            }
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
        let mut messages: Vec<Value> = Vec::new();

        for msg in &req.messages {
            let tool_calls: Vec<&ContentBlock> = msg
                .content
                .iter()
                .filter(|b| matches!(b, ContentBlock::ToolCall { .. }))
                .collect();
            let has_images = msg
                .content
                .iter()
                .any(|b| matches!(b, ContentBlock::Image { .. }));

            if msg.role != Role::Tool {
                let mut out = Map::new();
                out.insert("role".to_string(), json!(msg.role.as_str()));

                if has_images {
                    out.insert("content".to_string(), render_parts(&msg.content));
                } else {
                    let texts = msg.text_parts();
                    if !texts.is_empty() {
                        out.insert("content".to_string(), json!(texts.join("\n")));
                    } else if tool_calls.is_empty() {
                        out.insert("content".to_string(), json!(""));
                    }
                }

                if !tool_calls.is_empty() {
                    let calls: Vec<Value> =
                        tool_calls.iter().copied().map(render_tool_call).collect();
                    out.insert("tool_calls".to_string(), Value::Array(calls));
                }

                messages.push(Value::Object(out));
            }

            // Every tool_result becomes its own tool message, right after the
            // message that carried it
            for block in &msg.content {
                if let ContentBlock::ToolResult { call_id, name, output } = block {
                    let mut out = Map::new();
                    out.insert("role".to_string(), json!("tool"));
                    out.insert("tool_call_id".to_string(), json!(call_id));
                    if let Some(name) = name {
                        out.insert("name".to_string(), json!(name));
                    }
                    out.insert("content".to_string(), json!(output_to_string(output)));
                    messages.push(Value::Object(out));
                }
            }
        }

        let mut body = Map::new();
        body.insert("model".to_string(), json!(req.model));
        body.insert("messages".to_string(), Value::Array(messages));
        body.insert("stream".to_string(), json!(req.stream));

        if !req.tools.is_empty() {
            let tools: Vec<Value> = req.tools.iter().map(render_tool_def).collect();
            body.insert("tools".to_string(), Value::Array(tools));
        }
        if let Some(choice) = &req.tool_choice {
            body.insert("tool_choice".to_string(), choice.clone());
        }
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
        let message = choice
            .get("message")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        let mut blocks = Vec::new();
        match message.get("content") {
            Some(Value::String(s)) if !s.is_empty() => blocks.push(ContentBlock::text(s.clone())),
            Some(Value::Array(parts)) => {
                for part in parts.iter().filter_map(Value::as_object) {
                    if part.get("type").and_then(Value::as_str) == Some("text") {
                        blocks.push(ContentBlock::text(str_field(part, "text")));
                    }
                }
            }
            _ => {}
        }

        if let Some(calls) = message.get("tool_calls").and_then(Value::as_array) {
            for call in calls.iter().filter_map(Value::as_object) {
                let func = call.get("function").and_then(Value::as_object);
                blocks.push(ContentBlock::ToolCall {
                    id: str_field(call, "id"),
                    name: func.map(|f| str_field(f, "name")).unwrap_or_default(),
                    arguments: parse_arguments(func.and_then(|f| f.get("arguments"))),
                });
            }
        }

        if blocks.is_empty() {
            blocks.push(ContentBlock::text(""));
        }

        Ok(ChatResponse {
            id: str_field(body, "id"),
            model: str_field(body, "model"),
            messages: vec![Message::new(Role::Assistant, blocks)],
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

        let mut message = Map::new();
        message.insert("role".to_string(), json!("assistant"));

        let has_images = last
            .content
            .iter()
            .any(|b| matches!(b, ContentBlock::Image { .. }));
        if has_images {
            message.insert("content".to_string(), render_parts(&last.content));
        } else {
            let texts = last.text_parts();
            if !texts.is_empty() {
                message.insert("content".to_string(), json!(texts.join("\n")));
            }
        }

        let calls: Vec<Value> = last
            .content
            .iter()
            .filter(|b| matches!(b, ContentBlock::ToolCall { .. }))
            .map(render_tool_call)
            .collect();
        if !calls.is_empty() {
            message.insert("tool_calls".to_string(), Value::Array(calls));
        }

        let mut body = Map::new();
        body.insert("id".to_string(), json!(resp.id));
        body.insert("model".to_string(), json!(resp.model));
        body.insert("object".to_string(), json!("chat.completion"));
        body.insert(
            "choices".to_string(),
            json!([{
                "index": 0,
                "message": Value::Object(message),
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

fn has_gemini_contents(body: &Map<String, Value>) -> bool {
    body.get("contents")
        .and_then(Value::as_array)
        .and_then(|c| c.first())
        .and_then(Value::as_object)
        .map_or(false, |first| first.contains_key("parts"))
}

/// Render text and image blocks as a multi-part content array
fn render_parts(blocks: &[ContentBlock]) -> Value {
    let parts: Vec<Value> = blocks
        .iter()
        .filter_map(|b| match b {
            ContentBlock::Text { text } => Some(json!({"type": "text", "text": text})),
            ContentBlock::Image { url, detail } => {
                let mut image = Map::new();
                image.insert("url".to_string(), json!(url));
                if let Some(detail) = detail {
                    image.insert("detail".to_string(), json!(detail));
                }
                Some(json!({"type": "image_url", "image_url": Value::Object(image)}))
            }
            _ => None,
        })
        .collect();
    Value::Array(parts)
}

fn render_tool_call(block: &ContentBlock) -> Value {
    match block {
        ContentBlock::ToolCall { id, name, arguments } => json!({
            "id": id,
            "type": "function",
            "function": {
                "name": name,
                "arguments": arguments.to_string(),
            }
        }),
        _ => Value::Null,
    }
}

fn render_tool_def(tool: &ToolDef) -> Value {
    let mut func = Map::new();
    func.insert("name".to_string(), json!(tool.name));
    if let Some(description) = &tool.description {
        func.insert("description".to_string(), json!(description));
    }
    func.insert("parameters".to_string(), tool.input_schema.clone());
    json!({"type": "function", "function": Value::Object(func)})
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> OpenAiChatAdapter {
        OpenAiChatAdapter
    }

    fn obj(v: Value) -> Map<String, Value> {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn test_can_parse_by_path_and_body() {
        let headers = HeaderMap::new();
        let body = obj(json!({"messages": [{"role": "user", "content": "hi"}]}));
        assert!(adapter().can_parse("/v1/chat/completions", &headers, &body));
        assert!(adapter().can_parse("/anything", &headers, &body));
    }

    #[test]
    fn test_can_parse_rejects_gemini_and_prompt_bodies() {
        let headers = HeaderMap::new();
        let gemini = obj(json!({"contents": [{"parts": [{"text": "hi"}]}]}));
        assert!(!adapter().can_parse("/v1/chat/completions", &headers, &gemini));

        let codex = obj(json!({"prompt": "hi", "model": "m"}));
        assert!(!adapter().can_parse("/v1/completions", &headers, &codex));
    }

    #[test]
    fn test_can_parse_rejects_cache_control_marker() {
        let headers = HeaderMap::new();
        let claude = obj(json!({
            "messages": [{
                "role": "user",
                "content": [{"type": "text", "text": "hi", "cache_control": {"type": "ephemeral"}}]
            }]
        }));
        assert!(!adapter().can_parse("/v1/chat/completions", &headers, &claude));
    }

    #[test]
    fn test_simple_request_round_trip() {
        let body = obj(json!({
            "model": "gpt-4",
            "messages": [{"role": "user", "content": "Hello"}],
            "stream": false,
            "temperature": 0.7
        }));

        let neutral = adapter().request_to_neutral(&body).unwrap();
        assert_eq!(neutral.model, "gpt-4");
        assert_eq!(neutral.extra["temperature"], 0.7);

        let back = adapter().neutral_to_request(&neutral).unwrap();
        assert_eq!(back["model"], "gpt-4");
        assert_eq!(back["messages"][0]["content"], "Hello");
        assert_eq!(back["temperature"], 0.7);
        assert_eq!(back["stream"], false);
    }

    #[test]
    fn test_tool_call_round_trip() {
        let body = obj(json!({
            "model": "gpt-4",
            "messages": [
                {"role": "user", "content": "weather?"},
                {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "t1",
                        "type": "function",
                        "function": {"name": "f", "arguments": "{\"x\":1}"}
                    }]
                },
                {"role": "tool", "tool_call_id": "t1", "content": "sunny"}
            ]
        }));

        let neutral = adapter().request_to_neutral(&body).unwrap();
        assert_eq!(
            neutral.messages[1].content[0],
            ContentBlock::ToolCall {
                id: "t1".to_string(),
                name: "f".to_string(),
                arguments: json!({"x": 1}),
            }
        );
        assert_eq!(
            neutral.messages[2].content[0],
            ContentBlock::ToolResult {
                call_id: "t1".to_string(),
                name: None,
                output: json!("sunny"),
            }
        );

        let back = adapter().neutral_to_request(&neutral).unwrap();
        let calls = back["messages"][1]["tool_calls"].as_array().unwrap();
        assert_eq!(calls[0]["id"], "t1");
        assert_eq!(calls[0]["function"]["name"], "f");
        assert_eq!(
            serde_json::from_str::<Value>(calls[0]["function"]["arguments"].as_str().unwrap())
                .unwrap(),
            json!({"x": 1})
        );
        assert_eq!(back["messages"][2]["role"], "tool");
        assert_eq!(back["messages"][2]["tool_call_id"], "t1");
        assert_eq!(back["messages"][2]["content"], "sunny");
    }

    #[test]
    fn test_malformed_arguments_become_empty_object() {
        let body = obj(json!({
            "model": "m",
            "messages": [{
                "role": "assistant",
                "tool_calls": [{
                    "id": "t1",
                    "type": "function",
                    "function": {"name": "f", "arguments": "{broken"}
                }]
            }]
        }));
        let neutral = adapter().request_to_neutral(&body).unwrap();
        assert_eq!(
            neutral.messages[0].content[0],
            ContentBlock::ToolCall {
                id: "t1".to_string(),
                name: "f".to_string(),
                arguments: json!({}),
            }
        );
    }

    #[test]
    fn test_image_parts_round_trip() {
        let body = obj(json!({
            "model": "m",
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "text", "text": "look"},
                    {"type": "image_url", "image_url": {"url": "https://x/img.png", "detail": "low"}}
                ]
            }]
        }));
        let neutral = adapter().request_to_neutral(&body).unwrap();
        assert_eq!(
            neutral.messages[0].content[1],
            ContentBlock::Image {
                url: "https://x/img.png".to_string(),
                detail: Some("low".to_string()),
            }
        );

        let back = adapter().neutral_to_request(&neutral).unwrap();
        let parts = back["messages"][0]["content"].as_array().unwrap();
        assert_eq!(parts[1]["image_url"]["url"], "https://x/img.png");
        assert_eq!(parts[1]["image_url"]["detail"], "low");
    }

    #[test]
    fn test_response_round_trip() {
        let body = obj(json!({
            "id": "chatcmpl-1",
            "model": "gpt-4",
            "object": "chat.completion",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "hi there"},
                "finish_reason": "stop"
            }],
            "usage": {"total_tokens": 5}
        }));

        let neutral = adapter().response_to_neutral(&body).unwrap();
        assert_eq!(neutral.id, "chatcmpl-1");
        assert_eq!(neutral.finish_reason.as_deref(), Some("stop"));
        assert_eq!(neutral.messages[0].text_parts(), vec!["hi there"]);

        let back = adapter().neutral_to_response(&neutral).unwrap();
        assert_eq!(back["choices"][0]["message"]["content"], "hi there");
        assert_eq!(back["choices"][0]["finish_reason"], "stop");
        assert_eq!(back["usage"]["total_tokens"], 5);
    }

    #[test]
    fn test_tool_defs_round_trip() {
        let body = obj(json!({
            "model": "m",
            "messages": [{"role": "user", "content": "hi"}],
            "tools": [{
                "type": "function",
                "function": {
                    "name": "get_weather",
                    "description": "look up weather",
                    "parameters": {"type": "object", "properties": {"city": {"type": "string"}}}
                }
            }],
            "tool_choice": "auto"
        }));
        let neutral = adapter().request_to_neutral(&body).unwrap();
        assert_eq!(neutral.tools.len(), 1);
        assert_eq!(neutral.tools[0].name, "get_weather");
        assert_eq!(neutral.tool_choice, Some(json!("auto")));

        let back = adapter().neutral_to_request(&neutral).unwrap();
        assert_eq!(back["tools"][0]["function"]["name"], "get_weather");
        assert_eq!(back["tool_choice"], "auto");
    }
}
