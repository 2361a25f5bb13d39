//! Claude Code (Agent SDK) dialect
//!
//! Requests are `{prompt, options}` rather than a message list:
//! `options.systemPrompt` becomes the system message, the prompt string the
//! user message, and `options.mcpServers[<name>].tools[]` flatten into
//! neutral tools named `mcp__<server>__<tool>`. Non-message option keys pass
//! through `extra`.
//!
//! Responses are type-tagged single messages (`assistant` / `tool_call` /
//! `tool_result`) instead of a block list.

use anyhow::Result;
use axum::http::HeaderMap;
use serde_json::{json, Map, Value};

use super::{extra_without, str_field};
use crate::transform::neutral::{ChatRequest, ChatResponse, ContentBlock, Message, Role, ToolDef};
use crate::transform::FormatAdapter;

/// Option keys with a neutral-model counterpart; the rest ride in `extra`
const MODELED_OPTION_FIELDS: &[&str] = &["model", "systemPrompt", "mcpServers", "tool_choice"];

const DEFAULT_MODEL: &str = "claude-sonnet-4-5";

pub struct ClaudeCodeAdapter;

impl FormatAdapter for ClaudeCodeAdapter {
    fn name(&self) -> &'static str {
        "claude_code"
    }

    fn excluded_when_tools_disabled(&self) -> bool {
        true
    }

    fn can_parse(&self, path: &str, headers: &HeaderMap, body: &Map<String, Value>) -> bool {
        // /messages paths and the anthropic-version header mark Claude Chat
        if path.contains("/messages") || headers.contains_key("anthropic-version") {
            return false;
        }

        if !body.contains_key("prompt") || body.contains_key("messages") {
            return false;
        }

        body.contains_key("options") || body.get("prompt").map_or(false, Value::is_string)
    }

    fn request_to_neutral(&self, body: &Map<String, Value>) -> Result<ChatRequest> {
        let options = body
            .get("options")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        let mut messages = Vec::new();
        if let Some(system) = options.get("systemPrompt").and_then(Value::as_str) {
            if !system.is_empty() {
                messages.push(Message::text(Role::System, system));
            }
        }

        let prompt = match body.get("prompt") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        };
        messages.push(Message::text(Role::User, prompt));

        let mut tools = Vec::new();
        if let Some(servers) = options.get("mcpServers").and_then(Value::as_object) {
            for (server_name, server) in servers {
                let Some(server_tools) = server.get("tools").and_then(Value::as_array) else {
                    continue;
                };
                for def in server_tools.iter().filter_map(Value::as_object) {
                    tools.push(ToolDef {
                        name: format!("mcp__{}__{}", server_name, str_field(def, "name")),
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
        }

        let model = options
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_MODEL)
            .to_string();

        Ok(ChatRequest {
            messages,
            model,
            // The SDK consumes an async iterator, not a wire-level SSE stream
            stream: false,
            tools,
            tool_choice: options.get("tool_choice").cloned(),
            extra: extra_without(&options, MODELED_OPTION_FIELDS),
        })
    }

    fn neutral_to_request(&self, req: &ChatRequest) -> Result<Map<String, Value>> {
        let system_texts: Vec<&str> = req
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .flat_map(|m| m.text_parts())
            .collect();
        let user_texts: Vec<&str> = req
            .messages
            .iter()
            .filter(|m| m.role == Role::User)
            .flat_map(|m| m.text_parts())
            .collect();

        let mut options = Map::new();
        options.insert("model".to_string(), json!(req.model));
        if !system_texts.is_empty() {
            options.insert("systemPrompt".to_string(), json!(system_texts.join("\n")));
        }
        options.extend(req.extra.clone());

        if !req.tools.is_empty() {
            // Without server attribution all tools land in one default server
            let tools: Vec<Value> = req
                .tools
                .iter()
                .map(|t| {
                    let mut def = Map::new();
                    def.insert(
                        "name".to_string(),
                        json!(t.name.trim_start_matches("mcp__default__")),
                    );
                    if let Some(description) = &t.description {
                        def.insert("description".to_string(), json!(description));
                    }
                    def.insert("input_schema".to_string(), t.input_schema.clone());
                    Value::Object(def)
                })
                .collect();
            options.insert(
                "mcpServers".to_string(),
                json!({"default": {"tools": tools}}),
            );
        }

        let mut body = Map::new();
        body.insert("prompt".to_string(), json!(user_texts.join("\n")));
        body.insert("options".to_string(), Value::Object(options));
        Ok(body)
    }

    fn response_to_neutral(&self, body: &Map<String, Value>) -> Result<ChatResponse> {
        let mut blocks = Vec::new();

        match body.get("type").and_then(Value::as_str) {
            Some("assistant") => match body.get("content") {
                Some(Value::String(s)) => blocks.push(ContentBlock::text(s.clone())),
                Some(Value::Array(parts)) => {
                    for part in parts.iter().filter_map(Value::as_object) {
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
                _ => {}
            },
            Some("tool_call") => blocks.push(ContentBlock::ToolCall {
                id: str_field(body, "id"),
                name: str_field(body, "tool_name"),
                arguments: body.get("input").cloned().unwrap_or_else(|| json!({})),
            }),
            Some("tool_result") => blocks.push(ContentBlock::ToolResult {
                call_id: str_field(body, "tool_call_id"),
                name: body.get("tool_name").and_then(Value::as_str).map(String::from),
                output: body.get("result").cloned().unwrap_or_else(|| json!("")),
            }),
            _ => {}
        }

        if blocks.is_empty() {
            blocks.push(ContentBlock::text(""));
        }

        let id = body
            .get("id")
            .or_else(|| body.get("session_id"))
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();

        Ok(ChatResponse {
            id,
            model: str_field(body, "model"),
            messages: vec![Message::new(Role::Assistant, blocks)],
            finish_reason: body
                .get("stop_reason")
                .and_then(Value::as_str)
                .map(String::from),
            usage: body.get("usage").cloned(),
            extra: extra_without(body, &["id", "type", "content", "model", "stop_reason", "usage"]),
        })
    }

    fn neutral_to_response(&self, resp: &ChatResponse) -> Result<Map<String, Value>> {
        let last = resp.last_message();

        // tool_result wins over tool_call wins over plain text, matching the
        // one-message-per-event SDK shape
        if let Some(ContentBlock::ToolResult { call_id, name, output }) = last
            .content
            .iter()
            .find(|b| matches!(b, ContentBlock::ToolResult { .. }))
        {
            let mut body = Map::new();
            body.insert("type".to_string(), json!("tool_result"));
            body.insert("tool_name".to_string(), json!(name));
            body.insert("result".to_string(), output.clone());
            body.insert("tool_call_id".to_string(), json!(call_id));
            return Ok(body);
        }

        if let Some(ContentBlock::ToolCall { id, name, arguments }) = last
            .content
            .iter()
            .find(|b| matches!(b, ContentBlock::ToolCall { .. }))
        {
            let mut body = Map::new();
            body.insert("type".to_string(), json!("tool_call"));
            body.insert("id".to_string(), json!(id));
            body.insert("tool_name".to_string(), json!(name));
            body.insert("input".to_string(), arguments.clone());
            return Ok(body);
        }

        let mut content: Vec<Value> = last
            .text_parts()
            .iter()
            .filter(|t| !t.is_empty())
            .map(|t| json!({"type": "text", "text": t}))
            .collect();
        if content.is_empty() {
            content.push(json!({"type": "text", "text": ""}));
        }

        let mut body = Map::new();
        body.insert("type".to_string(), json!("assistant"));
        body.insert("content".to_string(), Value::Array(content));
        body.insert("model".to_string(), json!(resp.model));
        body.insert("id".to_string(), json!(resp.id));
        body.extend(resp.extra.clone());
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> ClaudeCodeAdapter {
        ClaudeCodeAdapter
    }

    fn obj(v: Value) -> Map<String, Value> {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn test_can_parse_prompt_bodies_only() {
        let headers = HeaderMap::new();
        let body = obj(json!({"prompt": "analyze this", "options": {"model": "m"}}));
        assert!(adapter().can_parse("/run", &headers, &body));

        // /messages paths are Claude Chat
        assert!(!adapter().can_parse("/v1/messages", &headers, &body));

        let mut anthropic = HeaderMap::new();
        anthropic.insert("anthropic-version", "2023-06-01".parse().unwrap());
        assert!(!adapter().can_parse("/run", &anthropic, &body));

        let chat = obj(json!({"messages": [{"role": "user", "content": "hi"}]}));
        assert!(!adapter().can_parse("/run", &headers, &chat));
    }

    #[test]
    fn test_request_to_neutral_flattens_mcp_tools() {
        let body = obj(json!({
            "prompt": "do the thing",
            "options": {
                "model": "claude-sonnet-4-5",
                "systemPrompt": "you are careful",
                "workingDirectory": "/tmp",
                "mcpServers": {
                    "files": {
                        "tools": [
                            {"name": "read", "description": "read a file", "input_schema": {"type": "object"}}
                        ]
                    }
                }
            }
        }));

        let neutral = adapter().request_to_neutral(&body).unwrap();
        assert_eq!(neutral.messages[0].role, Role::System);
        assert_eq!(neutral.messages[1].text_parts(), vec!["do the thing"]);
        assert_eq!(neutral.tools.len(), 1);
        assert_eq!(neutral.tools[0].name, "mcp__files__read");
        assert!(!neutral.stream);
        assert_eq!(neutral.extra["workingDirectory"], "/tmp");
    }

    #[test]
    fn test_neutral_to_request_rebuilds_prompt_shape() {
        let req = ChatRequest {
            messages: vec![
                Message::text(Role::System, "sys"),
                Message::text(Role::User, "hello"),
            ],
            model: "claude-sonnet-4-5".to_string(),
            stream: false,
            tools: Vec::new(),
            tool_choice: None,
            extra: Map::new(),
        };
        let body = adapter().neutral_to_request(&req).unwrap();
        assert_eq!(body["prompt"], "hello");
        assert_eq!(body["options"]["systemPrompt"], "sys");
        assert_eq!(body["options"]["model"], "claude-sonnet-4-5");
    }

    #[test]
    fn test_response_types() {
        let assistant = obj(json!({
            "type": "assistant",
            "content": [{"type": "text", "text": "done"}],
            "id": "s1",
            "model": "m"
        }));
        let neutral = adapter().response_to_neutral(&assistant).unwrap();
        assert_eq!(neutral.messages[0].text_parts(), vec!["done"]);

        let tool_call = obj(json!({
            "type": "tool_call",
            "id": "t1",
            "tool_name": "read",
            "input": {"path": "x"}
        }));
        let neutral = adapter().response_to_neutral(&tool_call).unwrap();
        assert_eq!(
            neutral.messages[0].content[0],
            ContentBlock::ToolCall {
                id: "t1".to_string(),
                name: "read".to_string(),
                arguments: json!({"path": "x"}),
            }
        );

        let back = adapter().neutral_to_response(&neutral).unwrap();
        assert_eq!(back["type"], "tool_call");
        assert_eq!(back["tool_name"], "read");
    }
}
