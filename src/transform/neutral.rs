//! Neutral chat model - the dialect-independent representation
//!
//! Every supported dialect converts into and out of these types. The model
//! covers text, image references, tool definitions, tool calls and tool
//! results; anything a dialect carries beyond that lands in the `extra` map
//! untouched, so `neutral -> dialect -> neutral` preserves the original body
//! modulo field order and default-value omission.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Message role across all dialects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }

    /// Parse a dialect role string, defaulting to `user` for unknown values
    pub fn parse(s: &str) -> Role {
        match s {
            "system" => Role::System,
            "assistant" => Role::Assistant,
            "tool" => Role::Tool,
            _ => Role::User,
        }
    }
}

/// One block of message content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        url: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    ToolCall {
        id: String,
        name: String,
        /// Parsed argument object; `{}` when the dialect arguments failed to parse
        arguments: Value,
    },
    ToolResult {
        call_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        /// String or structured output, preserved as the dialect delivered it
        output: Value,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }

    pub fn is_tool_related(&self) -> bool {
        matches!(self, ContentBlock::ToolCall { .. } | ContentBlock::ToolResult { .. })
    }
}

/// Tool definition, unique by name within a request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDef {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema object describing the tool input
    pub input_schema: Value,
}

/// One message of a chat request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

impl Message {
    pub fn new(role: Role, content: Vec<ContentBlock>) -> Self {
        Self { role, content }
    }

    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self::new(role, vec![ContentBlock::text(text)])
    }

    /// All text block contents of this message, in order
    pub fn text_parts(&self) -> Vec<&str> {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// Neutral chat request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    pub model: String,
    pub stream: bool,
    #[serde(default)]
    pub tools: Vec<ToolDef>,
    /// Forwarded transparently; dialects disagree on its shape
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,
    /// Dialect fields outside the neutral model, preserved round-trip
    #[serde(default)]
    pub extra: Map<String, Value>,
}

impl ChatRequest {
    /// The moderation input: all text blocks across system and user messages,
    /// newline-joined in message order.
    pub fn moderation_text(&self) -> String {
        let mut parts: Vec<&str> = Vec::new();
        for msg in &self.messages {
            if matches!(msg.role, Role::System | Role::User) {
                parts.extend(msg.text_parts());
            }
        }
        parts.join("\n")
    }

    /// Whether the request carries any tool definitions, tool choice, tool
    /// calls or tool results. Used to enforce `disable_tools`.
    pub fn has_tool_content(&self) -> bool {
        if !self.tools.is_empty() || self.tool_choice.is_some() {
            return true;
        }
        self.messages
            .iter()
            .any(|m| m.content.iter().any(|b| b.is_tool_related()))
    }
}

/// Neutral chat response; `messages` is the full assistant reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub id: String,
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Value>,
    #[serde(default)]
    pub extra: Map<String, Value>,
}

impl ChatResponse {
    /// The last reply message, or an empty assistant message when the
    /// response carried none.
    pub fn last_message(&self) -> Message {
        self.messages
            .last()
            .cloned()
            .unwrap_or_else(|| Message::text(Role::Assistant, ""))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request_with(messages: Vec<Message>) -> ChatRequest {
        ChatRequest {
            messages,
            model: "m".to_string(),
            stream: false,
            tools: Vec::new(),
            tool_choice: None,
            extra: Map::new(),
        }
    }

    #[test]
    fn test_moderation_text_joins_system_and_user() {
        let req = request_with(vec![
            Message::text(Role::System, "be nice"),
            Message::text(Role::User, "hello"),
            Message::text(Role::Assistant, "ignored"),
            Message::text(Role::User, "world"),
        ]);
        assert_eq!(req.moderation_text(), "be nice\nhello\nworld");
    }

    #[test]
    fn test_moderation_text_skips_non_text_blocks() {
        let req = request_with(vec![Message::new(
            Role::User,
            vec![
                ContentBlock::ToolResult {
                    call_id: "c1".to_string(),
                    name: None,
                    output: json!("out"),
                },
                ContentBlock::text("visible"),
            ],
        )]);
        assert_eq!(req.moderation_text(), "visible");
    }

    #[test]
    fn test_has_tool_content() {
        let mut req = request_with(vec![Message::text(Role::User, "hi")]);
        assert!(!req.has_tool_content());

        req.tools.push(ToolDef {
            name: "f".to_string(),
            description: None,
            input_schema: json!({"type": "object"}),
        });
        assert!(req.has_tool_content());

        let req = request_with(vec![Message::new(
            Role::Assistant,
            vec![ContentBlock::ToolCall {
                id: "t1".to_string(),
                name: "f".to_string(),
                arguments: json!({}),
            }],
        )]);
        assert!(req.has_tool_content());
    }

    #[test]
    fn test_role_parse_defaults_to_user() {
        assert_eq!(Role::parse("assistant"), Role::Assistant);
        assert_eq!(Role::parse("whatever"), Role::User);
    }
}
