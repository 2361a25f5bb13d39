// SSE (Server-Sent Events) parsing helpers
//
// Upstreams deliver streaming responses as line-oriented SSE frames:
//
// ```
// event: <event_type>
// data: <json_payload>
// ```
//
// The gateway never re-authors frames; it only needs to read enough of them
// to decide whether the stream carries real content (see stream_check). The
// helpers here parse individual `data:` lines and classify the payloads of
// the two streaming dialects we inspect:
//
// - OpenAI chat chunks: `choices[].delta.content` / `choices[].delta.tool_calls`
// - Claude events: `content_block_delta` text_delta, `content_block_start`
//   tool_use, `message_start` with pre-filled tool_use content

use serde_json::Value;

/// Check if a response is SSE based on its content-type header
pub fn is_sse_content_type(content_type: Option<&str>) -> bool {
    content_type.map_or(false, |ct| ct.contains("text/event-stream"))
}

/// Parse an SSE `data:` line into JSON.
///
/// Returns None for non-data lines, empty payloads, `[DONE]` terminators and
/// unparseable JSON.
pub fn parse_sse_data_line(line: &str) -> Option<Value> {
    let json_str = line.strip_prefix("data:")?.trim();
    if json_str.is_empty() || json_str == "[DONE]" {
        return None;
    }
    serde_json::from_str(json_str).ok()
}

/// Extract the incremental text of a decoded SSE payload, if any.
///
/// Handles OpenAI `choices[].delta.content` and Claude
/// `content_block_delta` with a `text_delta`.
pub fn extract_text_delta(data: &Value) -> Option<String> {
    // OpenAI chat chunk
    if let Some(choices) = data.get("choices").and_then(Value::as_array) {
        let mut text = String::new();
        for choice in choices {
            if let Some(content) = choice
                .get("delta")
                .and_then(|d| d.get("content"))
                .and_then(Value::as_str)
            {
                text.push_str(content);
            }
        }
        if !text.is_empty() {
            return Some(text);
        }
    }

    // Claude event
    if data.get("type").and_then(Value::as_str) == Some("content_block_delta") {
        let delta = data.get("delta")?;
        if delta.get("type").and_then(Value::as_str) == Some("text_delta") {
            return delta.get("text").and_then(Value::as_str).map(String::from);
        }
    }

    None
}

/// Whether a decoded SSE payload starts (or pre-fills) a tool call.
pub fn has_tool_call_start(data: &Value) -> bool {
    // OpenAI: delta.tool_calls
    if let Some(choices) = data.get("choices").and_then(Value::as_array) {
        for choice in choices {
            if choice
                .get("delta")
                .and_then(|d| d.get("tool_calls"))
                .map_or(false, |tc| !tc.is_null())
            {
                return true;
            }
        }
    }

    match data.get("type").and_then(Value::as_str) {
        // Claude: content_block_start with a tool_use block
        Some("content_block_start") => {
            data.get("content_block")
                .and_then(|b| b.get("type"))
                .and_then(Value::as_str)
                == Some("tool_use")
        }
        // Claude: message_start with tool_use already present in content
        Some("message_start") => data
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(Value::as_array)
            .map_or(false, |content| {
                content
                    .iter()
                    .any(|c| c.get("type").and_then(Value::as_str) == Some("tool_use"))
            }),
        _ => false,
    }
}
