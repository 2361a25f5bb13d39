//! Stream validator - gates response headers on real streamed content
//!
//! Some upstreams open an SSE stream and then close it without producing
//! anything (`data: [DONE]` and nothing else). Once response headers are
//! sent the gateway can no longer turn that into a proper error, so it
//! buffers the first frames and only commits once the stream has proven
//! itself: more than two characters of accumulated text, or any tool-call
//! start. Until commitment the router holds the bytes back; an upstream
//! close before commitment surfaces as a 502.

use crate::proxy::sse;

/// Accumulated text length above which a stream commits
const CHAR_THRESHOLD: usize = 2;

/// Inspects initial SSE frames and decides when to commit the response.
#[derive(Debug, Default)]
pub struct StreamChecker {
    accumulated: String,
    has_tool_call: bool,
    /// Trailing partial line carried over between chunks
    partial_line: String,
}

impl StreamChecker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the commit condition has been reached
    pub fn committed(&self) -> bool {
        self.has_tool_call || self.accumulated.chars().count() > CHAR_THRESHOLD
    }

    /// The text accumulated so far; serialized into the error payload when
    /// the upstream closes before commitment.
    pub fn accumulated_text(&self) -> &str {
        &self.accumulated
    }

    /// Feed one chunk of upstream bytes. Returns true once committed.
    ///
    /// SSE frames can split across chunk boundaries, so incomplete trailing
    /// lines are carried over to the next call. Undecodable bytes (a
    /// truncated multi-byte character) leave the state unchanged.
    pub fn check_chunk(&mut self, chunk: &[u8]) -> bool {
        if self.committed() {
            return true;
        }

        let Ok(text) = std::str::from_utf8(chunk) else {
            return false;
        };

        let mut buffer = std::mem::take(&mut self.partial_line);
        buffer.push_str(text);

        let mut lines: Vec<&str> = buffer.split('\n').collect();
        // The last segment is complete only if the chunk ended with a newline
        if !buffer.ends_with('\n') {
            self.partial_line = lines.pop().unwrap_or("").to_string();
        }

        for line in lines {
            let Some(data) = sse::parse_sse_data_line(line.trim()) else {
                continue;
            };
            if let Some(text) = sse::extract_text_delta(&data) {
                self.accumulated.push_str(&text);
            }
            if sse::has_tool_call_start(&data) {
                self.has_tool_call = true;
            }
            if self.committed() {
                return true;
            }
        }

        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn openai_chunk(content: &str) -> String {
        format!(
            "data: {{\"choices\":[{{\"delta\":{{\"content\":\"{}\"}}}}]}}\n\n",
            content
        )
    }

    #[test]
    fn test_commits_after_char_threshold() {
        let mut checker = StreamChecker::new();
        assert!(!checker.check_chunk(openai_chunk("a").as_bytes()));
        assert!(!checker.check_chunk(openai_chunk("b").as_bytes()));
        // Third character crosses the > 2 threshold
        assert!(checker.check_chunk(openai_chunk("c").as_bytes()));
        assert!(checker.committed());
        assert_eq!(checker.accumulated_text(), "abc");
    }

    #[test]
    fn test_never_commits_on_keepalives_and_done() {
        let mut checker = StreamChecker::new();
        assert!(!checker.check_chunk(b": keep-alive\n\n"));
        assert!(!checker.check_chunk(b"event: ping\ndata: {\"type\":\"ping\"}\n\n"));
        assert!(!checker.check_chunk(b"data: [DONE]\n\n"));
        assert!(!checker.committed());
    }

    #[test]
    fn test_commits_on_openai_tool_call() {
        let mut checker = StreamChecker::new();
        let chunk = b"data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0}]}}]}\n\n";
        assert!(checker.check_chunk(chunk));
    }

    #[test]
    fn test_commits_on_claude_tool_use_block() {
        let mut checker = StreamChecker::new();
        let chunk = b"event: content_block_start\ndata: {\"type\":\"content_block_start\",\"content_block\":{\"type\":\"tool_use\",\"id\":\"t1\",\"name\":\"f\"}}\n\n";
        assert!(checker.check_chunk(chunk));
    }

    #[test]
    fn test_claude_text_deltas_accumulate() {
        let mut checker = StreamChecker::new();
        let delta = |t: &str| {
            format!(
                "data: {{\"type\":\"content_block_delta\",\"delta\":{{\"type\":\"text_delta\",\"text\":\"{}\"}}}}\n\n",
                t
            )
        };
        assert!(!checker.check_chunk(delta("hi").as_bytes()));
        assert!(checker.check_chunk(delta("!").as_bytes()));
    }

    #[test]
    fn test_frame_split_across_chunks() {
        let mut checker = StreamChecker::new();
        let frame = openai_chunk("hello");
        let (a, b) = frame.split_at(20);
        assert!(!checker.check_chunk(a.as_bytes()));
        assert!(checker.check_chunk(b.as_bytes()));
        assert_eq!(checker.accumulated_text(), "hello");
    }
}
