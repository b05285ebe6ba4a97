//! Minimal server-sent-events framing for chat-completion streams.
//!
//! Providers emit `data: <json>` lines separated by blank lines, with a
//! literal `data: [DONE]` sentinel at end of stream.

/// Incremental SSE line buffer. Feed raw bytes, drain complete `data:`
/// payloads.
#[derive(Default)]
pub struct SseBuffer {
    buf: String,
}

impl SseBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return the data payloads of all events completed
    /// by it.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.push_str(&String::from_utf8_lossy(bytes));

        let mut payloads = Vec::new();
        while let Some(pos) = self.buf.find("\n\n") {
            let event: String = self.buf.drain(..pos + 2).collect();
            payloads.extend(parse_event(&event));
        }
        payloads
    }

    /// Drain whatever remains after the byte stream ends.
    pub fn finish(&mut self) -> Vec<String> {
        let rest = std::mem::take(&mut self.buf);
        parse_event(&rest)
    }
}

fn parse_event(event: &str) -> Vec<String> {
    event
        .lines()
        .filter_map(|line| {
            let line = line.trim_end_matches('\r');
            line.strip_prefix("data:").map(|d| d.trim_start().to_owned())
        })
        .filter(|d| !d.is_empty())
        .collect()
}

/// The end-of-stream sentinel used by OpenAI-dialect providers.
pub const DONE_SENTINEL: &str = "[DONE]";
