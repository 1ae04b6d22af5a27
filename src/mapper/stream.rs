//! Streaming re-framer: Anthropic SSE events -> OpenAI chat chunks.
//!
//! One state object with the partial-line buffer as its only stream-level
//! mutable field. `feed` accepts bytes chunked at arbitrary boundaries and
//! only ever re-encodes *complete* events; a trailing fragment stays
//! buffered until the next read. `flush` drains the remainder and appends
//! the synthetic terminal pair (closing usage chunk + `[DONE]`), so the
//! caller's stream contract holds even when upstream omits a terminator.

use std::collections::HashMap;

use serde_json::{json, Value};

use super::response::map_stop_reason;

/// Tracks one in-flight tool-use block by its Anthropic content index.
struct ToolCallState {
    id: String,
    /// Position in the OpenAI tool_calls array.
    index: u64,
}

/// Incremental SSE translator for one streamed response.
pub struct StreamReframer {
    buffer: String,
    message_id: String,
    model: String,
    created: i64,
    tool_calls: HashMap<u64, ToolCallState>,
    next_tool_index: u64,
    usage: Option<Value>,
    terminal_emitted: bool,
}

impl StreamReframer {
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
            message_id: String::new(),
            model: String::new(),
            created: chrono::Utc::now().timestamp(),
            tool_calls: HashMap::new(),
            next_tool_index: 0,
            usage: None,
            terminal_emitted: false,
        }
    }

    /// Consume a network read and return every frame it completes.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.push_str(&String::from_utf8_lossy(bytes));

        let mut frames = Vec::new();
        while let Some((event_end, sep_len)) = next_separator(&self.buffer) {
            let block: String = self.buffer[..event_end].to_string();
            self.buffer.drain(..event_end + sep_len);
            self.process_block(&block, &mut frames);
        }
        frames
    }

    /// Drain the buffer and emit the terminal pair. Call exactly once,
    /// after the upstream stream ends.
    pub fn flush(&mut self) -> Vec<String> {
        let mut frames = Vec::new();
        if !self.buffer.trim().is_empty() {
            let block = std::mem::take(&mut self.buffer);
            self.process_block(&block, &mut frames);
        }
        self.buffer.clear();

        if !self.terminal_emitted {
            let usage = self.usage.take();
            frames.push(self.encode(self.chunk(json!([]), usage)));
            self.terminal_emitted = true;
        }
        frames.push("data: [DONE]\n\n".to_string());
        frames
    }

    /// Handle one complete event block (the lines between separators).
    fn process_block(&mut self, block: &str, frames: &mut Vec<String>) {
        for line in block.lines() {
            let Some(data) = line
                .strip_prefix("data: ")
                .or_else(|| line.strip_prefix("data:"))
            else {
                // event:/id:/retry: fields and comments carry no payload.
                continue;
            };
            if data.trim() == "[DONE]" {
                continue;
            }
            match serde_json::from_str::<Value>(data) {
                Ok(event) => {
                    for chunk in self.convert(&event) {
                        frames.push(self.encode(chunk));
                    }
                }
                Err(error) => {
                    tracing::debug!(error = %error, "Skipping malformed stream event");
                }
            }
        }
    }

    /// Map one Anthropic stream event to zero or more OpenAI chunks.
    fn convert(&mut self, event: &Value) -> Vec<Value> {
        let mut chunks = Vec::new();
        match event["type"].as_str() {
            Some("message_start") => {
                self.message_id = event["message"]["id"].as_str().unwrap_or("").to_string();
                self.model = event["message"]["model"].as_str().unwrap_or("").to_string();
                self.tool_calls.clear();
                self.next_tool_index = 0;
                chunks.push(self.chunk(
                    json!([{
                        "index": 0,
                        "delta": {"role": "assistant", "content": ""},
                        "finish_reason": null,
                    }]),
                    None,
                ));
            }
            Some("content_block_start") => {
                let block = &event["content_block"];
                if block["type"] == "tool_use" {
                    let content_index = event["index"].as_u64().unwrap_or(0);
                    let state = ToolCallState {
                        id: block["id"].as_str().unwrap_or("").to_string(),
                        index: self.next_tool_index,
                    };
                    self.next_tool_index += 1;
                    chunks.push(self.chunk(
                        json!([{
                            "index": 0,
                            "delta": {"tool_calls": [{
                                "index": state.index,
                                "id": state.id,
                                "type": "function",
                                "function": {
                                    "name": block["name"].as_str().unwrap_or(""),
                                    "arguments": "",
                                },
                            }]},
                            "finish_reason": null,
                        }]),
                        None,
                    ));
                    self.tool_calls.insert(content_index, state);
                }
                // text blocks produce nothing until their deltas arrive;
                // server_tool_use blocks are internal and skipped.
            }
            Some("content_block_delta") => match event["delta"]["type"].as_str() {
                Some("text_delta") => {
                    chunks.push(self.chunk(
                        json!([{
                            "index": 0,
                            "delta": {"content": event["delta"]["text"].as_str().unwrap_or("")},
                            "finish_reason": null,
                        }]),
                        None,
                    ));
                }
                Some("input_json_delta") => {
                    let content_index = event["index"].as_u64().unwrap_or(0);
                    if let Some(state) = self.tool_calls.get(&content_index) {
                        chunks.push(self.chunk(
                            json!([{
                                "index": 0,
                                "delta": {"tool_calls": [{
                                    "index": state.index,
                                    "id": state.id,
                                    "type": "function",
                                    "function": {
                                        "arguments":
                                            event["delta"]["partial_json"].as_str().unwrap_or(""),
                                    },
                                }]},
                                "finish_reason": null,
                            }]),
                            None,
                        ));
                    }
                }
                _ => {}
            },
            Some("message_delta") => {
                let usage = &event["usage"];
                let input = usage["input_tokens"].as_u64().unwrap_or(0);
                let output = usage["output_tokens"].as_u64().unwrap_or(0);
                let cached = usage["cache_read_input_tokens"].as_u64().unwrap_or(0);
                let mut built = json!({
                    "prompt_tokens": input,
                    "completion_tokens": output,
                    "total_tokens": input + output,
                });
                if cached > 0 {
                    built["prompt_tokens_details"] = json!({"cached_tokens": cached});
                }
                self.usage = Some(built);

                let finish_reason =
                    map_stop_reason(event["delta"]["stop_reason"].as_str());
                chunks.push(self.chunk(
                    json!([{
                        "index": 0,
                        "delta": {},
                        "finish_reason": finish_reason,
                    }]),
                    None,
                ));
            }
            Some("message_stop") => {
                let usage = self.usage.take();
                chunks.push(self.chunk(json!([]), usage));
                self.terminal_emitted = true;
            }
            // ping, error, and unknown event types produce no frames.
            _ => {}
        }
        chunks
    }

    fn chunk(&self, choices: Value, usage: Option<Value>) -> Value {
        let mut chunk = json!({
            "id": self.message_id,
            "object": "chat.completion.chunk",
            "created": self.created,
            "model": self.model,
            "choices": choices,
        });
        if let Some(usage) = usage {
            chunk["usage"] = usage;
        }
        chunk
    }

    fn encode(&self, chunk: Value) -> String {
        format!("data: {chunk}\n\n")
    }
}

impl Default for StreamReframer {
    fn default() -> Self {
        Self::new()
    }
}

/// Earliest event separator in the buffer: `\n\n` or `\r\n\r\n`.
fn next_separator(buffer: &str) -> Option<(usize, usize)> {
    let lf = buffer.find("\n\n").map(|p| (p, 2));
    let crlf = buffer.find("\r\n\r\n").map(|p| (p, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if b.0 < a.0 { b } else { a }),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}
