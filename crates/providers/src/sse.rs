//! Shared SSE (Server-Sent Events) parser for the proxy's streaming responses.
//!
//! SSE format: frames separated by a blank line, each payload line prefixed
//! with `data:`. The literal payload `[DONE]` ends the stream.

/// Payload that marks graceful end of stream; never parsed as JSON.
pub const DONE_SENTINEL: &str = "[DONE]";

/// A single parsed SSE frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseFrame {
    /// The `data:` content with the marker stripped.
    Data(String),
    /// The terminal `[DONE]` frame.
    Done,
}

/// Incremental SSE parser that buffers incomplete frames across chunk boundaries.
///
/// Bytes are decoded as UTF-8 incrementally, so a multi-byte character split
/// between two chunks is held back until its remaining bytes arrive.
#[derive(Debug, Default)]
pub struct SseParser {
    /// Undecoded tail of an incomplete UTF-8 sequence
    pending: Vec<u8>,
    buffer: String,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes from the HTTP response. Returns any complete frames found.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.decode(chunk);
        if self.buffer.contains('\r') {
            self.buffer = self.buffer.replace("\r\n", "\n");
        }

        let mut frames = Vec::new();

        // Split on double newline (SSE frame boundary)
        while let Some(boundary) = self.buffer.find("\n\n") {
            let block: String = self.buffer.drain(..boundary + 2).collect();
            if let Some(frame) = parse_block(&block) {
                frames.push(frame);
            }
        }

        frames
    }

    /// Parse whatever is left once the transport closes without a final blank line.
    pub fn flush(&mut self) -> Option<SseFrame> {
        if !self.pending.is_empty() {
            let tail = std::mem::take(&mut self.pending);
            self.buffer.push_str(&String::from_utf8_lossy(&tail));
        }
        let block = std::mem::take(&mut self.buffer);
        parse_block(&block)
    }

    fn decode(&mut self, chunk: &[u8]) {
        self.pending.extend_from_slice(chunk);
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    self.buffer.push_str(text);
                    self.pending.clear();
                    return;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    self.buffer
                        .push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match err.error_len() {
                        // Incomplete sequence at the end; wait for more bytes
                        None => {
                            self.pending.drain(..valid);
                            return;
                        }
                        Some(len) => {
                            self.buffer.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + len);
                        }
                    }
                }
            }
        }
    }
}

fn parse_block(block: &str) -> Option<SseFrame> {
    let data_lines: Vec<&str> = block
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|val| val.strip_prefix(' ').unwrap_or(val))
        .collect();
    // Ignore other fields (event:, id:, retry:, comments starting with :)

    let data = data_lines.join("\n");
    let data = data.trim();
    if data.is_empty() {
        None
    } else if data == DONE_SENTINEL {
        Some(SseFrame::Done)
    } else {
        Some(SseFrame::Data(data.to_string()))
    }
}
