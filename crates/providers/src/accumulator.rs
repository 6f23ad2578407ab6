//! Reassembles streamed SSE frames into one response buffer.
//!
//! The raw buffer only ever grows. While streaming, callers render
//! [`StreamAccumulator::visible`], which hides complete and still-open
//! directive tokens; once the stream is done, [`StreamAccumulator::finish`]
//! runs the full directive grammar over the raw text.

use serde::Deserialize;
use shared::directives::{mask_directives, parse_directives, DirectiveResult};

use crate::sse::{SseFrame, SseParser};

// ── Streaming payload types ──────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

/// What one call to `feed` changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    /// New text was appended to the raw buffer
    pub appended: bool,
    /// The end-of-stream sentinel has been seen
    pub done: bool,
}

#[derive(Debug, Default)]
pub struct StreamAccumulator {
    parser: SseParser,
    raw: String,
    done: bool,
    /// Frames whose payload was not a valid delta object
    skipped_frames: usize,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk of bytes from the transport.
    pub fn feed(&mut self, chunk: &[u8]) -> Progress {
        if self.done {
            return self.progress(false);
        }
        let frames = self.parser.feed(chunk);
        self.apply(frames)
    }

    /// The transport closed; handle a trailing frame without its blank line.
    pub fn flush(&mut self) -> Progress {
        if self.done {
            return self.progress(false);
        }
        let frames: Vec<SseFrame> = self.parser.flush().into_iter().collect();
        self.apply(frames)
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn skipped_frames(&self) -> usize {
        self.skipped_frames
    }

    /// Safe-to-render projection of the response so far.
    pub fn visible(&self) -> String {
        mask_directives(&self.raw)
    }

    /// Authoritative parse of the full response.
    pub fn finish(&self) -> DirectiveResult {
        parse_directives(&self.raw)
    }

    fn apply(&mut self, frames: Vec<SseFrame>) -> Progress {
        let mut appended = false;
        for frame in frames {
            match frame {
                SseFrame::Done => {
                    self.done = true;
                    break;
                }
                SseFrame::Data(payload) => match extract_delta(&payload) {
                    Ok(Some(text)) if !text.is_empty() => {
                        self.raw.push_str(&text);
                        appended = true;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        self.skipped_frames += 1;
                        tracing::debug!("skipping malformed stream frame: {}", e);
                    }
                },
            }
        }
        self.progress(appended)
    }

    fn progress(&self, appended: bool) -> Progress {
        Progress {
            appended,
            done: self.done,
        }
    }
}

/// Pull `choices[0].delta.content` out of one frame payload.
fn extract_delta(payload: &str) -> Result<Option<String>, serde_json::Error> {
    let resp: StreamResponse = serde_json::from_str(payload)?;
    Ok(resp
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content))
}
