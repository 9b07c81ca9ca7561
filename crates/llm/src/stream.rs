//! SSE decoding for streaming chat completions.
//!
//! The wire format is newline-delimited `data: <json>` events with a literal
//! `data: [DONE]` terminator.  Network chunks can split an event anywhere,
//! including mid-line and mid-UTF-8-sequence, so the decoder buffers raw
//! bytes and only interprets complete lines.

use std::pin::Pin;

use futures::stream::{Stream, StreamExt};
use serde::Deserialize;
use tracing::debug;

use crate::LlmError;

/// One decoded increment of an assistant turn.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamFragment {
    /// Text appended to the turn's content, when present.
    pub content: Option<String>,
    /// Partial tool-call updates, keyed by slot index within the turn.
    pub tool_calls: Vec<ToolCallDelta>,
}

/// A partial update for the tool call occupying one slot of the current
/// assistant turn.  `id` and the function name normally arrive once, on the
/// first delta for the slot; `arguments` arrives in pieces that must be
/// concatenated.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ToolCallDelta {
    pub index: usize,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub function: Option<FunctionDelta>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FunctionDelta {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}

// Raw shape of one `data:` payload.
#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    delta: ChunkDelta,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallDelta>>,
}

impl ChatChunk {
    fn into_fragment(self) -> Option<StreamFragment> {
        let choice = self.choices.into_iter().next()?;
        let content = choice.delta.content.filter(|text| !text.is_empty());
        let tool_calls = choice.delta.tool_calls.unwrap_or_default();
        if content.is_none() && tool_calls.is_empty() {
            return None;
        }
        Some(StreamFragment {
            content,
            tool_calls,
        })
    }
}

// ── decoder ──────────────────────────────────────────────────────────────────

/// Incremental line decoder for the event stream.  Feed it network chunks as
/// they arrive; it yields the fragments completed by each chunk and holds
/// any trailing partial line until the next one.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
    done: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once the `[DONE]` sentinel has been seen; later input is ignored.
    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamFragment> {
        if self.done {
            return Vec::new();
        }
        self.buf.extend_from_slice(chunk);

        let mut fragments = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let trimmed = line.trim();

            // Blank separators and SSE comment lines carry no data.
            if trimmed.is_empty() || trimmed.starts_with(':') {
                continue;
            }
            if trimmed == "data: [DONE]" {
                self.done = true;
                break;
            }
            let Some(data) = trimmed.strip_prefix("data: ") else {
                continue;
            };
            match serde_json::from_str::<ChatChunk>(data) {
                Ok(chunk) => {
                    if let Some(fragment) = chunk.into_fragment() {
                        fragments.push(fragment);
                    }
                }
                Err(err) => {
                    // Malformed chunks are dropped, never fatal.
                    debug!(%err, "skipping malformed stream chunk");
                }
            }
        }
        fragments
    }
}

// ── response adapter ─────────────────────────────────────────────────────────

pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<StreamFragment, LlmError>> + Send>>;

/// Convert an open SSE response into a lazy fragment sequence.  Dropping the
/// returned stream drops the response and closes the connection.
pub(crate) fn into_fragment_stream(response: reqwest::Response) -> FragmentStream {
    let stream = response
        .bytes_stream()
        .scan(SseDecoder::new(), |decoder, chunk| {
            let items: Vec<Result<StreamFragment, LlmError>> = match chunk {
                Ok(bytes) => decoder.feed(&bytes).into_iter().map(Ok).collect(),
                Err(err) => vec![Err(LlmError::Http(err))],
            };
            async move { Some(items) }
        })
        .flat_map(futures::stream::iter);
    Box::pin(stream)
}

// ── Tests ────────────────────────────────────────────────────────────────────
