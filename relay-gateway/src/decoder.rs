//! Frame decoder for the completion API's server-sent event stream.
//!
//! The upstream body arrives as arbitrary byte chunks. A chunk may end in
//! the middle of a line, or in the middle of a multi-byte UTF-8 character.
//! [`FrameDecoder`] carries the unterminated tail between chunks, so the
//! decoded sequence is the same however the body was split.

use relay_common::util::loggable;
use serde::Deserialize;

/// Prefix of the lines that carry a payload.
pub const DATA_PREFIX: &str = "data:";

/// Payload that terminates the stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// One parsed unit of the upstream stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedEvent {
    /// A non-empty content fragment
    Data(String),
    /// The termination sentinel
    Done,
}

// ============================================================================
// Payload decoding
// ============================================================================

#[derive(Debug, Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Decode one `data:` payload into its content fragment.
///
/// Returns `Ok(None)` for well-formed records without content (role
/// announcements, finish markers, empty deltas).
pub fn decode_payload(payload: &str) -> Result<Option<String>, serde_json::Error> {
    let chunk: CompletionChunk = serde_json::from_str(payload)?;

    if let Some(error) = &chunk.error {
        tracing::warn!(error = %loggable(&error.to_string(), 300), "Upstream sent an error frame");
    }

    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta)
        .and_then(|delta| delta.content)
        .filter(|content| !content.is_empty()))
}

/// Decode a single complete line.
fn decode_line(line: &str) -> Option<DecodedEvent> {
    let line = line.trim();
    let payload = line.strip_prefix(DATA_PREFIX)?.trim_start();

    if payload == DONE_SENTINEL {
        return Some(DecodedEvent::Done);
    }
    if payload.is_empty() {
        return None;
    }

    match decode_payload(payload) {
        Ok(content) => content.map(DecodedEvent::Data),
        Err(e) => {
            tracing::warn!(
                error = %e,
                payload = %loggable(payload, 200),
                "Dropping undecodable upstream frame"
            );
            None
        }
    }
}

// ============================================================================
// Decoder
// ============================================================================

#[derive(Debug)]
enum DecoderState {
    /// Still reading; holds the bytes after the last newline seen.
    Open { residual: Vec<u8> },
    /// The sentinel was seen or the input was flushed.
    Finished,
}

/// Stateful line reassembler for the upstream byte stream.
#[derive(Debug)]
pub struct FrameDecoder {
    state: DecoderState,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            state: DecoderState::Open {
                residual: Vec::new(),
            },
        }
    }

    /// Whether the decoder has stopped accepting input.
    pub fn is_finished(&self) -> bool {
        matches!(self.state, DecoderState::Finished)
    }

    /// Feed one chunk and return the events completed by it.
    ///
    /// Once [`DecodedEvent::Done`] has been returned, later lines in the same
    /// chunk and every later chunk are ignored.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<DecodedEvent> {
        let DecoderState::Open { residual } = &mut self.state else {
            return Vec::new();
        };
        residual.extend_from_slice(chunk);

        let mut events = Vec::new();
        let mut start = 0;
        let mut finished = false;

        while let Some(offset) = residual[start..].iter().position(|&b| b == b'\n') {
            let end = start + offset;
            let line = String::from_utf8_lossy(&residual[start..end]);
            start = end + 1;

            if let Some(event) = decode_line(&line) {
                let done = event == DecodedEvent::Done;
                events.push(event);
                if done {
                    finished = true;
                    break;
                }
            }
        }

        if finished {
            self.state = DecoderState::Finished;
        } else {
            residual.drain(..start);
        }

        events
    }

    /// Flush the unterminated tail at end of input.
    pub fn finish(&mut self) -> Vec<DecodedEvent> {
        let state = std::mem::replace(&mut self.state, DecoderState::Finished);
        match state {
            DecoderState::Open { residual } if !residual.is_empty() => {
                decode_line(&String::from_utf8_lossy(&residual))
                    .into_iter()
                    .collect()
            }
            _ => Vec::new(),
        }
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}
