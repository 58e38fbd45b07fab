//! Server-sent event encoding of relay frames.
//!
//! Every frame except the final `data: [DONE]` carries an `event:` name, so
//! a snapshot whose text is exactly `[DONE]` never reads as the end of the
//! stream.

use crate::decoder::DONE_SENTINEL;
use crate::relay::RelayFrame;
use axum::body::{Body, Bytes};
use axum::http::{header, Response, StatusCode};
use futures_util::stream;
use relay_common::{Error, Result};
use std::convert::Infallible;
use tokio::sync::mpsc;

// ============================================================================
// Frame encoding
// ============================================================================

/// Append `data:` lines for `text`, one per line of text.
fn push_data(out: &mut String, text: &str) {
    let normalized = text.replace("\r\n", "\n").replace('\r', "\n");
    for line in normalized.split('\n') {
        out.push_str("data: ");
        out.push_str(line);
        out.push('\n');
    }
}

fn event(name: &str, data: &str) -> String {
    let mut out = format!("event: {}\n", name);
    push_data(&mut out, data);
    out.push('\n');
    out
}

/// Event name of cumulative text snapshots.
pub const SNAPSHOT_EVENT: &str = "snapshot";

/// Encode one frame as a complete SSE event, including the blank line.
pub fn encode_frame(frame: &RelayFrame) -> String {
    match frame {
        RelayFrame::Started {
            conversation_id,
            message_id,
        } => event(
            "conversation",
            &serde_json::json!({
                "conversationId": conversation_id,
                "messageId": message_id,
            })
            .to_string(),
        ),
        RelayFrame::Snapshot { message_id, text } => {
            let mut out = format!("event: {}\nid: {}\n", SNAPSHOT_EVENT, message_id);
            push_data(&mut out, text);
            out.push('\n');
            out
        }
        RelayFrame::Saved { conversation_id } => event(
            "saved",
            &serde_json::json!({ "conversationId": conversation_id }).to_string(),
        ),
        RelayFrame::SaveFailed { error } => event("save-error", error),
        RelayFrame::Error { error } => event("error", error),
        RelayFrame::Done => format!("data: {}\n\n", DONE_SENTINEL),
    }
}

// ============================================================================
// SSE response builder
// ============================================================================

/// Stream the frames of one session as a `text/event-stream` response.
///
/// Dropping the response body drops the receiver, which the relay observes
/// as a caller disconnect.
pub fn build_sse_response(frames: mpsc::Receiver<RelayFrame>) -> Result<Response<Body>> {
    let body = stream::unfold(frames, |mut frames| async move {
        let frame = frames.recv().await?;
        let bytes = Bytes::from(encode_frame(&frame));
        Some((Ok::<_, Infallible>(bytes), frames))
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .header("X-Accel-Buffering", "no")
        .body(Body::from_stream(body))
        .map_err(|e| Error::Internal(format!("failed to build event stream: {}", e)))
}
