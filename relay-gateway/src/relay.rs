//! Relay controller: drives one completion stream into a caller sink.
//!
//! The caller receives the cumulative text of the system message after
//! every fragment, tagged with the message id, so a late or reconnecting
//! renderer can always replace what it shows with the latest snapshot.

use crate::decoder::DecodedEvent;
use crate::models::Message;
use crate::upstream::{CompletionSource, EventStream, UpstreamError};
use async_trait::async_trait;
use futures_util::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// A frame handed from a relay session to the HTTP layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayFrame {
    /// Ids assigned to this exchange, sent before any content.
    Started {
        conversation_id: String,
        message_id: String,
    },
    /// Cumulative text of the streaming system message.
    Snapshot { message_id: String, text: String },
    /// The finished conversation was persisted.
    Saved { conversation_id: String },
    /// Persisting the finished conversation failed.
    SaveFailed { error: String },
    /// The upstream stream failed.
    Error { error: String },
    /// No further frames follow.
    Done,
}

/// Downstream side of a relay.
#[async_trait]
pub trait FragmentSink: Send + Sync {
    /// Deliver a frame. Returns `false` once the receiver is gone.
    async fn forward(&self, frame: RelayFrame) -> bool;

    /// Resolves when the receiver has gone away.
    async fn closed(&self);
}

#[async_trait]
impl FragmentSink for mpsc::Sender<RelayFrame> {
    async fn forward(&self, frame: RelayFrame) -> bool {
        self.send(frame).await.is_ok()
    }

    async fn closed(&self) {
        mpsc::Sender::closed(self).await
    }
}

/// How a relay ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayOutcome {
    /// The sentinel arrived; the message holds the full text.
    Completed(Message),
    /// The upstream stream failed before the sentinel.
    Failed(UpstreamError),
    /// The caller went away; `partial` holds the text received so far.
    Disconnected { partial: Message },
}

/// Starts relays against a completion source.
#[derive(Clone)]
pub struct RelayController {
    source: Arc<dyn CompletionSource>,
}

impl RelayController {
    pub fn new(source: Arc<dyn CompletionSource>) -> Self {
        Self { source }
    }

    /// Name of the underlying source.
    pub fn source_name(&self) -> &str {
        self.source.name()
    }

    /// Create the placeholder system message and prepare the upstream stream.
    ///
    /// No request is made until [`Relay::run`] polls the stream.
    pub fn begin(&self, prompt: &str) -> Relay {
        Relay {
            message: Message::system_placeholder(),
            events: self.source.open(prompt),
        }
    }
}

/// A single prepared relay.
pub struct Relay {
    message: Message,
    events: EventStream,
}

impl Relay {
    /// Id of the system message this relay fills.
    pub fn message_id(&self) -> &str {
        &self.message.id
    }

    /// Pump upstream events into `sink` until the sentinel, an upstream
    /// error, or a caller disconnect.
    pub async fn run<S>(self, sink: &S) -> RelayOutcome
    where
        S: FragmentSink + ?Sized,
    {
        let Relay {
            mut message,
            mut events,
        } = self;
        let mut fragments = 0usize;

        loop {
            let next = tokio::select! {
                biased;
                _ = sink.closed() => {
                    tracing::info!(fragments, "Caller disconnected, abandoning relay");
                    return RelayOutcome::Disconnected { partial: message };
                }
                event = events.next() => event,
            };

            match next {
                Some(Ok(DecodedEvent::Data(fragment))) => {
                    fragments += 1;
                    message.text.push_str(&fragment);

                    let snapshot = RelayFrame::Snapshot {
                        message_id: message.id.clone(),
                        text: message.text.clone(),
                    };
                    if !sink.forward(snapshot).await {
                        tracing::info!(fragments, "Caller disconnected, abandoning relay");
                        return RelayOutcome::Disconnected { partial: message };
                    }
                }
                Some(Ok(DecodedEvent::Done)) => {
                    tracing::info!(
                        fragments,
                        chars = message.text.chars().count(),
                        "Relay completed"
                    );
                    return RelayOutcome::Completed(message);
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, fragments, "Relay failed");
                    return RelayOutcome::Failed(e);
                }
                None => {
                    tracing::warn!(fragments, "Upstream stream ended without a result");
                    return RelayOutcome::Failed(UpstreamError::UnexpectedEof);
                }
            }
        }
    }
}
