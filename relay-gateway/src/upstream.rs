//! Streaming client for OpenAI-compatible chat completion APIs.
//!
//! [`CompletionSource::open`] returns a lazy [`EventStream`]: nothing is
//! sent until the stream is first polled, and every failure (connect,
//! status, transport, idle timeout, premature end) is yielded exactly once
//! as the final item.

use crate::decoder::{DecodedEvent, FrameDecoder};
use axum::body::Bytes;
use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use relay_common::config::UpstreamConfig;
use relay_common::util::loggable;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use serde::Serialize;
use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

/// Lazy sequence of decoded events from one completion request.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<DecodedEvent, UpstreamError>> + Send>>;

/// Transport-level failure of a completion stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpstreamError {
    #[error("Connection to completion API failed: {0}")]
    Connect(String),

    #[error("Completion API returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Completion stream interrupted: {0}")]
    Transport(String),

    #[error("No data from completion API for {0}s")]
    IdleTimeout(u64),

    #[error("Completion stream ended before the termination sentinel")]
    UnexpectedEof,
}

impl From<UpstreamError> for relay_common::Error {
    fn from(err: UpstreamError) -> Self {
        match err {
            UpstreamError::IdleTimeout(_) => Self::Timeout,
            other => Self::Upstream(other.to_string()),
        }
    }
}

/// A source of streamed completions.
pub trait CompletionSource: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Model requested from the source.
    fn model(&self) -> &str;

    /// Start a completion for a single user prompt.
    fn open(&self, prompt: &str) -> EventStream;
}

// ============================================================================
// OpenAI-compatible client
// ============================================================================

/// Streaming client for `POST /v1/chat/completions`.
pub struct OpenAiCompatibleClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    temperature: Option<f64>,
    max_tokens: Option<i64>,
    idle_timeout: Duration,
}

impl OpenAiCompatibleClient {
    /// Build a client from configuration.
    ///
    /// `api_key` is sent as a bearer token; without one the request carries
    /// no authorization header (local compatible servers).
    pub fn new(config: &UpstreamConfig, api_key: Option<&str>) -> relay_common::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));

        match api_key {
            Some(key) => {
                let value = HeaderValue::from_str(&format!("Bearer {}", key)).map_err(|_| {
                    relay_common::Error::Config("API key contains invalid header characters".into())
                })?;
                headers.insert(AUTHORIZATION, value);
            }
            None => tracing::warn!("No completion API key configured, sending unauthenticated requests"),
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| relay_common::Error::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            idle_timeout: Duration::from_secs(config.idle_timeout_secs),
        })
    }

    fn completions_url(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }

    fn build_request(&self, prompt: &str) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".into(),
                content: prompt.to_string(),
            }],
            stream: true,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

impl CompletionSource for OpenAiCompatibleClient {
    fn name(&self) -> &str {
        "openai-compatible"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn open(&self, prompt: &str) -> EventStream {
        let url = self.completions_url();
        tracing::debug!(url = %url, model = %self.model, "Opening completion stream");

        let request = self.client.post(url).json(&self.build_request(prompt));
        event_stream(request, self.idle_timeout)
    }
}

// ============================================================================
// Stream state machine
// ============================================================================

enum StreamState {
    Pending(reqwest::RequestBuilder),
    Streaming {
        body: BoxStream<'static, reqwest::Result<Bytes>>,
        decoder: FrameDecoder,
        queue: VecDeque<DecodedEvent>,
        eof: bool,
    },
    Ended,
}

fn event_stream(request: reqwest::RequestBuilder, idle_timeout: Duration) -> EventStream {
    let state = StreamState::Pending(request);
    stream::unfold(state, move |state| next_event(state, idle_timeout)).boxed()
}

async fn next_event(
    mut state: StreamState,
    idle_timeout: Duration,
) -> Option<(Result<DecodedEvent, UpstreamError>, StreamState)> {
    loop {
        state = match state {
            StreamState::Ended => return None,

            StreamState::Pending(request) => match request.send().await {
                Err(e) => {
                    tracing::error!(error = %e, "Completion request failed");
                    return Some((Err(UpstreamError::Connect(e.to_string())), StreamState::Ended));
                }
                Ok(response) if !response.status().is_success() => {
                    let status = response.status().as_u16();
                    let body = response.text().await.unwrap_or_default();
                    let body = loggable(&body, 500);
                    tracing::error!(status, body = %body, "Completion API rejected request");
                    return Some((Err(UpstreamError::Status { status, body }), StreamState::Ended));
                }
                Ok(response) => StreamState::Streaming {
                    body: response.bytes_stream().boxed(),
                    decoder: FrameDecoder::new(),
                    queue: VecDeque::new(),
                    eof: false,
                },
            },

            StreamState::Streaming {
                mut body,
                mut decoder,
                mut queue,
                eof,
            } => {
                if let Some(event) = queue.pop_front() {
                    // Dropping the body after the sentinel releases the connection.
                    let next = if event == DecodedEvent::Done {
                        StreamState::Ended
                    } else {
                        StreamState::Streaming {
                            body,
                            decoder,
                            queue,
                            eof,
                        }
                    };
                    return Some((Ok(event), next));
                }

                if eof {
                    tracing::warn!("Completion stream closed without termination sentinel");
                    return Some((Err(UpstreamError::UnexpectedEof), StreamState::Ended));
                }

                match tokio::time::timeout(idle_timeout, body.next()).await {
                    Err(_) => {
                        let secs = idle_timeout.as_secs();
                        tracing::error!(idle_secs = secs, "Completion stream went idle");
                        return Some((Err(UpstreamError::IdleTimeout(secs)), StreamState::Ended));
                    }
                    Ok(Some(Err(e))) => {
                        tracing::error!(error = %e, "Completion stream transport error");
                        return Some((
                            Err(UpstreamError::Transport(e.to_string())),
                            StreamState::Ended,
                        ));
                    }
                    Ok(Some(Ok(chunk))) => {
                        queue.extend(decoder.push(&chunk));
                        StreamState::Streaming {
                            body,
                            decoder,
                            queue,
                            eof: false,
                        }
                    }
                    Ok(None) => {
                        queue.extend(decoder.finish());
                        StreamState::Streaming {
                            body,
                            decoder,
                            queue,
                            eof: true,
                        }
                    }
                }
            }
        };
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<i64>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}
