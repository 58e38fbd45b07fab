//! Relay Gateway - streams chat completions to callers and persists conversations.
//!
//! This crate provides the relay service:
//! - Incremental decoding of the completion API's event stream
//! - A streaming client for OpenAI-compatible completion APIs
//! - Live forwarding of response snapshots as server-sent events
//! - File-backed conversation storage with search by owner
//!
//! ## Architecture
//!
//! ```text
//! Caller ← SSE ← Session (relay → persist) ← Upstream client ← Completion API
//!                          ↓
//!                 Conversation store
//! ```

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod decoder;
pub mod locks;
pub mod models;
pub mod relay;
pub mod routes;
pub mod session;
pub mod sse;
pub mod store;
pub mod upstream;

pub use decoder::{DecodedEvent, FrameDecoder};
pub use models::{Conversation, Message, Speaker};
pub use relay::{FragmentSink, RelayController, RelayFrame, RelayOutcome};
pub use routes::AppState;
pub use session::{MessageRequest, SessionOrchestrator};
pub use store::{ConversationStore, FileConversationStore, MemoryConversationStore};
pub use upstream::{CompletionSource, OpenAiCompatibleClient, UpstreamError};

use axum::extract::DefaultBodyLimit;
use axum::Router;
use relay_common::config::Config;
use std::net::SocketAddr;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

/// Build the relay router from configuration.
pub fn build_router(config: &Config) -> anyhow::Result<Router> {
    let state = AppState::from_config(config)?;
    Ok(build_router_with_state(state, config.server.max_body_bytes))
}

/// Build the relay router over prepared state, with all middleware.
pub fn build_router_with_state(state: AppState, max_body_bytes: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::DEBUG))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    routes::build_routes(state)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(cors)
        .layer(trace_layer)
}

/// Start the relay server and run until shutdown.
pub async fn start_server(config: &Config) -> anyhow::Result<()> {
    let addr = SocketAddr::from((
        config.bind_address().parse::<std::net::IpAddr>()?,
        config.port(),
    ));

    let router = build_router(config)?;

    tracing::info!(endpoint = %config.endpoint(), "Starting chat relay");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Chat relay stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
