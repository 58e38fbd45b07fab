//! Route definitions for the chat relay.
//!
//! Provides the streaming message endpoint, chat persistence and search,
//! and health checks.

use crate::models::{Conversation, Message};
use crate::relay::RelayController;
use crate::session::{MessageRequest, SessionOrchestrator};
use crate::sse::build_sse_response;
use crate::store::{create_store, ConversationStore};
use crate::upstream::{CompletionSource, OpenAiCompatibleClient};
use axum::{
    body::Body,
    extract::{rejection::JsonRejection, Query, State},
    http::{Response, StatusCode},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use relay_common::config::Config;
use relay_common::Error;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionOrchestrator>,
}

impl AppState {
    /// Wire the configured completion client and store together.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let client = OpenAiCompatibleClient::new(&config.upstream, config.api_key())?;
        let store = create_store(&config.storage);
        Ok(Self::new(Arc::new(client), store, config))
    }

    pub fn new(
        source: Arc<dyn CompletionSource>,
        store: Arc<dyn ConversationStore>,
        config: &Config,
    ) -> Self {
        tracing::info!(
            source = source.name(),
            model = source.model(),
            store = store.name(),
            "Relay state initialized"
        );
        let relay = RelayController::new(source);
        Self {
            sessions: Arc::new(SessionOrchestrator::new(relay, store, &config.relay)),
        }
    }
}

/// Error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Plain message body used by chat endpoints.
#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

/// Successful save response.
#[derive(Debug, Serialize, Deserialize)]
pub struct SaveChatResponse {
    pub message: String,
    pub filename: String,
}

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub service: String,
}

/// Query of the streaming endpoint.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageQuery {
    pub message: Option<String>,
    #[serde(alias = "chatId")]
    pub conversation_id: Option<String>,
    pub user_id: Option<String>,
}

/// Body of `POST /api/save-chat`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveChatRequest {
    #[serde(alias = "chatId")]
    pub conversation_id: Option<String>,
    #[serde(alias = "userId")]
    pub owner_id: Option<String>,
    #[serde(default)]
    pub messages: Vec<Message>,
}

/// Query of the search endpoint.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchQuery {
    pub user_id: Option<String>,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(err: Error) -> ApiError {
    let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() {
        tracing::error!(error = %err, "Request failed");
    } else {
        tracing::debug!(error = %err, "Request rejected");
    }
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
            code: err.code().into(),
        }),
    )
}

fn bad_request(error: impl Into<String>) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: error.into(),
            code: "INVALID_INPUT".into(),
        }),
    )
}

/// Build the relay routes over shared state.
pub fn build_routes(state: AppState) -> Router {
    Router::new()
        .route("/api/message", get(message_handler))
        .route("/api/save-chat", post(save_chat_handler))
        .route("/api/search-chats", get(search_chats_handler))
        .with_state(state)
        .merge(health_routes())
}

/// Build health check routes.
pub fn health_routes() -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/health", get(health_handler))
}

// ─────────────────────────────────────────────────────────────────────────────
// Chat Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Relay one message and stream the response as server-sent events.
async fn message_handler(
    State(state): State<AppState>,
    Query(query): Query<MessageQuery>,
) -> Result<Response<Body>, ApiError> {
    let request = MessageRequest {
        message: query.message.unwrap_or_default(),
        conversation_id: query.conversation_id,
        owner_id: query.user_id,
    };

    let frames = state.sessions.start(request).await.map_err(api_error)?;

    build_sse_response(frames).map_err(api_error)
}

/// Persist a whole conversation, replacing any previous version.
async fn save_chat_handler(
    State(state): State<AppState>,
    payload: Result<Json<SaveChatRequest>, JsonRejection>,
) -> Result<Json<SaveChatResponse>, ApiError> {
    let Json(request) = payload.map_err(|rejection| {
        (
            rejection.status(),
            Json(ErrorResponse {
                error: rejection.body_text(),
                code: "INVALID_INPUT".into(),
            }),
        )
    })?;

    let conversation_id = request
        .conversation_id
        .ok_or_else(|| bad_request("conversationId is required"))?;
    let owner_id = request
        .owner_id
        .ok_or_else(|| bad_request("ownerId is required"))?;

    let mut conversation = Conversation::new(conversation_id, owner_id);
    conversation.messages = request.messages;

    let filename = state.sessions.save(conversation).await.map_err(api_error)?;

    Ok(Json(SaveChatResponse {
        message: "Chat saved successfully".into(),
        filename,
    }))
}

/// List saved conversations, optionally filtered by owner.
async fn search_chats_handler(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Response<Body>, ApiError> {
    let found = match state.sessions.search(query.user_id.as_deref()).await {
        Ok(found) => found,
        Err(e) if e.is_not_found() => {
            tracing::debug!(error = %e, "Search matched nothing");
            return Ok((
                StatusCode::NOT_FOUND,
                Json(MessageResponse {
                    message: "No matching chats found".into(),
                }),
            )
                .into_response());
        }
        Err(e) => return Err(api_error(e)),
    };

    tracing::debug!(count = found.len(), "Chats found");
    Ok(Json(found).into_response())
}

// ─────────────────────────────────────────────────────────────────────────────
// Health
// ─────────────────────────────────────────────────────────────────────────────

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".into(),
        version: env!("CARGO_PKG_VERSION").into(),
        service: "relay-gateway".into(),
    })
}
