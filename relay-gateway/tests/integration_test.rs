//! Integration tests for the chat relay.
//!
//! Tests the full HTTP API against a mock completion server and a
//! temporary chats directory.

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
};
use relay_common::config::{Config, StorageConfig, UpstreamConfig};
use relay_gateway::routes::{ErrorResponse, HealthResponse, MessageResponse, SaveChatResponse};
use relay_gateway::{build_router, Conversation};
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Test helper to create a router over an isolated chats directory.
fn create_test_app(temp_dir: &TempDir, upstream_url: &str) -> axum::Router {
    create_test_app_with(temp_dir, upstream_url, |_| {})
}

fn create_test_app_with(
    temp_dir: &TempDir,
    upstream_url: &str,
    customize: impl FnOnce(&mut Config),
) -> axum::Router {
    let mut config = Config {
        upstream: UpstreamConfig {
            base_url: upstream_url.to_string(),
            idle_timeout_secs: 5,
            ..Default::default()
        },
        storage: StorageConfig {
            chats_dir: Some(temp_dir.path().join("chats")),
            ..Default::default()
        },
        ..Default::default()
    };
    config.secrets.openai_api_key = Some("sk-test".into());
    customize(&mut config);

    build_router(&config).unwrap()
}

/// Helper to make a request and get JSON response.
async fn request_json<T: serde::de::DeserializeOwned>(
    app: &axum::Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, T) {
    let request = Request::builder().method(method).uri(uri);

    let request = if let Some(b) = body {
        request
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_string(&b).unwrap()))
            .unwrap()
    } else {
        request.body(Body::empty()).unwrap()
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let json: T = serde_json::from_slice(&body).unwrap();

    (status, json)
}

/// Helper to run a streaming request to completion and return the raw event text.
async fn request_stream(app: &axum::Router, uri: &str) -> (StatusCode, Option<String>, String) {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .map(|v| v.to_str().unwrap().to_string());
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();

    (status, content_type, String::from_utf8(body.to_vec()).unwrap())
}

fn completion_body(contents: &[&str]) -> String {
    let mut body = String::new();
    for content in contents {
        body.push_str(&format!(
            "data: {}\n\n",
            json!({"choices": [{"delta": {"content": content}}]})
        ));
    }
    body.push_str("data: [DONE]\n\n");
    body
}

async fn mock_upstream(response: ResponseTemplate) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(response)
        .mount(&server)
        .await;
    server
}

/// Extract the `data:` payloads of every event, in order.
fn data_lines(events: &str) -> Vec<&str> {
    events
        .lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Health Check Tests
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_health_check() {
    let temp_dir = TempDir::new().unwrap();
    let app = create_test_app(&temp_dir, "http://127.0.0.1:1");

    for uri in ["/health", "/api/health"] {
        let (status, health): (_, HealthResponse) =
            request_json(&app, Method::GET, uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(health.status, "healthy");
        assert_eq!(health.service, "relay-gateway");
    }
}

#[tokio::test]
async fn test_cors_allows_any_origin() {
    let temp_dir = TempDir::new().unwrap();
    let app = create_test_app(&temp_dir, "http://127.0.0.1:1");

    let request = Request::builder()
        .method(Method::GET)
        .uri("/health")
        .header(header::ORIGIN, "http://localhost:3000")
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(
        response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .unwrap(),
        "*"
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// Streaming Tests
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_message_streams_and_persists() {
    let upstream = mock_upstream(
        ResponseTemplate::new(200)
            .insert_header("content-type", "text/event-stream")
            .set_body_string(completion_body(&["Hel", "lo"])),
    )
    .await;
    let temp_dir = TempDir::new().unwrap();
    let app = create_test_app(&temp_dir, &upstream.uri());

    let (status, content_type, events) =
        request_stream(&app, "/api/message?message=Say%20hello&conversationId=c1&userId=u1").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type.as_deref(), Some("text/event-stream"));

    let data = data_lines(&events);
    let started: Value = serde_json::from_str(data[0]).unwrap();
    assert_eq!(started["conversationId"], "c1");
    let message_id = started["messageId"].as_str().unwrap();

    assert_eq!(&data[1..3], &["Hel", "Hello"]);
    assert!(events.contains(&format!("event: snapshot\nid: {}\ndata: Hello\n", message_id)));
    assert!(events.contains("event: saved\n"));
    assert_eq!(*data.last().unwrap(), "[DONE]");

    let stored = std::fs::read_to_string(temp_dir.path().join("chats").join("c1.json")).unwrap();
    let conversation: Conversation = serde_json::from_str(&stored).unwrap();
    assert_eq!(conversation.owner_id, "u1");
    let texts: Vec<_> = conversation.messages.iter().map(|m| m.text.as_str()).collect();
    assert_eq!(texts, vec!["Say hello", "Hello"]);
    assert_eq!(conversation.messages[1].id, message_id);
}

#[tokio::test]
async fn test_snapshot_reading_done_is_not_the_terminator() {
    let upstream = mock_upstream(
        ResponseTemplate::new(200).set_body_string(completion_body(&["[DONE]"])),
    )
    .await;
    let temp_dir = TempDir::new().unwrap();
    let app = create_test_app(&temp_dir, &upstream.uri());

    let (_, _, events) =
        request_stream(&app, "/api/message?message=echo&conversationId=c1&userId=u1").await;

    let blocks: Vec<_> = events.split("\n\n").filter(|b| !b.is_empty()).collect();
    let terminators: Vec<_> = blocks.iter().filter(|b| **b == "data: [DONE]").collect();
    assert_eq!(terminators.len(), 1);
    assert_eq!(*blocks.last().unwrap(), "data: [DONE]");
    assert!(blocks
        .iter()
        .any(|b| b.starts_with("event: snapshot\n") && b.ends_with("\ndata: [DONE]")));
    assert!(events.contains("event: saved\n"));

    let stored = std::fs::read_to_string(temp_dir.path().join("chats").join("c1.json")).unwrap();
    let conversation: Conversation = serde_json::from_str(&stored).unwrap();
    assert_eq!(conversation.messages[1].text, "[DONE]");
}

#[tokio::test]
async fn test_message_requires_text() {
    let temp_dir = TempDir::new().unwrap();
    let app = create_test_app(&temp_dir, "http://127.0.0.1:1");

    for uri in ["/api/message", "/api/message?message="] {
        let (status, error): (_, ErrorResponse) = request_json(&app, Method::GET, uri, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error.code, "INVALID_INPUT");
    }
}

#[tokio::test]
async fn test_upstream_failure_reports_error_and_skips_save() {
    let upstream = mock_upstream(
        ResponseTemplate::new(500).set_body_string(r#"{"error":{"message":"overloaded"}}"#),
    )
    .await;
    let temp_dir = TempDir::new().unwrap();
    let app = create_test_app(&temp_dir, &upstream.uri());

    let (status, _, events) =
        request_stream(&app, "/api/message?message=hi&conversationId=c1&userId=u1").await;

    assert_eq!(status, StatusCode::OK);
    assert!(events.contains("event: error\n"));
    assert!(events.contains("500"));
    assert!(!events.contains("event: saved"));
    assert!(events.ends_with("data: [DONE]\n\n"));
    assert!(!temp_dir.path().join("chats").join("c1.json").exists());
}

#[tokio::test]
async fn test_truncated_upstream_is_not_saved() {
    let upstream = mock_upstream(ResponseTemplate::new(200).set_body_string(format!(
        "data: {}\n\n",
        json!({"choices": [{"delta": {"content": "partial"}}]})
    )))
    .await;
    let temp_dir = TempDir::new().unwrap();
    let app = create_test_app(&temp_dir, &upstream.uri());

    let (_, _, events) =
        request_stream(&app, "/api/message?message=hi&conversationId=c1&userId=u1").await;

    assert!(events.contains("data: partial\n"));
    assert!(events.contains("event: error\n"));
    assert!(!temp_dir.path().join("chats").join("c1.json").exists());
}

#[tokio::test]
async fn test_follow_up_message_extends_conversation() {
    let upstream = mock_upstream(
        ResponseTemplate::new(200).set_body_string(completion_body(&["ok"])),
    )
    .await;
    let temp_dir = TempDir::new().unwrap();
    let app = create_test_app(&temp_dir, &upstream.uri());

    request_stream(&app, "/api/message?message=first&conversationId=c1&userId=u1").await;
    request_stream(&app, "/api/message?message=second&conversationId=c1&userId=u1").await;

    let (status, chats): (_, Vec<Conversation>) =
        request_json(&app, Method::GET, "/api/search-chats?userId=u1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(chats.len(), 1);
    let texts: Vec<_> = chats[0].messages.iter().map(|m| m.text.as_str()).collect();
    assert_eq!(texts, vec!["first", "ok", "second", "ok"]);
}

// ─────────────────────────────────────────────────────────────────────────────
// Save and Search Tests
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_save_chat_overwrites_by_id() {
    let temp_dir = TempDir::new().unwrap();
    let app = create_test_app(&temp_dir, "http://127.0.0.1:1");

    let message = |id: &str, text: &str| json!({"id": id, "speaker": "user", "text": text});

    let (status, saved): (_, SaveChatResponse) = request_json(
        &app,
        Method::POST,
        "/api/save-chat",
        Some(json!({"conversationId": "c1", "ownerId": "u1", "messages": [message("m1", "A")]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(saved.message, "Chat saved successfully");
    assert_eq!(saved.filename, "c1.json");

    let (status, _): (_, SaveChatResponse) = request_json(
        &app,
        Method::POST,
        "/api/save-chat",
        Some(json!({
            "conversationId": "c1",
            "ownerId": "u1",
            "messages": [message("m1", "A"), message("m2", "B")]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, chats): (_, Vec<Conversation>) =
        request_json(&app, Method::GET, "/api/search-chats?userId=u1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(chats.len(), 1);
    let texts: Vec<_> = chats[0].messages.iter().map(|m| m.text.as_str()).collect();
    assert_eq!(texts, vec!["A", "B"]);
}

#[tokio::test]
async fn test_save_chat_accepts_legacy_field_names() {
    let temp_dir = TempDir::new().unwrap();
    let app = create_test_app(&temp_dir, "http://127.0.0.1:1");

    let (status, saved): (_, SaveChatResponse) = request_json(
        &app,
        Method::POST,
        "/api/save-chat",
        Some(json!({
            "chatId": "legacy",
            "userId": "u7",
            "messages": [{"messageId": "m1", "speaker": "system", "text": "hi", "timestamp": "2024-01-01T00:00:00Z"}]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(saved.filename, "legacy.json");
}

#[tokio::test]
async fn test_save_chat_rejects_bad_input() {
    let temp_dir = TempDir::new().unwrap();
    let app = create_test_app(&temp_dir, "http://127.0.0.1:1");

    let (status, error): (_, ErrorResponse) = request_json(
        &app,
        Method::POST,
        "/api/save-chat",
        Some(json!({"conversationId": "../evil", "ownerId": "u1", "messages": []})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error.code, "INVALID_INPUT");

    let (status, _): (_, ErrorResponse) = request_json(
        &app,
        Method::POST,
        "/api/save-chat",
        Some(json!({"ownerId": "u1", "messages": []})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/save-chat")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_save_chat_body_limit() {
    let temp_dir = TempDir::new().unwrap();
    let app = create_test_app_with(&temp_dir, "http://127.0.0.1:1", |config| {
        config.server.max_body_bytes = 256;
    });

    let big = "x".repeat(1024);
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/save-chat")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({"conversationId": "c1", "ownerId": "u1", "messages": [{"id": "m1", "speaker": "user", "text": big}]})
                .to_string(),
        ))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_owner_ids_may_hold_any_text() {
    let upstream = mock_upstream(
        ResponseTemplate::new(200).set_body_string(completion_body(&["ok"])),
    )
    .await;
    let temp_dir = TempDir::new().unwrap();
    let app = create_test_app(&temp_dir, &upstream.uri());

    let (status, _): (_, SaveChatResponse) = request_json(
        &app,
        Method::POST,
        "/api/save-chat",
        Some(json!({"conversationId": "c1", "ownerId": "alice@example.com", "messages": []})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _, events) =
        request_stream(&app, "/api/message?message=hi&conversationId=c2&userId=john%20doe").await;
    assert_eq!(status, StatusCode::OK);
    assert!(events.contains("event: saved\n"));

    let (status, chats): (_, Vec<Conversation>) =
        request_json(&app, Method::GET, "/api/search-chats?userId=alice%40example.com", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(chats.len(), 1);
    assert_eq!(chats[0].conversation_id, "c1");

    let (status, chats): (_, Vec<Conversation>) =
        request_json(&app, Method::GET, "/api/search-chats?userId=john%20doe", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(chats[0].conversation_id, "c2");
    assert_eq!(chats[0].owner_id, "john doe");

    let (status, error): (_, ErrorResponse) = request_json(
        &app,
        Method::POST,
        "/api/save-chat",
        Some(json!({"conversationId": "c3", "ownerId": "   ", "messages": []})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error.code, "INVALID_INPUT");
}

#[tokio::test]
async fn test_search_without_matches_is_not_found() {
    let temp_dir = TempDir::new().unwrap();
    let app = create_test_app(&temp_dir, "http://127.0.0.1:1");

    let (status, body): (_, MessageResponse) =
        request_json(&app, Method::GET, "/api/search-chats?userId=nobody", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body.message, "No matching chats found");
}

#[tokio::test]
async fn test_search_without_user_returns_everything() {
    let temp_dir = TempDir::new().unwrap();
    let app = create_test_app(&temp_dir, "http://127.0.0.1:1");

    for (id, owner) in [("a", "u1"), ("b", "u2")] {
        let (status, _): (_, SaveChatResponse) = request_json(
            &app,
            Method::POST,
            "/api/save-chat",
            Some(json!({"conversationId": id, "ownerId": owner, "messages": []})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, chats): (_, Vec<Conversation>) =
        request_json(&app, Method::GET, "/api/search-chats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(chats.len(), 2);
}
