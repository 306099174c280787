use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chat2api::config::{AppConfig, RelayBackendConfig, ServerConfig, SessionBackendConfig};
use chat2api::routing::dispatch::dispatch_request;
use chat2api::state::AppState;

fn build_state(config: AppConfig) -> Arc<AppState> {
    Arc::new(AppState::from_config(config).expect("state"))
}

fn session_only() -> AppConfig {
    AppConfig {
        session_backend: Some(SessionBackendConfig::default()),
        ..AppConfig::default()
    }
}

async fn call(
    state: &Arc<AppState>,
    base_path: &str,
    method: &str,
    uri: &str,
    body: Body,
) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(body)
        .expect("request");
    let response = dispatch_request(Arc::clone(state), Arc::<str>::from(base_path), request)
        .await
        .expect("dispatch");
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let payload = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    (status, payload)
}

#[tokio::test]
async fn test_root_returns_banner() {
    let state = build_state(AppConfig {
        server: ServerConfig {
            banner: "gateway up".to_string(),
            ..ServerConfig::default()
        },
        ..session_only()
    });
    let (status, payload) = call(&state, "", "GET", "/", Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(payload, serde_json::json!({ "message": "gateway up" }));
}

#[tokio::test]
async fn test_unknown_path_and_wrong_method() {
    let state = build_state(session_only());
    let (status, payload) = call(&state, "", "GET", "/v1/embeddings", Body::empty()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(payload["error"], "Not Found");

    let (status, payload) = call(&state, "", "GET", "/v1/chat/completions", Body::empty()).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    assert!(payload["error"].is_string());
}

#[tokio::test]
async fn test_base_path_prefix() {
    let state = build_state(session_only());
    let (status, _) = call(&state, "/api", "GET", "/api/v1/models", Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = call(&state, "/api", "GET", "/v1/models", Body::empty()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_body_limit() {
    let state = build_state(session_only());
    let oversized = vec![b'a'; 2 * 1024 * 1024 + 1];
    let (status, _) = call(
        &state,
        "",
        "POST",
        "/v1/chat/completions",
        Body::from(oversized),
    )
    .await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_conversation_ids_are_unique_uuids() {
    let state = build_state(session_only());
    let (status, first) = call(&state, "", "POST", "/v1/conversations", Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    let (_, second) = call(&state, "", "POST", "/v1/conversations", Body::empty()).await;
    let first = first["conversation_id"].as_str().expect("id");
    let second = second["conversation_id"].as_str().expect("id");
    assert_ne!(first, second);
    assert!(uuid_shaped(first));
    assert_eq!(state.sessions.len(), 2);
}

#[tokio::test]
async fn test_conversations_require_session_backend() {
    let state = build_state(AppConfig {
        relay_backend: Some(RelayBackendConfig::default()),
        ..AppConfig::default()
    });
    let (status, payload) = call(&state, "", "POST", "/v1/conversations", Body::empty()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(payload["error"]
        .as_str()
        .expect("message")
        .starts_with("Invalid request:"));
}

#[tokio::test]
async fn test_capacity_limit_returns_429() {
    let state = build_state(AppConfig {
        server: ServerConfig {
            max_sessions: Some(1),
            ..ServerConfig::default()
        },
        ..session_only()
    });
    let (status, _) = call(&state, "", "POST", "/v1/conversations", Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    let (status, payload) = call(&state, "", "POST", "/v1/conversations", Body::empty()).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert!(payload["error"]
        .as_str()
        .expect("message")
        .starts_with("Capacity error:"));
}

#[tokio::test]
async fn test_models_session_only() {
    let state = build_state(session_only());
    let (status, payload) = call(&state, "", "GET", "/v1/models", Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<&str> = payload["data"]
        .as_array()
        .expect("data")
        .iter()
        .map(|m| m["id"].as_str().expect("id"))
        .collect();
    assert_eq!(
        ids,
        [
            "gpt-4o-mini",
            "gpt-5-nano",
            "gemini-2.5-pro",
            "deepseek-v3",
            "claude-3.5-sonnet",
            "grok-3",
            "meta-llama-3",
            "qwen3-max"
        ]
    );
}

fn uuid_shaped(id: &str) -> bool {
    let groups: Vec<usize> = id.split('-').map(str::len).collect();
    groups == [8, 4, 4, 4, 12]
}
