use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Json, Response};

use crate::protocol::openai_chat::{ModelEntry, ModelList};
use crate::state::AppState;
use crate::util::unix_now_secs;

/// List every public model of the configured backends in `OpenAI` format.
#[must_use]
pub fn handler(State(state): State<Arc<AppState>>, headers: &HeaderMap) -> Response {
    if let Err(err) = state.authenticate(headers) {
        return err.into_response();
    }

    let created = unix_now_secs();
    let data = state
        .router
        .public_models()
        .iter()
        .map(|model| ModelEntry {
            id: model.id.clone(),
            object: "model",
            created,
            owned_by: model.owned_by.clone(),
        })
        .collect();

    Json(ModelList {
        object: "list",
        data,
    })
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, ClientAuthConfig, RelayBackendConfig, SessionBackendConfig};

    fn state() -> Arc<AppState> {
        Arc::new(
            AppState::from_config(AppConfig {
                session_backend: Some(SessionBackendConfig::default()),
                relay_backend: Some(RelayBackendConfig::default()),
                client_authentication: ClientAuthConfig {
                    allowed_keys: vec!["test-key".into()],
                },
                ..AppConfig::default()
            })
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_handler_lists_both_backends() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer test-key".parse().unwrap());
        let response = handler(State(state()), &headers);
        assert_eq!(response.status(), 200);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["object"], "list");
        let data = body["data"].as_array().unwrap();
        assert_eq!(data.len(), 10);
        assert_eq!(data[0]["id"], "gpt-4o-mini");
        assert_eq!(data[0]["owned_by"], "system");
        assert_eq!(data[9]["id"], "kimi-for-coding-thinking");
        assert_eq!(data[9]["owned_by"], "moonshot-ai");
        for entry in data {
            assert_eq!(entry["object"], "model");
            assert!(entry["created"].as_u64().unwrap() > 0);
        }
    }

    #[tokio::test]
    async fn test_handler_requires_key() {
        let response = handler(State(state()), &HeaderMap::new());
        assert_eq!(response.status(), 401);
    }
}
