use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;

use super::{orchestrator, relay};
use crate::error::{into_axum_response, GatewayError};
use crate::observability::log_turn_failed;
use crate::protocol::openai_chat::ChatTurnRequest;
use crate::routing::{Backend, BodyProbe};
use crate::state::AppState;

/// `POST /v1/chat/completions`: authenticate, pick a backend, run the turn.
pub async fn handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(err) = state.authenticate(&headers) {
        return err.into_response();
    }

    let probe = BodyProbe::parse(&body);
    let backend = match state.router.select(&probe) {
        Ok(backend) => backend,
        Err(err) => return err.into_response(),
    };

    match backend {
        Backend::Relay => relay::forward(&state, &headers, body, probe).await,
        Backend::Session => {
            let request = match parse_turn_request(probe) {
                Ok(request) => request,
                Err(err) => return err.into_response(),
            };
            let model = request.model.clone();
            match orchestrator::run_turn(&state, request).await {
                Ok(response) => response,
                Err(err) => {
                    let response = into_axum_response(&err);
                    log_turn_failed(&model, response.status().as_u16(), &err);
                    response
                }
            }
        }
    }
}

fn parse_turn_request(probe: BodyProbe) -> Result<ChatTurnRequest, GatewayError> {
    let BodyProbe::Json(value) = probe else {
        return Err(GatewayError::InvalidRequest(
            "request body is not valid JSON".to_string(),
        ));
    };
    serde_json::from_value(value).map_err(|e| GatewayError::InvalidRequest(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_turn_request() {
        let request = parse_turn_request(BodyProbe::parse(
            br#"{"model":"grok-3","messages":[{"role":"user","content":"hi"}]}"#,
        ))
        .unwrap();
        assert_eq!(request.model, "grok-3");
        assert!(!request.is_stream());

        assert!(matches!(
            parse_turn_request(BodyProbe::parse(b"{oops")),
            Err(GatewayError::InvalidRequest(_))
        ));
        assert!(matches!(
            parse_turn_request(BodyProbe::parse(br#"{"messages":[]}"#)),
            Err(GatewayError::InvalidRequest(_))
        ));
    }
}
