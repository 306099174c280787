//! Raw pass-through to an OpenAI-shaped relay upstream.

use std::convert::Infallible;

use axum::body::Body;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use http::header::{HeaderValue, CACHE_CONTROL, CONTENT_TYPE};
use http_body_util::BodyExt;
use serde_json::{json, Value};

use crate::error::GatewayError;
use crate::routing::{BackendRouter, BodyProbe};
use crate::state::AppState;
use crate::stream::sse::openai_sse_frame;
use crate::transport::{strip_response_headers, PreparedRelay};

/// Forward one chat request to the relay upstream.
///
/// Streaming requests always answer 200 with an event stream; upstream and
/// transport failures arrive as a single error event. Buffered requests
/// return the upstream status, headers and body.
pub async fn forward(
    state: &AppState,
    headers: &HeaderMap,
    body: Bytes,
    probe: BodyProbe,
) -> Response {
    let Some(relay) = state.relay.as_ref() else {
        return GatewayError::Internal("relay backend is not configured".to_string())
            .into_response();
    };

    let stream = probe.stream();
    let body = match rewrite_virtual_model(&state.router, probe) {
        Ok(Some(rewritten)) => rewritten,
        Ok(None) => body,
        Err(err) => return err.into_response(),
    };
    let upstream_headers = relay.outbound_headers(headers);

    if stream {
        forward_streaming(state, relay, &upstream_headers, body).await
    } else {
        forward_buffered(state, relay, &upstream_headers, body).await
    }
}

/// Rewrite a virtual model to its target and set its flag.
///
/// Returns `None` when the body must be forwarded untouched.
fn rewrite_virtual_model(
    router: &BackendRouter,
    probe: BodyProbe,
) -> Result<Option<Bytes>, GatewayError> {
    let Some(alias) = probe.model().and_then(|model| router.virtual_model(model)) else {
        return Ok(None);
    };
    let BodyProbe::Json(Value::Object(mut body)) = probe else {
        return Ok(None);
    };

    tracing::debug!(target_model = %alias.target, flag = %alias.flag, "rewriting virtual model");
    body.insert("model".to_string(), Value::String(alias.target.clone()));
    body.insert(alias.flag.clone(), Value::Bool(true));
    serde_json::to_vec(&body)
        .map(|bytes| Some(Bytes::from(bytes)))
        .map_err(|e| GatewayError::Internal(format!("failed to encode relay body: {e}")))
}

async fn forward_streaming(
    state: &AppState,
    relay: &PreparedRelay,
    headers: &HeaderMap,
    body: Bytes,
) -> Response {
    let response = match state
        .transport
        .send_passthrough(relay.chat_url(), http::Method::POST, headers, body)
        .await
    {
        Ok(response) => response,
        Err(err) => {
            tracing::error!(error = %err, "relay stream request failed");
            return sse_error_response(&proxy_failure_message(&err), "proxy_error");
        }
    };

    let status = response.status();
    if !status.is_success() {
        let body = match response.into_body().collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(err) => {
                tracing::warn!(error = %err, "failed to read relay error body");
                Bytes::new()
            }
        };
        let body = String::from_utf8_lossy(&body);
        tracing::error!(status = status.as_u16(), "relay upstream returned an error");
        return sse_error_response(
            &format!("Upstream API error: {} - {body}", status.as_u16()),
            "upstream_error",
        );
    }

    let relayed_body = Body::from_stream(relay_event_stream(response.into_body()));
    let mut relayed = Response::new(relayed_body);
    set_event_stream_headers(relayed.headers_mut());
    relayed
}

/// Pass upstream chunks through untouched. A read error after the stream has
/// started ends it with one `proxy_error` event instead of aborting the
/// client connection.
fn relay_event_stream(upstream: Body) -> impl Stream<Item = Result<Bytes, Infallible>> + Send {
    futures_util::stream::unfold(Some(upstream.into_data_stream()), |upstream| async move {
        let mut upstream = upstream?;
        match upstream.next().await? {
            Ok(chunk) => Some((Ok(chunk), Some(upstream))),
            Err(err) => {
                tracing::error!(error = %err, "relay stream interrupted");
                let frame = proxy_error_frame(&proxy_failure_message(&err), "proxy_error");
                Some((Ok(Bytes::from(frame)), None))
            }
        }
    })
}

fn proxy_failure_message(err: &dyn std::fmt::Display) -> String {
    format!("Proxy request failed: {err}")
}

async fn forward_buffered(
    state: &AppState,
    relay: &PreparedRelay,
    headers: &HeaderMap,
    body: Bytes,
) -> Response {
    let result = async {
        let response = state
            .transport
            .send_passthrough(relay.chat_url(), http::Method::POST, headers, body)
            .await?;
        let (mut parts, body) = response.into_parts();
        let body = body
            .collect()
            .await
            .map_err(|e| GatewayError::Transport(format!("failed to read relay response: {e}")))?
            .to_bytes();
        strip_response_headers(&mut parts.headers);
        Ok::<_, GatewayError>(Response::from_parts(parts, Body::from(body)))
    }
    .await;

    result.unwrap_or_else(|err| {
        tracing::error!(error = %err, "relay request failed");
        GatewayError::Relay(err.to_string()).into_response()
    })
}

fn set_event_stream_headers(headers: &mut HeaderMap) {
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream; charset=utf-8"),
    );
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
}

fn proxy_error_frame(message: &str, kind: &str) -> String {
    let payload = json!({ "error": { "message": message, "type": kind } }).to_string();
    openai_sse_frame(&payload)
}

fn sse_error_response(message: &str, kind: &str) -> Response {
    let mut response = Response::new(Body::from(proxy_error_frame(message, kind)));
    set_event_stream_headers(response.headers_mut());
    response
}
