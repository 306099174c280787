//! One chat turn against the session backend.
//!
//! The turn moves through session resolution, handshake, stream opening and
//! translation. Everything that must happen once the turn is over (store
//! update, ephemeral cleanup, releasing the turn lock) is owned by a
//! [`TurnSession`], which travels with the response body in streaming mode.

use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::response::{IntoResponse, Json, Response};
use futures_util::{Stream, StreamExt};
use http::header::{HeaderValue, CACHE_CONTROL, CONTENT_TYPE};
use tokio::sync::OwnedMutexGuard;

use crate::error::GatewayError;
use crate::observability::log_turn_complete;
use crate::protocol::openai_chat::stream::{collect_completion, incremental_stream, ChunkEmitter};
use crate::protocol::openai_chat::ChatTurnRequest;
use crate::provider::StreamRequest;
use crate::session::{ConversationSession, EphemeralGuard, SessionStore};
use crate::state::AppState;
use crate::stream::{record_stream, StreamEvent};

/// The session a turn runs in, plus whatever keeps it consistent until the
/// turn ends.
enum TurnSession {
    /// Deleted from the store when dropped.
    Ephemeral(EphemeralGuard),
    /// Holds the conversation's turn lock until dropped.
    Explicit {
        session: ConversationSession,
        _turn: OwnedMutexGuard<()>,
    },
}

impl TurnSession {
    fn session(&self) -> &ConversationSession {
        match self {
            Self::Ephemeral(guard) => guard.session(),
            Self::Explicit { session, .. } => session,
        }
    }

    fn is_ephemeral(&self) -> bool {
        matches!(self, Self::Ephemeral(_))
    }

    /// Record the turn's outcome and release the session.
    fn finish(
        self,
        store: &SessionStore,
        model: &str,
        stream: bool,
        continuation_id: Option<String>,
        start_time: Instant,
    ) {
        let session = self.session();
        if !self.is_ephemeral() {
            if let Some(continuation_id) = continuation_id {
                store.update(&session.conversation_id, continuation_id);
            }
        }
        log_turn_complete(
            &session.conversation_id,
            model,
            self.is_ephemeral(),
            stream,
            start_time,
        );
    }
}

async fn resolve_session(
    store: &Arc<SessionStore>,
    conversation_id: Option<&str>,
) -> Result<TurnSession, GatewayError> {
    let Some(conversation_id) = conversation_id else {
        return Ok(TurnSession::Ephemeral(store.create_ephemeral()));
    };

    let turn = store.turn_lock(conversation_id)?.lock_owned().await;
    // Read after locking so the previous turn's continuation id is visible.
    let session = store.get(conversation_id)?;
    Ok(TurnSession::Explicit {
        session,
        _turn: turn,
    })
}

/// Run one turn and build its response: an event stream when the request
/// asks for one, a single completion otherwise.
///
/// # Errors
///
/// Returns the first failure before the response starts. Once an event
/// stream has started, failures are reported inside the stream.
pub async fn run_turn(
    state: &AppState,
    request: ChatTurnRequest,
) -> Result<Response, GatewayError> {
    let start_time = Instant::now();
    let provider = state
        .provider
        .as_ref()
        .ok_or_else(|| GatewayError::Internal("session backend is not configured".to_string()))?;

    let turn = resolve_session(&state.sessions, request.conversation_id()).await?;

    let bot_id = state
        .router
        .bot_id(&request.model)
        .ok_or_else(|| GatewayError::UnknownModel(request.model.clone()))?;
    let message = request.latest_user_text().ok_or_else(|| {
        GatewayError::InvalidRequest("no user message found in messages".to_string())
    })?;

    let cache_key = provider
        .negotiate(&state.transport, &message, bot_id)
        .await?;
    let response = {
        let session = turn.session();
        provider
            .open_stream(
                &state.transport,
                &StreamRequest {
                    cache_key: &cache_key,
                    bot_id,
                    conversation_token: &session.upstream_token,
                    continuation_id: session.continuation_id.as_deref(),
                    web_search: request.web_search_enabled(),
                },
            )
            .await?
    };
    tracing::debug!(
        conversation_id = %turn.session().conversation_id,
        model = %request.model,
        "upstream stream opened"
    );

    let classifier = state.classifier.clone();
    let events = record_stream(response.bytes_stream()).map(move |record| {
        record
            .map(|record| classifier.classify(&record))
            .map_err(|err| GatewayError::Transport(format!("stream read failed: {err}")))
    });

    let emitter = ChunkEmitter::new(request.model.clone());
    if request.is_stream() {
        return Ok(streaming_response(
            state,
            emitter,
            events,
            turn,
            request.model,
            start_time,
        ));
    }

    let aggregated = collect_completion(events).await?;
    let completion = emitter.completion(&aggregated.content);
    turn.finish(
        &state.sessions,
        &request.model,
        false,
        aggregated.continuation_id,
        start_time,
    );
    Ok(Json(completion).into_response())
}

fn streaming_response<S>(
    state: &AppState,
    emitter: ChunkEmitter,
    events: S,
    turn: TurnSession,
    model: String,
    start_time: Instant,
) -> Response
where
    S: Stream<Item = Result<StreamEvent, GatewayError>> + Send + 'static,
{
    let store = Arc::clone(&state.sessions);
    // Dropping the closure without calling it (upstream error or client
    // disconnect) still drops `turn`.
    let on_complete = move |continuation_id: Option<String>| {
        turn.finish(&store, &model, true, continuation_id, start_time);
    };

    let mut response = Response::new(Body::from_stream(incremental_stream(
        emitter,
        events,
        on_complete,
    )));
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unknown_conversation_is_rejected_before_locking() {
        let store = Arc::new(SessionStore::new(None));
        let err = resolve_session(&store, Some("missing")).await.err().unwrap();
        assert!(matches!(err, GatewayError::InvalidSession(_)));
    }

    #[tokio::test]
    async fn test_ephemeral_turn_is_removed_on_drop() {
        let store = Arc::new(SessionStore::new(None));
        let turn = resolve_session(&store, None).await.unwrap();
        assert!(turn.is_ephemeral());
        assert_eq!(store.len(), 1);
        drop(turn);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_explicit_turn_finish_updates_store() {
        let store = Arc::new(SessionStore::new(None));
        let created = store.create().unwrap();
        let turn = resolve_session(&store, Some(&created.conversation_id))
            .await
            .unwrap();
        turn.finish(
            &store,
            "gpt-4o-mini",
            false,
            Some("resp_1".to_string()),
            Instant::now(),
        );
        let session = store.get(&created.conversation_id).unwrap();
        assert_eq!(session.continuation_id.as_deref(), Some("resp_1"));
    }

    #[tokio::test]
    async fn test_turn_without_continuation_keeps_previous() {
        let store = Arc::new(SessionStore::new(None));
        let created = store.create().unwrap();
        store.update(&created.conversation_id, "resp_1".to_string());
        let turn = resolve_session(&store, Some(&created.conversation_id))
            .await
            .unwrap();
        turn.finish(&store, "gpt-4o-mini", true, None, Instant::now());
        let session = store.get(&created.conversation_id).unwrap();
        assert_eq!(session.continuation_id.as_deref(), Some("resp_1"));
    }

    #[tokio::test]
    async fn test_explicit_turns_are_serialized() {
        let store = Arc::new(SessionStore::new(None));
        let created = store.create().unwrap();
        let first = resolve_session(&store, Some(&created.conversation_id))
            .await
            .unwrap();

        let second = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            resolve_session(&store, Some(&created.conversation_id)),
        )
        .await;
        assert!(second.is_err(), "second turn must wait for the first");

        drop(first);
        let second = resolve_session(&store, Some(&created.conversation_id))
            .await
            .unwrap();
        assert!(!second.is_ephemeral());
    }
}
