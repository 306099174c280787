use std::convert::Infallible;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};

use super::{AssistantMessage, ChatCompletion, CompletionChoice, Usage};
use crate::error::GatewayError;
use crate::stream::sse::done_frame;
use crate::stream::StreamEvent;
use crate::util::{next_completion_id, push_json_string_escaped, push_u64_decimal, unix_now_secs};

/// Encodes one turn's output onto the chat-completions schema. Every frame of
/// a turn shares the same `id` and `created`.
#[derive(Debug, Clone)]
pub struct ChunkEmitter {
    id: String,
    model: String,
    created: u64,
}

impl ChunkEmitter {
    #[must_use]
    pub fn new(model: impl Into<String>) -> Self {
        Self::with_identity(next_completion_id(), model, unix_now_secs())
    }

    #[must_use]
    pub fn with_identity(id: impl Into<String>, model: impl Into<String>, created: u64) -> Self {
        Self {
            id: id.into(),
            model: model.into(),
            created,
        }
    }

    #[must_use]
    pub fn role_frame(&self) -> String {
        let mut out = String::with_capacity(160 + self.id.len() + self.model.len());
        self.push_chunk_prefix(&mut out);
        out.push_str(",\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\"},\"finish_reason\":null}]}\n\n");
        out
    }

    #[must_use]
    pub fn content_frame(&self, text: &str) -> String {
        let mut out = String::with_capacity(160 + self.id.len() + self.model.len() + text.len());
        self.push_chunk_prefix(&mut out);
        out.push_str(",\"choices\":[{\"index\":0,\"delta\":{\"content\":");
        push_json_string_escaped(&mut out, text);
        out.push_str("},\"finish_reason\":null}]}\n\n");
        out
    }

    #[must_use]
    pub fn stop_frame(&self) -> String {
        let mut out = String::with_capacity(160 + self.id.len() + self.model.len());
        self.push_chunk_prefix(&mut out);
        out.push_str(",\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n");
        out
    }

    /// Terminal frame for a turn that failed after the response started.
    #[must_use]
    pub fn error_frame(err: &GatewayError) -> String {
        let message = err.to_string();
        let mut out = String::with_capacity(64 + message.len());
        out.push_str("data: {\"error\":{\"message\":");
        push_json_string_escaped(&mut out, &message);
        out.push_str(",\"type\":\"upstream_error\"}}\n\n");
        out
    }

    /// Single completion object; `content` is trimmed.
    #[must_use]
    pub fn completion(&self, content: &str) -> ChatCompletion {
        ChatCompletion {
            id: self.id.clone(),
            object: "chat.completion",
            created: self.created,
            model: self.model.clone(),
            choices: vec![CompletionChoice {
                index: 0,
                message: AssistantMessage {
                    role: "assistant",
                    content: content.trim().to_string(),
                },
                finish_reason: "stop",
            }],
            usage: Usage::default(),
        }
    }

    fn push_chunk_prefix(&self, out: &mut String) {
        out.push_str("data: {\"id\":");
        push_json_string_escaped(out, &self.id);
        out.push_str(",\"object\":\"chat.completion.chunk\",\"created\":");
        push_u64_decimal(out, self.created);
        out.push_str(",\"model\":");
        push_json_string_escaped(out, &self.model);
    }
}

/// Result of draining a turn in aggregate mode.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregatedTurn {
    /// Untrimmed concatenation of every content delta.
    pub content: String,
    /// Last continuation id seen, if any.
    pub continuation_id: Option<String>,
}

/// Drain `events` into one [`AggregatedTurn`].
///
/// # Errors
///
/// Returns the first error yielded by `events`; nothing collected so far is
/// reported.
pub async fn collect_completion<S>(events: S) -> Result<AggregatedTurn, GatewayError>
where
    S: Stream<Item = Result<StreamEvent, GatewayError>>,
{
    let mut events = std::pin::pin!(events);
    let mut turn = AggregatedTurn::default();
    while let Some(event) = events.next().await {
        match event? {
            StreamEvent::ContentDelta(text) => turn.content.push_str(&text),
            StreamEvent::ContinuationId(id) => turn.continuation_id = Some(id),
            StreamEvent::Ignorable => {}
        }
    }
    Ok(turn)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Role,
    Body,
    Done,
    Finished,
}

struct IncrementalState<S, F> {
    emitter: ChunkEmitter,
    events: Pin<Box<S>>,
    phase: Phase,
    continuation_id: Option<String>,
    on_complete: Option<F>,
}

/// Re-emit `events` as chat-completion chunk frames.
///
/// Frames: one role chunk, one chunk per content delta, then once the
/// upstream ends cleanly `on_complete` runs with the last continuation id,
/// followed by the stop chunk and `[DONE]`. An upstream error yields one
/// error frame and ends the stream; `on_complete` is then dropped without
/// being called, as it is when the consumer stops polling.
///
/// Upstream records are pulled only when the consumer asks for the next
/// frame.
pub fn incremental_stream<S, F>(
    emitter: ChunkEmitter,
    events: S,
    on_complete: F,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send
where
    S: Stream<Item = Result<StreamEvent, GatewayError>> + Send + 'static,
    F: FnOnce(Option<String>) + Send + 'static,
{
    let state = IncrementalState {
        emitter,
        events: Box::pin(events),
        phase: Phase::Role,
        continuation_id: None,
        on_complete: Some(on_complete),
    };

    futures_util::stream::unfold(state, |mut state| async move {
        loop {
            match state.phase {
                Phase::Role => {
                    state.phase = Phase::Body;
                    let frame = state.emitter.role_frame();
                    return Some((Ok(Bytes::from(frame)), state));
                }
                Phase::Body => match state.events.as_mut().next().await {
                    Some(Ok(StreamEvent::ContentDelta(text))) => {
                        let frame = state.emitter.content_frame(&text);
                        return Some((Ok(Bytes::from(frame)), state));
                    }
                    Some(Ok(StreamEvent::ContinuationId(id))) => {
                        state.continuation_id = Some(id);
                    }
                    Some(Ok(StreamEvent::Ignorable)) => {}
                    Some(Err(err)) => {
                        tracing::warn!(error = %err, "upstream stream failed mid-turn");
                        state.on_complete = None;
                        state.phase = Phase::Finished;
                        let frame = ChunkEmitter::error_frame(&err);
                        return Some((Ok(Bytes::from(frame)), state));
                    }
                    None => {
                        if let Some(on_complete) = state.on_complete.take() {
                            on_complete(state.continuation_id.take());
                        }
                        state.phase = Phase::Done;
                        let frame = state.emitter.stop_frame();
                        return Some((Ok(Bytes::from(frame)), state));
                    }
                },
                Phase::Done => {
                    state.phase = Phase::Finished;
                    return Some((Ok(Bytes::from_static(done_frame().as_bytes())), state));
                }
                Phase::Finished => return None,
            }
        }
    })
}
