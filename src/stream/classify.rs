use super::SseRecord;
use serde_json::Value;

/// Typed meaning of one upstream record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Text to append to the assistant reply.
    ContentDelta(String),
    /// Upstream token to send with the next turn of the same conversation.
    ContinuationId(String),
    Ignorable,
}

/// Maps raw records onto [`StreamEvent`]s. Never fails: anything it does not
/// recognise is [`StreamEvent::Ignorable`].
#[derive(Debug, Clone)]
pub struct EventClassifier {
    continuation_event: String,
}

impl EventClassifier {
    #[must_use]
    pub fn new(continuation_event: impl Into<String>) -> Self {
        Self {
            continuation_event: continuation_event.into(),
        }
    }

    #[must_use]
    pub fn classify(&self, record: &SseRecord) -> StreamEvent {
        let data = record.data.as_str();
        if data.is_empty() {
            return StreamEvent::Ignorable;
        }

        if record.event_name() == self.continuation_event {
            return match string_field(data, "id") {
                Some(id) => StreamEvent::ContinuationId(id),
                None => StreamEvent::Ignorable,
            };
        }

        if data == "[DONE]" {
            return StreamEvent::Ignorable;
        }
        match string_field(data, "delta") {
            Some(delta) => StreamEvent::ContentDelta(delta),
            None => StreamEvent::Ignorable,
        }
    }
}

// `Some` only when `data` is a JSON object whose `field` is a string.
fn string_field(data: &str, field: &str) -> Option<String> {
    match serde_json::from_str::<Value>(data).ok()? {
        Value::Object(mut map) => match map.remove(field)? {
            Value::String(value) => Some(value),
            _ => None,
        },
        _ => None,
    }
}

impl Default for EventClassifier {
    fn default() -> Self {
        Self::new("openai_response_id")
    }
}
