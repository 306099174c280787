pub mod classify;
pub mod sse;

pub use classify::{EventClassifier, StreamEvent};
pub use sse::{record_stream, RecordParser, Utf8Decoder};

/// One raw record from an upstream event stream.
///
/// `event` is `None` when the record carried no `event:` line; `data` is the
/// trimmed concatenation of its `data:` lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseRecord {
    pub event: Option<String>,
    pub data: String,
}

impl SseRecord {
    /// Record name, defaulting to `message`.
    #[must_use]
    pub fn event_name(&self) -> &str {
        self.event.as_deref().unwrap_or(DEFAULT_EVENT_NAME)
    }
}

pub const DEFAULT_EVENT_NAME: &str = "message";
