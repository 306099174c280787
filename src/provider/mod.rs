pub mod aipkit;

pub use aipkit::{AipkitProvider, StreamRequest};

/// Sanitize an upstream error body before it reaches a client or a log line.
///
/// Prefers the JSON `error.message` (or a top-level string `data`/`message`
/// field), falling back to lossy UTF-8 capped at 500 bytes.
pub(crate) fn sanitize_upstream_error(body: &[u8]) -> String {
    const MAX_LEN: usize = 500;

    fn truncate(text: &str) -> String {
        if text.len() <= MAX_LEN {
            return text.to_string();
        }
        let mut end = MAX_LEN;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &text[..end])
    }

    if let Ok(json) = serde_json::from_slice::<serde_json::Value>(body) {
        let message = json
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(serde_json::Value::as_str)
            .or_else(|| json.get("message").and_then(serde_json::Value::as_str))
            .or_else(|| json.get("data").and_then(serde_json::Value::as_str));
        if let Some(message) = message {
            return truncate(message);
        }
    }

    truncate(&String::from_utf8_lossy(body))
}
