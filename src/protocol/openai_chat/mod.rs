pub mod stream;

use serde::{Deserialize, Serialize};

/// Chat completion request as accepted by the session backend.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatTurnRequest {
    pub model: String,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub stream: Option<bool>,
    #[serde(default)]
    pub web_search: Option<bool>,
}

impl ChatTurnRequest {
    #[must_use]
    pub fn is_stream(&self) -> bool {
        self.stream.unwrap_or(false)
    }

    #[must_use]
    pub fn web_search_enabled(&self) -> bool {
        self.web_search.unwrap_or(false)
    }

    /// The conversation id, with an empty string treated as absent.
    #[must_use]
    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref().filter(|id| !id.is_empty())
    }

    /// Text of the most recent `user` message.
    ///
    /// Only the last `user` message is considered; if its text is empty the
    /// request has no usable user message.
    #[must_use]
    pub fn latest_user_text(&self) -> Option<String> {
        let message = self.messages.iter().rev().find(|m| m.role == "user")?;
        let text = message.text();
        (!text.is_empty()).then_some(text)
    }
}

/// Role-tagged chat message. `content` is a string or an array of content
/// parts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<serde_json::Value>,
}

impl ChatMessage {
    /// Concatenated text of the message; non-text parts are skipped.
    #[must_use]
    pub fn text(&self) -> String {
        match &self.content {
            Some(serde_json::Value::String(text)) => text.clone(),
            Some(serde_json::Value::Array(parts)) => {
                let mut out = String::new();
                for part in parts {
                    let is_text = part
                        .get("type")
                        .and_then(serde_json::Value::as_str)
                        .map_or(true, |kind| kind == "text");
                    if !is_text {
                        continue;
                    }
                    if let Some(text) = part.get("text").and_then(serde_json::Value::as_str) {
                        out.push_str(text);
                    }
                }
                out
            }
            _ => String::new(),
        }
    }
}

/// Non-streaming `chat.completion` response.
#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletion {
    pub id: String,
    pub object: &'static str,
    pub created: u64,
    pub model: String,
    pub choices: Vec<CompletionChoice>,
    pub usage: Usage,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompletionChoice {
    pub index: u32,
    pub message: AssistantMessage,
    pub finish_reason: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssistantMessage {
    pub role: &'static str,
    pub content: String,
}

/// Token usage. Always zero: the upstream does not report it.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// `GET /v1/models` response.
#[derive(Debug, Clone, Serialize)]
pub struct ModelList {
    pub object: &'static str,
    pub data: Vec<ModelEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelEntry {
    pub id: String,
    pub object: &'static str,
    pub created: u64,
    pub owned_by: String,
}
