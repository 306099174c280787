/// Gateway error type used across all modules.
///
/// Every `Display` string starts with a stable domain prefix (`Auth error:`,
/// `Invalid request:`, `Upstream error:` ...) so callers and logs can tell the
/// failure domain apart without matching on the variant.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Auth error: {0}")]
    Auth(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Invalid request: unsupported model '{0}'")]
    UnknownModel(String),
    #[error("Invalid request: unknown conversation id '{0}'")]
    InvalidSession(String),
    #[error("Capacity error: {0}")]
    Capacity(String),
    #[error("Upstream error: handshake failed: {0}")]
    Handshake(String),
    #[error("Upstream error: status={status}, message={message}")]
    Upstream { status: u16, message: String },
    #[error("Upstream error: transport failure: {0}")]
    Transport(String),
    #[error("Relay error: {0}")]
    Relay(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Broad error category for status code selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    InvalidRequest,
    Authentication,
    RateLimit,
    ServerError,
    BadGateway,
}

impl GatewayError {
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            GatewayError::InvalidRequest(_)
            | GatewayError::UnknownModel(_)
            | GatewayError::InvalidSession(_) => ErrorCategory::InvalidRequest,
            GatewayError::Auth(_) => ErrorCategory::Authentication,
            GatewayError::Capacity(_) => ErrorCategory::RateLimit,
            GatewayError::Relay(_) => ErrorCategory::BadGateway,
            GatewayError::Config(_)
            | GatewayError::Handshake(_)
            | GatewayError::Upstream { .. }
            | GatewayError::Transport(_)
            | GatewayError::Internal(_) => ErrorCategory::ServerError,
        }
    }
}

fn http_status_for_category(cat: ErrorCategory) -> http::StatusCode {
    match cat {
        ErrorCategory::InvalidRequest => http::StatusCode::BAD_REQUEST,
        ErrorCategory::Authentication => http::StatusCode::UNAUTHORIZED,
        ErrorCategory::RateLimit => http::StatusCode::TOO_MANY_REQUESTS,
        ErrorCategory::ServerError => http::StatusCode::INTERNAL_SERVER_ERROR,
        ErrorCategory::BadGateway => http::StatusCode::BAD_GATEWAY,
    }
}

/// Format an error as `(status_code, {"error": message})`.
///
/// Relay failures keep the OpenAI-style `{"error": {"message", "type"}}` shape
/// relay clients already parse.
#[must_use]
pub fn format_error(err: &GatewayError) -> (http::StatusCode, serde_json::Value) {
    let status = http_status_for_category(err.category());
    let body = match err {
        GatewayError::Relay(message) => serde_json::json!({
            "error": { "message": message, "type": "proxy_error" }
        }),
        _ => serde_json::json!({ "error": err.to_string() }),
    };
    (status, body)
}

// ---------------------------------------------------------------------------
// Axum integration
// ---------------------------------------------------------------------------

/// Convert a `GatewayError` into an axum response.
#[must_use]
pub fn into_axum_response(err: &GatewayError) -> axum::response::Response {
    use axum::response::IntoResponse;
    let (status, body) = format_error(err);
    (status, axum::Json(body)).into_response()
}

impl axum::response::IntoResponse for GatewayError {
    fn into_response(self) -> axum::response::Response {
        into_axum_response(&self)
    }
}
