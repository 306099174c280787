use tracing_subscriber::EnvFilter;

/// Initialize the tracing subscriber with the configured log level.
///
/// Maps config log levels to tracing levels:
/// - "DISABLED" -> no subscriber installed
/// - "WARNING" -> WARN
/// - "CRITICAL" -> ERROR
/// - Others map directly (DEBUG, INFO, ERROR)
pub fn init_tracing(log_level: &str) {
    let Some(directive) = tracing_directive(log_level) else {
        return;
    };

    let filter = EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new("INFO"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

fn tracing_directive(log_level: &str) -> Option<String> {
    let level = log_level.to_uppercase();
    match level.as_str() {
        "DISABLED" => None,
        "WARNING" => Some("WARN".to_string()),
        "CRITICAL" => Some("ERROR".to_string()),
        _ => Some(level),
    }
}

/// Log a chat turn that reached the end of the upstream stream.
pub fn log_turn_complete(
    conversation_id: &str,
    model: &str,
    ephemeral: bool,
    stream: bool,
    start_time: std::time::Instant,
) {
    tracing::info!(
        conversation_id,
        model,
        ephemeral,
        stream,
        status = "success",
        elapsed_ms = start_time.elapsed().as_millis(),
        "chat turn complete"
    );
}

/// Log a chat request that failed before its response started.
pub fn log_turn_failed(model: &str, status: u16, error: &dyn std::fmt::Display) {
    if status >= 500 {
        tracing::error!(model, status, error = %error, "chat turn failed");
    } else {
        tracing::warn!(model, status, error = %error, "chat turn rejected");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_mapping() {
        assert_eq!(tracing_directive("warning").as_deref(), Some("WARN"));
        assert_eq!(tracing_directive("CRITICAL").as_deref(), Some("ERROR"));
        assert_eq!(tracing_directive("debug").as_deref(), Some("DEBUG"));
        assert!(tracing_directive("disabled").is_none());
    }
}
