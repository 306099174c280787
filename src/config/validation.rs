use std::collections::HashSet;

use super::{AppConfig, ConfigError, RelayBackendConfig, SessionBackendConfig};

/// Validate the full application config, returning an error if any rule is violated.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when any configuration invariant is violated.
pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    validate_server_config(config)?;
    validate_allowed_keys(config)?;
    if config.session_backend.is_none() && config.relay_backend.is_none() {
        return Err(validation_err(
            "at least one of session_backend or relay_backend must be configured",
        ));
    }
    if let Some(session) = config.session_backend.as_ref() {
        validate_session_backend(session)?;
    }
    if let Some(relay) = config.relay_backend.as_ref() {
        validate_relay_backend(relay)?;
    }
    validate_model_overlap(config)?;
    validate_log_level(config)?;
    Ok(())
}

fn validation_err(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

fn validate_server_config(config: &AppConfig) -> Result<(), ConfigError> {
    let server = &config.server;
    if server.http_pool_max_idle_per_host == 0 {
        return Err(validation_err(
            "server.http_pool_max_idle_per_host must be greater than 0",
        ));
    }
    if let Some(worker_threads) = server.runtime_worker_threads {
        if worker_threads == 0 {
            return Err(validation_err(
                "server.runtime_worker_threads must be greater than 0 when set",
            ));
        }
    }
    if let Some(max_blocking_threads) = server.runtime_max_blocking_threads {
        if max_blocking_threads == 0 {
            return Err(validation_err(
                "server.runtime_max_blocking_threads must be greater than 0 when set",
            ));
        }
    }
    if server.max_sessions == Some(0) {
        return Err(validation_err(
            "server.max_sessions must be greater than 0 when set",
        ));
    }
    Ok(())
}

// Empty list disables client auth; blank entries are always a mistake.
fn validate_allowed_keys(config: &AppConfig) -> Result<(), ConfigError> {
    for key in &config.client_authentication.allowed_keys {
        if key.trim().is_empty() {
            return Err(validation_err("allowed_keys contains an empty key"));
        }
    }
    Ok(())
}

fn validate_base_url(field: &str, base_url: &str) -> Result<(), ConfigError> {
    if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
        return Err(validation_err(format!(
            "{field} must start with http:// or https://"
        )));
    }
    url::Url::parse(base_url)
        .map_err(|err| validation_err(format!("{field} is not a valid URL: {err}")))?;
    Ok(())
}

fn validate_session_backend(session: &SessionBackendConfig) -> Result<(), ConfigError> {
    validate_base_url("session_backend.base_url", &session.base_url)?;
    if !session.ajax_path.starts_with('/') {
        return Err(validation_err("session_backend.ajax_path must start with '/'"));
    }
    if session.continuation_event.trim().is_empty() {
        return Err(validation_err(
            "session_backend.continuation_event cannot be empty",
        ));
    }
    if session.models.is_empty() {
        return Err(validation_err("session_backend must have at least one model"));
    }

    let mut names = HashSet::new();
    for model in &session.models {
        if model.name.trim().is_empty() || model.bot_id.trim().is_empty() {
            return Err(validation_err(
                "session_backend.models entries need a non-empty name and bot_id",
            ));
        }
        if !names.insert(model.name.as_str()) {
            return Err(validation_err(format!(
                "session_backend: duplicate model entry '{}'",
                model.name
            )));
        }
    }
    Ok(())
}

fn validate_relay_backend(relay: &RelayBackendConfig) -> Result<(), ConfigError> {
    validate_base_url("relay_backend.base_url", &relay.base_url)?;
    if relay.user_agent.trim().is_empty() {
        return Err(validation_err("relay_backend.user_agent cannot be empty"));
    }

    let mut names = HashSet::new();
    for model in &relay.models {
        if model.trim().is_empty() {
            return Err(validation_err("relay_backend: model name cannot be empty"));
        }
        if !names.insert(model.as_str()) {
            return Err(validation_err(format!(
                "relay_backend: duplicate model entry '{model}'"
            )));
        }
    }
    for alias in &relay.virtual_models {
        if alias.name.trim().is_empty() || alias.target.trim().is_empty() {
            return Err(validation_err(
                "relay_backend.virtual_models entries need a non-empty name and target",
            ));
        }
        if alias.flag.trim().is_empty() {
            return Err(validation_err(format!(
                "relay_backend: virtual model '{}' needs a flag",
                alias.name
            )));
        }
        if !names.insert(alias.name.as_str()) {
            return Err(validation_err(format!(
                "relay_backend: virtual model '{}' conflicts with another model",
                alias.name
            )));
        }
    }
    Ok(())
}

// A model name must select exactly one backend.
fn validate_model_overlap(config: &AppConfig) -> Result<(), ConfigError> {
    let (Some(session), Some(relay)) = (&config.session_backend, &config.relay_backend) else {
        return Ok(());
    };
    let relay_names: HashSet<&str> = relay
        .models
        .iter()
        .map(String::as_str)
        .chain(relay.virtual_models.iter().map(|alias| alias.name.as_str()))
        .collect();
    for model in &session.models {
        if relay_names.contains(model.name.as_str()) {
            return Err(validation_err(format!(
                "model '{}' is served by both session_backend and relay_backend",
                model.name
            )));
        }
    }
    Ok(())
}

fn validate_log_level(config: &AppConfig) -> Result<(), ConfigError> {
    let valid_levels = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL", "DISABLED"];
    if !valid_levels.contains(&config.features.log_level.to_uppercase().as_str()) {
        return Err(validation_err(format!(
            "log_level must be one of {valid_levels:?}"
        )));
    }
    Ok(())
}
