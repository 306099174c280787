pub mod validation;

use serde::{Deserialize, Serialize};

use self::validation::validate_config;

/// Error type for configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
    /// Upstream request timeout in seconds. `0` disables the timeout.
    #[serde(default)]
    pub timeout: u64,
    #[serde(default = "default_http_pool_max_idle_per_host")]
    pub http_pool_max_idle_per_host: usize,
    #[serde(default = "default_http_pool_idle_timeout_secs")]
    pub http_pool_idle_timeout_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_worker_threads: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_max_blocking_threads: Option<usize>,
    #[serde(default)]
    pub base_path: String,
    #[serde(default)]
    pub http_use_env_proxy: bool,
    /// Upper bound on explicitly created conversations. Unbounded when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_sessions: Option<usize>,
    #[serde(default = "default_banner")]
    pub banner: String,
}

fn default_port() -> u16 {
    8000
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_http_pool_max_idle_per_host() -> usize {
    16
}
fn default_http_pool_idle_timeout_secs() -> u64 {
    15
}
fn default_banner() -> String {
    "chat2api is running".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            timeout: 0,
            http_pool_max_idle_per_host: default_http_pool_max_idle_per_host(),
            http_pool_idle_timeout_secs: default_http_pool_idle_timeout_secs(),
            runtime_worker_threads: None,
            runtime_max_blocking_threads: None,
            base_path: String::new(),
            http_use_env_proxy: false,
            max_sessions: None,
            banner: default_banner(),
        }
    }
}

/// One public model of the session backend and the upstream bot serving it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogModel {
    pub name: String,
    pub bot_id: String,
}

impl CatalogModel {
    fn new(name: &str, bot_id: &str) -> Self {
        Self {
            name: name.to_string(),
            bot_id: bot_id.to_string(),
        }
    }
}

/// Session backend: handshake + event-stream upstream with per-conversation
/// continuation state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionBackendConfig {
    #[serde(default = "default_session_base_url")]
    pub base_url: String,
    #[serde(default = "default_ajax_path")]
    pub ajax_path: String,
    #[serde(default)]
    pub cookie: String,
    #[serde(default)]
    pub ajax_nonce: String,
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub post_id: String,
    #[serde(default = "default_browser_user_agent")]
    pub user_agent: String,
    /// Upstream event name whose payload carries the continuation id.
    #[serde(default = "default_continuation_event")]
    pub continuation_event: String,
    #[serde(default = "default_catalog")]
    pub models: Vec<CatalogModel>,
}

fn default_session_base_url() -> String {
    "https://chatgptfree.ai".to_string()
}
fn default_ajax_path() -> String {
    "/wp-admin/admin-ajax.php".to_string()
}
fn default_browser_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/141.0.0.0 Safari/537.36".to_string()
}
fn default_continuation_event() -> String {
    "openai_response_id".to_string()
}
fn default_catalog() -> Vec<CatalogModel> {
    vec![
        CatalogModel::new("gpt-4o-mini", "25865"),
        CatalogModel::new("gpt-5-nano", "25871"),
        CatalogModel::new("gemini-2.5-pro", "25874"),
        CatalogModel::new("deepseek-v3", "25873"),
        CatalogModel::new("claude-3.5-sonnet", "25875"),
        CatalogModel::new("grok-3", "25872"),
        CatalogModel::new("meta-llama-3", "25870"),
        CatalogModel::new("qwen3-max", "25869"),
    ]
}

impl Default for SessionBackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_session_base_url(),
            ajax_path: default_ajax_path(),
            cookie: String::new(),
            ajax_nonce: String::new(),
            session_id: String::new(),
            post_id: String::new(),
            user_agent: default_browser_user_agent(),
            continuation_event: default_continuation_event(),
            models: default_catalog(),
        }
    }
}

/// A public model name that the relay rewrites before forwarding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualModelConfig {
    pub name: String,
    pub target: String,
    /// Boolean request field set to `true` when this alias is used.
    pub flag: String,
}

/// Relay backend: an OpenAI-compatible upstream reached by raw pass-through.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayBackendConfig {
    #[serde(default = "default_relay_base_url")]
    pub base_url: String,
    #[serde(default = "default_relay_user_agent")]
    pub user_agent: String,
    /// When set, replaces the caller's `Authorization` header upstream.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default = "default_relay_owner")]
    pub owned_by: String,
    #[serde(default = "default_relay_models")]
    pub models: Vec<String>,
    #[serde(default = "default_virtual_models")]
    pub virtual_models: Vec<VirtualModelConfig>,
}

fn default_relay_base_url() -> String {
    "https://api.kimi.com/coding".to_string()
}
fn default_relay_user_agent() -> String {
    "KimiCLI/0.2.0".to_string()
}
fn default_relay_owner() -> String {
    "moonshot-ai".to_string()
}
fn default_relay_models() -> Vec<String> {
    vec!["kimi-for-coding".to_string()]
}
fn default_virtual_models() -> Vec<VirtualModelConfig> {
    vec![VirtualModelConfig {
        name: "kimi-for-coding-thinking".to_string(),
        target: "kimi-for-coding".to_string(),
        flag: "thinking".to_string(),
    }]
}

impl Default for RelayBackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_relay_base_url(),
            user_agent: default_relay_user_agent(),
            api_key: None,
            owned_by: default_relay_owner(),
            models: default_relay_models(),
            virtual_models: default_virtual_models(),
        }
    }
}

/// Client authentication configuration. An empty key list disables the check.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientAuthConfig {
    #[serde(default)]
    pub allowed_keys: Vec<String>,
}

/// Feature flags and settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "INFO".to_string()
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub client_authentication: ClientAuthConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_backend: Option<SessionBackendConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relay_backend: Option<RelayBackendConfig>,
    #[serde(default)]
    pub features: FeaturesConfig,
}

/// Load configuration from a YAML file, apply environment overrides, and
/// validate it.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] when reading the file fails, [`ConfigError::Yaml`]
/// when parsing fails, or [`ConfigError::Validation`] when semantic validation fails.
pub fn load_config(path: &str) -> Result<AppConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    let mut config: AppConfig = serde_yaml::from_str(&contents)?;
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    validate_config(&config)?;
    Ok(config)
}

/// Overlay secrets and toggles from the environment.
///
/// Upstream credentials rotate more often than the rest of the file, so they
/// may be supplied as `COOKIE`, `AJAX_NONCE`, `SESSION_ID`, `POST_ID` and
/// `RELAY_API_KEY`. `API_KEY` adds one allowed client key and `LOG_LEVEL`
/// replaces `features.log_level`.
pub fn apply_env_overrides<F>(config: &mut AppConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let lookup = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

    if let Some(session) = config.session_backend.as_mut() {
        for (key, slot) in [
            ("COOKIE", &mut session.cookie),
            ("AJAX_NONCE", &mut session.ajax_nonce),
            ("SESSION_ID", &mut session.session_id),
            ("POST_ID", &mut session.post_id),
        ] {
            if let Some(value) = lookup(key) {
                *slot = value;
            }
        }
    }
    if let Some(relay) = config.relay_backend.as_mut() {
        if let Some(value) = lookup("RELAY_API_KEY") {
            relay.api_key = Some(value);
        }
    }
    if let Some(key) = lookup("API_KEY") {
        if !config.client_authentication.allowed_keys.contains(&key) {
            config.client_authentication.allowed_keys.push(key);
        }
    }
    if let Some(level) = lookup("LOG_LEVEL") {
        config.features.log_level = level;
    }
}
