use std::sync::Arc;

use crate::auth::{authenticate, build_allowed_key_set, AllowedClientKeys};
use crate::config::AppConfig;
use crate::error::GatewayError;
use crate::provider::AipkitProvider;
use crate::routing::BackendRouter;
use crate::session::SessionStore;
use crate::stream::EventClassifier;
use crate::transport::{HttpTransport, PreparedRelay};

/// Shared application state accessible to all handlers.
pub struct AppState {
    pub config: AppConfig,
    pub transport: HttpTransport,
    pub router: BackendRouter,
    pub sessions: Arc<SessionStore>,
    /// Present when a session backend is configured.
    pub provider: Option<AipkitProvider>,
    /// Present when a relay backend is configured.
    pub relay: Option<PreparedRelay>,
    pub classifier: EventClassifier,
    allowed_client_keys: AllowedClientKeys,
}

impl AppState {
    /// Build every per-process component from a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Config` when a backend's URL or header values
    /// cannot be prepared.
    pub fn from_config(config: AppConfig) -> Result<Self, GatewayError> {
        let transport = HttpTransport::new(&config.server);
        let router = BackendRouter::new(&config);
        let sessions = Arc::new(SessionStore::new(config.server.max_sessions));
        let provider = config
            .session_backend
            .as_ref()
            .map(AipkitProvider::new)
            .transpose()?;
        let relay = config
            .relay_backend
            .as_ref()
            .map(PreparedRelay::new)
            .transpose()?;
        let classifier = config
            .session_backend
            .as_ref()
            .map_or_else(EventClassifier::default, |session| {
                EventClassifier::new(session.continuation_event.clone())
            });
        let allowed_client_keys = build_allowed_key_set(&config);

        Ok(Self {
            config,
            transport,
            router,
            sessions,
            provider,
            relay,
            classifier,
            allowed_client_keys,
        })
    }

    /// Authenticate a request using the prebuilt key index.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Auth` when the API key is missing or invalid.
    pub fn authenticate(&self, headers: &http::HeaderMap) -> Result<(), GatewayError> {
        authenticate(headers, &self.allowed_client_keys)
    }

    #[must_use]
    pub fn client_auth_enabled(&self) -> bool {
        !matches!(self.allowed_client_keys, AllowedClientKeys::Disabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClientAuthConfig, RelayBackendConfig, SessionBackendConfig};

    #[test]
    fn test_from_config_builds_configured_backends_only() {
        let state = AppState::from_config(AppConfig {
            relay_backend: Some(RelayBackendConfig::default()),
            ..AppConfig::default()
        })
        .unwrap();
        assert!(state.provider.is_none());
        assert!(state.relay.is_some());
        assert!(!state.client_auth_enabled());
        assert!(state.authenticate(&http::HeaderMap::new()).is_ok());
    }

    #[test]
    fn test_classifier_uses_configured_event_name() {
        let state = AppState::from_config(AppConfig {
            session_backend: Some(SessionBackendConfig {
                continuation_event: "response_id".to_string(),
                ..SessionBackendConfig::default()
            }),
            client_authentication: ClientAuthConfig {
                allowed_keys: vec!["k".to_string()],
            },
            ..AppConfig::default()
        })
        .unwrap();
        let record = crate::stream::SseRecord {
            event: Some("response_id".to_string()),
            data: r#"{"id":"resp_9"}"#.to_string(),
        };
        assert_eq!(
            state.classifier.classify(&record),
            crate::stream::StreamEvent::ContinuationId("resp_9".to_string())
        );
        assert!(state.client_auth_enabled());
        assert!(state.authenticate(&http::HeaderMap::new()).is_err());
    }
}
