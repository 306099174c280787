pub mod dispatch;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::config::AppConfig;
use crate::error::GatewayError;

/// Upstream chosen for one chat request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Handshake + event-stream backend with conversation state.
    Session,
    /// OpenAI-shaped upstream reached by raw pass-through.
    Relay,
}

/// Best-effort look at a chat request body.
#[derive(Debug, Clone)]
pub enum BodyProbe {
    NotJson,
    Json(serde_json::Value),
}

impl BodyProbe {
    #[must_use]
    pub fn parse(body: &[u8]) -> Self {
        match serde_json::from_slice(body) {
            Ok(value) => Self::Json(value),
            Err(_) => Self::NotJson,
        }
    }

    /// Top-level string `model`, if any.
    #[must_use]
    pub fn model(&self) -> Option<&str> {
        match self {
            Self::Json(value) => value.get("model").and_then(serde_json::Value::as_str),
            Self::NotJson => None,
        }
    }

    /// Top-level `stream` flag; anything but `true` is `false`.
    #[must_use]
    pub fn stream(&self) -> bool {
        match self {
            Self::Json(value) => value
                .get("stream")
                .and_then(serde_json::Value::as_bool)
                .unwrap_or(false),
            Self::NotJson => false,
        }
    }
}

/// Relay alias: requests for `name` go upstream as `target` with the boolean
/// field `flag` set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualModel {
    pub target: String,
    pub flag: String,
}

/// One row of `GET /v1/models`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicModel {
    pub id: String,
    pub owned_by: String,
}

/// Immutable model tables built once from configuration.
#[derive(Debug, Clone, Default)]
pub struct BackendRouter {
    catalog: FxHashMap<String, String>,
    relay_models: FxHashSet<String>,
    virtual_models: FxHashMap<String, VirtualModel>,
    public_models: Vec<PublicModel>,
    has_session: bool,
    has_relay: bool,
}

impl BackendRouter {
    #[must_use]
    pub fn new(config: &AppConfig) -> Self {
        let mut router = Self::default();

        if let Some(session) = &config.session_backend {
            router.has_session = true;
            for model in &session.models {
                router
                    .catalog
                    .insert(model.name.clone(), model.bot_id.clone());
                router.public_models.push(PublicModel {
                    id: model.name.clone(),
                    owned_by: "system".to_string(),
                });
            }
        }

        if let Some(relay) = &config.relay_backend {
            router.has_relay = true;
            for model in &relay.models {
                router.relay_models.insert(model.clone());
                router.public_models.push(PublicModel {
                    id: model.clone(),
                    owned_by: relay.owned_by.clone(),
                });
            }
            for alias in &relay.virtual_models {
                router.virtual_models.insert(
                    alias.name.clone(),
                    VirtualModel {
                        target: alias.target.clone(),
                        flag: alias.flag.clone(),
                    },
                );
                router.public_models.push(PublicModel {
                    id: alias.name.clone(),
                    owned_by: relay.owned_by.clone(),
                });
            }
        }

        router
    }

    /// Pick the backend for a chat request.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::InvalidRequest` when no backend is configured.
    pub fn select(&self, probe: &BodyProbe) -> Result<Backend, GatewayError> {
        if self.has_relay {
            let relay_owned = match probe {
                BodyProbe::NotJson => true,
                BodyProbe::Json(_) => probe.model().is_some_and(|model| self.is_relay_model(model)),
            };
            if relay_owned || !self.has_session {
                return Ok(Backend::Relay);
            }
        }
        if self.has_session {
            return Ok(Backend::Session);
        }
        Err(GatewayError::InvalidRequest(
            "no chat backend is configured".to_string(),
        ))
    }

    /// Upstream bot id for a catalog model.
    #[must_use]
    pub fn bot_id(&self, model: &str) -> Option<&str> {
        self.catalog.get(model).map(String::as_str)
    }

    #[must_use]
    pub fn is_relay_model(&self, model: &str) -> bool {
        self.relay_models.contains(model) || self.virtual_models.contains_key(model)
    }

    #[must_use]
    pub fn virtual_model(&self, model: &str) -> Option<&VirtualModel> {
        self.virtual_models.get(model)
    }

    /// Every public model, session catalog first, in configuration order.
    #[must_use]
    pub fn public_models(&self) -> &[PublicModel] {
        &self.public_models
    }

    #[must_use]
    pub fn has_session_backend(&self) -> bool {
        self.has_session
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RelayBackendConfig, SessionBackendConfig};

    fn both() -> BackendRouter {
        BackendRouter::new(&AppConfig {
            session_backend: Some(SessionBackendConfig::default()),
            relay_backend: Some(RelayBackendConfig::default()),
            ..AppConfig::default()
        })
    }

    fn json(model: &str) -> BodyProbe {
        BodyProbe::parse(format!(r#"{{"model":"{model}","stream":true}}"#).as_bytes())
    }

    #[test]
    fn test_probe() {
        let probe = json("grok-3");
        assert_eq!(probe.model(), Some("grok-3"));
        assert!(probe.stream());

        let probe = BodyProbe::parse(b"model=grok-3");
        assert!(matches!(probe, BodyProbe::NotJson));
        assert!(probe.model().is_none());
        assert!(!probe.stream());

        assert!(!BodyProbe::parse(br#"{"stream":"yes"}"#).stream());
    }

    #[test]
    fn test_select_with_both_backends() {
        let router = both();
        assert_eq!(router.select(&json("grok-3")).unwrap(), Backend::Session);
        assert_eq!(router.select(&json("unknown")).unwrap(), Backend::Session);
        assert_eq!(router.select(&json("kimi-for-coding")).unwrap(), Backend::Relay);
        assert_eq!(
            router.select(&json("kimi-for-coding-thinking")).unwrap(),
            Backend::Relay
        );
        assert_eq!(
            router.select(&BodyProbe::parse(b"not json")).unwrap(),
            Backend::Relay
        );
    }

    #[test]
    fn test_select_relay_only_forwards_everything() {
        let router = BackendRouter::new(&AppConfig {
            relay_backend: Some(RelayBackendConfig::default()),
            ..AppConfig::default()
        });
        assert_eq!(router.select(&json("gpt-4o-mini")).unwrap(), Backend::Relay);
    }

    #[test]
    fn test_select_session_only() {
        let router = BackendRouter::new(&AppConfig {
            session_backend: Some(SessionBackendConfig::default()),
            ..AppConfig::default()
        });
        assert_eq!(router.select(&BodyProbe::parse(b"{")).unwrap(), Backend::Session);
        assert!(router.select(&json("kimi-for-coding")).is_ok());
    }

    #[test]
    fn test_select_without_backends() {
        let router = BackendRouter::new(&AppConfig::default());
        assert!(matches!(
            router.select(&json("x")),
            Err(GatewayError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_catalog_and_aliases() {
        let router = both();
        assert_eq!(router.bot_id("gpt-4o-mini"), Some("25865"));
        assert_eq!(router.bot_id("qwen3-max"), Some("25869"));
        assert!(router.bot_id("kimi-for-coding").is_none());
        let alias = router.virtual_model("kimi-for-coding-thinking").unwrap();
        assert_eq!(alias.target, "kimi-for-coding");
        assert_eq!(alias.flag, "thinking");
    }

    #[test]
    fn test_public_models_order_and_owner() {
        let router = both();
        let models = router.public_models();
        assert_eq!(models.len(), 10);
        assert_eq!(models[0].id, "gpt-4o-mini");
        assert_eq!(models[0].owned_by, "system");
        assert_eq!(models[8].id, "kimi-for-coding");
        assert_eq!(models[9].id, "kimi-for-coding-thinking");
        assert_eq!(models[9].owned_by, "moonshot-ai");
    }
}
