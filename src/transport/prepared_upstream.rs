use http::header::{self, HeaderMap, HeaderName, HeaderValue};

use crate::config::RelayBackendConfig;
use crate::error::GatewayError;

/// Request headers that never cross the relay unchanged.
const STRIPPED_REQUEST_HEADERS: [HeaderName; 6] = [
    header::CONTENT_LENGTH,
    header::TRANSFER_ENCODING,
    header::CONNECTION,
    header::CONTENT_ENCODING,
    header::HOST,
    // Upstream bodies are relayed undecoded.
    header::ACCEPT_ENCODING,
];

/// Response headers dropped from a buffered relay reply.
const STRIPPED_RESPONSE_HEADERS: [HeaderName; 4] = [
    header::CONTENT_LENGTH,
    header::CONTENT_ENCODING,
    header::TRANSFER_ENCODING,
    header::CONNECTION,
];

/// Precomputed relay target used on the hot request path.
#[derive(Debug, Clone)]
pub struct PreparedRelay {
    chat_url: String,
    host: HeaderValue,
    user_agent: HeaderValue,
    authorization: Option<HeaderValue>,
}

impl PreparedRelay {
    /// # Errors
    ///
    /// Returns `GatewayError::Config` when the base URL has no host or a
    /// configured header value is invalid.
    pub fn new(config: &RelayBackendConfig) -> Result<Self, GatewayError> {
        let base = config.base_url.trim_end_matches('/');
        let chat_url = format!("{base}/v1/chat/completions");
        let parsed = url::Url::parse(&chat_url)
            .map_err(|e| GatewayError::Config(format!("invalid relay URL: {e}")))?;
        let host = match (parsed.host_str(), parsed.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => {
                return Err(GatewayError::Config("relay URL has no host".to_string()));
            }
        };

        let host = HeaderValue::from_str(&host)
            .map_err(|_| GatewayError::Config("invalid relay host".to_string()))?;
        let user_agent = HeaderValue::from_str(&config.user_agent)
            .map_err(|_| GatewayError::Config("invalid relay user_agent".to_string()))?;
        let authorization = match config.api_key.as_deref().filter(|key| !key.is_empty()) {
            Some(key) => Some(
                HeaderValue::from_str(&format!("Bearer {key}"))
                    .map_err(|_| GatewayError::Config("invalid relay api_key".to_string()))?,
            ),
            None => None,
        };

        Ok(Self {
            chat_url,
            host,
            user_agent,
            authorization,
        })
    }

    #[must_use]
    pub fn chat_url(&self) -> &str {
        &self.chat_url
    }

    #[must_use]
    pub fn has_own_credentials(&self) -> bool {
        self.authorization.is_some()
    }

    /// Caller headers rewritten for the relay upstream.
    #[must_use]
    pub fn outbound_headers(&self, inbound: &HeaderMap) -> HeaderMap {
        let mut headers = inbound.clone();
        for name in &STRIPPED_REQUEST_HEADERS {
            headers.remove(name);
        }
        headers.insert(header::HOST, self.host.clone());
        headers.insert(header::USER_AGENT, self.user_agent.clone());
        if let Some(authorization) = &self.authorization {
            headers.insert(header::AUTHORIZATION, authorization.clone());
        }
        headers
    }
}

/// Drop framing headers that no longer describe a re-buffered body.
pub fn strip_response_headers(headers: &mut HeaderMap) {
    for name in &STRIPPED_RESPONSE_HEADERS {
        headers.remove(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn relay(base_url: &str, api_key: Option<&str>) -> PreparedRelay {
        PreparedRelay::new(&RelayBackendConfig {
            base_url: base_url.to_string(),
            api_key: api_key.map(str::to_string),
            ..RelayBackendConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_chat_url_and_host() {
        let prepared = relay("https://api.kimi.com/coding/", None);
        assert_eq!(
            prepared.chat_url(),
            "https://api.kimi.com/coding/v1/chat/completions"
        );
        assert_eq!(prepared.host, "api.kimi.com");

        let prepared = relay("http://127.0.0.1:9000", None);
        assert_eq!(prepared.host, "127.0.0.1:9000");
    }

    #[test]
    fn test_outbound_headers_strip_and_force() {
        let prepared = relay("https://api.kimi.com/coding", None);
        let mut inbound = HeaderMap::new();
        inbound.insert(header::HOST, HeaderValue::from_static("localhost:8000"));
        inbound.insert(header::CONTENT_LENGTH, HeaderValue::from_static("12"));
        inbound.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        inbound.insert(header::USER_AGENT, HeaderValue::from_static("curl/8"));
        inbound.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer sk-1"));
        inbound.insert("x-custom", HeaderValue::from_static("kept"));

        let out = prepared.outbound_headers(&inbound);
        assert_eq!(out[header::HOST], "api.kimi.com");
        assert_eq!(out[header::USER_AGENT], "KimiCLI/0.2.0");
        assert_eq!(out[header::AUTHORIZATION], "Bearer sk-1");
        assert_eq!(out["x-custom"], "kept");
        assert!(out.get(header::CONTENT_LENGTH).is_none());
        assert!(out.get(header::CONNECTION).is_none());
    }

    #[test]
    fn test_own_api_key_replaces_authorization() {
        let prepared = relay("https://api.kimi.com/coding", Some("relay-key"));
        assert!(prepared.has_own_credentials());
        let mut inbound = HeaderMap::new();
        inbound.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer client"));
        let out = prepared.outbound_headers(&inbound);
        assert_eq!(out[header::AUTHORIZATION], "Bearer relay-key");
    }

    #[test]
    fn test_strip_response_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("3"));
        headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        headers.insert("x-request-id", HeaderValue::from_static("r1"));
        strip_response_headers(&mut headers);
        assert_eq!(headers.len(), 1);
        assert_eq!(headers["x-request-id"], "r1");
    }
}
