//! Client for the AIPKit WordPress chat plugin.
//!
//! A turn takes two requests against `admin-ajax.php`: a form POST that caches
//! the user message and returns a per-turn `cache_key`, then a GET that opens
//! the event stream for that key.

use bytes::Bytes;
use http::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE, COOKIE, ORIGIN, REFERER, USER_AGENT};

use super::sanitize_upstream_error;
use crate::config::SessionBackendConfig;
use crate::error::GatewayError;
use crate::transport::HttpTransport;
use crate::util::{random_hex, unix_now_millis};

const HANDSHAKE_ACTION: &str = "aipkit_cache_sse_message";
const STREAM_ACTION: &str = "aipkit_frontend_chat_stream";

/// Parameters of one event-stream request.
#[derive(Debug, Clone, Copy)]
pub struct StreamRequest<'a> {
    pub cache_key: &'a str,
    pub bot_id: &'a str,
    /// The conversation's fixed upstream token.
    pub conversation_token: &'a str,
    pub continuation_id: Option<&'a str>,
    pub web_search: bool,
}

/// Pre-built endpoint and browser headers for the session backend.
#[derive(Debug, Clone)]
pub struct AipkitProvider {
    endpoint: url::Url,
    ajax_nonce: String,
    session_id: String,
    post_id: String,
    base_headers: HeaderMap,
}

impl AipkitProvider {
    /// # Errors
    ///
    /// Returns `GatewayError::Config` when the endpoint URL or a header value
    /// (user agent, cookie) is invalid.
    pub fn new(config: &SessionBackendConfig) -> Result<Self, GatewayError> {
        let origin = config.base_url.trim_end_matches('/');
        let endpoint = url::Url::parse(&format!("{origin}{}", config.ajax_path))
            .map_err(|e| GatewayError::Config(format!("invalid session backend URL: {e}")))?;

        let mut base_headers = HeaderMap::new();
        insert_header(&mut base_headers, USER_AGENT, &config.user_agent)?;
        insert_header(&mut base_headers, REFERER, &format!("{origin}/"))?;
        insert_header(&mut base_headers, ORIGIN, origin)?;
        insert_header(&mut base_headers, COOKIE, &config.cookie)?;

        Ok(Self {
            endpoint,
            ajax_nonce: config.ajax_nonce.clone(),
            session_id: config.session_id.clone(),
            post_id: config.post_id.clone(),
            base_headers,
        })
    }

    /// `user_client_message_id` value: unique per handshake.
    #[must_use]
    pub fn client_message_id(bot_id: &str) -> String {
        format!(
            "aipkit-client-msg-{bot_id}-{}-{}",
            unix_now_millis(),
            random_hex(5)
        )
    }

    #[must_use]
    pub fn handshake_form(&self, message: &str, bot_id: &str) -> String {
        url::form_urlencoded::Serializer::new(String::new())
            .append_pair("action", HANDSHAKE_ACTION)
            .append_pair("message", message)
            .append_pair("_ajax_nonce", &self.ajax_nonce)
            .append_pair("bot_id", bot_id)
            .append_pair("user_client_message_id", &Self::client_message_id(bot_id))
            .finish()
    }

    #[must_use]
    pub fn stream_url(&self, request: &StreamRequest<'_>) -> url::Url {
        let mut url = self.endpoint.clone();
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("action", STREAM_ACTION)
                .append_pair("cache_key", request.cache_key)
                .append_pair("bot_id", request.bot_id)
                .append_pair("session_id", &self.session_id)
                .append_pair("conversation_uuid", request.conversation_token)
                .append_pair("post_id", &self.post_id)
                .append_pair("_ts", &unix_now_millis().to_string())
                .append_pair("_ajax_nonce", &self.ajax_nonce);
            if let Some(previous) = request.continuation_id {
                query.append_pair("previous_openai_response_id", previous);
            }
            if request.web_search {
                query.append_pair("frontend_web_search_active", "true");
            }
        }
        url
    }

    /// Submit `message` and obtain the per-turn cache key.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Handshake` when the request fails, the status is
    /// not a success, or the body lacks `success: true` with a string
    /// `data.cache_key`.
    pub async fn negotiate(
        &self,
        transport: &HttpTransport,
        message: &str,
        bot_id: &str,
    ) -> Result<String, GatewayError> {
        let mut headers = self.base_headers.clone();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded"),
        );
        let form = self.handshake_form(message, bot_id);

        let response = transport
            .send_request_url(&self.endpoint, http::Method::POST, &headers, Bytes::from(form))
            .await
            .map_err(|err| GatewayError::Handshake(err.to_string()))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| GatewayError::Handshake(format!("failed to read response: {e}")))?;
        if !status.is_success() {
            return Err(GatewayError::Handshake(format!(
                "status={}, message={}",
                status.as_u16(),
                sanitize_upstream_error(&body)
            )));
        }

        let json: serde_json::Value = serde_json::from_slice(&body)
            .map_err(|_| GatewayError::Handshake("response is not JSON".to_string()))?;
        if json.get("success").and_then(serde_json::Value::as_bool) != Some(true) {
            return Err(GatewayError::Handshake(format!(
                "upstream rejected message: {}",
                sanitize_upstream_error(&body)
            )));
        }
        json.get("data")
            .and_then(|data| data.get("cache_key"))
            .and_then(serde_json::Value::as_str)
            .filter(|key| !key.is_empty())
            .map(str::to_string)
            .ok_or_else(|| GatewayError::Handshake("response has no cache_key".to_string()))
    }

    /// Open the event stream for a negotiated turn.
    ///
    /// The returned response has a success status; its body is unread.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Transport` when the request fails and
    /// `GatewayError::Upstream` for a non-success status.
    pub async fn open_stream(
        &self,
        transport: &HttpTransport,
        request: &StreamRequest<'_>,
    ) -> Result<reqwest::Response, GatewayError> {
        let mut headers = self.base_headers.clone();
        headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
        let url = self.stream_url(request);

        let response = transport
            .send_request_url(&url, http::Method::GET, &headers, Bytes::new())
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.bytes().await.unwrap_or_default();
            return Err(GatewayError::Upstream {
                status: status.as_u16(),
                message: sanitize_upstream_error(&body),
            });
        }
        Ok(response)
    }
}

fn insert_header(
    headers: &mut HeaderMap,
    name: HeaderName,
    value: &str,
) -> Result<(), GatewayError> {
    if value.is_empty() {
        return Ok(());
    }
    let value = HeaderValue::from_str(value)
        .map_err(|_| GatewayError::Config(format!("invalid value for header {name}")))?;
    headers.insert(name, value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> AipkitProvider {
        AipkitProvider::new(&SessionBackendConfig {
            base_url: "https://chatgptfree.ai/".to_string(),
            cookie: "wp=1".to_string(),
            ajax_nonce: "n0nce".to_string(),
            session_id: "sess".to_string(),
            post_id: "42".to_string(),
            ..SessionBackendConfig::default()
        })
        .unwrap()
    }

    fn query(url: &url::Url) -> Vec<(String, String)> {
        url.query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    #[test]
    fn test_base_headers() {
        let provider = provider();
        assert_eq!(provider.base_headers[REFERER], "https://chatgptfree.ai/");
        assert_eq!(provider.base_headers[ORIGIN], "https://chatgptfree.ai");
        assert_eq!(provider.base_headers[COOKIE], "wp=1");
        assert!(provider.base_headers[USER_AGENT]
            .to_str()
            .unwrap()
            .contains("Chrome/141"));
        assert_eq!(
            provider.endpoint.as_str(),
            "https://chatgptfree.ai/wp-admin/admin-ajax.php"
        );
    }

    #[test]
    fn test_client_message_id_shape() {
        let id = AipkitProvider::client_message_id("25865");
        let rest = id.strip_prefix("aipkit-client-msg-25865-").unwrap();
        let (millis, suffix) = rest.split_once('-').unwrap();
        assert!(millis.parse::<u128>().is_ok());
        assert_eq!(suffix.len(), 5);
    }

    #[test]
    fn test_handshake_form_fields() {
        let form = provider().handshake_form("hi & bye", "25865");
        let fields: Vec<(String, String)> = url::form_urlencoded::parse(form.as_bytes())
            .into_owned()
            .collect();
        let get = |key: &str| {
            fields
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
        };
        assert_eq!(get("action"), Some("aipkit_cache_sse_message"));
        assert_eq!(get("message"), Some("hi & bye"));
        assert_eq!(get("_ajax_nonce"), Some("n0nce"));
        assert_eq!(get("bot_id"), Some("25865"));
        assert!(get("user_client_message_id")
            .unwrap()
            .starts_with("aipkit-client-msg-25865-"));
    }

    #[test]
    fn test_stream_url_first_turn() {
        let url = provider().stream_url(&StreamRequest {
            cache_key: "ck",
            bot_id: "25865",
            conversation_token: "uuid-1",
            continuation_id: None,
            web_search: false,
        });
        let pairs = query(&url);
        let keys: Vec<&str> = pairs.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(
            keys,
            [
                "action",
                "cache_key",
                "bot_id",
                "session_id",
                "conversation_uuid",
                "post_id",
                "_ts",
                "_ajax_nonce"
            ]
        );
        assert_eq!(pairs[0].1, "aipkit_frontend_chat_stream");
        assert_eq!(pairs[4].1, "uuid-1");
    }

    #[test]
    fn test_stream_url_continuation_and_web_search() {
        let url = provider().stream_url(&StreamRequest {
            cache_key: "ck",
            bot_id: "25865",
            conversation_token: "uuid-1",
            continuation_id: Some("resp_1"),
            web_search: true,
        });
        let pairs = query(&url);
        assert!(pairs.contains(&(
            "previous_openai_response_id".to_string(),
            "resp_1".to_string()
        )));
        assert!(pairs.contains(&(
            "frontend_web_search_active".to_string(),
            "true".to_string()
        )));
    }

    #[test]
    fn test_invalid_cookie_is_config_error() {
        let err = AipkitProvider::new(&SessionBackendConfig {
            cookie: "bad\ncookie".to_string(),
            ..SessionBackendConfig::default()
        })
        .unwrap_err();
        assert!(matches!(err, GatewayError::Config(_)));
    }
}
