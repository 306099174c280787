use std::sync::Arc;
use std::sync::{Once, OnceLock};
use std::time::Duration;

use http_body_util::Full;
use hyper_rustls::HttpsConnector;
use hyper_rustls::HttpsConnectorBuilder;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client as HyperClient;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::config::ServerConfig;
use crate::error::GatewayError;

static RUSTLS_PROVIDER_INIT: Once = Once::new();
pub(crate) const PARSED_URL_CACHE_MAX_ENTRIES: usize = 512;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const H2_KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(60);
const H2_KEEP_ALIVE_TIMEOUT: Duration = Duration::from_secs(10);

type HyperPassthroughHttpsClient = HyperClient<HttpsConnector<HttpConnector>, Full<bytes::Bytes>>;
type HyperPassthroughHttpClient = HyperClient<HttpConnector, Full<bytes::Bytes>>;

fn build_reqwest_client(
    pool_max_idle_per_host: usize,
    pool_idle_timeout: Option<Duration>,
    timeout: Option<Duration>,
    use_env_proxy: bool,
) -> Result<reqwest::Client, GatewayError> {
    let mut builder = reqwest::Client::builder()
        .pool_max_idle_per_host(pool_max_idle_per_host)
        .pool_idle_timeout(pool_idle_timeout)
        .tcp_nodelay(true)
        .connect_timeout(CONNECT_TIMEOUT)
        .redirect(reqwest::redirect::Policy::none());

    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    if !use_env_proxy {
        builder = builder.no_proxy();
    }

    builder
        .build()
        .map_err(|err| GatewayError::Transport(format!("Failed to build HTTP client: {err}")))
}

/// HTTP transport for both upstreams.
///
/// Every call is a single attempt: failures are returned to the caller as
/// [`GatewayError::Transport`] and never retried.
pub struct HttpTransport {
    base_client: OnceLock<Arc<reqwest::Client>>,
    parsed_url_cache: RwLock<FxHashMap<String, Arc<url::Url>>>,
    reqwest_pool_max_idle_per_host: usize,
    reqwest_pool_idle_timeout: Option<Duration>,
    timeout: Option<Duration>,
    reqwest_use_env_proxy: bool,
    hyper_passthrough_enabled: bool,
    hyper_passthrough_https_client: OnceLock<HyperPassthroughHttpsClient>,
    hyper_passthrough_http_client: OnceLock<HyperPassthroughHttpClient>,
}

impl HttpTransport {
    /// Create a transport with pooling and timeouts from the server config.
    ///
    /// `timeout: 0` disables the upstream timeout. Clients are built on first
    /// use.
    #[must_use]
    pub fn new(config: &ServerConfig) -> Self {
        RUSTLS_PROVIDER_INIT.call_once(|| {
            let _ = rustls::crypto::ring::default_provider().install_default();
        });

        let pool_idle_timeout = if config.http_pool_idle_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(config.http_pool_idle_timeout_secs))
        };
        let timeout = (config.timeout > 0).then(|| Duration::from_secs(config.timeout));

        Self {
            base_client: OnceLock::new(),
            parsed_url_cache: RwLock::new(FxHashMap::default()),
            reqwest_pool_max_idle_per_host: config.http_pool_max_idle_per_host.max(1),
            reqwest_pool_idle_timeout: pool_idle_timeout,
            timeout,
            reqwest_use_env_proxy: config.http_use_env_proxy,
            hyper_passthrough_enabled: !config.http_use_env_proxy,
            hyper_passthrough_https_client: OnceLock::new(),
            hyper_passthrough_http_client: OnceLock::new(),
        }
    }

    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    #[must_use]
    pub fn hyper_passthrough_enabled(&self) -> bool {
        self.hyper_passthrough_enabled
    }

    fn build_base_reqwest_client(&self) -> Arc<reqwest::Client> {
        match build_reqwest_client(
            self.reqwest_pool_max_idle_per_host,
            self.reqwest_pool_idle_timeout,
            self.timeout,
            self.reqwest_use_env_proxy,
        ) {
            Ok(client) => Arc::new(client),
            Err(err) => {
                tracing::error!(error = %err, "failed to build configured reqwest client, falling back to default client");
                Arc::new(reqwest::Client::new())
            }
        }
    }

    fn base_reqwest_client(&self) -> Arc<reqwest::Client> {
        if let Some(existing) = self.base_client.get() {
            return existing.clone();
        }

        let built = self.build_base_reqwest_client();
        let _ = self.base_client.set(built.clone());
        self.base_client.get().cloned().unwrap_or(built)
    }

    fn hyper_passthrough_https_client(&self) -> Option<&HyperPassthroughHttpsClient> {
        if !self.hyper_passthrough_enabled {
            return None;
        }

        Some(self.hyper_passthrough_https_client.get_or_init(|| {
            let mut connector = HttpConnector::new();
            connector.enforce_http(false);
            connector.set_nodelay(true);
            connector.set_connect_timeout(Some(CONNECT_TIMEOUT));
            let https = HttpsConnectorBuilder::new()
                .with_webpki_roots()
                .https_or_http()
                .enable_http1()
                .enable_http2()
                .wrap_connector(connector);
            let mut builder = HyperClient::builder(TokioExecutor::new());
            builder.pool_max_idle_per_host(self.reqwest_pool_max_idle_per_host);
            builder.pool_idle_timeout(self.reqwest_pool_idle_timeout);
            builder.pool_timer(TokioTimer::new());
            builder.timer(TokioTimer::new());
            builder.http2_keep_alive_interval(H2_KEEP_ALIVE_INTERVAL);
            builder.http2_keep_alive_timeout(H2_KEEP_ALIVE_TIMEOUT);
            builder.build(https)
        }))
    }

    fn hyper_passthrough_http_client(&self) -> Option<&HyperPassthroughHttpClient> {
        if !self.hyper_passthrough_enabled {
            return None;
        }

        Some(self.hyper_passthrough_http_client.get_or_init(|| {
            let mut connector = HttpConnector::new();
            connector.enforce_http(true);
            connector.set_nodelay(true);
            connector.set_connect_timeout(Some(CONNECT_TIMEOUT));
            let mut builder = HyperClient::builder(TokioExecutor::new());
            builder.pool_max_idle_per_host(self.reqwest_pool_max_idle_per_host);
            builder.pool_idle_timeout(self.reqwest_pool_idle_timeout);
            builder.pool_timer(TokioTimer::new());
            builder.build(connector)
        }))
    }

    /// Parse `url`, memoizing the result in a bounded cache.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Transport`] when `url` does not parse.
    pub fn parsed_url(&self, url: &str) -> Result<Arc<url::Url>, GatewayError> {
        if let Some(cached) = self.parsed_url_cache.read().get(url) {
            return Ok(cached.clone());
        }

        let parsed = url::Url::parse(url)
            .map_err(|e| GatewayError::Transport(format!("Invalid upstream URL: {e}")))?;

        let mut cache = self.parsed_url_cache.write();
        if let Some(existing) = cache.get(url) {
            return Ok(existing.clone());
        }
        if cache.len() >= PARSED_URL_CACHE_MAX_ENTRIES {
            cache.clear();
        }
        let parsed = Arc::new(parsed);
        cache.insert(url.to_string(), parsed.clone());
        Ok(parsed)
    }

    /// Send a request through the pooled reqwest client.
    ///
    /// The response body is left unread so callers may stream it.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Transport`] when URL parsing or request
    /// execution fails.
    pub async fn send_request(
        &self,
        url: &str,
        method: http::Method,
        headers: &http::HeaderMap,
        body: bytes::Bytes,
    ) -> Result<reqwest::Response, GatewayError> {
        let parsed_url = self.parsed_url(url)?;
        self.send_request_url(parsed_url.as_ref(), method, headers, body)
            .await
    }

    /// Send a request using a pre-parsed upstream URL.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Transport`] when request execution fails.
    pub async fn send_request_url(
        &self,
        url: &url::Url,
        method: http::Method,
        headers: &http::HeaderMap,
        body: bytes::Bytes,
    ) -> Result<reqwest::Response, GatewayError> {
        let client = self.base_reqwest_client();
        let mut request = reqwest::Request::new(method, url.clone());
        *request.headers_mut() = headers.clone();
        if !body.is_empty() {
            *request.body_mut() = Some(reqwest::Body::from(body));
        }

        client
            .execute(request)
            .await
            .map_err(|err| GatewayError::Transport(err.to_string()))
    }

    /// Send a request whose response is relayed byte-for-byte.
    ///
    /// Uses the hyper client unless an environment proxy is configured, in
    /// which case reqwest carries the request. The returned body streams the
    /// upstream bytes as they arrive.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Transport`] when the URL is invalid, the request
    /// cannot be sent, or the response headers do not arrive within the
    /// configured timeout.
    pub async fn send_passthrough(
        &self,
        url: &str,
        method: http::Method,
        headers: &http::HeaderMap,
        body: bytes::Bytes,
    ) -> Result<http::Response<axum::body::Body>, GatewayError> {
        if !self.hyper_passthrough_enabled {
            let response = self.send_request(url, method, headers, body).await?;
            let mut relayed = http::Response::new(axum::body::Body::empty());
            *relayed.status_mut() = response.status();
            *relayed.headers_mut() = response.headers().clone();
            *relayed.body_mut() = axum::body::Body::from_stream(response.bytes_stream());
            return Ok(relayed);
        }

        let uri: http::Uri = url
            .parse()
            .map_err(|e| GatewayError::Transport(format!("Invalid upstream URI: {e}")))?;
        let mut request = http::Request::new(Full::new(body));
        *request.method_mut() = method;
        *request.headers_mut() = headers.clone();
        let is_plain_http = uri.scheme_str() == Some("http");
        *request.uri_mut() = uri;

        let pending = async {
            if is_plain_http {
                let client = self.hyper_passthrough_http_client().ok_or_else(|| {
                    GatewayError::Transport("Hyper passthrough client is disabled".to_string())
                })?;
                client
                    .request(request)
                    .await
                    .map_err(|err| GatewayError::Transport(err.to_string()))
            } else {
                let client = self.hyper_passthrough_https_client().ok_or_else(|| {
                    GatewayError::Transport("Hyper passthrough client is disabled".to_string())
                })?;
                client
                    .request(request)
                    .await
                    .map_err(|err| GatewayError::Transport(err.to_string()))
            }
        };

        let response = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, pending)
                .await
                .map_err(|_| GatewayError::Transport("upstream request timed out".to_string()))??,
            None => pending.await?,
        };
        Ok(response.map(axum::body::Body::new))
    }
}
