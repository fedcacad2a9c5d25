use std::time::Duration;

use crate::config::ServerConfig;
use crate::error::RelayError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

fn build_reqwest_client(
    pool_max_idle_per_host: usize,
    pool_idle_timeout: Option<Duration>,
    timeout: Duration,
    use_env_proxy: bool,
    proxy_url: Option<&str>,
) -> Result<reqwest::Client, RelayError> {
    let mut builder = reqwest::Client::builder()
        .pool_max_idle_per_host(pool_max_idle_per_host)
        .pool_idle_timeout(pool_idle_timeout)
        .tcp_nodelay(true)
        .connect_timeout(CONNECT_TIMEOUT)
        .redirect(reqwest::redirect::Policy::none())
        .timeout(timeout);

    if let Some(proxy_url) = proxy_url {
        let proxy = reqwest::Proxy::all(proxy_url)
            .map_err(|err| RelayError::Config(format!("Invalid proxy URL: {err}")))?;
        builder = builder.no_proxy().proxy(proxy);
    } else if !use_env_proxy {
        builder = builder.no_proxy();
    }

    builder
        .build()
        .map_err(|err| RelayError::Config(format!("Failed to build HTTP client: {err}")))
}

/// Pooled HTTP client for the upstream completion API.
pub struct HttpTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpTransport {
    /// Build the transport from server settings, routing through `proxy_url` when set.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] when the proxy URL is invalid or the
    /// client cannot be built.
    pub fn new(config: &ServerConfig, proxy_url: Option<&str>) -> Result<Self, RelayError> {
        let pool_idle_timeout = if config.http_pool_idle_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(config.http_pool_idle_timeout_secs))
        };
        let timeout = Duration::from_secs(config.timeout);
        let proxy_url = proxy_url.map(str::trim).filter(|url| !url.is_empty());

        let client = build_reqwest_client(
            config.http_pool_max_idle_per_host.max(1),
            pool_idle_timeout,
            timeout,
            config.http_use_env_proxy,
            proxy_url,
        )?;
        Ok(Self { client, timeout })
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// POST a JSON body and return the response with its body unread, for
    /// stream reading. There are no retries: the first outcome is final.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Transport`] when the connection fails or no
    /// response headers arrive within the timeout.
    pub async fn send_stream(
        &self,
        url: &url::Url,
        headers: &http::HeaderMap,
        body: bytes::Bytes,
    ) -> Result<reqwest::Response, RelayError> {
        let mut request = reqwest::Request::new(http::Method::POST, url.clone());
        *request.headers_mut() = headers.clone();
        *request.body_mut() = Some(reqwest::Body::from(body));

        self.client
            .execute(request)
            .await
            .map_err(|err| RelayError::Transport(transport_error_message(&err)))
    }
}

fn transport_error_message(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        "Upstream request timed out".to_string()
    } else if err.is_connect() {
        "Failed to connect to upstream".to_string()
    } else {
        format!("Upstream request failed: {err}")
    }
}
