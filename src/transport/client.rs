//! HTTP request model and the reqwest-backed transport.
//!
//! An [`ApiRequest`] is a plain value: method, path, query, cookie header,
//! optional JSON body. Pagination clones the template request per page, so no
//! two page tasks ever share a mutable parameter map.
//!
//! Proxy routing never touches the shared client: every proxied attempt builds
//! its own client pointed at the lease address it was handed.

use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, COOKIE, ORIGIN, REFERER};
use reqwest::{Client, ClientBuilder, Method, Proxy};
use tracing::{debug, instrument, warn};
use url::Url;

use super::FetchError;

/// Browser User-Agent sent with every platform request.
pub const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

/// Default HTTP connect timeout.
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default per-request timeout.
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Query parameters, ordered so encoded URLs are stable.
pub type QueryParams = BTreeMap<String, String>;

/// One platform request, independent of how it will be routed.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    /// HTTP method.
    pub method: Method,
    /// Path relative to the transport's base URL, e.g. `/api/v3/...`.
    pub path: String,
    /// Query string parameters.
    pub query: QueryParams,
    /// Value of the `Cookie` header carrying the session.
    pub cookies: String,
    /// Extra headers applied after the common ones.
    pub headers: Vec<(String, String)>,
    /// JSON body for POST requests.
    pub body: Option<serde_json::Value>,
    /// Per-request deadline overriding the client default.
    pub timeout: Option<Duration>,
}

impl ApiRequest {
    /// Creates a GET request for `path`.
    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    /// Creates a POST request for `path`.
    #[must_use]
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: QueryParams::new(),
            cookies: String::new(),
            headers: Vec::new(),
            body: None,
            timeout: None,
        }
    }

    /// Sets (or overwrites) a query parameter.
    #[must_use]
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    /// Sets the session cookie header.
    #[must_use]
    pub fn with_cookies(mut self, cookies: impl Into<String>) -> Self {
        self.cookies = cookies.into();
        self
    }

    /// Adds a custom header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sets the JSON body.
    #[must_use]
    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Sets a per-request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Resolves the full URL against `base`, query string included.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::InvalidUrl`] if the path cannot be joined.
    pub fn url(&self, base: &Url) -> Result<Url, FetchError> {
        let mut url = base
            .join(&self.path)
            .map_err(|_| FetchError::invalid_url(format!("{base}{}", self.path)))?;
        if !self.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &self.query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }
}

/// A successful (2xx) response with its body read into memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    /// Final request URL, kept for error context.
    pub url: String,
    /// HTTP status code.
    pub status: u16,
    /// Response body.
    pub body: String,
}

impl RawResponse {
    /// Creates a 200 response, mostly useful for scripted transports in tests.
    #[must_use]
    pub fn ok(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            status: 200,
            body: body.into(),
        }
    }
}

/// Sends one request, once. Retrying is the caller's job.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Issues `request`, optionally routed through the proxy at `proxy`.
    ///
    /// Non-2xx statuses are returned as [`FetchError::HttpStatus`].
    async fn send(&self, request: &ApiRequest, proxy: Option<&str>)
    -> Result<RawResponse, FetchError>;
}

/// Client settings shared by the direct client and every per-attempt proxied client.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Whole-request timeout.
    pub request_timeout: Duration,
    /// User-Agent header.
    pub user_agent: String,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            request_timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
            user_agent: BROWSER_USER_AGENT.to_string(),
        }
    }
}

/// [`HttpTransport`] backed by reqwest.
///
/// The direct client is built once and cloned per request (connection
/// pooling). Proxied attempts get a fresh client bound to the lease address,
/// so swapping proxies never races with requests already in flight.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    base_url: Url,
    client: Client,
    settings: ClientSettings,
}

impl ReqwestTransport {
    /// Creates a transport for `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::InvalidUrl`] for a malformed base URL, or
    /// [`FetchError::Network`] if the client cannot be built.
    #[instrument(level = "debug", skip(settings))]
    pub fn new(base_url: &str, settings: ClientSettings) -> Result<Self, FetchError> {
        let base_url = Url::parse(base_url).map_err(|_| FetchError::invalid_url(base_url))?;
        let client = build_client(&settings, None, base_url.as_str())?;
        Ok(Self {
            base_url,
            client,
            settings,
        })
    }

    /// Returns the base URL requests are resolved against.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Returns the direct (unproxied) client.
    #[must_use]
    pub fn client(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(
        &self,
        request: &ApiRequest,
        proxy: Option<&str>,
    ) -> Result<RawResponse, FetchError> {
        let url = request.url(&self.base_url)?;
        let url_str = url.to_string();

        let client = match proxy {
            Some(address) => build_client(&self.settings, Some(address), &url_str)?,
            None => self.client.clone(),
        };

        let origin = self.base_url.origin().ascii_serialization();
        let mut builder = client
            .request(request.method.clone(), url)
            .header(CONTENT_TYPE, "application/json")
            .header(ORIGIN, origin.as_str())
            .header(REFERER, origin.as_str());
        if !request.cookies.is_empty() {
            builder = builder.header(COOKIE, request.cookies.as_str());
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        debug!(url = %url_str, proxied = proxy.is_some(), "sending request");

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::timeout(&url_str)
            } else {
                FetchError::network(&url_str, e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::http_status(&url_str, status.as_u16()));
        }

        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::timeout(&url_str)
            } else {
                FetchError::network(&url_str, e)
            }
        })?;

        Ok(RawResponse {
            url: url_str,
            status: status.as_u16(),
            body,
        })
    }
}

fn build_client(
    settings: &ClientSettings,
    proxy: Option<&str>,
    url: &str,
) -> Result<Client, FetchError> {
    let mut builder = base_client_builder(settings);
    if let Some(address) = proxy {
        let proxy_url = if address.contains("://") {
            address.to_string()
        } else {
            format!("http://{address}")
        };
        let resolved = Proxy::all(&proxy_url).map_err(|e| FetchError::network(url, e))?;
        builder = builder.no_proxy().proxy(resolved);
        return builder.build().map_err(|e| FetchError::network(url, e));
    }

    // Some sandboxed environments panic while reading system proxy settings;
    // fall back to a client without system proxy lookup.
    match catch_unwind(AssertUnwindSafe(|| base_client_builder(settings).build())) {
        Ok(result) => result.map_err(|e| FetchError::network(url, e)),
        Err(_) => {
            warn!("HTTP client builder panicked while loading system proxy settings; retrying without it");
            base_client_builder(settings)
                .no_proxy()
                .build()
                .map_err(|e| FetchError::network(url, e))
        }
    }
}

fn base_client_builder(settings: &ClientSettings) -> ClientBuilder {
    Client::builder()
        .connect_timeout(settings.connect_timeout)
        .timeout(settings.request_timeout)
        .gzip(true)
        .user_agent(settings.user_agent.clone())
}
