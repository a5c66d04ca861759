//! reqwest-backed transport

use async_trait::async_trait;
use pacer_core::{
    parse_retry_after, ConfigError, Method, PacerResult, RequestError, RequestSpec, Transport,
    TransportResponse,
};
use reqwest::header::{HeaderMap, AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER};
use reqwest::Client;
use std::time::Duration;

/// HTTP transport for a single REST backend.
///
/// Relative request URLs (`/api/services`) are joined onto `base_url`;
/// absolute URLs are sent as-is.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> PacerResult<Self> {
        Self::builder(base_url).build()
    }

    pub fn builder(base_url: impl Into<String>) -> HttpTransportBuilder {
        HttpTransportBuilder {
            base_url: base_url.into(),
            connect_timeout: None,
            default_headers: Vec::new(),
        }
    }

    /// Wrap an already configured client.
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: trim_base(base_url.into()),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Absolute URL for a request path.
    pub fn resolve(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") || self.base_url.is_empty() {
            return url.to_string();
        }
        if url.starts_with('/') {
            format!("{}{}", self.base_url, url)
        } else {
            format!("{}/{}", self.base_url, url)
        }
    }
}

/// Builder for [`HttpTransport`].
#[derive(Debug)]
pub struct HttpTransportBuilder {
    base_url: String,
    connect_timeout: Option<Duration>,
    default_headers: Vec<(String, String)>,
}

impl HttpTransportBuilder {
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Header sent with every request.
    pub fn default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.push((name.into(), value.into()));
        self
    }

    pub fn build(self) -> PacerResult<HttpTransport> {
        let mut headers = HeaderMap::new();
        for (name, value) in &self.default_headers {
            let header_name = reqwest::header::HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| invalid_header(name, e))?;
            let header_value = reqwest::header::HeaderValue::from_str(value)
                .map_err(|e| invalid_header(name, e))?;
            headers.insert(header_name, header_value);
        }

        let mut builder = Client::builder().default_headers(headers);
        if let Some(timeout) = self.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        let client = builder.build().map_err(|e| ConfigError::InvalidValue {
            field: "http_client".to_string(),
            value: self.base_url.clone(),
            reason: e.to_string(),
        })?;

        Ok(HttpTransport::with_client(client, self.base_url))
    }
}

fn invalid_header(name: &str, err: impl std::fmt::Display) -> ConfigError {
    ConfigError::InvalidValue {
        field: "default_header".to_string(),
        value: name.to_string(),
        reason: err.to_string(),
    }
}

fn trim_base(base_url: String) -> String {
    base_url.trim_end_matches('/').to_string()
}

fn to_reqwest(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
    }
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_retry_after)
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &RequestSpec) -> Result<TransportResponse, RequestError> {
        let url = self.resolve(&request.url);
        let network = |e: reqwest::Error| RequestError::Network {
            url: request.url.clone(),
            reason: e.to_string(),
        };

        let mut builder = self
            .client
            .request(to_reqwest(request.method), &url)
            .header(CONTENT_TYPE, "application/json");
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(token) = &request.bearer_token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(network)?;
        let status = response.status().as_u16();
        let retry_after = retry_after(response.headers());
        let body = response.bytes().await.map_err(network)?;

        let mut transport_response = TransportResponse::new(status, body.to_vec());
        transport_response.retry_after = retry_after;
        Ok(transport_response)
    }
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}
