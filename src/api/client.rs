use futures::StreamExt;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::redirect::Policy;
use reqwest::{Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;
use url::Url;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_RESPONSE_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// Outcome classification for a single API call.
///
/// `AuthorizationRequired` is the only variant the engine recovers from;
/// everything else is surfaced as "no new data".
#[derive(Debug, Error)]
pub enum ApiError {
    /// The server rejected the access token (HTTP 401)
    #[error("Authorization required")]
    AuthorizationRequired,
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with a non-2xx status other than 401
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    #[error("Request timed out")]
    Timeout,
    #[error("Response too large")]
    ResponseTooLarge,
    /// Body was not the JSON shape the endpoint promises
    #[error("Malformed response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("Cannot build request URL from base {0}")]
    InvalidBase(String),
}

impl ApiError {
    pub fn is_authorization_required(&self) -> bool {
        matches!(self, ApiError::AuthorizationRequired)
    }
}

/// One API call, relative to the configured base URL.
///
/// Path segments are percent-encoded individually, so stream ids such as
/// `user/123/category/global.all` travel as a single segment.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    segments: Vec<String>,
    query: Vec<(String, String)>,
    body: Option<serde_json::Value>,
}

impl ApiRequest {
    pub fn new<S: AsRef<str>>(method: Method, segments: &[S]) -> Self {
        Self {
            method,
            segments: segments.iter().map(|s| s.as_ref().to_string()).collect(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get<S: AsRef<str>>(segments: &[S]) -> Self {
        Self::new(Method::GET, segments)
    }

    pub fn post<S: AsRef<str>>(segments: &[S]) -> Self {
        Self::new(Method::POST, segments)
    }

    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    #[cfg(test)]
    pub(crate) fn method(&self) -> &Method {
        &self.method
    }

    /// Slash-joined endpoint name, for logs.
    pub fn endpoint(&self) -> String {
        self.segments.join("/")
    }

    /// Resolve against `base`, appending segments after any base path (e.g. `/v3`).
    pub fn url(&self, base: &Url) -> Result<Url, ApiError> {
        let mut url = base.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| ApiError::InvalidBase(base.to_string()))?;
            path.pop_if_empty();
            path.extend(self.segments.iter());
        }
        if !self.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &self.query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }
}

/// Redirect policy for API calls: at most 3 hops, loops rejected.
fn create_redirect_policy() -> Policy {
    Policy::custom(|attempt| {
        if attempt.previous().len() >= 3 {
            return attempt.error("Too many redirects (max 3)");
        }

        let url = attempt.url();
        if attempt.previous().iter().any(|prev| prev.as_str() == url.as_str()) {
            return attempt.error("Redirect loop detected");
        }

        tracing::debug!(
            from = %attempt.previous().last().map(|u| u.as_str()).unwrap_or("initial"),
            to = %url,
            hop = attempt.previous().len() + 1,
            "Following redirect"
        );
        attempt.follow()
    })
}

/// Thin HTTP request primitive: sends, classifies the status, reads the body.
///
/// No retries or backoff; the scheduler's next tick is the only retry.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
}

impl ApiClient {
    /// Wrap an existing client (tests use a bare `reqwest::Client`).
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// Client with the connection settings the engine runs with.
    pub fn build() -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .redirect(create_redirect_policy())
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(60))
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self::new(http))
    }

    /// Send `request` and return the raw response body.
    ///
    /// # Errors
    ///
    /// - [`ApiError::AuthorizationRequired`] - HTTP 401
    /// - [`ApiError::HttpStatus`] - any other non-2xx status
    /// - [`ApiError::Timeout`] - no response within 30 seconds
    /// - [`ApiError::ResponseTooLarge`] - body over 10MB
    pub async fn send(
        &self,
        base: &Url,
        request: &ApiRequest,
        access_token: Option<&SecretString>,
    ) -> Result<Vec<u8>, ApiError> {
        let url = request.url(base)?;
        let mut builder = self.http.request(request.method.clone(), url);

        if let Some(token) = access_token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {}", token.expose_secret()));
        }
        if let Some(body) = &request.body {
            builder = builder
                .header(CONTENT_TYPE, "application/json")
                .body(serde_json::to_vec(body)?);
        }

        let response = tokio::time::timeout(REQUEST_TIMEOUT, builder.send())
            .await
            .map_err(|_| ApiError::Timeout)?
            .map_err(ApiError::Network)?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(ApiError::AuthorizationRequired);
        }
        if !status.is_success() {
            return Err(ApiError::HttpStatus(status.as_u16()));
        }

        read_limited_bytes(response, MAX_RESPONSE_SIZE).await
    }
}

/// Deserialize a response body.
pub fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    Ok(serde_json::from_slice(body)?)
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, ApiError> {
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(ApiError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(ApiError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(ApiError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}
