//! Blocking HTTP access behind a mockable trait.
//!
//! The rest of the crate speaks in [`HttpRequest`] and [`HttpResponse`]
//! values and never touches `ureq` directly. Non-success statuses are
//! ordinary responses here; deciding what a 404 or 403 means is left to the
//! caller.

use std::time::Duration;

use log::trace;
use thiserror::Error;

/// `User-Agent` sent with every request; GitHub rejects requests without one.
pub const USER_AGENT: &str = concat!("ResoniteModUpdater/", env!("CARGO_PKG_VERSION"));

/// Largest response body accepted, which comfortably fits any mod assembly.
const MAX_BODY_BYTES: u64 = 256 * 1024 * 1024;

/// A GET request with extra headers.
#[derive(Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// Absolute URL to fetch.
    pub url: String,
    /// Extra headers as name/value pairs.
    pub headers: Vec<(&'static str, String)>,
    /// Upper bound on the whole exchange, tighter than the client's own.
    pub time_limit: Option<Duration>,
}

impl HttpRequest {
    /// A GET request without extra headers.
    #[must_use]
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
            time_limit: None,
        }
    }

    /// Add a header.
    #[must_use]
    pub fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    /// Bound the request to `limit`, keeping any tighter limit already set.
    #[must_use]
    pub fn time_limit(mut self, limit: Duration) -> Self {
        self.time_limit = Some(self.time_limit.map_or(limit, |current| current.min(limit)));
        self
    }

    /// Value of the first header called `name`, ignoring ASCII case.
    #[must_use]
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(candidate, _)| candidate.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

// Requests can carry a bearer token, so their Debug output hides header
// values.
impl std::fmt::Debug for HttpRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.headers.iter().map(|(name, _)| *name).collect();
        f.debug_struct("HttpRequest")
            .field("url", &self.url)
            .field("headers", &names)
            .field("time_limit", &self.time_limit)
            .finish()
    }
}

/// A fully read response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Parsed `Retry-After` header, when it holds a number of seconds.
    pub retry_after: Option<Duration>,
    /// The response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// A response with no `Retry-After` header.
    #[must_use]
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            retry_after: None,
            body: body.into(),
        }
    }

    /// Attach a `Retry-After` delay.
    #[must_use]
    pub const fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    /// Whether the status is in the 2xx range.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// The body decoded as UTF-8, replacing invalid sequences.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// A request that produced no HTTP response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("request to {url} failed: {reason}")]
pub struct TransportError {
    /// The URL that was requested.
    pub url: String,
    /// A human-readable description of the failure.
    pub reason: String,
}

/// Performs HTTP GET requests.
#[cfg_attr(test, mockall::automock)]
pub trait HttpClient {
    /// Send `request` and read the whole response.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when no response could be obtained. Any
    /// status code, including 4xx and 5xx, is returned as a response.
    fn get(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// [`HttpClient`] implemented with a shared `ureq` agent.
#[derive(Debug, Clone)]
pub struct UreqClient {
    agent: ureq::Agent,
    timeout: Duration,
}

impl UreqClient {
    /// Build a client whose requests each time out after `timeout`.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build();
        Self {
            agent: ureq::Agent::new_with_config(config),
            timeout,
        }
    }
}

impl HttpClient for UreqClient {
    fn get(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        trace!("GET {}", request.url);
        let failed = |reason: String| TransportError {
            url: request.url.clone(),
            reason,
        };

        let mut builder = self
            .agent
            .get(request.url.as_str())
            .header("User-Agent", USER_AGENT);
        for (name, value) in &request.headers {
            builder = builder.header(*name, value.as_str());
        }
        if let Some(limit) = request.time_limit {
            builder = builder
                .config()
                .timeout_global(Some(limit.min(self.timeout)))
                .build();
        }
        let response = builder.call().map_err(|err| failed(err.to_string()))?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|value| value.to_str().ok())
            .and_then(parse_retry_after);
        let body = response
            .into_body()
            .with_config()
            .limit(MAX_BODY_BYTES)
            .read_to_vec()
            .map_err(|err| failed(err.to_string()))?;
        trace!("GET {} -> {status} ({} bytes)", request.url, body.len());

        Ok(HttpResponse {
            status,
            retry_after,
            body,
        })
    }
}

/// Parse a `Retry-After` value given in whole seconds.
///
/// HTTP-date values are not supported and yield `None`, which makes the
/// caller fall back to its own delay.
#[must_use]
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}
