//! Transport boundary and its default reqwest implementation.
//!
//! A [`Transport`] executes one [`HttpRequest`] and yields either the body
//! plus response metadata or a [`TransportError`]. It knows nothing about
//! status codes, decoding or cancellation: the request layer owns those.
//! Cancelling is done by dropping the future returned by
//! [`Transport::execute`], so implementations must be cancel-safe.

use std::error::Error as StdError;
use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, StatusCode};
use tracing::{debug, instrument};
use url::Url;

use crate::config::TransportConfig;
use crate::error::{SetupError, TransportError, TransportErrorKind};

/// An HTTP request described as plain data.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl HttpRequest {
    /// Creates a request without headers or body.
    #[must_use]
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    /// Creates a GET request.
    #[must_use]
    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    /// Parses `url` and creates a GET request for it.
    ///
    /// # Errors
    ///
    /// Returns [`url::ParseError`] if `url` is not an absolute URL.
    pub fn parse_get(url: &str) -> Result<Self, url::ParseError> {
        Ok(Self::get(Url::parse(url)?))
    }

    /// Adds a header, replacing any previous value for `name`.
    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Sets the request body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }
}

/// Response metadata delivered alongside a body.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    /// Final URL, after redirects.
    pub url: Url,
    pub status: u16,
    pub headers: HeaderMap,
}

impl HttpResponse {
    /// Returns true for statuses in 200-299.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Returns a header value if it is present and valid UTF-8.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    /// Returns the canonical reason phrase of the status ("Not Found").
    #[must_use]
    pub fn status_reason(&self) -> Option<&'static str> {
        StatusCode::from_u16(self.status)
            .ok()
            .and_then(|status| status.canonical_reason())
    }
}

/// What a transport produces for a request that reached the server.
#[derive(Debug, Clone)]
pub struct TransportReply {
    pub body: Bytes,
    pub response: HttpResponse,
}

/// Asynchronous request executor.
///
/// Implementations run on the session's Tokio runtime. The returned future
/// may be dropped at any await point when the request is cancelled.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Executes `request` and returns the full body with response metadata.
    async fn execute(&self, request: &HttpRequest) -> Result<TransportReply, TransportError>;
}

/// [`Transport`] backed by a shared `reqwest::Client`.
///
/// Create it once and reuse it so connections are pooled by reqwest.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Builds a transport from a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SetupError::InvalidConfig`] for out-of-range values and
    /// [`SetupError::Client`] if reqwest cannot build the client.
    #[instrument(level = "debug", skip(config), fields(user_agent = %config.user_agent))]
    pub fn new(config: &TransportConfig) -> Result<Self, SetupError> {
        config.validate()?;
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.read_timeout)
            .user_agent(config.user_agent.clone())
            .gzip(true)
            .build()
            .map_err(SetupError::Client)?;
        debug!("reqwest transport ready");
        Ok(Self { client })
    }

    /// Wraps an already configured client.
    #[must_use]
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    /// Returns the underlying reqwest client.
    #[must_use]
    pub fn inner(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn execute(&self, request: &HttpRequest) -> Result<TransportReply, TransportError> {
        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone());
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let url = request.url.as_str();
        let response = builder
            .send()
            .await
            .map_err(|error| classify_reqwest_error(url, &error))?;

        let metadata = HttpResponse {
            url: response.url().clone(),
            status: response.status().as_u16(),
            headers: response.headers().clone(),
        };
        let body = response
            .bytes()
            .await
            .map_err(|error| classify_reqwest_error(url, &error))?;

        Ok(TransportReply {
            body,
            response: metadata,
        })
    }
}

/// Maps a reqwest failure onto a transport error kind.
///
/// reqwest does not expose TLS failures as a category, so certificate
/// problems are recognized from the error chain.
fn classify_reqwest_error(url: &str, error: &reqwest::Error) -> TransportError {
    let kind = if is_certificate_error(error) {
        TransportErrorKind::ServerCertificateUntrusted
    } else if error.is_timeout() {
        TransportErrorKind::TimedOut
    } else if error.is_connect() {
        TransportErrorKind::CannotConnect
    } else if error.is_body() || error.is_decode() {
        TransportErrorKind::Body
    } else {
        TransportErrorKind::Other
    };
    TransportError::new(kind, url, error_chain_message(error))
}

fn is_certificate_error(error: &reqwest::Error) -> bool {
    let mut current: Option<&(dyn StdError + 'static)> = Some(error);
    while let Some(err) = current {
        if err.to_string().to_ascii_lowercase().contains("certificate") {
            return true;
        }
        current = err.source();
    }
    false
}

fn error_chain_message(error: &reqwest::Error) -> String {
    let mut message = error.to_string();
    let mut current = error.source();
    while let Some(err) = current {
        message.push_str(": ");
        message.push_str(&err.to_string());
        current = err.source();
    }
    message
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use reqwest::header::ACCEPT;

    use super::*;

    fn response(status: u16) -> HttpResponse {
        HttpResponse {
            url: Url::parse("https://api.example.com/items").unwrap(),
            status,
            headers: HeaderMap::new(),
        }
    }

    #[test]
    fn test_success_range_is_200_to_299() {
        assert!(!response(199).is_success());
        assert!(response(200).is_success());
        assert!(response(299).is_success());
        assert!(!response(300).is_success());
        assert!(!response(404).is_success());
    }

    #[test]
    fn test_status_reason() {
        assert_eq!(response(404).status_reason(), Some("Not Found"));
        assert_eq!(response(599).status_reason(), None);
    }

    #[test]
    fn test_http_request_builders() {
        let request = HttpRequest::parse_get("https://api.example.com/items?q=1")
            .unwrap()
            .with_header(ACCEPT, HeaderValue::from_static("application/json"))
            .with_body("payload");
        assert_eq!(request.method, Method::GET);
        assert_eq!(request.url.query(), Some("q=1"));
        assert_eq!(request.headers.get(ACCEPT).unwrap(), "application/json");
        assert_eq!(request.body.as_deref(), Some(&b"payload"[..]));
    }

    #[test]
    fn test_parse_get_rejects_relative_url() {
        assert!(HttpRequest::parse_get("/items").is_err());
    }

    #[test]
    fn test_reqwest_transport_rejects_invalid_config() {
        let config = TransportConfig::with_timeouts(0, 0);
        assert!(matches!(
            ReqwestTransport::new(&config),
            Err(SetupError::InvalidConfig { .. })
        ));
    }
}
