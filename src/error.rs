//! Error types for requests, pagination and session setup.
//!
//! [`NetworkError`] is what completions and groups report. Its shape is part
//! of the public contract: a fixed error domain, numeric codes for the
//! library-level kinds, and well-known user info keys (see
//! [`NetworkError::user_info`]). Transport failures and cancellation keep the
//! transport's own domain so callers can tell them apart programmatically.

use bytes::Bytes;
use serde_json::{Map, Value};
use thiserror::Error;

/// Common domain for library-level network errors.
pub const ERROR_DOMAIN: &str = "ch.pagewire.network";

/// Domain of errors reported by the transport (including cancellation).
pub const TRANSPORT_ERROR_DOMAIN: &str = "ch.pagewire.transport";

/// User info key for the HTTP status code (integer).
pub const HTTP_STATUS_CODE_KEY: &str = "HTTPStatusCode";

/// User info key for the failing URL (string).
pub const FAILING_URL_KEY: &str = "FailingURL";

/// User info key for the ordered error list of [`ErrorCode::Multiple`].
pub const ERRORS_KEY: &str = "Errors";

/// Numeric codes of errors in [`ERROR_DOMAIN`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i64)]
pub enum ErrorCode {
    /// An HTTP error status was received.
    Http = 0,
    /// The received data could not be decoded.
    InvalidData = 1,
    /// Several errors were encountered.
    Multiple = 2,
}

/// Failure categories a transport can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportErrorKind {
    /// The request timed out.
    TimedOut,
    /// No connection could be established (DNS, refused, unreachable).
    CannotConnect,
    /// The server certificate is not trusted.
    ServerCertificateUntrusted,
    /// The response body could not be read completely.
    Body,
    /// Any other transport failure.
    Other,
}

impl TransportErrorKind {
    /// Stable code used in [`TRANSPORT_ERROR_DOMAIN`].
    #[must_use]
    pub fn code(self) -> i64 {
        match self {
            Self::TimedOut => -1001,
            Self::CannotConnect => -1004,
            Self::ServerCertificateUntrusted => -1202,
            Self::Body => -1017,
            Self::Other => -1,
        }
    }
}

/// Error reported by a [`Transport`](crate::Transport) implementation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message} ({url})")]
pub struct TransportError {
    kind: TransportErrorKind,
    message: String,
    url: String,
}

impl TransportError {
    /// Creates a transport error.
    pub fn new(kind: TransportErrorKind, url: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            url: url.into(),
        }
    }

    /// Returns the failure category.
    #[must_use]
    pub fn kind(&self) -> TransportErrorKind {
        self.kind
    }

    /// Returns the human-readable message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the URL the transport was fetching.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Returns the same error with another message; kind and URL are kept.
    #[must_use]
    pub fn with_message(self, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..self
        }
    }
}

/// Errors delivered to request completions and collected by request groups.
///
/// The type is `Clone` so a single failure can be handed to the request's
/// own completion and to every group tracking the request.
#[derive(Debug, Clone, Error)]
pub enum NetworkError {
    /// The response status was outside 200-299.
    #[error("HTTP {status} fetching {url}")]
    Http {
        /// The URL that returned the status.
        url: String,
        /// The HTTP status code.
        status: u16,
        /// The response body, if the server sent one.
        body: Option<Bytes>,
    },

    /// The response could not be decoded into the expected shape.
    #[error("invalid data received from {url}: {reason}")]
    InvalidData {
        /// The URL the data came from.
        url: String,
        /// Why decoding failed.
        reason: String,
    },

    /// The request was cancelled (only delivered when requested).
    #[error("request to {url} was cancelled")]
    Cancelled {
        /// The URL of the cancelled request.
        url: String,
    },

    /// The transport failed before a response was available.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Several requests failed; errors are kept in completion order.
    #[error("{} errors occurred", errors.len())]
    Multiple {
        /// The individual errors.
        errors: Vec<NetworkError>,
    },
}

impl NetworkError {
    /// Creates an HTTP status error.
    pub fn http(url: impl Into<String>, status: u16, body: Option<Bytes>) -> Self {
        Self::Http {
            url: url.into(),
            status,
            body,
        }
    }

    /// Creates an invalid data error.
    pub fn invalid_data(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidData {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Creates a cancellation error.
    pub fn cancelled(url: impl Into<String>) -> Self {
        Self::Cancelled { url: url.into() }
    }

    /// Folds a list of errors the way groups report them.
    ///
    /// No error gives `None`, a single error is returned unwrapped, two or
    /// more are wrapped into [`NetworkError::Multiple`].
    #[must_use]
    pub fn aggregate(mut errors: Vec<NetworkError>) -> Option<NetworkError> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(Self::Multiple { errors }),
        }
    }

    /// Returns the error domain.
    #[must_use]
    pub fn domain(&self) -> &'static str {
        match self {
            Self::Http { .. } | Self::InvalidData { .. } | Self::Multiple { .. } => ERROR_DOMAIN,
            Self::Cancelled { .. } | Self::Transport(_) => TRANSPORT_ERROR_DOMAIN,
        }
    }

    /// Returns the numeric code within [`NetworkError::domain`].
    #[must_use]
    pub fn code(&self) -> i64 {
        match self {
            Self::Http { .. } => ErrorCode::Http as i64,
            Self::InvalidData { .. } => ErrorCode::InvalidData as i64,
            Self::Multiple { .. } => ErrorCode::Multiple as i64,
            Self::Cancelled { .. } => -999,
            Self::Transport(error) => error.kind().code(),
        }
    }

    /// Returns the library error code, when the error belongs to [`ERROR_DOMAIN`].
    #[must_use]
    pub fn error_code(&self) -> Option<ErrorCode> {
        match self {
            Self::Http { .. } => Some(ErrorCode::Http),
            Self::InvalidData { .. } => Some(ErrorCode::InvalidData),
            Self::Multiple { .. } => Some(ErrorCode::Multiple),
            Self::Cancelled { .. } | Self::Transport(_) => None,
        }
    }

    /// Returns the HTTP status code of an [`NetworkError::Http`] error.
    #[must_use]
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns the URL that failed, if the error concerns a single request.
    #[must_use]
    pub fn failing_url(&self) -> Option<&str> {
        match self {
            Self::Http { url, .. } | Self::InvalidData { url, .. } | Self::Cancelled { url } => {
                Some(url)
            }
            Self::Transport(error) => Some(error.url()),
            Self::Multiple { .. } => None,
        }
    }

    /// Returns the wrapped errors of a [`NetworkError::Multiple`], or an empty slice.
    #[must_use]
    pub fn errors(&self) -> &[NetworkError] {
        match self {
            Self::Multiple { errors } => errors,
            _ => &[],
        }
    }

    /// Returns true for a cancellation error.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Returns the error's user info under the well-known keys.
    ///
    /// [`HTTP_STATUS_CODE_KEY`] and [`FAILING_URL_KEY`] are present when
    /// known; [`ERRORS_KEY`] holds the nested user info objects of a
    /// [`NetworkError::Multiple`], each with a `domain`, `code` and `message`.
    #[must_use]
    pub fn user_info(&self) -> Map<String, Value> {
        let mut info = Map::new();
        if let Some(status) = self.status_code() {
            info.insert(HTTP_STATUS_CODE_KEY.to_string(), Value::from(status));
        }
        if let Some(url) = self.failing_url() {
            info.insert(FAILING_URL_KEY.to_string(), Value::from(url));
        }
        if let Self::Multiple { errors } = self {
            let nested = errors
                .iter()
                .map(|error| {
                    let mut entry = error.user_info();
                    entry.insert("domain".to_string(), Value::from(error.domain()));
                    entry.insert("code".to_string(), Value::from(error.code()));
                    entry.insert("message".to_string(), Value::from(error.to_string()));
                    Value::Object(entry)
                })
                .collect();
            info.insert(ERRORS_KEY.to_string(), Value::Array(nested));
        }
        info
    }
}

/// Errors raised while decoding a response body.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The body is not valid JSON.
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The JSON is valid but the top-level value has the wrong type.
    #[error("expected a JSON {expected}, found {found}")]
    UnexpectedShape {
        /// The expected top-level type.
        expected: &'static str,
        /// The type actually found.
        found: &'static str,
    },

    /// A caller-supplied parser rejected the body.
    #[error("parser failed: {0}")]
    Parser(String),
}

/// Errors raised when deriving page requests.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PageError {
    /// The page was produced by a request unrelated to the receiver.
    #[error("page {number} does not belong to this request")]
    Unrelated {
        /// Number of the rejected page.
        number: u32,
    },
}

/// Errors raised while setting up sessions, transports and dispatchers.
#[derive(Debug, Error)]
pub enum SetupError {
    /// No Tokio runtime is running on the calling thread.
    #[error("no Tokio runtime available: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),

    /// The HTTP client could not be built.
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    /// A configuration value is out of range.
    #[error("invalid configuration value for `{field}`: {reason}")]
    InvalidConfig {
        /// The offending field.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// A dispatcher thread could not be spawned.
    #[error("failed to spawn dispatcher thread: {0}")]
    Thread(#[source] std::io::Error),
}
