//! Transport configuration and request options.

use std::time::Duration;

use crate::constants::{
    CONNECT_TIMEOUT, MAX_TIMEOUT_SECS, MIN_TIMEOUT_SECS, READ_TIMEOUT, default_user_agent,
};
use crate::error::SetupError;

/// Settings for the default reqwest-backed transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Maximum time to establish a connection.
    pub connect_timeout: Duration,
    /// Maximum time between two reads of the response.
    pub read_timeout: Duration,
    /// User-Agent header sent with every request.
    pub user_agent: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: CONNECT_TIMEOUT,
            read_timeout: READ_TIMEOUT,
            user_agent: default_user_agent(),
        }
    }
}

impl TransportConfig {
    /// Creates a configuration with explicit timeouts in seconds and the default User-Agent.
    #[must_use]
    pub fn with_timeouts(connect_timeout_secs: u64, read_timeout_secs: u64) -> Self {
        Self {
            connect_timeout: Duration::from_secs(connect_timeout_secs),
            read_timeout: Duration::from_secs(read_timeout_secs),
            ..Self::default()
        }
    }

    /// Validates values against the accepted ranges.
    ///
    /// # Errors
    ///
    /// Returns [`SetupError::InvalidConfig`] when a timeout is outside
    /// 1..=3600 seconds or the User-Agent is blank.
    pub fn validate(&self) -> Result<(), SetupError> {
        validate_timeout("connect_timeout", self.connect_timeout)?;
        validate_timeout("read_timeout", self.read_timeout)?;
        if self.user_agent.trim().is_empty() {
            return Err(SetupError::InvalidConfig {
                field: "user_agent",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

fn validate_timeout(field: &'static str, value: Duration) -> Result<(), SetupError> {
    let secs = value.as_secs();
    if value.subsec_nanos() != 0 || !(MIN_TIMEOUT_SECS..=MAX_TIMEOUT_SECS).contains(&secs) {
        return Err(SetupError::InvalidConfig {
            field,
            reason: format!(
                "{value:?} is outside {MIN_TIMEOUT_SECS}..={MAX_TIMEOUT_SECS} whole seconds"
            ),
        });
    }
    Ok(())
}

/// Per-request behaviour switches.
///
/// The default delivers HTTP error statuses as [`NetworkError::Http`],
/// rewrites certificate trust failures with a public network hint, and
/// silently drops the completion of cancelled requests.
///
/// [`NetworkError::Http`]: crate::NetworkError::Http
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct RequestOptions {
    /// Deliver [`NetworkError::Cancelled`](crate::NetworkError::Cancelled) to the
    /// completion of a cancelled request instead of skipping the completion.
    pub deliver_cancellation_errors: bool,
    /// Turn responses outside 200-299 into [`NetworkError::Http`](crate::NetworkError::Http).
    /// When off, such responses are decoded and delivered as successes.
    pub http_errors_as_errors: bool,
    /// Replace the message of certificate trust failures with a hint about
    /// public networks. Error domain and kind are never changed.
    pub remap_certificate_trust: bool,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            deliver_cancellation_errors: false,
            http_errors_as_errors: true,
            remap_certificate_trust: true,
        }
    }
}

impl RequestOptions {
    /// Sets [`RequestOptions::deliver_cancellation_errors`].
    #[must_use]
    pub fn deliver_cancellation_errors(mut self, enabled: bool) -> Self {
        self.deliver_cancellation_errors = enabled;
        self
    }

    /// Sets [`RequestOptions::http_errors_as_errors`].
    #[must_use]
    pub fn http_errors_as_errors(mut self, enabled: bool) -> Self {
        self.http_errors_as_errors = enabled;
        self
    }

    /// Sets [`RequestOptions::remap_certificate_trust`].
    #[must_use]
    pub fn remap_certificate_trust(mut self, enabled: bool) -> Self {
        self.remap_certificate_trust = enabled;
        self
    }
}
