//! Constants shared by the transport, pagination and CLI layers.

use std::time::Duration;

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default HTTP read timeout (60 seconds; page bodies are small).
pub const READ_TIMEOUT_SECS: u64 = 60;

/// Bounds accepted for configured timeouts, in seconds.
pub const MIN_TIMEOUT_SECS: u64 = 1;
pub const MAX_TIMEOUT_SECS: u64 = 3600;

/// Default connect timeout as a [`Duration`].
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(CONNECT_TIMEOUT_SECS);

/// Default read timeout as a [`Duration`].
pub const READ_TIMEOUT: Duration = Duration::from_secs(READ_TIMEOUT_SECS);

/// Page size used when a caller does not pick one.
pub const DEFAULT_PAGE_SIZE: u32 = 10;

/// Default query parameter carrying the page size.
pub const DEFAULT_SIZE_PARAM: &str = "pageSize";

/// Default query parameter carrying the continuation cursor.
pub const DEFAULT_CURSOR_PARAM: &str = "next";

/// Default body field holding the total number of items.
pub const DEFAULT_TOTAL_FIELD: &str = "total";

/// Default body field holding the next-page cursor.
pub const DEFAULT_NEXT_FIELD: &str = "next";

/// Message substituted for certificate trust failures.
pub const PUBLIC_NETWORK_MESSAGE: &str = "The server certificate could not be verified. \
    You are probably connected to a public or captive network which requires you to sign in \
    before accessing the Internet.";

/// Project URL for User-Agent identification.
const PROJECT_UA_URL: &str = "https://github.com/pagewire/pagewire";

/// Default User-Agent sent by the reqwest transport.
#[must_use]
pub fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("pagewire/{version} (+{PROJECT_UA_URL})")
}
