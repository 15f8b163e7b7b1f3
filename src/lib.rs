//! pagewire Core Library
//!
//! Asynchronous HTTP request layer for paginated JSON APIs: single requests
//! with normalized errors, a first page / page / next page protocol, and
//! request groups that aggregate running state and errors.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`transport`] - Transport boundary and the default reqwest implementation
//! - [`session`] - Runtime handle, in-flight request registry, activity handler
//! - [`request`] - Single request lifecycle, status normalization, decoding
//! - [`page`] - Pagination protocol and the query parameter scheme
//! - [`group`] - Request groups
//! - [`dispatch`] - Delivery contexts for completions
//! - [`error`] - Error types and the public error contract
//! - [`config`] - Transport configuration and request options

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod constants;
pub mod dispatch;
pub mod error;
pub mod group;
pub mod page;
pub mod request;
pub mod session;
pub mod transport;

// Re-export commonly used types
pub use config::{RequestOptions, TransportConfig};
pub use dispatch::{Delivery, Dispatcher, InlineDispatcher, Job, SerialDispatcher};
pub use error::{
    DecodeError, ERROR_DOMAIN, ERRORS_KEY, ErrorCode, FAILING_URL_KEY, HTTP_STATUS_CODE_KEY,
    NetworkError, PageError, SetupError, TRANSPORT_ERROR_DOMAIN, TransportError,
    TransportErrorKind,
};
pub use group::{GroupEvent, RequestGroup};
pub use page::{
    FirstPageRequest, FirstPageRequestBuilder, Page, PageInfo, PageOutcome, PageRequest,
    Pagination, QueryPagination,
};
pub use request::{Decode, Fetched, JsonArray, JsonObject, Parser, Raw, Request, RequestState};
pub use session::{RequestId, Session};
pub use transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport, TransportReply};
