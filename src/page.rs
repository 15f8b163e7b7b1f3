//! Pagination protocol: first page, page, next page.
//!
//! A [`FirstPageRequest`] is the entry point for a paginated collection. It
//! can be resized with [`FirstPageRequest::with_page_size`] and advanced with
//! [`FirstPageRequest::with_page`], using the [`Page`] values received in
//! completions. Every derived request shares the originating request shape,
//! options, delivery context and completion.
//!
//! Page completions always run on the dispatcher given to
//! [`FirstPageRequestBuilder::build`], never on a transport thread.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use pagewire::{FirstPageRequest, HttpRequest, PageOutcome, SerialDispatcher, Session, TransportConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let session = Session::reqwest(&TransportConfig::default())?;
//! let dispatcher = Arc::new(SerialDispatcher::new("ui")?);
//! let first = FirstPageRequest::builder(&session, HttpRequest::parse_get("https://api.example.com/shows")?)
//!     .page_size(20)
//!     .build(dispatcher, |outcome| match outcome {
//!         PageOutcome::Success { page, next_page, .. } => {
//!             println!("page {} done, more: {}", page.number(), next_page.is_some());
//!         }
//!         PageOutcome::Failure { error, .. } => eprintln!("failed: {error}"),
//!     });
//! first.start();
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::{Map, Value};
use tracing::{debug, instrument};
use url::Url;

use crate::config::RequestOptions;
use crate::constants::{
    DEFAULT_CURSOR_PARAM, DEFAULT_NEXT_FIELD, DEFAULT_PAGE_SIZE, DEFAULT_SIZE_PARAM,
    DEFAULT_TOTAL_FIELD,
};
use crate::dispatch::{Delivery, Dispatcher};
use crate::error::{NetworkError, PageError};
use crate::request::{JsonObject, Request, RequestState};
use crate::session::Session;
use crate::transport::{HttpRequest, HttpResponse};

/// Identity shared by all page requests derived from one first page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct Lineage(u64);

impl Lineage {
    fn next() -> Self {
        static NEXT_LINEAGE: AtomicU64 = AtomicU64::new(1);
        Self(NEXT_LINEAGE.fetch_add(1, Ordering::Relaxed))
    }
}

/// Clamps a requested page size to at least 1.
#[must_use]
pub(crate) fn clamp_page_size(size: i64) -> u32 {
    u32::try_from(size.max(1)).unwrap_or(u32::MAX)
}

/// One chunk of a paginated collection.
///
/// Pages are never built by callers: they come from completions and are
/// passed back verbatim to [`FirstPageRequest::with_page`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Page {
    number: u32,
    size: u32,
    cursor: Option<String>,
    lineage: Lineage,
}

impl Page {
    fn first(size: u32, lineage: Lineage) -> Self {
        Self {
            number: 0,
            size,
            cursor: None,
            lineage,
        }
    }

    fn following(&self, cursor: String) -> Self {
        Self {
            number: self.number.saturating_add(1),
            size: self.size,
            cursor: Some(cursor),
            lineage: self.lineage,
        }
    }

    /// Zero-based position of the page in the sequence that produced it.
    #[must_use]
    pub fn number(&self) -> u32 {
        self.number
    }

    /// Requested number of items per page (always at least 1).
    #[must_use]
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Server-defined continuation cursor; `None` for the first page.
    #[must_use]
    pub fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref()
    }

    /// Returns true for the first page.
    #[must_use]
    pub fn is_first(&self) -> bool {
        self.cursor.is_none()
    }
}

impl fmt::Display for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "page {} (size {})", self.number, self.size)
    }
}

/// Total and continuation read from a page response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageInfo {
    pub total: Option<u64>,
    pub next_cursor: Option<String>,
}

/// How pages are encoded into requests and read back from responses.
pub trait Pagination: Send + Sync + fmt::Debug {
    /// Returns `base` rewritten to fetch `page`.
    fn page_request(&self, base: &HttpRequest, page: &Page) -> HttpRequest;

    /// Reads the total and the next cursor from a decoded page.
    fn page_info(&self, body: &Map<String, Value>, response: &HttpResponse) -> PageInfo;
}

/// Query parameter pagination with JSON body metadata.
///
/// The page size goes into `size_param` and the cursor into `cursor_param`.
/// A cursor that is itself an absolute http(s) URL replaces the request URL.
/// The total is read from `total_field` and the next cursor from
/// `next_field` (a string or a number); a missing, null or empty next field
/// ends the collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryPagination {
    pub size_param: String,
    pub cursor_param: String,
    pub total_field: String,
    pub next_field: String,
}

impl Default for QueryPagination {
    fn default() -> Self {
        Self {
            size_param: DEFAULT_SIZE_PARAM.to_string(),
            cursor_param: DEFAULT_CURSOR_PARAM.to_string(),
            total_field: DEFAULT_TOTAL_FIELD.to_string(),
            next_field: DEFAULT_NEXT_FIELD.to_string(),
        }
    }
}

impl Pagination for QueryPagination {
    fn page_request(&self, base: &HttpRequest, page: &Page) -> HttpRequest {
        let mut request = base.clone();

        if let Some(cursor) = page.cursor()
            && let Some(link) = absolute_link(cursor)
        {
            request.url = link;
            return request;
        }

        let retained: Vec<(String, String)> = request
            .url
            .query_pairs()
            .filter(|(key, _)| key != &self.size_param && key != &self.cursor_param)
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();
        {
            let mut query = request.url.query_pairs_mut();
            query.clear();
            query.extend_pairs(&retained);
            query.append_pair(&self.size_param, &page.size().to_string());
            if let Some(cursor) = page.cursor() {
                query.append_pair(&self.cursor_param, cursor);
            }
        }
        request
    }

    fn page_info(&self, body: &Map<String, Value>, _response: &HttpResponse) -> PageInfo {
        let total = body.get(&self.total_field).and_then(Value::as_u64);
        let next_cursor = match body.get(&self.next_field) {
            Some(Value::String(cursor)) if !cursor.is_empty() => Some(cursor.clone()),
            Some(Value::Number(cursor)) => Some(cursor.to_string()),
            _ => None,
        };
        PageInfo { total, next_cursor }
    }
}

fn absolute_link(cursor: &str) -> Option<Url> {
    Url::parse(cursor)
        .ok()
        .filter(|url| matches!(url.scheme(), "http" | "https"))
}

/// Result of a page fetch.
#[derive(Debug, Clone)]
pub enum PageOutcome {
    /// The page was fetched and decoded.
    Success {
        body: Map<String, Value>,
        /// Total number of items, when the server reports it.
        total: Option<u64>,
        /// The page that was requested.
        page: Page,
        /// The page to request next; `None` at the end of the collection.
        next_page: Option<Page>,
        response: HttpResponse,
    },
    /// The page could not be fetched or decoded.
    Failure {
        /// The page that was requested.
        page: Page,
        error: NetworkError,
        /// The server's response, when it answered with an error status or
        /// an undecodable body.
        response: Option<HttpResponse>,
    },
}

impl PageOutcome {
    /// The page this outcome is for.
    #[must_use]
    pub fn page(&self) -> &Page {
        match self {
            Self::Success { page, .. } | Self::Failure { page, .. } => page,
        }
    }

    /// The error of a failed fetch.
    #[must_use]
    pub fn error(&self) -> Option<&NetworkError> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { error, .. } => Some(error),
        }
    }
}

type PageCompletion = Arc<dyn Fn(PageOutcome) + Send + Sync>;

/// Everything derived page requests share.
struct PageTemplate {
    session: Session,
    base: HttpRequest,
    options: RequestOptions,
    pagination: Arc<dyn Pagination>,
    dispatcher: Arc<dyn Dispatcher>,
    completion: PageCompletion,
    lineage: Lineage,
}

impl PageTemplate {
    fn request_for(self: &Arc<Self>, page: Page) -> PageRequest {
        let descriptor = self.pagination.page_request(&self.base, &page);
        debug!(url = %descriptor.url, %page, "building page request");

        let template = Arc::clone(self);
        let requested = page.clone();
        let request = Request::with_response(
            &self.session,
            descriptor,
            self.options,
            Delivery::On(Arc::clone(&self.dispatcher)),
            JsonObject,
            move |result, response| {
                let outcome = match result {
                    Ok(fetched) => {
                        let info = template
                            .pagination
                            .page_info(&fetched.body, &fetched.response);
                        let next_page = info.next_cursor.map(|cursor| requested.following(cursor));
                        PageOutcome::Success {
                            body: fetched.body,
                            total: info.total,
                            page: requested,
                            next_page,
                            response: fetched.response,
                        }
                    }
                    Err(error) => PageOutcome::Failure {
                        page: requested,
                        error,
                        response,
                    },
                };
                (template.completion)(outcome);
            },
        );

        PageRequest { request, page }
    }
}

/// A request bound to one page.
#[derive(Debug, Clone)]
pub struct PageRequest {
    request: Request,
    page: Page,
}

impl PageRequest {
    /// The requested page.
    #[must_use]
    pub fn page(&self) -> &Page {
        &self.page
    }

    /// The underlying request, e.g. to add it to a [`RequestGroup`](crate::RequestGroup).
    #[must_use]
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Starts the request. See [`Request::start`].
    pub fn start(&self) {
        self.request.start();
    }

    /// Cancels the request. See [`Request::cancel`].
    pub fn cancel(&self) {
        self.request.cancel();
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> RequestState {
        self.request.state()
    }
}

/// Request for the first page of a collection, and factory for the others.
#[derive(Clone)]
pub struct FirstPageRequest {
    inner: PageRequest,
    template: Arc<PageTemplate>,
}

impl fmt::Debug for FirstPageRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FirstPageRequest")
            .field("request", &self.inner.request)
            .field("page", &self.inner.page)
            .field("pagination", &self.template.pagination)
            .finish_non_exhaustive()
    }
}

impl FirstPageRequest {
    /// Starts building a first page request for `base`.
    #[must_use]
    pub fn builder(session: &Session, base: HttpRequest) -> FirstPageRequestBuilder {
        FirstPageRequestBuilder {
            session: session.clone(),
            base,
            page_size: i64::from(DEFAULT_PAGE_SIZE),
            options: RequestOptions::default(),
            pagination: Arc::new(QueryPagination::default()),
        }
    }

    fn from_template(template: Arc<PageTemplate>, page_size: u32) -> Self {
        let inner = template.request_for(Page::first(page_size, template.lineage));
        Self { inner, template }
    }

    /// Returns an equivalent, unstarted request with another page size.
    ///
    /// Sizes below 1 are raised to 1. The receiver is not modified.
    #[must_use]
    #[instrument(level = "debug", skip(self))]
    pub fn with_page_size(&self, page_size: i64) -> FirstPageRequest {
        Self::from_template(Arc::clone(&self.template), clamp_page_size(page_size))
    }

    /// Returns an equivalent, unstarted request with other request options.
    #[must_use]
    pub fn with_options(&self, options: RequestOptions) -> FirstPageRequest {
        let template = Arc::new(PageTemplate {
            session: self.template.session.clone(),
            base: self.template.base.clone(),
            options,
            pagination: Arc::clone(&self.template.pagination),
            dispatcher: Arc::clone(&self.template.dispatcher),
            completion: Arc::clone(&self.template.completion),
            lineage: self.template.lineage,
        });
        Self::from_template(template, self.inner.page.size())
    }

    /// Returns an unstarted request for `page`.
    ///
    /// `None` requests the first page at the receiver's page size.
    ///
    /// # Errors
    ///
    /// Returns [`PageError::Unrelated`] if `page` was not produced by a
    /// request derived from the same first page request.
    #[instrument(level = "debug", skip(self))]
    pub fn with_page(&self, page: Option<&Page>) -> Result<PageRequest, PageError> {
        let page = match page {
            None => Page::first(self.inner.page.size(), self.template.lineage),
            Some(page) if page.lineage == self.template.lineage => page.clone(),
            Some(page) => {
                debug!(%page, "rejecting page from an unrelated request");
                return Err(PageError::Unrelated {
                    number: page.number(),
                });
            }
        };
        Ok(self.template.request_for(page))
    }

    /// The first page this request fetches.
    #[must_use]
    pub fn page(&self) -> &Page {
        &self.inner.page
    }

    /// Configured page size.
    #[must_use]
    pub fn page_size(&self) -> u32 {
        self.inner.page.size()
    }

    /// Options used by this request and the ones derived from it.
    #[must_use]
    pub fn options(&self) -> RequestOptions {
        self.template.options
    }

    /// The underlying request.
    #[must_use]
    pub fn request(&self) -> &Request {
        &self.inner.request
    }

    /// This request as a plain [`PageRequest`].
    #[must_use]
    pub fn as_page_request(&self) -> &PageRequest {
        &self.inner
    }

    /// Starts the request. See [`Request::start`].
    pub fn start(&self) {
        self.inner.start();
    }

    /// Cancels the request. See [`Request::cancel`].
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> RequestState {
        self.inner.state()
    }
}

/// Builder for [`FirstPageRequest`].
#[derive(Debug)]
pub struct FirstPageRequestBuilder {
    session: Session,
    base: HttpRequest,
    page_size: i64,
    options: RequestOptions,
    pagination: Arc<dyn Pagination>,
}

impl FirstPageRequestBuilder {
    /// Page size; values below 1 are raised to 1.
    #[must_use]
    pub fn page_size(mut self, page_size: i64) -> Self {
        self.page_size = page_size;
        self
    }

    /// Request options shared by every derived request.
    #[must_use]
    pub fn options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }

    /// Pagination scheme; defaults to [`QueryPagination::default`].
    #[must_use]
    pub fn pagination(mut self, pagination: impl Pagination + 'static) -> Self {
        self.pagination = Arc::new(pagination);
        self
    }

    /// Builds the request. `completion` runs on `dispatcher` for this request
    /// and for every request derived from it.
    pub fn build<F>(self, dispatcher: Arc<dyn Dispatcher>, completion: F) -> FirstPageRequest
    where
        F: Fn(PageOutcome) + Send + Sync + 'static,
    {
        let template = Arc::new(PageTemplate {
            session: self.session,
            base: self.base,
            options: self.options,
            pagination: self.pagination,
            dispatcher,
            completion: Arc::new(completion),
            lineage: Lineage::next(),
        });
        FirstPageRequest::from_template(template, clamp_page_size(self.page_size))
    }
}
