//! Single-request lifecycle, response normalization and decoding.
//!
//! A [`Request`] wraps one transport call. It is created idle, runs once when
//! [`Request::start`] is called, and ends either finished or cancelled:
//!
//! ```text
//! Idle --start--> Running --transport done--> Finished
//!   |                |
//!   +----cancel------+------------------------> Cancelled
//! ```
//!
//! The completion runs exactly once, except for cancelled requests whose
//! [`RequestOptions::deliver_cancellation_errors`] is unset: those never
//! complete. A cancelled request never completes with a success.
//!
//! # Example
//!
//! ```no_run
//! use pagewire::{HttpRequest, Request, RequestOptions, Session, TransportConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let session = Session::reqwest(&TransportConfig::default())?;
//! let descriptor = HttpRequest::parse_get("https://api.example.com/shows")?;
//! let request = Request::json_object(&session, descriptor, RequestOptions::default(), |result| {
//!     match result {
//!         Ok(fetched) => println!("{} keys", fetched.body.len()),
//!         Err(error) => eprintln!("failed: {error}"),
//!     }
//! });
//! request.start();
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::panic::{AssertUnwindSafe, catch_unwind, resume_unwind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::config::RequestOptions;
use crate::constants::PUBLIC_NETWORK_MESSAGE;
use crate::dispatch::Delivery;
use crate::error::{DecodeError, NetworkError, TransportError, TransportErrorKind};
use crate::session::{RequestId, Session};
use crate::transport::{HttpRequest, HttpResponse, TransportReply};

/// Lifecycle state of a request. `Finished` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestState {
    Idle,
    Running,
    Finished,
    Cancelled,
}

impl RequestState {
    /// Returns true for `Finished` and `Cancelled`.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Cancelled)
    }
}

/// A decoded body with the response it came from.
#[derive(Debug, Clone)]
pub struct Fetched<T> {
    pub body: T,
    pub response: HttpResponse,
}

/// Decoding strategy applied to a successful response body.
pub trait Decode: Send + 'static {
    /// The decoded value.
    type Output: Send + 'static;

    /// Decodes `body`.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] when the body does not have the expected shape.
    fn decode(&self, body: &Bytes) -> Result<Self::Output, DecodeError>;
}

/// Delivers the body untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct Raw;

impl Decode for Raw {
    type Output = Bytes;

    fn decode(&self, body: &Bytes) -> Result<Bytes, DecodeError> {
        Ok(body.clone())
    }
}

/// Requires a top-level JSON array.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonArray;

impl Decode for JsonArray {
    type Output = Vec<Value>;

    fn decode(&self, body: &Bytes) -> Result<Vec<Value>, DecodeError> {
        match serde_json::from_slice(body)? {
            Value::Array(items) => Ok(items),
            other => Err(DecodeError::UnexpectedShape {
                expected: "array",
                found: json_type_name(&other),
            }),
        }
    }
}

/// Requires a top-level JSON object.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonObject;

impl Decode for JsonObject {
    type Output = Map<String, Value>;

    fn decode(&self, body: &Bytes) -> Result<Map<String, Value>, DecodeError> {
        match serde_json::from_slice(body)? {
            Value::Object(map) => Ok(map),
            other => Err(DecodeError::UnexpectedShape {
                expected: "object",
                found: json_type_name(&other),
            }),
        }
    }
}

/// Delegates decoding to a caller-supplied function.
///
/// A parser error is reported as [`NetworkError::InvalidData`] carrying the
/// parser's message.
pub struct Parser<F, T, E> {
    parse: F,
    _output: PhantomData<fn() -> (T, E)>,
}

impl<F, T, E> Parser<F, T, E>
where
    F: Fn(&[u8]) -> Result<T, E>,
{
    /// Wraps `parse`.
    pub fn new(parse: F) -> Self {
        Self {
            parse,
            _output: PhantomData,
        }
    }
}

impl<F, T, E> Decode for Parser<F, T, E>
where
    F: Fn(&[u8]) -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: fmt::Display + 'static,
{
    type Output = T;

    fn decode(&self, body: &Bytes) -> Result<T, DecodeError> {
        (self.parse)(body).map_err(|error| DecodeError::Parser(error.to_string()))
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Normalized result plus the response metadata, when the server answered.
type Outcome = (Result<TransportReply, NetworkError>, Option<HttpResponse>);

/// Decodes, calls the caller's completion, and hands back the error (if any)
/// for the request's listeners.
type CompletionJob = Box<
    dyn FnOnce(Result<TransportReply, NetworkError>, Option<HttpResponse>) -> Option<NetworkError>
        + Send,
>;

/// Terminal transition reported to listeners (request groups).
#[derive(Debug, Clone)]
pub(crate) struct Ended {
    pub(crate) error: Option<NetworkError>,
}

pub(crate) type Listener = Arc<dyn Fn(RequestId, &Ended) + Send + Sync>;

struct Lifecycle {
    state: RequestState,
    completion: Option<CompletionJob>,
    listeners: Vec<Listener>,
}

struct RequestCore {
    id: RequestId,
    session: Session,
    descriptor: HttpRequest,
    options: RequestOptions,
    delivery: Delivery,
    token: CancellationToken,
    lifecycle: Mutex<Lifecycle>,
}

impl RequestCore {
    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[instrument(skip_all, fields(request_id = %self.id, url = %self.descriptor.url))]
    async fn run(self: Arc<Self>) {
        let transport = Arc::clone(self.session.transport());
        let outcome = tokio::select! {
            biased;
            () = self.token.cancelled() => None,
            reply = transport.execute(&self.descriptor) => Some(reply),
        };

        let (completion, listeners, cancelled) = {
            let mut lifecycle = self.lifecycle();
            let cancelled = self.token.is_cancelled();
            lifecycle.state = if cancelled {
                RequestState::Cancelled
            } else {
                RequestState::Finished
            };
            (
                lifecycle.completion.take(),
                mem::take(&mut lifecycle.listeners),
                cancelled,
            )
        };
        self.session.unregister(self.id);

        let result = match outcome {
            Some(reply) if !cancelled => {
                let response = reply.as_ref().ok().map(|reply| reply.response.clone());
                Some((normalize(reply, self.options), response))
            }
            _ => {
                debug!("request cancelled while running");
                self.cancellation_result()
            }
        };
        self.finish(result, completion, listeners);
    }

    fn cancellation_result(&self) -> Option<Outcome> {
        self.options
            .deliver_cancellation_errors
            .then(|| (Err(NetworkError::cancelled(self.descriptor.url.as_str())), None))
    }

    /// Delivers the completion, then the terminal transition, in the
    /// request's delivery context.
    ///
    /// Listeners are notified even when the completion panics; the panic is
    /// resumed afterwards.
    fn finish(
        &self,
        result: Option<Outcome>,
        completion: Option<CompletionJob>,
        listeners: Vec<Listener>,
    ) {
        let id = self.id;
        self.delivery.deliver(Box::new(move || {
            let (error, panic) = match (result, completion) {
                (Some((result, response)), Some(job)) => {
                    match catch_unwind(AssertUnwindSafe(|| job(result, response))) {
                        Ok(error) => (error, None),
                        Err(panic) => {
                            warn!(request_id = %id, "request completion panicked");
                            (None, Some(panic))
                        }
                    }
                }
                _ => (None, None),
            };
            notify(&listeners, id, &Ended { error });
            if let Some(panic) = panic {
                resume_unwind(panic);
            }
        }));
    }
}

fn notify(listeners: &[Listener], id: RequestId, ended: &Ended) {
    for listener in listeners {
        listener(id, ended);
    }
}

/// Applies HTTP status and certificate trust policies to a transport outcome.
fn normalize(
    outcome: Result<TransportReply, TransportError>,
    options: RequestOptions,
) -> Result<TransportReply, NetworkError> {
    match outcome {
        Ok(reply) if options.http_errors_as_errors && !reply.response.is_success() => {
            debug!(status = reply.response.status, "HTTP error status");
            let body = (!reply.body.is_empty()).then_some(reply.body);
            Err(NetworkError::http(
                reply.response.url.as_str(),
                reply.response.status,
                body,
            ))
        }
        Ok(reply) => Ok(reply),
        Err(error)
            if options.remap_certificate_trust
                && error.kind() == TransportErrorKind::ServerCertificateUntrusted =>
        {
            debug!(original = %error.message(), "rewriting certificate trust message");
            Err(NetworkError::Transport(
                error.with_message(PUBLIC_NETWORK_MESSAGE),
            ))
        }
        Err(error) => Err(error.into()),
    }
}

/// Handle to one HTTP request.
///
/// Cheap to clone; all clones refer to the same request. Dropping every
/// handle does not abort a running request.
#[derive(Clone)]
pub struct Request {
    core: Arc<RequestCore>,
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("id", &self.core.id)
            .field("url", &self.core.descriptor.url.as_str())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Request {
    /// Creates an idle request completing on the transport thread.
    pub fn new<D, F>(
        session: &Session,
        descriptor: HttpRequest,
        options: RequestOptions,
        decoder: D,
        completion: F,
    ) -> Self
    where
        D: Decode,
        F: FnOnce(Result<Fetched<D::Output>, NetworkError>) + Send + 'static,
    {
        Self::with_delivery(
            session,
            descriptor,
            options,
            Delivery::TransportThread,
            decoder,
            completion,
        )
    }

    /// Creates an idle request completing in the given delivery context.
    pub fn with_delivery<D, F>(
        session: &Session,
        descriptor: HttpRequest,
        options: RequestOptions,
        delivery: Delivery,
        decoder: D,
        completion: F,
    ) -> Self
    where
        D: Decode,
        F: FnOnce(Result<Fetched<D::Output>, NetworkError>) + Send + 'static,
    {
        Self::with_response(
            session,
            descriptor,
            options,
            delivery,
            decoder,
            move |result, _| completion(result),
        )
    }

    /// Like [`Request::with_delivery`], but the completion also receives the
    /// response metadata whenever the server answered, including for HTTP
    /// status and decoding failures.
    pub(crate) fn with_response<D, F>(
        session: &Session,
        descriptor: HttpRequest,
        options: RequestOptions,
        delivery: Delivery,
        decoder: D,
        completion: F,
    ) -> Self
    where
        D: Decode,
        F: FnOnce(Result<Fetched<D::Output>, NetworkError>, Option<HttpResponse>) + Send + 'static,
    {
        let url = descriptor.url.to_string();
        let job: CompletionJob = Box::new(move |outcome, response| {
            let result = outcome.and_then(|reply| match decoder.decode(&reply.body) {
                Ok(body) => Ok(Fetched {
                    body,
                    response: reply.response,
                }),
                Err(error) => {
                    debug!(url = %url, error = %error, "response decoding failed");
                    Err(NetworkError::invalid_data(url, error.to_string()))
                }
            });
            let error = result.as_ref().err().cloned();
            completion(result, response);
            error
        });

        Self {
            core: Arc::new(RequestCore {
                id: RequestId::next(),
                session: session.clone(),
                descriptor,
                options,
                delivery,
                token: CancellationToken::new(),
                lifecycle: Mutex::new(Lifecycle {
                    state: RequestState::Idle,
                    completion: Some(job),
                    listeners: Vec::new(),
                }),
            }),
        }
    }

    /// Creates a request delivering the raw body.
    pub fn data<F>(
        session: &Session,
        descriptor: HttpRequest,
        options: RequestOptions,
        completion: F,
    ) -> Self
    where
        F: FnOnce(Result<Fetched<Bytes>, NetworkError>) + Send + 'static,
    {
        Self::new(session, descriptor, options, Raw, completion)
    }

    /// Creates a request delivering a top-level JSON array.
    pub fn json_array<F>(
        session: &Session,
        descriptor: HttpRequest,
        options: RequestOptions,
        completion: F,
    ) -> Self
    where
        F: FnOnce(Result<Fetched<Vec<Value>>, NetworkError>) + Send + 'static,
    {
        Self::new(session, descriptor, options, JsonArray, completion)
    }

    /// Creates a request delivering a top-level JSON object.
    pub fn json_object<F>(
        session: &Session,
        descriptor: HttpRequest,
        options: RequestOptions,
        completion: F,
    ) -> Self
    where
        F: FnOnce(Result<Fetched<Map<String, Value>>, NetworkError>) + Send + 'static,
    {
        Self::new(session, descriptor, options, JsonObject, completion)
    }

    /// Creates a request turning the body into `T` with `parser`.
    pub fn object<T, E, P, F>(
        session: &Session,
        descriptor: HttpRequest,
        options: RequestOptions,
        parser: P,
        completion: F,
    ) -> Self
    where
        T: Send + 'static,
        E: fmt::Display + 'static,
        P: Fn(&[u8]) -> Result<T, E> + Send + 'static,
        F: FnOnce(Result<Fetched<T>, NetworkError>) + Send + 'static,
    {
        Self::new(session, descriptor, options, Parser::new(parser), completion)
    }

    /// Returns the request identifier.
    #[must_use]
    pub fn id(&self) -> RequestId {
        self.core.id
    }

    /// Returns the request descriptor.
    #[must_use]
    pub fn descriptor(&self) -> &HttpRequest {
        &self.core.descriptor
    }

    /// Returns the options the request was built with.
    #[must_use]
    pub fn options(&self) -> RequestOptions {
        self.core.options
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> RequestState {
        self.core.lifecycle().state
    }

    /// Returns true while the request is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() == RequestState::Running
    }

    /// Starts the request. No-op unless the request is idle.
    ///
    /// The transport call is spawned on the session's runtime, so this may
    /// be called from any thread.
    #[instrument(skip(self), fields(request_id = %self.core.id, url = %self.core.descriptor.url))]
    pub fn start(&self) {
        {
            let mut lifecycle = self.core.lifecycle();
            if lifecycle.state != RequestState::Idle {
                debug!(state = ?lifecycle.state, "start ignored");
                return;
            }
            lifecycle.state = RequestState::Running;
        }

        debug!("starting request");
        self.core
            .session
            .register(self.core.id, self.core.token.clone());

        let core = Arc::clone(&self.core);
        self.core.session.runtime().spawn(core.run());
    }

    /// Cancels the request. Best-effort and idempotent.
    ///
    /// An idle request becomes cancelled and will never run. A running
    /// request has its transport call abandoned; its completion is skipped,
    /// or receives [`NetworkError::Cancelled`] when
    /// [`RequestOptions::deliver_cancellation_errors`] is set.
    #[instrument(skip(self), fields(request_id = %self.core.id, url = %self.core.descriptor.url))]
    pub fn cancel(&self) {
        let pending = {
            let mut lifecycle = self.core.lifecycle();
            match lifecycle.state {
                RequestState::Idle => {
                    lifecycle.state = RequestState::Cancelled;
                    self.core.token.cancel();
                    Some((
                        lifecycle.completion.take(),
                        mem::take(&mut lifecycle.listeners),
                    ))
                }
                RequestState::Running => {
                    debug!("cancelling running request");
                    self.core.token.cancel();
                    None
                }
                RequestState::Finished | RequestState::Cancelled => None,
            }
        };

        if let Some((completion, listeners)) = pending {
            debug!("request cancelled before start");
            self.core
                .finish(self.core.cancellation_result(), completion, listeners);
        }
    }

    /// Registers a listener for the terminal transition and returns the
    /// state at registration.
    ///
    /// Listeners are not registered on terminal requests; they would never
    /// be called.
    pub(crate) fn observe(&self, listener: Listener) -> RequestState {
        let mut lifecycle = self.core.lifecycle();
        if !lifecycle.state.is_terminal() {
            lifecycle.listeners.push(listener);
        }
        lifecycle.state
    }
}
