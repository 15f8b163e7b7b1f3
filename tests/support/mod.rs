//! Shared helpers for integration tests.
//!
//! `StubTransport` answers requests from a table keyed by URL path, with
//! optional delays, so tests can produce transport failures a mock server
//! cannot (certificate trust) and control completion ordering.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use pagewire::{
    HttpRequest, HttpResponse, TransportError, TransportErrorKind, Transport, TransportReply,
};
use tokio::sync::mpsc::UnboundedReceiver;

/// Canned answer for one path.
#[derive(Debug, Clone)]
pub enum StubReply {
    Respond {
        status: u16,
        body: Bytes,
        delay: Duration,
    },
    Fail {
        kind: TransportErrorKind,
        message: String,
        delay: Duration,
    },
}

impl StubReply {
    pub fn ok(body: &str) -> Self {
        Self::status(200, body)
    }

    pub fn status(status: u16, body: &str) -> Self {
        Self::Respond {
            status,
            body: Bytes::copy_from_slice(body.as_bytes()),
            delay: Duration::ZERO,
        }
    }

    pub fn fail(kind: TransportErrorKind, message: &str) -> Self {
        Self::Fail {
            kind,
            message: message.to_string(),
            delay: Duration::ZERO,
        }
    }

    pub fn after(self, delay: Duration) -> Self {
        match self {
            Self::Respond { status, body, .. } => Self::Respond {
                status,
                body,
                delay,
            },
            Self::Fail { kind, message, .. } => Self::Fail {
                kind,
                message,
                delay,
            },
        }
    }
}

#[derive(Debug, Default)]
pub struct StubTransport {
    routes: Mutex<HashMap<String, StubReply>>,
    calls: AtomicUsize,
}

impl StubTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(self, path: &str, reply: StubReply) -> Self {
        self.routes
            .lock()
            .unwrap()
            .insert(path.to_string(), reply);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for StubTransport {
    async fn execute(&self, request: &HttpRequest) -> Result<TransportReply, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let reply = self
            .routes
            .lock()
            .unwrap()
            .get(request.url.path())
            .cloned()
            .unwrap_or_else(|| StubReply::status(404, ""));

        match reply {
            StubReply::Respond {
                status,
                body,
                delay,
            } => {
                tokio::time::sleep(delay).await;
                Ok(TransportReply {
                    body,
                    response: HttpResponse {
                        url: request.url.clone(),
                        status,
                        headers: reqwest::header::HeaderMap::new(),
                    },
                })
            }
            StubReply::Fail {
                kind,
                message,
                delay,
            } => {
                tokio::time::sleep(delay).await;
                Err(TransportError::new(kind, request.url.as_str(), message))
            }
        }
    }
}

/// Base URL used with `StubTransport`.
pub fn stub_url(path: &str) -> HttpRequest {
    HttpRequest::parse_get(&format!("https://stub.example.com{path}")).unwrap()
}

/// Receives the next value or panics after five seconds.
pub async fn recv<T>(rx: &mut UnboundedReceiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for completion")
        .expect("channel closed")
}

/// Asserts nothing arrives within `window`.
pub async fn assert_silent<T: std::fmt::Debug>(rx: &mut UnboundedReceiver<T>, window: Duration) {
    if let Ok(Some(value)) = tokio::time::timeout(window, rx.recv()).await {
        panic!("unexpected value: {value:?}");
    }
}

/// Polls `condition` until it holds or five seconds elapse.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
