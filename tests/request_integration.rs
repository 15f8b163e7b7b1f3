//! Integration tests for single requests.
//!
//! These tests run requests against wiremock servers and the stub transport
//! and check status normalization, decoding and cancellation delivery.

mod support;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use pagewire::constants::PUBLIC_NETWORK_MESSAGE;
use pagewire::{
    ErrorCode, HttpRequest, NetworkError, ReqwestTransport, Request, RequestOptions,
    RequestState, Session, TRANSPORT_ERROR_DOMAIN, TransportConfig, TransportErrorKind,
};
use support::{StubReply, StubTransport, assert_silent, eventually, recv, stub_url};
use tokio::sync::mpsc::unbounded_channel;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mock(path_str: &str, template: ResponseTemplate) -> MockServer {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(path_str))
        .respond_with(template)
        .mount(&mock_server)
        .await;
    mock_server
}

fn session() -> Session {
    Session::reqwest(&TransportConfig::default()).expect("session")
}

fn get(server: &MockServer, path_str: &str) -> HttpRequest {
    HttpRequest::parse_get(&format!("{}{path_str}", server.uri())).expect("url")
}

#[tokio::test]
async fn test_data_request_delivers_body_and_metadata() {
    let server = mock(
        "/blob",
        ResponseTemplate::new(200)
            .insert_header("X-Trace", "abc")
            .set_body_bytes(b"\x00binary".to_vec()),
    )
    .await;
    let (tx, mut rx) = unbounded_channel();

    let request = Request::data(
        &session(),
        get(&server, "/blob"),
        RequestOptions::default(),
        move |result| tx.send(result).unwrap(),
    );
    assert_eq!(request.state(), RequestState::Idle);
    request.start();

    let fetched = recv(&mut rx).await.expect("success");
    assert_eq!(&fetched.body[..], b"\x00binary");
    assert_eq!(fetched.response.status, 200);
    assert_eq!(fetched.response.header("x-trace"), Some("abc"));
    eventually(|| request.state() == RequestState::Finished).await;
}

#[tokio::test]
async fn test_json_array_request_rejects_object_body() {
    let server = mock(
        "/list",
        ResponseTemplate::new(200).set_body_string(r#"{"items": []}"#),
    )
    .await;
    let (tx, mut rx) = unbounded_channel();

    Request::json_array(
        &session(),
        get(&server, "/list"),
        RequestOptions::default(),
        move |result| tx.send(result).unwrap(),
    )
    .start();

    let error = recv(&mut rx).await.unwrap_err();
    assert_eq!(error.error_code(), Some(ErrorCode::InvalidData));
    assert!(error.to_string().contains("expected a JSON array"), "{error}");
    assert_eq!(
        error.failing_url(),
        Some(format!("{}/list", server.uri()).as_str())
    );
}

#[tokio::test]
async fn test_json_object_request_decodes_and_rejects_garbage() {
    let server = MockServer::start().await;
    Mock::given(path("/show"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"title": "Show"}"#))
        .mount(&server)
        .await;
    Mock::given(path("/broken"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
        .mount(&server)
        .await;

    let session = session();
    let (tx, mut rx) = unbounded_channel();
    for route in ["/show", "/broken"] {
        let tx = tx.clone();
        Request::json_object(
            &session,
            get(&server, route),
            RequestOptions::default(),
            move |result| tx.send((route, result)).unwrap(),
        )
        .start();
    }

    for _ in 0..2 {
        match recv(&mut rx).await {
            ("/show", result) => {
                let fetched = result.expect("object");
                assert_eq!(fetched.body["title"], "Show");
            }
            (_, result) => {
                let error = result.unwrap_err();
                assert!(matches!(error, NetworkError::InvalidData { .. }));
                assert!(error.to_string().contains("malformed JSON"), "{error}");
            }
        }
    }
}

#[tokio::test]
async fn test_object_request_wraps_parser_error() {
    let server = mock("/count", ResponseTemplate::new(200).set_body_string("many")).await;
    let (tx, mut rx) = unbounded_channel();

    Request::object(
        &session(),
        get(&server, "/count"),
        RequestOptions::default(),
        |bytes: &[u8]| {
            std::str::from_utf8(bytes)
                .map_err(|e| e.to_string())
                .and_then(|s| s.parse::<u64>().map_err(|e| format!("bad count: {e}")))
        },
        move |result| tx.send(result).unwrap(),
    )
    .start();

    let error = recv(&mut rx).await.unwrap_err();
    assert_eq!(error.error_code(), Some(ErrorCode::InvalidData));
    assert!(error.to_string().contains("bad count"), "{error}");
}

#[tokio::test]
async fn test_http_404_is_an_error_by_default() {
    let server = mock("/missing", ResponseTemplate::new(404).set_body_string("nope")).await;
    let (tx, mut rx) = unbounded_channel();

    Request::data(
        &session(),
        get(&server, "/missing"),
        RequestOptions::default(),
        move |result| tx.send(result).unwrap(),
    )
    .start();

    let error = recv(&mut rx).await.unwrap_err();
    assert_eq!(error.status_code(), Some(404));
    assert_eq!(error.error_code(), Some(ErrorCode::Http));
    match error {
        NetworkError::Http { body, .. } => assert_eq!(body.as_deref(), Some(&b"nope"[..])),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_http_404_is_delivered_when_http_errors_disabled() {
    let server = mock("/missing", ResponseTemplate::new(404).set_body_string("nope")).await;
    let (tx, mut rx) = unbounded_channel();

    Request::data(
        &session(),
        get(&server, "/missing"),
        RequestOptions::default().http_errors_as_errors(false),
        move |result| tx.send(result).unwrap(),
    )
    .start();

    let fetched = recv(&mut rx).await.expect("404 delivered as success");
    assert_eq!(fetched.response.status, 404);
    assert_eq!(&fetched.body[..], b"nope");
}

#[tokio::test]
async fn test_cancelled_request_is_silent_by_default() {
    let server = mock(
        "/slow",
        ResponseTemplate::new(200)
            .set_body_string("late")
            .set_delay(Duration::from_millis(500)),
    )
    .await;
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);

    let request = Request::data(
        &session(),
        get(&server, "/slow"),
        RequestOptions::default(),
        move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        },
    );
    request.start();
    tokio::time::sleep(Duration::from_millis(50)).await;
    request.cancel();
    request.cancel();

    tokio::time::sleep(Duration::from_millis(800)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(request.state(), RequestState::Cancelled);
}

#[tokio::test]
async fn test_cancelled_request_delivers_one_cancellation_when_asked() {
    let server = mock(
        "/slow",
        ResponseTemplate::new(200)
            .set_body_string("late")
            .set_delay(Duration::from_millis(500)),
    )
    .await;
    let (tx, mut rx) = unbounded_channel();

    let request = Request::data(
        &session(),
        get(&server, "/slow"),
        RequestOptions::default().deliver_cancellation_errors(true),
        move |result| tx.send(result).unwrap(),
    );
    request.start();
    tokio::time::sleep(Duration::from_millis(50)).await;
    request.cancel();

    let error = recv(&mut rx).await.unwrap_err();
    assert!(error.is_cancellation());
    assert_eq!(error.domain(), TRANSPORT_ERROR_DOMAIN);
    assert_silent(&mut rx, Duration::from_millis(800)).await;
}

#[tokio::test]
async fn test_cancel_before_start_never_runs() {
    let transport = Arc::new(StubTransport::new().route("/items", StubReply::ok("[]")));
    let session = Session::with_runtime(transport.clone(), tokio::runtime::Handle::current());
    let (tx, mut rx) = unbounded_channel();

    let request = Request::json_array(
        &session,
        stub_url("/items"),
        RequestOptions::default().deliver_cancellation_errors(true),
        move |result| tx.send(result).unwrap(),
    );
    request.cancel();
    assert_eq!(request.state(), RequestState::Cancelled);

    let error = recv(&mut rx).await.unwrap_err();
    assert!(error.is_cancellation());

    request.start();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(transport.calls(), 0);
    assert_eq!(request.state(), RequestState::Cancelled);
}

#[tokio::test]
async fn test_start_twice_runs_once() {
    let transport = Arc::new(
        StubTransport::new().route("/once", StubReply::ok("x").after(Duration::from_millis(20))),
    );
    let session = Session::with_runtime(transport.clone(), tokio::runtime::Handle::current());
    let (tx, mut rx) = unbounded_channel();

    let request = Request::data(
        &session,
        stub_url("/once"),
        RequestOptions::default(),
        move |result| tx.send(result).unwrap(),
    );
    request.start();
    request.start();
    assert!(request.is_running());

    recv(&mut rx).await.expect("success");
    request.start();
    assert_silent(&mut rx, Duration::from_millis(100)).await;
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn test_certificate_failure_is_remapped() {
    let transport = Arc::new(StubTransport::new().route(
        "/tls",
        StubReply::fail(
            TransportErrorKind::ServerCertificateUntrusted,
            "invalid peer certificate: UnknownIssuer",
        ),
    ));
    let session = Session::with_runtime(transport, tokio::runtime::Handle::current());
    let (tx, mut rx) = unbounded_channel();

    for options in [
        RequestOptions::default(),
        RequestOptions::default().remap_certificate_trust(false),
    ] {
        let tx = tx.clone();
        Request::data(&session, stub_url("/tls"), options, move |result| {
            tx.send(result).unwrap();
        })
        .start();
        let error = recv(&mut rx).await.unwrap_err();
        assert_eq!(error.domain(), TRANSPORT_ERROR_DOMAIN);
        assert_eq!(
            error.code(),
            TransportErrorKind::ServerCertificateUntrusted.code()
        );
        match error {
            NetworkError::Transport(transport_error) if options.remap_certificate_trust => {
                assert_eq!(transport_error.message(), PUBLIC_NETWORK_MESSAGE);
            }
            NetworkError::Transport(transport_error) => {
                assert!(transport_error.message().contains("UnknownIssuer"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_connection_refused_is_a_transport_error() {
    // Bind then drop a server to get a port nothing listens on
    let server = MockServer::start().await;
    let url = format!("{}/gone", server.uri());
    drop(server);

    let transport = ReqwestTransport::new(&TransportConfig::default()).unwrap();
    let session = Session::new(transport).unwrap();
    let (tx, mut rx) = unbounded_channel();
    Request::data(
        &session,
        HttpRequest::parse_get(&url).unwrap(),
        RequestOptions::default(),
        move |result| tx.send(result).unwrap(),
    )
    .start();

    let error = recv(&mut rx).await.unwrap_err();
    assert!(matches!(error, NetworkError::Transport(_)));
    assert_eq!(error.domain(), TRANSPORT_ERROR_DOMAIN);
}

#[tokio::test]
async fn test_session_tracks_activity_and_cancel_all() {
    let transport = Arc::new(
        StubTransport::new().route("/slow", StubReply::ok("x").after(Duration::from_secs(2))),
    );
    let session = Session::with_runtime(transport, tokio::runtime::Handle::current());
    let busy = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&busy);
    session.set_activity_handler(move |active| flag.store(active, Ordering::SeqCst));

    let (tx, mut rx) = unbounded_channel();
    let requests: Vec<Request> = (0..3)
        .map(|_| {
            let tx = tx.clone();
            Request::data(
                &session,
                stub_url("/slow"),
                RequestOptions::default().deliver_cancellation_errors(true),
                move |result| tx.send(result).unwrap(),
            )
        })
        .collect();
    for request in &requests {
        request.start();
    }
    assert_eq!(session.running_count(), 3);
    assert!(session.is_busy());
    assert!(busy.load(Ordering::SeqCst));

    session.cancel_all();
    for _ in 0..3 {
        assert!(recv(&mut rx).await.unwrap_err().is_cancellation());
    }
    eventually(|| !session.is_busy()).await;
    assert!(!busy.load(Ordering::SeqCst));

    // Without a handler, activity changes go unreported
    session.clear_activity_handler();
    let request = Request::data(
        &session,
        stub_url("/slow"),
        RequestOptions::default(),
        |_| {},
    );
    request.start();
    assert!(session.is_busy());
    assert!(!busy.load(Ordering::SeqCst));
    request.cancel();
    eventually(|| !session.is_busy()).await;
}
