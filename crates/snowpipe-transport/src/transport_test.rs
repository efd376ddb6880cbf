//! End-to-end transport tests against the scripted fixture server

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::testing::{http_response, TestServer};
use crate::{RequestAuth, RequestBody, Result, Transport, TransportError};
use snowpipe_config::ClientOptions;

struct FakeAuth {
    ingest: Option<Url>,
    authorize_calls: AtomicU32,
}

impl FakeAuth {
    fn new(ingest: Option<Url>) -> Arc<Self> {
        Arc::new(Self {
            ingest,
            authorize_calls: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl RequestAuth for FakeAuth {
    async fn ensure_ready(&self, _cancel: &CancellationToken) -> Result<()> {
        Ok(())
    }

    async fn authorize(&self, _cancel: &CancellationToken) -> Result<String> {
        self.authorize_calls.fetch_add(1, Ordering::Relaxed);
        Ok("test-token".to_string())
    }

    async fn ingest_base(&self) -> Result<Url> {
        self.ingest
            .clone()
            .ok_or_else(|| TransportError::Auth("ingest host not discovered".into()))
    }
}

fn fast_options() -> ClientOptions {
    ClientOptions::default()
        .with_max_retries(2)
        .with_retry_backoff_base(Duration::from_millis(1))
        .with_timeout(Duration::from_secs(5))
}

#[tokio::test]
async fn test_retries_transient_status_then_succeeds() {
    let server = TestServer::start(vec![
        http_response(503, "Service Unavailable", &[], "try later"),
        http_response(200, "OK", &[], r#"{"ok":true}"#),
    ])
    .await;

    let auth = FakeAuth::new(Some(server.base()));
    let transport = Transport::new(&fast_options(), server.base(), auth.clone()).unwrap();

    let value: serde_json::Value = transport
        .request(
            Method::GET,
            "/v2/streaming/databases/d/schemas/s/pipes/p/channels/c",
            &[],
            RequestBody::None,
            &[],
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(value["ok"], true);
    let requests = server.requests().await;
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].header("authorization"), Some("Bearer test-token"));
    assert_eq!(requests[0].header("accept"), Some("application/json"));
    assert_eq!(auth.authorize_calls.load(Ordering::Relaxed), 2);
}

#[tokio::test]
async fn test_non_retryable_status_surfaces_typed_error() {
    let server = TestServer::start(vec![http_response(
        404,
        "Not Found",
        &[],
        r#"{"code":"PIPE_NOT_FOUND","message":"no such pipe"}"#,
    )])
    .await;

    let auth = FakeAuth::new(Some(server.base()));
    let transport = Transport::new(&fast_options(), server.base(), auth).unwrap();

    let err = transport
        .request::<serde_json::Value>(
            Method::GET,
            "/v2/streaming/databases/d/schemas/s/pipes/p/channels/c",
            &[],
            RequestBody::None,
            &[],
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    match err {
        TransportError::Api(api) => {
            assert_eq!(api.status, 404);
            assert_eq!(api.code.as_deref(), Some("PIPE_NOT_FOUND"));
            assert_eq!(api.message.as_deref(), Some("no such pipe"));
        }
        other => panic!("expected Api error, got {other:?}"),
    }

    // A 404 must not be retried.
    assert_eq!(server.requests().await.len(), 1);
}

#[tokio::test]
async fn test_gzip_append_falls_back_uncompressed_once() {
    let server = TestServer::start(vec![
        http_response(
            415,
            "Unsupported Media Type",
            &[],
            "Content-Encoding: gzip not supported",
        ),
        http_response(200, "OK", &[], r#"{"next_continuation_token":"t1"}"#),
    ])
    .await;

    let auth = FakeAuth::new(Some(server.base()));
    let mut options = fast_options();
    options.gzip_min_bytes = 16;
    let transport = Transport::new(&options, server.base(), auth).unwrap();

    let rows = b"{\"ID\":1}\n{\"ID\":2}\n{\"ID\":3}\n{\"ID\":4}\n".to_vec();
    let value: serde_json::Value = transport
        .request(
            Method::POST,
            "/v2/streaming/data/databases/d/schemas/s/pipes/p/channels/c/rows",
            &[("continuationToken", "t0".to_string())],
            RequestBody::Ndjson(&rows),
            &[],
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(value["next_continuation_token"], "t1");

    let requests = server.requests().await;
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].header("content-encoding"), Some("gzip"));
    assert_eq!(&requests[0].body[..2], &[0x1f, 0x8b]);
    assert_eq!(requests[1].header("content-encoding"), None);
    assert_eq!(requests[1].body, rows);
    for request in &requests {
        assert_eq!(request.header("content-type"), Some("application/x-ndjson"));
        assert!(request.path().contains("continuationToken=t0"));
    }
}

#[tokio::test]
async fn test_bootstrap_path_uses_account_base_without_auth() {
    let server = TestServer::start(vec![http_response(
        200,
        "OK",
        &[],
        r#"{"ingestHostname":"ingest.example.com"}"#,
    )])
    .await;

    // No ingest base: any non-bootstrap request would fail.
    let auth = FakeAuth::new(None);
    let transport = Transport::new(&fast_options(), server.base(), auth.clone()).unwrap();

    let value: serde_json::Value = transport
        .request(
            Method::GET,
            "/v2/streaming/hostname",
            &[],
            RequestBody::None,
            &[],
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(value["ingestHostname"], "ingest.example.com");
    assert_eq!(auth.authorize_calls.load(Ordering::Relaxed), 0);
    let requests = server.requests().await;
    assert_eq!(requests[0].header("authorization"), None);
}

#[tokio::test]
async fn test_empty_delete_body_is_none() {
    let server = TestServer::start(vec![http_response(200, "OK", &[], "")]).await;
    let auth = FakeAuth::new(Some(server.base()));
    let transport = Transport::new(&fast_options(), server.base(), auth).unwrap();

    let body = serde_json::json!({});
    let value: Option<serde_json::Value> = transport
        .request_opt(
            Method::DELETE,
            "/v2/streaming/databases/d/schemas/s/pipes/p/channels/c",
            &[],
            RequestBody::Json(&body),
            &[],
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(value.is_none());
}
