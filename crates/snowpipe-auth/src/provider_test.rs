//! Bootstrap round-trip tests against the scripted fixture server

use std::sync::Arc;
use std::time::Duration;

use snowpipe_config::{AccountConfig, ClientOptions, CredentialsConfig};
use snowpipe_transport::testing::{http_response, TestServer};
use tokio_util::sync::CancellationToken;

use crate::provider::AuthProvider;
use crate::test_keys::PKCS8_PEM;
use crate::AuthError;

fn provider_against(server: &TestServer) -> AuthProvider {
    let account = AccountConfig::new("myorg", "acct").with_base_url(server.base().as_str());
    let credentials = CredentialsConfig::from_pem("ingest_user", PKCS8_PEM);
    let options = ClientOptions::default()
        .with_max_retries(1)
        .with_retry_backoff_base(Duration::from_millis(1))
        .with_timeout(Duration::from_secs(5));
    AuthProvider::new(&account, &credentials, &options).unwrap()
}

#[tokio::test]
async fn test_bootstrap_happy_path() {
    let server = TestServer::start(vec![
        http_response(
            200,
            "OK",
            &[],
            r#"{"ingestHostname":"acct.ingest.snowflakecomputing.com"}"#,
        ),
        http_response(
            200,
            "OK",
            &[],
            r#"{"access_token":"tok-abc","expires_in":600}"#,
        ),
    ])
    .await;

    let provider = provider_against(&server);
    let cancel = CancellationToken::new();

    assert!(!provider.is_ready().await);
    provider.ensure_ready(&cancel).await.unwrap();
    assert!(provider.is_ready().await);
    assert_eq!(
        provider.ingest_base_uri().await.unwrap().as_str(),
        "https://acct.ingest.snowflakecomputing.com/"
    );
    assert_eq!(provider.access_token(&cancel).await.unwrap(), "tok-abc");

    let requests = server.requests().await;
    assert_eq!(requests.len(), 2);

    // Host discovery first, token exchange second.
    assert_eq!(requests[0].path(), "/v2/streaming/hostname");
    assert_eq!(
        requests[0].header("x-snowflake-authorization-token-type"),
        Some("KEYPAIR_JWT")
    );
    let bearer = requests[0].header("authorization").unwrap();
    assert!(bearer.starts_with("Bearer ey"), "JWT bearer, got {bearer}");

    assert_eq!(requests[1].path(), "/oauth/token");
    let form = String::from_utf8(requests[1].body.clone()).unwrap();
    assert!(form.contains("grant_type=urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Ajwt-bearer"));
    assert!(form.contains("scope=https%3A%2F%2Facct.ingest.snowflakecomputing.com%2F"));
}

#[tokio::test]
async fn test_ensure_ready_is_idempotent() {
    let server = TestServer::start(vec![
        http_response(200, "OK", &[], r#""acct.ingest.snowflakecomputing.com""#),
        http_response(200, "OK", &[], "access_token=tok-form&expires_in=900"),
    ])
    .await;

    let provider = provider_against(&server);
    let cancel = CancellationToken::new();

    provider.ensure_ready(&cancel).await.unwrap();
    // Already ready: must not issue further bootstrap calls.
    provider.ensure_ready(&cancel).await.unwrap();
    provider.ensure_ready(&cancel).await.unwrap();

    assert_eq!(server.requests().await.len(), 2);
    assert_eq!(provider.access_token(&cancel).await.unwrap(), "tok-form");
}

#[tokio::test]
async fn test_concurrent_ensure_ready_single_flight() {
    let server = TestServer::start(vec![
        http_response(200, "OK", &[], r#"{"ingestHostname":"h.snowflakecomputing.com"}"#),
        http_response(200, "OK", &[], r#"{"access_token":"tok-1"}"#),
    ])
    .await;

    let provider = Arc::new(provider_against(&server));
    let cancel = CancellationToken::new();

    let a = {
        let provider = Arc::clone(&provider);
        let cancel = cancel.clone();
        tokio::spawn(async move { provider.ensure_ready(&cancel).await })
    };
    let b = {
        let provider = Arc::clone(&provider);
        let cancel = cancel.clone();
        tokio::spawn(async move { provider.ensure_ready(&cancel).await })
    };

    a.await.unwrap().unwrap();
    b.await.unwrap().unwrap();

    // Exactly one refresh between the two callers.
    assert_eq!(server.requests().await.len(), 2);
}

#[tokio::test]
async fn test_bootstrap_failure_carries_status_and_snippet() {
    let long_body = "forbidden ".repeat(60);
    let server =
        TestServer::start(vec![http_response(403, "Forbidden", &[], &long_body)]).await;

    let provider = provider_against(&server);
    let err = provider
        .ensure_ready(&CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        AuthError::Bootstrap { stage, detail } => {
            assert_eq!(stage, "host discovery");
            assert!(detail.contains("HTTP 403"));
            // Body truncated to ~200 chars.
            assert!(detail.len() < long_body.len());
        }
        other => panic!("expected Bootstrap error, got {other:?}"),
    }
}
