//! Request facade
//!
//! [`Transport`] owns the HTTP client and applies the same skeleton to
//! every request: normalize the path, resolve the base URI (bootstrap
//! paths go to the account base, everything else to the discovered ingest
//! base), stamp authentication, send through the retry loop, and classify
//! the outcome. NDJSON append bodies are gzip'd above a size threshold
//! with a one-shot uncompressed fallback when the service rejects the
//! encoding.

use std::io::Write;
use std::sync::Arc;

use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::Method;
use serde::de::DeserializeOwned;
use snowpipe_config::{ClientOptions, GzipLevel};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::error::{Result, TransportError};
use crate::retry::{send_with_retry, RetryPolicy};

/// Host discovery path, served from the account base
pub const HOSTNAME_PATH: &str = "/v2/streaming/hostname";

/// OAuth token exchange path, served from the account base
pub const OAUTH_TOKEN_PATH: &str = "/oauth/token";

/// MIME type for append bodies
pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

/// Whether a path belongs to the auth bootstrap
///
/// Bootstrap requests resolve against the account base and must not call
/// back into `ensure_ready` (the auth provider is the one issuing them).
pub fn is_bootstrap_path(path: &str) -> bool {
    path == HOSTNAME_PATH || path == OAUTH_TOKEN_PATH
}

/// Normalize a request path: leading slash added, trailing slash stripped
/// except for the root
pub fn normalize_path(path: &str) -> String {
    let mut normalized = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };
    while normalized.len() > 1 && normalized.ends_with('/') {
        normalized.pop();
    }
    normalized
}

/// Authentication collaborator for non-bootstrap requests
#[async_trait]
pub trait RequestAuth: Send + Sync {
    /// Refresh tokens and host discovery if stale; idempotent
    async fn ensure_ready(&self, cancel: &CancellationToken) -> Result<()>;

    /// Ensure readiness and return the bearer token to stamp on the request
    async fn authorize(&self, cancel: &CancellationToken) -> Result<String>;

    /// The discovered ingest base URI; fails when discovery has not run
    async fn ingest_base(&self) -> Result<Url>;
}

/// Request body shapes the service accepts
pub enum RequestBody<'a> {
    /// No body (GET)
    None,
    /// JSON value (open/delete/status bodies)
    Json(&'a serde_json::Value),
    /// Newline-delimited JSON rows (append)
    Ndjson(&'a [u8]),
}

/// Extra header pairs attached to a single request
pub type ExtraHeaders<'a> = &'a [(String, String)];

/// Build the shared HTTP client from client options
///
/// # Errors
///
/// Returns error if the proxy URL is invalid or client construction fails.
pub fn build_http_client(options: &ClientOptions) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .user_agent(options.user_agent.clone())
        .timeout(options.timeout());

    if let Some(proxy) = &options.proxy {
        builder = builder.proxy(reqwest::Proxy::all(proxy.as_str())?);
    }
    if !options.validate_certificates {
        warn!("TLS certificate validation is disabled");
        builder = builder.danger_accept_invalid_certs(true);
    }

    builder.build().map_err(TransportError::Http)
}

fn compression(level: GzipLevel) -> Compression {
    match level {
        GzipLevel::Fastest => Compression::fast(),
        GzipLevel::Optimal => Compression::default(),
        GzipLevel::Best => Compression::best(),
    }
}

fn gzip(bytes: &[u8], level: GzipLevel) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(bytes.len() / 2), compression(level));
    encoder.write_all(bytes)?;
    Ok(encoder.finish()?)
}

/// Whether a rejection looks like the service refusing gzip'd bodies
fn wants_gzip_fallback(error: &TransportError) -> bool {
    match error {
        TransportError::Api(e) if e.status == 400 || e.status == 415 => {
            e.body.contains("Content-Encoding") || e.body.to_ascii_lowercase().contains("gzip")
        }
        _ => false,
    }
}

/// HTTP transport for the streaming ingest REST surface
pub struct Transport {
    client: reqwest::Client,
    account_base: Url,
    auth: Arc<dyn RequestAuth>,
    policy: RetryPolicy,
    enable_gzip: bool,
    gzip_min_bytes: usize,
    gzip_level: GzipLevel,
}

impl Transport {
    /// Create a transport from client options
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be constructed.
    pub fn new(
        options: &ClientOptions,
        account_base: Url,
        auth: Arc<dyn RequestAuth>,
    ) -> Result<Self> {
        let client = build_http_client(options)?;
        Ok(Self::with_client(client, options, account_base, auth))
    }

    /// Create a transport around an existing HTTP client
    pub fn with_client(
        client: reqwest::Client,
        options: &ClientOptions,
        account_base: Url,
        auth: Arc<dyn RequestAuth>,
    ) -> Self {
        Self {
            client,
            account_base,
            auth,
            policy: RetryPolicy::from_options(options),
            enable_gzip: options.enable_gzip_on_append,
            gzip_min_bytes: options.gzip_min_bytes,
            gzip_level: options.gzip_level,
        }
    }

    /// Send a request and decode the JSON response body
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Api`] for non-retryable service rejections,
    /// [`TransportError::Exhausted`] when retries run out, and
    /// [`TransportError::Decode`] when the body does not match `T`.
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: RequestBody<'_>,
        extra_headers: ExtraHeaders<'_>,
        cancel: &CancellationToken,
    ) -> Result<T> {
        let text = self
            .execute(method, path, query, body, extra_headers, cancel)
            .await?;
        serde_json::from_str(&text).map_err(Into::into)
    }

    /// Send a request whose success response may have an empty body
    pub async fn request_opt<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: RequestBody<'_>,
        extra_headers: ExtraHeaders<'_>,
        cancel: &CancellationToken,
    ) -> Result<Option<T>> {
        let text = self
            .execute(method, path, query, body, extra_headers, cancel)
            .await?;
        if text.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&text)?))
    }

    async fn execute(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: RequestBody<'_>,
        extra_headers: ExtraHeaders<'_>,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let path = normalize_path(path);
        let bootstrap = is_bootstrap_path(&path);

        let (base, bearer) = if bootstrap {
            (self.account_base.clone(), None)
        } else {
            let token = self.auth.authorize(cancel).await?;
            (self.auth.ingest_base().await?, Some(token))
        };

        let url = base
            .join(&path)
            .map_err(|e| TransportError::InvalidUrl(format!("{base}{path}: {e}")))?;

        match body {
            RequestBody::Ndjson(bytes) => {
                self.execute_ndjson(method, url, query, bytes, extra_headers, bearer, cancel)
                    .await
            }
            RequestBody::Json(value) => {
                let operation = path.clone();
                let response = send_with_retry(&self.policy, &operation, cancel, || {
                    self.base_request(method.clone(), &url, query, bearer.as_deref(), extra_headers)
                        .json(value)
                })
                .await?;
                Ok(response.text().await?)
            }
            RequestBody::None => {
                let operation = path.clone();
                let response = send_with_retry(&self.policy, &operation, cancel, || {
                    self.base_request(method.clone(), &url, query, bearer.as_deref(), extra_headers)
                })
                .await?;
                Ok(response.text().await?)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute_ndjson(
        &self,
        method: Method,
        url: Url,
        query: &[(&str, String)],
        bytes: &[u8],
        extra_headers: ExtraHeaders<'_>,
        bearer: Option<String>,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let operation = url.path().to_string();
        let compress = self.enable_gzip && bytes.len() >= self.gzip_min_bytes;

        if compress {
            let compressed = gzip(bytes, self.gzip_level)?;
            debug!(
                operation = %operation,
                raw_bytes = bytes.len(),
                compressed_bytes = compressed.len(),
                "compressing append body"
            );
            let result = send_with_retry(&self.policy, &operation, cancel, || {
                self.base_request(method.clone(), &url, query, bearer.as_deref(), extra_headers)
                    .header(CONTENT_TYPE, NDJSON_CONTENT_TYPE)
                    .header(CONTENT_ENCODING, "gzip")
                    .body(compressed.clone())
            })
            .await;

            match result {
                Ok(response) => return Ok(response.text().await?),
                Err(e) if wants_gzip_fallback(&e) => {
                    // The endpoint cannot take compressed bodies; resend the
                    // same payload uncompressed. Does not consume a retry.
                    warn!(operation = %operation, error = %e, "service rejected gzip, retrying uncompressed");
                }
                Err(e) => return Err(e),
            }
        }

        let response = send_with_retry(&self.policy, &operation, cancel, || {
            self.base_request(method.clone(), &url, query, bearer.as_deref(), extra_headers)
                .header(CONTENT_TYPE, NDJSON_CONTENT_TYPE)
                .body(bytes.to_vec())
        })
        .await?;
        Ok(response.text().await?)
    }

    fn base_request(
        &self,
        method: Method,
        url: &Url,
        query: &[(&str, String)],
        bearer: Option<&str>,
        extra_headers: ExtraHeaders<'_>,
    ) -> reqwest::RequestBuilder {
        let mut request = self
            .client
            .request(method, url.clone())
            .header(ACCEPT, "application/json");
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(token) = bearer {
            request = request.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        for (name, value) in extra_headers {
            request = request.header(name.as_str(), value.as_str());
        }
        request
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("v2/streaming/hostname"), "/v2/streaming/hostname");
        assert_eq!(normalize_path("/v2/streaming/channels/status/"), "/v2/streaming/channels/status");
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path("//"), "/");
    }

    #[test]
    fn test_bootstrap_paths() {
        assert!(is_bootstrap_path("/v2/streaming/hostname"));
        assert!(is_bootstrap_path("/oauth/token"));
        assert!(!is_bootstrap_path("/v2/streaming/databases/d/schemas/s/pipes/p/channels/c"));
    }

    #[test]
    fn test_gzip_roundtrip_header() {
        let compressed = gzip(b"hello hello hello hello", GzipLevel::Fastest).unwrap();
        // RFC 1952 magic bytes
        assert_eq!(&compressed[..2], &[0x1f, 0x8b]);
    }

    #[test]
    fn test_gzip_fallback_predicate() {
        let yes = TransportError::Api(ApiError::from_body(
            415,
            "Content-Encoding: gzip not supported".into(),
        ));
        assert!(wants_gzip_fallback(&yes));

        let wrong_status = TransportError::Api(ApiError::from_body(409, "gzip".into()));
        assert!(!wants_gzip_fallback(&wrong_status));

        let wrong_body = TransportError::Api(ApiError::from_body(400, "bad row".into()));
        assert!(!wants_gzip_fallback(&wrong_body));
    }
}
