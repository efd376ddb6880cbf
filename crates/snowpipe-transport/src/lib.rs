//! Snowpipe HTTP transport
//!
//! The request envelope shared by every call to the streaming ingest
//! service: path normalization, account-vs-ingest base resolution,
//! authentication stamping, retry with capped exponential backoff, and
//! gzip for append bodies.
//!
//! The auth provider sits on the other side of the [`RequestAuth`] seam;
//! its own bootstrap calls (host discovery, OAuth exchange) reuse
//! [`retry::send_with_retry`] directly so that every request in the
//! process goes through the same retry loop.

mod error;
pub mod retry;
mod request;
pub mod testing;

#[cfg(test)]
mod transport_test;

pub use error::{ApiError, Result, TransportError};
pub use request::{
    build_http_client, is_bootstrap_path, normalize_path, ExtraHeaders, RequestAuth, RequestBody,
    Transport, HOSTNAME_PATH, NDJSON_CONTENT_TYPE, OAUTH_TOKEN_PATH,
};
pub use retry::{is_retryable_status, parse_retry_after, RetryPolicy, MAX_BACKOFF};
