//! HTTP client tuning options

use std::time::Duration;

use serde::Deserialize;

/// Default User-Agent header
pub const DEFAULT_USER_AGENT: &str = concat!("snowpipe-rs/", env!("CARGO_PKG_VERSION"));

/// Default per-operation HTTP timeout
const DEFAULT_TIMEOUT_SECS: u64 = 100;

/// Default base delay for exponential backoff
const DEFAULT_RETRY_BACKOFF_BASE_MS: u64 = 200;

/// Default retry cap
const DEFAULT_MAX_RETRIES: u32 = 5;

/// Default minimum body size before append payloads are gzip'd
const DEFAULT_GZIP_MIN_BYTES: usize = 4096;

/// Gzip compression level for append bodies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GzipLevel {
    /// Prefer speed over ratio
    Fastest,
    /// Balanced speed and ratio
    #[default]
    Optimal,
    /// Maximum compression
    Best,
}

/// HTTP client tuning knobs
///
/// All fields have sensible defaults - only specify what you want to change.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientOptions {
    /// User-Agent header sent on every request
    pub user_agent: String,

    /// Per-HTTP-operation timeout in seconds
    pub timeout_secs: u64,

    /// Base delay for exponential backoff in milliseconds
    pub retry_backoff_base_ms: u64,

    /// Maximum retry attempts for transient failures
    pub max_retries: u32,

    /// Optional proxy URL
    pub proxy: Option<String>,

    /// Verify TLS certificates (disable only for diagnostic environments)
    pub validate_certificates: bool,

    /// Compress append bodies with gzip
    pub enable_gzip_on_append: bool,

    /// Minimum body size in bytes before gzip kicks in
    pub gzip_min_bytes: usize,

    /// Gzip compression level
    pub gzip_level: GzipLevel,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            retry_backoff_base_ms: DEFAULT_RETRY_BACKOFF_BASE_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            proxy: None,
            validate_certificates: true,
            enable_gzip_on_append: true,
            gzip_min_bytes: DEFAULT_GZIP_MIN_BYTES,
            gzip_level: GzipLevel::Optimal,
        }
    }
}

impl ClientOptions {
    /// Per-operation timeout as a Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Backoff base as a Duration
    pub fn retry_backoff_base(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_base_ms)
    }

    /// Set the User-Agent header
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Set the per-operation timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs();
        self
    }

    /// Set the retry cap
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the backoff base
    #[must_use]
    pub fn with_retry_backoff_base(mut self, base: Duration) -> Self {
        self.retry_backoff_base_ms = base.as_millis() as u64;
        self
    }

    /// Set the proxy URL
    #[must_use]
    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    /// Toggle TLS certificate validation
    #[must_use]
    pub fn with_certificate_validation(mut self, validate: bool) -> Self {
        self.validate_certificates = validate;
        self
    }

    /// Toggle gzip compression of append bodies
    #[must_use]
    pub fn with_gzip_on_append(mut self, enable: bool) -> Self {
        self.enable_gzip_on_append = enable;
        self
    }
}
