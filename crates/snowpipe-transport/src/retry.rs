//! Retry policy and backoff
//!
//! Every request to the service runs through [`send_with_retry`]: transient
//! statuses and transport errors back off exponentially with jitter, a
//! `Retry-After` header wins when present, and caller cancellation is
//! terminal.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use reqwest::StatusCode;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{ApiError, Result, TransportError};

/// Hard cap on any single backoff delay
pub const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Exponent cap: delays stop doubling after `base * 2^6`
const MAX_BACKOFF_EXPONENT: u32 = 6;

/// Retry policy for transient failures
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum retry attempts (the initial try is not counted)
    pub max_retries: u32,
    /// Base delay for exponential backoff
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            backoff_base: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    /// Build a policy from client options
    pub fn from_options(options: &snowpipe_config::ClientOptions) -> Self {
        Self {
            max_retries: options.max_retries,
            backoff_base: options.retry_backoff_base(),
        }
    }

    /// Delay before retry number `attempt` (1-based)
    ///
    /// A server-provided `Retry-After` wins, clamped to [`MAX_BACKOFF`].
    /// Otherwise `base * 2^min(6, attempt-1)`, jittered by U[0.85, 1.15]
    /// and clamped to [`MAX_BACKOFF`].
    pub fn backoff_delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        if let Some(hint) = retry_after {
            return hint.min(MAX_BACKOFF);
        }
        let exponent = attempt.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
        let base_ms = self.backoff_base.as_millis() as f64 * (1u64 << exponent) as f64;
        let jitter = rand::thread_rng().gen_range(0.85..=1.15);
        Duration::from_millis((base_ms * jitter) as u64).min(MAX_BACKOFF)
    }
}

/// Whether a status is worth retrying
///
/// 429 (throttled), 425 (too early), 408 (request timeout), and all 5xx.
pub fn is_retryable_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 408 | 425 | 429) || status.is_server_error()
}

/// Parse a `Retry-After` header value
///
/// Accepts delta-seconds or an HTTP-date; a date in the past yields zero,
/// never a negative delay.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let when = DateTime::parse_from_rfc2822(value).ok()?;
    let delta = when.with_timezone(&Utc) - now;
    Some(Duration::from_secs(delta.num_seconds().max(0) as u64))
}

fn retry_after_from(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| parse_retry_after(v, Utc::now()))
}

/// Send a request, retrying transient failures
///
/// `build` must produce a fresh request each call; bodies are rebuilt per
/// attempt rather than cloned. Non-retryable statuses surface immediately
/// as [`TransportError::Api`]; retryable statuses and transport errors are
/// retried up to `policy.max_retries` times. Caller cancellation aborts
/// both in-flight sends and backoff sleeps.
pub async fn send_with_retry<F>(
    policy: &RetryPolicy,
    operation: &str,
    cancel: &CancellationToken,
    build: F,
) -> Result<reqwest::Response>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut last_error = String::new();

    for attempt in 1..=policy.max_retries + 1 {
        if attempt > 1 {
            debug!(
                operation,
                attempt,
                max_attempts = policy.max_retries + 1,
                "retrying request"
            );
        }

        let send = build().send();
        let outcome = tokio::select! {
            result = send => result,
            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
        };

        let retry_after = match outcome {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return Ok(response);
                }
                if !is_retryable_status(status) {
                    let body = response.text().await.unwrap_or_default();
                    return Err(TransportError::Api(ApiError::from_body(
                        status.as_u16(),
                        body,
                    )));
                }
                let hint = retry_after_from(&response);
                last_error = format!("HTTP {}", status.as_u16());
                warn!(operation, status = status.as_u16(), "transient service error");
                hint
            }
            Err(e) => {
                // Cancellation surfaces through reqwest as a generic send
                // error; only treat it as terminal when the caller asked.
                if cancel.is_cancelled() {
                    return Err(TransportError::Cancelled);
                }
                last_error = e.to_string();
                debug!(operation, error = %e, "transport error");
                None
            }
        };

        if attempt <= policy.max_retries {
            let delay = policy.backoff_delay(attempt, retry_after);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            }
        }
    }

    Err(TransportError::Exhausted {
        attempts: policy.max_retries + 1,
        last_error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_retryable_statuses() {
        for code in [408u16, 425, 429, 500, 502, 503, 599] {
            assert!(
                is_retryable_status(StatusCode::from_u16(code).unwrap()),
                "{code} should be retryable"
            );
        }
        for code in [400u16, 401, 403, 404, 409, 415] {
            assert!(
                !is_retryable_status(StatusCode::from_u16(code).unwrap()),
                "{code} should not be retryable"
            );
        }
    }

    #[test]
    fn test_backoff_doubles_with_jitter() {
        let policy = RetryPolicy {
            max_retries: 5,
            backoff_base: Duration::from_millis(200),
        };
        for attempt in 1..=4u32 {
            let expected = 200u64 * (1 << (attempt - 1));
            let lo = Duration::from_millis((expected as f64 * 0.85) as u64);
            let hi = Duration::from_millis((expected as f64 * 1.15) as u64 + 1);
            for _ in 0..16 {
                let delay = policy.backoff_delay(attempt, None);
                assert!(delay >= lo && delay <= hi, "attempt {attempt}: {delay:?}");
            }
        }
    }

    #[test]
    fn test_backoff_exponent_and_total_cap() {
        let policy = RetryPolicy {
            max_retries: 20,
            backoff_base: Duration::from_secs(2),
        };
        // 2s * 2^6 = 128s, which must clamp to 30s regardless of jitter.
        assert_eq!(policy.backoff_delay(40, None), MAX_BACKOFF);
    }

    #[test]
    fn test_retry_after_hint_wins_and_clamps() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.backoff_delay(1, Some(Duration::from_secs(7))),
            Duration::from_secs(7)
        );
        assert_eq!(
            policy.backoff_delay(1, Some(Duration::from_secs(120))),
            MAX_BACKOFF
        );
    }

    #[test]
    fn test_parse_retry_after_delta_seconds() {
        let now = Utc::now();
        assert_eq!(parse_retry_after("12", now), Some(Duration::from_secs(12)));
    }

    #[test]
    fn test_parse_retry_after_http_date() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let future = "Fri, 01 Mar 2024 12:00:10 GMT";
        assert_eq!(
            parse_retry_after(future, now),
            Some(Duration::from_secs(10))
        );
    }

    #[test]
    fn test_parse_retry_after_past_date_is_zero() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let past = "Fri, 01 Mar 2024 11:00:00 GMT";
        assert_eq!(parse_retry_after(past, now), Some(Duration::ZERO));
    }

    #[test]
    fn test_parse_retry_after_garbage() {
        assert_eq!(parse_retry_after("soon", Utc::now()), None);
    }
}
