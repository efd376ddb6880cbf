//! Auth provider
//!
//! Owns the short-lived key-pair JWT, the service-issued OAuth access
//! token, and the discovered ingest host. Refresh is on demand with a
//! one-minute skew and runs under a write lock so concurrent callers
//! observe exactly one refresh; a fresh session becomes visible
//! atomically when the lock drops.

use chrono::{DateTime, Duration, Utc};
use reqwest::header::ACCEPT;
use snowpipe_config::{AccountConfig, ClientOptions, CredentialsConfig};
use snowpipe_transport::retry::{send_with_retry, RetryPolicy};
use snowpipe_transport::{
    build_http_client, RequestAuth, TransportError, HOSTNAME_PATH, OAUTH_TOKEN_PATH,
};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;

use crate::claims::KeypairClaims;
use crate::error::{AuthError, Result};
use crate::keypair::RsaKeyMaterial;

/// Header naming the token type on bootstrap calls
pub const TOKEN_TYPE_HEADER: &str = "X-Snowflake-Authorization-Token-Type";

/// Token type for key-pair JWTs
pub const TOKEN_TYPE_KEYPAIR_JWT: &str = "KEYPAIR_JWT";

/// OAuth grant type for the JWT-bearer exchange
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Tokens are refreshed this long before they would expire
const EXPIRY_SKEW_SECS: i64 = 60;

/// Access-token lifetime assumed when the service does not say
const DEFAULT_ACCESS_TOKEN_TTL_SECS: i64 = 3600;

/// Bootstrap error bodies are truncated to this many characters
const BODY_SNIPPET_CHARS: usize = 200;

#[derive(Debug, Clone)]
struct Token {
    value: String,
    expires_at: DateTime<Utc>,
}

impl Token {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - Duration::seconds(EXPIRY_SKEW_SECS) > now
    }
}

#[derive(Debug, Default)]
struct Session {
    jwt: Option<Token>,
    access: Option<Token>,
    ingest_base: Option<Url>,
}

impl Session {
    fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.ingest_base.is_some()
            && self.access.as_ref().map(|t| t.is_fresh(now)).unwrap_or(false)
    }
}

/// Process-wide auth provider
///
/// One instance is shared by everything talking to the service; its
/// session is refreshed on demand.
pub struct AuthProvider {
    account_base: Url,
    account_id: String,
    user: String,
    key: RsaKeyMaterial,
    http: reqwest::Client,
    policy: RetryPolicy,
    session: RwLock<Session>,
}

impl std::fmt::Debug for AuthProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthProvider")
            .field("account_id", &self.account_id)
            .field("user", &self.user)
            .field("fingerprint", &self.key.fingerprint())
            .finish()
    }
}

impl AuthProvider {
    /// Create a provider from config records
    ///
    /// Parses the private key eagerly so key problems surface at startup,
    /// not at first flush.
    pub fn new(
        account: &AccountConfig,
        credentials: &CredentialsConfig,
        options: &ClientOptions,
    ) -> Result<Self> {
        let key = RsaKeyMaterial::from_credentials(credentials)?;
        let account_base = account.base_url()?;
        let http = build_http_client(options)?;
        info!(
            account_id = %account.account_id(),
            user = %credentials.user,
            fingerprint = %key.fingerprint(),
            "auth provider initialized"
        );
        Ok(Self {
            account_base,
            account_id: account.account_id(),
            user: credentials.user.clone(),
            key,
            http,
            policy: RetryPolicy::from_options(options),
            session: RwLock::new(Session::default()),
        })
    }

    /// The account base URL bootstrap calls resolve against
    pub fn account_base(&self) -> &Url {
        &self.account_base
    }

    /// The public-key fingerprint
    pub fn fingerprint(&self) -> &str {
        self.key.fingerprint()
    }

    /// Whether the session can stamp requests without refreshing
    pub async fn is_ready(&self) -> bool {
        self.session.read().await.is_ready(Utc::now())
    }

    /// The discovered ingest base URL
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::NotDiscovered`] before the first successful
    /// `ensure_ready`.
    pub async fn ingest_base_uri(&self) -> Result<Url> {
        self.session
            .read()
            .await
            .ingest_base
            .clone()
            .ok_or(AuthError::NotDiscovered)
    }

    /// Refresh the session if the access token is missing, expires within
    /// the skew, or the ingest host is unknown
    ///
    /// Idempotent and re-entrant-safe: concurrent callers serialize on the
    /// session write lock and the loser re-checks before doing any work.
    pub async fn ensure_ready(&self, cancel: &CancellationToken) -> Result<()> {
        {
            let session = self.session.read().await;
            if session.is_ready(Utc::now()) {
                return Ok(());
            }
        }

        let mut session = self.session.write().await;
        if session.is_ready(Utc::now()) {
            return Ok(());
        }
        self.refresh(&mut session, cancel).await
    }

    /// Ensure readiness and return the current access token
    pub async fn access_token(&self, cancel: &CancellationToken) -> Result<String> {
        self.ensure_ready(cancel).await?;
        let session = self.session.read().await;
        session
            .access
            .as_ref()
            .map(|t| t.value.clone())
            .ok_or(AuthError::NotDiscovered)
    }

    async fn refresh(&self, session: &mut Session, cancel: &CancellationToken) -> Result<()> {
        let now = Utc::now();

        let jwt = match &session.jwt {
            Some(token) if token.is_fresh(now) => token.clone(),
            _ => {
                let claims = KeypairClaims::new(
                    &self.account_id,
                    &self.user,
                    self.key.fingerprint(),
                    &self.account_base,
                    now,
                );
                let token = Token {
                    value: claims.sign(&self.key)?,
                    expires_at: DateTime::from_timestamp(claims.exp, 0).unwrap_or(now),
                };
                session.jwt = Some(token.clone());
                token
            }
        };

        let ingest_base = match &session.ingest_base {
            Some(url) => url.clone(),
            None => {
                let url = self.discover_host(&jwt.value, cancel).await?;
                info!(ingest_base = %url, "discovered ingest host");
                session.ingest_base = Some(url.clone());
                url
            }
        };

        let access = self.exchange_token(&jwt.value, &ingest_base, cancel).await?;
        debug!(expires_at = %access.expires_at, "access token refreshed");
        session.access = Some(access);
        Ok(())
    }

    async fn discover_host(&self, jwt: &str, cancel: &CancellationToken) -> Result<Url> {
        let url = self
            .account_base
            .join(HOSTNAME_PATH)
            .map_err(|e| TransportError::InvalidUrl(e.to_string()))?;

        let response = send_with_retry(&self.policy, "hostname discovery", cancel, || {
            self.http
                .get(url.clone())
                .bearer_auth(jwt)
                .header(TOKEN_TYPE_HEADER, TOKEN_TYPE_KEYPAIR_JWT)
                .header(ACCEPT, "application/json")
        })
        .await
        .map_err(|e| bootstrap_error("host discovery", e))?;

        let body = response
            .text()
            .await
            .map_err(TransportError::Http)?;
        let host = parse_hostname_body(&body).ok_or_else(|| AuthError::Bootstrap {
            stage: "host discovery",
            detail: format!("unparseable body: {}", snippet(&body)),
        })?;
        host_to_url(&host)
    }

    async fn exchange_token(
        &self,
        jwt: &str,
        ingest_base: &Url,
        cancel: &CancellationToken,
    ) -> Result<Token> {
        let url = self
            .account_base
            .join(OAUTH_TOKEN_PATH)
            .map_err(|e| TransportError::InvalidUrl(e.to_string()))?;
        let scope = ingest_base.as_str().to_string();

        let response = send_with_retry(&self.policy, "token exchange", cancel, || {
            self.http
                .post(url.clone())
                .bearer_auth(jwt)
                .header(TOKEN_TYPE_HEADER, TOKEN_TYPE_KEYPAIR_JWT)
                .header(ACCEPT, "application/json")
                .form(&[("grant_type", JWT_BEARER_GRANT), ("scope", scope.as_str())])
        })
        .await
        .map_err(|e| bootstrap_error("token exchange", e))?;

        let body = response
            .text()
            .await
            .map_err(TransportError::Http)?;
        let (value, ttl_secs) = parse_token_body(&body).ok_or_else(|| AuthError::Bootstrap {
            stage: "token exchange",
            detail: format!("unparseable body: {}", snippet(&body)),
        })?;

        Ok(Token {
            value,
            expires_at: Utc::now() + Duration::seconds(ttl_secs),
        })
    }
}

fn bootstrap_error(stage: &'static str, error: TransportError) -> AuthError {
    match error {
        TransportError::Api(api) => AuthError::Bootstrap {
            stage,
            detail: format!("HTTP {}: {}", api.status, snippet(&api.body)),
        },
        TransportError::Cancelled => AuthError::Transport(TransportError::Cancelled),
        other => AuthError::Bootstrap {
            stage,
            detail: other.to_string(),
        },
    }
}

fn snippet(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() <= BODY_SNIPPET_CHARS {
        return trimmed.to_string();
    }
    trimmed.chars().take(BODY_SNIPPET_CHARS).collect::<String>() + "…"
}

/// Pull an ingest hostname out of a discovery response
///
/// Tolerates a JSON object (`ingestHostname`), a bare JSON string, or plain
/// text containing a service hostname.
fn parse_hostname_body(body: &str) -> Option<String> {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        match value {
            serde_json::Value::Object(map) => {
                if let Some(host) = map.get("ingestHostname").and_then(|v| v.as_str()) {
                    return Some(host.to_string());
                }
            }
            serde_json::Value::String(host) if !host.is_empty() => return Some(host),
            _ => {}
        }
    }
    body.split(|c: char| c.is_whitespace() || c == '"' || c == ',')
        .find(|token| token.contains("snowflakecomputing"))
        .map(str::to_string)
}

/// Pull an access token out of an exchange response
///
/// Tolerates JSON (`access_token` + optional `expires_in`), a form-encoded
/// body, or a bare JWT. Returns the token and its TTL in seconds.
fn parse_token_body(body: &str) -> Option<(String, i64)> {
    let body = body.trim();
    if body.is_empty() {
        return None;
    }

    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(token) = value.get("access_token").and_then(|v| v.as_str()) {
            let ttl = value
                .get("expires_in")
                .and_then(|v| v.as_i64().or_else(|| v.as_str()?.parse().ok()))
                .unwrap_or(DEFAULT_ACCESS_TOKEN_TTL_SECS);
            return Some((token.to_string(), ttl));
        }
        if let Some(token) = value.as_str() {
            return Some((token.to_string(), DEFAULT_ACCESS_TOKEN_TTL_SECS));
        }
    }

    if body.contains("access_token=") {
        let mut token = None;
        let mut ttl = DEFAULT_ACCESS_TOKEN_TTL_SECS;
        for (name, value) in url::form_urlencoded::parse(body.as_bytes()) {
            match name.as_ref() {
                "access_token" => token = Some(value.into_owned()),
                "expires_in" => ttl = value.parse().unwrap_or(DEFAULT_ACCESS_TOKEN_TTL_SECS),
                _ => {}
            }
        }
        return token.map(|t| (t, ttl));
    }

    // Bare JWT: three dot-separated segments, no whitespace.
    if body.split('.').count() == 3 && !body.contains(char::is_whitespace) {
        return Some((body.to_string(), DEFAULT_ACCESS_TOKEN_TTL_SECS));
    }

    None
}

/// Store a discovered host as a URL, defaulting the scheme to https
fn host_to_url(host: &str) -> Result<Url> {
    let raw = if host.contains("://") {
        host.to_string()
    } else {
        format!("https://{host}")
    };
    Url::parse(&raw).map_err(|e| AuthError::Bootstrap {
        stage: "host discovery",
        detail: format!("invalid ingest host '{host}': {e}"),
    })
}

#[async_trait::async_trait]
impl RequestAuth for AuthProvider {
    async fn ensure_ready(&self, cancel: &CancellationToken) -> snowpipe_transport::Result<()> {
        AuthProvider::ensure_ready(self, cancel)
            .await
            .map_err(into_transport_error)
    }

    async fn authorize(&self, cancel: &CancellationToken) -> snowpipe_transport::Result<String> {
        self.access_token(cancel).await.map_err(into_transport_error)
    }

    async fn ingest_base(&self) -> snowpipe_transport::Result<Url> {
        self.session
            .read()
            .await
            .ingest_base
            .clone()
            .ok_or_else(|| TransportError::Auth("ingest host not discovered".into()))
    }
}

fn into_transport_error(error: AuthError) -> TransportError {
    match error {
        AuthError::Transport(t) => t,
        other => TransportError::Auth(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hostname_json_object() {
        let host = parse_hostname_body(r#"{"ingestHostname":"acct.ingest.snowflakecomputing.com"}"#);
        assert_eq!(host.as_deref(), Some("acct.ingest.snowflakecomputing.com"));
    }

    #[test]
    fn test_parse_hostname_json_string() {
        let host = parse_hostname_body(r#""acct.ingest.example.com""#);
        assert_eq!(host.as_deref(), Some("acct.ingest.example.com"));
    }

    #[test]
    fn test_parse_hostname_plain_text() {
        let host = parse_hostname_body("hostname: acct.ingest.snowflakecomputing.com\n");
        assert_eq!(host.as_deref(), Some("acct.ingest.snowflakecomputing.com"));
    }

    #[test]
    fn test_parse_hostname_garbage() {
        assert_eq!(parse_hostname_body("<html>502</html>"), None);
    }

    #[test]
    fn test_parse_token_json() {
        let (token, ttl) =
            parse_token_body(r#"{"access_token":"tok-1","expires_in":600}"#).unwrap();
        assert_eq!(token, "tok-1");
        assert_eq!(ttl, 600);
    }

    #[test]
    fn test_parse_token_json_default_ttl() {
        let (_, ttl) = parse_token_body(r#"{"access_token":"tok-1"}"#).unwrap();
        assert_eq!(ttl, 3600);
    }

    #[test]
    fn test_parse_token_form_encoded() {
        let (token, ttl) = parse_token_body("access_token=tok-2&expires_in=120").unwrap();
        assert_eq!(token, "tok-2");
        assert_eq!(ttl, 120);
    }

    #[test]
    fn test_parse_token_bare_jwt() {
        let (token, ttl) = parse_token_body("aaa.bbb.ccc").unwrap();
        assert_eq!(token, "aaa.bbb.ccc");
        assert_eq!(ttl, 3600);
    }

    #[test]
    fn test_parse_token_garbage() {
        assert_eq!(parse_token_body("nope"), None);
        assert_eq!(parse_token_body(""), None);
    }

    #[test]
    fn test_host_to_url_prefixes_scheme() {
        assert_eq!(
            host_to_url("acct.ingest.example.com").unwrap().as_str(),
            "https://acct.ingest.example.com/"
        );
        assert_eq!(
            host_to_url("http://localhost:9000").unwrap().port(),
            Some(9000)
        );
    }

    #[test]
    fn test_snippet_truncates() {
        let long = "x".repeat(500);
        let short = snippet(&long);
        assert_eq!(short.chars().count(), 201);
        assert!(short.ends_with('…'));
    }

    #[test]
    fn test_token_freshness_skew() {
        let now = Utc::now();
        let fresh = Token {
            value: "t".into(),
            expires_at: now + Duration::seconds(120),
        };
        let stale = Token {
            value: "t".into(),
            expires_at: now + Duration::seconds(30),
        };
        assert!(fresh.is_fresh(now));
        // Expires within the 60 s skew: treated as stale.
        assert!(!stale.is_fresh(now));
    }
}
