//! Key-pair JWT claims
//!
//! The short-lived JWT presented to the bootstrap endpoints. Subject and
//! issuer are derived from the account identifier and user name; the
//! issuer additionally carries the public-key fingerprint.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, Header};
use serde::Serialize;
use url::Url;

use crate::error::Result;
use crate::keypair::RsaKeyMaterial;

/// `iat` is backdated to tolerate clock skew against the service
const ISSUED_AT_BACKDATE_SECS: i64 = 30;

/// JWT lifetime
pub const JWT_LIFETIME_SECS: i64 = 9 * 60;

/// Claims for the key-pair bootstrap JWT
#[derive(Debug, Clone, Serialize)]
pub struct KeypairClaims {
    /// `{ACCOUNT}.{USER}.{fingerprint}`
    pub iss: String,
    /// `{ACCOUNT}.{USER}`
    pub sub: String,
    /// Origin of the account base URL
    pub aud: String,
    /// Issued-at (Unix seconds, backdated 30 s)
    pub iat: i64,
    /// Expiry (Unix seconds, now + 9 min)
    pub exp: i64,
}

/// Uppercase an account identifier the way the service expects:
/// `.` becomes `-`, then the whole thing is uppercased
pub fn qualified_account(account_id: &str) -> String {
    account_id.replace('.', "-").to_uppercase()
}

impl KeypairClaims {
    /// Build claims for the given principal at `now`
    pub fn new(
        account_id: &str,
        user: &str,
        fingerprint: &str,
        account_base: &Url,
        now: DateTime<Utc>,
    ) -> Self {
        let account = qualified_account(account_id);
        let user = user.to_uppercase();
        let subject = format!("{account}.{user}");
        Self {
            iss: format!("{subject}.{fingerprint}"),
            sub: subject,
            aud: account_base.origin().ascii_serialization(),
            iat: (now - Duration::seconds(ISSUED_AT_BACKDATE_SECS)).timestamp(),
            exp: (now + Duration::seconds(JWT_LIFETIME_SECS)).timestamp(),
        }
    }

    /// Sign the claims with RS256, `kid` set to the key fingerprint
    pub fn sign(&self, key: &RsaKeyMaterial) -> Result<String> {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(key.fingerprint().to_string());
        Ok(jsonwebtoken::encode(&header, self, key.encoding_key())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_keys::{FINGERPRINT, PKCS1_PEM};
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    use chrono::TimeZone;

    fn claims_at(now: DateTime<Utc>) -> KeypairClaims {
        let base = Url::parse("https://myorg-acct.snowflakecomputing.com").unwrap();
        KeypairClaims::new("myorg-acct", "ingest_user", FINGERPRINT, &base, now)
    }

    #[test]
    fn test_qualified_account_replaces_dots() {
        assert_eq!(qualified_account("my.org-acct"), "MY-ORG-ACCT");
        assert_eq!(qualified_account("plain"), "PLAIN");
    }

    #[test]
    fn test_subject_and_issuer() {
        let claims = claims_at(Utc::now());
        assert_eq!(claims.sub, "MYORG-ACCT.INGEST_USER");
        assert_eq!(claims.iss, format!("MYORG-ACCT.INGEST_USER.{FINGERPRINT}"));
    }

    #[test]
    fn test_audience_is_origin() {
        let claims = claims_at(Utc::now());
        assert_eq!(claims.aud, "https://myorg-acct.snowflakecomputing.com");
    }

    #[test]
    fn test_issued_at_backdated_and_expiry() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let claims = claims_at(now);
        assert_eq!(claims.iat, now.timestamp() - 30);
        assert_eq!(claims.exp, now.timestamp() + 9 * 60);
    }

    #[test]
    fn test_signed_jwt_header_carries_kid() {
        let key = RsaKeyMaterial::from_pem(PKCS1_PEM, None).unwrap();
        let jwt = claims_at(Utc::now()).sign(&key).unwrap();

        let header_segment = jwt.split('.').next().unwrap();
        let header_json = URL_SAFE_NO_PAD.decode(header_segment).unwrap();
        let header: serde_json::Value = serde_json::from_slice(&header_json).unwrap();
        assert_eq!(header["alg"], "RS256");
        assert_eq!(header["typ"], "JWT");
        assert_eq!(header["kid"], FINGERPRINT);
    }
}
