//! Snowpipe authentication
//!
//! Key-pair authentication for the streaming ingest service: RSA key
//! material with SPKI fingerprinting, RS256 bootstrap JWTs, and the auth
//! provider that discovers the ingest host and exchanges the JWT for an
//! OAuth access token.
//!
//! One [`AuthProvider`] is shared per process; it implements the
//! transport's `RequestAuth` seam so every non-bootstrap request is
//! stamped with the current access token.

mod claims;
mod error;
mod keypair;
mod provider;

#[cfg(test)]
mod provider_test;
#[cfg(test)]
mod test_keys;

pub use claims::{qualified_account, KeypairClaims, JWT_LIFETIME_SECS};
pub use error::{AuthError, KeyError, Result};
pub use keypair::RsaKeyMaterial;
pub use provider::{AuthProvider, TOKEN_TYPE_HEADER, TOKEN_TYPE_KEYPAIR_JWT};
