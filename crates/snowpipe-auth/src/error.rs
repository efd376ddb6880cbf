//! Authentication error types

use thiserror::Error;

/// Result type for auth operations
pub type Result<T> = std::result::Result<T, AuthError>;

/// Errors that can occur while parsing key material
#[derive(Debug, Error)]
pub enum KeyError {
    /// Encrypted PKCS#8 key supplied without a passphrase
    #[error("encrypted private key requires a non-empty passphrase")]
    PassphraseRequired,

    /// PEM label matched none of the supported shapes
    #[error("unrecognized private key format (expected PKCS#1 or PKCS#8 PEM)")]
    UnrecognizedPem,

    /// Key bytes failed to parse (wrong passphrase included)
    #[error("failed to parse private key: {0}")]
    Parse(String),

    /// Key file could not be read
    #[error("failed to read private key file '{path}': {source}")]
    Io {
        /// Path to the key file
        path: String,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// Public-key extraction or re-encoding failed
    #[error("failed to encode key: {0}")]
    Encode(String),
}

/// Errors that can occur in the auth provider
#[derive(Debug, Error)]
pub enum AuthError {
    /// Key material problem
    #[error(transparent)]
    Key(#[from] KeyError),

    /// Account/credential configuration problem
    #[error(transparent)]
    Config(#[from] snowpipe_config::ConfigError),

    /// Transport-level failure during bootstrap
    #[error(transparent)]
    Transport(#[from] snowpipe_transport::TransportError),

    /// Bootstrap call returned an unusable response
    #[error("auth bootstrap failed during {stage}: {detail}")]
    Bootstrap {
        /// Which bootstrap call failed (`host discovery` or `token exchange`)
        stage: &'static str,
        /// Status and truncated body
        detail: String,
    },

    /// JWT signing failed
    #[error("failed to sign JWT: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    /// The ingest host has not been discovered yet
    #[error("ingest host not discovered (call ensure_ready first)")]
    NotDiscovered,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passphrase_required_display() {
        let err = AuthError::Key(KeyError::PassphraseRequired);
        assert!(err.to_string().contains("passphrase"));
    }

    #[test]
    fn test_bootstrap_display_names_stage() {
        let err = AuthError::Bootstrap {
            stage: "host discovery",
            detail: "HTTP 403: forbidden".into(),
        };
        assert!(err.to_string().contains("host discovery"));
        assert!(err.to_string().contains("403"));
    }
}
