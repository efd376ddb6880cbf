//! Snowpipe Configuration
//!
//! TOML-based configuration loading for the streaming ingest client.
//! Minimal config should just work - only specify what you need to change.
//!
//! # Example Minimal Config
//!
//! ```toml
//! [account]
//! organization = "myorg"
//! account = "myaccount"
//!
//! [credentials]
//! user = "INGEST_USER"
//! private_key_path = "/etc/keys/ingest_rsa.p8"
//! ```
//!
//! # Example Full Config
//!
//! ```toml
//! [account]
//! organization = "myorg"
//! account = "myaccount"
//!
//! [credentials]
//! user = "INGEST_USER"
//! private_key_path = "/etc/keys/ingest_rsa.p8"
//! private_key_passphrase = "hunter2"
//!
//! [client]
//! timeout_secs = 100
//! max_retries = 5
//! enable_gzip_on_append = true
//! gzip_level = "optimal"
//! ```

mod account;
mod credentials;
mod error;
mod options;

use std::fs;
use std::path::Path;
use std::str::FromStr;

pub use account::AccountConfig;
pub use credentials::CredentialsConfig;
pub use error::{ConfigError, Result};
pub use options::{ClientOptions, GzipLevel, DEFAULT_USER_AGENT};

use serde::Deserialize;

/// Main configuration structure
///
/// The `client` section is optional with sensible defaults; `account` and
/// `credentials` carry the identity of the ingesting principal.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Target account (organization + account name)
    pub account: AccountConfig,

    /// Key-pair credentials for the ingesting user
    pub credentials: CredentialsConfig,

    /// HTTP client tuning knobs
    #[serde(default)]
    pub client: ClientOptions,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or contains invalid TOML.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::IoError {
            path: path.display().to_string(),
            source: e,
        })?;
        contents.parse()
    }

    /// Validate cross-field constraints
    ///
    /// # Errors
    ///
    /// Returns error if the credentials carry neither an inline key nor a
    /// key path.
    pub fn validate(&self) -> Result<()> {
        self.credentials.validate()?;
        self.account.validate()
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        let config: Config = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [account]
        organization = "myorg"
        account = "myaccount"

        [credentials]
        user = "ingest_user"
        private_key_path = "/etc/keys/rsa.p8"
    "#;

    #[test]
    fn test_minimal_config_parses() {
        let config = Config::from_str(MINIMAL).unwrap();
        assert_eq!(config.account.account_id(), "myorg-myaccount");
        assert_eq!(config.credentials.user, "ingest_user");
        assert_eq!(config.client.max_retries, 5);
    }

    #[test]
    fn test_client_section_overrides() {
        let toml = format!("{MINIMAL}\n[client]\nmax_retries = 2\ntimeout_secs = 30");
        let config = Config::from_str(&toml).unwrap();
        assert_eq!(config.client.max_retries, 2);
        assert_eq!(config.client.timeout().as_secs(), 30);
    }

    #[test]
    fn test_missing_key_material_rejected() {
        let toml = r#"
            [account]
            organization = "o"
            account = "a"

            [credentials]
            user = "u"
        "#;
        assert!(Config::from_str(toml).is_err());
    }
}
