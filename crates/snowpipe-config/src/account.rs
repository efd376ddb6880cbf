//! Account identity and base URL derivation

use serde::Deserialize;
use url::Url;

use crate::error::{ConfigError, Result};

/// Service domain suffix for derived account hosts
const ACCOUNT_DOMAIN: &str = "snowflakecomputing.com";

/// Target account coordinates
///
/// The account identifier is `{organization}-{account}`; the account base
/// URL is derived from it unless an explicit `base_url` override is given
/// (useful for diagnostic environments and tests).
#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
    /// Organization name (left half of the account identifier)
    pub organization: String,

    /// Account name (right half of the account identifier)
    pub account: String,

    /// Explicit base URL override; derived from the account id when absent
    #[serde(default)]
    pub base_url: Option<String>,
}

impl AccountConfig {
    /// Create an account config from organization and account names
    pub fn new(organization: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            organization: organization.into(),
            account: account.into(),
            base_url: None,
        }
    }

    /// Override the derived base URL
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// The combined account identifier, `{organization}-{account}`
    pub fn account_id(&self) -> String {
        format!("{}-{}", self.organization, self.account)
    }

    /// The account base URL
    ///
    /// # Errors
    ///
    /// Returns error if the override (or the derived URL) is not a valid URL.
    pub fn base_url(&self) -> Result<Url> {
        let raw = match &self.base_url {
            Some(url) => url.clone(),
            None => format!("https://{}.{}", self.account_id(), ACCOUNT_DOMAIN),
        };
        Url::parse(&raw).map_err(|e| ConfigError::InvalidUrl {
            field: "account.base_url",
            url: raw,
            message: e.to_string(),
        })
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.organization.is_empty() || self.account.is_empty() {
            return Err(ConfigError::MissingField {
                section: "account",
                field: if self.organization.is_empty() {
                    "organization"
                } else {
                    "account"
                },
            });
        }
        self.base_url().map(|_| ())
    }
}
