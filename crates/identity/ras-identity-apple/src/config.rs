//! Sign in with Apple configuration.

use crate::error::{AppleError, AppleResult};
use serde::{Deserialize, Serialize};

pub const APPLE_AUTHORIZATION_ENDPOINT: &str = "https://appleid.apple.com/auth/authorize";
pub const APPLE_TOKEN_ENDPOINT: &str = "https://appleid.apple.com/auth/token";
pub const APPLE_KEYS_ENDPOINT: &str = "https://appleid.apple.com/auth/keys";
/// Audience of every client assertion, also the issuer of Apple identity tokens.
pub const APPLE_AUDIENCE: &str = "https://appleid.apple.com";

/// Provider configuration.
///
/// `team_id`, `key_id` and `key_file_path` are mandatory. They are checked by
/// [`AppleConfig::validate`] without touching the filesystem, so a missing key
/// file only surfaces when a token is actually requested.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppleConfig {
    pub team_id: String,
    pub key_id: String,
    pub key_file_path: String,
    pub client_id: String,
    pub redirect_uri: String,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
    #[serde(default = "default_authorization_endpoint")]
    pub authorization_endpoint: String,
    #[serde(default = "default_token_endpoint")]
    pub token_endpoint: String,
    #[serde(default = "default_keys_endpoint")]
    pub keys_endpoint: String,
    #[serde(default = "default_http_timeout")]
    pub http_timeout_seconds: u64,
    /// Clock skew tolerated when checking identity token timestamps
    #[serde(default = "default_leeway")]
    pub token_leeway_seconds: u64,
    /// Cache the JWKS for this many seconds; fetched on every verification when unset
    #[serde(default)]
    pub jwks_cache_ttl_seconds: Option<u64>,
}

fn default_scopes() -> Vec<String> {
    vec!["name".to_string(), "email".to_string()]
}

fn default_authorization_endpoint() -> String {
    APPLE_AUTHORIZATION_ENDPOINT.to_string()
}

fn default_token_endpoint() -> String {
    APPLE_TOKEN_ENDPOINT.to_string()
}

fn default_keys_endpoint() -> String {
    APPLE_KEYS_ENDPOINT.to_string()
}

fn default_http_timeout() -> u64 {
    30
}

fn default_leeway() -> u64 {
    60
}

impl AppleConfig {
    pub fn new(
        team_id: impl Into<String>,
        key_id: impl Into<String>,
        key_file_path: impl Into<String>,
        client_id: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            team_id: team_id.into(),
            key_id: key_id.into(),
            key_file_path: key_file_path.into(),
            client_id: client_id.into(),
            redirect_uri: redirect_uri.into(),
            scopes: default_scopes(),
            authorization_endpoint: default_authorization_endpoint(),
            token_endpoint: default_token_endpoint(),
            keys_endpoint: default_keys_endpoint(),
            http_timeout_seconds: default_http_timeout(),
            token_leeway_seconds: default_leeway(),
            jwks_cache_ttl_seconds: None,
        }
    }

    /// Reads `APPLE_TEAM_ID`, `APPLE_KEY_ID`, `APPLE_KEY_FILE_PATH`,
    /// `APPLE_CLIENT_ID` and `APPLE_REDIRECT_URI`.
    ///
    /// Unset variables become empty strings; run [`AppleConfig::validate`] (or
    /// construct a provider) to reject them.
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).unwrap_or_default();
        Self::new(
            var("APPLE_TEAM_ID"),
            var("APPLE_KEY_ID"),
            var("APPLE_KEY_FILE_PATH"),
            var("APPLE_CLIENT_ID"),
            var("APPLE_REDIRECT_URI"),
        )
    }

    /// Check that the required options were passed.
    ///
    /// # Errors
    ///
    /// Returns [`AppleError::Configuration`] naming the first missing option.
    pub fn validate(&self) -> AppleResult<()> {
        for (name, value) in [
            ("teamId", &self.team_id),
            ("keyId", &self.key_id),
            ("keyFilePath", &self.key_file_path),
        ] {
            if value.trim().is_empty() {
                return Err(AppleError::Configuration(format!(
                    "Required option not passed: \"{}\"",
                    name
                )));
            }
        }
        Ok(())
    }

    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    pub fn with_endpoints(
        mut self,
        authorization_endpoint: impl Into<String>,
        token_endpoint: impl Into<String>,
        keys_endpoint: impl Into<String>,
    ) -> Self {
        self.authorization_endpoint = authorization_endpoint.into();
        self.token_endpoint = token_endpoint.into();
        self.keys_endpoint = keys_endpoint.into();
        self
    }

    pub fn with_http_timeout(mut self, seconds: u64) -> Self {
        self.http_timeout_seconds = seconds;
        self
    }

    pub fn with_token_leeway(mut self, seconds: u64) -> Self {
        self.token_leeway_seconds = seconds;
        self
    }

    pub fn with_jwks_cache_ttl(mut self, seconds: u64) -> Self {
        self.jwks_cache_ttl_seconds = Some(seconds);
        self
    }
}
