//! Sign in with Apple error types.

use thiserror::Error;

pub type AppleResult<T> = Result<T, AppleError>;

#[derive(Debug, Error)]
pub enum AppleError {
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Failed to load signing key: {0}")]
    KeyLoad(String),

    #[error("Failed to fetch Apple public keys: {0}")]
    KeyFetch(String),

    #[error("Failed to sign client assertion: {0}")]
    Signing(String),

    #[error("Malformed identity token: {0}")]
    MalformedToken(String),

    #[error("Identity token signature could not be verified: {0}")]
    InvalidSignature(String),

    #[error("Identity token expired")]
    TokenExpired,

    /// The token endpoint rejected the exchange.
    ///
    /// `body` carries the provider payload so callers can inspect it; it never
    /// contains the client assertion because Apple does not echo it back.
    #[error("Access denied by Apple: {reason} ({code})")]
    AccessDenied {
        reason: String,
        code: u16,
        body: serde_json::Value,
    },

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Invalid token response: {0}")]
    InvalidTokenResponse(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("URL parsing error: {0}")]
    Url(#[from] url::ParseError),
}

impl AppleError {
    /// Whether repeating the whole operation could succeed.
    ///
    /// Nothing in this crate retries on its own; this is a hint for callers.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppleError::KeyFetch(_) | AppleError::Http(_) => true,
            AppleError::AccessDenied { code, .. } => *code >= 500,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_denied_display() {
        let err = AppleError::AccessDenied {
            reason: "invalid_client".to_string(),
            code: 400,
            body: serde_json::json!({"error": "invalid_client"}),
        };
        assert_eq!(err.to_string(), "Access denied by Apple: invalid_client (400)");
    }

    #[test]
    fn test_retryable_classification() {
        assert!(AppleError::KeyFetch("timeout".to_string()).is_retryable());
        assert!(
            AppleError::AccessDenied {
                reason: "server_error".to_string(),
                code: 503,
                body: serde_json::Value::Null,
            }
            .is_retryable()
        );
        assert!(
            !AppleError::AccessDenied {
                reason: "invalid_grant".to_string(),
                code: 400,
                body: serde_json::Value::Null,
            }
            .is_retryable()
        );
        assert!(!AppleError::Signing("bad key".to_string()).is_retryable());
        assert!(!AppleError::InvalidSignature("no key".to_string()).is_retryable());
        assert!(!AppleError::Configuration("teamId".to_string()).is_retryable());
    }
}
