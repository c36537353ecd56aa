//! Provider-neutral identity traits.
//!
//! Each identity crate turns its own sign-in flow into a [`VerifiedIdentity`]
//! behind [`IdentityProvider`], so session code can hold any of them as
//! `Box<dyn IdentityProvider>`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IdentityError {
    /// The provider refused the presented credentials
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Provider error: {0}")]
    ProviderError(String),

    #[error("Invalid authentication payload")]
    InvalidPayload,
}

pub type IdentityResult<T> = Result<T, IdentityError>;

/// Who signed in, as established by a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifiedIdentity {
    pub provider_id: String,
    /// Stable identifier within the provider
    pub subject: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    fn provider_id(&self) -> &str;

    /// Verify a provider specific payload.
    async fn verify(&self, auth_payload: serde_json::Value) -> IdentityResult<VerifiedIdentity>;
}
