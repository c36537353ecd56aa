//! Sign in with Apple identity provider.
//!
//! Apple does not issue static client secrets. Each token request is
//! authenticated with a short-lived ES256 JWT signed by the developer's private
//! key, and the `id_token` Apple returns is an RS256 JWT that must be checked
//! against the keys Apple publishes at `https://appleid.apple.com/auth/keys`.
//! This crate handles both and leaves the rest of the OAuth2 flow to a thin
//! HTTP client.

mod assertion;
mod client;
mod config;
mod error;
mod id_token;
mod keys;
mod owner;
mod provider;
mod token;
mod types;

#[cfg(test)]
mod test_support;

pub use assertion::{
    AssertionSigner, CLIENT_ASSERTION_TTL_SECONDS, ClientAssertionClaims, Es256AssertionSigner,
    SigningIdentity,
};
pub use client::{OAuth2Client, TokenEndpointResponse};
pub use config::{
    APPLE_AUDIENCE, APPLE_AUTHORIZATION_ENDPOINT, APPLE_KEYS_ENDPOINT, APPLE_TOKEN_ENDPOINT,
    AppleConfig,
};
pub use error::{AppleError, AppleResult};
pub use id_token::{IdentityTokenClaims, IdentityTokenVerifier, Rs256IdentityTokenVerifier};
pub use keys::{
    CachingKeySource, HttpKeySource, KeySource, PrivateKeyMaterial, RemoteKey, RemoteKeySet,
    StaticKeySource, load_local_signing_key,
};
pub use owner::{AppleResourceOwner, fetch_resource_owner_details};
pub use provider::{APPLE_PROVIDER_ID, AppleProvider};
pub use token::AppleAccessToken;
pub use types::{AppleAuthPayload, AuthorizationOptions, AuthorizationRequest, Grant};
