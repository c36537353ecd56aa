//! Client assertion: the ES256 JWT Apple accepts in place of a client secret.

use crate::config::APPLE_AUDIENCE;
use crate::error::{AppleError, AppleResult};
use crate::keys::PrivateKeyMaterial;
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde::{Deserialize, Serialize};

/// Lifetime of a client assertion in seconds
pub const CLIENT_ASSERTION_TTL_SECONDS: i64 = 600;

/// Everything needed to sign a client assertion.
#[derive(Debug, Clone)]
pub struct SigningIdentity {
    team_id: String,
    key_id: String,
    client_id: String,
    private_key: PrivateKeyMaterial,
}

impl SigningIdentity {
    /// # Errors
    ///
    /// [`AppleError::Configuration`] if any identifier is empty.
    pub fn new(
        team_id: impl Into<String>,
        key_id: impl Into<String>,
        client_id: impl Into<String>,
        private_key: PrivateKeyMaterial,
    ) -> AppleResult<Self> {
        let identity = Self {
            team_id: team_id.into(),
            key_id: key_id.into(),
            client_id: client_id.into(),
            private_key,
        };

        for (name, value) in [
            ("teamId", &identity.team_id),
            ("keyId", &identity.key_id),
            ("clientId", &identity.client_id),
        ] {
            if value.is_empty() {
                return Err(AppleError::Configuration(format!(
                    "signing identity requires a non-empty {}",
                    name
                )));
            }
        }

        Ok(identity)
    }

    pub fn team_id(&self) -> &str {
        &self.team_id
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn private_key(&self) -> &PrivateKeyMaterial {
        &self.private_key
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientAssertionClaims {
    pub iss: String,
    pub aud: String,
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

impl ClientAssertionClaims {
    pub fn new(identity: &SigningIdentity, now: DateTime<Utc>) -> Self {
        let iat = now.timestamp();
        Self {
            iss: identity.team_id.clone(),
            aud: APPLE_AUDIENCE.to_string(),
            sub: identity.client_id.clone(),
            iat,
            exp: iat + CLIENT_ASSERTION_TTL_SECONDS,
        }
    }
}

/// Produces the compact serialized client assertion.
///
/// Signing is a pure function of the identity and the timestamp, so one signer
/// can be shared by concurrent requests.
pub trait AssertionSigner: Send + Sync {
    /// # Errors
    ///
    /// [`AppleError::Signing`] when the private key cannot produce the
    /// signature. Retrying will not help.
    fn sign_client_assertion(
        &self,
        identity: &SigningIdentity,
        now: DateTime<Utc>,
    ) -> AppleResult<String>;
}

/// [`AssertionSigner`] backed by `jsonwebtoken`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Es256AssertionSigner;

impl AssertionSigner for Es256AssertionSigner {
    fn sign_client_assertion(
        &self,
        identity: &SigningIdentity,
        now: DateTime<Utc>,
    ) -> AppleResult<String> {
        let key = EncodingKey::from_ec_pem(identity.private_key.as_pem()).map_err(|e| {
            AppleError::Signing(format!("private key is not an EC key: {}", e))
        })?;

        let mut header = Header::new(Algorithm::ES256);
        header.kid = Some(identity.key_id.clone());

        let claims = ClientAssertionClaims::new(identity, now);

        // A P-384 or P-521 key parses as EC but is rejected here
        encode(&header, &claims, &key).map_err(|e| {
            AppleError::Signing(format!("ES256 requires a P-256 key: {}", e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{P256_PRIVATE_KEY, P256_PUBLIC_KEY, P384_PRIVATE_KEY, RSA_SIGNING_KEY};
    use chrono::TimeZone;
    use jsonwebtoken::{DecodingKey, Validation, decode, decode_header};

    fn identity(pem: &str) -> SigningIdentity {
        SigningIdentity::new(
            "mock.team.id",
            "mock.file.id",
            "mock.example",
            PrivateKeyMaterial::from_pem(pem).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_claims_window() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let claims = ClientAssertionClaims::new(&identity(P256_PRIVATE_KEY), now);

        assert_eq!(claims.iss, "mock.team.id");
        assert_eq!(claims.sub, "mock.example");
        assert_eq!(claims.aud, "https://appleid.apple.com");
        assert_eq!(claims.iat, now.timestamp());
        assert_eq!(claims.exp - claims.iat, 600);
    }

    #[test]
    fn test_signed_assertion_verifies_with_public_key() {
        let now = Utc::now();
        let token = Es256AssertionSigner
            .sign_client_assertion(&identity(P256_PRIVATE_KEY), now)
            .unwrap();

        assert_eq!(token.split('.').count(), 3);

        let header = decode_header(&token).unwrap();
        assert_eq!(header.alg, Algorithm::ES256);
        assert_eq!(header.kid.as_deref(), Some("mock.file.id"));

        let mut validation = Validation::new(Algorithm::ES256);
        validation.set_audience(&[APPLE_AUDIENCE]);
        validation.set_issuer(&["mock.team.id"]);
        let data = decode::<ClientAssertionClaims>(
            &token,
            &DecodingKey::from_ec_pem(P256_PUBLIC_KEY.as_bytes()).unwrap(),
            &validation,
        )
        .unwrap();

        assert_eq!(data.claims.sub, "mock.example");
        assert_eq!(data.claims.iat, now.timestamp());
        assert_eq!(data.claims.exp - data.claims.iat, 600);
    }

    #[test]
    fn test_each_call_carries_its_own_timestamp() {
        let signer = Es256AssertionSigner;
        let identity = identity(P256_PRIVATE_KEY);
        let earlier = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let later = earlier + chrono::Duration::seconds(30);

        let first = signer.sign_client_assertion(&identity, earlier).unwrap();
        let second = signer.sign_client_assertion(&identity, later).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_rsa_key_is_rejected() {
        let result =
            Es256AssertionSigner.sign_client_assertion(&identity(RSA_SIGNING_KEY), Utc::now());
        assert!(matches!(result, Err(AppleError::Signing(_))));
    }

    #[test]
    fn test_wrong_curve_is_rejected() {
        let result =
            Es256AssertionSigner.sign_client_assertion(&identity(P384_PRIVATE_KEY), Utc::now());
        assert!(matches!(result, Err(AppleError::Signing(_))));
    }

    #[test]
    fn test_signing_error_does_not_leak_key() {
        let err = Es256AssertionSigner
            .sign_client_assertion(&identity(RSA_SIGNING_KEY), Utc::now())
            .unwrap_err();
        assert!(!err.to_string().contains("PRIVATE KEY"));
    }

    #[test]
    fn test_identity_requires_all_fields() {
        let key = PrivateKeyMaterial::from_pem(P256_PRIVATE_KEY).unwrap();
        assert!(matches!(
            SigningIdentity::new("team", "key", "", key),
            Err(AppleError::Configuration(_))
        ));
    }
}
