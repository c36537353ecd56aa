//! Verification of the RS256 identity tokens Apple returns from the token endpoint.
//!
//! The token header is treated as untrusted input. `kid` only orders the
//! candidate keys and `alg` is ignored: every candidate is checked with RS256,
//! the first key that verifies wins, and the failure of the last candidate is
//! reported when none does.

use crate::error::{AppleError, AppleResult};
use crate::keys::{KeySource, RemoteKey, RemoteKeySet};
use async_trait::async_trait;
use base64::Engine;
use base64::alphabet::URL_SAFE;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use chrono::{DateTime, Utc};
use jsonwebtoken::Algorithm;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

/// base64url that tolerates producers which keep the `=` padding
const SEGMENT_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Claims taken from a verified identity token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityTokenClaims {
    pub subject: String,
    /// Only set when Apple marked the address as verified
    pub email: Option<String>,
    pub email_verified: bool,
    pub is_private_email: Option<bool>,
    pub issuer: Option<String>,
    pub audience: Option<String>,
    pub issued_at: Option<i64>,
    pub expires_at: Option<i64>,
}

/// A compact serialized JWT split into its parts.
#[derive(Debug)]
struct CompactToken<'a> {
    kid: Option<String>,
    alg: Option<String>,
    payload: Map<String, Value>,
    signing_input: &'a str,
    signature: &'a str,
}

impl<'a> CompactToken<'a> {
    fn parse(token: &'a str) -> AppleResult<Self> {
        let segments: Vec<&str> = token.split('.').collect();
        let [header, payload, signature] = segments.as_slice() else {
            return Err(AppleError::MalformedToken(format!(
                "expected 3 segments, found {}",
                segments.len()
            )));
        };

        let header = decode_json_segment(header, "header")?;
        let payload = decode_json_segment(payload, "payload")?;
        SEGMENT_ENGINE
            .decode(signature)
            .map_err(|_| AppleError::MalformedToken("signature is not base64url".to_string()))?;

        let signing_input_len = token.len() - signature.len() - 1;

        Ok(Self {
            kid: header.get("kid").and_then(Value::as_str).map(String::from),
            alg: header.get("alg").and_then(Value::as_str).map(String::from),
            payload,
            signing_input: &token[..signing_input_len],
            signature: *signature,
        })
    }

    fn verify_with(&self, key: &RemoteKey) -> AppleResult<()> {
        let decoding_key = key.decoding_key()?;
        let signature = self.signature.trim_end_matches('=');

        match jsonwebtoken::crypto::verify(
            signature,
            self.signing_input.as_bytes(),
            &decoding_key,
            Algorithm::RS256,
        ) {
            Ok(true) => Ok(()),
            Ok(false) => Err(AppleError::InvalidSignature(format!(
                "signature does not match key {}",
                key.kid
            ))),
            Err(e) => Err(AppleError::InvalidSignature(format!(
                "key {} rejected the signature: {}",
                key.kid, e
            ))),
        }
    }
}

fn decode_json_segment(segment: &str, name: &str) -> AppleResult<Map<String, Value>> {
    let bytes = SEGMENT_ENGINE
        .decode(segment)
        .map_err(|_| AppleError::MalformedToken(format!("{} is not base64url", name)))?;

    match serde_json::from_slice(&bytes) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(AppleError::MalformedToken(format!(
            "{} is not a JSON object",
            name
        ))),
        Err(_) => Err(AppleError::MalformedToken(format!("{} is not valid JSON", name))),
    }
}

/// Apple encodes some booleans as `"true"`/`"false"` strings.
pub(crate) fn as_flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(flag) => Some(*flag),
        Value::String(s) if s.eq_ignore_ascii_case("true") => Some(true),
        Value::String(s) if s.eq_ignore_ascii_case("false") => Some(false),
        Value::Number(n) => n.as_i64().map(|n| n != 0),
        _ => None,
    }
}

/// NumericDate; fractional seconds are truncated.
pub(crate) fn as_seconds(value: &Value) -> Option<i64> {
    let Value::Number(n) = value else {
        return None;
    };
    n.as_i64().or_else(|| {
        n.as_f64()
            .filter(|secs| secs.is_finite())
            .map(|secs| secs.trunc() as i64)
    })
}

#[async_trait]
pub trait IdentityTokenVerifier: Send + Sync {
    /// Verify `id_token` against the keys published by `key_source` and
    /// return its trusted claims.
    ///
    /// # Errors
    ///
    /// [`AppleError::MalformedToken`] for structural problems (checked before
    /// any key is fetched), [`AppleError::KeyFetch`] from the key source,
    /// [`AppleError::InvalidSignature`] when no candidate key verifies and
    /// [`AppleError::TokenExpired`] for a verified but stale token.
    async fn verify_and_decode(
        &self,
        id_token: &str,
        key_source: &dyn KeySource,
    ) -> AppleResult<IdentityTokenClaims>;
}

/// [`IdentityTokenVerifier`] that always verifies with RS256.
#[derive(Debug, Clone)]
pub struct Rs256IdentityTokenVerifier {
    leeway_seconds: i64,
}

impl Default for Rs256IdentityTokenVerifier {
    fn default() -> Self {
        Self::new(60)
    }
}

impl Rs256IdentityTokenVerifier {
    pub fn new(leeway_seconds: u64) -> Self {
        Self {
            leeway_seconds: leeway_seconds as i64,
        }
    }

    /// Verify against an already fetched key set at time `now`.
    pub fn verify_with_key_set(
        &self,
        id_token: &str,
        key_set: &RemoteKeySet,
        now: DateTime<Utc>,
    ) -> AppleResult<IdentityTokenClaims> {
        let token = CompactToken::parse(id_token)?;
        self.verify_parsed(&token, key_set, now)
    }

    fn verify_parsed(
        &self,
        token: &CompactToken<'_>,
        key_set: &RemoteKeySet,
        now: DateTime<Utc>,
    ) -> AppleResult<IdentityTokenClaims> {
        if let Some(alg) = token.alg.as_deref().filter(|alg| *alg != "RS256") {
            debug!("Identity token header declares {}, verifying as RS256", alg);
        }

        let candidates = key_set.candidates(token.kid.as_deref());
        let mut last_failure = AppleError::InvalidSignature(
            "key set contains no RSA keys".to_string(),
        );
        let mut verified_by = None;

        for key in candidates {
            match token.verify_with(key) {
                Ok(()) => {
                    verified_by = Some(key);
                    break;
                }
                Err(e) => {
                    debug!("Key {} did not verify identity token: {}", key.kid, e);
                    last_failure = e;
                }
            }
        }

        let Some(key) = verified_by else {
            return Err(last_failure);
        };

        let claims = self.extract_claims(&token.payload, now)?;
        debug!(
            "Verified identity token for subject {} with key {}",
            claims.subject, key.kid
        );
        Ok(claims)
    }

    fn extract_claims(
        &self,
        payload: &Map<String, Value>,
        now: DateTime<Utc>,
    ) -> AppleResult<IdentityTokenClaims> {
        let subject = payload
            .get("sub")
            .and_then(Value::as_str)
            .filter(|sub| !sub.is_empty())
            .ok_or_else(|| AppleError::MalformedToken("missing sub claim".to_string()))?
            .to_string();

        let now = now.timestamp();
        let expires_at = payload.get("exp").and_then(as_seconds);
        if expires_at.is_some_and(|exp| now - self.leeway_seconds >= exp) {
            return Err(AppleError::TokenExpired);
        }

        let issued_at = payload.get("iat").and_then(as_seconds);
        let not_before = payload.get("nbf").and_then(as_seconds);
        if [issued_at, not_before]
            .into_iter()
            .flatten()
            .any(|t| t > now + self.leeway_seconds)
        {
            return Err(AppleError::MalformedToken(
                "token is not valid yet".to_string(),
            ));
        }

        let email_verified = payload
            .get("email_verified")
            .and_then(as_flag)
            .unwrap_or(false);
        let email = if email_verified {
            payload.get("email").and_then(Value::as_str).map(String::from)
        } else {
            None
        };

        let audience = match payload.get("aud") {
            Some(Value::String(aud)) => Some(aud.clone()),
            Some(Value::Array(auds)) => auds.first().and_then(Value::as_str).map(String::from),
            _ => None,
        };

        Ok(IdentityTokenClaims {
            subject,
            email,
            email_verified,
            is_private_email: payload.get("is_private_email").and_then(as_flag),
            issuer: payload.get("iss").and_then(Value::as_str).map(String::from),
            audience,
            issued_at,
            expires_at,
        })
    }
}

#[async_trait]
impl IdentityTokenVerifier for Rs256IdentityTokenVerifier {
    async fn verify_and_decode(
        &self,
        id_token: &str,
        key_source: &dyn KeySource,
    ) -> AppleResult<IdentityTokenClaims> {
        let token = CompactToken::parse(id_token)?;
        let now = Utc::now();

        let key_set = key_source.fetch_remote_keys().await?;
        match token.kid.as_deref() {
            Some(kid) if key_set.find(kid).is_none() => {
                debug!("Key {} is not in the current key set, refreshing", kid);
            }
            _ => match self.verify_parsed(&token, &key_set, now) {
                Err(AppleError::InvalidSignature(reason)) => {
                    debug!("No current key verified identity token ({}), refreshing", reason);
                }
                result => return result,
            },
        }

        // Apple may have rotated its keys since the set was fetched
        let key_set = key_source.refresh_remote_keys().await?;
        self.verify_parsed(&token, &key_set, now)
    }
}
