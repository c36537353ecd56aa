//! Access token returned by Apple, enriched with identity token claims.

use crate::error::{AppleError, AppleResult};
use crate::id_token::{IdentityTokenClaims, as_flag, as_seconds};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppleAccessToken {
    pub access_token: String,
    pub token_type: Option<String>,
    pub expires_in: Option<i64>,
    /// Unix timestamp computed from `expires_in` when the token was received
    pub expires_at: Option<i64>,
    pub refresh_token: Option<String>,
    pub id_token: Option<String>,
    /// `sub` of the verified identity token
    pub resource_owner_id: Option<String>,
    /// Verified email from the identity token
    pub email: Option<String>,
    pub is_private_email: Option<bool>,
    /// Any other fields of the token response
    pub values: Map<String, Value>,
}

fn take_string(map: &mut Map<String, Value>, key: &str) -> Option<String> {
    match map.remove(key) {
        Some(Value::String(s)) if !s.is_empty() => Some(s),
        _ => None,
    }
}

fn take_i64(map: &mut Map<String, Value>, key: &str) -> Option<i64> {
    match map.remove(key)? {
        Value::String(s) => s.trim().parse().ok(),
        other => as_seconds(&other),
    }
}

impl AppleAccessToken {
    /// Build the token from a successful token response body.
    ///
    /// # Errors
    ///
    /// [`AppleError::InvalidTokenResponse`] when `access_token` is missing.
    pub fn from_values(mut values: Map<String, Value>, now: DateTime<Utc>) -> AppleResult<Self> {
        let access_token = take_string(&mut values, "access_token").ok_or_else(|| {
            AppleError::InvalidTokenResponse(
                "Required option not passed: \"access_token\"".to_string(),
            )
        })?;

        let expires_in = take_i64(&mut values, "expires_in");
        let is_private_email = values
            .remove("is_private_email")
            .and_then(|flag| as_flag(&flag));

        Ok(Self {
            access_token,
            token_type: take_string(&mut values, "token_type"),
            expires_in,
            expires_at: expires_in.map(|secs| now.timestamp() + secs),
            refresh_token: take_string(&mut values, "refresh_token"),
            id_token: take_string(&mut values, "id_token"),
            resource_owner_id: take_string(&mut values, "resource_owner_id"),
            email: take_string(&mut values, "email"),
            is_private_email,
            values,
        })
    }

    /// Merge the claims of the verified identity token.
    pub fn with_identity(mut self, claims: &IdentityTokenClaims) -> Self {
        self.resource_owner_id = Some(claims.subject.clone());
        if let Some(email) = &claims.email {
            self.email = Some(email.clone());
        }
        if claims.is_private_email.is_some() {
            self.is_private_email = claims.is_private_email;
        }
        self
    }

    pub fn has_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now.timestamp())
    }
}
