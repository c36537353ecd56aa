//! OAuth2 protocol types used by the Apple provider.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Options for building the authorization redirect.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthorizationOptions {
    /// Scopes to request; the configured defaults when `None`
    pub scopes: Option<Vec<String>>,
    /// CSRF state; a random UUID when `None`
    pub state: Option<String>,
    /// Extra query parameters such as `nonce`
    pub additional_params: Vec<(String, String)>,
}

impl AuthorizationOptions {
    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = Some(scopes.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.additional_params.push((key.into(), value.into()));
        self
    }
}

/// Authorization URL together with the state the callback must echo back
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationRequest {
    pub url: String,
    pub state: String,
}

/// Grant presented to the token endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "grant_type", rename_all = "snake_case")]
pub enum Grant {
    AuthorizationCode { code: String },
    RefreshToken { refresh_token: String },
}

impl Grant {
    pub fn authorization_code(code: impl Into<String>) -> Self {
        Grant::AuthorizationCode { code: code.into() }
    }

    pub fn refresh_token(refresh_token: impl Into<String>) -> Self {
        Grant::RefreshToken {
            refresh_token: refresh_token.into(),
        }
    }

    pub fn grant_type(&self) -> &'static str {
        match self {
            Grant::AuthorizationCode { .. } => "authorization_code",
            Grant::RefreshToken { .. } => "refresh_token",
        }
    }

    /// Form fields identifying this grant
    pub(crate) fn form_fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![("grant_type", self.grant_type().to_string())];
        match self {
            Grant::AuthorizationCode { code } => fields.push(("code", code.clone())),
            Grant::RefreshToken { refresh_token } => {
                fields.push(("refresh_token", refresh_token.clone()))
            }
        }
        fields
    }
}

/// Callback data accepted by the `IdentityProvider` implementation.
///
/// `user` is the profile Apple posted to the redirect, either the raw JSON
/// string or an already parsed object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppleAuthPayload {
    pub code: String,
    #[serde(default)]
    pub user: Option<Value>,
}

impl AppleAuthPayload {
    /// The payload as the redirect's form body.
    pub(crate) fn profile_form(&self) -> HashMap<String, String> {
        let user = match &self.user {
            Some(Value::String(raw)) => raw.clone(),
            Some(Value::Null) | None => return HashMap::new(),
            Some(other) => other.to_string(),
        };
        HashMap::from([("user".to_string(), user)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grant_form_fields() {
        assert_eq!(
            Grant::authorization_code("abc").form_fields(),
            vec![
                ("grant_type", "authorization_code".to_string()),
                ("code", "abc".to_string())
            ]
        );
        assert_eq!(
            Grant::refresh_token("r1").form_fields(),
            vec![
                ("grant_type", "refresh_token".to_string()),
                ("refresh_token", "r1".to_string())
            ]
        );
    }

    #[test]
    fn test_grant_deserializes_from_tagged_json() {
        let grant: Grant =
            serde_json::from_str(r#"{"grant_type":"authorization_code","code":"hello-world"}"#)
                .unwrap();
        assert_eq!(grant, Grant::authorization_code("hello-world"));
    }

    #[test]
    fn test_auth_payload_accepts_raw_and_parsed_profile() {
        let raw: AppleAuthPayload = serde_json::from_value(serde_json::json!({
            "code": "hello-world",
            "user": "{\"name\":{\"firstName\":\"John\"}}"
        }))
        .unwrap();
        let parsed: AppleAuthPayload = serde_json::from_value(serde_json::json!({
            "code": "hello-world",
            "user": {"name": {"firstName": "John"}}
        }))
        .unwrap();

        assert_eq!(raw.profile_form(), parsed.profile_form());

        let bare: AppleAuthPayload =
            serde_json::from_value(serde_json::json!({"code": "hello-world"})).unwrap();
        assert!(bare.profile_form().is_empty());
    }
}
