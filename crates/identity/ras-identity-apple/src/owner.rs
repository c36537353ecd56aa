//! The signed-in Apple user.
//!
//! Apple has no user info endpoint. The profile (`name`, `email`) is posted
//! once, on the first authorization, as the JSON encoded `user` form field of
//! the redirect. That profile is client supplied and untrusted, so a verified
//! email from the identity token always replaces it.

use crate::token::AppleAccessToken;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppleResourceOwner {
    id: Option<String>,
    is_private_email: Option<bool>,
    response: Map<String, Value>,
}

impl AppleResourceOwner {
    /// Merge the redirect profile with what the verified token says.
    pub fn new(mut response: Map<String, Value>, token: &AppleAccessToken) -> Self {
        let email = token
            .email
            .clone()
            .map(Value::String)
            .or_else(|| response.get("email").filter(|e| e.is_string()).cloned())
            .unwrap_or(Value::Null);
        response.insert("email".to_string(), email);

        Self {
            id: token.resource_owner_id.clone(),
            is_private_email: token.is_private_email,
            response,
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn first_name(&self) -> Option<&str> {
        self.name_part("firstName")
    }

    pub fn last_name(&self) -> Option<&str> {
        self.name_part("lastName")
    }

    /// First and last name joined, when Apple sent either
    pub fn display_name(&self) -> Option<String> {
        let name = [self.first_name(), self.last_name()]
            .into_iter()
            .flatten()
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        (!name.is_empty()).then_some(name)
    }

    pub fn email(&self) -> Option<&str> {
        self.response.get("email").and_then(Value::as_str)
    }

    /// `false` when Apple did not say
    pub fn is_private_email(&self) -> bool {
        self.is_private_email.unwrap_or(false)
    }

    /// Top-level profile field
    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.response.get(key)
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.response.clone())
    }

    fn name_part(&self, part: &str) -> Option<&str> {
        self.response
            .get("name")
            .and_then(|name| name.get(part))
            .and_then(Value::as_str)
    }
}

/// Read the `user` profile the authorization redirect carried.
///
/// The form body is preferred over the query string. An absent or empty
/// field gives an empty object, as does anything that is not a JSON object.
pub fn fetch_resource_owner_details(
    query: &HashMap<String, String>,
    form: &HashMap<String, String>,
) -> Map<String, Value> {
    let raw = form
        .get("user")
        .or_else(|| query.get("user"))
        .map(|user| user.trim())
        .unwrap_or_default();

    if raw.is_empty() {
        return Map::new();
    }

    match serde_json::from_str(raw) {
        Ok(Value::Object(profile)) => profile,
        Ok(_) => {
            warn!("Ignoring user profile that is not a JSON object");
            Map::new()
        }
        Err(e) => {
            warn!("Ignoring malformed user profile: {}", e);
            Map::new()
        }
    }
}
