//! Generic OAuth2 plumbing the Apple provider plugs into.

use crate::error::{AppleError, AppleResult};
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::{debug, error};
use url::Url;

/// Raw answer of a token endpoint.
#[derive(Debug, Clone)]
pub struct TokenEndpointResponse {
    pub status: StatusCode,
    /// Parsed JSON body, `Null` when the body was not JSON
    pub body: serde_json::Value,
}

/// HTTP client for the authorization and token endpoints
#[derive(Clone)]
pub struct OAuth2Client {
    http_client: Client,
}

impl OAuth2Client {
    /// # Errors
    ///
    /// [`AppleError::Configuration`] if the HTTP client cannot be built.
    pub fn new(http_timeout_seconds: u64) -> AppleResult<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(http_timeout_seconds))
            .build()
            .map_err(|e| {
                AppleError::Configuration(format!("failed to create HTTP client: {}", e))
            })?;

        Ok(Self { http_client })
    }

    pub fn http_client(&self) -> &Client {
        &self.http_client
    }

    /// Append `params` to `endpoint` as query parameters.
    pub fn authorization_url(
        &self,
        endpoint: &str,
        params: &[(String, String)],
    ) -> AppleResult<String> {
        let mut url = Url::parse(endpoint)?;
        url.query_pairs_mut().extend_pairs(params);
        Ok(url.to_string())
    }

    /// POST `form` to the token endpoint.
    ///
    /// Error statuses are returned, not raised, so the provider can map them.
    pub async fn request_token(
        &self,
        endpoint: &str,
        form: &[(&str, String)],
    ) -> AppleResult<TokenEndpointResponse> {
        let response = self
            .http_client
            .post(endpoint)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(form)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        let body = serde_json::from_str(&text).unwrap_or(serde_json::Value::Null);

        if status.is_success() {
            debug!("Token endpoint answered {}", status);
        } else {
            error!("Token exchange failed with status {}", status);
        }

        Ok(TokenEndpointResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_authorization_url_encodes_params() {
        let client = OAuth2Client::new(30).unwrap();
        let url = client
            .authorization_url(
                "https://appleid.apple.com/auth/authorize",
                &[
                    ("scope".to_string(), "name email".to_string()),
                    ("redirect_uri".to_string(), "https://example.com/cb?x=1".to_string()),
                ],
            )
            .unwrap();

        let url = Url::parse(&url).unwrap();
        assert_eq!(url.path(), "/auth/authorize");
        let params: HashMap<_, _> = url.query_pairs().collect();
        assert_eq!(params.get("scope"), Some(&"name email".into()));
        assert_eq!(
            params.get("redirect_uri"),
            Some(&"https://example.com/cb?x=1".into())
        );
    }

    #[test]
    fn test_authorization_url_rejects_bad_endpoint() {
        let client = OAuth2Client::new(30).unwrap();
        assert!(matches!(
            client.authorization_url("not a url", &[]),
            Err(AppleError::Url(_))
        ));
    }

    #[tokio::test]
    async fn test_request_token_keeps_error_bodies() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant"
            })))
            .mount(&server)
            .await;

        let client = OAuth2Client::new(30).unwrap();
        let response = client
            .request_token(
                &format!("{}/token", server.uri()),
                &[("grant_type", "authorization_code".to_string())],
            )
            .await
            .unwrap();

        assert_eq!(response.status, StatusCode::BAD_REQUEST);
        assert_eq!(response.body["error"], "invalid_grant");
    }

    #[tokio::test]
    async fn test_request_token_non_json_body_is_null() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(502).set_body_string("Bad Gateway"))
            .mount(&server)
            .await;

        let client = OAuth2Client::new(30).unwrap();
        let response = client
            .request_token(&format!("{}/token", server.uri()), &[])
            .await
            .unwrap();

        assert_eq!(response.status, StatusCode::BAD_GATEWAY);
        assert!(response.body.is_null());
    }
}
