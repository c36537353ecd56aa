//! Sign in with Apple provider.

use crate::assertion::{AssertionSigner, Es256AssertionSigner, SigningIdentity};
use crate::client::{OAuth2Client, TokenEndpointResponse};
use crate::config::AppleConfig;
use crate::error::{AppleError, AppleResult};
use crate::id_token::{IdentityTokenVerifier, Rs256IdentityTokenVerifier};
use crate::keys::{CachingKeySource, HttpKeySource, KeySource, load_local_signing_key};
use crate::owner::{AppleResourceOwner, fetch_resource_owner_details};
use crate::token::AppleAccessToken;
use crate::types::{AppleAuthPayload, AuthorizationOptions, AuthorizationRequest, Grant};
use async_trait::async_trait;
use chrono::Utc;
use ras_identity_core::{IdentityError, IdentityProvider, IdentityResult, VerifiedIdentity};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// `provider_id` reported to session code
pub const APPLE_PROVIDER_ID: &str = "apple";

/// Apple joins scopes with a space
const SCOPE_SEPARATOR: &str = " ";

/// Scopes that make Apple post the profile back instead of using a query string
const FORM_POST_SCOPES: [&str; 2] = ["name", "email"];

/// OAuth2 provider for Sign in with Apple.
///
/// Every token request carries a freshly signed client assertion as
/// `client_secret`, and every `id_token` Apple returns is verified against
/// Apple's published keys before its claims are trusted.
#[derive(Clone)]
pub struct AppleProvider {
    config: AppleConfig,
    client: OAuth2Client,
    signer: Arc<dyn AssertionSigner>,
    verifier: Arc<dyn IdentityTokenVerifier>,
    key_source: Arc<dyn KeySource>,
}

impl AppleProvider {
    /// # Errors
    ///
    /// [`AppleError::Configuration`] when `team_id`, `key_id` or
    /// `key_file_path` is missing. The key file itself is not read here.
    pub fn new(config: AppleConfig) -> AppleResult<Self> {
        config.validate()?;
        let client = OAuth2Client::new(config.http_timeout_seconds)?;

        let http_keys = HttpKeySource::new(client.http_client().clone(), &config.keys_endpoint);
        let key_source: Arc<dyn KeySource> = match config.jwks_cache_ttl_seconds {
            Some(ttl) => Arc::new(CachingKeySource::new(http_keys, ttl)),
            None => Arc::new(http_keys),
        };
        let verifier = Arc::new(Rs256IdentityTokenVerifier::new(config.token_leeway_seconds));

        Ok(Self {
            config,
            client,
            signer: Arc::new(Es256AssertionSigner),
            verifier,
            key_source,
        })
    }

    /// Use a different signer, verifier or key source.
    pub fn with_components(
        config: AppleConfig,
        signer: Arc<dyn AssertionSigner>,
        verifier: Arc<dyn IdentityTokenVerifier>,
        key_source: Arc<dyn KeySource>,
    ) -> AppleResult<Self> {
        config.validate()?;
        let client = OAuth2Client::new(config.http_timeout_seconds)?;

        Ok(Self {
            config,
            client,
            signer,
            verifier,
            key_source,
        })
    }

    pub fn config(&self) -> &AppleConfig {
        &self.config
    }

    pub fn default_scopes(&self) -> &[String] {
        &self.config.scopes
    }

    /// Build the URL to redirect the user to.
    pub fn authorization_url(
        &self,
        options: AuthorizationOptions,
    ) -> AppleResult<AuthorizationRequest> {
        let state = options
            .state
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let params = self.authorization_parameters(&options, &state);
        let url = self
            .client
            .authorization_url(&self.config.authorization_endpoint, &params)?;

        debug!("Generated Apple authorization URL");
        Ok(AuthorizationRequest { url, state })
    }

    fn authorization_parameters(
        &self,
        options: &AuthorizationOptions,
        state: &str,
    ) -> Vec<(String, String)> {
        let scopes = options.scopes.as_deref().unwrap_or(&self.config.scopes);

        let mut params = vec![
            ("client_id".to_string(), self.config.client_id.clone()),
            ("redirect_uri".to_string(), self.config.redirect_uri.clone()),
            ("response_type".to_string(), "code".to_string()),
            ("state".to_string(), state.to_string()),
        ];
        if !scopes.is_empty() {
            params.push(("scope".to_string(), scopes.join(SCOPE_SEPARATOR)));
        }

        let caller_sets_mode = options
            .additional_params
            .iter()
            .any(|(key, _)| key == "response_mode");
        let wants_profile = scopes
            .iter()
            .any(|scope| FORM_POST_SCOPES.contains(&scope.as_str()));
        if wants_profile && !caller_sets_mode {
            params.push(("response_mode".to_string(), "form_post".to_string()));
        }

        params.extend(options.additional_params.iter().cloned());
        params
    }

    /// Load the private key and pair it with the configured identifiers.
    pub async fn signing_identity(&self) -> AppleResult<SigningIdentity> {
        let private_key = load_local_signing_key(&self.config.key_file_path).await?;
        SigningIdentity::new(
            &self.config.team_id,
            &self.config.key_id,
            &self.config.client_id,
            private_key,
        )
    }

    /// A client assertion valid for the next ten minutes.
    pub async fn client_secret(&self) -> AppleResult<String> {
        let identity = self.signing_identity().await?;
        self.signer.sign_client_assertion(&identity, Utc::now())
    }

    /// Exchange `grant` at the token endpoint.
    ///
    /// # Errors
    ///
    /// Key loading and signing errors are returned before any request is
    /// sent. A rejected exchange is [`AppleError::AccessDenied`]; identity
    /// token problems surface as the verifier reports them.
    pub async fn get_access_token(&self, grant: Grant) -> AppleResult<AppleAccessToken> {
        let client_secret = self.client_secret().await?;

        let mut form = grant.form_fields();
        form.push(("client_id", self.config.client_id.clone()));
        form.push(("client_secret", client_secret));
        if matches!(grant, Grant::AuthorizationCode { .. }) {
            form.push(("redirect_uri", self.config.redirect_uri.clone()));
        }

        let response = self
            .client
            .request_token(&self.config.token_endpoint, &form)
            .await?;
        self.check_response(&response)?;

        let token = self.create_access_token(response.body).await?;
        info!(
            "Successfully exchanged {} grant for Apple tokens",
            grant.grant_type()
        );
        Ok(token)
    }

    /// Turn an error status into [`AppleError::AccessDenied`].
    ///
    /// `error` and `code` from the body are preferred; the reason phrase and
    /// status code fill in for them.
    pub fn check_response(&self, response: &TokenEndpointResponse) -> AppleResult<()> {
        if response.status.as_u16() < 400 {
            return Ok(());
        }

        let reason = response
            .body
            .get("error")
            .and_then(Value::as_str)
            .filter(|error| !error.is_empty())
            .or_else(|| response.status.canonical_reason())
            .unwrap_or_default()
            .to_string();

        let code = match response.body.get("code") {
            Some(Value::Number(n)) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
            Some(Value::String(s)) => s.trim().parse().ok(),
            _ => None,
        }
        .filter(|code| *code != 0)
        .unwrap_or_else(|| response.status.as_u16());

        Err(AppleError::AccessDenied {
            reason,
            code,
            body: response.body.clone(),
        })
    }

    /// Build the access token, verifying the `id_token` when there is one.
    ///
    /// # Errors
    ///
    /// [`AppleError::MalformedToken`] when a refresh token arrives without an
    /// identity token.
    pub async fn create_access_token(&self, body: Value) -> AppleResult<AppleAccessToken> {
        let Value::Object(values) = body else {
            return Err(AppleError::InvalidTokenResponse(
                "expected a JSON object".to_string(),
            ));
        };

        let token = AppleAccessToken::from_values(values, Utc::now())?;

        let Some(id_token) = token.id_token.clone() else {
            if token.refresh_token.is_some() {
                return Err(AppleError::MalformedToken(
                    "Required option not passed: \"id_token\"".to_string(),
                ));
            }
            return Ok(token);
        };

        let claims = self
            .verifier
            .verify_and_decode(&id_token, self.key_source.as_ref())
            .await?;

        Ok(token.with_identity(&claims))
    }

    /// Apple offers no REST API for user details.
    pub fn resource_owner_details_url(&self, _token: &AppleAccessToken) -> AppleResult<String> {
        Err(AppleError::UnsupportedOperation(
            "No Apple ID REST API available yet!".to_string(),
        ))
    }

    pub fn create_resource_owner(
        &self,
        response: Map<String, Value>,
        token: &AppleAccessToken,
    ) -> AppleResourceOwner {
        AppleResourceOwner::new(response, token)
    }

    /// Combine the profile posted to the redirect with the verified token.
    pub fn get_resource_owner(
        &self,
        token: &AppleAccessToken,
        query: &HashMap<String, String>,
        form: &HashMap<String, String>,
    ) -> AppleResourceOwner {
        self.create_resource_owner(fetch_resource_owner_details(query, form), token)
    }
}

#[async_trait]
impl IdentityProvider for AppleProvider {
    fn provider_id(&self) -> &str {
        APPLE_PROVIDER_ID
    }

    async fn verify(&self, auth_payload: Value) -> IdentityResult<VerifiedIdentity> {
        let payload: AppleAuthPayload =
            serde_json::from_value(auth_payload).map_err(|_| IdentityError::InvalidPayload)?;
        if payload.code.trim().is_empty() {
            return Err(IdentityError::InvalidPayload);
        }

        let token = self
            .get_access_token(Grant::authorization_code(&payload.code))
            .await
            .map_err(|e| match e {
                AppleError::AccessDenied { .. } => IdentityError::InvalidCredentials,
                other => IdentityError::ProviderError(other.to_string()),
            })?;

        let owner = self.get_resource_owner(&token, &HashMap::new(), &payload.profile_form());
        let subject = owner.id().map(String::from).ok_or_else(|| {
            IdentityError::ProviderError("Apple returned no identity token".to_string())
        })?;

        let mut metadata = Map::new();
        metadata.insert(
            "is_private_email".to_string(),
            Value::Bool(owner.is_private_email()),
        );
        if let Some(name) = owner.attribute("name") {
            metadata.insert("name".to_string(), name.clone());
        }

        Ok(VerifiedIdentity {
            provider_id: self.provider_id().to_string(),
            subject,
            email: owner.email().map(String::from),
            display_name: owner.display_name(),
            metadata: Some(Value::Object(metadata)),
        })
    }
}
