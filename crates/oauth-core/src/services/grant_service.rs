use crate::config::Config;
use crate::error::ServiceError;
use crate::services::auth_code_service::AuthCodeService;
use crate::services::client_service::{ClientCredentials, ClientService};
use crate::services::token_service::{Introspection, TokenPair, TokenService, TokenTypeHint};
use crate::services::user_service::UserService;
use crate::utils::validation;
use async_trait::async_trait;
use oauth_models::{Client, ClientType};
use serde::Serialize;
use std::str::FromStr;
use std::sync::Arc;

/// Normalized `/token` request as the HTTP boundary hands it over
/// (form-encoded on the wire).
#[derive(Debug, Clone, Default)]
pub struct TokenRequest {
    pub grant_type: String,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub code_verifier: Option<String>,
    pub refresh_token: Option<String>,
    pub scope: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub client_assertion_type: Option<String>,
    pub client_assertion: Option<String>,
}

/// Uniform success envelope (RFC 6749 section 5.1). The adapter adds
/// `http::TOKEN_RESPONSE_HEADERS`.
#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
}

impl TokenResponse {
    fn from_pair(pair: TokenPair) -> Self {
        Self {
            access_token: pair.access_token,
            token_type: "Bearer".to_string(),
            expires_in: pair.expires_in,
            refresh_token: pair.refresh_token,
            scope: pair.scope,
            id_token: pair.id_token,
        }
    }
}

/// Normalized `/revoke` request (RFC 7009).
#[derive(Debug, Clone, Default)]
pub struct RevokeRequest {
    pub token: String,
    pub token_type_hint: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub client_assertion_type: Option<String>,
    pub client_assertion: Option<String>,
}

/// Normalized `/introspect` request (RFC 7662).
#[derive(Debug, Clone, Default)]
pub struct IntrospectRequest {
    pub token: String,
    pub token_type_hint: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub client_assertion_type: Option<String>,
    pub client_assertion: Option<String>,
}

#[async_trait]
pub trait GrantService: Send + Sync {
    /// The `/token` entry: authenticate the client, dispatch on
    /// `grant_type`, return the uniform envelope.
    async fn token(&self, request: &TokenRequest) -> Result<TokenResponse, ServiceError>;

    /// The `/revoke` entry. After client authentication every outcome is a
    /// success (RFC 7009).
    async fn revoke(&self, request: &RevokeRequest) -> Result<(), ServiceError>;

    /// The `/introspect` entry.
    async fn introspect(&self, request: &IntrospectRequest)
        -> Result<Introspection, ServiceError>;
}

pub struct GrantDispatcher {
    client_service: Arc<dyn ClientService>,
    auth_code_service: Arc<dyn AuthCodeService>,
    token_service: Arc<dyn TokenService>,
    user_service: Arc<dyn UserService>,
    config: Arc<Config>,
}

impl GrantDispatcher {
    pub fn new(
        client_service: Arc<dyn ClientService>,
        auth_code_service: Arc<dyn AuthCodeService>,
        token_service: Arc<dyn TokenService>,
        user_service: Arc<dyn UserService>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            client_service,
            auth_code_service,
            token_service,
            user_service,
            config,
        }
    }

    /// Assembles credentials from the form fields: assertion wins, then
    /// secret, then the bare public client_id.
    fn credentials(
        client_id: Option<&str>,
        client_secret: Option<&str>,
        client_assertion_type: Option<&str>,
        client_assertion: Option<&str>,
    ) -> Result<ClientCredentials, ServiceError> {
        if client_assertion.is_some() || client_assertion_type.is_some() {
            let (assertion_type, assertion) = match (client_assertion_type, client_assertion) {
                (Some(t), Some(a)) => (t, a),
                _ => {
                    return Err(ServiceError::Validation(
                        "client_assertion and client_assertion_type must both be present"
                            .to_string(),
                    ))
                }
            };
            return Ok(ClientCredentials::Assertion {
                client_assertion_type: assertion_type.to_string(),
                client_assertion: assertion.to_string(),
            });
        }

        let client_id = client_id
            .ok_or_else(|| ServiceError::Validation("client_id is required".to_string()))?;

        Ok(match client_secret {
            Some(secret) => ClientCredentials::Secret {
                client_id: client_id.to_string(),
                client_secret: secret.to_string(),
            },
            None => ClientCredentials::Public {
                client_id: client_id.to_string(),
            },
        })
    }

    async fn authenticate(
        &self,
        client_id: Option<&str>,
        client_secret: Option<&str>,
        client_assertion_type: Option<&str>,
        client_assertion: Option<&str>,
        grant_type: Option<&str>,
    ) -> Result<Client, ServiceError> {
        let credentials =
            Self::credentials(client_id, client_secret, client_assertion_type, client_assertion)?;

        // unauthenticated clients are only tolerated where PKCE (or the
        // token row's client binding, for refresh) takes over
        if let ClientCredentials::Public { .. } = &credentials {
            if let Some(grant) = grant_type {
                if grant != "authorization_code" && grant != "refresh_token" {
                    return Err(ServiceError::InvalidClient(
                        "client authentication required for this grant".to_string(),
                    ));
                }
            }
        }

        self.client_service.authenticate_client(&credentials).await
    }

    async fn handle_authorization_code(
        &self,
        client: &Client,
        request: &TokenRequest,
    ) -> Result<TokenResponse, ServiceError> {
        let code = request
            .code
            .as_deref()
            .ok_or_else(|| ServiceError::Validation("missing authorization code".to_string()))?;
        let redirect_uri = request
            .redirect_uri
            .as_deref()
            .ok_or_else(|| ServiceError::Validation("missing redirect_uri".to_string()))?;

        // 1. consume the code (single-use is enforced in there)
        let redeemed = self
            .auth_code_service
            .redeem_code(code, client, redirect_uri, request.code_verifier.as_deref())
            .await?;

        // 2. a scope parameter here may never widen the authorized scope
        validation::enforce_scope_match(
            redeemed.scope.as_deref().unwrap_or(""),
            request.scope.as_deref(),
        )?;

        let user_id = redeemed.user_id.ok_or_else(|| {
            ServiceError::InvalidGrant("authorization code is not bound to a user".to_string())
        })?;

        // 3. mint with the scope granted at authorization time
        let pair = self
            .token_service
            .mint(client, Some(user_id), redeemed.scope, redeemed.nonce)
            .await?;

        Ok(TokenResponse::from_pair(pair))
    }

    async fn handle_refresh_token(
        &self,
        client: &Client,
        request: &TokenRequest,
    ) -> Result<TokenResponse, ServiceError> {
        let refresh_token = request
            .refresh_token
            .as_deref()
            .ok_or_else(|| ServiceError::Validation("missing refresh_token".to_string()))?;

        let pair = self.token_service.refresh(refresh_token, client).await?;
        Ok(TokenResponse::from_pair(pair))
    }

    async fn handle_client_credentials(
        &self,
        client: &Client,
        request: &TokenRequest,
    ) -> Result<TokenResponse, ServiceError> {
        if client.client_type != ClientType::CONFIDENTIAL {
            return Err(ServiceError::UnauthorizedClient(
                "client_credentials requires a confidential client".to_string(),
            ));
        }

        if let Some(scope) = request.scope.as_deref() {
            validation::validate_scope(scope, &client.allowed_scopes)?;
        }

        // no user, and no refresh token either (RFC 6749 section 4.4.3)
        let pair = self
            .token_service
            .mint(client, None, request.scope.clone(), None)
            .await?;
        Ok(TokenResponse::from_pair(pair))
    }

    async fn handle_password(
        &self,
        client: &Client,
        request: &TokenRequest,
    ) -> Result<TokenResponse, ServiceError> {
        // indistinguishable from an unimplemented grant while disabled
        if !self.config.password_grant_enabled {
            return Err(ServiceError::UnsupportedGrantType(
                "password grant is not enabled".to_string(),
            ));
        }

        let username = request
            .username
            .as_deref()
            .ok_or_else(|| ServiceError::Validation("missing username".to_string()))?;
        let password = request
            .password
            .as_deref()
            .ok_or_else(|| ServiceError::Validation("missing password".to_string()))?;

        let user = self.user_service.authenticate(username, password).await?;

        if let Some(scope) = request.scope.as_deref() {
            validation::validate_scope(scope, &client.allowed_scopes)?;
        }

        let pair = self
            .token_service
            .mint(client, Some(user.id), request.scope.clone(), None)
            .await?;
        Ok(TokenResponse::from_pair(pair))
    }
}

#[async_trait]
impl GrantService for GrantDispatcher {
    async fn token(&self, request: &TokenRequest) -> Result<TokenResponse, ServiceError> {
        // 1. authenticate the client
        let client = self
            .authenticate(
                request.client_id.as_deref(),
                request.client_secret.as_deref(),
                request.client_assertion_type.as_deref(),
                request.client_assertion.as_deref(),
                Some(&request.grant_type),
            )
            .await?;

        // 2. dispatch on grant_type
        match request.grant_type.as_str() {
            "authorization_code" => self.handle_authorization_code(&client, request).await,
            "refresh_token" => self.handle_refresh_token(&client, request).await,
            "client_credentials" => self.handle_client_credentials(&client, request).await,
            "password" => self.handle_password(&client, request).await,
            other => {
                tracing::debug!(grant_type = other, "unsupported grant type requested");
                Err(ServiceError::UnsupportedGrantType(format!(
                    "unsupported grant type '{other}'"
                )))
            }
        }
    }

    async fn revoke(&self, request: &RevokeRequest) -> Result<(), ServiceError> {
        self.authenticate(
            request.client_id.as_deref(),
            request.client_secret.as_deref(),
            request.client_assertion_type.as_deref(),
            request.client_assertion.as_deref(),
            None,
        )
        .await?;

        let hint = request
            .token_type_hint
            .as_deref()
            .and_then(|raw| TokenTypeHint::from_str(raw).ok());

        match self.token_service.revoke(&request.token, hint).await {
            Ok(()) => Ok(()),
            // RFC 7009: the endpoint answers 200 whether or not anything
            // was revoked; only log what went wrong
            Err(e) => {
                tracing::debug!(error = %e, "revocation error (reported as success per RFC 7009)");
                Ok(())
            }
        }
    }

    async fn introspect(
        &self,
        request: &IntrospectRequest,
    ) -> Result<Introspection, ServiceError> {
        self.authenticate(
            request.client_id.as_deref(),
            request.client_secret.as_deref(),
            request.client_assertion_type.as_deref(),
            request.client_assertion.as_deref(),
            None,
        )
        .await?;

        Ok(self.token_service.introspect(&request.token).await)
    }
}
