use crate::config::Config;
use crate::crypto::jwks::{HttpJwksFetcher, JwksFetcher};
use crate::crypto::CryptoProvider;
use crate::error::ServiceError;
use crate::http::{self, WireError};
use crate::services::{
    auth_code_service::{AuthCodeService, AuthCodeServiceImpl},
    authorize_service::{
        AuthorizeOutcome, AuthorizeRequest, AuthorizeService, AuthorizeServiceImpl, AutoConsent,
        ConsentProvider, UserSession,
    },
    client_service::{ClientService, ClientServiceImpl},
    grant_service::{
        GrantDispatcher, GrantService, IntrospectRequest, RevokeRequest, TokenRequest,
        TokenResponse,
    },
    permission_service::{PermissionService, PermissionServiceImpl},
    token_service::{Introspection, TokenService, TokenServiceImpl},
    user_service::{UserService, UserServiceImpl},
};
use crate::store::{Store, SweepCounts};
use chrono::Utc;
use jsonwebtoken::jwk::JwkSet;
use std::sync::Arc;
use std::time::Duration;

/// The application state, containing all shared services and resources.
///
/// Every service is constructor-injected; there is no module-level state.
/// The HTTP boundary keeps one `Arc<AppState>` and calls the `handle_*`
/// contract methods below.
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn Store>,
    pub crypto: Arc<CryptoProvider>,
    pub user_service: Arc<dyn UserService>,
    pub client_service: Arc<dyn ClientService>,
    pub auth_code_service: Arc<dyn AuthCodeService>,
    pub token_service: Arc<dyn TokenService>,
    pub permission_service: Arc<dyn PermissionService>,
    pub authorize_service: Arc<dyn AuthorizeService>,
    pub grant_service: Arc<dyn GrantService>,
}

impl AppState {
    /// Production wiring: real JWKS fetcher, consent granted implicitly
    /// (deployments with a consent screen use `with_hooks`).
    pub fn new(config: Config, store: Arc<dyn Store>) -> Result<Self, ServiceError> {
        let fetcher = Arc::new(HttpJwksFetcher::new()?);
        Self::with_hooks(config, store, fetcher, Arc::new(AutoConsent))
    }

    /// Wiring with injectable seams, used by tests and custom deployments.
    pub fn with_hooks(
        config: Config,
        store: Arc<dyn Store>,
        fetcher: Arc<dyn JwksFetcher>,
        consent: Arc<dyn ConsentProvider>,
    ) -> Result<Self, ServiceError> {
        // configuration violations are fatal at startup
        config.validate()?;
        let config = Arc::new(config);

        let crypto = Arc::new(CryptoProvider::new(&config, fetcher)?);

        let user_service: Arc<dyn UserService> =
            Arc::new(UserServiceImpl::new(store.clone(), crypto.clone()));
        let client_service: Arc<dyn ClientService> = Arc::new(ClientServiceImpl::new(
            store.clone(),
            crypto.clone(),
            config.token_endpoint(),
        ));
        let auth_code_service: Arc<dyn AuthCodeService> = Arc::new(AuthCodeServiceImpl::new(
            store.clone(),
            crypto.clone(),
            config.clone(),
        ));
        let token_service: Arc<dyn TokenService> = Arc::new(TokenServiceImpl::new(
            store.clone(),
            crypto.clone(),
            config.clone(),
        ));
        let permission_service: Arc<dyn PermissionService> = Arc::new(PermissionServiceImpl::new(
            store.clone(),
            token_service.clone(),
            config.permission_cache_capacity,
            Duration::from_secs(config.permission_cache_ttl_secs),
        ));
        let authorize_service: Arc<dyn AuthorizeService> = Arc::new(AuthorizeServiceImpl::new(
            client_service.clone(),
            auth_code_service.clone(),
            consent,
        ));
        let grant_service: Arc<dyn GrantService> = Arc::new(GrantDispatcher::new(
            client_service.clone(),
            auth_code_service.clone(),
            token_service.clone(),
            user_service.clone(),
            config.clone(),
        ));

        Ok(Self {
            config,
            store,
            crypto,
            user_service,
            client_service,
            auth_code_service,
            token_service,
            permission_service,
            authorize_service,
            grant_service,
        })
    }

    /// `/authorize` contract. Internal failures become direct errors: until
    /// the orchestrator has validated the redirect URI nothing may travel
    /// via redirect, and after that point it maps errors itself.
    pub async fn handle_authorize(
        &self,
        request: &AuthorizeRequest,
        session: Option<&UserSession>,
    ) -> AuthorizeOutcome {
        match self.authorize_service.authorize(request, session).await {
            Ok(outcome) => outcome,
            Err(e) => AuthorizeOutcome::ErrorDirect {
                error: http::to_wire(&e),
            },
        }
    }

    /// `/token` contract. The adapter serializes the error as-is and adds
    /// `http::TOKEN_RESPONSE_HEADERS` on success.
    pub async fn handle_token(&self, request: &TokenRequest) -> Result<TokenResponse, WireError> {
        self.grant_service
            .token(request)
            .await
            .map_err(|e| http::to_wire(&e))
    }

    /// `/revoke` contract: 200 with an empty body on `Ok`.
    pub async fn handle_revoke(&self, request: &RevokeRequest) -> Result<(), WireError> {
        self.grant_service
            .revoke(request)
            .await
            .map_err(|e| http::to_wire(&e))
    }

    /// `/introspect` contract.
    pub async fn handle_introspect(
        &self,
        request: &IntrospectRequest,
    ) -> Result<Introspection, WireError> {
        self.grant_service
            .introspect(request)
            .await
            .map_err(|e| http::to_wire(&e))
    }

    /// `/jwks` contract.
    pub fn jwks_document(&self) -> Arc<JwkSet> {
        self.crypto.jwks()
    }

    /// Periodic maintenance: drop expired codes and tokens.
    pub async fn sweep_expired(&self) -> Result<SweepCounts, ServiceError> {
        let counts = self.store.sweep_expired(Utc::now()).await?;
        if counts.codes + counts.access_tokens + counts.refresh_tokens > 0 {
            tracing::info!(
                codes = counts.codes,
                access_tokens = counts.access_tokens,
                refresh_tokens = counts.refresh_tokens,
                "expired credentials swept"
            );
        }
        Ok(counts)
    }
}
