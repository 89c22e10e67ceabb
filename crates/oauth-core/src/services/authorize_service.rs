use crate::error::{OAuthErrorCode, ServiceError};
use crate::http::{self, WireError};
use crate::services::auth_code_service::{AuthCodeService, CodeRequest};
use crate::services::client_service::ClientService;
use crate::utils::validation;
use async_trait::async_trait;
use oauth_models::{Client, ClientType, CodeChallengeMethod};
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

/// Normalized `/authorize` request as the HTTP boundary hands it over.
#[derive(Debug, Clone)]
pub struct AuthorizeRequest {
    pub response_type: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub scope: Option<String>,
    /// Opaque CSRF value; echoed verbatim on every redirect, success or
    /// error, and never validated.
    pub state: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    pub nonce: Option<String>,
}

/// The authenticated end-user session, established by the (external) login
/// UI.
#[derive(Debug, Clone, Copy)]
pub struct UserSession {
    pub user_id: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsentDecision {
    Granted,
    Denied,
}

/// Consent hook. The HTML consent screen lives outside the core; this trait
/// is where it plugs in. Implementations may auto-grant when the scope was
/// already consented to earlier.
#[async_trait]
pub trait ConsentProvider: Send + Sync {
    async fn decide(
        &self,
        user_id: Uuid,
        client: &Client,
        scopes: &[String],
    ) -> Result<ConsentDecision, ServiceError>;
}

/// Grants everything. Deployments with a consent screen replace this.
pub struct AutoConsent;

#[async_trait]
impl ConsentProvider for AutoConsent {
    async fn decide(
        &self,
        _user_id: Uuid,
        _client: &Client,
        _scopes: &[String],
    ) -> Result<ConsentDecision, ServiceError> {
        Ok(ConsentDecision::Granted)
    }
}

/// Terminal outcome of the `/authorize` state machine.
#[derive(Debug)]
pub enum AuthorizeOutcome {
    /// Code issued; redirect the user agent here.
    Completed { redirect_to: String },
    /// No authenticated session; the boundary sends the user to the login
    /// UI and replays the request afterwards.
    LoginRequired,
    /// OAuth error delivered via the (validated) redirect URI.
    ErrorRedirect { redirect_to: String },
    /// The redirect URI never validated, so redirecting is forbidden; the
    /// boundary renders this directly.
    ErrorDirect { error: WireError },
}

#[async_trait]
pub trait AuthorizeService: Send + Sync {
    async fn authorize(
        &self,
        request: &AuthorizeRequest,
        session: Option<&UserSession>,
    ) -> Result<AuthorizeOutcome, ServiceError>;
}

/// Drives the `/authorize` flow:
///
/// | state             | exit                                              |
/// |-------------------|---------------------------------------------------|
/// | RequestValidating | params ok → Authenticating, else Error            |
/// | Authenticating    | session → Consenting, else LoginRequired          |
/// | Consenting        | granted/implicit → IssuingCode, else AccessDenied |
/// | IssuingCode       | Completed with code + redirect descriptor         |
///
/// The redirect URI is validated against the client before anything else;
/// until that passes no error may travel via redirect.
pub struct AuthorizeServiceImpl {
    client_service: Arc<dyn ClientService>,
    auth_code_service: Arc<dyn AuthCodeService>,
    consent: Arc<dyn ConsentProvider>,
}

impl AuthorizeServiceImpl {
    pub fn new(
        client_service: Arc<dyn ClientService>,
        auth_code_service: Arc<dyn AuthCodeService>,
        consent: Arc<dyn ConsentProvider>,
    ) -> Self {
        Self {
            client_service,
            auth_code_service,
            consent,
        }
    }

    fn direct_error(description: &str) -> AuthorizeOutcome {
        AuthorizeOutcome::ErrorDirect {
            error: http::to_wire(&ServiceError::Validation(description.to_string())),
        }
    }

    fn redirect_error(
        request: &AuthorizeRequest,
        code: OAuthErrorCode,
        description: &str,
    ) -> Result<AuthorizeOutcome, ServiceError> {
        Ok(AuthorizeOutcome::ErrorRedirect {
            redirect_to: http::redirect_error_url(
                &request.redirect_uri,
                code,
                description,
                request.state.as_deref(),
            )?,
        })
    }

    /// `RequestValidating`: everything that must hold before the flow may
    /// touch the user. Returns the resolved client and parsed challenge
    /// method, or the terminal error outcome.
    async fn validate_request(
        &self,
        request: &AuthorizeRequest,
    ) -> Result<Result<(Client, Option<CodeChallengeMethod>), AuthorizeOutcome>, ServiceError> {
        if validation::validate_client_id(&request.client_id).is_err() {
            return Ok(Err(Self::direct_error("invalid client_id")));
        }
        let client = match self.client_service.resolve_client(&request.client_id).await? {
            Some(client) => client,
            None => return Ok(Err(Self::direct_error("unknown client"))),
        };

        // the open-redirect guard: nothing is sent via redirect until the
        // URI is known to be registered
        if !self
            .client_service
            .validate_redirect_uri(&client, &request.redirect_uri)
        {
            tracing::warn!(
                client_id = %request.client_id,
                "authorization request with unregistered redirect_uri"
            );
            return Ok(Err(Self::direct_error(
                "redirect_uri is not registered for this client",
            )));
        }

        if request.response_type != "code" {
            return Ok(Err(Self::redirect_error(
                request,
                OAuthErrorCode::UnsupportedResponseType,
                "only response_type=code is supported",
            )?));
        }

        if let Some(scope) = &request.scope {
            if validation::validate_scope(scope, &client.allowed_scopes).is_err() {
                return Ok(Err(Self::redirect_error(
                    request,
                    OAuthErrorCode::InvalidScope,
                    "requested scope exceeds what the client may ask for",
                )?));
            }
        }

        let method = match &request.code_challenge_method {
            Some(raw) => match CodeChallengeMethod::from_str(raw) {
                Ok(method) => Some(method),
                Err(()) => {
                    return Ok(Err(Self::redirect_error(
                        request,
                        OAuthErrorCode::InvalidRequest,
                        "code_challenge_method must be plain or S256",
                    )?));
                }
            },
            None => None,
        };
        if method.is_some() && request.code_challenge.is_none() {
            return Ok(Err(Self::redirect_error(
                request,
                OAuthErrorCode::InvalidRequest,
                "code_challenge_method without code_challenge",
            )?));
        }
        if client.client_type == ClientType::PUBLIC && request.code_challenge.is_none() {
            return Ok(Err(Self::redirect_error(
                request,
                OAuthErrorCode::InvalidRequest,
                "public clients must send a code_challenge",
            )?));
        }

        Ok(Ok((client, method)))
    }
}

#[async_trait]
impl AuthorizeService for AuthorizeServiceImpl {
    async fn authorize(
        &self,
        request: &AuthorizeRequest,
        session: Option<&UserSession>,
    ) -> Result<AuthorizeOutcome, ServiceError> {
        // --- RequestValidating ---
        let (client, method) = match self.validate_request(request).await? {
            Ok(validated) => validated,
            Err(outcome) => return Ok(outcome),
        };

        // --- Authenticating ---
        let user_id = match session {
            Some(session) => session.user_id,
            None => return Ok(AuthorizeOutcome::LoginRequired),
        };

        // --- Consenting ---
        let scopes = request
            .scope
            .as_deref()
            .map(validation::parse_scopes)
            .unwrap_or_default();
        match self.consent.decide(user_id, &client, &scopes).await? {
            ConsentDecision::Granted => {}
            ConsentDecision::Denied => {
                tracing::info!(client_id = %client.client_id, %user_id, "consent denied");
                return Self::redirect_error(
                    request,
                    OAuthErrorCode::AccessDenied,
                    "the resource owner denied the request",
                );
            }
        }

        // --- IssuingCode ---
        let code_request = CodeRequest {
            redirect_uri: request.redirect_uri.clone(),
            scope: request.scope.clone(),
            code_challenge: request.code_challenge.clone(),
            code_challenge_method: method,
            nonce: request.nonce.clone(),
        };
        let code = match self
            .auth_code_service
            .issue_code(&client, user_id, &code_request)
            .await
        {
            Ok(code) => code,
            // the redirect URI is known-good here, so even late failures
            // travel back on it
            Err(e) => {
                let code = e.oauth_code();
                tracing::error!(error = %e, "code issuance failed");
                return Self::redirect_error(request, code, "could not issue authorization code");
            }
        };

        Ok(AuthorizeOutcome::Completed {
            redirect_to: http::redirect_success_url(
                &request.redirect_uri,
                &code,
                request.state.as_deref(),
            )?,
        })
    }
}
