use crate::config::Config;
use crate::crypto::{CryptoProvider, CODE_TOKEN_BYTES};
use crate::error::{ServiceError, StoreError};
use crate::store::Store;
use crate::utils::{pkce, validation};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use oauth_models::{AuthorizationCode, Client, ClientType, CodeChallengeMethod};
use std::sync::Arc;
use uuid::Uuid;

/// Parameters carried from the authorization request into the code row.
#[derive(Debug, Clone)]
pub struct CodeRequest {
    pub redirect_uri: String,
    pub scope: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<CodeChallengeMethod>,
    pub nonce: Option<String>,
}

/// What a successful redemption yields.
#[derive(Debug, Clone)]
pub struct RedeemedCode {
    pub user_id: Option<Uuid>,
    pub scope: Option<String>,
    pub nonce: Option<String>,
}

#[async_trait]
pub trait AuthCodeService: Send + Sync {
    async fn issue_code(
        &self,
        client: &Client,
        user_id: Uuid,
        request: &CodeRequest,
    ) -> Result<String, ServiceError>;

    /// Redeems a code. The code is burned by the very first step regardless
    /// of what the later checks decide, so an intercepted code cannot be
    /// probed for a failure mode that leaves it alive.
    async fn redeem_code(
        &self,
        code: &str,
        client: &Client,
        redirect_uri: &str,
        code_verifier: Option<&str>,
    ) -> Result<RedeemedCode, ServiceError>;
}

pub struct AuthCodeServiceImpl {
    store: Arc<dyn Store>,
    crypto: Arc<CryptoProvider>,
    config: Arc<Config>,
}

impl AuthCodeServiceImpl {
    pub fn new(store: Arc<dyn Store>, crypto: Arc<CryptoProvider>, config: Arc<Config>) -> Self {
        Self {
            store,
            crypto,
            config,
        }
    }
}

#[async_trait]
impl AuthCodeService for AuthCodeServiceImpl {
    async fn issue_code(
        &self,
        client: &Client,
        user_id: Uuid,
        request: &CodeRequest,
    ) -> Result<String, ServiceError> {
        // 1. redirect_uri must be registered for this client
        validation::validate_redirect_uri(&request.redirect_uri, &client.redirect_uris)?;

        // 2. PKCE parameters, when present, must be well-formed
        if let Some(challenge) = &request.code_challenge {
            validation::validate_code_verifier(challenge)?;
        }
        if request.code_challenge.is_none() && request.code_challenge_method.is_some() {
            return Err(ServiceError::Validation(
                "code_challenge_method without code_challenge".to_string(),
            ));
        }

        // 3. public clients must bind the code with PKCE
        if client.client_type == ClientType::PUBLIC && request.code_challenge.is_none() {
            return Err(ServiceError::Validation(
                "public clients must use PKCE (code_challenge)".to_string(),
            ));
        }

        let ttl = Duration::seconds(self.config.effective_code_ttl_secs() as i64);
        // method defaults to plain when a challenge arrived without one
        // (RFC 7636 section 4.3)
        let method = request
            .code_challenge
            .as_ref()
            .map(|_| request.code_challenge_method.unwrap_or(CodeChallengeMethod::Plain));

        // 4. unique-insert; one retry with a fresh random on collision
        let build_row = |code: String| {
            let now = Utc::now();
            AuthorizationCode {
                id: Uuid::new_v4(),
                code,
                client_id: client.id,
                redirect_uri: request.redirect_uri.clone(),
                user_id: Some(user_id),
                expires_at: now + ttl,
                scope: request.scope.clone(),
                code_challenge: request.code_challenge.clone(),
                code_challenge_method: method,
                nonce: request.nonce.clone(),
                created_at: now,
                updated_at: now,
            }
        };

        let row = build_row(self.crypto.random_token(CODE_TOKEN_BYTES));
        match self.store.create_code_if_absent(&row).await {
            Ok(()) => Ok(row.code),
            Err(StoreError::Conflict(_)) => {
                tracing::warn!("authorization code collision; retrying with a fresh random");
                let retry = build_row(self.crypto.random_token(CODE_TOKEN_BYTES));
                match self.store.create_code_if_absent(&retry).await {
                    Ok(()) => Ok(retry.code),
                    Err(StoreError::Conflict(_)) => Err(ServiceError::Conflict(
                        "authorization code collision persisted across retry".to_string(),
                    )),
                    Err(e) => Err(e.into()),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn redeem_code(
        &self,
        code: &str,
        client: &Client,
        redirect_uri: &str,
        code_verifier: Option<&str>,
    ) -> Result<RedeemedCode, ServiceError> {
        validation::validate_auth_code(code)
            .map_err(|_| ServiceError::InvalidGrant("invalid authorization code".to_string()))?;

        // 1. consume. This is the single anti-replay step; the row is gone
        // from here on no matter which later check fails
        let row = match self.store.consume_code(code).await {
            Ok(row) => row,
            Err(StoreError::NotFound) => {
                tracing::warn!(client_id = %client.client_id, "authorization code unknown or already redeemed");
                return Err(ServiceError::InvalidGrant(
                    "invalid authorization code".to_string(),
                ));
            }
            Err(e) => return Err(e.into()),
        };

        // 2. expiry; same server issued the code, so zero clock skew is
        // tolerated
        if row.expires_at <= Utc::now() {
            tracing::info!(client_id = %client.client_id, "authorization code expired");
            return Err(ServiceError::InvalidGrant(
                "authorization code expired".to_string(),
            ));
        }

        // 3. the redeeming client must be the one the code was issued to
        if row.client_id != client.id {
            tracing::warn!(
                client_id = %client.client_id,
                "authorization code presented by a different client"
            );
            return Err(ServiceError::InvalidGrant(
                "authorization code was not issued to this client".to_string(),
            ));
        }

        // 4. redirect_uri must be byte-equal to the one stored at issuance
        if row.redirect_uri != redirect_uri {
            return Err(ServiceError::InvalidGrant(
                "redirect_uri does not match the authorization request".to_string(),
            ));
        }

        // 5. PKCE
        match (&row.code_challenge, code_verifier) {
            (Some(challenge), Some(verifier)) => {
                let method = row
                    .code_challenge_method
                    .unwrap_or(CodeChallengeMethod::Plain);
                if validation::validate_code_verifier(verifier).is_err()
                    || pkce::verify_pkce(verifier, challenge, method).is_err()
                {
                    tracing::warn!(client_id = %client.client_id, "PKCE verification failed");
                    return Err(ServiceError::InvalidGrant(
                        "PKCE verification failed".to_string(),
                    ));
                }
            }
            (Some(_), None) => {
                return Err(ServiceError::InvalidGrant(
                    "code_verifier required".to_string(),
                ));
            }
            // a verifier against a challenge-less code is a downgrade probe
            (None, Some(_)) => {
                tracing::warn!(client_id = %client.client_id, "code_verifier sent for a code issued without PKCE");
                return Err(ServiceError::InvalidGrant(
                    "code was not issued with PKCE".to_string(),
                ));
            }
            (None, None) => {}
        }

        Ok(RedeemedCode {
            user_id: row.user_id,
            scope: row.scope,
            nonce: row.nonce,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SigningConfig, SigningKeyConfig};
    use crate::crypto::jwks::{FetchedJwks, JwksFetcher};
    use crate::error::CryptoError;
    use crate::store::MemoryStore;
    use oauth_models::User;

    struct NoFetch;

    #[async_trait]
    impl JwksFetcher for NoFetch {
        async fn fetch_jwks(&self, _url: &str) -> Result<FetchedJwks, CryptoError> {
            Err(CryptoError::Failure("no network in tests".to_string()))
        }
    }

    fn test_setup() -> (Arc<MemoryStore>, AuthCodeServiceImpl) {
        let config = Config {
            signing: SigningConfig {
                keys: vec![SigningKeyConfig::hs256("k1", "unit_test_secret")],
                ..SigningConfig::default()
            },
            ..Config::default()
        };
        let store = Arc::new(MemoryStore::new());
        let crypto = Arc::new(CryptoProvider::new(&config, Arc::new(NoFetch)).unwrap());
        let service = AuthCodeServiceImpl::new(store.clone(), crypto, Arc::new(config));
        (store, service)
    }

    async fn seed(store: &MemoryStore, client_type: ClientType) -> (Client, User) {
        let now = Utc::now();
        let client = Client {
            id: Uuid::new_v4(),
            client_id: format!("c-{}", Uuid::new_v4()),
            client_secret_hash: None,
            name: "Unit Client".to_string(),
            client_type,
            redirect_uris: vec!["https://app.test/cb".to_string()],
            allowed_scopes: vec!["read".to_string()],
            jwks_uri: None,
            created_at: now,
            updated_at: now,
        };
        store.create_client(&client).await.unwrap();
        let user = User::new(format!("u-{}", Uuid::new_v4()), "hash");
        store.create_user(&user).await.unwrap();
        (client, user)
    }

    fn request_without_pkce() -> CodeRequest {
        CodeRequest {
            redirect_uri: "https://app.test/cb".to_string(),
            scope: Some("read".to_string()),
            code_challenge: None,
            code_challenge_method: None,
            nonce: None,
        }
    }

    #[tokio::test]
    async fn test_issue_rejects_unregistered_redirect() {
        let (store, service) = test_setup();
        let (client, user) = seed(&store, ClientType::CONFIDENTIAL).await;

        let request = CodeRequest {
            redirect_uri: "https://app.test/other".to_string(),
            ..request_without_pkce()
        };
        let result = service.issue_code(&client, user.id, &request).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_issue_requires_pkce_for_public_clients() {
        let (store, service) = test_setup();
        let (client, user) = seed(&store, ClientType::PUBLIC).await;

        let result = service
            .issue_code(&client, user.id, &request_without_pkce())
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_missing_method_defaults_to_plain() {
        let (store, service) = test_setup();
        let (client, user) = seed(&store, ClientType::PUBLIC).await;

        let verifier = "a-plain-challenge-that-is-long-enough-to-pass";
        let request = CodeRequest {
            code_challenge: Some(verifier.to_string()),
            code_challenge_method: None,
            ..request_without_pkce()
        };
        let code = service.issue_code(&client, user.id, &request).await.unwrap();

        // the code redeems with the plain transformation (RFC 7636 4.3)
        let redeemed = service
            .redeem_code(&code, &client, "https://app.test/cb", Some(verifier))
            .await;
        assert!(redeemed.is_ok());
    }

    #[tokio::test]
    async fn test_issued_code_shape() {
        let (store, service) = test_setup();
        let (client, user) = seed(&store, ClientType::CONFIDENTIAL).await;

        let code = service
            .issue_code(&client, user.id, &request_without_pkce())
            .await
            .unwrap();

        // 32 random bytes, base64url without padding
        assert_eq!(code.len(), 43);
        assert!(validation::validate_auth_code(&code).is_ok());
    }

    #[tokio::test]
    async fn test_method_without_challenge_rejected() {
        let (store, service) = test_setup();
        let (client, user) = seed(&store, ClientType::CONFIDENTIAL).await;

        let request = CodeRequest {
            code_challenge: None,
            code_challenge_method: Some(CodeChallengeMethod::S256),
            ..request_without_pkce()
        };
        let result = service.issue_code(&client, user.id, &request).await;
        assert!(result.is_err());
    }
}
