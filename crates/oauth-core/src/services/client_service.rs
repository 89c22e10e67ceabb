use crate::crypto::jwt::ClientAssertionClaims;
use crate::crypto::CryptoProvider;
use crate::error::ServiceError;
use crate::store::Store;
use crate::utils::validation;
use async_trait::async_trait;
use oauth_models::{Client, ClientType};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// The one client assertion type this server accepts (RFC 7523).
pub const ASSERTION_TYPE_JWT_BEARER: &str =
    "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

/// Replayed assertion jtis are remembered at most this long even when the
/// assertion itself claims a longer life.
const MAX_JTI_WINDOW: Duration = Duration::from_secs(3600);

/// Credentials a client can present at the token endpoint.
#[derive(Debug, Clone)]
pub enum ClientCredentials {
    /// `client_id` + `client_secret`, checked against the stored hash.
    Secret {
        client_id: String,
        client_secret: String,
    },
    /// `private_key_jwt`: a JWT signed with a key from the client's
    /// registered `jwks_uri`.
    Assertion {
        client_assertion_type: String,
        client_assertion: String,
    },
    /// No authentication. Only acceptable for public clients, whose codes
    /// are PKCE-bound instead.
    Public { client_id: String },
}

#[async_trait]
pub trait ClientService: Send + Sync {
    async fn resolve_client(&self, client_id: &str) -> Result<Option<Client>, ServiceError>;
    async fn authenticate_client(
        &self,
        credentials: &ClientCredentials,
    ) -> Result<Client, ServiceError>;
    /// Exact-string membership test against the registered set. No
    /// normalization, no prefix matching. A loose match here is an open
    /// redirect.
    fn validate_redirect_uri(&self, client: &Client, uri: &str) -> bool;
}

/// Short-lived nonce cache enforcing `jti` uniqueness of client assertions
/// within their validity window.
struct AssertionJtiCache {
    seen: RwLock<HashMap<(String, String), Instant>>,
}

impl AssertionJtiCache {
    fn new() -> Self {
        Self {
            seen: RwLock::new(HashMap::new()),
        }
    }

    /// Records `(client_id, jti)`; returns false when it was already seen.
    async fn record(&self, client_id: &str, jti: &str, window: Duration) -> bool {
        let mut seen = self.seen.write().await;
        let now = Instant::now();
        seen.retain(|_, expiry| *expiry > now);

        let key = (client_id.to_string(), jti.to_string());
        if seen.contains_key(&key) {
            return false;
        }
        seen.insert(key, now + window.min(MAX_JTI_WINDOW));
        true
    }
}

pub struct ClientServiceImpl {
    store: Arc<dyn Store>,
    crypto: Arc<CryptoProvider>,
    /// Expected audience of client assertions.
    token_endpoint: String,
    assertion_jtis: AssertionJtiCache,
}

impl ClientServiceImpl {
    pub fn new(store: Arc<dyn Store>, crypto: Arc<CryptoProvider>, token_endpoint: String) -> Self {
        Self {
            store,
            crypto,
            token_endpoint,
            assertion_jtis: AssertionJtiCache::new(),
        }
    }

    async fn require_client(&self, client_id: &str) -> Result<Client, ServiceError> {
        validation::validate_client_id(client_id)?;
        self.resolve_client(client_id)
            .await?
            .ok_or_else(|| ServiceError::InvalidClient("unknown client".to_string()))
    }

    async fn authenticate_with_secret(
        &self,
        client_id: &str,
        client_secret: &str,
    ) -> Result<Client, ServiceError> {
        let client = self.require_client(client_id).await?;

        let secret_hash = client.client_secret_hash.as_deref().ok_or_else(|| {
            ServiceError::InvalidClient("client has no secret registered".to_string())
        })?;

        let valid = self
            .crypto
            .verify_password(client_secret, secret_hash)
            .map_err(|e| {
                tracing::error!(client_id, error = %e, "client secret verification failed");
                ServiceError::Crypto(e)
            })?;
        if !valid {
            tracing::warn!(client_id, "client presented an invalid secret");
            return Err(ServiceError::InvalidClient("invalid client secret".to_string()));
        }

        Ok(client)
    }

    async fn authenticate_with_assertion(
        &self,
        client_assertion_type: &str,
        client_assertion: &str,
    ) -> Result<Client, ServiceError> {
        if client_assertion_type != ASSERTION_TYPE_JWT_BEARER {
            return Err(ServiceError::InvalidClient(
                "unsupported client_assertion_type".to_string(),
            ));
        }

        // The issuer tells us whose JWKS to fetch; nothing from this peek is
        // trusted until the signature verifies against those keys.
        let unverified = crate::crypto::jwt::peek_unverified_claims(client_assertion)
            .map_err(|_| ServiceError::InvalidClient("malformed client assertion".to_string()))?;
        let claimed_iss = unverified
            .get("iss")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| {
                ServiceError::InvalidClient("client assertion has no issuer".to_string())
            })?;

        let client = self.require_client(claimed_iss).await?;
        let jwks_uri = client.jwks_uri.as_deref().ok_or_else(|| {
            ServiceError::InvalidClient("client has no registered jwks_uri".to_string())
        })?;

        let keys = self.crypto.fetch_client_jwks(jwks_uri).await.map_err(|e| {
            tracing::warn!(client_id = %client.client_id, error = %e, "client JWKS unavailable");
            ServiceError::InvalidClient("client keys unavailable".to_string())
        })?;

        let claims: ClientAssertionClaims = self
            .crypto
            .verify_jwt_with_set(client_assertion, &keys, Some(&self.token_endpoint))
            .map_err(|e| {
                tracing::warn!(client_id = %client.client_id, error = %e, "client assertion rejected");
                ServiceError::InvalidClient("invalid client assertion".to_string())
            })?;

        if claims.iss != client.client_id || claims.sub != client.client_id {
            return Err(ServiceError::InvalidClient(
                "assertion issuer and subject must both be the client_id".to_string(),
            ));
        }

        // `exp` already validated by the JWT layer; bound the replay window
        // by the assertion's remaining life
        let now = chrono::Utc::now().timestamp();
        let remaining = (claims.exp as i64 - now).max(1) as u64;
        if !self
            .assertion_jtis
            .record(&client.client_id, &claims.jti, Duration::from_secs(remaining))
            .await
        {
            tracing::warn!(client_id = %client.client_id, jti = %claims.jti, "client assertion replayed");
            return Err(ServiceError::InvalidClient(
                "client assertion replay detected".to_string(),
            ));
        }

        Ok(client)
    }
}

#[async_trait]
impl ClientService for ClientServiceImpl {
    async fn resolve_client(&self, client_id: &str) -> Result<Option<Client>, ServiceError> {
        Ok(self.store.get_client_by_client_id(client_id).await?)
    }

    async fn authenticate_client(
        &self,
        credentials: &ClientCredentials,
    ) -> Result<Client, ServiceError> {
        match credentials {
            ClientCredentials::Secret {
                client_id,
                client_secret,
            } => self.authenticate_with_secret(client_id, client_secret).await,
            ClientCredentials::Assertion {
                client_assertion_type,
                client_assertion,
            } => {
                self.authenticate_with_assertion(client_assertion_type, client_assertion)
                    .await
            }
            ClientCredentials::Public { client_id } => {
                let client = self.require_client(client_id).await?;
                if client.client_type == ClientType::CONFIDENTIAL {
                    return Err(ServiceError::InvalidClient(
                        "client authentication required".to_string(),
                    ));
                }
                Ok(client)
            }
        }
    }

    fn validate_redirect_uri(&self, client: &Client, uri: &str) -> bool {
        validation::validate_redirect_uri(uri, &client.redirect_uris).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_jti_cache_rejects_replay() {
        let cache = AssertionJtiCache::new();
        assert!(cache.record("c1", "jti-1", Duration::from_secs(60)).await);
        assert!(!cache.record("c1", "jti-1", Duration::from_secs(60)).await);
        // a different client may reuse the same jti value
        assert!(cache.record("c2", "jti-1", Duration::from_secs(60)).await);
    }

    #[tokio::test]
    async fn test_jti_cache_expires_entries() {
        let cache = AssertionJtiCache::new();
        assert!(cache.record("c1", "jti-1", Duration::from_millis(0)).await);
        assert!(cache.record("c1", "jti-1", Duration::from_secs(60)).await);
    }
}
