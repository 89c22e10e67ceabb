use crate::crypto::CryptoProvider;
use crate::error::ServiceError;
use crate::store::Store;
use async_trait::async_trait;
use oauth_models::User;
use std::sync::Arc;
use uuid::Uuid;

#[async_trait]
pub trait UserService: Send + Sync {
    /// Verifies resource-owner credentials.
    ///
    /// An unknown username and a wrong password fail with the same message;
    /// the difference is only visible in the log.
    async fn authenticate(&self, username: &str, password: &str) -> Result<User, ServiceError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, ServiceError>;
}

pub struct UserServiceImpl {
    store: Arc<dyn Store>,
    crypto: Arc<CryptoProvider>,
}

impl UserServiceImpl {
    pub fn new(store: Arc<dyn Store>, crypto: Arc<CryptoProvider>) -> Self {
        Self { store, crypto }
    }
}

#[async_trait]
impl UserService for UserServiceImpl {
    async fn authenticate(&self, username: &str, password: &str) -> Result<User, ServiceError> {
        let user = match self.store.get_user_by_username(username).await? {
            Some(user) => user,
            None => {
                tracing::debug!(username, "authentication for unknown username");
                return Err(ServiceError::InvalidGrant(
                    "invalid username or password".to_string(),
                ));
            }
        };

        let valid = self
            .crypto
            .verify_password(password, &user.password_hash)
            .map_err(|e| {
                tracing::error!(username, error = %e, "password verification failed");
                ServiceError::Crypto(e)
            })?;
        if !valid {
            tracing::warn!(username, "authentication with wrong password");
            return Err(ServiceError::InvalidGrant(
                "invalid username or password".to_string(),
            ));
        }

        Ok(user)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, ServiceError> {
        Ok(self.store.get_user(id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, SigningConfig, SigningKeyConfig};
    use crate::crypto::jwks::{FetchedJwks, JwksFetcher};
    use crate::error::CryptoError;
    use crate::store::MemoryStore;

    struct NoFetch;

    #[async_trait]
    impl JwksFetcher for NoFetch {
        async fn fetch_jwks(&self, _url: &str) -> Result<FetchedJwks, CryptoError> {
            Err(CryptoError::Failure("no network in tests".to_string()))
        }
    }

    fn test_crypto() -> Arc<CryptoProvider> {
        let config = Config {
            signing: SigningConfig {
                keys: vec![SigningKeyConfig::hs256("k1", "unit_test_secret")],
                ..SigningConfig::default()
            },
            ..Config::default()
        };
        Arc::new(CryptoProvider::new(&config, Arc::new(NoFetch)).unwrap())
    }

    async fn seeded_service() -> (UserServiceImpl, User) {
        let store = Arc::new(MemoryStore::new());
        let crypto = test_crypto();
        let user = User::new("alice", crypto.hash_password("password123").unwrap());
        store.create_user(&user).await.unwrap();
        (UserServiceImpl::new(store, crypto), user)
    }

    #[tokio::test]
    async fn test_authenticate_success() {
        let (service, user) = seeded_service().await;
        let found = service.authenticate("alice", "password123").await.unwrap();
        assert_eq!(found.id, user.id);
    }

    #[tokio::test]
    async fn test_wrong_password_and_unknown_user_read_identically() {
        let (service, _) = seeded_service().await;

        let wrong_password = service
            .authenticate("alice", "nope")
            .await
            .unwrap_err()
            .to_string();
        let unknown_user = service
            .authenticate("bob", "password123")
            .await
            .unwrap_err()
            .to_string();
        assert_eq!(wrong_password, unknown_user);
    }

    #[tokio::test]
    async fn test_find_by_id() {
        let (service, user) = seeded_service().await;
        assert!(service.find_by_id(user.id).await.unwrap().is_some());
        assert!(service.find_by_id(Uuid::new_v4()).await.unwrap().is_none());
    }
}
