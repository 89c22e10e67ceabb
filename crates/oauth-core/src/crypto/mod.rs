//! Cryptographic services: password hashing, random credentials, JWT
//! signing/verification, key management and remote JWKS retrieval.
//!
//! Everything is reached through the constructor-injected [`CryptoProvider`];
//! no module-level key state exists.

pub mod jwks;
pub mod jwt;
pub mod keys;
pub mod password;

use crate::config::{Config, SigningAlgorithm};
use crate::error::CryptoError;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use jsonwebtoken::jwk::JwkSet;
use jwks::{JwksCache, JwksFetcher};
use keys::KeyStore;
use rand::{rngs::OsRng, RngCore};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Random bytes in an authorization code.
pub const CODE_TOKEN_BYTES: usize = 32;
/// Random bytes in an opaque access or refresh token.
pub const ACCESS_TOKEN_BYTES: usize = 48;

/// Algorithms acceptable for `private_key_jwt` client assertions. HS256 is
/// excluded: a shared secret has no business in a public JWKS.
const ASSERTION_ALGORITHMS: &[SigningAlgorithm] =
    &[SigningAlgorithm::RS256, SigningAlgorithm::ES256];

pub struct CryptoProvider {
    password: crate::config::PasswordHashConfig,
    keys: Arc<KeyStore>,
    jwks_cache: JwksCache,
    leeway_secs: u64,
    algorithms: Vec<SigningAlgorithm>,
}

impl CryptoProvider {
    /// Loads key material and wires the JWKS cache. Key-loading failures are
    /// fatal startup errors.
    pub fn new(config: &Config, fetcher: Arc<dyn JwksFetcher>) -> Result<Self, CryptoError> {
        let keys = Arc::new(KeyStore::from_config(&config.signing)?);
        Ok(Self {
            password: config.password_hash.clone(),
            keys,
            jwks_cache: JwksCache::new(fetcher, Duration::from_secs(config.jwks_cache_ttl_secs)),
            leeway_secs: config.effective_clock_leeway_secs(),
            algorithms: config.signing.algorithms.clone(),
        })
    }

    pub fn hash_password(&self, plain: &str) -> Result<String, CryptoError> {
        password::hash_password(plain, &self.password)
    }

    pub fn verify_password(&self, plain: &str, hash: &str) -> Result<bool, CryptoError> {
        password::verify_password(plain, hash)
    }

    /// Generates `bytes` of CSPRNG output, base64url-encoded without padding.
    pub fn random_token(&self, bytes: usize) -> String {
        let mut buf = vec![0u8; bytes];
        OsRng.fill_bytes(&mut buf);
        URL_SAFE_NO_PAD.encode(buf)
    }

    /// Signs claims with the key named by `kid`, or the active key.
    pub fn sign_jwt<T: Serialize>(&self, claims: &T, kid: Option<&str>) -> Result<String, CryptoError> {
        let key = match kid {
            Some(kid) => self
                .keys
                .get(kid)
                .ok_or_else(|| CryptoError::KeyNotFound(kid.to_string()))?,
            None => self.keys.active()?,
        };
        jwt::sign(claims, &key)
    }

    /// Verifies a JWT issued by this server.
    pub fn verify_local_jwt<T: DeserializeOwned>(
        &self,
        token: &str,
        audience: Option<&str>,
    ) -> Result<T, CryptoError> {
        jwt::verify_local(token, &self.keys, audience, &self.algorithms, self.leeway_secs)
    }

    /// Verifies a third-party JWT against a fetched key set.
    pub fn verify_jwt_with_set<T: DeserializeOwned>(
        &self,
        token: &str,
        set: &JwkSet,
        audience: Option<&str>,
    ) -> Result<T, CryptoError> {
        jwt::verify_with_set(token, set, audience, ASSERTION_ALGORITHMS, self.leeway_secs)
    }

    /// The server's public JWKS document.
    pub fn jwks(&self) -> Arc<JwkSet> {
        self.keys.jwks()
    }

    /// Fetches (or serves from cache) the JWKS a client registered at
    /// `jwks_uri`.
    pub async fn fetch_client_jwks(&self, url: &str) -> Result<Arc<JwkSet>, CryptoError> {
        self.jwks_cache.get(url).await
    }

    pub fn key_store(&self) -> &Arc<KeyStore> {
        &self.keys
    }
}
