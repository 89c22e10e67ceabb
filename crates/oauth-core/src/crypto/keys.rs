use crate::config::{SigningAlgorithm, SigningConfig, SigningKeyConfig};
use crate::error::CryptoError;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{DecodingKey, EncodingKey};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// One loaded signing key, resolvable by `kid`.
pub struct SigningKey {
    pub kid: String,
    pub algorithm: SigningAlgorithm,
    pub(crate) encoding: EncodingKey,
    /// Verification half. Always present for HS256; for RS256/ES256 it is
    /// only loaded when `public_key_path` was configured.
    pub(crate) decoding: Option<DecodingKey>,
}

/// Holds the server's signing key material.
///
/// The kid-keyed map is immutable once built; `rotate` swaps the whole map
/// pointer so readers never observe a partially updated table. Old kids stay
/// in the new table until every token they signed has expired.
pub struct KeyStore {
    keys: RwLock<Arc<HashMap<String, Arc<SigningKey>>>>,
    active_kid: RwLock<String>,
    jwks: RwLock<Arc<JwkSet>>,
}

fn load_key(entry: &SigningKeyConfig) -> Result<SigningKey, CryptoError> {
    let (encoding, decoding) = match entry.algorithm {
        SigningAlgorithm::HS256 => {
            let secret = entry.secret.as_ref().ok_or_else(|| {
                CryptoError::Failure(format!("HS256 key '{}' has no secret", entry.kid))
            })?;
            (
                EncodingKey::from_secret(secret.as_bytes()),
                Some(DecodingKey::from_secret(secret.as_bytes())),
            )
        }
        SigningAlgorithm::RS256 => {
            let pem = read_pem(entry, "private")?;
            let encoding = EncodingKey::from_rsa_pem(&pem).map_err(|e| {
                CryptoError::Failure(format!("key '{}': invalid RSA private key: {e}", entry.kid))
            })?;
            let decoding = match &entry.public_key_path {
                Some(path) => {
                    let pem = std::fs::read(path).map_err(|e| {
                        CryptoError::Failure(format!(
                            "key '{}': failed to read public key {}: {e}",
                            entry.kid,
                            path.display()
                        ))
                    })?;
                    Some(DecodingKey::from_rsa_pem(&pem).map_err(|e| {
                        CryptoError::Failure(format!(
                            "key '{}': invalid RSA public key: {e}",
                            entry.kid
                        ))
                    })?)
                }
                None => None,
            };
            (encoding, decoding)
        }
        SigningAlgorithm::ES256 => {
            let pem = read_pem(entry, "private")?;
            let encoding = EncodingKey::from_ec_pem(&pem).map_err(|e| {
                CryptoError::Failure(format!("key '{}': invalid EC private key: {e}", entry.kid))
            })?;
            let decoding = match &entry.public_key_path {
                Some(path) => {
                    let pem = std::fs::read(path).map_err(|e| {
                        CryptoError::Failure(format!(
                            "key '{}': failed to read public key {}: {e}",
                            entry.kid,
                            path.display()
                        ))
                    })?;
                    Some(DecodingKey::from_ec_pem(&pem).map_err(|e| {
                        CryptoError::Failure(format!(
                            "key '{}': invalid EC public key: {e}",
                            entry.kid
                        ))
                    })?)
                }
                None => None,
            };
            (encoding, decoding)
        }
    };

    Ok(SigningKey {
        kid: entry.kid.clone(),
        algorithm: entry.algorithm,
        encoding,
        decoding,
    })
}

fn read_pem(entry: &SigningKeyConfig, which: &str) -> Result<Vec<u8>, CryptoError> {
    let path = entry.private_key_path.as_ref().ok_or_else(|| {
        CryptoError::Failure(format!(
            "key '{}' has no {which} key path configured",
            entry.kid
        ))
    })?;
    std::fs::read(path).map_err(|e| {
        CryptoError::Failure(format!(
            "key '{}': failed to read {which} key {}: {e}",
            entry.kid,
            path.display()
        ))
    })
}

fn build_table(
    config: &SigningConfig,
) -> Result<(HashMap<String, Arc<SigningKey>>, String, JwkSet), CryptoError> {
    let mut keys = HashMap::with_capacity(config.keys.len());
    for entry in &config.keys {
        let key = load_key(entry)?;
        if keys.insert(key.kid.clone(), Arc::new(key)).is_some() {
            return Err(CryptoError::Failure(format!(
                "duplicate signing kid '{}'",
                entry.kid
            )));
        }
    }

    let active_kid = match &config.active_kid {
        Some(kid) => {
            if !keys.contains_key(kid) {
                return Err(CryptoError::KeyNotFound(kid.clone()));
            }
            kid.clone()
        }
        None => config
            .keys
            .first()
            .map(|k| k.kid.clone())
            .ok_or_else(|| CryptoError::Failure("no signing keys configured".to_string()))?,
    };

    let jwks = match &config.public_jwks_path {
        Some(path) => {
            let raw = std::fs::read(path).map_err(|e| {
                CryptoError::Failure(format!("failed to read JWKS {}: {e}", path.display()))
            })?;
            serde_json::from_slice(&raw).map_err(|e| {
                CryptoError::Failure(format!("invalid JWKS document {}: {e}", path.display()))
            })?
        }
        // HS256-only deployments publish nothing
        None => JwkSet { keys: Vec::new() },
    };

    Ok((keys, active_kid, jwks))
}

impl KeyStore {
    /// Loads every configured key once. Failures here are fatal startup
    /// configuration errors.
    pub fn from_config(config: &SigningConfig) -> Result<Self, CryptoError> {
        let (keys, active_kid, jwks) = build_table(config)?;
        Ok(Self {
            keys: RwLock::new(Arc::new(keys)),
            active_kid: RwLock::new(active_kid),
            jwks: RwLock::new(Arc::new(jwks)),
        })
    }

    /// The key new tokens are signed with.
    pub fn active(&self) -> Result<Arc<SigningKey>, CryptoError> {
        let kid = self
            .active_kid
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        self.get(&kid).ok_or(CryptoError::KeyNotFound(kid))
    }

    pub fn get(&self, kid: &str) -> Option<Arc<SigningKey>> {
        self.keys
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(kid)
            .cloned()
    }

    /// The public JWKS document served at `/jwks`.
    pub fn jwks(&self) -> Arc<JwkSet> {
        self.jwks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Out-of-band rotation: rebuild the table from new configuration and
    /// swap the pointers. Readers holding the old map keep verifying with it
    /// until their call completes.
    pub fn rotate(&self, config: &SigningConfig) -> Result<(), CryptoError> {
        let (keys, active_kid, jwks) = build_table(config)?;
        *self.keys.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(keys);
        *self
            .active_kid
            .write()
            .unwrap_or_else(PoisonError::into_inner) = active_kid;
        *self.jwks.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(jwks);
        tracing::info!("signing key table rotated");
        Ok(())
    }
}
