use crate::error::ServiceError;
use serde::Deserialize;
use std::path::PathBuf;

/// JWT签名算法配置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
#[derive(Default)]
pub enum SigningAlgorithm {
    /// HMAC with SHA-256 (shared secret; never published in the JWKS)
    HS256,
    /// RSA with SHA-256
    #[default]
    RS256,
    /// ECDSA P-256 with SHA-256
    ES256,
}

impl SigningAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            SigningAlgorithm::HS256 => "HS256",
            SigningAlgorithm::RS256 => "RS256",
            SigningAlgorithm::ES256 => "ES256",
        }
    }

    pub fn to_jwt(self) -> jsonwebtoken::Algorithm {
        match self {
            SigningAlgorithm::HS256 => jsonwebtoken::Algorithm::HS256,
            SigningAlgorithm::RS256 => jsonwebtoken::Algorithm::RS256,
            SigningAlgorithm::ES256 => jsonwebtoken::Algorithm::ES256,
        }
    }
}

/// Access token representation on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
#[derive(Default)]
pub enum AccessTokenFormat {
    Opaque,
    #[default]
    Jwt,
}

/// Refresh token rotation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
#[derive(Default)]
pub enum RefreshRotation {
    #[default]
    Always,
    Never,
}

/// Password hashing algorithm selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
#[derive(Default)]
pub enum PasswordAlgorithm {
    #[default]
    Argon2id,
    Bcrypt,
}

/// 密码哈希配置
#[derive(Debug, Clone, Deserialize)]
pub struct PasswordHashConfig {
    #[serde(default)]
    pub algorithm: PasswordAlgorithm,
    /// bcrypt rounds, or argon2id iteration count.
    #[serde(default = "default_password_cost")]
    pub cost: u32,
    /// Salt length in bytes.
    #[serde(default = "default_salt_length")]
    pub salt_length: usize,
}

impl Default for PasswordHashConfig {
    fn default() -> Self {
        Self {
            algorithm: PasswordAlgorithm::default(),
            cost: default_password_cost(),
            salt_length: default_salt_length(),
        }
    }
}

fn default_password_cost() -> u32 {
    // argon2id t_cost; bcrypt deployments should raise this to >= 12
    3
}

fn default_salt_length() -> usize {
    16
}

/// One signing key entry. Keys are loaded once at init; rotation replaces
/// the whole table out-of-band (see `crypto::keys::KeyStore::rotate`).
#[derive(Debug, Clone, Deserialize)]
pub struct SigningKeyConfig {
    pub kid: String,
    #[serde(default)]
    pub algorithm: SigningAlgorithm,
    /// PEM file for RS256/ES256 private keys.
    #[serde(default)]
    pub private_key_path: Option<PathBuf>,
    /// PEM file for the matching public key (local verification).
    #[serde(default)]
    pub public_key_path: Option<PathBuf>,
    /// Inline shared secret for HS256.
    #[serde(default)]
    pub secret: Option<String>,
}

impl SigningKeyConfig {
    /// Convenience constructor for an HS256 key.
    pub fn hs256(kid: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            kid: kid.into(),
            algorithm: SigningAlgorithm::HS256,
            private_key_path: None,
            public_key_path: None,
            secret: Some(secret.into()),
        }
    }
}

/// Signing key material configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SigningConfig {
    /// Algorithms accepted when verifying locally issued JWTs.
    #[serde(default = "default_signing_algorithms")]
    pub algorithms: Vec<SigningAlgorithm>,
    /// `kid` used for newly signed tokens. Older kids stay resolvable until
    /// every token they signed has expired.
    #[serde(default)]
    pub active_kid: Option<String>,
    #[serde(default)]
    pub keys: Vec<SigningKeyConfig>,
    /// JWKS document exposing the public halves of the RS256/ES256 keys.
    /// Generated alongside the PEMs; HS256-only deployments leave it unset
    /// and serve an empty key set.
    #[serde(default)]
    pub public_jwks_path: Option<PathBuf>,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            algorithms: default_signing_algorithms(),
            active_kid: None,
            keys: Vec::new(),
            public_jwks_path: None,
        }
    }
}

fn default_signing_algorithms() -> Vec<SigningAlgorithm> {
    vec![SigningAlgorithm::RS256]
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_issuer")]
    pub issuer: String,

    #[serde(default = "default_access_token_ttl")]
    pub access_token_ttl_secs: u64,

    #[serde(default = "default_refresh_token_ttl")]
    pub refresh_token_ttl_secs: u64,

    /// Authorization code lifetime; clamped to 600 s by `validate`.
    #[serde(default = "default_code_ttl")]
    pub code_ttl_secs: u64,

    #[serde(default)]
    pub access_token_format: AccessTokenFormat,

    /// Resource-owner password grant; OFF unless explicitly enabled.
    #[serde(default)]
    pub password_grant_enabled: bool,

    #[serde(default)]
    pub refresh_rotation: RefreshRotation,

    /// Upper bound for remote JWKS cache entries; `Cache-Control: max-age`
    /// can only shorten it.
    #[serde(default = "default_jwks_cache_ttl")]
    pub jwks_cache_ttl_secs: u64,

    /// Clock tolerance for JWT validity windows; clamped to 60 s.
    #[serde(default = "default_clock_leeway")]
    pub clock_leeway_secs: u64,

    /// Stolen-refresh-token replay response (revoke-all on tombstone hit).
    /// Recommended, but off by default: a deployment enabling it accepts
    /// that an accidental double-submit of a rotated token logs the user
    /// out everywhere.
    #[serde(default)]
    pub refresh_reuse_detection: bool,

    #[serde(default = "default_replay_window")]
    pub replay_window_secs: u64,

    #[serde(default = "default_permission_cache_capacity")]
    pub permission_cache_capacity: usize,

    #[serde(default = "default_permission_cache_ttl")]
    pub permission_cache_ttl_secs: u64,

    #[serde(default)]
    pub password_hash: PasswordHashConfig,

    #[serde(default)]
    pub signing: SigningConfig,
}

fn default_issuer() -> String {
    "http://127.0.0.1:3001".to_string()
}

fn default_access_token_ttl() -> u64 {
    3600
}

fn default_refresh_token_ttl() -> u64 {
    2_592_000
}

fn default_code_ttl() -> u64 {
    600
}

fn default_jwks_cache_ttl() -> u64 {
    3600
}

fn default_clock_leeway() -> u64 {
    60
}

fn default_replay_window() -> u64 {
    300
}

fn default_permission_cache_capacity() -> usize {
    10_000
}

fn default_permission_cache_ttl() -> u64 {
    60
}

impl Default for Config {
    fn default() -> Self {
        Self {
            issuer: default_issuer(),
            access_token_ttl_secs: default_access_token_ttl(),
            refresh_token_ttl_secs: default_refresh_token_ttl(),
            code_ttl_secs: default_code_ttl(),
            access_token_format: AccessTokenFormat::default(),
            password_grant_enabled: false,
            refresh_rotation: RefreshRotation::default(),
            jwks_cache_ttl_secs: default_jwks_cache_ttl(),
            clock_leeway_secs: default_clock_leeway(),
            refresh_reuse_detection: false,
            replay_window_secs: default_replay_window(),
            permission_cache_capacity: default_permission_cache_capacity(),
            permission_cache_ttl_secs: default_permission_cache_ttl(),
            password_hash: PasswordHashConfig::default(),
            signing: SigningConfig::default(),
        }
    }
}

impl Config {
    /// The token endpoint URL; `private_key_jwt` assertions must name it as
    /// their audience.
    pub fn token_endpoint(&self) -> String {
        format!("{}/token", self.issuer.trim_end_matches('/'))
    }

    /// Authorization code TTL after the 10-minute clamp.
    pub fn effective_code_ttl_secs(&self) -> u64 {
        self.code_ttl_secs.min(600)
    }

    /// Clock leeway after the 60-second clamp.
    pub fn effective_clock_leeway_secs(&self) -> u64 {
        self.clock_leeway_secs.min(60)
    }

    /// Startup validation; violations are fatal.
    pub fn validate(&self) -> Result<(), ServiceError> {
        if self.issuer.is_empty() {
            return Err(ServiceError::Configuration(
                "issuer must not be empty".to_string(),
            ));
        }
        url::Url::parse(&self.issuer).map_err(|e| {
            ServiceError::Configuration(format!("issuer is not a valid URL: {e}"))
        })?;

        if self.access_token_ttl_secs == 0 {
            return Err(ServiceError::Configuration(
                "access_token_ttl_secs must be positive".to_string(),
            ));
        }
        if self.refresh_token_ttl_secs == 0 {
            return Err(ServiceError::Configuration(
                "refresh_token_ttl_secs must be positive".to_string(),
            ));
        }
        if self.code_ttl_secs == 0 {
            return Err(ServiceError::Configuration(
                "code_ttl_secs must be positive".to_string(),
            ));
        }

        if self.signing.keys.is_empty() {
            return Err(ServiceError::Configuration(
                "at least one signing key must be configured".to_string(),
            ));
        }
        for key in &self.signing.keys {
            match key.algorithm {
                SigningAlgorithm::HS256 => {
                    if key.secret.is_none() {
                        return Err(ServiceError::Configuration(format!(
                            "HS256 key '{}' is missing its secret",
                            key.kid
                        )));
                    }
                }
                SigningAlgorithm::RS256 | SigningAlgorithm::ES256 => {
                    if key.private_key_path.is_none() {
                        return Err(ServiceError::Configuration(format!(
                            "key '{}' is missing private_key_path",
                            key.kid
                        )));
                    }
                }
            }
        }
        if let Some(active) = &self.signing.active_kid {
            if !self.signing.keys.iter().any(|k| &k.kid == active) {
                return Err(ServiceError::Configuration(format!(
                    "active_kid '{active}' does not match any configured key"
                )));
            }
        }

        if self.password_hash.salt_length < 8 {
            return Err(ServiceError::Configuration(
                "password salt_length below 8 bytes".to_string(),
            ));
        }

        Ok(())
    }
}
