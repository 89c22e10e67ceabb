use super::keys::{KeyStore, SigningKey};
use crate::config::SigningAlgorithm;
use crate::error::CryptoError;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::Utc;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{decode, decode_header, encode, Algorithm, DecodingKey, Header, Validation};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// The claims present in a JWT access token.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct AccessTokenClaims {
    pub iss: String,
    /// Subject (user id); absent for client_credentials tokens.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    /// Audience (the public client_id).
    pub aud: String,
    pub exp: usize,
    pub iat: usize,
    /// JWT ID; equals the persisted token row id so revocation can find it.
    pub jti: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

/// The claims present in the ID Token (OpenID Connect).
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct IdTokenClaims {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub exp: usize,
    pub iat: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_time: Option<usize>,
    /// Nonce for replay protection, echoed from the authorization request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,
}

/// The claims of a `private_key_jwt` client assertion (RFC 7523).
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct ClientAssertionClaims {
    pub iss: String,
    pub sub: String,
    /// Must equal the token endpoint URL.
    pub aud: String,
    pub exp: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<usize>,
    pub jti: String,
}

/// Signs `claims` with the given key. The `kid` header is always emitted.
pub fn sign<T: Serialize>(claims: &T, key: &SigningKey) -> Result<String, CryptoError> {
    let mut header = Header::new(key.algorithm.to_jwt());
    header.kid = Some(key.kid.clone());
    encode(&header, claims, &key.encoding).map_err(|e| {
        tracing::error!("JWT encoding with {} failed: {:?}", key.algorithm.as_str(), e);
        CryptoError::Failure(e.to_string())
    })
}

/// Verifies a JWT signed by this server, resolving the key by `kid`.
///
/// `alg: "none"` can never pass: it does not parse into the `Algorithm`
/// allow-set, so `decode_header` already rejects it as malformed.
pub fn verify_local<T: DeserializeOwned>(
    token: &str,
    keys: &KeyStore,
    audience: Option<&str>,
    allowed: &[SigningAlgorithm],
    leeway_secs: u64,
) -> Result<T, CryptoError> {
    let header = decode_header(token).map_err(map_jwt_error)?;
    let kid = header
        .kid
        .ok_or_else(|| CryptoError::KeyNotFound("(missing kid header)".to_string()))?;
    let key = keys
        .get(&kid)
        .ok_or_else(|| CryptoError::KeyNotFound(kid.clone()))?;

    if !allowed.contains(&key.algorithm) {
        tracing::warn!(kid = %kid, alg = key.algorithm.as_str(), "signing algorithm not in allow-set");
        return Err(CryptoError::SignatureInvalid);
    }
    let decoding = key.decoding.as_ref().ok_or_else(|| {
        CryptoError::Failure(format!("key '{kid}' has no verification key loaded"))
    })?;

    verify_inner(token, decoding, vec![key.algorithm.to_jwt()], audience, leeway_secs)
}

/// Verifies a JWT against a (fetched) JWK set, resolving the key by `kid`.
pub fn verify_with_set<T: DeserializeOwned>(
    token: &str,
    set: &JwkSet,
    audience: Option<&str>,
    allowed: &[SigningAlgorithm],
    leeway_secs: u64,
) -> Result<T, CryptoError> {
    let header = decode_header(token).map_err(map_jwt_error)?;
    let kid = header
        .kid
        .ok_or_else(|| CryptoError::KeyNotFound("(missing kid header)".to_string()))?;
    let jwk = set
        .find(&kid)
        .ok_or_else(|| CryptoError::KeyNotFound(kid.clone()))?;
    let decoding = DecodingKey::from_jwk(jwk)
        .map_err(|e| CryptoError::Failure(format!("unusable JWK '{kid}': {e}")))?;

    let algorithms: Vec<Algorithm> = allowed.iter().map(|a| a.to_jwt()).collect();
    if !algorithms.contains(&header.alg) {
        tracing::warn!(kid = %kid, alg = ?header.alg, "assertion algorithm not in allow-set");
        return Err(CryptoError::SignatureInvalid);
    }

    verify_inner(token, &decoding, vec![header.alg], audience, leeway_secs)
}

fn verify_inner<T: DeserializeOwned>(
    token: &str,
    key: &DecodingKey,
    algorithms: Vec<Algorithm>,
    audience: Option<&str>,
    leeway_secs: u64,
) -> Result<T, CryptoError> {
    let leeway = leeway_secs.min(60);
    let mut validation = Validation::default();
    validation.algorithms = algorithms;
    validation.leeway = leeway;
    validation.validate_exp = true;
    match audience {
        Some(aud) => validation.set_audience(&[aud]),
        None => validation.validate_aud = false,
    }

    let data = decode::<serde_json::Value>(token, key, &validation).map_err(map_jwt_error)?;

    // jsonwebtoken checks exp; the issued-at side of the validity window is
    // checked here so a clock skewed past [iat - leeway] fails too
    if let Some(iat) = data.claims.get("iat").and_then(serde_json::Value::as_i64) {
        if iat - leeway as i64 > Utc::now().timestamp() {
            tracing::warn!("token issued in the future (iat={iat})");
            return Err(CryptoError::TokenExpired);
        }
    }

    serde_json::from_value(data.claims).map_err(|_| CryptoError::TokenMalformed)
}

/// Reads the payload of a compact JWT without verifying it.
///
/// Used only to discover which client an assertion claims to come from so
/// the right JWKS can be fetched; nothing read here is trusted until
/// `verify_with_set` passes.
pub fn peek_unverified_claims(token: &str) -> Result<serde_json::Value, CryptoError> {
    let mut parts = token.split('.');
    let payload = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(_), Some(payload), Some(_), None) => payload,
        _ => return Err(CryptoError::TokenMalformed),
    };
    let raw = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|_| CryptoError::TokenMalformed)?;
    serde_json::from_slice(&raw).map_err(|_| CryptoError::TokenMalformed)
}

fn map_jwt_error(e: jsonwebtoken::errors::Error) -> CryptoError {
    use jsonwebtoken::errors::ErrorKind;
    match e.kind() {
        ErrorKind::ExpiredSignature | ErrorKind::ImmatureSignature => CryptoError::TokenExpired,
        ErrorKind::InvalidSignature => CryptoError::SignatureInvalid,
        ErrorKind::InvalidAudience
        | ErrorKind::InvalidIssuer
        | ErrorKind::InvalidSubject
        | ErrorKind::MissingRequiredClaim(_) => CryptoError::SignatureInvalid,
        ErrorKind::InvalidToken
        | ErrorKind::InvalidAlgorithm
        | ErrorKind::InvalidAlgorithmName
        | ErrorKind::Base64(_)
        | ErrorKind::Json(_)
        | ErrorKind::Utf8(_) => CryptoError::TokenMalformed,
        _ => CryptoError::Failure(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SigningConfig, SigningKeyConfig};

    fn test_keystore() -> KeyStore {
        KeyStore::from_config(&SigningConfig {
            keys: vec![SigningKeyConfig::hs256("test-key", "test_secret")],
            ..SigningConfig::default()
        })
        .unwrap()
    }

    fn claims(exp_offset: i64, iat_offset: i64) -> AccessTokenClaims {
        let now = Utc::now().timestamp();
        AccessTokenClaims {
            iss: "https://auth.test".to_string(),
            sub: Some("user-1".to_string()),
            aud: "client-1".to_string(),
            exp: (now + exp_offset) as usize,
            iat: (now + iat_offset) as usize,
            jti: "jti-1".to_string(),
            scope: Some("read".to_string()),
        }
    }

    #[test]
    fn test_sign_verify_round_trip() {
        let keys = test_keystore();
        let original = claims(600, 0);
        let token = sign(&original, &keys.active().unwrap()).unwrap();

        let verified: AccessTokenClaims = verify_local(
            &token,
            &keys,
            Some("client-1"),
            &[SigningAlgorithm::HS256],
            60,
        )
        .unwrap();
        assert_eq!(verified, original);
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let keys = test_keystore();
        let token = sign(&claims(600, 0), &keys.active().unwrap()).unwrap();

        // splice in a payload claiming a different subject
        let parts: Vec<&str> = token.split('.').collect();
        let mut forged = claims(600, 0);
        forged.sub = Some("user-2".to_string());
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged).unwrap());
        let tampered = format!("{}.{}.{}", parts[0], payload, parts[2]);

        let result: Result<AccessTokenClaims, _> =
            verify_local(&tampered, &keys, None, &[SigningAlgorithm::HS256], 60);
        assert!(matches!(result, Err(CryptoError::SignatureInvalid)));
    }

    #[test]
    fn test_expired_token_rejected() {
        let keys = test_keystore();
        let token = sign(&claims(-120, -600), &keys.active().unwrap()).unwrap();

        let result: Result<AccessTokenClaims, _> =
            verify_local(&token, &keys, None, &[SigningAlgorithm::HS256], 0);
        assert!(matches!(result, Err(CryptoError::TokenExpired)));
    }

    #[test]
    fn test_future_iat_rejected() {
        let keys = test_keystore();
        let token = sign(&claims(600, 300), &keys.active().unwrap()).unwrap();

        let result: Result<AccessTokenClaims, _> =
            verify_local(&token, &keys, None, &[SigningAlgorithm::HS256], 0);
        assert!(matches!(result, Err(CryptoError::TokenExpired)));
    }

    #[test]
    fn test_unknown_kid_rejected() {
        let keys = test_keystore();
        let token = sign(&claims(600, 0), &keys.active().unwrap()).unwrap();

        let other = KeyStore::from_config(&SigningConfig {
            keys: vec![SigningKeyConfig::hs256("other-key", "test_secret")],
            ..SigningConfig::default()
        })
        .unwrap();

        let result: Result<AccessTokenClaims, _> =
            verify_local(&token, &other, None, &[SigningAlgorithm::HS256], 60);
        assert!(matches!(result, Err(CryptoError::KeyNotFound(_))));
    }

    #[test]
    fn test_audience_mismatch_rejected() {
        let keys = test_keystore();
        let token = sign(&claims(600, 0), &keys.active().unwrap()).unwrap();

        let result: Result<AccessTokenClaims, _> = verify_local(
            &token,
            &keys,
            Some("someone-else"),
            &[SigningAlgorithm::HS256],
            60,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_peek_reads_unverified_claims() {
        let keys = test_keystore();
        let token = sign(&claims(600, 0), &keys.active().unwrap()).unwrap();

        let peeked = peek_unverified_claims(&token).unwrap();
        assert_eq!(peeked["iss"], "https://auth.test");

        assert!(peek_unverified_claims("not-a-jwt").is_err());
    }
}
