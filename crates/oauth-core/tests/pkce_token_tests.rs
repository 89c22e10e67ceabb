//! PKCE 和令牌相关测试
//!
//! PKCE failure modes (burned codes, downgrade probes), token formats,
//! strict expiry, sweeping and introspection.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use oauth_core::config::{
    AccessTokenFormat, Config, SigningAlgorithm, SigningConfig, SigningKeyConfig,
};
use oauth_core::crypto::jwks::{FetchedJwks, JwksFetcher};
use oauth_core::error::CryptoError;
use oauth_core::services::auth_code_service::CodeRequest;
use oauth_core::services::auth_code_service::AuthCodeService;
use oauth_core::services::grant_service::{IntrospectRequest, TokenRequest};
use oauth_core::services::token_service::TokenService;
use oauth_core::{AppState, MemoryStore, Store};
use oauth_models::{AccessToken, Client, ClientType, CodeChallengeMethod, User};
use std::sync::Arc;
use uuid::Uuid;

const PKCE_VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
const PKCE_CHALLENGE: &str = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";

struct NoFetch;

#[async_trait]
impl JwksFetcher for NoFetch {
    async fn fetch_jwks(&self, _url: &str) -> Result<FetchedJwks, CryptoError> {
        Err(CryptoError::Failure("no network in tests".to_string()))
    }
}

fn base_config() -> Config {
    Config {
        issuer: "https://auth.test".to_string(),
        signing: SigningConfig {
            algorithms: vec![SigningAlgorithm::HS256],
            active_kid: Some("test-key".to_string()),
            keys: vec![SigningKeyConfig::hs256("test-key", "integration_test_secret")],
            ..SigningConfig::default()
        },
        ..Config::default()
    }
}

fn setup_state(config: Config) -> AppState {
    let _ = tracing_subscriber::fmt::try_init();
    AppState::with_hooks(
        config,
        Arc::new(MemoryStore::new()),
        Arc::new(NoFetch),
        Arc::new(oauth_core::services::authorize_service::AutoConsent),
    )
    .unwrap()
}

async fn seed_client(state: &AppState, client_type: ClientType) -> Client {
    let now = Utc::now();
    let client = Client {
        id: Uuid::new_v4(),
        client_id: format!("client-{}", Uuid::new_v4()),
        client_secret_hash: None,
        name: "Test App".to_string(),
        client_type,
        redirect_uris: vec!["https://app.test/cb".to_string()],
        allowed_scopes: vec!["read".to_string(), "openid".to_string()],
        jwks_uri: None,
        created_at: now,
        updated_at: now,
    };
    state.store.create_client(&client).await.unwrap();
    client
}

async fn seed_user(state: &AppState) -> User {
    let hash = state.crypto.hash_password("password123").unwrap();
    let user = User::new(format!("user-{}", Uuid::new_v4()), hash);
    state.store.create_user(&user).await.unwrap();
    user
}

fn pkce_request() -> CodeRequest {
    CodeRequest {
        redirect_uri: "https://app.test/cb".to_string(),
        scope: Some("read".to_string()),
        code_challenge: Some(PKCE_CHALLENGE.to_string()),
        code_challenge_method: Some(CodeChallengeMethod::S256),
        nonce: None,
    }
}

fn plain_request() -> CodeRequest {
    CodeRequest {
        redirect_uri: "https://app.test/cb".to_string(),
        scope: Some("read".to_string()),
        code_challenge: None,
        code_challenge_method: None,
        nonce: None,
    }
}

// ============================================================================
// PKCE 验证
// ============================================================================

#[tokio::test]
async fn test_correct_verifier_redeems() {
    let state = setup_state(base_config());
    let client = seed_client(&state, ClientType::PUBLIC).await;
    let user = seed_user(&state).await;

    let code = state
        .auth_code_service
        .issue_code(&client, user.id, &pkce_request())
        .await
        .unwrap();

    let redeemed = state
        .auth_code_service
        .redeem_code(&code, &client, "https://app.test/cb", Some(PKCE_VERIFIER))
        .await
        .unwrap();
    assert_eq!(redeemed.user_id, Some(user.id));
    assert_eq!(redeemed.scope.as_deref(), Some("read"));
}

#[tokio::test]
async fn test_wrong_verifier_fails_and_burns_the_code() {
    let state = setup_state(base_config());
    let client = seed_client(&state, ClientType::PUBLIC).await;
    let user = seed_user(&state).await;

    let code = state
        .auth_code_service
        .issue_code(&client, user.id, &pkce_request())
        .await
        .unwrap();

    // any other valid-format verifier must fail
    let wrong = oauth_core::utils::pkce::generate_code_verifier();
    let error = state
        .auth_code_service
        .redeem_code(&code, &client, "https://app.test/cb", Some(&wrong))
        .await
        .unwrap_err();
    assert_eq!(error.oauth_code().as_str(), "invalid_grant");

    // the failed attempt consumed the code; the right verifier is too late
    let error = state
        .auth_code_service
        .redeem_code(&code, &client, "https://app.test/cb", Some(PKCE_VERIFIER))
        .await
        .unwrap_err();
    assert_eq!(error.oauth_code().as_str(), "invalid_grant");
}

#[tokio::test]
async fn test_missing_verifier_rejected() {
    let state = setup_state(base_config());
    let client = seed_client(&state, ClientType::PUBLIC).await;
    let user = seed_user(&state).await;

    let code = state
        .auth_code_service
        .issue_code(&client, user.id, &pkce_request())
        .await
        .unwrap();

    let error = state
        .auth_code_service
        .redeem_code(&code, &client, "https://app.test/cb", None)
        .await
        .unwrap_err();
    assert_eq!(error.oauth_code().as_str(), "invalid_grant");
}

#[tokio::test]
async fn test_verifier_against_plain_code_is_a_downgrade_probe() {
    let state = setup_state(base_config());
    // confidential clients may skip PKCE at issuance
    let client = seed_client(&state, ClientType::CONFIDENTIAL).await;
    let user = seed_user(&state).await;

    let code = state
        .auth_code_service
        .issue_code(&client, user.id, &plain_request())
        .await
        .unwrap();

    let error = state
        .auth_code_service
        .redeem_code(&code, &client, "https://app.test/cb", Some(PKCE_VERIFIER))
        .await
        .unwrap_err();
    assert_eq!(error.oauth_code().as_str(), "invalid_grant");
}

#[tokio::test]
async fn test_plain_method_verification() {
    let state = setup_state(base_config());
    let client = seed_client(&state, ClientType::PUBLIC).await;
    let user = seed_user(&state).await;

    let verifier = "plain-verifier-plain-verifier-plain-verifier-42";
    let request = CodeRequest {
        code_challenge: Some(verifier.to_string()),
        code_challenge_method: Some(CodeChallengeMethod::Plain),
        ..pkce_request()
    };
    let code = state
        .auth_code_service
        .issue_code(&client, user.id, &request)
        .await
        .unwrap();

    let redeemed = state
        .auth_code_service
        .redeem_code(&code, &client, "https://app.test/cb", Some(verifier))
        .await;
    assert!(redeemed.is_ok());
}

#[tokio::test]
async fn test_expired_code_rejected() {
    let mut config = base_config();
    config.code_ttl_secs = 1;
    let state = setup_state(config);
    let client = seed_client(&state, ClientType::PUBLIC).await;
    let user = seed_user(&state).await;

    let code = state
        .auth_code_service
        .issue_code(&client, user.id, &pkce_request())
        .await
        .unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(1100)).await;

    let error = state
        .auth_code_service
        .redeem_code(&code, &client, "https://app.test/cb", Some(PKCE_VERIFIER))
        .await
        .unwrap_err();
    assert_eq!(error.oauth_code().as_str(), "invalid_grant");
}

// ============================================================================
// 令牌格式与严格过期
// ============================================================================

#[tokio::test]
async fn test_opaque_token_round_trip() {
    let mut config = base_config();
    config.access_token_format = AccessTokenFormat::Opaque;
    let state = setup_state(config);
    let client = seed_client(&state, ClientType::CONFIDENTIAL).await;
    let user = seed_user(&state).await;

    let pair = state
        .token_service
        .mint(&client, Some(user.id), Some("read".to_string()), None)
        .await
        .unwrap();

    // opaque tokens carry no dots; they are not JWTs
    assert!(!pair.access_token.contains('.'));

    let validated = state
        .token_service
        .validate_access_token(&pair.access_token)
        .await
        .unwrap();
    assert_eq!(validated.user_id, Some(user.id));
}

#[tokio::test]
async fn test_jwt_access_token_carries_expected_claims() {
    let state = setup_state(base_config());
    let client = seed_client(&state, ClientType::CONFIDENTIAL).await;
    let user = seed_user(&state).await;

    let pair = state
        .token_service
        .mint(&client, Some(user.id), Some("read".to_string()), None)
        .await
        .unwrap();

    let claims: oauth_core::crypto::jwt::AccessTokenClaims = state
        .crypto
        .verify_local_jwt(&pair.access_token, Some(&client.client_id))
        .unwrap();
    assert_eq!(claims.iss, "https://auth.test");
    assert_eq!(claims.sub, Some(user.id.to_string()));
    assert_eq!(claims.scope.as_deref(), Some("read"));
}

#[tokio::test]
async fn test_tampered_jwt_rejected_by_validate() {
    let state = setup_state(base_config());
    let client = seed_client(&state, ClientType::CONFIDENTIAL).await;
    let user = seed_user(&state).await;

    let pair = state
        .token_service
        .mint(&client, Some(user.id), Some("read".to_string()), None)
        .await
        .unwrap();

    // flip a character inside the payload segment
    let mut parts: Vec<String> = pair.access_token.split('.').map(String::from).collect();
    let mut payload: Vec<u8> = parts[1].clone().into_bytes();
    payload[0] = if payload[0] == b'A' { b'B' } else { b'A' };
    parts[1] = String::from_utf8(payload).unwrap();
    let tampered = parts.join(".");

    let result = state.token_service.validate_access_token(&tampered).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_expiry_is_strict() {
    let mut config = base_config();
    config.access_token_format = AccessTokenFormat::Opaque;
    let state = setup_state(config);
    let client = seed_client(&state, ClientType::CONFIDENTIAL).await;
    let user = seed_user(&state).await;

    // a row whose expires_at is now (or before) is invalid; only a strictly
    // future expiry passes
    let now = Utc::now();
    let at_boundary = AccessToken {
        id: Uuid::new_v4(),
        token: "boundary-token".to_string(),
        client_id: client.id,
        user_id: Some(user.id),
        expires_at: now,
        scope: None,
        created_at: now - Duration::hours(1),
        updated_at: now - Duration::hours(1),
    };
    state.store.create_access_token(&at_boundary).await.unwrap();

    let result = state
        .token_service
        .validate_access_token("boundary-token")
        .await;
    assert!(result.is_err());

    let alive = AccessToken {
        id: Uuid::new_v4(),
        token: "alive-token".to_string(),
        client_id: client.id,
        user_id: Some(user.id),
        expires_at: now + Duration::hours(1),
        scope: None,
        created_at: now,
        updated_at: now,
    };
    state.store.create_access_token(&alive).await.unwrap();
    assert!(state
        .token_service
        .validate_access_token("alive-token")
        .await
        .is_ok());
}

// ============================================================================
// 清理与内省
// ============================================================================

#[tokio::test]
async fn test_sweep_expired_is_idempotent() {
    let mut config = base_config();
    config.access_token_format = AccessTokenFormat::Opaque;
    let state = setup_state(config);
    let client = seed_client(&state, ClientType::CONFIDENTIAL).await;
    let user = seed_user(&state).await;

    let now = Utc::now();
    let stale = AccessToken {
        id: Uuid::new_v4(),
        token: "stale".to_string(),
        client_id: client.id,
        user_id: Some(user.id),
        expires_at: now - Duration::minutes(5),
        scope: None,
        created_at: now - Duration::hours(2),
        updated_at: now - Duration::hours(2),
    };
    state.store.create_access_token(&stale).await.unwrap();

    let first = state.sweep_expired().await.unwrap();
    assert_eq!(first.access_tokens, 1);

    let second = state.sweep_expired().await.unwrap();
    assert_eq!(second.access_tokens, 0);
    assert_eq!(second.codes, 0);
    assert_eq!(second.refresh_tokens, 0);
}

#[tokio::test]
async fn test_introspection_shapes() {
    let state = setup_state(base_config());
    let client = seed_client(&state, ClientType::CONFIDENTIAL).await;
    let user = seed_user(&state).await;

    let pair = state
        .token_service
        .mint(&client, Some(user.id), Some("read".to_string()), None)
        .await
        .unwrap();

    let active = state.token_service.introspect(&pair.access_token).await;
    assert!(active.active);
    assert_eq!(active.scope.as_deref(), Some("read"));
    assert_eq!(active.client_id.as_deref(), Some(client.client_id.as_str()));
    assert_eq!(active.username.as_deref(), Some(user.username.as_str()));
    assert_eq!(active.sub.as_deref(), Some(user.id.to_string().as_str()));
    assert!(active.exp.is_some());
    assert!(active.iat.is_some());

    // unknown tokens reveal nothing beyond inactivity
    let unknown = state.token_service.introspect("never-issued").await;
    assert!(!unknown.active);
    assert!(unknown.scope.is_none());
    assert!(unknown.client_id.is_none());
    assert!(unknown.sub.is_none());

    // a live refresh token also introspects as active
    let refresh = state
        .token_service
        .introspect(pair.refresh_token.as_deref().unwrap())
        .await;
    assert!(refresh.active);
}

#[tokio::test]
async fn test_introspection_after_revocation() {
    let state = setup_state(base_config());
    let client = seed_client(&state, ClientType::CONFIDENTIAL).await;
    let user = seed_user(&state).await;

    let pair = state
        .token_service
        .mint(&client, Some(user.id), Some("read".to_string()), None)
        .await
        .unwrap();

    state
        .token_service
        .revoke(&pair.access_token, None)
        .await
        .unwrap();

    let after = state.token_service.introspect(&pair.access_token).await;
    assert!(!after.active);
}

#[tokio::test]
async fn test_introspect_endpoint_requires_client_auth() {
    let state = setup_state(base_config());
    let client = seed_client(&state, ClientType::CONFIDENTIAL).await;
    // confidential clients cannot introspect anonymously
    let error = state
        .handle_introspect(&IntrospectRequest {
            token: "whatever".to_string(),
            client_id: Some(client.client_id.clone()),
            ..IntrospectRequest::default()
        })
        .await
        .unwrap_err();
    assert_eq!(error.status, 401);
    assert_eq!(error.body.error, "invalid_client");
}

// ============================================================================
// ID Token (OpenID Connect)
// ============================================================================

#[tokio::test]
async fn test_id_token_issued_for_openid_scope() {
    let state = setup_state(base_config());
    let client = seed_client(&state, ClientType::PUBLIC).await;
    let user = seed_user(&state).await;

    let request = CodeRequest {
        scope: Some("openid read".to_string()),
        nonce: Some("n-0S6_WzA2Mj".to_string()),
        ..pkce_request()
    };
    let code = state
        .auth_code_service
        .issue_code(&client, user.id, &request)
        .await
        .unwrap();

    let response = state
        .handle_token(&TokenRequest {
            grant_type: "authorization_code".to_string(),
            code: Some(code),
            redirect_uri: Some("https://app.test/cb".to_string()),
            code_verifier: Some(PKCE_VERIFIER.to_string()),
            client_id: Some(client.client_id.clone()),
            ..TokenRequest::default()
        })
        .await
        .unwrap();

    let id_token = response.id_token.expect("openid scope yields an id_token");
    let claims: oauth_core::crypto::jwt::IdTokenClaims = state
        .crypto
        .verify_local_jwt(&id_token, Some(&client.client_id))
        .unwrap();
    assert_eq!(claims.sub, user.id.to_string());
    assert_eq!(claims.nonce.as_deref(), Some("n-0S6_WzA2Mj"));
    assert_eq!(claims.preferred_username.as_deref(), Some(user.username.as_str()));
}
