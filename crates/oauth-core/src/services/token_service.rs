use crate::config::{AccessTokenFormat, Config, RefreshRotation};
use crate::crypto::jwt::{AccessTokenClaims, IdTokenClaims};
use crate::crypto::{CryptoProvider, ACCESS_TOKEN_BYTES};
use crate::error::{CryptoError, ServiceError, StoreError};
use crate::store::Store;
use crate::utils::validation;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use oauth_models::{AccessToken, Client, RefreshToken};
use serde::Serialize;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Represents the pair of tokens issued by a grant.
#[derive(Debug)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub id_token: Option<String>,
    pub expires_in: u64,
    /// The scope the pair was granted under, echoed in the response envelope.
    pub scope: Option<String>,
}

/// What a validated access token binds.
#[derive(Debug, Clone)]
pub struct ValidatedToken {
    pub client_id: Uuid,
    pub user_id: Option<Uuid>,
    pub scope: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub issued_at: DateTime<Utc>,
}

/// RFC 7662 introspection response. `active: false` carries nothing else.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Introspection {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<usize>,
}

impl Introspection {
    pub fn inactive() -> Self {
        Self {
            active: false,
            scope: None,
            client_id: None,
            username: None,
            sub: None,
            exp: None,
            iat: None,
        }
    }
}

/// Advisory hint at the revocation endpoint (RFC 7009 section 2.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenTypeHint {
    AccessToken,
    RefreshToken,
}

impl FromStr for TokenTypeHint {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "access_token" => Ok(TokenTypeHint::AccessToken),
            "refresh_token" => Ok(TokenTypeHint::RefreshToken),
            _ => Err(()),
        }
    }
}

#[async_trait]
pub trait TokenService: Send + Sync {
    /// Mints an access token (and, for user-bound grants, a refresh token)
    /// for the client. `user_id` is `None` exactly for `client_credentials`.
    async fn mint(
        &self,
        client: &Client,
        user_id: Option<Uuid>,
        scope: Option<String>,
        nonce: Option<String>,
    ) -> Result<TokenPair, ServiceError>;

    /// Validates a presented access token: signature and claims for JWTs,
    /// then the revocation row; plain row lookup for opaque tokens. Expiry
    /// is strict: a token exactly at `expires_at` is invalid.
    async fn validate_access_token(&self, presented: &str) -> Result<ValidatedToken, ServiceError>;

    /// Redeems a refresh token for a new pair. Under rotation the old row
    /// dies and the new rows appear in one store transaction; of two
    /// concurrent redemptions exactly one wins.
    async fn refresh(&self, presented: &str, client: &Client) -> Result<TokenPair, ServiceError>;

    /// Revokes a token (access or refresh token).
    ///
    /// Per RFC 7009 revocation of an unknown or already-revoked token is a
    /// success; the hint is advisory and a wrong hint still revokes.
    async fn revoke(&self, token: &str, hint: Option<TokenTypeHint>) -> Result<(), ServiceError>;

    /// RFC 7662 introspection. A pure function of store state and the
    /// clock; anything unknown, expired or unreadable is `active: false`
    /// with no further detail.
    async fn introspect(&self, token: &str) -> Introspection;
}

/// Tombstone left behind by a rotation, for stolen-token replay detection.
struct Tombstone {
    user_id: Option<Uuid>,
    expires_at: Instant,
}

pub struct TokenServiceImpl {
    store: Arc<dyn Store>,
    crypto: Arc<CryptoProvider>,
    config: Arc<Config>,
    tombstones: RwLock<HashMap<String, Tombstone>>,
}

impl TokenServiceImpl {
    pub fn new(store: Arc<dyn Store>, crypto: Arc<CryptoProvider>, config: Arc<Config>) -> Self {
        Self {
            store,
            crypto,
            config,
            tombstones: RwLock::new(HashMap::new()),
        }
    }

    /// Builds the access token row plus (for JWTs) the signed credential.
    fn build_access(
        &self,
        client: &Client,
        user_id: Option<Uuid>,
        scope: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(AccessToken, String), ServiceError> {
        let ttl = Duration::seconds(self.config.access_token_ttl_secs as i64);
        let id = Uuid::new_v4();
        let expires_at = now + ttl;

        match self.config.access_token_format {
            AccessTokenFormat::Jwt => {
                // the row stores only the jti; revocation deletes the row,
                // validation checks it still exists
                let jti = id.to_string();
                let claims = AccessTokenClaims {
                    iss: self.config.issuer.clone(),
                    sub: user_id.map(|u| u.to_string()),
                    aud: client.client_id.clone(),
                    exp: expires_at.timestamp() as usize,
                    iat: now.timestamp() as usize,
                    jti: jti.clone(),
                    scope: scope.map(|s| s.to_string()),
                };
                let signed = self.crypto.sign_jwt(&claims, None)?;
                let row = AccessToken {
                    id,
                    token: jti,
                    client_id: client.id,
                    user_id,
                    expires_at,
                    scope: scope.map(|s| s.to_string()),
                    created_at: now,
                    updated_at: now,
                };
                Ok((row, signed))
            }
            AccessTokenFormat::Opaque => {
                let token = self.crypto.random_token(ACCESS_TOKEN_BYTES);
                let row = AccessToken {
                    id,
                    token: token.clone(),
                    client_id: client.id,
                    user_id,
                    expires_at,
                    scope: scope.map(|s| s.to_string()),
                    created_at: now,
                    updated_at: now,
                };
                Ok((row, token))
            }
        }
    }

    fn build_refresh(
        &self,
        client: &Client,
        user_id: Option<Uuid>,
        scope: Option<&str>,
        now: DateTime<Utc>,
    ) -> RefreshToken {
        RefreshToken {
            id: Uuid::new_v4(),
            token: self.crypto.random_token(ACCESS_TOKEN_BYTES),
            client_id: client.id,
            user_id,
            expires_at: now + Duration::seconds(self.config.refresh_token_ttl_secs as i64),
            scope: scope.map(|s| s.to_string()),
            created_at: now,
            updated_at: now,
        }
    }

    async fn build_id_token(
        &self,
        client: &Client,
        user_id: Uuid,
        nonce: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Option<String>, ServiceError> {
        let user = match self.store.get_user(user_id).await? {
            Some(user) => user,
            None => return Ok(None),
        };

        let iat = now.timestamp() as usize;
        let claims = IdTokenClaims {
            iss: self.config.issuer.clone(),
            sub: user.id.to_string(),
            aud: client.client_id.clone(),
            exp: (now + Duration::seconds(self.config.access_token_ttl_secs as i64)).timestamp()
                as usize,
            iat,
            auth_time: Some(iat),
            nonce: nonce.map(|n| n.to_string()),
            preferred_username: Some(user.username),
        };
        Ok(Some(self.crypto.sign_jwt(&claims, None)?))
    }

    /// Unique-insert with one fresh-random retry, then `server_error`.
    async fn persist_access(
        &self,
        client: &Client,
        user_id: Option<Uuid>,
        scope: Option<&str>,
    ) -> Result<(AccessToken, String), ServiceError> {
        let (row, credential) = self.build_access(client, user_id, scope, Utc::now())?;
        match self.store.create_access_token(&row).await {
            Ok(()) => Ok((row, credential)),
            Err(StoreError::Conflict(_)) => {
                tracing::warn!("access token collision; retrying with a fresh random");
                let (row, credential) = self.build_access(client, user_id, scope, Utc::now())?;
                match self.store.create_access_token(&row).await {
                    Ok(()) => Ok((row, credential)),
                    Err(StoreError::Conflict(_)) => Err(ServiceError::Conflict(
                        "access token collision persisted across retry".to_string(),
                    )),
                    Err(e) => Err(e.into()),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn persist_refresh(
        &self,
        client: &Client,
        user_id: Option<Uuid>,
        scope: Option<&str>,
    ) -> Result<RefreshToken, ServiceError> {
        let row = self.build_refresh(client, user_id, scope, Utc::now());
        match self.store.create_refresh_token(&row).await {
            Ok(()) => Ok(row),
            Err(StoreError::Conflict(_)) => {
                tracing::warn!("refresh token collision; retrying with a fresh random");
                let row = self.build_refresh(client, user_id, scope, Utc::now());
                match self.store.create_refresh_token(&row).await {
                    Ok(()) => Ok(row),
                    Err(StoreError::Conflict(_)) => Err(ServiceError::Conflict(
                        "refresh token collision persisted across retry".to_string(),
                    )),
                    Err(e) => Err(e.into()),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn record_tombstone(&self, token: &str, user_id: Option<Uuid>) {
        if !self.config.refresh_reuse_detection {
            return;
        }
        let window = std::time::Duration::from_secs(self.config.replay_window_secs);
        let mut tombstones = self.tombstones.write().await;
        let now = Instant::now();
        tombstones.retain(|_, t| t.expires_at > now);
        tombstones.insert(
            token.to_string(),
            Tombstone {
                user_id,
                expires_at: now + window,
            },
        );
    }

    /// Stolen-token response: a refresh token that is gone from the store
    /// but was alive within the replay window means someone replayed it;
    /// nuke every credential the user holds.
    async fn check_replay(&self, presented: &str) -> Result<(), ServiceError> {
        if !self.config.refresh_reuse_detection {
            return Ok(());
        }
        let user_id = {
            let tombstones = self.tombstones.read().await;
            match tombstones.get(presented) {
                Some(t) if t.expires_at > Instant::now() => t.user_id,
                _ => return Ok(()),
            }
        };
        if let Some(user_id) = user_id {
            let revoked = self.store.revoke_all_for_user(user_id).await?;
            tracing::warn!(
                %user_id,
                revoked,
                "rotated refresh token replayed; revoked all tokens for user"
            );
        }
        Ok(())
    }
}

#[async_trait]
impl TokenService for TokenServiceImpl {
    async fn mint(
        &self,
        client: &Client,
        user_id: Option<Uuid>,
        scope: Option<String>,
        nonce: Option<String>,
    ) -> Result<TokenPair, ServiceError> {
        let (_, access_credential) = self
            .persist_access(client, user_id, scope.as_deref())
            .await?;

        let mut refresh_credential = None;
        let mut id_token = None;
        if let Some(user_id) = user_id {
            let refresh = self
                .persist_refresh(client, Some(user_id), scope.as_deref())
                .await?;
            refresh_credential = Some(refresh.token);

            if scope
                .as_deref()
                .is_some_and(|s| validation::scope_contains(s, "openid"))
            {
                id_token = self
                    .build_id_token(client, user_id, nonce.as_deref(), Utc::now())
                    .await?;
            }
        }

        Ok(TokenPair {
            access_token: access_credential,
            refresh_token: refresh_credential,
            id_token,
            expires_in: self.config.access_token_ttl_secs,
            scope,
        })
    }

    async fn validate_access_token(&self, presented: &str) -> Result<ValidatedToken, ServiceError> {
        let row = match self.config.access_token_format {
            AccessTokenFormat::Jwt => {
                let claims: AccessTokenClaims = self
                    .crypto
                    .verify_local_jwt(presented, None)
                    .map_err(|e| {
                        tracing::debug!(error = %e, "access token JWT rejected");
                        ServiceError::InvalidToken("invalid or expired token".to_string())
                    })?;
                // revocation check: the jti row must still exist
                self.store
                    .get_access_token(&claims.jti)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::InvalidToken("token has been revoked".to_string())
                    })?
            }
            AccessTokenFormat::Opaque => self
                .store
                .get_access_token(presented)
                .await?
                .ok_or_else(|| ServiceError::InvalidToken("unknown token".to_string()))?,
        };

        // strict: a token exactly at expires_at is already invalid
        if row.expires_at <= Utc::now() {
            return Err(ServiceError::InvalidToken("token expired".to_string()));
        }

        Ok(ValidatedToken {
            client_id: row.client_id,
            user_id: row.user_id,
            scope: row.scope,
            expires_at: row.expires_at,
            issued_at: row.created_at,
        })
    }

    async fn refresh(&self, presented: &str, client: &Client) -> Result<TokenPair, ServiceError> {
        let row = match self.store.get_refresh_token(presented).await? {
            Some(row) => row,
            None => {
                self.check_replay(presented).await?;
                return Err(ServiceError::InvalidGrant(
                    "invalid refresh token".to_string(),
                ));
            }
        };

        if row.expires_at <= Utc::now() {
            return Err(ServiceError::InvalidGrant("refresh token expired".to_string()));
        }
        if row.client_id != client.id {
            tracing::warn!(
                client_id = %client.client_id,
                "refresh token presented by a different client"
            );
            return Err(ServiceError::InvalidGrant(
                "refresh token was not issued to this client".to_string(),
            ));
        }

        match self.config.refresh_rotation {
            RefreshRotation::Always => {
                let now = Utc::now();
                let (access_row, access_credential) =
                    self.build_access(client, row.user_id, row.scope.as_deref(), now)?;
                let new_refresh =
                    self.build_refresh(client, row.user_id, row.scope.as_deref(), now);

                match self
                    .store
                    .rotate_refresh_token(presented, &new_refresh, &access_row)
                    .await
                {
                    Ok(()) => {}
                    // lost the race against a concurrent redemption
                    Err(StoreError::NotFound) => {
                        self.check_replay(presented).await?;
                        return Err(ServiceError::InvalidGrant(
                            "invalid refresh token".to_string(),
                        ));
                    }
                    Err(e) => return Err(e.into()),
                }
                self.record_tombstone(presented, row.user_id).await;

                Ok(TokenPair {
                    access_token: access_credential,
                    refresh_token: Some(new_refresh.token),
                    id_token: None,
                    expires_in: self.config.access_token_ttl_secs,
                    scope: row.scope,
                })
            }
            RefreshRotation::Never => {
                let (_, access_credential) = self
                    .persist_access(client, row.user_id, row.scope.as_deref())
                    .await?;
                // the old refresh row stays valid; nothing new to return
                Ok(TokenPair {
                    access_token: access_credential,
                    refresh_token: None,
                    id_token: None,
                    expires_in: self.config.access_token_ttl_secs,
                    scope: row.scope,
                })
            }
        }
    }

    async fn revoke(&self, token: &str, hint: Option<TokenTypeHint>) -> Result<(), ServiceError> {
        let try_refresh_first = matches!(hint, Some(TokenTypeHint::RefreshToken));

        if try_refresh_first && self.revoke_refresh(token).await? {
            return Ok(());
        }

        if self.revoke_access(token).await? {
            return Ok(());
        }

        if !try_refresh_first {
            self.revoke_refresh(token).await?;
        }

        // silent success either way (RFC 7009)
        Ok(())
    }

    async fn introspect(&self, token: &str) -> Introspection {
        match self.introspect_inner(token).await {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!(error = %e, "introspection failed; reporting inactive");
                Introspection::inactive()
            }
        }
    }
}

impl TokenServiceImpl {
    /// Removes the access token row for a presented credential. Returns
    /// whether a row was deleted.
    async fn revoke_access(&self, token: &str) -> Result<bool, ServiceError> {
        let row_key = match self.config.access_token_format {
            AccessTokenFormat::Opaque => token.to_string(),
            AccessTokenFormat::Jwt => {
                match self
                    .crypto
                    .verify_local_jwt::<AccessTokenClaims>(token, None)
                {
                    Ok(claims) => claims.jti,
                    // signature was valid, the token merely aged out; its
                    // row (if any) still deserves deletion
                    Err(CryptoError::TokenExpired) => {
                        match crate::crypto::jwt::peek_unverified_claims(token)
                            .ok()
                            .and_then(|claims| {
                                claims
                                    .get("jti")
                                    .and_then(serde_json::Value::as_str)
                                    .map(str::to_string)
                            }) {
                            Some(jti) => jti,
                            None => return Ok(false),
                        }
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "unverifiable token at revocation; ignoring");
                        return Ok(false);
                    }
                }
            }
        };

        match self.store.delete_access_token(&row_key).await {
            Ok(()) => {
                tracing::info!("access token revoked");
                Ok(true)
            }
            Err(StoreError::NotFound) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn revoke_refresh(&self, token: &str) -> Result<bool, ServiceError> {
        match self.store.delete_refresh_token(token).await {
            Ok(()) => {
                tracing::info!("refresh token revoked");
                Ok(true)
            }
            Err(StoreError::NotFound) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn introspect_inner(&self, token: &str) -> Result<Introspection, ServiceError> {
        if let Ok(validated) = self.validate_access_token(token).await {
            let client_id = match self.store.get_client(validated.client_id).await? {
                Some(client) => Some(client.client_id),
                None => None,
            };
            let username = match validated.user_id {
                Some(user_id) => self
                    .store
                    .get_user(user_id)
                    .await?
                    .map(|user| user.username),
                None => None,
            };
            return Ok(Introspection {
                active: true,
                scope: validated.scope,
                client_id,
                username,
                sub: validated.user_id.map(|u| u.to_string()),
                exp: Some(validated.expires_at.timestamp() as usize),
                iat: Some(validated.issued_at.timestamp() as usize),
            });
        }

        // not an access token; a live refresh token also introspects active
        if let Some(row) = self.store.get_refresh_token(token).await? {
            if row.expires_at > Utc::now() {
                let client_id = self
                    .store
                    .get_client(row.client_id)
                    .await?
                    .map(|client| client.client_id);
                let username = match row.user_id {
                    Some(user_id) => self
                        .store
                        .get_user(user_id)
                        .await?
                        .map(|user| user.username),
                    None => None,
                };
                return Ok(Introspection {
                    active: true,
                    scope: row.scope,
                    client_id,
                    username,
                    sub: row.user_id.map(|u| u.to_string()),
                    exp: Some(row.expires_at.timestamp() as usize),
                    iat: Some(row.created_at.timestamp() as usize),
                });
            }
        }

        Ok(Introspection::inactive())
    }
}
