use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Represents an access token row, mapping to the `access_tokens` table.
///
/// For opaque tokens `token` is the bearer string itself. For JWT access
/// tokens only the `jti` claim is persisted here (as `token`) so that
/// revocation can delete the row without storing the signed credential.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccessToken {
    pub id: Uuid,
    pub token: String,
    pub client_id: Uuid,
    /// `None` exactly when the token was minted via `client_credentials`.
    pub user_id: Option<Uuid>,
    pub expires_at: DateTime<Utc>,
    pub scope: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Represents a refresh token row, mapping to the `refresh_tokens` table.
///
/// Rotated on use: redemption deletes this row and inserts its successor in
/// the same store operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RefreshToken {
    pub id: Uuid,
    pub token: String,
    pub client_id: Uuid,
    pub user_id: Option<Uuid>,
    pub expires_at: DateTime<Utc>,
    /// Scope granted at the original authorization; re-minted access tokens
    /// inherit it.
    pub scope: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
