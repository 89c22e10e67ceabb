//! The persistence port.
//!
//! The core never talks to a database driver; it sees this trait. A
//! relational implementation lives with the deployment, the in-memory
//! [`MemoryStore`] backs tests and single-process setups.

pub mod memory;

pub use memory::MemoryStore;

use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use oauth_models::{
    AccessToken, AuthorizationCode, Client, Permission, RefreshToken, Resource, User,
    UserResourcePermission,
};
use uuid::Uuid;

/// Row counts removed by an expiry sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepCounts {
    pub codes: u64,
    pub access_tokens: u64,
    pub refresh_tokens: u64,
}

/// Transactional persistence for users, clients, codes, tokens, resources
/// and permissions.
///
/// Contract notes:
/// - unique columns (`username`, `client_id`, `code`, token strings, resource
///   and permission names, the grant triple) fail inserts with
///   [`StoreError::Conflict`];
/// - `consume_code` and `rotate_refresh_token` are linearizable per row: of
///   two concurrent calls on the same string, exactly one succeeds and the
///   other sees [`StoreError::NotFound`];
/// - deleting a parent row cascades over everything it owns;
/// - cancellation is the future-drop contract: an implementation must not
///   leave row locks behind when a call is dropped mid-flight.
#[async_trait]
pub trait Store: Send + Sync {
    // --- users ---
    async fn create_user(&self, user: &User) -> Result<(), StoreError>;
    async fn get_user(&self, id: Uuid) -> Result<Option<User>, StoreError>;
    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>, StoreError>;
    async fn list_users(&self) -> Result<Vec<User>, StoreError>;
    async fn update_user(&self, user: &User) -> Result<(), StoreError>;
    async fn delete_user(&self, id: Uuid) -> Result<(), StoreError>;

    // --- clients ---
    async fn create_client(&self, client: &Client) -> Result<(), StoreError>;
    async fn get_client(&self, id: Uuid) -> Result<Option<Client>, StoreError>;
    async fn get_client_by_client_id(&self, client_id: &str)
        -> Result<Option<Client>, StoreError>;
    async fn list_clients(&self) -> Result<Vec<Client>, StoreError>;
    async fn update_client(&self, client: &Client) -> Result<(), StoreError>;
    async fn delete_client(&self, id: Uuid) -> Result<(), StoreError>;

    // --- authorization codes ---
    /// Inserts the code row; [`StoreError::Conflict`] if the code string
    /// already exists. Relied on for idempotent mint-or-fail.
    async fn create_code_if_absent(&self, code: &AuthorizationCode) -> Result<(), StoreError>;

    /// Reads and deletes the code row in one step. This is the anti-replay
    /// primitive: the first caller gets the row, everyone after gets
    /// [`StoreError::NotFound`].
    async fn consume_code(&self, code: &str) -> Result<AuthorizationCode, StoreError>;

    // --- tokens ---
    async fn create_access_token(&self, token: &AccessToken) -> Result<(), StoreError>;
    async fn get_access_token(&self, token: &str) -> Result<Option<AccessToken>, StoreError>;
    async fn delete_access_token(&self, token: &str) -> Result<(), StoreError>;

    async fn create_refresh_token(&self, token: &RefreshToken) -> Result<(), StoreError>;
    async fn get_refresh_token(&self, token: &str) -> Result<Option<RefreshToken>, StoreError>;
    async fn delete_refresh_token(&self, token: &str) -> Result<(), StoreError>;

    /// In one transaction: delete `old_token`, insert `new_refresh`, insert
    /// `new_access`. Fails atomically: a conflict on either insert leaves
    /// the old row in place.
    async fn rotate_refresh_token(
        &self,
        old_token: &str,
        new_refresh: &RefreshToken,
        new_access: &AccessToken,
    ) -> Result<(), StoreError>;

    /// Deletes every access and refresh token belonging to the user.
    /// Returns the number of rows removed.
    async fn revoke_all_for_user(&self, user_id: Uuid) -> Result<u64, StoreError>;

    /// Bulk-deletes codes and tokens with `expires_at < now`. Idempotent.
    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<SweepCounts, StoreError>;

    // --- resources & permissions ---
    async fn create_resource(&self, resource: &Resource) -> Result<(), StoreError>;
    async fn get_resource_by_name(&self, name: &str) -> Result<Option<Resource>, StoreError>;
    async fn list_resources(&self) -> Result<Vec<Resource>, StoreError>;
    async fn delete_resource(&self, id: Uuid) -> Result<(), StoreError>;

    async fn create_permission(&self, permission: &Permission) -> Result<(), StoreError>;
    async fn get_permission_by_name(&self, name: &str) -> Result<Option<Permission>, StoreError>;
    async fn list_permissions(&self) -> Result<Vec<Permission>, StoreError>;
    async fn delete_permission(&self, id: Uuid) -> Result<(), StoreError>;

    /// Inserts the grant; [`StoreError::Conflict`] if the triple exists.
    async fn grant_permission(&self, grant: &UserResourcePermission) -> Result<(), StoreError>;
    async fn revoke_permission(
        &self,
        user_id: Uuid,
        resource_id: Uuid,
        permission_id: Uuid,
    ) -> Result<(), StoreError>;
    async fn permission_exists(
        &self,
        user_id: Uuid,
        resource_id: Uuid,
        permission_id: Uuid,
    ) -> Result<bool, StoreError>;
    /// `(resource name, permission name)` pairs granted to the user.
    async fn list_permissions_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<(String, String)>, StoreError>;

    /// Monotonic counter bumped on every write to resources, permissions or
    /// grants (and on cascades that remove grants). The permission evaluator
    /// compares it on lookup instead of subscribing to change events.
    fn permission_generation(&self) -> u64;
}
