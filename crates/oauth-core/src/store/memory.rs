//! In-memory store implementation.
//!
//! Suitable for tests and single-process deployments. All tables live under
//! one `RwLock`, which makes every operation trivially linearizable; the
//! lock is held only inside a single call, never across await points of the
//! services above.

use super::{Store, SweepCounts};
use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use oauth_models::{
    AccessToken, AuthorizationCode, Client, Permission, RefreshToken, Resource, User,
    UserResourcePermission,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    clients: HashMap<Uuid, Client>,
    /// keyed by the opaque `code` string
    codes: HashMap<String, AuthorizationCode>,
    /// keyed by the token string (JWT mode stores the jti here)
    access_tokens: HashMap<String, AccessToken>,
    refresh_tokens: HashMap<String, RefreshToken>,
    resources: HashMap<Uuid, Resource>,
    permissions: HashMap<Uuid, Permission>,
    grants: HashMap<(Uuid, Uuid, Uuid), UserResourcePermission>,
}

pub struct MemoryStore {
    tables: RwLock<Tables>,
    generation: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            generation: AtomicU64::new(0),
        }
    }

    fn bump_generation(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_user(&self, user: &User) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if tables.users.values().any(|u| u.username == user.username) {
            return Err(StoreError::Conflict(format!(
                "username '{}' already exists",
                user.username
            )));
        }
        if tables.users.insert(user.id, user.clone()).is_some() {
            return Err(StoreError::Conflict(format!("user id {}", user.id)));
        }
        Ok(())
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.tables.read().await.users.get(&id).cloned())
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        Ok(self
            .tables
            .read()
            .await
            .users
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        Ok(self.tables.read().await.users.values().cloned().collect())
    }

    async fn update_user(&self, user: &User) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if !tables.users.contains_key(&user.id) {
            return Err(StoreError::NotFound);
        }
        tables.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn delete_user(&self, id: Uuid) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if tables.users.remove(&id).is_none() {
            return Err(StoreError::NotFound);
        }
        // cascade: the user owns its codes, tokens and grants
        tables.codes.retain(|_, c| c.user_id != Some(id));
        tables.access_tokens.retain(|_, t| t.user_id != Some(id));
        tables.refresh_tokens.retain(|_, t| t.user_id != Some(id));
        let before = tables.grants.len();
        tables.grants.retain(|_, g| g.user_id != id);
        if tables.grants.len() != before {
            self.bump_generation();
        }
        Ok(())
    }

    async fn create_client(&self, client: &Client) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if tables
            .clients
            .values()
            .any(|c| c.client_id == client.client_id)
        {
            return Err(StoreError::Conflict(format!(
                "client_id '{}' already exists",
                client.client_id
            )));
        }
        tables.clients.insert(client.id, client.clone());
        Ok(())
    }

    async fn get_client(&self, id: Uuid) -> Result<Option<Client>, StoreError> {
        Ok(self.tables.read().await.clients.get(&id).cloned())
    }

    async fn get_client_by_client_id(
        &self,
        client_id: &str,
    ) -> Result<Option<Client>, StoreError> {
        Ok(self
            .tables
            .read()
            .await
            .clients
            .values()
            .find(|c| c.client_id == client_id)
            .cloned())
    }

    async fn list_clients(&self) -> Result<Vec<Client>, StoreError> {
        Ok(self.tables.read().await.clients.values().cloned().collect())
    }

    async fn update_client(&self, client: &Client) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if !tables.clients.contains_key(&client.id) {
            return Err(StoreError::NotFound);
        }
        tables.clients.insert(client.id, client.clone());
        Ok(())
    }

    async fn delete_client(&self, id: Uuid) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if tables.clients.remove(&id).is_none() {
            return Err(StoreError::NotFound);
        }
        tables.codes.retain(|_, c| c.client_id != id);
        tables.access_tokens.retain(|_, t| t.client_id != id);
        tables.refresh_tokens.retain(|_, t| t.client_id != id);
        Ok(())
    }

    async fn create_code_if_absent(&self, code: &AuthorizationCode) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if tables.codes.contains_key(&code.code) {
            return Err(StoreError::Conflict("code string already exists".to_string()));
        }
        tables.codes.insert(code.code.clone(), code.clone());
        Ok(())
    }

    async fn consume_code(&self, code: &str) -> Result<AuthorizationCode, StoreError> {
        let mut tables = self.tables.write().await;
        tables.codes.remove(code).ok_or(StoreError::NotFound)
    }

    async fn create_access_token(&self, token: &AccessToken) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if tables.access_tokens.contains_key(&token.token) {
            return Err(StoreError::Conflict(
                "access token string already exists".to_string(),
            ));
        }
        tables.access_tokens.insert(token.token.clone(), token.clone());
        Ok(())
    }

    async fn get_access_token(&self, token: &str) -> Result<Option<AccessToken>, StoreError> {
        Ok(self.tables.read().await.access_tokens.get(token).cloned())
    }

    async fn delete_access_token(&self, token: &str) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        tables
            .access_tokens
            .remove(token)
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }

    async fn create_refresh_token(&self, token: &RefreshToken) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if tables.refresh_tokens.contains_key(&token.token) {
            return Err(StoreError::Conflict(
                "refresh token string already exists".to_string(),
            ));
        }
        tables
            .refresh_tokens
            .insert(token.token.clone(), token.clone());
        Ok(())
    }

    async fn get_refresh_token(&self, token: &str) -> Result<Option<RefreshToken>, StoreError> {
        Ok(self.tables.read().await.refresh_tokens.get(token).cloned())
    }

    async fn delete_refresh_token(&self, token: &str) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        tables
            .refresh_tokens
            .remove(token)
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }

    async fn rotate_refresh_token(
        &self,
        old_token: &str,
        new_refresh: &RefreshToken,
        new_access: &AccessToken,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if !tables.refresh_tokens.contains_key(old_token) {
            return Err(StoreError::NotFound);
        }
        // uniqueness checked before any mutation so a conflict fails the
        // whole rotation and leaves the old row intact
        if tables.refresh_tokens.contains_key(&new_refresh.token) {
            return Err(StoreError::Conflict(
                "refresh token string already exists".to_string(),
            ));
        }
        if tables.access_tokens.contains_key(&new_access.token) {
            return Err(StoreError::Conflict(
                "access token string already exists".to_string(),
            ));
        }
        tables.refresh_tokens.remove(old_token);
        tables
            .refresh_tokens
            .insert(new_refresh.token.clone(), new_refresh.clone());
        tables
            .access_tokens
            .insert(new_access.token.clone(), new_access.clone());
        Ok(())
    }

    async fn revoke_all_for_user(&self, user_id: Uuid) -> Result<u64, StoreError> {
        let mut tables = self.tables.write().await;
        let before = tables.access_tokens.len() + tables.refresh_tokens.len();
        tables.access_tokens.retain(|_, t| t.user_id != Some(user_id));
        tables
            .refresh_tokens
            .retain(|_, t| t.user_id != Some(user_id));
        let after = tables.access_tokens.len() + tables.refresh_tokens.len();
        Ok((before - after) as u64)
    }

    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<SweepCounts, StoreError> {
        let mut tables = self.tables.write().await;
        let mut counts = SweepCounts::default();

        let before = tables.codes.len();
        tables.codes.retain(|_, c| c.expires_at >= now);
        counts.codes = (before - tables.codes.len()) as u64;

        let before = tables.access_tokens.len();
        tables.access_tokens.retain(|_, t| t.expires_at >= now);
        counts.access_tokens = (before - tables.access_tokens.len()) as u64;

        let before = tables.refresh_tokens.len();
        tables.refresh_tokens.retain(|_, t| t.expires_at >= now);
        counts.refresh_tokens = (before - tables.refresh_tokens.len()) as u64;

        Ok(counts)
    }

    async fn create_resource(&self, resource: &Resource) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if tables.resources.values().any(|r| r.name == resource.name) {
            return Err(StoreError::Conflict(format!(
                "resource '{}' already exists",
                resource.name
            )));
        }
        tables.resources.insert(resource.id, resource.clone());
        drop(tables);
        self.bump_generation();
        Ok(())
    }

    async fn get_resource_by_name(&self, name: &str) -> Result<Option<Resource>, StoreError> {
        Ok(self
            .tables
            .read()
            .await
            .resources
            .values()
            .find(|r| r.name == name)
            .cloned())
    }

    async fn list_resources(&self) -> Result<Vec<Resource>, StoreError> {
        Ok(self
            .tables
            .read()
            .await
            .resources
            .values()
            .cloned()
            .collect())
    }

    async fn delete_resource(&self, id: Uuid) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if tables.resources.remove(&id).is_none() {
            return Err(StoreError::NotFound);
        }
        tables.grants.retain(|_, g| g.resource_id != id);
        drop(tables);
        self.bump_generation();
        Ok(())
    }

    async fn create_permission(&self, permission: &Permission) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if tables
            .permissions
            .values()
            .any(|p| p.name == permission.name)
        {
            return Err(StoreError::Conflict(format!(
                "permission '{}' already exists",
                permission.name
            )));
        }
        tables.permissions.insert(permission.id, permission.clone());
        drop(tables);
        self.bump_generation();
        Ok(())
    }

    async fn get_permission_by_name(&self, name: &str) -> Result<Option<Permission>, StoreError> {
        Ok(self
            .tables
            .read()
            .await
            .permissions
            .values()
            .find(|p| p.name == name)
            .cloned())
    }

    async fn list_permissions(&self) -> Result<Vec<Permission>, StoreError> {
        Ok(self
            .tables
            .read()
            .await
            .permissions
            .values()
            .cloned()
            .collect())
    }

    async fn delete_permission(&self, id: Uuid) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if tables.permissions.remove(&id).is_none() {
            return Err(StoreError::NotFound);
        }
        tables.grants.retain(|_, g| g.permission_id != id);
        drop(tables);
        self.bump_generation();
        Ok(())
    }

    async fn grant_permission(&self, grant: &UserResourcePermission) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let key = (grant.user_id, grant.resource_id, grant.permission_id);
        if tables.grants.contains_key(&key) {
            return Err(StoreError::Conflict("grant triple already exists".to_string()));
        }
        tables.grants.insert(key, grant.clone());
        drop(tables);
        self.bump_generation();
        Ok(())
    }

    async fn revoke_permission(
        &self,
        user_id: Uuid,
        resource_id: Uuid,
        permission_id: Uuid,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let removed = tables
            .grants
            .remove(&(user_id, resource_id, permission_id))
            .is_some();
        drop(tables);
        if !removed {
            return Err(StoreError::NotFound);
        }
        self.bump_generation();
        Ok(())
    }

    async fn permission_exists(
        &self,
        user_id: Uuid,
        resource_id: Uuid,
        permission_id: Uuid,
    ) -> Result<bool, StoreError> {
        Ok(self
            .tables
            .read()
            .await
            .grants
            .contains_key(&(user_id, resource_id, permission_id)))
    }

    async fn list_permissions_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<(String, String)>, StoreError> {
        let tables = self.tables.read().await;
        let mut pairs = Vec::new();
        for grant in tables.grants.values().filter(|g| g.user_id == user_id) {
            let resource = tables.resources.get(&grant.resource_id);
            let permission = tables.permissions.get(&grant.permission_id);
            if let (Some(resource), Some(permission)) = (resource, permission) {
                pairs.push((resource.name.clone(), permission.name.clone()));
            }
        }
        Ok(pairs)
    }

    fn permission_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}
