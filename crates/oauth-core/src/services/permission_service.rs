use crate::cache::{PermissionCache, PermissionCacheKey};
use crate::error::ServiceError;
use crate::services::token_service::TokenService;
use crate::store::Store;
use crate::utils::validation;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Outcome of validating a bearer token against a `(resource, action)`.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessDecision {
    pub allowed: bool,
    pub user_id: Option<Uuid>,
    pub scope: Option<String>,
}

#[async_trait]
pub trait PermissionService: Send + Sync {
    /// Whether `(user, resource, permission)` is granted.
    ///
    /// Deny-by-default: an unknown resource or permission name is a plain
    /// `false`. A store failure is an `Err`; the caller must fail closed,
    /// never fall back to allow.
    async fn check(
        &self,
        user_id: Uuid,
        resource: &str,
        permission: &str,
    ) -> Result<bool, ServiceError>;

    /// Every `(resource, permission)` pair granted to the user.
    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<(String, String)>, ServiceError>;

    /// The resource-server entry: validate the bearer token and evaluate
    /// the permission in one call, so there is no gap between the two for
    /// revocation to race through.
    async fn authorize_bearer(
        &self,
        token: &str,
        resource: &str,
        permission: &str,
    ) -> Result<AccessDecision, ServiceError>;
}

pub struct PermissionServiceImpl {
    store: Arc<dyn Store>,
    token_service: Arc<dyn TokenService>,
    cache: PermissionCache,
}

impl PermissionServiceImpl {
    pub fn new(
        store: Arc<dyn Store>,
        token_service: Arc<dyn TokenService>,
        cache_capacity: usize,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            store,
            token_service,
            cache: PermissionCache::new(cache_capacity, cache_ttl),
        }
    }

    pub async fn cache_stats(&self) -> crate::cache::CacheStats {
        self.cache.stats().await
    }

    async fn check_uncached(
        &self,
        user_id: Uuid,
        resource: &str,
        permission: &str,
    ) -> Result<bool, ServiceError> {
        let resource_row = match self.store.get_resource_by_name(resource).await? {
            Some(row) => row,
            None => return Ok(false),
        };
        let permission_row = match self.store.get_permission_by_name(permission).await? {
            Some(row) => row,
            None => return Ok(false),
        };
        Ok(self
            .store
            .permission_exists(user_id, resource_row.id, permission_row.id)
            .await?)
    }
}

#[async_trait]
impl PermissionService for PermissionServiceImpl {
    async fn check(
        &self,
        user_id: Uuid,
        resource: &str,
        permission: &str,
    ) -> Result<bool, ServiceError> {
        let generation = self.store.permission_generation();
        let key = PermissionCacheKey {
            user_id,
            resource: resource.to_string(),
            permission: permission.to_string(),
        };

        if let Some(allowed) = self.cache.get(&key, generation).await {
            return Ok(allowed);
        }

        // store failures propagate: a decision we cannot compute is a deny
        // at the caller, not a cached value
        let allowed = self.check_uncached(user_id, resource, permission).await?;
        self.cache.insert(key, allowed, generation).await;
        Ok(allowed)
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<(String, String)>, ServiceError> {
        Ok(self.store.list_permissions_for_user(user_id).await?)
    }

    async fn authorize_bearer(
        &self,
        token: &str,
        resource: &str,
        permission: &str,
    ) -> Result<AccessDecision, ServiceError> {
        let validated = self.token_service.validate_access_token(token).await?;

        // scope label `resource:action` suffices on its own; otherwise the
        // grant triple must exist for the bound user
        let label = format!("{resource}:{permission}");
        let scope_allows = validated
            .scope
            .as_deref()
            .is_some_and(|scope| validation::scope_contains(scope, &label));

        let allowed = if scope_allows {
            true
        } else {
            match validated.user_id {
                Some(user_id) => self.check(user_id, resource, permission).await?,
                None => false,
            }
        };

        if !allowed {
            tracing::debug!(resource, permission, "bearer denied");
        }

        Ok(AccessDecision {
            allowed,
            user_id: validated.user_id,
            scope: validated.scope,
        })
    }
}
