use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 受保护资源类别，对应 `resources` 表。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Resource {
    pub id: Uuid,
    /// Stable unique name, e.g. `billing` or `reports`.
    pub name: String,
    pub description: Option<String>,
}

impl Resource {
    pub fn new(name: impl Into<String>, description: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description,
        }
    }
}

/// 代表系统中的一个权限（动作），对应 `permissions` 表。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Permission {
    pub id: Uuid,
    /// Unique action verb, typically `read`, `write` or `admin`.
    pub name: String,
    pub description: Option<String>,
}

impl Permission {
    pub fn new(name: impl Into<String>, description: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description,
        }
    }
}

/// Junction row granting `(user, resource, permission)`.
///
/// The triple is unique. Existence of the row is the grant; absence means
/// deny. There is no negative grant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserResourcePermission {
    pub id: Uuid,
    pub user_id: Uuid,
    pub resource_id: Uuid,
    pub permission_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserResourcePermission {
    pub fn new(user_id: Uuid, resource_id: Uuid, permission_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            resource_id,
            permission_id,
            created_at: now,
            updated_at: now,
        }
    }
}
