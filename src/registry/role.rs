//! Role store (§3 `Role`, §4.9 role operations)

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::authz::RoleLookup;
use crate::error::{Result, TrustError};
use crate::event_bus::{topics, EventBus};

const FIND_ALL_CACHE_TTL: Duration = Duration::from_secs(60);

/// Role lifecycle status (§3).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RoleStatus {
    Active,
    Disabled,
}

/// A role definition (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    pub id: String,
    pub key: String,
    pub name: String,
    pub permission_keys: Vec<String>,
    pub status: RoleStatus,
    pub is_system: bool,
}

struct FindAllCache {
    roles: Vec<Role>,
    at: Instant,
}

/// In-memory role definitional store (C9 role half).
pub struct RoleRegistry {
    bus: Arc<dyn EventBus>,
    roles: RwLock<HashMap<String, Role>>,
    find_all_cache: RwLock<Option<FindAllCache>>,
}

impl RoleRegistry {
    /// Construct an empty registry seeded with the two mandatory system
    /// roles (`super_admin`, `admin`), each holding the single permission
    /// `"*"` per §3.
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        let mut roles = HashMap::new();
        for key in ["super_admin", "admin"] {
            roles.insert(
                key.to_string(),
                Role {
                    id: key.to_string(),
                    key: key.to_string(),
                    name: key.to_string(),
                    permission_keys: vec!["*".to_string()],
                    status: RoleStatus::Active,
                    is_system: true,
                },
            );
        }
        Self {
            bus,
            roles: RwLock::new(roles),
            find_all_cache: RwLock::new(None),
        }
    }

    async fn invalidate_find_all(&self) {
        *self.find_all_cache.write().await = None;
    }

    async fn emit_changed(&self) {
        let _ = self.bus.emit(topics::PERMISSIONS_CHANGED, serde_json::json!({})).await;
    }

    /// Create a non-system role.
    pub async fn create(&self, key: &str, name: &str, permission_keys: Vec<String>) -> Result<Role> {
        let key = key.trim().to_lowercase();
        let role = Role {
            id: uuid::Uuid::new_v4().to_string(),
            key: key.clone(),
            name: name.to_string(),
            permission_keys,
            status: RoleStatus::Active,
            is_system: false,
        };
        self.roles.write().await.insert(key, role.clone());
        self.invalidate_find_all().await;
        self.emit_changed().await;
        Ok(role)
    }

    /// All roles, cached for [`FIND_ALL_CACHE_TTL`].
    pub async fn find_all(&self) -> Vec<Role> {
        if let Some(cache) = self.find_all_cache.read().await.as_ref() {
            if cache.at.elapsed() < FIND_ALL_CACHE_TTL {
                return cache.roles.clone();
            }
        }
        let roles: Vec<Role> = self.roles.read().await.values().cloned().collect();
        *self.find_all_cache.write().await = Some(FindAllCache {
            roles: roles.clone(),
            at: Instant::now(),
        });
        roles
    }

    /// Find by internal id.
    pub async fn find_by_id(&self, id: &str) -> Result<Role> {
        self.roles
            .read()
            .await
            .values()
            .find(|r| r.id == id)
            .cloned()
            .ok_or_else(|| TrustError::RoleNotFound(id.to_string()))
    }

    /// Find by unique, lowercased key.
    pub async fn find_by_key(&self, key: &str) -> Result<Role> {
        self.roles
            .read()
            .await
            .get(&key.to_lowercase())
            .cloned()
            .ok_or_else(|| TrustError::RoleNotFound(key.to_string()))
    }

    /// Rename a role / replace its permission keys (not `super_admin`).
    pub async fn update(&self, key: &str, name: Option<String>, permission_keys: Option<Vec<String>>) -> Result<Role> {
        let key = key.to_lowercase();
        if key == "super_admin" && permission_keys.is_some() {
            return Err(TrustError::CannotDisableSystemRole(
                "cannot modify permissions of super_admin".to_string(),
            ));
        }
        let mut guard = self.roles.write().await;
        let role = guard
            .get_mut(&key)
            .ok_or_else(|| TrustError::RoleNotFound(key.clone()))?;
        if let Some(name) = name {
            role.name = name;
        }
        if let Some(perms) = permission_keys {
            role.permission_keys = perms;
        }
        let updated = role.clone();
        drop(guard);
        self.invalidate_find_all().await;
        self.emit_changed().await;
        Ok(updated)
    }

    /// Replace permission keys directly (`updatePermissions`).
    pub async fn update_permissions(&self, key: &str, permission_keys: Vec<String>) -> Result<Role> {
        self.update(key, None, Some(permission_keys)).await
    }

    /// Disable a role. System roles cannot be disabled (§4.9).
    pub async fn disable(&self, key: &str) -> Result<()> {
        let key = key.to_lowercase();
        let mut guard = self.roles.write().await;
        let role = guard
            .get_mut(&key)
            .ok_or_else(|| TrustError::RoleNotFound(key.clone()))?;
        if role.is_system {
            return Err(TrustError::CannotDisableSystemRole(key));
        }
        role.status = RoleStatus::Disabled;
        drop(guard);
        self.invalidate_find_all().await;
        self.emit_changed().await;
        Ok(())
    }

    /// Hard-delete a disabled, non-system role.
    pub async fn hard_delete(&self, key: &str) -> Result<()> {
        let key = key.to_lowercase();
        let mut guard = self.roles.write().await;
        let role = guard
            .get(&key)
            .ok_or_else(|| TrustError::RoleNotFound(key.clone()))?;
        if role.is_system {
            return Err(TrustError::CannotDeleteSystemRole(key));
        }
        if role.status != RoleStatus::Disabled {
            return Err(TrustError::RoleMustBeDisabled(key));
        }
        guard.remove(&key);
        drop(guard);
        self.invalidate_find_all().await;
        self.emit_changed().await;
        Ok(())
    }

    /// All system roles.
    pub async fn find_system_roles(&self) -> Vec<Role> {
        self.roles
            .read()
            .await
            .values()
            .filter(|r| r.is_system)
            .cloned()
            .collect()
    }

    /// Active roles whose key is in `keys` — the lookup the permission
    /// resolver (C5) consumes.
    pub async fn find_active_by_keys(&self, keys: &[String]) -> Vec<Role> {
        self.roles
            .read()
            .await
            .values()
            .filter(|r| r.status == RoleStatus::Active && keys.contains(&r.key))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl RoleLookup for RoleRegistry {
    async fn find_active_by_keys(&self, keys: &[String]) -> Result<Vec<Role>> {
        Ok(RoleRegistry::find_active_by_keys(self, keys).await)
    }
}
