//! Permission Resolver (C5)

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::warn;

use crate::context::Actor;
use crate::error::Result;
use crate::registry::Role;

use super::permission::PermissionView;

/// Looks up active [`Role`]s by key. Implemented by [`crate::registry`].
#[async_trait]
pub trait RoleLookup: Send + Sync {
    /// Active roles whose `key` is in `keys` (inactive roles are excluded).
    async fn find_active_by_keys(&self, keys: &[String]) -> Result<Vec<Role>>;
}

/// Looks up a user's `roleKey` + `additionalRoleKeys`. Implemented by
/// [`crate::identity`].
#[async_trait]
pub trait UserRoleKeyLookup: Send + Sync {
    /// All role keys (`roleKey` first, then `additionalRoleKeys`) for a user id.
    async fn role_keys_for_user(&self, user_id: &str) -> Result<Vec<String>>;
}

struct CacheEntry {
    view: PermissionView,
    inserted_at: Instant,
}

/// Actor → permission view resolution, with a TTL + bounded-size cache
/// (§4.5). Fails closed: any lookup error returns an empty view, never a
/// populated one.
pub struct PermissionResolver {
    roles: Arc<dyn RoleLookup>,
    users: Arc<dyn UserRoleKeyLookup>,
    ttl: Duration,
    max_size: usize,
    cache: RwLock<HashMap<String, CacheEntry>>,
    order: RwLock<Vec<String>>,
}

impl PermissionResolver {
    /// Construct a resolver bound to the given role/user lookups, with the
    /// cache TTL and capacity read from `AUTHZ_CACHE_TTL_MS` / `AUTHZ_MAX_CACHE_SIZE`.
    pub fn new(
        roles: Arc<dyn RoleLookup>,
        users: Arc<dyn UserRoleKeyLookup>,
        ttl: Duration,
        max_size: usize,
    ) -> Self {
        Self {
            roles,
            users,
            ttl,
            max_size,
            cache: RwLock::new(HashMap::new()),
            order: RwLock::new(Vec::new()),
        }
    }

    fn cache_key(actor: &Actor) -> String {
        format!("permissions:{}:{}", actor.kind(), actor.id())
    }

    /// §4.5 `resolvePermissions`: expand the actor's role keys into a
    /// merged [`PermissionView`], consulting (and populating) the cache.
    pub async fn resolve_permissions(&self, actor: &Actor) -> Result<PermissionView> {
        let key = Self::cache_key(actor);

        if let Some(view) = self.cached(&key).await {
            return Ok(view);
        }

        let view = match self.resolve_uncached(actor).await {
            Ok(view) => view,
            Err(e) => {
                warn!(error = %e, actor = actor.id(), "permission resolution failed, denying");
                return Ok(PermissionView::empty());
            }
        };

        self.insert(key, view.clone()).await;
        Ok(view)
    }

    async fn resolve_uncached(&self, actor: &Actor) -> Result<PermissionView> {
        let role_keys = match actor {
            Actor::User { id, .. } => self.users.role_keys_for_user(id).await?,
            Actor::Service { role_keys, .. } => role_keys.clone(),
        };
        let roles = self.roles.find_active_by_keys(&role_keys).await?;

        let mut view = PermissionView::empty();
        for role in roles {
            for perm_key in &role.permission_keys {
                view.absorb(perm_key);
            }
        }
        Ok(view)
    }

    async fn cached(&self, key: &str) -> Option<PermissionView> {
        let guard = self.cache.read().await;
        let entry = guard.get(key)?;
        if entry.inserted_at.elapsed() > self.ttl {
            return None;
        }
        Some(entry.view.clone())
    }

    async fn insert(&self, key: String, view: PermissionView) {
        let mut cache = self.cache.write().await;
        let mut order = self.order.write().await;

        if !cache.contains_key(&key) {
            order.push(key.clone());
        }
        cache.insert(
            key,
            CacheEntry {
                view,
                inserted_at: Instant::now(),
            },
        );

        while cache.len() > self.max_size {
            if order.is_empty() {
                break;
            }
            let oldest = order.remove(0);
            cache.remove(&oldest);
        }
    }

    /// Evict the cached view for a single actor (e.g. after its roles changed).
    pub async fn invalidate(&self, actor_type: &str, actor_id: &str) {
        let key = format!("permissions:{actor_type}:{actor_id}");
        self.cache.write().await.remove(&key);
        self.order.write().await.retain(|k| k != &key);
    }

    /// Evict the entire cache — acceptable when the set of affected actors
    /// after a write is unbounded (§4.5).
    pub async fn clear_all(&self) {
        self.cache.write().await.clear();
        self.order.write().await.clear();
    }

    /// §4.5 `hasPermission`.
    #[must_use]
    pub fn has_permission(view: &PermissionView, required: &str) -> bool {
        view.has_permission(required)
    }

    /// §3's role-combination rules, enforced exactly as the User entity
    /// states them: `super_admin` has no additional roles and is never in
    /// additional; `user` may combine with `{merchant, admin, ops}`;
    /// `merchant|admin|ops` may combine only with `user`.
    pub fn validate_role_combination(
        primary: &str,
        additional: &[String],
    ) -> std::result::Result<(), String> {
        let primary = primary.to_lowercase();
        let additional: Vec<String> = additional.iter().map(|s| s.to_lowercase()).collect();

        if primary == "super_admin" {
            return if additional.is_empty() {
                Ok(())
            } else {
                Err("super_admin may not hold additional roles".to_string())
            };
        }
        if additional.iter().any(|r| r == "super_admin") {
            return Err("super_admin may not appear as an additional role".to_string());
        }

        if primary == "user" {
            let allowed = ["merchant", "admin", "ops"];
            if additional.iter().all(|r| allowed.contains(&r.as_str())) {
                Ok(())
            } else {
                Err("user may only combine with merchant, admin, or ops".to_string())
            }
        } else if ["merchant", "admin", "ops"].contains(&primary.as_str()) {
            if additional.iter().all(|r| r == "user") {
                Ok(())
            } else {
                Err(format!("{primary} may only combine with user"))
            }
        } else {
            Err(format!("unrecognized primary role {primary}"))
        }
    }
}
