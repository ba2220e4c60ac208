//! User store and lifecycle operations (§4.10)

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::authz::{PermissionResolver, UserRoleKeyLookup};
use crate::error::{Result, TrustError};
use crate::event_bus::{topics, EventBus};

use super::password::{hash_password, verify_password};

/// A user's account lifecycle status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Active,
    Disabled,
}

/// A user account (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: Option<String>,
    pub phone: String,
    pub id_number: String,
    pub fullname: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role_key: String,
    pub additional_role_keys: Vec<String>,
    pub status: UserStatus,
    pub phone_confirmed: bool,
}

impl User {
    fn role_keys(&self) -> Vec<String> {
        let mut keys = vec![self.role_key.clone()];
        keys.extend(self.additional_role_keys.iter().cloned());
        keys
    }
}

/// Filters accepted by [`IdentityStore::list`].
#[derive(Debug, Clone, Default)]
pub struct UserListQuery {
    pub status: Option<UserStatus>,
    pub role_key: Option<String>,
}

/// In-memory user store (C10). `super_admin` accounts are excluded from
/// [`Self::list`] and [`Self::find_by_email`] but remain reachable by id for
/// login and intra-service use.
pub struct IdentityStore {
    bus: Arc<dyn EventBus>,
    users: RwLock<HashMap<String, User>>,
}

impl IdentityStore {
    /// Construct an empty store.
    #[must_use]
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        Self {
            bus,
            users: RwLock::new(HashMap::new()),
        }
    }

    async fn emit_changed(&self, user_id: &str) {
        let _ = self
            .bus
            .emit(topics::PERMISSIONS_CHANGED, serde_json::json!({ "userId": user_id }))
            .await;
    }

    /// Create a user, hashing `plaintext_password` and enforcing the §3
    /// role-combination rule.
    pub async fn create(
        &self,
        email: Option<String>,
        phone: String,
        id_number: String,
        fullname: String,
        plaintext_password: &str,
        role_key: String,
        additional_role_keys: Vec<String>,
    ) -> Result<User> {
        PermissionResolver::validate_role_combination(&role_key, &additional_role_keys)
            .map_err(TrustError::InvalidRoleCombination)?;

        let user = User {
            id: uuid::Uuid::new_v4().to_string(),
            email,
            phone,
            id_number,
            fullname,
            password_hash: hash_password(plaintext_password)?,
            role_key: role_key.to_lowercase(),
            additional_role_keys: additional_role_keys.iter().map(|s| s.to_lowercase()).collect(),
            status: UserStatus::Active,
            phone_confirmed: false,
        };
        self.users.write().await.insert(user.id.clone(), user.clone());
        Ok(user)
    }

    /// Find by id, with `passwordHash` cleared (the default external view).
    pub async fn find_by_id(&self, id: &str) -> Result<User> {
        let mut user = self.find_by_id_raw(id).await?;
        user.password_hash.clear();
        Ok(user)
    }

    /// Find by id, retaining `passwordHash` — for intra-service use only
    /// (login verification).
    pub async fn find_by_id_raw(&self, id: &str) -> Result<User> {
        self.users
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| TrustError::UserNotFound(id.to_string()))
    }

    /// Find by email. Never returns a `super_admin` account.
    pub async fn find_by_email(&self, email: &str) -> Result<User> {
        let mut user = self
            .users
            .read()
            .await
            .values()
            .find(|u| u.email.as_deref() == Some(email) && u.role_key != "super_admin")
            .cloned()
            .ok_or_else(|| TrustError::UserNotFound(email.to_string()))?;
        user.password_hash.clear();
        Ok(user)
    }

    /// All users matching `query`, excluding `super_admin` accounts.
    pub async fn list(&self, query: &UserListQuery) -> Vec<User> {
        self.users
            .read()
            .await
            .values()
            .filter(|u| u.role_key != "super_admin")
            .filter(|u| query.status.map_or(true, |s| u.status == s))
            .filter(|u| {
                query
                    .role_key
                    .as_deref()
                    .map_or(true, |key| u.role_key == key || u.additional_role_keys.iter().any(|r| r == key))
            })
            .cloned()
            .map(|mut u| {
                u.password_hash.clear();
                u
            })
            .collect()
    }

    /// Replace `roleKey`/`additionalRoleKeys`, re-validating the combination.
    pub async fn update_roles(&self, id: &str, role_key: String, additional_role_keys: Vec<String>) -> Result<User> {
        PermissionResolver::validate_role_combination(&role_key, &additional_role_keys)
            .map_err(TrustError::InvalidRoleCombination)?;

        let mut guard = self.users.write().await;
        let user = guard
            .get_mut(id)
            .ok_or_else(|| TrustError::UserNotFound(id.to_string()))?;
        user.role_key = role_key.to_lowercase();
        user.additional_role_keys = additional_role_keys.iter().map(|s| s.to_lowercase()).collect();
        let mut updated = user.clone();
        drop(guard);
        self.emit_changed(id).await;
        updated.password_hash.clear();
        Ok(updated)
    }

    /// Replace the stored password hash.
    pub async fn update_password(&self, id: &str, plaintext_password: &str) -> Result<()> {
        let hash = hash_password(plaintext_password)?;
        let mut guard = self.users.write().await;
        let user = guard
            .get_mut(id)
            .ok_or_else(|| TrustError::UserNotFound(id.to_string()))?;
        user.password_hash = hash;
        Ok(())
    }

    /// Update profile fields that never touch role or password state.
    pub async fn update(&self, id: &str, fullname: Option<String>, phone_confirmed: Option<bool>) -> Result<User> {
        let mut guard = self.users.write().await;
        let user = guard
            .get_mut(id)
            .ok_or_else(|| TrustError::UserNotFound(id.to_string()))?;
        if let Some(fullname) = fullname {
            user.fullname = fullname;
        }
        if let Some(confirmed) = phone_confirmed {
            user.phone_confirmed = confirmed;
        }
        let mut updated = user.clone();
        drop(guard);
        updated.password_hash.clear();
        Ok(updated)
    }

    /// Disable a user account.
    pub async fn disable(&self, id: &str) -> Result<()> {
        let mut guard = self.users.write().await;
        let user = guard
            .get_mut(id)
            .ok_or_else(|| TrustError::UserNotFound(id.to_string()))?;
        user.status = UserStatus::Disabled;
        Ok(())
    }

    /// Verify a plaintext password for `id`, for the `/auth/login` handler.
    pub async fn verify_credentials(&self, id: &str, plaintext_password: &str) -> Result<bool> {
        let user = self.find_by_id_raw(id).await?;
        Ok(verify_password(plaintext_password, &user.password_hash))
    }

    /// One-time seed of a `super_admin` account when the store is empty and
    /// both `SA_EMAIL` and `SA_PWD` are configured. Silent no-op otherwise
    /// (§4.10, Open Question resolved in `SPEC_FULL.md` §4).
    pub async fn seed_super_admin_if_empty(&self, sa_email: Option<&str>, sa_pwd: Option<&str>) -> Result<()> {
        if !self.users.read().await.is_empty() {
            return Ok(());
        }
        let (Some(email), Some(pwd)) = (sa_email, sa_pwd) else {
            return Ok(());
        };
        let user = User {
            id: uuid::Uuid::new_v4().to_string(),
            email: Some(email.to_string()),
            phone: String::new(),
            id_number: String::new(),
            fullname: "Super Admin".to_string(),
            password_hash: hash_password(pwd)?,
            role_key: "super_admin".to_string(),
            additional_role_keys: vec![],
            status: UserStatus::Active,
            phone_confirmed: false,
        };
        self.users.write().await.insert(user.id.clone(), user);
        Ok(())
    }
}

#[async_trait]
impl UserRoleKeyLookup for IdentityStore {
    async fn role_keys_for_user(&self, user_id: &str) -> Result<Vec<String>> {
        let user = self.find_by_id_raw(user_id).await?;
        Ok(user.role_keys())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_bus::TracingEventBus;

    fn store() -> IdentityStore {
        IdentityStore::new(Arc::new(TracingEventBus::new()))
    }

    #[tokio::test]
    async fn create_rejects_invalid_role_combination() {
        let store = store();
        let result = store
            .create(
                Some("a@example.com".into()),
                "555".into(),
                "id1".into(),
                "A".into(),
                "pw",
                "super_admin".into(),
                vec!["user".into()],
            )
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn create_then_find_hides_password_hash() {
        let store = store();
        let user = store
            .create(
                Some("a@example.com".into()),
                "555".into(),
                "id1".into(),
                "A".into(),
                "pw",
                "user".into(),
                vec![],
            )
            .await
            .unwrap();
        let found = store.find_by_id(&user.id).await.unwrap();
        assert!(found.password_hash.is_empty());
    }

    #[tokio::test]
    async fn list_excludes_super_admin() {
        let store = store();
        store
            .seed_super_admin_if_empty(Some("root@example.com"), Some("pw"))
            .await
            .unwrap();
        store
            .create(
                Some("a@example.com".into()),
                "555".into(),
                "id1".into(),
                "A".into(),
                "pw",
                "user".into(),
                vec![],
            )
            .await
            .unwrap();
        let users = store.list(&UserListQuery::default()).await;
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].role_key, "user");
    }

    #[tokio::test]
    async fn seed_is_noop_when_sa_vars_unset() {
        let store = store();
        store.seed_super_admin_if_empty(None, None).await.unwrap();
        assert!(store.users.read().await.is_empty());
    }

    #[tokio::test]
    async fn role_keys_for_user_includes_additional() {
        let store = store();
        let user = store
            .create(
                Some("a@example.com".into()),
                "555".into(),
                "id1".into(),
                "A".into(),
                "pw",
                "user".into(),
                vec!["merchant".into()],
            )
            .await
            .unwrap();
        let keys = store.role_keys_for_user(&user.id).await.unwrap();
        assert_eq!(keys, vec!["user".to_string(), "merchant".to_string()]);
    }

    #[tokio::test]
    async fn verify_credentials_checks_password() {
        let store = store();
        let user = store
            .create(
                Some("a@example.com".into()),
                "555".into(),
                "id1".into(),
                "A".into(),
                "correct-password",
                "user".into(),
                vec![],
            )
            .await
            .unwrap();
        assert!(store.verify_credentials(&user.id, "correct-password").await.unwrap());
        assert!(!store.verify_credentials(&user.id, "wrong").await.unwrap());
    }
}
