//! Module & permission store (§3 `Module`/`Permission`, §4.9 module
//! operations, reorder algorithm)

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::error::{Result, TrustError};
use crate::event_bus::{topics, EventBus};

const FIND_ALL_CACHE_TTL: Duration = Duration::from_secs(60);

/// Whether a module groups children or stands alone (§3).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ModuleType {
    Basic,
    Group,
}

/// Module lifecycle status (§3).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ModuleStatus {
    Active,
    Disabled,
}

/// A single derived permission row on a module (§4.9 permission-derivation).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Permission {
    pub id: String,
    pub name: String,
    pub indicator: String,
    pub enabled: bool,
    pub requires_super_admin: bool,
}

/// A navigable or grouping unit of functionality (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Module {
    pub indicator: String,
    pub name: String,
    #[serde(rename = "type")]
    pub module_type: ModuleType,
    pub parent: Option<String>,
    pub order: u32,
    pub actions: Vec<String>,
    pub permissions: Vec<Permission>,
    pub is_system: bool,
    pub is_navigable: bool,
    pub status: ModuleStatus,
}

/// One entry of a reorder request (§4.9).
#[derive(Debug, Clone, Deserialize)]
pub struct ReorderRequest {
    pub id: String,
    pub order: u32,
    pub parent: Option<String>,
}

struct FindAllCache {
    modules: Vec<Module>,
    at: Instant,
}

/// Titlecase the first letter of every `_`/`-`-separated word.
fn titleize(action: &str) -> String {
    action
        .split(['_', '-'])
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Derive the permission id for `(indicator, action)`: first two chars of
/// the indicator, an underscore, then the first char of the action.
fn derive_permission_id(indicator: &str, action: &str) -> String {
    let prefix: String = indicator.chars().take(2).collect();
    let first_action_char = action.chars().next().unwrap_or_default();
    format!("{prefix}_{first_action_char}")
}

/// Regenerate a module's `permissions` from its `actions`, preserving
/// `enabled`/`requires_super_admin` for any permission whose embedded
/// indicator survives, and collapsing duplicate derived ids within one
/// module (§4.9).
fn derive_permissions(indicator: &str, actions: &[String], existing: &[Permission]) -> Vec<Permission> {
    let mut by_id: HashMap<String, Permission> = HashMap::new();
    for action in actions {
        let id = derive_permission_id(indicator, action);
        let full_indicator = format!("{indicator}.{action}");
        let carried = existing.iter().find(|p| p.indicator == full_indicator);
        let permission = Permission {
            id: id.clone(),
            name: titleize(action),
            indicator: full_indicator,
            enabled: carried.map_or(true, |p| p.enabled),
            requires_super_admin: carried.map_or(false, |p| p.requires_super_admin),
        };
        by_id.insert(id, permission);
    }
    let mut permissions: Vec<Permission> = by_id.into_values().collect();
    permissions.sort_by(|a, b| a.id.cmp(&b.id));
    permissions
}

/// In-memory module definitional store (C9 module half).
pub struct ModuleRegistry {
    bus: Arc<dyn EventBus>,
    modules: RwLock<HashMap<String, Module>>,
    find_all_cache: RwLock<Option<FindAllCache>>,
}

impl ModuleRegistry {
    /// Construct an empty registry.
    #[must_use]
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        Self {
            bus,
            modules: RwLock::new(HashMap::new()),
            find_all_cache: RwLock::new(None),
        }
    }

    async fn invalidate_find_all(&self) {
        *self.find_all_cache.write().await = None;
    }

    async fn emit_changed(&self) {
        let _ = self.bus.emit(topics::PERMISSIONS_CHANGED, serde_json::json!({})).await;
    }

    /// Create a module, deriving its initial `permissions` from `actions`.
    pub async fn create(
        &self,
        indicator: &str,
        name: &str,
        module_type: ModuleType,
        parent: Option<String>,
        actions: Vec<String>,
        is_navigable: bool,
    ) -> Result<Module> {
        let indicator = indicator.trim().to_lowercase();
        let mut guard = self.modules.write().await;
        if guard.contains_key(&indicator) {
            return Err(TrustError::Validation(format!(
                "module {indicator} already exists"
            )));
        }
        let order = guard.len() as u32;
        let permissions = derive_permissions(&indicator, &actions, &[]);
        let module = Module {
            indicator: indicator.clone(),
            name: name.to_string(),
            module_type,
            parent,
            order,
            actions,
            permissions,
            is_system: false,
            is_navigable,
            status: ModuleStatus::Active,
        };
        guard.insert(indicator, module.clone());
        drop(guard);
        self.invalidate_find_all().await;
        self.emit_changed().await;
        Ok(module)
    }

    /// All modules, cached for [`FIND_ALL_CACHE_TTL`], ordered by `order`.
    pub async fn find_all(&self) -> Vec<Module> {
        if let Some(cache) = self.find_all_cache.read().await.as_ref() {
            if cache.at.elapsed() < FIND_ALL_CACHE_TTL {
                return cache.modules.clone();
            }
        }
        let mut modules: Vec<Module> = self.modules.read().await.values().cloned().collect();
        modules.sort_by_key(|m| m.order);
        *self.find_all_cache.write().await = Some(FindAllCache {
            modules: modules.clone(),
            at: Instant::now(),
        });
        modules
    }

    /// Find by internal id (modules are keyed by indicator, so id ==
    /// indicator for this store).
    pub async fn find_by_id(&self, id: &str) -> Result<Module> {
        self.find_by_indicator(id).await
    }

    /// Find by indicator.
    pub async fn find_by_indicator(&self, indicator: &str) -> Result<Module> {
        self.modules
            .read()
            .await
            .get(&indicator.to_lowercase())
            .cloned()
            .ok_or_else(|| TrustError::ModuleNotFound(indicator.to_string()))
    }

    /// Rename a module and/or replace its action set, regenerating
    /// `permissions` while preserving existing per-permission flags.
    pub async fn update(&self, indicator: &str, name: Option<String>, actions: Option<Vec<String>>) -> Result<Module> {
        let indicator = indicator.to_lowercase();
        let mut guard = self.modules.write().await;
        let module = guard
            .get_mut(&indicator)
            .ok_or_else(|| TrustError::ModuleNotFound(indicator.clone()))?;
        if let Some(name) = name {
            module.name = name;
        }
        if let Some(actions) = actions {
            module.permissions = derive_permissions(&indicator, &actions, &module.permissions);
            module.actions = actions;
        }
        let updated = module.clone();
        drop(guard);
        self.invalidate_find_all().await;
        self.emit_changed().await;
        Ok(updated)
    }

    /// Disable a module. System modules cannot be disabled (§4.9).
    pub async fn disable(&self, indicator: &str) -> Result<()> {
        let indicator = indicator.to_lowercase();
        let mut guard = self.modules.write().await;
        let module = guard
            .get_mut(&indicator)
            .ok_or_else(|| TrustError::ModuleNotFound(indicator.clone()))?;
        if module.is_system {
            return Err(TrustError::CannotDisableSystemModule(indicator));
        }
        module.status = ModuleStatus::Disabled;
        drop(guard);
        self.invalidate_find_all().await;
        self.emit_changed().await;
        Ok(())
    }

    /// Hard-delete a disabled, non-system module.
    pub async fn hard_delete(&self, indicator: &str) -> Result<()> {
        let indicator = indicator.to_lowercase();
        let mut guard = self.modules.write().await;
        let module = guard
            .get(&indicator)
            .ok_or_else(|| TrustError::ModuleNotFound(indicator.clone()))?;
        if module.is_system {
            return Err(TrustError::CannotDisableSystemModule(indicator));
        }
        if module.status != ModuleStatus::Disabled {
            return Err(TrustError::Validation(format!(
                "module {indicator} must be disabled before deletion"
            )));
        }
        guard.remove(&indicator);
        drop(guard);
        self.invalidate_find_all().await;
        self.emit_changed().await;
        Ok(())
    }

    /// All system modules.
    pub async fn find_system_modules(&self) -> Vec<Module> {
        self.modules
            .read()
            .await
            .values()
            .filter(|m| m.is_system)
            .cloned()
            .collect()
    }

    /// Apply a batch reorder, densely reindexing sibling `order` values
    /// under each distinct `parent` bucket touched by the request (§4.9).
    pub async fn reorder_modules(&self, requests: Vec<ReorderRequest>) -> Result<()> {
        let mut guard = self.modules.write().await;
        for req in &requests {
            let module = guard
                .get_mut(&req.id.to_lowercase())
                .ok_or_else(|| TrustError::ModuleNotFound(req.id.clone()))?;
            module.order = req.order;
            module.parent = req.parent.clone();
        }

        let mut by_parent: HashMap<Option<String>, Vec<String>> = HashMap::new();
        let mut all: Vec<&Module> = guard.values().collect();
        all.sort_by_key(|m| m.order);
        for module in all {
            by_parent
                .entry(module.parent.clone())
                .or_default()
                .push(module.indicator.clone());
        }
        for siblings in by_parent.values() {
            for (idx, indicator) in siblings.iter().enumerate() {
                if let Some(module) = guard.get_mut(indicator) {
                    module.order = idx as u32;
                }
            }
        }
        drop(guard);
        self.invalidate_find_all().await;
        self.emit_changed().await;
        Ok(())
    }
}
