//! Permission view and wildcard algebra (§3, §4.5)

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Normalize a permission string: lowercase and trim, per §9's "never
/// compare raw" rule.
#[must_use]
pub fn normalize(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Whether `candidate` (already normalized) matches the authoritative
/// module-wildcard form `^[a-z0-9_]+\.\*$`.
#[must_use]
pub fn is_module_wildcard(candidate: &str) -> bool {
    let Some((module, suffix)) = candidate.split_once('.') else {
        return false;
    };
    suffix == "*"
        && !module.is_empty()
        && module
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// The categorized triple §3 calls `Permission view`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PermissionView {
    pub has_global_wildcard: bool,
    pub module_wildcards: HashSet<String>,
    pub exact_permissions: HashSet<String>,
}

impl PermissionView {
    /// An empty view — the fail-closed default.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Fold one more raw permission key into this view, classifying it as
    /// global wildcard, module wildcard, or exact per §4.5.
    pub fn absorb(&mut self, raw: &str) {
        let normalized = normalize(raw);
        if normalized == "*" {
            self.has_global_wildcard = true;
        } else if is_module_wildcard(&normalized) {
            self.module_wildcards.insert(normalized);
        } else {
            self.exact_permissions.insert(normalized);
        }
    }

    /// Union this view with another, in place.
    pub fn merge(&mut self, other: &PermissionView) {
        self.has_global_wildcard |= other.has_global_wildcard;
        self.module_wildcards
            .extend(other.module_wildcards.iter().cloned());
        self.exact_permissions
            .extend(other.exact_permissions.iter().cloned());
    }

    /// §4.5's `hasPermission` evaluation.
    #[must_use]
    pub fn has_permission(&self, required: &str) -> bool {
        let required = normalize(required);
        if self.has_global_wildcard {
            return true;
        }
        if self.exact_permissions.contains(&required) {
            return true;
        }
        if let Some((module, _)) = required.split_once('.') {
            let wildcard = format!("{module}.*");
            if self.module_wildcards.contains(&wildcard) {
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_global_wildcard() {
        let mut view = PermissionView::empty();
        view.absorb(" * ");
        assert!(view.has_global_wildcard);
    }

    #[test]
    fn classifies_module_wildcard() {
        let mut view = PermissionView::empty();
        view.absorb("Roles.*");
        assert!(view.module_wildcards.contains("roles.*"));
    }

    #[test]
    fn classifies_exact_permission() {
        let mut view = PermissionView::empty();
        view.absorb("Cards.Read");
        assert!(view.exact_permissions.contains("cards.read"));
    }

    #[test]
    fn module_wildcard_covers_any_action() {
        let mut view = PermissionView::empty();
        view.absorb("roles.*");
        assert!(view.has_permission("roles.delete"));
        assert!(!view.has_permission("cards.read"));
    }

    #[test]
    fn wildcard_form_requires_star_suffix() {
        assert!(is_module_wildcard("roles.*"));
        assert!(!is_module_wildcard("roles.star"));
        assert!(!is_module_wildcard("*"));
        assert!(!is_module_wildcard(".*"));
    }

    #[test]
    fn global_wildcard_covers_anything() {
        let mut view = PermissionView::empty();
        view.absorb("*");
        assert!(view.has_permission("anything.at.all"));
    }
}
