use std::{collections::HashSet, sync::RwLock};

use shared::domain::Permission;

use crate::AuthGate;

/// Permissions of the acting user as last reported by the host.
#[derive(Default)]
pub struct LoginState {
    permissions: RwLock<HashSet<Permission>>,
}

impl LoginState {
    pub fn new(permissions: impl IntoIterator<Item = Permission>) -> Self {
        Self {
            permissions: RwLock::new(permissions.into_iter().collect()),
        }
    }

    /// Swaps in the permission set reported after a login or permission change.
    pub fn replace(&self, permissions: impl IntoIterator<Item = Permission>) {
        if let Ok(mut guard) = self.permissions.write() {
            *guard = permissions.into_iter().collect();
        }
    }
}

impl AuthGate for LoginState {
    fn has_permission(&self, permission: Permission) -> bool {
        self.permissions
            .read()
            .map(|guard| guard.contains(&permission))
            .unwrap_or(false)
    }
}
