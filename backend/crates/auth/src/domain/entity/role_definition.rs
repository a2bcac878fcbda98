//! Société-specific role definitions
//!
//! A `RoleDefinition` specialises one built-in [`SocieteRole`] for a société
//! with explicit grants. Only grants that are both active and granted count.

use kernel::id::{RoleDefinitionId, SocieteId};

use crate::domain::value_object::{AccessLevel, PermissionKey, SocieteRole};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleGrant {
    pub key: PermissionKey,
    pub level: AccessLevel,
    pub granted: bool,
    pub active: bool,
}

impl RoleGrant {
    pub fn allow(key: PermissionKey, level: AccessLevel) -> Self {
        Self {
            key,
            level,
            granted: true,
            active: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RoleDefinition {
    pub id: RoleDefinitionId,
    pub societe_id: SocieteId,
    pub parent_role_type: SocieteRole,
    pub name: String,
    pub is_active: bool,
    pub grants: Vec<RoleGrant>,
}

impl RoleDefinition {
    pub fn new(societe_id: SocieteId, parent_role_type: SocieteRole, name: impl Into<String>) -> Self {
        Self {
            id: RoleDefinitionId::new(),
            societe_id,
            parent_role_type,
            name: name.into(),
            is_active: true,
            grants: Vec::new(),
        }
    }

    pub fn effective_grants(&self) -> impl Iterator<Item = &RoleGrant> {
        self.grants
            .iter()
            .filter(move |g| self.is_active && g.active && g.granted)
    }
}
