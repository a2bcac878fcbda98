//! Membership Entity
//!
//! Links a user to a société with a [`SocieteRole`] plus per-user
//! permission overrides and an optional site restriction.

use chrono::{DateTime, Utc};
use kernel::id::{RoleDefinitionId, SiteId, SocieteId, UserId};

use crate::domain::value_object::SocieteRole;

#[derive(Debug, Clone)]
pub struct Membership {
    pub user_id: UserId,
    pub societe_id: SocieteId,
    pub role_type: SocieteRole,
    /// Société-specific role definition, when one was assigned explicitly
    pub role_id: Option<RoleDefinitionId>,
    pub is_default: bool,
    /// `"resource:action"` strings granted at ADMIN level
    pub additional_permissions: Vec<String>,
    /// `"resource:action"` strings removed whatever the role grants
    pub restricted_permissions: Vec<String>,
    /// Empty means every site of the société
    pub allowed_site_ids: Vec<SiteId>,
    pub granted_by: Option<UserId>,
    pub granted_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
}

impl Membership {
    pub fn new(
        user_id: UserId,
        societe_id: SocieteId,
        role_type: SocieteRole,
        granted_by: Option<UserId>,
    ) -> Self {
        Self {
            user_id,
            societe_id,
            role_type,
            role_id: None,
            is_default: false,
            additional_permissions: Vec::new(),
            restricted_permissions: Vec::new(),
            allowed_site_ids: Vec::new(),
            granted_by,
            granted_at: Utc::now(),
            expires_at: None,
            is_active: true,
        }
    }

    /// Membership SUPER_ADMINs get in sociétés they were never added to
    pub fn virtual_owner(user_id: UserId, societe_id: SocieteId) -> Self {
        Self::new(user_id, societe_id, SocieteRole::Owner, None)
    }

    pub fn is_effectively_active(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.expires_at.is_none_or(|exp| exp > now)
    }

    pub fn has_access_to_site(&self, site_id: SiteId) -> bool {
        self.allowed_site_ids.is_empty() || self.allowed_site_ids.contains(&site_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_expiry() {
        let now = Utc::now();
        let mut m = Membership::new(UserId::new(), SocieteId::new(), SocieteRole::Facturier, None);
        assert!(m.is_effectively_active(now));

        m.expires_at = Some(now - Duration::seconds(1));
        assert!(!m.is_effectively_active(now));

        m.expires_at = Some(now + Duration::days(1));
        m.is_active = false;
        assert!(!m.is_effectively_active(now));
    }

    #[test]
    fn test_site_access() {
        let mut m = Membership::new(UserId::new(), SocieteId::new(), SocieteRole::Expediteur, None);
        let (a, b) = (SiteId::new(), SiteId::new());
        assert!(m.has_access_to_site(a));

        m.allowed_site_ids = vec![a];
        assert!(m.has_access_to_site(a));
        assert!(!m.has_access_to_site(b));
    }
}
