//! Effective permission calculation
//!
//! Layers, applied in order:
//! 1. base permissions of the user's [`GlobalRole`] (source `system`, scope `global`)
//! 2. grants of the société's [`RoleDefinition`] for the membership role, then the
//!    built-in defaults of that [`SocieteRole`] for keys not yet present
//!    (source `role`, scope `societe`). A société entry replaces a global one
//!    only when its level is strictly higher.
//! 3. membership additional permissions at `ADMIN` (source `additional`)
//! 4. membership restrictions, which mark the entry `BLOCKED`
//! 5. pruning of blocked / restricted entries
//!
//! Everything here is pure; loading and caching live in the application layer.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use kernel::id::{SiteId, SocieteId, UserId};
use serde::Serialize;

use crate::domain::entity::{Membership, RoleDefinition, User};
use crate::domain::value_object::{AccessLevel, GlobalRole, PermissionKey, SocieteRole};

type Grant = (&'static str, &'static str, AccessLevel);

use AccessLevel::{Admin, Read, Write};

// ============================================================================
// Built-in role matrices
// ============================================================================

fn global_base(role: GlobalRole) -> &'static [Grant] {
    match role {
        GlobalRole::SuperAdmin => &[("*", "*", Admin)],
        GlobalRole::Admin => &[
            ("users", "read", Admin),
            ("users", "write", Admin),
            ("users", "delete", Admin),
            ("societes", "read", Admin),
            ("societes", "write", Admin),
            ("parameters", "read", Admin),
            ("parameters", "write", Admin),
        ],
        GlobalRole::Manager => &[
            ("users", "read", Read),
            ("users", "write", Write),
            ("societes", "read", Read),
            ("parameters", "read", Read),
        ],
        GlobalRole::User => &[("profile", "read", Read), ("profile", "write", Write)],
        GlobalRole::Guest => &[("public", "read", Read)],
    }
}

/// Owner gets everything; Admin, Manager, User and Viewer rely on the
/// société's role definition only.
fn societe_defaults(role: SocieteRole) -> &'static [Grant] {
    match role {
        SocieteRole::Owner => &[("*", "*", Admin)],
        SocieteRole::Gestionnaire => &[
            ("articles", "read", Admin),
            ("articles", "write", Admin),
            ("articles", "delete", Admin),
            ("inventory", "read", Admin),
            ("inventory", "write", Admin),
            ("partners", "read", Admin),
            ("partners", "write", Admin),
            ("orders", "read", Admin),
            ("orders", "write", Admin),
        ],
        SocieteRole::Facturier => &[
            ("factures", "read", Admin),
            ("factures", "write", Admin),
            ("factures", "delete", Write),
            ("partners", "read", Read),
            ("articles", "read", Read),
        ],
        SocieteRole::Superviseur => &[
            ("articles", "read", Read),
            ("inventory", "read", Read),
            ("partners", "read", Read),
            ("orders", "read", Read),
            ("reports", "read", Admin),
        ],
        SocieteRole::Expediteur => &[
            ("deliveries", "read", Admin),
            ("deliveries", "write", Admin),
            ("inventory", "read", Read),
            ("inventory", "write", Write),
            ("orders", "read", Read),
        ],
        SocieteRole::OperateurProduction => &[
            ("production", "read", Admin),
            ("production", "write", Admin),
            ("materials", "read", Read),
            ("materials", "write", Write),
            ("inventory", "read", Read),
        ],
        SocieteRole::Invite => &[("public", "read", Read), ("reports", "read", Read)],
        SocieteRole::Admin | SocieteRole::Manager | SocieteRole::User | SocieteRole::Viewer => &[],
    }
}

// ============================================================================
// Entries
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionSource {
    System,
    Role,
    Additional,
}

impl PermissionSource {
    pub const fn code(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Role => "role",
            Self::Additional => "additional",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionScope {
    Global,
    Societe,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionEntry {
    pub key: PermissionKey,
    pub level: AccessLevel,
    pub source: PermissionSource,
    pub scope: PermissionScope,
    pub is_restricted: bool,
}

impl PermissionEntry {
    fn from_grant(
        (resource, action, level): Grant,
        source: PermissionSource,
        scope: PermissionScope,
    ) -> Self {
        Self {
            key: PermissionKey::new(resource, action),
            level,
            source,
            scope,
            is_restricted: false,
        }
    }
}

type PermissionMap = BTreeMap<PermissionKey, PermissionEntry>;

// ============================================================================
// Result
// ============================================================================

/// Permissions of one user inside one société (optionally one site)
#[derive(Debug, Clone)]
pub struct EffectivePermissions {
    pub user_id: UserId,
    pub societe_id: SocieteId,
    pub site_id: Option<SiteId>,
    pub global_role: GlobalRole,
    pub societe_role: SocieteRole,
    pub entries: PermissionMap,
    pub additional_permissions: Vec<String>,
    pub restricted_permissions: Vec<String>,
    pub is_default_societe: bool,
    pub allowed_site_ids: Vec<SiteId>,
    pub calculated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionSummary {
    pub total_permissions: usize,
    pub by_resource: BTreeMap<String, usize>,
    pub by_level: BTreeMap<String, usize>,
    pub by_source: BTreeMap<String, usize>,
}

impl EffectivePermissions {
    /// No access at all: reported as GUEST / INVITE
    pub fn empty(
        user_id: UserId,
        societe_id: SocieteId,
        site_id: Option<SiteId>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id,
            societe_id,
            site_id,
            global_role: GlobalRole::Guest,
            societe_role: SocieteRole::Invite,
            entries: BTreeMap::new(),
            additional_permissions: Vec::new(),
            restricted_permissions: Vec::new(),
            is_default_societe: false,
            allowed_site_ids: Vec::new(),
            calculated_at: now,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Exact key first, then `resource:*`, `*:action` and `*:*`
    pub fn has_permission(&self, resource: &str, action: &str, required: AccessLevel) -> bool {
        PermissionKey::new(resource, action)
            .candidates()
            .iter()
            .filter_map(|key| self.entries.get(key))
            .any(|entry| !entry.is_restricted && entry.level.satisfies(required))
    }

    /// `"resource:action"` strings, sorted
    pub fn permission_strings(&self) -> Vec<String> {
        self.entries.keys().map(ToString::to_string).collect()
    }

    pub fn summary(&self) -> PermissionSummary {
        let mut summary = PermissionSummary {
            total_permissions: self.entries.len(),
            ..Default::default()
        };
        for entry in self.entries.values() {
            *summary
                .by_resource
                .entry(entry.key.resource().to_string())
                .or_default() += 1;
            *summary.by_level.entry(entry.level.code().to_string()).or_default() += 1;
            *summary.by_source.entry(entry.source.code().to_string()).or_default() += 1;
        }
        summary
    }
}

// ============================================================================
// Calculator
// ============================================================================

pub struct PermissionCalculator;

impl PermissionCalculator {
    pub fn global_permissions(role: GlobalRole) -> PermissionMap {
        global_base(role)
            .iter()
            .map(|&grant| {
                let entry =
                    PermissionEntry::from_grant(grant, PermissionSource::System, PermissionScope::Global);
                (entry.key.clone(), entry)
            })
            .collect()
    }

    pub fn societe_permissions(
        role_type: SocieteRole,
        definition: Option<&RoleDefinition>,
    ) -> PermissionMap {
        let mut map = PermissionMap::new();

        for grant in definition.into_iter().flat_map(RoleDefinition::effective_grants) {
            map.insert(
                grant.key.clone(),
                PermissionEntry {
                    key: grant.key.clone(),
                    level: grant.level,
                    source: PermissionSource::Role,
                    scope: PermissionScope::Societe,
                    is_restricted: false,
                },
            );
        }

        for &grant in societe_defaults(role_type) {
            let entry =
                PermissionEntry::from_grant(grant, PermissionSource::Role, PermissionScope::Societe);
            map.entry(entry.key.clone()).or_insert(entry);
        }

        map
    }

    pub fn merge(
        global: PermissionMap,
        societe: PermissionMap,
        additional: &[String],
        restricted: &[String],
    ) -> PermissionMap {
        let mut merged = global;

        for (key, entry) in societe {
            match merged.get(&key) {
                Some(existing) if entry.level <= existing.level => {}
                _ => {
                    merged.insert(key, entry);
                }
            }
        }

        for key in additional.iter().filter_map(|s| PermissionKey::parse(s).ok()) {
            merged.insert(
                key.clone(),
                PermissionEntry {
                    key,
                    level: AccessLevel::Admin,
                    source: PermissionSource::Additional,
                    scope: PermissionScope::Societe,
                    is_restricted: false,
                },
            );
        }

        for key in restricted.iter().filter_map(|s| PermissionKey::parse(s).ok()) {
            if let Some(entry) = merged.get_mut(&key) {
                entry.is_restricted = true;
                entry.level = AccessLevel::Blocked;
            }
        }

        merged.retain(|_, e| e.level != AccessLevel::Blocked && !e.is_restricted);
        merged
    }

    /// Permissions for an existing membership; site access is not checked here
    pub fn calculate(
        user: &User,
        membership: &Membership,
        definition: Option<&RoleDefinition>,
        site_id: Option<SiteId>,
        now: DateTime<Utc>,
    ) -> EffectivePermissions {
        let entries = Self::merge(
            Self::global_permissions(user.global_role),
            Self::societe_permissions(membership.role_type, definition),
            &membership.additional_permissions,
            &membership.restricted_permissions,
        );

        EffectivePermissions {
            user_id: user.id,
            societe_id: membership.societe_id,
            site_id,
            global_role: user.global_role,
            societe_role: membership.role_type,
            entries,
            additional_permissions: membership.additional_permissions.clone(),
            restricted_permissions: membership.restricted_permissions.clone(),
            is_default_societe: membership.is_default,
            allowed_site_ids: membership.allowed_site_ids.clone(),
            calculated_at: now,
        }
    }

    /// Full resolution for a (user, société, site) triple.
    ///
    /// `membership` is the user's membership in `societe_id`, if any; it is
    /// ignored when inactive or expired. SUPER_ADMINs without one get a
    /// virtual OWNER membership.
    pub fn resolve(
        user: &User,
        membership: Option<&Membership>,
        definition: Option<&RoleDefinition>,
        societe_id: SocieteId,
        site_id: Option<SiteId>,
        now: DateTime<Utc>,
    ) -> EffectivePermissions {
        let membership = match membership
            .filter(|m| m.societe_id == societe_id && m.is_effectively_active(now))
        {
            Some(m) => m.clone(),
            None if user.global_role.is_super_admin() => Membership::virtual_owner(user.id, societe_id),
            None => return EffectivePermissions::empty(user.id, societe_id, site_id, now),
        };

        if site_id.is_some_and(|site| !membership.has_access_to_site(site)) {
            return EffectivePermissions::empty(user.id, societe_id, site_id, now);
        }

        Self::calculate(user, &membership, definition, site_id, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entity::RoleGrant;
    use crate::domain::value_object::{Acronym, Email};
    use chrono::Duration;

    fn user(role: GlobalRole) -> User {
        User::new(
            Email::new("jean.dupont@topsteel.fr").unwrap(),
            Acronym::new("JDU").unwrap(),
            "Dupont".into(),
            "Jean".into(),
        )
        .with_role(role)
    }

    fn key(s: &str) -> PermissionKey {
        PermissionKey::parse(s).unwrap()
    }

    #[test]
    fn test_global_and_societe_layers_merge() {
        let now = Utc::now();
        let u = user(GlobalRole::User);
        let m = Membership::new(u.id, SocieteId::new(), SocieteRole::Facturier, None);

        let perms = PermissionCalculator::resolve(&u, Some(&m), None, m.societe_id, None, now);

        assert_eq!(perms.global_role, GlobalRole::User);
        assert_eq!(perms.societe_role, SocieteRole::Facturier);
        assert!(perms.has_permission("profile", "write", AccessLevel::Write));
        assert!(perms.has_permission("factures", "write", AccessLevel::Admin));
        assert!(perms.has_permission("factures", "delete", AccessLevel::Write));
        assert!(!perms.has_permission("factures", "delete", AccessLevel::Delete));
        assert!(!perms.has_permission("orders", "read", AccessLevel::Read));
    }

    #[test]
    fn test_societe_entry_replaces_only_when_higher() {
        let global = PermissionCalculator::global_permissions(GlobalRole::Manager);
        let mut def = RoleDefinition::new(SocieteId::new(), SocieteRole::Manager, "Chef d'atelier");
        def.grants = vec![
            RoleGrant::allow(key("users:read"), AccessLevel::Admin),
            RoleGrant::allow(key("users:write"), AccessLevel::Read),
        ];
        let societe = PermissionCalculator::societe_permissions(SocieteRole::Manager, Some(&def));

        let merged = PermissionCalculator::merge(global, societe, &[], &[]);

        let read = &merged[&key("users:read")];
        assert_eq!(read.level, AccessLevel::Admin);
        assert_eq!(read.source, PermissionSource::Role);
        let write = &merged[&key("users:write")];
        assert_eq!(write.level, AccessLevel::Write);
        assert_eq!(write.source, PermissionSource::System);
    }

    #[test]
    fn test_role_definition_ignores_inactive_or_denied_grants() {
        let mut def = RoleDefinition::new(SocieteId::new(), SocieteRole::Superviseur, "Audit");
        let mut denied = RoleGrant::allow(key("orders:write"), AccessLevel::Write);
        denied.granted = false;
        let mut inactive = RoleGrant::allow(key("partners:write"), AccessLevel::Write);
        inactive.active = false;
        def.grants = vec![
            denied,
            inactive,
            RoleGrant::allow(key("reports:read"), AccessLevel::Read),
        ];

        let map = PermissionCalculator::societe_permissions(SocieteRole::Superviseur, Some(&def));

        assert!(!map.contains_key(&key("orders:write")));
        assert!(!map.contains_key(&key("partners:write")));
        // explicit grant wins over the built-in ADMIN default
        assert_eq!(map[&key("reports:read")].level, AccessLevel::Read);
        assert_eq!(map[&key("articles:read")].level, AccessLevel::Read);
    }

    #[test]
    fn test_additional_and_restricted() {
        let merged = PermissionCalculator::merge(
            PermissionCalculator::global_permissions(GlobalRole::User),
            PermissionCalculator::societe_permissions(SocieteRole::Expediteur, None),
            &["stocks:export".into(), "not-a-key".into()],
            &["inventory:write".into(), "unknown:thing".into()],
        );

        let extra = &merged[&key("stocks:export")];
        assert_eq!(extra.level, AccessLevel::Admin);
        assert_eq!(extra.source, PermissionSource::Additional);
        assert!(!merged.contains_key(&key("inventory:write")));
        assert!(merged.contains_key(&key("inventory:read")));
        assert!(merged.values().all(|e| e.level != AccessLevel::Blocked));
    }

    #[test]
    fn test_wildcards() {
        let now = Utc::now();
        let u = user(GlobalRole::User);
        let mut m = Membership::new(u.id, SocieteId::new(), SocieteRole::Viewer, None);
        m.additional_permissions = vec!["reports:*".into(), "*:read".into()];

        let perms = PermissionCalculator::resolve(&u, Some(&m), None, m.societe_id, None, now);

        assert!(perms.has_permission("reports", "export", AccessLevel::Admin));
        assert!(perms.has_permission("invoices", "read", AccessLevel::Read));
        assert!(!perms.has_permission("invoices", "write", AccessLevel::Read));
    }

    #[test]
    fn test_no_membership_is_empty_guest_invite() {
        let now = Utc::now();
        let u = user(GlobalRole::Admin);
        let perms = PermissionCalculator::resolve(&u, None, None, SocieteId::new(), None, now);

        assert!(perms.is_empty());
        assert_eq!(perms.global_role, GlobalRole::Guest);
        assert_eq!(perms.societe_role, SocieteRole::Invite);
        assert!(!perms.has_permission("public", "read", AccessLevel::Read));
    }

    #[test]
    fn test_expired_membership_counts_as_absent() {
        let now = Utc::now();
        let u = user(GlobalRole::User);
        let mut m = Membership::new(u.id, SocieteId::new(), SocieteRole::Gestionnaire, None);
        m.expires_at = Some(now - Duration::hours(1));

        let perms = PermissionCalculator::resolve(&u, Some(&m), None, m.societe_id, None, now);
        assert!(perms.is_empty());
    }

    #[test]
    fn test_site_restriction() {
        let now = Utc::now();
        let u = user(GlobalRole::User);
        let allowed = SiteId::new();
        let mut m = Membership::new(u.id, SocieteId::new(), SocieteRole::Gestionnaire, None);
        m.allowed_site_ids = vec![allowed];

        let ok = PermissionCalculator::resolve(&u, Some(&m), None, m.societe_id, Some(allowed), now);
        assert!(ok.has_permission("articles", "delete", AccessLevel::Delete));

        let denied =
            PermissionCalculator::resolve(&u, Some(&m), None, m.societe_id, Some(SiteId::new()), now);
        assert!(denied.is_empty());
    }

    #[test]
    fn test_super_admin_gets_virtual_owner() {
        let now = Utc::now();
        let u = user(GlobalRole::SuperAdmin);
        let perms =
            PermissionCalculator::resolve(&u, None, None, SocieteId::new(), Some(SiteId::new()), now);

        assert_eq!(perms.societe_role, SocieteRole::Owner);
        assert!(perms.has_permission("anything", "delete", AccessLevel::Admin));
    }

    #[test]
    fn test_summary_counts() {
        let now = Utc::now();
        let u = user(GlobalRole::User);
        let mut m = Membership::new(u.id, SocieteId::new(), SocieteRole::Facturier, None);
        m.additional_permissions = vec!["exports:run".into()];

        let summary = PermissionCalculator::resolve(&u, Some(&m), None, m.societe_id, None, now).summary();

        assert_eq!(summary.total_permissions, 8);
        assert_eq!(summary.by_resource["factures"], 3);
        assert_eq!(summary.by_source["system"], 2);
        assert_eq!(summary.by_source["role"], 5);
        assert_eq!(summary.by_source["additional"], 1);
        assert_eq!(summary.by_level["ADMIN"], 3);
    }
}
