//! Permission Service
//!
//! Loads what the [`PermissionCalculator`] needs and caches its result per
//! `(user, société, site)`.

use std::sync::Arc;

use chrono::Utc;
use kernel::id::{SiteId, SocieteId, UserId};

use crate::domain::entity::{Membership, RoleDefinition};
use crate::domain::repository::{MembershipRepository, RoleDefinitionRepository, UserRepository};
use crate::domain::service::{EffectivePermissions, PermissionCalculator, PermissionSummary};
use crate::domain::value_object::{AccessLevel, SocieteRole};
use crate::error::{AuthError, AuthResult};
use crate::infra::permission_cache::PermissionCache;

pub struct PermissionService<R>
where
    R: UserRepository + MembershipRepository + RoleDefinitionRepository,
{
    repo: Arc<R>,
    cache: Arc<PermissionCache>,
}

impl<R> PermissionService<R>
where
    R: UserRepository + MembershipRepository + RoleDefinitionRepository,
{
    pub fn new(repo: Arc<R>, cache: Arc<PermissionCache>) -> Self {
        Self { repo, cache }
    }

    pub async fn resolve(
        &self,
        user_id: UserId,
        societe_id: SocieteId,
        site_id: Option<SiteId>,
    ) -> AuthResult<EffectivePermissions> {
        let key = PermissionCache::key(user_id, societe_id, site_id);
        if let Some(cached) = self.cache.get(&key).await {
            return Ok(cached);
        }

        let user = self
            .repo
            .find_user_by_id(user_id)
            .await?
            .ok_or(AuthError::UserNotFound)?;
        let now = Utc::now();
        // Revoked or expired memberships count as none
        let membership = self
            .repo
            .find_membership(user_id, societe_id)
            .await?
            .filter(|m| m.is_effectively_active(now));

        let role_type = match &membership {
            Some(m) => Some(m.role_type),
            None if user.global_role.is_super_admin() => Some(SocieteRole::Owner),
            None => None,
        };
        let definition = match role_type {
            Some(role_type) => {
                self.role_definition(societe_id, role_type, membership.as_ref())
                    .await?
            }
            None => None,
        };

        let permissions = PermissionCalculator::resolve(
            &user,
            membership.as_ref(),
            definition.as_ref(),
            societe_id,
            site_id,
            now,
        );

        tracing::debug!(
            user_id = %user_id,
            societe_id = %societe_id,
            count = permissions.entries.len(),
            "Permissions calculated"
        );

        self.cache.insert(key, permissions.clone()).await;
        Ok(permissions)
    }

    /// Explicitly assigned definition first, then the société's definition for the role type
    async fn role_definition(
        &self,
        societe_id: SocieteId,
        role_type: SocieteRole,
        membership: Option<&Membership>,
    ) -> AuthResult<Option<RoleDefinition>> {
        if let Some(role_id) = membership.and_then(|m| m.role_id) {
            let assigned = self.repo.find_role_definition(role_id).await?;
            if let Some(def) = assigned.filter(|d| d.societe_id == societe_id) {
                return Ok(Some(def));
            }
        }
        self.repo.find_role_definition_for(societe_id, role_type).await
    }

    pub async fn has_permission(
        &self,
        user_id: UserId,
        societe_id: SocieteId,
        site_id: Option<SiteId>,
        resource: &str,
        action: &str,
        required: AccessLevel,
    ) -> AuthResult<bool> {
        let permissions = self.resolve(user_id, societe_id, site_id).await?;
        Ok(permissions.has_permission(resource, action, required))
    }

    pub async fn invalidate_user(&self, user_id: UserId, societe_id: Option<SocieteId>) {
        let removed = self.cache.invalidate_user(user_id, societe_id).await;
        tracing::debug!(user_id = %user_id, removed, "Permission cache invalidated");
    }

    pub async fn summary(
        &self,
        user_id: UserId,
        societe_id: SocieteId,
        site_id: Option<SiteId>,
    ) -> AuthResult<PermissionSummary> {
        Ok(self.resolve(user_id, societe_id, site_id).await?.summary())
    }
}
