//! Société (tenant) use cases
//!
//! - [`ListSocietesUseCase`] lists the sociétés a user may log into
//! - [`SelectSocieteUseCase`] performs the tenant login and issues tokens
//!   embedding the société / site context and permissions
//! - [`DefaultSocieteUseCase`] reads and sets the user's default société

use std::sync::Arc;

use chrono::Utc;
use kernel::id::{SessionId, SiteId, SocieteId, UserId};

use crate::application::config::AuthConfig;
use crate::application::permissions::PermissionService;
use crate::application::tokens::{TenantContext, TokenPair, issue_tokens};
use crate::domain::entity::{Membership, Site, Societe};
use crate::domain::repository::{
    MembershipRepository, RoleDefinitionRepository, SessionRepository, SocieteRepository,
    UserRepository,
};
use crate::domain::value_object::GlobalRole;
use crate::error::{AuthError, AuthResult};
use crate::infra::permission_cache::PermissionCache;

/// One société the user can select
#[derive(Debug, Clone)]
pub struct SocieteAccess {
    pub societe: Societe,
    /// Sites the user may work on (active only)
    pub sites: Vec<Site>,
    /// Société role code, or `SUPER_ADMIN` for platform administrators
    pub role: String,
    pub is_default: bool,
}

// ============================================================================
// List
// ============================================================================

pub struct ListSocietesUseCase<R>
where
    R: UserRepository + SocieteRepository + MembershipRepository,
{
    repo: Arc<R>,
}

impl<R> ListSocietesUseCase<R>
where
    R: UserRepository + SocieteRepository + MembershipRepository,
{
    pub fn new(repo: Arc<R>) -> Self {
        Self { repo }
    }

    pub async fn execute(&self, user_id: UserId) -> AuthResult<Vec<SocieteAccess>> {
        let now = Utc::now();
        let user = self
            .repo
            .find_user_by_id(user_id)
            .await?
            .ok_or(AuthError::UserNotFound)?;

        let mut result = Vec::new();
        for membership in self.repo.list_memberships(user_id).await? {
            if !membership.is_effectively_active(now) {
                continue;
            }
            let Some(societe) = self.repo.find_societe(membership.societe_id).await? else {
                continue;
            };
            if !societe.is_active {
                continue;
            }
            result.push(access_for(societe, &membership));
        }

        if result.is_empty() && user.global_role.is_super_admin() {
            result = self
                .repo
                .list_active_societes()
                .await?
                .into_iter()
                .map(|societe| SocieteAccess {
                    sites: societe.active_sites().cloned().collect(),
                    societe,
                    role: GlobalRole::SuperAdmin.code().to_string(),
                    is_default: false,
                })
                .collect();
        }

        result.sort_by(|a, b| {
            b.is_default
                .cmp(&a.is_default)
                .then_with(|| a.societe.nom.cmp(&b.societe.nom))
        });
        Ok(result)
    }
}

fn access_for(societe: Societe, membership: &Membership) -> SocieteAccess {
    SocieteAccess {
        sites: societe
            .active_sites()
            .filter(|site| membership.has_access_to_site(site.id))
            .cloned()
            .collect(),
        role: membership.role_type.code().to_string(),
        is_default: membership.is_default,
        societe,
    }
}

// ============================================================================
// Select (tenant login)
// ============================================================================

pub struct SelectSocieteInput {
    pub user_id: UserId,
    /// Session the new tokens are issued for
    pub session_id: SessionId,
    pub societe_id: SocieteId,
    pub site_id: Option<SiteId>,
}

#[derive(Debug)]
pub struct SelectSocieteOutput {
    pub tokens: TokenPair,
    pub tenant: TenantContext,
    pub societe_nom: String,
    pub permissions: Vec<String>,
}

pub struct SelectSocieteUseCase<R>
where
    R: UserRepository
        + SocieteRepository
        + MembershipRepository
        + RoleDefinitionRepository
        + SessionRepository,
{
    repo: Arc<R>,
    config: Arc<AuthConfig>,
    permissions: PermissionService<R>,
}

impl<R> SelectSocieteUseCase<R>
where
    R: UserRepository
        + SocieteRepository
        + MembershipRepository
        + RoleDefinitionRepository
        + SessionRepository,
{
    pub fn new(repo: Arc<R>, config: Arc<AuthConfig>, cache: Arc<PermissionCache>) -> Self {
        Self {
            permissions: PermissionService::new(repo.clone(), cache),
            repo,
            config,
        }
    }

    pub async fn execute(&self, input: SelectSocieteInput) -> AuthResult<SelectSocieteOutput> {
        let now = Utc::now();

        let user = self
            .repo
            .find_user_by_id(input.user_id)
            .await?
            .ok_or(AuthError::UserNotFound)?;
        if !user.is_active {
            return Err(AuthError::AccountDisabled);
        }

        let societe = self
            .repo
            .find_societe(input.societe_id)
            .await?
            .ok_or(AuthError::SocieteNotFound)?;
        if !societe.is_active {
            return Err(AuthError::NoSocieteAccess);
        }

        let membership = self
            .repo
            .find_membership(user.id, societe.id)
            .await?
            .filter(|m| m.is_effectively_active(now));
        let membership = match membership {
            Some(m) => m,
            None if user.global_role.is_super_admin() => Membership::virtual_owner(user.id, societe.id),
            None => {
                tracing::warn!(
                    user_id = %user.id,
                    societe_id = %societe.id,
                    "Société login refused: no active membership"
                );
                return Err(AuthError::NoSocieteAccess);
            }
        };

        if let Some(site_id) = input.site_id {
            let site_ok = societe.site(site_id).is_some_and(|s| s.is_active)
                && membership.has_access_to_site(site_id);
            if !site_ok {
                return Err(AuthError::SiteAccessDenied);
            }
        }

        let mut session = self
            .repo
            .find_session(input.session_id)
            .await?
            .filter(|s| s.user_id == user.id && s.is_usable(now))
            .ok_or(AuthError::SessionInvalid)?;

        let permissions = self
            .permissions
            .resolve(user.id, societe.id, input.site_id)
            .await?
            .permission_strings();

        let tenant = TenantContext::new(&societe, input.site_id, membership.role_type);
        let issued = issue_tokens(
            &self.config,
            &user,
            session.id,
            Some(&tenant),
            permissions.clone(),
            now,
        )?;

        let previous_hash = session.refresh_token_hash.clone();
        session.bind_tenant(societe.id, input.site_id);
        session.rotate_refresh(issued.refresh_token_hash, issued.refresh_expires_at, now);
        if !self.repo.rotate_session_refresh(&session, &previous_hash).await? {
            return Err(AuthError::SessionInvalid);
        }

        tracing::info!(
            user_id = %user.id,
            session_id = %session.id,
            societe_code = %societe.code,
            role = %membership.role_type,
            permissions = permissions.len(),
            "Société login"
        );

        Ok(SelectSocieteOutput {
            tokens: issued.pair,
            tenant,
            societe_nom: societe.nom,
            permissions,
        })
    }
}

// ============================================================================
// Default société
// ============================================================================

pub struct DefaultSocieteUseCase<R>
where
    R: SocieteRepository + MembershipRepository,
{
    repo: Arc<R>,
}

impl<R> DefaultSocieteUseCase<R>
where
    R: SocieteRepository + MembershipRepository,
{
    pub fn new(repo: Arc<R>) -> Self {
        Self { repo }
    }

    pub async fn get(&self, user_id: UserId) -> AuthResult<Option<SocieteAccess>> {
        let now = Utc::now();
        let membership = self
            .repo
            .list_memberships(user_id)
            .await?
            .into_iter()
            .find(|m| m.is_default && m.is_effectively_active(now));

        let Some(membership) = membership else {
            return Ok(None);
        };
        Ok(self
            .repo
            .find_societe(membership.societe_id)
            .await?
            .filter(|s| s.is_active)
            .map(|societe| access_for(societe, &membership)))
    }

    pub async fn set(&self, user_id: UserId, societe_id: SocieteId) -> AuthResult<()> {
        let now = Utc::now();
        let membership = self
            .repo
            .find_membership(user_id, societe_id)
            .await?
            .filter(|m| m.is_effectively_active(now))
            .ok_or(AuthError::NoSocieteAccess)?;

        self.repo.set_default_membership(user_id, societe_id).await?;

        tracing::info!(
            user_id = %user_id,
            societe_id = %societe_id,
            role = %membership.role_type,
            "Default société changed"
        );
        Ok(())
    }
}
