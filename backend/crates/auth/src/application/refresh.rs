//! Refresh Token Use Case
//!
//! Rotates the token pair of a session. Each refresh token is single use:
//! the session stores the hash of the one currently in circulation, and
//! presenting any other (validly signed) refresh token for that session is
//! treated as theft and ends the session.

use std::sync::Arc;

use chrono::Utc;
use platform::crypto::constant_time_eq;

use crate::application::audit::record_audit;
use crate::application::config::AuthConfig;
use crate::application::permissions::PermissionService;
use crate::application::tokens::{
    TenantContext, TokenPair, decode_refresh_token, hash_refresh_token, issue_tokens,
};
use crate::domain::entity::{AuditEvent, AuditEventType, UserSession};
use crate::domain::repository::{
    AuditRepository, MembershipRepository, RoleDefinitionRepository, SessionRepository, SocieteRepository,
    UserRepository,
};
use crate::error::{AuthError, AuthResult};
use crate::infra::permission_cache::PermissionCache;

#[derive(Debug)]
pub struct RefreshOutput {
    pub tokens: TokenPair,
    pub tenant: Option<TenantContext>,
}

pub struct RefreshTokenUseCase<R>
where
    R: UserRepository
        + SocieteRepository
        + MembershipRepository
        + RoleDefinitionRepository
        + SessionRepository
        + AuditRepository,
{
    repo: Arc<R>,
    config: Arc<AuthConfig>,
    permissions: PermissionService<R>,
}

impl<R> RefreshTokenUseCase<R>
where
    R: UserRepository
        + SocieteRepository
        + MembershipRepository
        + RoleDefinitionRepository
        + SessionRepository
        + AuditRepository,
{
    pub fn new(repo: Arc<R>, config: Arc<AuthConfig>, cache: Arc<PermissionCache>) -> Self {
        Self {
            permissions: PermissionService::new(repo.clone(), cache),
            repo,
            config,
        }
    }

    pub async fn execute(&self, refresh_token: &str) -> AuthResult<RefreshOutput> {
        let now = Utc::now();
        let claims = decode_refresh_token(&self.config, refresh_token, now)?;

        let mut session = self
            .repo
            .find_session(claims.sid)
            .await?
            .filter(|s| s.user_id == claims.sub)
            .ok_or(AuthError::SessionInvalid)?;
        if !session.is_usable(now) {
            return Err(AuthError::SessionInvalid);
        }

        let presented = hash_refresh_token(refresh_token);
        if !constant_time_eq(presented.as_bytes(), session.refresh_token_hash.as_bytes()) {
            return Err(self.revoke_for_reuse(session).await?);
        }

        let user = self
            .repo
            .find_user_by_id(claims.sub)
            .await?
            .ok_or(AuthError::SessionInvalid)?;
        if !user.is_active {
            session.force(None, "account_disabled", now);
            self.repo.update_session(&session).await?;
            return Err(AuthError::AccountDisabled);
        }

        // Tenant context comes from the session; permissions are recomputed
        let mut tenant = None;
        let mut permissions = Vec::new();
        if let Some(societe_id) = session.societe_id {
            self.permissions.invalidate_user(user.id, Some(societe_id)).await;
            let societe = self
                .repo
                .find_societe(societe_id)
                .await?
                .filter(|s| s.is_active);
            let resolved = self
                .permissions
                .resolve(user.id, societe_id, session.site_id)
                .await?;

            match societe {
                Some(societe) if !resolved.is_empty() => {
                    tenant = Some(TenantContext::new(&societe, session.site_id, resolved.societe_role));
                    permissions = resolved.permission_strings();
                }
                _ => {
                    tracing::info!(
                        user_id = %user.id,
                        societe_id = %societe_id,
                        "Société access lost, refreshing without tenant"
                    );
                    session.societe_id = None;
                    session.site_id = None;
                }
            }
        }

        let issued = issue_tokens(&self.config, &user, session.id, tenant.as_ref(), permissions, now)?;
        session.rotate_refresh(issued.refresh_token_hash, issued.refresh_expires_at, now);

        // Another request rotated the same token first
        if !self.repo.rotate_session_refresh(&session, &presented).await? {
            let current = self
                .repo
                .find_session(session.id)
                .await?
                .ok_or(AuthError::SessionInvalid)?;
            return Err(self.revoke_for_reuse(current).await?);
        }

        tracing::debug!(
            user_id = %user.id,
            session_id = %session.id,
            "Token pair rotated"
        );

        Ok(RefreshOutput {
            tokens: issued.pair,
            tenant,
        })
    }

    /// A stale refresh token was presented: end the session it belongs to
    async fn revoke_for_reuse(&self, mut session: UserSession) -> AuthResult<AuthError> {
        let now = Utc::now();
        session.force(None, "refresh_token_reuse", now);
        self.repo.update_session(&session).await?;
        record_audit(
            &*self.repo,
            AuditEvent::new(AuditEventType::RefreshTokenReuse, now)
                .user(session.user_id)
                .societe(session.societe_id)
                .session(session.id)
                .failed(),
        )
        .await;
        tracing::warn!(
            user_id = %session.user_id,
            session_id = %session.id,
            "Refresh token reuse detected, session revoked"
        );
        Ok(AuthError::RefreshTokenReused)
    }
}
