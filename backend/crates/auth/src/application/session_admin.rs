//! Session administration
//!
//! Listing, statistics and forced logout of sessions, plus the periodic
//! cleanup of stale sessions, MFA challenges and old audit events.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use kernel::id::{SessionId, UserId};
use serde::Serialize;

use crate::application::audit::{AuditUseCase, record_audit};
use crate::domain::entity::{AuditEvent, AuditEventType, UserSession};
use crate::domain::repository::{
    AuditRepository, CredentialsRepository, MfaChallengeRepository, SessionRepository,
    SessionStats,
};
use crate::domain::value_object::GlobalRole;
use crate::error::{AuthError, AuthResult};

/// Outcome of one cleanup pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    pub expired_sessions: u64,
    pub purged_challenges: u64,
    pub purged_audit_events: u64,
}

pub struct SessionAdminUseCase<R>
where
    R: SessionRepository + CredentialsRepository + MfaChallengeRepository + AuditRepository,
{
    repo: Arc<R>,
}

impl<R> SessionAdminUseCase<R>
where
    R: SessionRepository + CredentialsRepository + MfaChallengeRepository + AuditRepository,
{
    pub fn new(repo: Arc<R>) -> Self {
        Self { repo }
    }

    pub async fn list_active(&self, user_id: Option<UserId>) -> AuthResult<Vec<UserSession>> {
        self.repo.list_active_sessions(user_id).await
    }

    pub async fn user_history(&self, user_id: UserId, limit: u32) -> AuthResult<Vec<UserSession>> {
        self.repo.list_user_sessions(user_id, limit.clamp(1, 500)).await
    }

    /// Counters since midnight UTC
    pub async fn stats(&self) -> AuthResult<SessionStats> {
        let now = Utc::now();
        let midnight = now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|d| d.and_utc())
            .unwrap_or(now);
        self.repo.session_stats(midnight).await
    }

    /// End every active session of `user_id`
    pub async fn force_logout_user(
        &self,
        admin_id: UserId,
        user_id: UserId,
        reason: Option<String>,
    ) -> AuthResult<u64> {
        let now = Utc::now();
        let reason = reason.unwrap_or_else(|| "forced_by_admin".to_string());

        let mut count = 0;
        for mut session in self.repo.list_active_sessions(Some(user_id)).await? {
            session.force(Some(admin_id), reason.as_str(), now);
            if self.repo.update_session(&session).await? {
                count += 1;
            }
        }

        record_audit(
            &*self.repo,
            AuditEvent::new(AuditEventType::ForcedLogout, now)
                .user(user_id)
                .message(format!("{count} session(s) ended by {admin_id}: {reason}")),
        )
        .await;

        tracing::warn!(
            admin_id = %admin_id,
            user_id = %user_id,
            sessions = count,
            reason = %reason,
            "Forced logout of user"
        );
        Ok(count)
    }

    pub async fn force_logout_session(
        &self,
        admin_id: UserId,
        session_id: SessionId,
        reason: Option<String>,
    ) -> AuthResult<()> {
        let mut session = self
            .repo
            .find_session(session_id)
            .await?
            .filter(UserSession::is_active)
            .ok_or(AuthError::SessionInvalid)?;

        let reason = reason.unwrap_or_else(|| "forced_by_admin".to_string());
        let now = Utc::now();
        session.force(Some(admin_id), reason.as_str(), now);
        if !self.repo.update_session(&session).await? {
            return Err(AuthError::SessionInvalid);
        }

        record_audit(
            &*self.repo,
            AuditEvent::new(AuditEventType::ForcedLogout, now)
                .user(session.user_id)
                .session(session_id)
                .message(format!("ended by {admin_id}: {reason}")),
        )
        .await;

        tracing::warn!(
            admin_id = %admin_id,
            user_id = %session.user_id,
            session_id = %session_id,
            reason = %reason,
            "Forced logout of session"
        );
        Ok(())
    }

    /// Drop the second factor of a user who lost their device
    pub async fn reset_mfa(
        &self,
        admin_id: UserId,
        admin_role: GlobalRole,
        user_id: UserId,
    ) -> AuthResult<()> {
        if !admin_role.is_admin_or_higher() {
            return Err(AuthError::InsufficientRole);
        }
        let mut credentials = self
            .repo
            .find_credentials(user_id)
            .await?
            .ok_or(AuthError::UserNotFound)?;
        credentials.disable_mfa();
        self.repo.update_credentials(&credentials).await?;

        record_audit(
            &*self.repo,
            AuditEvent::new(AuditEventType::MfaReset, Utc::now())
                .user(user_id)
                .message(format!("reset by {admin_id}")),
        )
        .await;

        tracing::warn!(admin_id = %admin_id, user_id = %user_id, "MFA reset by administrator");
        Ok(())
    }

    /// Expire idle sessions, drop dead challenges and purge audit events
    /// older than `audit_retention`
    pub async fn cleanup_expired(
        &self,
        now: DateTime<Utc>,
        audit_retention: Duration,
    ) -> AuthResult<CleanupReport> {
        let idle_cutoff = now - Duration::hours(UserSession::IDLE_TIMEOUT_HOURS);
        let report = CleanupReport {
            expired_sessions: self.repo.expire_stale_sessions(now, idle_cutoff).await?,
            purged_challenges: self.repo.purge_expired_challenges(now).await?,
            purged_audit_events: AuditUseCase::new(self.repo.clone())
                .purge(now, audit_retention)
                .await?,
        };
        if report != CleanupReport::default() {
            tracing::info!(
                expired_sessions = report.expired_sessions,
                purged_challenges = report.purged_challenges,
                purged_audit_events = report.purged_audit_events,
                "Auth cleanup"
            );
        }
        Ok(report)
    }
}
