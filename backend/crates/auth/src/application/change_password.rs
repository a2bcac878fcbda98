//! Change Password Use Case

use std::sync::Arc;

use chrono::Utc;
use kernel::id::{SessionId, UserId};

use crate::application::audit::record_audit;
use crate::application::config::AuthConfig;
use crate::application::logout::end_sessions;
use crate::application::mfa_policy::verify_step_up;
use crate::domain::entity::{AuditEvent, AuditEventType};
use crate::domain::repository::{
    AuditRepository, CredentialsRepository, SessionRepository, UserRepository,
};
use crate::domain::value_object::{RawPassword, UserPassword};
use crate::error::{AuthError, AuthResult};

pub struct ChangePasswordInput {
    pub user_id: UserId,
    /// Kept open, every other session is ended
    pub current_session: SessionId,
    pub current_password: String,
    pub new_password: String,
    /// Required when the account has TOTP enabled
    pub mfa_code: Option<String>,
}

pub struct ChangePasswordUseCase<R>
where
    R: UserRepository + CredentialsRepository + SessionRepository + AuditRepository,
{
    repo: Arc<R>,
    config: Arc<AuthConfig>,
}

impl<R> ChangePasswordUseCase<R>
where
    R: UserRepository + CredentialsRepository + SessionRepository + AuditRepository,
{
    pub fn new(repo: Arc<R>, config: Arc<AuthConfig>) -> Self {
        Self { repo, config }
    }

    /// Returns the number of other sessions that were ended
    pub async fn execute(&self, input: ChangePasswordInput) -> AuthResult<u64> {
        let now = Utc::now();
        let user = self
            .repo
            .find_user_by_id(input.user_id)
            .await?
            .ok_or(AuthError::UserNotFound)?;
        let mut credentials = self
            .repo
            .find_credentials(user.id)
            .await?
            .ok_or_else(|| AuthError::Internal("Credentials not found".to_string()))?;

        let current = RawPassword::for_login(input.current_password);
        if !credentials.password_hash.verify(&current, self.config.pepper()) {
            credentials.record_failure(now);
            self.repo.update_credentials(&credentials).await?;
            tracing::warn!(user_id = %user.id, "Password change refused: wrong current password");
            return Err(AuthError::InvalidCredentials);
        }

        verify_step_up(&credentials, input.mfa_code.as_deref())?;

        let new_password = RawPassword::new(input.new_password)?;
        if credentials.password_hash.verify(&new_password, self.config.pepper()) {
            return Err(AuthError::PasswordValidation(
                "New password must differ from the current one".to_string(),
            ));
        }
        new_password.ensure_not_containing(&[
            user.email.local_part(),
            user.acronym.as_str(),
            user.nom.as_str(),
            user.prenom.as_str(),
        ])?;

        credentials.update_password(UserPassword::from_raw(&new_password, self.config.pepper())?, now);
        credentials.reset_failures(now);
        self.repo.update_credentials(&credentials).await?;

        let ended = end_sessions(
            &*self.repo,
            user.id,
            Some(input.current_session),
            "password_changed",
        )
        .await?;

        record_audit(
            &*self.repo,
            AuditEvent::new(AuditEventType::PasswordChanged, now)
                .user(user.id)
                .session(input.current_session)
                .message(format!("{ended} other session(s) ended")),
        )
        .await;

        tracing::info!(user_id = %user.id, ended_sessions = ended, "Password changed");
        Ok(ended)
    }
}
