//! Verify MFA Use Case
//!
//! Second step of a login that returned an MFA challenge.

use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use platform::client::ClientFingerprint;
use platform::crypto::sha256_hex;
use serde::Deserialize;

use crate::application::audit::record_audit;
use crate::application::config::AuthConfig;
use crate::application::login::{LoginSuccess, complete_login};
use crate::domain::entity::{AuditEvent, AuditEventType, ChallengeStatus};
use crate::domain::repository::{
    AuditRepository, CredentialsRepository, MfaChallengeRepository, SessionRepository,
    UserRepository,
};
use crate::error::{AuthError, AuthResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MfaMethod {
    Totp,
    BackupCode,
}

impl MfaMethod {
    /// Six digits are a TOTP code, anything else a backup code
    pub fn guess(code: &str) -> Self {
        let code = code.trim();
        if code.len() == 6 && code.chars().all(|c| c.is_ascii_digit()) {
            MfaMethod::Totp
        } else {
            MfaMethod::BackupCode
        }
    }
}

impl FromStr for MfaMethod {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "totp" => Ok(MfaMethod::Totp),
            "backup_code" => Ok(MfaMethod::BackupCode),
            _ => Err(AuthError::InvalidMfaCode),
        }
    }
}

pub struct VerifyMfaInput {
    pub challenge_token: String,
    pub code: String,
    /// Guessed from the code when absent
    pub method: Option<MfaMethod>,
}

pub struct VerifyMfaUseCase<R>
where
    R: UserRepository
        + CredentialsRepository
        + SessionRepository
        + MfaChallengeRepository
        + AuditRepository,
{
    repo: Arc<R>,
    config: Arc<AuthConfig>,
}

impl<R> VerifyMfaUseCase<R>
where
    R: UserRepository
        + CredentialsRepository
        + SessionRepository
        + MfaChallengeRepository
        + AuditRepository,
{
    pub fn new(repo: Arc<R>, config: Arc<AuthConfig>) -> Self {
        Self { repo, config }
    }

    pub async fn execute(
        &self,
        input: VerifyMfaInput,
        fingerprint: &ClientFingerprint,
    ) -> AuthResult<LoginSuccess> {
        let now = Utc::now();
        let token_hash = sha256_hex(input.challenge_token.trim().as_bytes());

        let mut challenge = self
            .repo
            .find_challenge_by_token_hash(&token_hash)
            .await?
            .ok_or(AuthError::MfaChallengeInvalid)?;

        if !challenge.can_attempt(now) {
            if challenge.is_expired(now) {
                challenge.mark_expired();
                self.repo.update_challenge(&challenge).await?;
            }
            return Err(AuthError::MfaChallengeInvalid);
        }

        let user = self
            .repo
            .find_user_by_id(challenge.user_id)
            .await?
            .ok_or(AuthError::MfaChallengeInvalid)?;
        if !user.is_active {
            return Err(AuthError::AccountDisabled);
        }

        let mut credentials = self
            .repo
            .find_credentials(user.id)
            .await?
            .ok_or_else(|| AuthError::Internal("Credentials not found".to_string()))?;

        let method = input.method.unwrap_or_else(|| MfaMethod::guess(&input.code));
        let valid = match method {
            MfaMethod::Totp => match &credentials.totp_secret {
                Some(secret) if credentials.totp_enabled => secret.verify(&input.code)?,
                _ => false,
            },
            MfaMethod::BackupCode => credentials.backup_codes.consume(&input.code),
        };

        if !valid {
            let updated = self.repo.record_challenge_failure(challenge.id).await?;
            let attempts = updated.as_ref().map_or(challenge.max_attempts, |c| c.attempts);
            let blocked = updated.is_none_or(|c| c.status == ChallengeStatus::Blocked);
            tracing::warn!(
                user_id = %user.id,
                challenge_id = %challenge.id,
                attempts,
                blocked,
                "MFA verification failed"
            );
            record_audit(
                &*self.repo,
                AuditEvent::new(AuditEventType::MfaFailed, now)
                    .user(user.id)
                    .client(fingerprint)
                    .message(format!("attempt {attempts}, blocked: {blocked}"))
                    .failed(),
            )
            .await;
            return Err(AuthError::InvalidMfaCode);
        }

        // Concurrent submissions of one challenge: only the first completes
        if !self.repo.complete_challenge(challenge.id, now).await? {
            return Err(AuthError::MfaChallengeInvalid);
        }

        if method == MfaMethod::BackupCode {
            tracing::info!(
                user_id = %user.id,
                remaining = credentials.backup_codes.remaining(),
                "Backup code consumed"
            );
        }
        record_audit(
            &*self.repo,
            AuditEvent::new(AuditEventType::MfaVerified, now)
                .user(user.id)
                .client(fingerprint)
                .message(match method {
                    MfaMethod::Totp => "totp",
                    MfaMethod::BackupCode => "backup_code",
                }),
        )
        .await;

        complete_login(&*self.repo, &self.config, user, credentials, fingerprint, now).await
    }
}
