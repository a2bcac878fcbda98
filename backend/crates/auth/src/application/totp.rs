//! TOTP enrolment
//!
//! `setup` stores a pending secret, `verify` confirms it with a first code
//! and hands out backup codes, `disable` removes the second factor.
//! Backup codes can be reissued against a current TOTP code.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use kernel::id::UserId;
use serde::Serialize;

use crate::application::audit::record_audit;
use crate::application::config::AuthConfig;
use crate::domain::entity::{AuditEvent, AuditEventType, Credentials};
use crate::domain::repository::{AuditRepository, CredentialsRepository, UserRepository};
use crate::domain::value_object::BackupCodes;
use crate::error::{AuthError, AuthResult};

/// Second-factor state of an account
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MfaStatus {
    pub enabled: bool,
    /// A secret was generated but not yet confirmed
    pub setup_pending: bool,
    pub methods: Vec<&'static str>,
    pub backup_codes_remaining: usize,
    /// Admin+ accounts may not turn MFA off
    pub can_disable: bool,
    pub updated_at: DateTime<Utc>,
}

/// Pending enrolment shown to the user
#[derive(Debug, Clone)]
pub struct TotpSetupOutput {
    /// Base32 secret for manual entry
    pub secret: String,
    /// PNG QR code, base64
    pub qr_code: String,
    pub otpauth_url: String,
}

pub struct TotpUseCase<R>
where
    R: UserRepository + CredentialsRepository + AuditRepository,
{
    repo: Arc<R>,
    config: Arc<AuthConfig>,
}

impl<R> TotpUseCase<R>
where
    R: UserRepository + CredentialsRepository + AuditRepository,
{
    pub fn new(repo: Arc<R>, config: Arc<AuthConfig>) -> Self {
        Self { repo, config }
    }

    pub async fn setup(&self, user_id: UserId) -> AuthResult<TotpSetupOutput> {
        let user = self
            .repo
            .find_user_by_id(user_id)
            .await?
            .ok_or(AuthError::UserNotFound)?;
        let mut credentials = self.credentials(user_id).await?;
        if credentials.mfa_enabled() {
            return Err(AuthError::MfaAlreadyEnabled);
        }

        let secret = credentials.begin_totp_setup();
        let issuer = self.config.totp_issuer.as_str();
        let account = user.email.as_str();
        let output = TotpSetupOutput {
            secret: secret.as_base32().to_string(),
            qr_code: secret.qr_code_base64(issuer, account)?,
            otpauth_url: secret.otpauth_url(issuer, account)?,
        };
        self.repo.update_credentials(&credentials).await?;

        tracing::info!(user_id = %user_id, "TOTP setup started");
        Ok(output)
    }

    /// Confirm the pending secret; returns the backup codes in clear, once
    pub async fn verify(&self, user_id: UserId, code: &str) -> AuthResult<Vec<String>> {
        let mut credentials = self.credentials(user_id).await?;
        if credentials.mfa_enabled() {
            return Err(AuthError::MfaAlreadyEnabled);
        }
        let secret = credentials.totp_secret.as_ref().ok_or(AuthError::MfaNotSetup)?;
        if !secret.verify(code)? {
            tracing::warn!(user_id = %user_id, "TOTP setup verification failed");
            return Err(AuthError::InvalidMfaCode);
        }

        let (backup_codes, clear_codes) = BackupCodes::generate();
        credentials.enable_totp(backup_codes);
        self.repo.update_credentials(&credentials).await?;

        self.audit(AuditEventType::MfaEnabled, user_id).await;
        tracing::info!(user_id = %user_id, "TOTP enabled");
        Ok(clear_codes)
    }

    pub async fn status(&self, user_id: UserId) -> AuthResult<MfaStatus> {
        let user = self
            .repo
            .find_user_by_id(user_id)
            .await?
            .ok_or(AuthError::UserNotFound)?;
        let credentials = self.credentials(user_id).await?;

        let enabled = credentials.mfa_enabled();
        let mut methods = Vec::new();
        if enabled {
            methods.push("totp");
            if credentials.backup_codes.remaining() > 0 {
                methods.push("backup_code");
            }
        }

        Ok(MfaStatus {
            enabled,
            setup_pending: !enabled && credentials.totp_secret.is_some(),
            methods,
            backup_codes_remaining: credentials.backup_codes.remaining(),
            can_disable: enabled && !user.global_role.is_admin_or_higher(),
            updated_at: credentials.updated_at,
        })
    }

    /// Replace every backup code. Requires a TOTP code: a backup code cannot
    /// be used to mint new ones.
    pub async fn regenerate_backup_codes(
        &self,
        user_id: UserId,
        code: &str,
    ) -> AuthResult<Vec<String>> {
        let mut credentials = self.credentials(user_id).await?;
        if !credentials.mfa_enabled() {
            return Err(AuthError::MfaNotSetup);
        }
        let totp_ok = match &credentials.totp_secret {
            Some(secret) => secret.verify(code)?,
            None => false,
        };
        if !totp_ok {
            tracing::warn!(user_id = %user_id, "Backup code regeneration refused");
            return Err(AuthError::InvalidMfaCode);
        }

        let (backup_codes, clear_codes) = BackupCodes::generate();
        credentials.replace_backup_codes(backup_codes, Utc::now());
        self.repo.update_credentials(&credentials).await?;

        self.audit(AuditEventType::BackupCodesRegenerated, user_id).await;
        tracing::info!(user_id = %user_id, "Backup codes regenerated");
        Ok(clear_codes)
    }

    pub async fn disable(&self, user_id: UserId, code: &str) -> AuthResult<()> {
        let user = self
            .repo
            .find_user_by_id(user_id)
            .await?
            .ok_or(AuthError::UserNotFound)?;
        if user.global_role.is_admin_or_higher() {
            return Err(AuthError::MfaDisableForbidden);
        }

        let mut credentials = self.credentials(user_id).await?;
        if !credentials.mfa_enabled() {
            return Err(AuthError::MfaNotSetup);
        }
        let totp_ok = match &credentials.totp_secret {
            Some(secret) => secret.verify(code)?,
            None => false,
        };
        if !totp_ok && !credentials.backup_codes.consume(code) {
            return Err(AuthError::InvalidMfaCode);
        }

        credentials.disable_mfa();
        self.repo.update_credentials(&credentials).await?;

        self.audit(AuditEventType::MfaDisabled, user_id).await;
        tracing::info!(user_id = %user_id, "TOTP disabled");
        Ok(())
    }

    async fn credentials(&self, user_id: UserId) -> AuthResult<Credentials> {
        self.repo
            .find_credentials(user_id)
            .await?
            .ok_or(AuthError::UserNotFound)
    }

    async fn audit(&self, event_type: AuditEventType, user_id: UserId) {
        record_audit(&*self.repo, AuditEvent::new(event_type, Utc::now()).user(user_id)).await;
    }
}
