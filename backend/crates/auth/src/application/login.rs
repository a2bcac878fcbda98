//! Login Use Case
//!
//! Password step of authentication. Returns either a full login (session +
//! tokens) or, when a second factor is enrolled, an MFA challenge to be
//! completed through [`VerifyMfaUseCase`](super::VerifyMfaUseCase).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use kernel::id::SessionId;
use platform::client::ClientFingerprint;
use platform::crypto::{random_token, sha256_hex};

use crate::application::audit::record_audit;
use crate::application::config::AuthConfig;
use crate::application::tokens::{TokenPair, issue_tokens, session_ttl};
use crate::domain::entity::{
    AuditEvent, AuditEventType, Credentials, MfaChallenge, User, UserSession,
};
use crate::domain::repository::{
    AuditRepository, CredentialsRepository, MfaChallengeRepository, SessionRepository,
    UserRepository,
};
use crate::domain::value_object::{LoginIdentifier, RawPassword, UserPassword};
use crate::error::{AuthError, AuthResult};

/// Second factors a challenge can be answered with
pub const MFA_METHODS: [&str; 2] = ["totp", "backup_code"];

/// Login input
pub struct LoginInput {
    /// Email or acronym
    pub identifier: String,
    pub password: String,
}

/// Completed login
#[derive(Debug)]
pub struct LoginSuccess {
    pub user: User,
    pub session_id: SessionId,
    pub tokens: TokenPair,
}

#[derive(Debug)]
pub enum LoginOutcome {
    Authenticated(LoginSuccess),
    MfaRequired {
        /// Opaque token identifying the pending challenge
        challenge_token: String,
        methods: Vec<&'static str>,
        expires_in: i64,
    },
}

/// Login use case
pub struct LoginUseCase<R>
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

impl<R> LoginUseCase<R>
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
        input: LoginInput,
        fingerprint: &ClientFingerprint,
    ) -> AuthResult<LoginOutcome> {
        let now = Utc::now();
        let password = RawPassword::for_login(input.password);

        let user = match LoginIdentifier::parse(&input.identifier) {
            Ok(LoginIdentifier::Email(email)) => self.repo.find_user_by_email(&email).await?,
            Ok(LoginIdentifier::Acronym(acronym)) => {
                self.repo.find_user_by_acronym(&acronym).await?
            }
            Err(_) => None,
        };

        let Some(user) = user else {
            // same cost as a real check so unknown accounts are not observable
            password.burn_verification();
            record_audit(
                &*self.repo,
                AuditEvent::new(AuditEventType::LoginFailed, now)
                    .client(fingerprint)
                    .message("unknown identifier")
                    .failed(),
            )
            .await;
            return Err(AuthError::InvalidCredentials);
        };

        if !user.is_active {
            record_audit(
                &*self.repo,
                AuditEvent::new(AuditEventType::LoginFailed, now)
                    .user(user.id)
                    .client(fingerprint)
                    .message("account disabled")
                    .failed(),
            )
            .await;
            return Err(AuthError::AccountDisabled);
        }

        let mut credentials = self
            .repo
            .find_credentials(user.id)
            .await?
            .ok_or_else(|| AuthError::Internal("Credentials not found".to_string()))?;

        if let Some(until) = credentials.locked_until.filter(|_| credentials.is_locked(now)) {
            return Err(AuthError::AccountLocked { until });
        }

        if !credentials
            .password_hash
            .verify(&password, self.config.pepper())
        {
            let locked = credentials.record_failure(now);
            self.repo.update_credentials(&credentials).await?;

            let event_type = if locked {
                AuditEventType::AccountLocked
            } else {
                AuditEventType::LoginFailed
            };
            record_audit(
                &*self.repo,
                AuditEvent::new(event_type, now)
                    .user(user.id)
                    .client(fingerprint)
                    .message(format!("{} failed attempts", credentials.failed_attempts))
                    .failed(),
            )
            .await;

            if locked {
                tracing::warn!(
                    user_id = %user.id,
                    attempts = credentials.failed_attempts,
                    "Account locked after repeated login failures"
                );
            } else {
                tracing::warn!(
                    user_id = %user.id,
                    attempts = credentials.failed_attempts,
                    "Login failed: wrong password"
                );
            }
            return Err(AuthError::InvalidCredentials);
        }

        if credentials.password_hash.needs_rehash() {
            credentials.password_hash = UserPassword::from_raw(&password, self.config.pepper())?;
            tracing::debug!(user_id = %user.id, "Password hash upgraded");
        }

        if credentials.mfa_enabled() {
            if self.config.mfa_emergency_bypass && user.global_role.is_super_admin() {
                tracing::warn!(user_id = %user.id, "MFA skipped by emergency bypass");
            } else {
                self.repo.update_credentials(&credentials).await?;
                return self.open_challenge(&user, fingerprint, now).await;
            }
        }

        let success =
            complete_login(&*self.repo, &self.config, user, credentials, fingerprint, now).await?;
        Ok(LoginOutcome::Authenticated(success))
    }

    async fn open_challenge(
        &self,
        user: &User,
        fingerprint: &ClientFingerprint,
        now: DateTime<Utc>,
    ) -> AuthResult<LoginOutcome> {
        let challenge_token = random_token(32);
        let challenge = MfaChallenge::new(
            user.id,
            sha256_hex(challenge_token.as_bytes()),
            fingerprint.ip_string(),
            fingerprint.user_agent.clone(),
            now,
        );
        self.repo.insert_challenge(&challenge).await?;

        tracing::info!(
            user_id = %user.id,
            challenge_id = %challenge.id,
            "MFA challenge issued"
        );

        Ok(LoginOutcome::MfaRequired {
            challenge_token,
            methods: MFA_METHODS.to_vec(),
            expires_in: (challenge.expires_at - now).num_seconds(),
        })
    }
}

/// Open a session and issue the base (non-tenant) token pair
pub(crate) async fn complete_login<R>(
    repo: &R,
    config: &AuthConfig,
    mut user: User,
    mut credentials: Credentials,
    fingerprint: &ClientFingerprint,
    now: DateTime<Utc>,
) -> AuthResult<LoginSuccess>
where
    R: UserRepository + CredentialsRepository + SessionRepository + AuditRepository,
{
    let mut session = UserSession::new(
        user.id,
        fingerprint.ip_string(),
        fingerprint.user_agent.clone(),
        session_ttl(config),
        now,
    );
    let issued = issue_tokens(config, &user, session.id, None, Vec::new(), now)?;
    session.rotate_refresh(issued.refresh_token_hash, issued.refresh_expires_at, now);
    repo.insert_session(&session).await?;

    credentials.reset_failures(now);
    repo.update_credentials(&credentials).await?;

    user.record_login(now);
    repo.update_user(&user).await?;

    record_audit(
        repo,
        AuditEvent::new(AuditEventType::LoginSuccess, now)
            .user(user.id)
            .session(session.id)
            .client(fingerprint),
    )
    .await;

    tracing::info!(
        user_id = %user.id,
        session_id = %session.id,
        role = %user.global_role,
        "User logged in"
    );

    Ok(LoginSuccess {
        user,
        session_id: session.id,
        tokens: issued.pair,
    })
}
