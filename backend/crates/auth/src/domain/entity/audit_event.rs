//! Audit Event Entity
//!
//! One row of the security audit trail. Events are append-only; the only
//! mutation ever applied to the table is the retention purge.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use derive_more::Display;
use kernel::error::app_error::AppError;
use kernel::id::{AuditEventId, SessionId, SocieteId, UserId};
use platform::client::ClientFingerprint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
pub enum AuditEventType {
    #[display("LOGIN_SUCCESS")]
    LoginSuccess,
    #[display("LOGIN_FAILED")]
    LoginFailed,
    #[display("ACCOUNT_LOCKED")]
    AccountLocked,
    #[display("MFA_VERIFIED")]
    MfaVerified,
    #[display("MFA_FAILED")]
    MfaFailed,
    #[display("MFA_ENABLED")]
    MfaEnabled,
    #[display("MFA_DISABLED")]
    MfaDisabled,
    #[display("MFA_RESET")]
    MfaReset,
    #[display("BACKUP_CODES_REGENERATED")]
    BackupCodesRegenerated,
    #[display("PASSWORD_CHANGED")]
    PasswordChanged,
    #[display("REFRESH_TOKEN_REUSE")]
    RefreshTokenReuse,
    #[display("FORCED_LOGOUT")]
    ForcedLogout,
    #[display("ACCESS_DENIED")]
    AccessDenied,
}

impl AuditEventType {
    pub const ALL: [AuditEventType; 13] = [
        Self::LoginSuccess,
        Self::LoginFailed,
        Self::AccountLocked,
        Self::MfaVerified,
        Self::MfaFailed,
        Self::MfaEnabled,
        Self::MfaDisabled,
        Self::MfaReset,
        Self::BackupCodesRegenerated,
        Self::PasswordChanged,
        Self::RefreshTokenReuse,
        Self::ForcedLogout,
        Self::AccessDenied,
    ];

    pub fn default_severity(self) -> AuditSeverity {
        match self {
            Self::LoginSuccess
            | Self::MfaVerified
            | Self::MfaEnabled
            | Self::BackupCodesRegenerated
            | Self::PasswordChanged => AuditSeverity::Info,
            Self::LoginFailed
            | Self::MfaFailed
            | Self::MfaDisabled
            | Self::MfaReset
            | Self::ForcedLogout
            | Self::AccessDenied => AuditSeverity::Warning,
            Self::AccountLocked => AuditSeverity::Error,
            Self::RefreshTokenReuse => AuditSeverity::Critical,
        }
    }
}

impl FromStr for AuditEventType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.to_string() == s)
            .ok_or_else(|| AppError::bad_request(format!("Unknown audit event type: {s}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
pub enum AuditSeverity {
    #[display("INFO")]
    Info,
    #[display("WARNING")]
    Warning,
    #[display("ERROR")]
    Error,
    #[display("CRITICAL")]
    Critical,
}

impl FromStr for AuditSeverity {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INFO" => Ok(Self::Info),
            "WARNING" => Ok(Self::Warning),
            "ERROR" => Ok(Self::Error),
            "CRITICAL" => Ok(Self::Critical),
            other => Err(AppError::internal(format!("Unknown audit severity: {other}"))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub id: AuditEventId,
    pub occurred_at: DateTime<Utc>,
    pub event_type: AuditEventType,
    pub severity: AuditSeverity,
    pub success: bool,
    pub user_id: Option<UserId>,
    pub societe_id: Option<SocieteId>,
    pub session_id: Option<SessionId>,
    pub resource: Option<String>,
    pub action: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub message: Option<String>,
}

impl AuditEvent {
    /// Successful event with the type's default severity
    pub fn new(event_type: AuditEventType, now: DateTime<Utc>) -> Self {
        Self {
            id: AuditEventId::new(),
            occurred_at: now,
            event_type,
            severity: event_type.default_severity(),
            success: true,
            user_id: None,
            societe_id: None,
            session_id: None,
            resource: None,
            action: None,
            ip: None,
            user_agent: None,
            message: None,
        }
    }

    pub fn user(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn societe(mut self, societe_id: Option<SocieteId>) -> Self {
        self.societe_id = societe_id;
        self
    }

    pub fn session(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    pub fn target(mut self, resource: impl Into<String>, action: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self.action = Some(action.into());
        self
    }

    pub fn client(mut self, fingerprint: &ClientFingerprint) -> Self {
        self.ip = fingerprint.ip_string();
        self.user_agent = fingerprint.user_agent.clone();
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn failed(mut self) -> Self {
        self.success = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_codes_round_trip() {
        for t in AuditEventType::ALL {
            assert_eq!(t.to_string().parse::<AuditEventType>().unwrap(), t);
        }
        assert!("LOGIN".parse::<AuditEventType>().is_err());
        assert_eq!(
            "CRITICAL".parse::<AuditSeverity>().unwrap(),
            AuditSeverity::Critical
        );
    }

    #[test]
    fn test_builder() {
        let now = Utc::now();
        let user_id = UserId::new();
        let event = AuditEvent::new(AuditEventType::LoginFailed, now)
            .user(user_id)
            .client(&ClientFingerprint::anonymous())
            .message("wrong password")
            .failed();

        assert_eq!(event.severity, AuditSeverity::Warning);
        assert!(!event.success);
        assert_eq!(event.user_id, Some(user_id));
        assert_eq!(event.ip, None);
        assert_eq!(
            AuditEventType::RefreshTokenReuse.default_severity(),
            AuditSeverity::Critical
        );
    }
}
