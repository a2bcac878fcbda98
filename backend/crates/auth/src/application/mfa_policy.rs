//! Actions that need a second factor when the user has one enrolled

use serde::Deserialize;

use crate::domain::entity::Credentials;
use crate::error::{AuthError, AuthResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensitiveAction {
    ChangePassword,
    UpdateEmail,
    DeleteAccount,
    AdminAccess,
    FinancialOperation,
}

impl SensitiveAction {
    pub fn parse(action: &str) -> Option<Self> {
        match action {
            "change_password" => Some(Self::ChangePassword),
            "update_email" => Some(Self::UpdateEmail),
            "delete_account" => Some(Self::DeleteAccount),
            "admin_access" => Some(Self::AdminAccess),
            "financial_operation" => Some(Self::FinancialOperation),
            _ => None,
        }
    }
}

/// Whether `action` must be confirmed with a second factor
pub fn requires_mfa_for_action(credentials: &Credentials, action: &str) -> bool {
    credentials.mfa_enabled() && SensitiveAction::parse(action).is_some()
}

/// Check the TOTP code presented for a sensitive action
pub fn verify_step_up(credentials: &Credentials, code: Option<&str>) -> AuthResult<()> {
    let Some(secret) = credentials.totp_secret.as_ref().filter(|_| credentials.totp_enabled) else {
        return Ok(());
    };
    match code {
        None => Err(AuthError::MfaRequired),
        Some(code) if secret.verify(code)? => Ok(()),
        Some(_) => Err(AuthError::InvalidMfaCode),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value_object::{BackupCodes, RawPassword, UserPassword};
    use kernel::id::UserId;

    fn credentials() -> Credentials {
        let raw = RawPassword::for_login("Laminoir-Froid-2024".into());
        Credentials::new(UserId::new(), UserPassword::from_raw(&raw, None).unwrap())
    }

    #[test]
    fn test_only_sensitive_actions_with_mfa() {
        let mut creds = credentials();
        assert!(!requires_mfa_for_action(&creds, "change_password"));

        creds.begin_totp_setup();
        creds.enable_totp(BackupCodes::generate().0);
        assert!(requires_mfa_for_action(&creds, "change_password"));
        assert!(requires_mfa_for_action(&creds, "financial_operation"));
        assert!(!requires_mfa_for_action(&creds, "view_dashboard"));
    }

    #[test]
    fn test_step_up() {
        let mut creds = credentials();
        assert!(verify_step_up(&creds, None).is_ok());

        let secret = creds.begin_totp_setup();
        creds.enable_totp(BackupCodes::generate().0);
        assert!(matches!(verify_step_up(&creds, None), Err(AuthError::MfaRequired)));
        assert!(matches!(
            verify_step_up(&creds, Some("abcdef")),
            Err(AuthError::InvalidMfaCode)
        ));

        let now = chrono::Utc::now().timestamp() as u64;
        assert!(verify_step_up(&creds, Some(&secret.code_at(now))).is_ok());
    }
}
