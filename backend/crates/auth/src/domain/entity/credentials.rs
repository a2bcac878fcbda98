//! Credentials Entity
//!
//! Everything secret about a user: password hash, TOTP secret, backup codes
//! and the failed-login counter that drives temporary lockout.

use chrono::{DateTime, Duration, Utc};
use kernel::id::UserId;

use crate::domain::value_object::{BackupCodes, TotpSecret, UserPassword};

#[derive(Debug, Clone)]
pub struct Credentials {
    pub user_id: UserId,
    pub password_hash: UserPassword,
    pub totp_secret: Option<TotpSecret>,
    /// Set once the user proved possession of the secret
    pub totp_enabled: bool,
    pub backup_codes: BackupCodes,
    pub failed_attempts: u16,
    pub last_failed_at: Option<DateTime<Utc>>,
    pub locked_until: Option<DateTime<Utc>>,
    pub password_changed_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Credentials {
    pub const MAX_LOGIN_FAILURES: u16 = 5;
    pub const LOCKOUT_MINUTES: i64 = 15;

    pub fn new(user_id: UserId, password_hash: UserPassword) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            password_hash,
            totp_secret: None,
            totp_enabled: false,
            backup_codes: BackupCodes::default(),
            failed_attempts: 0,
            last_failed_at: None,
            locked_until: None,
            password_changed_at: now,
            updated_at: now,
        }
    }

    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.is_some_and(|until| now < until)
    }

    /// Count a failed password. Returns true when this failure locked the account.
    pub fn record_failure(&mut self, now: DateTime<Utc>) -> bool {
        // a lock that has run out starts a fresh count
        if self.locked_until.is_some_and(|until| now >= until) {
            self.failed_attempts = 0;
            self.locked_until = None;
        }

        self.failed_attempts = self.failed_attempts.saturating_add(1);
        self.last_failed_at = Some(now);
        self.updated_at = now;

        if self.failed_attempts >= Self::MAX_LOGIN_FAILURES {
            self.locked_until = Some(now + Duration::minutes(Self::LOCKOUT_MINUTES));
            return true;
        }
        false
    }

    pub fn reset_failures(&mut self, now: DateTime<Utc>) {
        self.failed_attempts = 0;
        self.last_failed_at = None;
        self.locked_until = None;
        self.updated_at = now;
    }

    /// Second factor is enrolled and must be presented at login
    pub fn mfa_enabled(&self) -> bool {
        self.totp_enabled && self.totp_secret.is_some()
    }

    /// Store a new, not yet confirmed, secret. Any previous enrolment is dropped.
    pub fn begin_totp_setup(&mut self) -> TotpSecret {
        let secret = TotpSecret::generate();
        self.totp_secret = Some(secret.clone());
        self.totp_enabled = false;
        self.updated_at = Utc::now();
        secret
    }

    pub fn enable_totp(&mut self, backup_codes: BackupCodes) {
        if self.totp_secret.is_some() {
            self.totp_enabled = true;
            self.backup_codes = backup_codes;
            self.updated_at = Utc::now();
        }
    }

    /// Swap the backup codes of an enabled second factor
    pub fn replace_backup_codes(&mut self, backup_codes: BackupCodes, now: DateTime<Utc>) {
        if self.mfa_enabled() {
            self.backup_codes = backup_codes;
            self.updated_at = now;
        }
    }

    pub fn disable_mfa(&mut self) {
        self.totp_secret = None;
        self.totp_enabled = false;
        self.backup_codes = BackupCodes::default();
        self.updated_at = Utc::now();
    }

    pub fn update_password(&mut self, password_hash: UserPassword, now: DateTime<Utc>) {
        self.password_hash = password_hash;
        self.password_changed_at = now;
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value_object::RawPassword;

    fn credentials() -> Credentials {
        let raw = RawPassword::new("Acier-Inox-316L!".to_string()).unwrap();
        Credentials::new(UserId::new(), UserPassword::from_raw(&raw, None).unwrap())
    }

    #[test]
    fn test_lockout_after_five_failures() {
        let mut creds = credentials();
        let now = Utc::now();

        for _ in 0..4 {
            assert!(!creds.record_failure(now));
        }
        assert!(!creds.is_locked(now));

        assert!(creds.record_failure(now));
        assert!(creds.is_locked(now));
        assert!(creds.is_locked(now + Duration::minutes(14)));
        assert!(!creds.is_locked(now + Duration::minutes(15)));
    }

    #[test]
    fn test_failure_after_expired_lock_restarts_count() {
        let mut creds = credentials();
        let now = Utc::now();
        for _ in 0..5 {
            creds.record_failure(now);
        }
        let later = now + Duration::minutes(20);
        assert!(!creds.record_failure(later));
        assert_eq!(creds.failed_attempts, 1);
    }

    #[test]
    fn test_totp_enrolment() {
        let mut creds = credentials();
        creds.begin_totp_setup();
        assert!(!creds.mfa_enabled());

        let (codes, _) = BackupCodes::generate();
        creds.enable_totp(codes);
        assert!(creds.mfa_enabled());
        assert_eq!(creds.backup_codes.remaining(), 10);

        creds.disable_mfa();
        assert!(!creds.mfa_enabled());
        assert_eq!(creds.backup_codes.remaining(), 0);
    }
}
