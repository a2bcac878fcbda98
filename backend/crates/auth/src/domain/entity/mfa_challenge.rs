//! Pending second-factor step between password check and session creation

use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use derive_more::Display;
use kernel::error::app_error::AppError;
use kernel::id::{MfaChallengeId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ChallengeStatus {
    #[display("pending")]
    Pending,
    #[display("verified")]
    Verified,
    #[display("failed")]
    Failed,
    #[display("expired")]
    Expired,
    #[display("blocked")]
    Blocked,
}

impl FromStr for ChallengeStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "verified" => Ok(Self::Verified),
            "failed" => Ok(Self::Failed),
            "expired" => Ok(Self::Expired),
            "blocked" => Ok(Self::Blocked),
            other => Err(AppError::internal(format!("Unknown challenge status: {other}"))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MfaChallenge {
    pub id: MfaChallengeId,
    pub user_id: UserId,
    /// SHA-256 hex of the opaque challenge token handed to the client
    pub token_hash: String,
    pub status: ChallengeStatus,
    pub attempts: u8,
    pub max_attempts: u8,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub verified_at: Option<DateTime<Utc>>,
}

impl MfaChallenge {
    pub const TTL_MINUTES: i64 = 5;
    pub const MAX_ATTEMPTS: u8 = 5;

    pub fn new(
        user_id: UserId,
        token_hash: String,
        ip: Option<String>,
        user_agent: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: MfaChallengeId::new(),
            user_id,
            token_hash,
            status: ChallengeStatus::Pending,
            attempts: 0,
            max_attempts: Self::MAX_ATTEMPTS,
            ip,
            user_agent,
            created_at: now,
            expires_at: now + Duration::minutes(Self::TTL_MINUTES),
            verified_at: None,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Pending, unexpired and with attempts left
    pub fn can_attempt(&self, now: DateTime<Utc>) -> bool {
        self.status == ChallengeStatus::Pending
            && !self.is_expired(now)
            && self.attempts < self.max_attempts
    }

    /// Returns `true` when this failure exhausted the attempts
    pub fn record_failure(&mut self) -> bool {
        self.attempts = self.attempts.saturating_add(1);
        if self.attempts >= self.max_attempts {
            self.status = ChallengeStatus::Blocked;
            true
        } else {
            false
        }
    }

    pub fn mark_verified(&mut self, now: DateTime<Utc>) {
        self.status = ChallengeStatus::Verified;
        self.verified_at = Some(now);
    }

    pub fn mark_expired(&mut self) {
        if self.status == ChallengeStatus::Pending {
            self.status = ChallengeStatus::Expired;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocks_after_max_attempts() {
        let now = Utc::now();
        let mut c = MfaChallenge::new(UserId::new(), "h".into(), None, None, now);

        for _ in 0..MfaChallenge::MAX_ATTEMPTS - 1 {
            assert!(!c.record_failure());
            assert!(c.can_attempt(now));
        }
        assert!(c.record_failure());
        assert_eq!(c.status, ChallengeStatus::Blocked);
        assert!(!c.can_attempt(now));
    }

    #[test]
    fn test_expires_after_five_minutes() {
        let now = Utc::now();
        let mut c = MfaChallenge::new(UserId::new(), "h".into(), None, None, now);
        assert!(c.can_attempt(now + Duration::minutes(4)));
        assert!(!c.can_attempt(now + Duration::minutes(5)));

        c.mark_expired();
        assert_eq!(c.status, ChallengeStatus::Expired);
    }

    #[test]
    fn test_verified_is_terminal_for_attempts() {
        let now = Utc::now();
        let mut c = MfaChallenge::new(UserId::new(), "h".into(), None, None, now);
        c.mark_verified(now);
        assert!(!c.can_attempt(now));
        c.mark_expired();
        assert_eq!(c.status, ChallengeStatus::Verified);
    }
}
