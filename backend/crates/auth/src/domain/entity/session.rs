//! User Session Entity
//!
//! One row per login. The session id is carried in both tokens (`sid`), and
//! the SHA-256 of the refresh token currently in circulation is stored so a
//! replayed, already-rotated refresh token can be detected.

use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use derive_more::Display;
use kernel::error::app_error::AppError;
use kernel::id::{SessionId, SiteId, SocieteId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum SessionStatus {
    #[display("active")]
    Active,
    /// Ended by the user (logout)
    #[display("ended")]
    Ended,
    /// Ended by an administrator or by refresh-token reuse detection
    #[display("forced_logout")]
    Forced,
    #[display("expired")]
    Expired,
}

impl FromStr for SessionStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "ended" => Ok(Self::Ended),
            "forced_logout" => Ok(Self::Forced),
            "expired" => Ok(Self::Expired),
            other => Err(AppError::internal(format!("Unknown session status: {other}"))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct UserSession {
    pub id: SessionId,
    pub user_id: UserId,
    pub societe_id: Option<SocieteId>,
    pub site_id: Option<SiteId>,
    /// SHA-256 hex of the current refresh token
    pub refresh_token_hash: String,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub login_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: SessionStatus,
    pub ended_at: Option<DateTime<Utc>>,
    pub ended_by: Option<UserId>,
    pub logout_reason: Option<String>,
}

impl UserSession {
    /// Sessions with no activity for this long are expired by cleanup
    pub const IDLE_TIMEOUT_HOURS: i64 = 24;

    pub fn new(
        user_id: UserId,
        ip: Option<String>,
        user_agent: Option<String>,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: SessionId::new(),
            user_id,
            societe_id: None,
            site_id: None,
            refresh_token_hash: String::new(),
            ip,
            user_agent,
            login_at: now,
            last_activity_at: now,
            expires_at: now + ttl,
            status: SessionStatus::Active,
            ended_at: None,
            ended_by: None,
            logout_reason: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Active and past neither its expiry nor the idle timeout
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.is_active() && !self.is_expired(now)
    }

    pub fn is_idle(&self, now: DateTime<Utc>) -> bool {
        now - self.last_activity_at > Duration::hours(Self::IDLE_TIMEOUT_HOURS)
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_activity_at = now;
    }

    pub fn rotate_refresh(&mut self, refresh_token_hash: String, expires_at: DateTime<Utc>, now: DateTime<Utc>) {
        self.refresh_token_hash = refresh_token_hash;
        self.expires_at = expires_at;
        self.last_activity_at = now;
    }

    pub fn bind_tenant(&mut self, societe_id: SocieteId, site_id: Option<SiteId>) {
        self.societe_id = Some(societe_id);
        self.site_id = site_id;
    }

    pub fn end(&mut self, reason: impl Into<String>, now: DateTime<Utc>) {
        self.close(SessionStatus::Ended, None, reason.into(), now);
    }

    pub fn force(&mut self, by: Option<UserId>, reason: impl Into<String>, now: DateTime<Utc>) {
        self.close(SessionStatus::Forced, by, reason.into(), now);
    }

    pub fn expire(&mut self, now: DateTime<Utc>) {
        self.close(SessionStatus::Expired, None, "expired".to_string(), now);
    }

    fn close(&mut self, status: SessionStatus, by: Option<UserId>, reason: String, now: DateTime<Utc>) {
        if !self.is_active() {
            return;
        }
        self.status = status;
        self.ended_at = Some(now);
        self.ended_by = by;
        self.logout_reason = Some(reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(now: DateTime<Utc>) -> UserSession {
        UserSession::new(UserId::new(), None, None, Duration::days(7), now)
    }

    #[test]
    fn test_status_round_trips_through_text() {
        for status in [
            SessionStatus::Active,
            SessionStatus::Ended,
            SessionStatus::Forced,
            SessionStatus::Expired,
        ] {
            assert_eq!(status.to_string().parse::<SessionStatus>().unwrap(), status);
        }
        assert!("closed".parse::<SessionStatus>().is_err());
    }

    #[test]
    fn test_end_only_once() {
        let now = Utc::now();
        let admin = UserId::new();
        let mut s = session(now);

        s.force(Some(admin), "suspicious activity", now);
        assert_eq!(s.status, SessionStatus::Forced);
        assert_eq!(s.ended_by, Some(admin));

        s.end("logout", now + Duration::minutes(1));
        assert_eq!(s.status, SessionStatus::Forced);
        assert_eq!(s.logout_reason.as_deref(), Some("suspicious activity"));
        assert_eq!(s.ended_at, Some(now));
    }

    #[test]
    fn test_usable_and_idle() {
        let now = Utc::now();
        let mut s = session(now);
        assert!(s.is_usable(now));
        assert!(!s.is_usable(now + Duration::days(8)));

        assert!(s.is_idle(now + Duration::hours(25)));
        s.touch(now + Duration::hours(20));
        assert!(!s.is_idle(now + Duration::hours(25)));

        s.expire(now);
        assert!(!s.is_usable(now));
    }

    #[test]
    fn test_rotate_refresh() {
        let now = Utc::now();
        let mut s = session(now);
        let later = now + Duration::hours(1);
        s.rotate_refresh("abc".into(), later + Duration::days(7), later);
        assert_eq!(s.refresh_token_hash, "abc");
        assert_eq!(s.last_activity_at, later);
    }
}
