//! Repository Traits
//!
//! Interfaces for data persistence. Implementations are in the infra layer
//! (`PgAuthRepository`, `InMemoryAuthRepository`). Method names are unique
//! across traits so one store can implement all of them.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use kernel::id::{MfaChallengeId, RoleDefinitionId, SessionId, SocieteId, UserId};
use serde::Serialize;

use crate::domain::entity::{
    AuditEvent, AuditEventType, Credentials, Membership, MfaChallenge, RoleDefinition, Societe,
    User, UserSession,
};
use crate::domain::value_object::{Acronym, Email, SocieteRole};
use crate::error::AuthResult;

#[trait_variant::make(UserRepository: Send)]
pub trait LocalUserRepository {
    async fn insert_user(&self, user: &User) -> AuthResult<()>;

    async fn find_user_by_id(&self, user_id: UserId) -> AuthResult<Option<User>>;

    async fn find_user_by_email(&self, email: &Email) -> AuthResult<Option<User>>;

    async fn find_user_by_acronym(&self, acronym: &Acronym) -> AuthResult<Option<User>>;

    async fn update_user(&self, user: &User) -> AuthResult<()>;
}

#[trait_variant::make(CredentialsRepository: Send)]
pub trait LocalCredentialsRepository {
    async fn insert_credentials(&self, credentials: &Credentials) -> AuthResult<()>;

    async fn find_credentials(&self, user_id: UserId) -> AuthResult<Option<Credentials>>;

    async fn update_credentials(&self, credentials: &Credentials) -> AuthResult<()>;
}

#[trait_variant::make(SocieteRepository: Send)]
pub trait LocalSocieteRepository {
    /// Insert or replace a société together with its sites
    async fn save_societe(&self, societe: &Societe) -> AuthResult<()>;

    /// Société with its sites
    async fn find_societe(&self, societe_id: SocieteId) -> AuthResult<Option<Societe>>;

    async fn list_active_societes(&self) -> AuthResult<Vec<Societe>>;
}

#[trait_variant::make(MembershipRepository: Send)]
pub trait LocalMembershipRepository {
    /// Insert or replace the membership for `(user_id, societe_id)`
    async fn save_membership(&self, membership: &Membership) -> AuthResult<()>;

    /// Membership regardless of its active flag or expiry
    async fn find_membership(
        &self,
        user_id: UserId,
        societe_id: SocieteId,
    ) -> AuthResult<Option<Membership>>;

    async fn list_memberships(&self, user_id: UserId) -> AuthResult<Vec<Membership>>;

    /// Make `societe_id` the only default membership of the user
    async fn set_default_membership(&self, user_id: UserId, societe_id: SocieteId)
    -> AuthResult<()>;
}

#[trait_variant::make(RoleDefinitionRepository: Send)]
pub trait LocalRoleDefinitionRepository {
    async fn save_role_definition(&self, definition: &RoleDefinition) -> AuthResult<()>;

    async fn find_role_definition(
        &self,
        role_id: RoleDefinitionId,
    ) -> AuthResult<Option<RoleDefinition>>;

    /// Active definition specialising `role_type` in `societe_id`
    async fn find_role_definition_for(
        &self,
        societe_id: SocieteId,
        role_type: SocieteRole,
    ) -> AuthResult<Option<RoleDefinition>>;
}

/// Aggregate counters for the session admin screen
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub total: u64,
    pub active: u64,
    pub today: u64,
    pub forced: u64,
}

#[trait_variant::make(SessionRepository: Send)]
pub trait LocalSessionRepository {
    async fn insert_session(&self, session: &UserSession) -> AuthResult<()>;

    async fn find_session(&self, session_id: SessionId) -> AuthResult<Option<UserSession>>;

    /// Write a session back while the stored row is still active.
    /// Returns `false` when it had already ended, which is left untouched.
    async fn update_session(&self, session: &UserSession) -> AuthResult<bool>;

    /// Compare-and-swap on the refresh token: writes `session` only if the
    /// stored row is active and still holds `expected_hash`. Of several
    /// concurrent rotations presenting the same token, exactly one wins.
    async fn rotate_session_refresh(
        &self,
        session: &UserSession,
        expected_hash: &str,
    ) -> AuthResult<bool>;

    /// Only bumps `last_activity_at`
    async fn touch_session(&self, session_id: SessionId, at: DateTime<Utc>) -> AuthResult<()>;

    /// Active sessions of one user, or of every user, most recent activity first
    async fn list_active_sessions(&self, user_id: Option<UserId>) -> AuthResult<Vec<UserSession>>;

    /// Every session of a user, most recent login first
    async fn list_user_sessions(&self, user_id: UserId, limit: u32)
    -> AuthResult<Vec<UserSession>>;

    async fn session_stats(&self, since: DateTime<Utc>) -> AuthResult<SessionStats>;

    /// Mark active sessions past expiry or idle since before `idle_cutoff` as expired
    async fn expire_stale_sessions(
        &self,
        now: DateTime<Utc>,
        idle_cutoff: DateTime<Utc>,
    ) -> AuthResult<u64>;
}

#[trait_variant::make(MfaChallengeRepository: Send)]
pub trait LocalMfaChallengeRepository {
    async fn insert_challenge(&self, challenge: &MfaChallenge) -> AuthResult<()>;

    async fn find_challenge_by_token_hash(
        &self,
        token_hash: &str,
    ) -> AuthResult<Option<MfaChallenge>>;

    async fn update_challenge(&self, challenge: &MfaChallenge) -> AuthResult<()>;

    /// Count one failed attempt on a pending challenge, blocking it when the
    /// attempts run out. Returns the updated challenge, or `None` if it was
    /// no longer pending.
    async fn record_challenge_failure(
        &self,
        challenge_id: MfaChallengeId,
    ) -> AuthResult<Option<MfaChallenge>>;

    /// Move a pending, unexpired challenge with attempts left to `verified`.
    /// Only one caller can complete a given challenge.
    async fn complete_challenge(
        &self,
        challenge_id: MfaChallengeId,
        now: DateTime<Utc>,
    ) -> AuthResult<bool>;

    /// Drop challenges that expired before `now`
    async fn purge_expired_challenges(&self, now: DateTime<Utc>) -> AuthResult<u64>;
}

/// Criteria for an audit trail search; unset fields match everything
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub user_id: Option<UserId>,
    pub societe_id: Option<SocieteId>,
    pub event_types: Vec<AuditEventType>,
    pub success: Option<bool>,
    pub limit: u32,
    pub offset: u32,
}

impl AuditFilter {
    pub fn matches(&self, event: &AuditEvent) -> bool {
        self.from.is_none_or(|from| event.occurred_at >= from)
            && self.to.is_none_or(|to| event.occurred_at <= to)
            && self.user_id.is_none_or(|id| event.user_id == Some(id))
            && self.societe_id.is_none_or(|id| event.societe_id == Some(id))
            && (self.event_types.is_empty() || self.event_types.contains(&event.event_type))
            && self.success.is_none_or(|success| event.success == success)
    }
}

/// One page of audit events, newest first
#[derive(Debug, Clone, Default)]
pub struct AuditPage {
    pub events: Vec<AuditEvent>,
    /// Matching events before pagination
    pub total: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditStatistics {
    pub total: u64,
    pub failures: u64,
    pub by_event_type: BTreeMap<String, u64>,
    pub by_severity: BTreeMap<String, u64>,
    /// Users with the most events, at most ten
    pub top_users: Vec<UserEventCount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserEventCount {
    pub user_id: UserId,
    pub count: u64,
}

#[trait_variant::make(AuditRepository: Send)]
pub trait LocalAuditRepository {
    async fn record_audit_event(&self, event: &AuditEvent) -> AuthResult<()>;

    async fn search_audit_events(&self, filter: &AuditFilter) -> AuthResult<AuditPage>;

    /// Counters over `[from, to]`, optionally for one société
    async fn audit_statistics(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        societe_id: Option<SocieteId>,
    ) -> AuthResult<AuditStatistics>;

    /// Delete events that occurred before `cutoff`
    async fn purge_audit_events(&self, cutoff: DateTime<Utc>) -> AuthResult<u64>;
}

/// Everything the auth use cases need from storage
pub trait AuthStore:
    UserRepository
    + CredentialsRepository
    + SocieteRepository
    + MembershipRepository
    + RoleDefinitionRepository
    + SessionRepository
    + MfaChallengeRepository
    + AuditRepository
    + Send
    + Sync
    + 'static
{
}

impl<T> AuthStore for T where
    T: UserRepository
        + CredentialsRepository
        + SocieteRepository
        + MembershipRepository
        + RoleDefinitionRepository
        + SessionRepository
        + MfaChallengeRepository
        + AuditRepository
        + Send
        + Sync
        + 'static
{
}
