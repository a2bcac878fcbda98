//! In-memory repository
//!
//! Backs the test suite and `AUTH_STORE=memory` development runs. Data is
//! lost when the process exits.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use kernel::id::{MfaChallengeId, RoleDefinitionId, SessionId, SocieteId, UserId};
use tokio::sync::RwLock;

use crate::domain::entity::{
    AuditEvent, ChallengeStatus, Credentials, Membership, MfaChallenge, RoleDefinition,
    SessionStatus, Societe, User, UserSession,
};
use crate::domain::repository::{
    AuditFilter, AuditPage, AuditRepository, AuditStatistics, CredentialsRepository,
    MembershipRepository, MfaChallengeRepository, RoleDefinitionRepository, SessionRepository,
    SessionStats, SocieteRepository, UserEventCount, UserRepository,
};
use crate::domain::value_object::{Acronym, Email, SocieteRole};
use crate::error::{AuthError, AuthResult};

#[derive(Default)]
struct MemoryState {
    users: HashMap<UserId, User>,
    credentials: HashMap<UserId, Credentials>,
    societes: HashMap<SocieteId, Societe>,
    memberships: HashMap<(UserId, SocieteId), Membership>,
    role_definitions: HashMap<RoleDefinitionId, RoleDefinition>,
    sessions: HashMap<SessionId, UserSession>,
    challenges: Vec<MfaChallenge>,
    audit: Vec<AuditEvent>,
}

#[derive(Clone, Default)]
pub struct InMemoryAuthRepository {
    state: Arc<RwLock<MemoryState>>,
}

impl InMemoryAuthRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

// ============================================================================
// Users and credentials
// ============================================================================

impl UserRepository for InMemoryAuthRepository {
    async fn insert_user(&self, user: &User) -> AuthResult<()> {
        let mut state = self.state.write().await;
        if state.users.values().any(|u| u.email == user.email) {
            return Err(AuthError::EmailTaken);
        }
        if state.users.values().any(|u| u.acronym == user.acronym) {
            return Err(AuthError::AcronymTaken);
        }
        state.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn find_user_by_id(&self, user_id: UserId) -> AuthResult<Option<User>> {
        Ok(self.state.read().await.users.get(&user_id).cloned())
    }

    async fn find_user_by_email(&self, email: &Email) -> AuthResult<Option<User>> {
        let state = self.state.read().await;
        Ok(state.users.values().find(|u| &u.email == email).cloned())
    }

    async fn find_user_by_acronym(&self, acronym: &Acronym) -> AuthResult<Option<User>> {
        let state = self.state.read().await;
        Ok(state.users.values().find(|u| &u.acronym == acronym).cloned())
    }

    async fn update_user(&self, user: &User) -> AuthResult<()> {
        let mut state = self.state.write().await;
        match state.users.get_mut(&user.id) {
            Some(existing) => {
                *existing = user.clone();
                Ok(())
            }
            None => Err(AuthError::UserNotFound),
        }
    }
}

impl CredentialsRepository for InMemoryAuthRepository {
    async fn insert_credentials(&self, credentials: &Credentials) -> AuthResult<()> {
        let mut state = self.state.write().await;
        state.credentials.insert(credentials.user_id, credentials.clone());
        Ok(())
    }

    async fn find_credentials(&self, user_id: UserId) -> AuthResult<Option<Credentials>> {
        Ok(self.state.read().await.credentials.get(&user_id).cloned())
    }

    async fn update_credentials(&self, credentials: &Credentials) -> AuthResult<()> {
        let mut state = self.state.write().await;
        state.credentials.insert(credentials.user_id, credentials.clone());
        Ok(())
    }
}

// ============================================================================
// Sociétés, memberships and role definitions
// ============================================================================

impl SocieteRepository for InMemoryAuthRepository {
    async fn save_societe(&self, societe: &Societe) -> AuthResult<()> {
        let mut state = self.state.write().await;
        state.societes.insert(societe.id, societe.clone());
        Ok(())
    }

    async fn find_societe(&self, societe_id: SocieteId) -> AuthResult<Option<Societe>> {
        Ok(self.state.read().await.societes.get(&societe_id).cloned())
    }

    async fn list_active_societes(&self) -> AuthResult<Vec<Societe>> {
        let state = self.state.read().await;
        let mut societes: Vec<Societe> =
            state.societes.values().filter(|s| s.is_active).cloned().collect();
        societes.sort_by(|a, b| a.nom.cmp(&b.nom));
        Ok(societes)
    }
}

impl MembershipRepository for InMemoryAuthRepository {
    async fn save_membership(&self, membership: &Membership) -> AuthResult<()> {
        let mut state = self.state.write().await;
        state
            .memberships
            .insert((membership.user_id, membership.societe_id), membership.clone());
        Ok(())
    }

    async fn find_membership(
        &self,
        user_id: UserId,
        societe_id: SocieteId,
    ) -> AuthResult<Option<Membership>> {
        let state = self.state.read().await;
        Ok(state.memberships.get(&(user_id, societe_id)).cloned())
    }

    async fn list_memberships(&self, user_id: UserId) -> AuthResult<Vec<Membership>> {
        let state = self.state.read().await;
        Ok(state
            .memberships
            .values()
            .filter(|m| m.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn set_default_membership(
        &self,
        user_id: UserId,
        societe_id: SocieteId,
    ) -> AuthResult<()> {
        let mut state = self.state.write().await;
        for membership in state.memberships.values_mut().filter(|m| m.user_id == user_id) {
            membership.is_default = membership.societe_id == societe_id;
        }
        Ok(())
    }
}

impl RoleDefinitionRepository for InMemoryAuthRepository {
    async fn save_role_definition(&self, definition: &RoleDefinition) -> AuthResult<()> {
        let mut state = self.state.write().await;
        state.role_definitions.insert(definition.id, definition.clone());
        Ok(())
    }

    async fn find_role_definition(
        &self,
        role_id: RoleDefinitionId,
    ) -> AuthResult<Option<RoleDefinition>> {
        Ok(self.state.read().await.role_definitions.get(&role_id).cloned())
    }

    async fn find_role_definition_for(
        &self,
        societe_id: SocieteId,
        role_type: SocieteRole,
    ) -> AuthResult<Option<RoleDefinition>> {
        let state = self.state.read().await;
        Ok(state
            .role_definitions
            .values()
            .find(|d| d.is_active && d.societe_id == societe_id && d.parent_role_type == role_type)
            .cloned())
    }
}

// ============================================================================
// Sessions and MFA challenges
// ============================================================================

impl SessionRepository for InMemoryAuthRepository {
    async fn insert_session(&self, session: &UserSession) -> AuthResult<()> {
        let mut state = self.state.write().await;
        state.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn find_session(&self, session_id: SessionId) -> AuthResult<Option<UserSession>> {
        Ok(self.state.read().await.sessions.get(&session_id).cloned())
    }

    async fn update_session(&self, session: &UserSession) -> AuthResult<bool> {
        let mut state = self.state.write().await;
        match state.sessions.get_mut(&session.id) {
            Some(existing) if existing.is_active() => {
                *existing = session.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn rotate_session_refresh(
        &self,
        session: &UserSession,
        expected_hash: &str,
    ) -> AuthResult<bool> {
        let mut state = self.state.write().await;
        match state.sessions.get_mut(&session.id) {
            Some(existing) if existing.is_active() && existing.refresh_token_hash == expected_hash => {
                *existing = session.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn touch_session(&self, session_id: SessionId, at: DateTime<Utc>) -> AuthResult<()> {
        let mut state = self.state.write().await;
        if let Some(session) = state.sessions.get_mut(&session_id) {
            session.touch(at);
        }
        Ok(())
    }

    async fn list_active_sessions(&self, user_id: Option<UserId>) -> AuthResult<Vec<UserSession>> {
        let state = self.state.read().await;
        let mut sessions: Vec<UserSession> = state
            .sessions
            .values()
            .filter(|s| s.is_active() && user_id.is_none_or(|id| s.user_id == id))
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.last_activity_at.cmp(&a.last_activity_at));
        Ok(sessions)
    }

    async fn list_user_sessions(
        &self,
        user_id: UserId,
        limit: u32,
    ) -> AuthResult<Vec<UserSession>> {
        let state = self.state.read().await;
        let mut sessions: Vec<UserSession> = state
            .sessions
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.login_at.cmp(&a.login_at));
        sessions.truncate(limit as usize);
        Ok(sessions)
    }

    async fn session_stats(&self, since: DateTime<Utc>) -> AuthResult<SessionStats> {
        let state = self.state.read().await;
        let mut stats = SessionStats::default();
        for session in state.sessions.values() {
            stats.total += 1;
            stats.active += u64::from(session.is_active());
            stats.today += u64::from(session.login_at >= since);
            stats.forced += u64::from(session.status == SessionStatus::Forced);
        }
        Ok(stats)
    }

    async fn expire_stale_sessions(
        &self,
        now: DateTime<Utc>,
        idle_cutoff: DateTime<Utc>,
    ) -> AuthResult<u64> {
        let mut state = self.state.write().await;
        let mut expired = 0;
        for session in state.sessions.values_mut() {
            let stale = session.expires_at <= now || session.last_activity_at < idle_cutoff;
            if session.is_active() && stale {
                session.expire(now);
                expired += 1;
            }
        }
        Ok(expired)
    }
}

impl MfaChallengeRepository for InMemoryAuthRepository {
    async fn insert_challenge(&self, challenge: &MfaChallenge) -> AuthResult<()> {
        self.state.write().await.challenges.push(challenge.clone());
        Ok(())
    }

    async fn find_challenge_by_token_hash(
        &self,
        token_hash: &str,
    ) -> AuthResult<Option<MfaChallenge>> {
        let state = self.state.read().await;
        Ok(state
            .challenges
            .iter()
            .find(|c| c.token_hash == token_hash)
            .cloned())
    }

    async fn update_challenge(&self, challenge: &MfaChallenge) -> AuthResult<()> {
        let mut state = self.state.write().await;
        if let Some(existing) = state.challenges.iter_mut().find(|c| c.id == challenge.id) {
            *existing = challenge.clone();
        }
        Ok(())
    }

    async fn record_challenge_failure(
        &self,
        challenge_id: MfaChallengeId,
    ) -> AuthResult<Option<MfaChallenge>> {
        let mut state = self.state.write().await;
        let challenge = state
            .challenges
            .iter_mut()
            .find(|c| c.id == challenge_id && c.status == ChallengeStatus::Pending);
        Ok(challenge.map(|c| {
            c.record_failure();
            c.clone()
        }))
    }

    async fn complete_challenge(
        &self,
        challenge_id: MfaChallengeId,
        now: DateTime<Utc>,
    ) -> AuthResult<bool> {
        let mut state = self.state.write().await;
        match state
            .challenges
            .iter_mut()
            .find(|c| c.id == challenge_id && c.can_attempt(now))
        {
            Some(challenge) => {
                challenge.mark_verified(now);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn purge_expired_challenges(&self, now: DateTime<Utc>) -> AuthResult<u64> {
        let mut state = self.state.write().await;
        let before = state.challenges.len();
        state.challenges.retain(|c| c.expires_at > now);
        Ok((before - state.challenges.len()) as u64)
    }
}

// ============================================================================
// Audit trail
// ============================================================================

impl AuditRepository for InMemoryAuthRepository {
    async fn record_audit_event(&self, event: &AuditEvent) -> AuthResult<()> {
        self.state.write().await.audit.push(event.clone());
        Ok(())
    }

    async fn search_audit_events(&self, filter: &AuditFilter) -> AuthResult<AuditPage> {
        let state = self.state.read().await;
        let mut matching: Vec<&AuditEvent> =
            state.audit.iter().filter(|e| filter.matches(e)).collect();
        matching.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));

        Ok(AuditPage {
            total: matching.len() as u64,
            events: matching
                .into_iter()
                .skip(filter.offset as usize)
                .take(filter.limit as usize)
                .cloned()
                .collect(),
        })
    }

    async fn audit_statistics(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        societe_id: Option<SocieteId>,
    ) -> AuthResult<AuditStatistics> {
        let state = self.state.read().await;
        let mut stats = AuditStatistics::default();
        let mut per_user: HashMap<UserId, u64> = HashMap::new();

        let in_range = state.audit.iter().filter(|e| {
            e.occurred_at >= from
                && e.occurred_at <= to
                && societe_id.is_none_or(|id| e.societe_id == Some(id))
        });
        for event in in_range {
            stats.total += 1;
            stats.failures += u64::from(!event.success);
            *stats.by_event_type.entry(event.event_type.to_string()).or_default() += 1;
            *stats.by_severity.entry(event.severity.to_string()).or_default() += 1;
            if let Some(user_id) = event.user_id {
                *per_user.entry(user_id).or_default() += 1;
            }
        }

        let mut top: Vec<UserEventCount> = per_user
            .into_iter()
            .map(|(user_id, count)| UserEventCount { user_id, count })
            .collect();
        top.sort_by(|a, b| b.count.cmp(&a.count));
        top.truncate(10);
        stats.top_users = top;
        Ok(stats)
    }

    async fn purge_audit_events(&self, cutoff: DateTime<Utc>) -> AuthResult<u64> {
        let mut state = self.state.write().await;
        let before = state.audit.len();
        state.audit.retain(|e| e.occurred_at >= cutoff);
        Ok((before - state.audit.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn user(email: &str, acronym: &str) -> User {
        User::new(
            Email::new(email).unwrap(),
            Acronym::new(acronym).unwrap(),
            "Durand".into(),
            "Paul".into(),
        )
    }

    #[tokio::test]
    async fn test_duplicate_email_and_acronym_rejected() {
        let repo = InMemoryAuthRepository::new();
        repo.insert_user(&user("paul@topsteel.fr", "PDU")).await.unwrap();

        assert!(matches!(
            repo.insert_user(&user("paul@topsteel.fr", "PDX")).await,
            Err(AuthError::EmailTaken)
        ));
        assert!(matches!(
            repo.insert_user(&user("autre@topsteel.fr", "PDU")).await,
            Err(AuthError::AcronymTaken)
        ));
    }

    #[tokio::test]
    async fn test_single_default_membership() {
        let repo = InMemoryAuthRepository::new();
        let user_id = UserId::new();
        let a = Societe::new("Alpha", "ALP");
        let b = Societe::new("Beta", "BET");
        let mut ma = Membership::new(user_id, a.id, SocieteRole::User, None);
        ma.is_default = true;
        repo.save_membership(&ma).await.unwrap();
        repo.save_membership(&Membership::new(user_id, b.id, SocieteRole::Admin, None))
            .await
            .unwrap();

        repo.set_default_membership(user_id, b.id).await.unwrap();

        let defaults: Vec<_> = repo
            .list_memberships(user_id)
            .await
            .unwrap()
            .into_iter()
            .filter(|m| m.is_default)
            .collect();
        assert_eq!(defaults.len(), 1);
        assert_eq!(defaults[0].societe_id, b.id);
    }

    #[tokio::test]
    async fn test_expire_stale_sessions() {
        let repo = InMemoryAuthRepository::new();
        let now = Utc::now();
        let user_id = UserId::new();

        let fresh = UserSession::new(user_id, None, None, Duration::days(7), now);
        let idle = UserSession::new(user_id, None, None, Duration::days(7), now - Duration::hours(30));
        let past = UserSession::new(user_id, None, None, Duration::hours(1), now - Duration::hours(2));
        for s in [&fresh, &idle, &past] {
            repo.insert_session(s).await.unwrap();
        }

        let expired = repo
            .expire_stale_sessions(now, now - Duration::hours(24))
            .await
            .unwrap();

        assert_eq!(expired, 2);
        let active = repo.list_active_sessions(Some(user_id)).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, fresh.id);

        let stats = repo.session_stats(now - Duration::hours(1)).await.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.active, 1);
        assert_eq!(stats.today, 1);
    }

    #[tokio::test]
    async fn test_refresh_rotation_is_compare_and_swap() {
        let repo = InMemoryAuthRepository::new();
        let now = Utc::now();
        let mut session = UserSession::new(UserId::new(), None, None, Duration::days(7), now);
        session.refresh_token_hash = "h0".into();
        repo.insert_session(&session).await.unwrap();

        let mut first = session.clone();
        first.rotate_refresh("h1".into(), now + Duration::days(7), now);
        let mut second = session.clone();
        second.rotate_refresh("h2".into(), now + Duration::days(7), now);

        assert!(repo.rotate_session_refresh(&first, "h0").await.unwrap());
        assert!(!repo.rotate_session_refresh(&second, "h0").await.unwrap());

        let stored = repo.find_session(session.id).await.unwrap().unwrap();
        assert_eq!(stored.refresh_token_hash, "h1");
    }

    #[tokio::test]
    async fn test_ended_session_is_not_resurrected() {
        let repo = InMemoryAuthRepository::new();
        let now = Utc::now();
        let session = UserSession::new(UserId::new(), None, None, Duration::days(7), now);
        repo.insert_session(&session).await.unwrap();

        let mut ended = session.clone();
        ended.end("logout", now);
        assert!(repo.update_session(&ended).await.unwrap());

        // a stale copy still marked active
        let mut stale = session.clone();
        stale.touch(now + Duration::minutes(1));
        assert!(!repo.update_session(&stale).await.unwrap());
        assert!(!repo.rotate_session_refresh(&stale, "").await.unwrap());

        let stored = repo.find_session(session.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Ended);
    }

    #[tokio::test]
    async fn test_challenge_failure_and_completion() {
        let repo = InMemoryAuthRepository::new();
        let now = Utc::now();
        let challenge = MfaChallenge::new(UserId::new(), "t".into(), None, None, now);
        repo.insert_challenge(&challenge).await.unwrap();

        let updated = repo.record_challenge_failure(challenge.id).await.unwrap().unwrap();
        assert_eq!(updated.attempts, 1);
        assert_eq!(updated.status, ChallengeStatus::Pending);

        assert!(repo.complete_challenge(challenge.id, now).await.unwrap());
        assert!(!repo.complete_challenge(challenge.id, now).await.unwrap());
        assert!(repo.record_challenge_failure(challenge.id).await.unwrap().is_none());
    }
}
