//! PostgreSQL Repository Implementations

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use kernel::id::{
    AuditEventId, MfaChallengeId, RoleDefinitionId, SessionId, SiteId, SocieteId, UserId,
};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::entity::{
    AuditEvent, Credentials, Membership, MfaChallenge, RoleDefinition, RoleGrant, Site, Societe,
    User, UserSession,
};
use crate::domain::repository::{
    AuditFilter, AuditPage, AuditRepository, AuditStatistics, CredentialsRepository,
    MembershipRepository, MfaChallengeRepository, RoleDefinitionRepository, SessionRepository,
    SessionStats, SocieteRepository, UserEventCount, UserRepository,
};
use crate::domain::value_object::{
    Acronym, BackupCodes, Email, GlobalRole, PermissionKey, SocieteRole, TotpSecret, UserPassword,
};
use crate::error::{AuthError, AuthResult};

/// PostgreSQL-backed auth repository
#[derive(Clone)]
pub struct PgAuthRepository {
    pool: PgPool,
}

impl PgAuthRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Map unique violations on the user identity columns to domain errors
fn map_user_conflict(err: sqlx::Error) -> AuthError {
    if let sqlx::Error::Database(db) = &err {
        match db.constraint() {
            Some("users_email_key") => return AuthError::EmailTaken,
            Some("users_acronym_key") => return AuthError::AcronymTaken,
            _ => {}
        }
    }
    AuthError::Database(err)
}

fn uuids<T>(ids: &[kernel::id::Id<T>]) -> Vec<Uuid> {
    ids.iter().map(|id| *id.as_uuid()).collect()
}

// ============================================================================
// User Repository Implementation
// ============================================================================

const USER_COLUMNS: &str = r#"
    id, email, acronym, nom, prenom, global_role, is_active,
    last_login_at, created_at, updated_at
"#;

impl UserRepository for PgAuthRepository {
    async fn insert_user(&self, user: &User) -> AuthResult<()> {
        sqlx::query(
            r#"
            INSERT INTO users (
                id, email, acronym, nom, prenom, global_role, is_active,
                last_login_at, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(user.id.as_uuid())
        .bind(user.email.as_str())
        .bind(user.acronym.as_str())
        .bind(&user.nom)
        .bind(&user.prenom)
        .bind(user.global_role.code())
        .bind(user.is_active)
        .bind(user.last_login_at)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_user_conflict)?;

        Ok(())
    }

    async fn find_user_by_id(&self, user_id: UserId) -> AuthResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(user_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(UserRow::into_user))
    }

    async fn find_user_by_email(&self, email: &Email) -> AuthResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(UserRow::into_user))
    }

    async fn find_user_by_acronym(&self, acronym: &Acronym) -> AuthResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE acronym = $1"
        ))
        .bind(acronym.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(UserRow::into_user))
    }

    async fn update_user(&self, user: &User) -> AuthResult<()> {
        sqlx::query(
            r#"
            UPDATE users SET
                email = $2,
                acronym = $3,
                nom = $4,
                prenom = $5,
                global_role = $6,
                is_active = $7,
                last_login_at = $8,
                updated_at = $9
            WHERE id = $1
            "#,
        )
        .bind(user.id.as_uuid())
        .bind(user.email.as_str())
        .bind(user.acronym.as_str())
        .bind(&user.nom)
        .bind(&user.prenom)
        .bind(user.global_role.code())
        .bind(user.is_active)
        .bind(user.last_login_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_user_conflict)?;

        Ok(())
    }
}

// ============================================================================
// Credentials Repository Implementation
// ============================================================================

impl CredentialsRepository for PgAuthRepository {
    async fn insert_credentials(&self, credentials: &Credentials) -> AuthResult<()> {
        sqlx::query(
            r#"
            INSERT INTO user_credentials (
                user_id, password_hash, totp_secret, totp_enabled, backup_codes,
                failed_attempts, last_failed_at, locked_until,
                password_changed_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(credentials.user_id.as_uuid())
        .bind(credentials.password_hash.as_phc_string())
        .bind(credentials.totp_secret.as_ref().map(TotpSecret::as_base32))
        .bind(credentials.totp_enabled)
        .bind(credentials.backup_codes.hashes())
        .bind(credentials.failed_attempts as i16)
        .bind(credentials.last_failed_at)
        .bind(credentials.locked_until)
        .bind(credentials.password_changed_at)
        .bind(credentials.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_credentials(&self, user_id: UserId) -> AuthResult<Option<Credentials>> {
        let row = sqlx::query_as::<_, CredentialsRow>(
            r#"
            SELECT
                user_id, password_hash, totp_secret, totp_enabled, backup_codes,
                failed_attempts, last_failed_at, locked_until,
                password_changed_at, updated_at
            FROM user_credentials
            WHERE user_id = $1
            "#,
        )
        .bind(user_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(CredentialsRow::into_credentials).transpose()
    }

    async fn update_credentials(&self, credentials: &Credentials) -> AuthResult<()> {
        sqlx::query(
            r#"
            UPDATE user_credentials SET
                password_hash = $2,
                totp_secret = $3,
                totp_enabled = $4,
                backup_codes = $5,
                failed_attempts = $6,
                last_failed_at = $7,
                locked_until = $8,
                password_changed_at = $9,
                updated_at = $10
            WHERE user_id = $1
            "#,
        )
        .bind(credentials.user_id.as_uuid())
        .bind(credentials.password_hash.as_phc_string())
        .bind(credentials.totp_secret.as_ref().map(TotpSecret::as_base32))
        .bind(credentials.totp_enabled)
        .bind(credentials.backup_codes.hashes())
        .bind(credentials.failed_attempts as i16)
        .bind(credentials.last_failed_at)
        .bind(credentials.locked_until)
        .bind(credentials.password_changed_at)
        .bind(credentials.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

// ============================================================================
// Société Repository Implementation
// ============================================================================

impl PgAuthRepository {
    async fn sites_for(&self, societe_ids: &[Uuid]) -> AuthResult<HashMap<Uuid, Vec<Site>>> {
        let rows = sqlx::query_as::<_, SiteRow>(
            r#"
            SELECT id, societe_id, nom, code, is_principal, is_active
            FROM sites
            WHERE societe_id = ANY($1)
            ORDER BY is_principal DESC, nom
            "#,
        )
        .bind(societe_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut by_societe: HashMap<Uuid, Vec<Site>> = HashMap::new();
        for row in rows {
            by_societe.entry(row.societe_id).or_default().push(row.into_site());
        }
        Ok(by_societe)
    }
}

impl SocieteRepository for PgAuthRepository {
    async fn save_societe(&self, societe: &Societe) -> AuthResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO societes (id, nom, code, database_name, is_active, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE SET
                nom = EXCLUDED.nom,
                code = EXCLUDED.code,
                database_name = EXCLUDED.database_name,
                is_active = EXCLUDED.is_active
            "#,
        )
        .bind(societe.id.as_uuid())
        .bind(&societe.nom)
        .bind(&societe.code)
        .bind(&societe.database_name)
        .bind(societe.is_active)
        .bind(societe.created_at)
        .execute(&mut *tx)
        .await?;

        for site in &societe.sites {
            sqlx::query(
                r#"
                INSERT INTO sites (id, societe_id, nom, code, is_principal, is_active)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (id) DO UPDATE SET
                    nom = EXCLUDED.nom,
                    code = EXCLUDED.code,
                    is_principal = EXCLUDED.is_principal,
                    is_active = EXCLUDED.is_active
                "#,
            )
            .bind(site.id.as_uuid())
            .bind(societe.id.as_uuid())
            .bind(&site.nom)
            .bind(&site.code)
            .bind(site.is_principal)
            .bind(site.is_active)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn find_societe(&self, societe_id: SocieteId) -> AuthResult<Option<Societe>> {
        let row = sqlx::query_as::<_, SocieteRow>(
            r#"
            SELECT id, nom, code, database_name, is_active, created_at
            FROM societes
            WHERE id = $1
            "#,
        )
        .bind(societe_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut sites = self.sites_for(&[row.id]).await?;
        let sites = sites.remove(&row.id).unwrap_or_default();
        Ok(Some(row.into_societe(sites)))
    }

    async fn list_active_societes(&self) -> AuthResult<Vec<Societe>> {
        let rows = sqlx::query_as::<_, SocieteRow>(
            r#"
            SELECT id, nom, code, database_name, is_active, created_at
            FROM societes
            WHERE is_active
            ORDER BY nom
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        let mut sites = self.sites_for(&ids).await?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let own = sites.remove(&row.id).unwrap_or_default();
                row.into_societe(own)
            })
            .collect())
    }
}

// ============================================================================
// Membership Repository Implementation
// ============================================================================

const MEMBERSHIP_COLUMNS: &str = r#"
    user_id, societe_id, role_type, role_id, is_default,
    additional_permissions, restricted_permissions, allowed_site_ids,
    granted_by, granted_at, expires_at, is_active
"#;

impl MembershipRepository for PgAuthRepository {
    async fn save_membership(&self, membership: &Membership) -> AuthResult<()> {
        sqlx::query(
            r#"
            INSERT INTO societe_users (
                user_id, societe_id, role_type, role_id, is_default,
                additional_permissions, restricted_permissions, allowed_site_ids,
                granted_by, granted_at, expires_at, is_active
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (user_id, societe_id) DO UPDATE SET
                role_type = EXCLUDED.role_type,
                role_id = EXCLUDED.role_id,
                is_default = EXCLUDED.is_default,
                additional_permissions = EXCLUDED.additional_permissions,
                restricted_permissions = EXCLUDED.restricted_permissions,
                allowed_site_ids = EXCLUDED.allowed_site_ids,
                granted_by = EXCLUDED.granted_by,
                granted_at = EXCLUDED.granted_at,
                expires_at = EXCLUDED.expires_at,
                is_active = EXCLUDED.is_active
            "#,
        )
        .bind(membership.user_id.as_uuid())
        .bind(membership.societe_id.as_uuid())
        .bind(membership.role_type.code())
        .bind(membership.role_id.map(RoleDefinitionId::into_uuid))
        .bind(membership.is_default)
        .bind(&membership.additional_permissions)
        .bind(&membership.restricted_permissions)
        .bind(uuids(&membership.allowed_site_ids))
        .bind(membership.granted_by.map(UserId::into_uuid))
        .bind(membership.granted_at)
        .bind(membership.expires_at)
        .bind(membership.is_active)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_membership(
        &self,
        user_id: UserId,
        societe_id: SocieteId,
    ) -> AuthResult<Option<Membership>> {
        let row = sqlx::query_as::<_, MembershipRow>(&format!(
            "SELECT {MEMBERSHIP_COLUMNS} FROM societe_users WHERE user_id = $1 AND societe_id = $2"
        ))
        .bind(user_id.as_uuid())
        .bind(societe_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(MembershipRow::into_membership).transpose()
    }

    async fn list_memberships(&self, user_id: UserId) -> AuthResult<Vec<Membership>> {
        let rows = sqlx::query_as::<_, MembershipRow>(&format!(
            "SELECT {MEMBERSHIP_COLUMNS} FROM societe_users WHERE user_id = $1 ORDER BY granted_at"
        ))
        .bind(user_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(MembershipRow::into_membership).collect()
    }

    async fn set_default_membership(
        &self,
        user_id: UserId,
        societe_id: SocieteId,
    ) -> AuthResult<()> {
        // two statements: the partial unique index is checked row by row
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE societe_users SET is_default = FALSE WHERE user_id = $1 AND is_default")
            .bind(user_id.as_uuid())
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "UPDATE societe_users SET is_default = TRUE WHERE user_id = $1 AND societe_id = $2",
        )
        .bind(user_id.as_uuid())
        .bind(societe_id.as_uuid())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}

// ============================================================================
// Role Definition Repository Implementation
// ============================================================================

impl PgAuthRepository {
    async fn load_grants(&self, definition: RoleDefinitionRow) -> AuthResult<RoleDefinition> {
        let grants = sqlx::query_as::<_, RoleGrantRow>(
            r#"
            SELECT permission_key, access_level, is_granted, is_active
            FROM role_permissions
            WHERE role_id = $1
            "#,
        )
        .bind(definition.id)
        .fetch_all(&self.pool)
        .await?;

        definition.into_definition(grants)
    }
}

impl RoleDefinitionRepository for PgAuthRepository {
    async fn save_role_definition(&self, definition: &RoleDefinition) -> AuthResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO role_definitions (id, societe_id, parent_role_type, name, is_active)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE SET
                parent_role_type = EXCLUDED.parent_role_type,
                name = EXCLUDED.name,
                is_active = EXCLUDED.is_active
            "#,
        )
        .bind(definition.id.as_uuid())
        .bind(definition.societe_id.as_uuid())
        .bind(definition.parent_role_type.code())
        .bind(&definition.name)
        .bind(definition.is_active)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM role_permissions WHERE role_id = $1")
            .bind(definition.id.as_uuid())
            .execute(&mut *tx)
            .await?;

        for grant in &definition.grants {
            sqlx::query(
                r#"
                INSERT INTO role_permissions (role_id, permission_key, access_level, is_granted, is_active)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(definition.id.as_uuid())
            .bind(grant.key.to_string())
            .bind(grant.level.code())
            .bind(grant.granted)
            .bind(grant.active)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn find_role_definition(
        &self,
        role_id: RoleDefinitionId,
    ) -> AuthResult<Option<RoleDefinition>> {
        let row = sqlx::query_as::<_, RoleDefinitionRow>(
            r#"
            SELECT id, societe_id, parent_role_type, name, is_active
            FROM role_definitions
            WHERE id = $1
            "#,
        )
        .bind(role_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(self.load_grants(row).await?)),
            None => Ok(None),
        }
    }

    async fn find_role_definition_for(
        &self,
        societe_id: SocieteId,
        role_type: SocieteRole,
    ) -> AuthResult<Option<RoleDefinition>> {
        let row = sqlx::query_as::<_, RoleDefinitionRow>(
            r#"
            SELECT id, societe_id, parent_role_type, name, is_active
            FROM role_definitions
            WHERE societe_id = $1 AND parent_role_type = $2 AND is_active
            LIMIT 1
            "#,
        )
        .bind(societe_id.as_uuid())
        .bind(role_type.code())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(self.load_grants(row).await?)),
            None => Ok(None),
        }
    }
}

// ============================================================================
// Session Repository Implementation
// ============================================================================

const SESSION_COLUMNS: &str = r#"
    id, user_id, societe_id, site_id, refresh_token_hash, ip, user_agent,
    login_at, last_activity_at, expires_at, status, ended_at, ended_by, logout_reason
"#;

/// Binds `$1..$10`; callers append the WHERE clause
const SESSION_UPDATE: &str = r#"
    UPDATE user_sessions SET
        societe_id = $2,
        site_id = $3,
        refresh_token_hash = $4,
        last_activity_at = $5,
        expires_at = $6,
        status = $7,
        ended_at = $8,
        ended_by = $9,
        logout_reason = $10
"#;

fn bind_session_update<'q>(
    query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    session: &'q UserSession,
) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    query
        .bind(session.id.as_uuid())
        .bind(session.societe_id.map(SocieteId::into_uuid))
        .bind(session.site_id.map(SiteId::into_uuid))
        .bind(&session.refresh_token_hash)
        .bind(session.last_activity_at)
        .bind(session.expires_at)
        .bind(session.status.to_string())
        .bind(session.ended_at)
        .bind(session.ended_by.map(UserId::into_uuid))
        .bind(&session.logout_reason)
}

impl SessionRepository for PgAuthRepository {
    async fn insert_session(&self, session: &UserSession) -> AuthResult<()> {
        sqlx::query(
            r#"
            INSERT INTO user_sessions (
                id, user_id, societe_id, site_id, refresh_token_hash, ip, user_agent,
                login_at, last_activity_at, expires_at, status, ended_at, ended_by, logout_reason
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(session.id.as_uuid())
        .bind(session.user_id.as_uuid())
        .bind(session.societe_id.map(SocieteId::into_uuid))
        .bind(session.site_id.map(SiteId::into_uuid))
        .bind(&session.refresh_token_hash)
        .bind(&session.ip)
        .bind(&session.user_agent)
        .bind(session.login_at)
        .bind(session.last_activity_at)
        .bind(session.expires_at)
        .bind(session.status.to_string())
        .bind(session.ended_at)
        .bind(session.ended_by.map(UserId::into_uuid))
        .bind(&session.logout_reason)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_session(&self, session_id: SessionId) -> AuthResult<Option<UserSession>> {
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT {SESSION_COLUMNS} FROM user_sessions WHERE id = $1"
        ))
        .bind(session_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(SessionRow::into_session).transpose()
    }

    async fn update_session(&self, session: &UserSession) -> AuthResult<bool> {
        let updated = bind_session_update(
            sqlx::query(&format!("{SESSION_UPDATE} WHERE id = $1 AND status = 'active'")),
            session,
        )
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(updated == 1)
    }

    async fn rotate_session_refresh(
        &self,
        session: &UserSession,
        expected_hash: &str,
    ) -> AuthResult<bool> {
        let updated = bind_session_update(
            sqlx::query(&format!(
                "{SESSION_UPDATE} WHERE id = $1 AND status = 'active' AND refresh_token_hash = $11"
            )),
            session,
        )
        .bind(expected_hash)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(updated == 1)
    }

    async fn touch_session(&self, session_id: SessionId, at: DateTime<Utc>) -> AuthResult<()> {
        sqlx::query("UPDATE user_sessions SET last_activity_at = $2 WHERE id = $1 AND status = 'active'")
            .bind(session_id.as_uuid())
            .bind(at)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn list_active_sessions(&self, user_id: Option<UserId>) -> AuthResult<Vec<UserSession>> {
        let rows = sqlx::query_as::<_, SessionRow>(&format!(
            r#"
            SELECT {SESSION_COLUMNS} FROM user_sessions
            WHERE status = 'active' AND ($1::uuid IS NULL OR user_id = $1)
            ORDER BY last_activity_at DESC
            "#
        ))
        .bind(user_id.map(UserId::into_uuid))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(SessionRow::into_session).collect()
    }

    async fn list_user_sessions(
        &self,
        user_id: UserId,
        limit: u32,
    ) -> AuthResult<Vec<UserSession>> {
        let rows = sqlx::query_as::<_, SessionRow>(&format!(
            r#"
            SELECT {SESSION_COLUMNS} FROM user_sessions
            WHERE user_id = $1
            ORDER BY login_at DESC
            LIMIT $2
            "#
        ))
        .bind(user_id.as_uuid())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(SessionRow::into_session).collect()
    }

    async fn session_stats(&self, since: DateTime<Utc>) -> AuthResult<SessionStats> {
        let (total, active, today, forced): (i64, i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*),
                COUNT(*) FILTER (WHERE status = 'active'),
                COUNT(*) FILTER (WHERE login_at >= $1),
                COUNT(*) FILTER (WHERE status = 'forced_logout')
            FROM user_sessions
            "#,
        )
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        Ok(SessionStats {
            total: total as u64,
            active: active as u64,
            today: today as u64,
            forced: forced as u64,
        })
    }

    async fn expire_stale_sessions(
        &self,
        now: DateTime<Utc>,
        idle_cutoff: DateTime<Utc>,
    ) -> AuthResult<u64> {
        let expired = sqlx::query(
            r#"
            UPDATE user_sessions SET
                status = 'expired',
                ended_at = $1,
                logout_reason = 'expired'
            WHERE status = 'active'
              AND (expires_at <= $1 OR last_activity_at < $2)
            "#,
        )
        .bind(now)
        .bind(idle_cutoff)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(expired)
    }
}

// ============================================================================
// MFA Challenge Repository Implementation
// ============================================================================

const CHALLENGE_COLUMNS: &str = r#"
    id, user_id, token_hash, status, attempts, max_attempts,
    ip, user_agent, created_at, expires_at, verified_at
"#;

impl MfaChallengeRepository for PgAuthRepository {
    async fn insert_challenge(&self, challenge: &MfaChallenge) -> AuthResult<()> {
        sqlx::query(
            r#"
            INSERT INTO mfa_challenges (
                id, user_id, token_hash, status, attempts, max_attempts,
                ip, user_agent, created_at, expires_at, verified_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(challenge.id.as_uuid())
        .bind(challenge.user_id.as_uuid())
        .bind(&challenge.token_hash)
        .bind(challenge.status.to_string())
        .bind(i16::from(challenge.attempts))
        .bind(i16::from(challenge.max_attempts))
        .bind(&challenge.ip)
        .bind(&challenge.user_agent)
        .bind(challenge.created_at)
        .bind(challenge.expires_at)
        .bind(challenge.verified_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_challenge_by_token_hash(
        &self,
        token_hash: &str,
    ) -> AuthResult<Option<MfaChallenge>> {
        let row = sqlx::query_as::<_, ChallengeRow>(&format!(
            "SELECT {CHALLENGE_COLUMNS} FROM mfa_challenges WHERE token_hash = $1"
        ))
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ChallengeRow::into_challenge).transpose()
    }

    async fn update_challenge(&self, challenge: &MfaChallenge) -> AuthResult<()> {
        sqlx::query(
            r#"
            UPDATE mfa_challenges SET
                status = $2,
                attempts = $3,
                verified_at = $4
            WHERE id = $1
            "#,
        )
        .bind(challenge.id.as_uuid())
        .bind(challenge.status.to_string())
        .bind(i16::from(challenge.attempts))
        .bind(challenge.verified_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn record_challenge_failure(
        &self,
        challenge_id: MfaChallengeId,
    ) -> AuthResult<Option<MfaChallenge>> {
        let row = sqlx::query_as::<_, ChallengeRow>(&format!(
            r#"
            UPDATE mfa_challenges SET
                attempts = attempts + 1,
                status = CASE WHEN attempts + 1 >= max_attempts THEN 'blocked' ELSE status END
            WHERE id = $1 AND status = 'pending'
            RETURNING {CHALLENGE_COLUMNS}
            "#
        ))
        .bind(challenge_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(ChallengeRow::into_challenge).transpose()
    }

    async fn complete_challenge(
        &self,
        challenge_id: MfaChallengeId,
        now: DateTime<Utc>,
    ) -> AuthResult<bool> {
        let updated = sqlx::query(
            r#"
            UPDATE mfa_challenges SET status = 'verified', verified_at = $2
            WHERE id = $1
              AND status = 'pending'
              AND expires_at > $2
              AND attempts < max_attempts
            "#,
        )
        .bind(challenge_id.as_uuid())
        .bind(now)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(updated == 1)
    }

    async fn purge_expired_challenges(&self, now: DateTime<Utc>) -> AuthResult<u64> {
        let deleted = sqlx::query("DELETE FROM mfa_challenges WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?
            .rows_affected();

        Ok(deleted)
    }
}

// ============================================================================
// Audit Repository Implementation
// ============================================================================

const AUDIT_COLUMNS: &str = r#"
    id, occurred_at, event_type, severity, success, user_id, societe_id, session_id,
    resource, action, ip, user_agent, message
"#;

/// `$1..$6` of every audit search: from, to, user, société, event types, success
const AUDIT_FILTER: &str = r#"
    ($1::timestamptz IS NULL OR occurred_at >= $1)
    AND ($2::timestamptz IS NULL OR occurred_at <= $2)
    AND ($3::uuid IS NULL OR user_id = $3)
    AND ($4::uuid IS NULL OR societe_id = $4)
    AND (cardinality($5::text[]) = 0 OR event_type = ANY($5))
    AND ($6::boolean IS NULL OR success = $6)
"#;

impl AuditRepository for PgAuthRepository {
    async fn record_audit_event(&self, event: &AuditEvent) -> AuthResult<()> {
        sqlx::query(&format!(
            r#"
            INSERT INTO audit_log ({AUDIT_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#
        ))
        .bind(event.id.as_uuid())
        .bind(event.occurred_at)
        .bind(event.event_type.to_string())
        .bind(event.severity.to_string())
        .bind(event.success)
        .bind(event.user_id.map(UserId::into_uuid))
        .bind(event.societe_id.map(SocieteId::into_uuid))
        .bind(event.session_id.map(SessionId::into_uuid))
        .bind(&event.resource)
        .bind(&event.action)
        .bind(&event.ip)
        .bind(&event.user_agent)
        .bind(&event.message)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn search_audit_events(&self, filter: &AuditFilter) -> AuthResult<AuditPage> {
        let event_types: Vec<String> = filter.event_types.iter().map(ToString::to_string).collect();

        let total: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM audit_log WHERE {AUDIT_FILTER}"
        ))
        .bind(filter.from)
        .bind(filter.to)
        .bind(filter.user_id.map(UserId::into_uuid))
        .bind(filter.societe_id.map(SocieteId::into_uuid))
        .bind(&event_types)
        .bind(filter.success)
        .fetch_one(&self.pool)
        .await?;

        let rows = sqlx::query_as::<_, AuditRow>(&format!(
            r#"
            SELECT {AUDIT_COLUMNS} FROM audit_log
            WHERE {AUDIT_FILTER}
            ORDER BY occurred_at DESC
            LIMIT $7 OFFSET $8
            "#
        ))
        .bind(filter.from)
        .bind(filter.to)
        .bind(filter.user_id.map(UserId::into_uuid))
        .bind(filter.societe_id.map(SocieteId::into_uuid))
        .bind(&event_types)
        .bind(filter.success)
        .bind(i64::from(filter.limit))
        .bind(i64::from(filter.offset))
        .fetch_all(&self.pool)
        .await?;

        Ok(AuditPage {
            events: rows
                .into_iter()
                .map(AuditRow::into_event)
                .collect::<AuthResult<_>>()?,
            total: total as u64,
        })
    }

    async fn audit_statistics(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        societe_id: Option<SocieteId>,
    ) -> AuthResult<AuditStatistics> {
        const RANGE: &str = "occurred_at BETWEEN $1 AND $2 AND ($3::uuid IS NULL OR societe_id = $3)";
        let societe = societe_id.map(SocieteId::into_uuid);

        let (total, failures): (i64, i64) = sqlx::query_as(&format!(
            "SELECT COUNT(*), COUNT(*) FILTER (WHERE NOT success) FROM audit_log WHERE {RANGE}"
        ))
        .bind(from)
        .bind(to)
        .bind(societe)
        .fetch_one(&self.pool)
        .await?;

        let by_event_type: Vec<(String, i64)> = sqlx::query_as(&format!(
            "SELECT event_type, COUNT(*) FROM audit_log WHERE {RANGE} GROUP BY event_type"
        ))
        .bind(from)
        .bind(to)
        .bind(societe)
        .fetch_all(&self.pool)
        .await?;

        let by_severity: Vec<(String, i64)> = sqlx::query_as(&format!(
            "SELECT severity, COUNT(*) FROM audit_log WHERE {RANGE} GROUP BY severity"
        ))
        .bind(from)
        .bind(to)
        .bind(societe)
        .fetch_all(&self.pool)
        .await?;

        let top_users: Vec<(Uuid, i64)> = sqlx::query_as(&format!(
            r#"
            SELECT user_id, COUNT(*) AS n FROM audit_log
            WHERE {RANGE} AND user_id IS NOT NULL
            GROUP BY user_id
            ORDER BY n DESC
            LIMIT 10
            "#
        ))
        .bind(from)
        .bind(to)
        .bind(societe)
        .fetch_all(&self.pool)
        .await?;

        Ok(AuditStatistics {
            total: total as u64,
            failures: failures as u64,
            by_event_type: by_event_type
                .into_iter()
                .map(|(k, n)| (k, n as u64))
                .collect(),
            by_severity: by_severity.into_iter().map(|(k, n)| (k, n as u64)).collect(),
            top_users: top_users
                .into_iter()
                .map(|(id, n)| UserEventCount {
                    user_id: UserId::from_uuid(id),
                    count: n as u64,
                })
                .collect(),
        })
    }

    async fn purge_audit_events(&self, cutoff: DateTime<Utc>) -> AuthResult<u64> {
        let deleted = sqlx::query("DELETE FROM audit_log WHERE occurred_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?
            .rows_affected();

        Ok(deleted)
    }
}

// ============================================================================
// Row Types for sqlx mapping
// ============================================================================

#[derive(sqlx::FromRow)]
struct AuditRow {
    id: Uuid,
    occurred_at: DateTime<Utc>,
    event_type: String,
    severity: String,
    success: bool,
    user_id: Option<Uuid>,
    societe_id: Option<Uuid>,
    session_id: Option<Uuid>,
    resource: Option<String>,
    action: Option<String>,
    ip: Option<String>,
    user_agent: Option<String>,
    message: Option<String>,
}

impl AuditRow {
    fn into_event(self) -> AuthResult<AuditEvent> {
        Ok(AuditEvent {
            id: AuditEventId::from_uuid(self.id),
            occurred_at: self.occurred_at,
            event_type: self.event_type.parse()?,
            severity: self.severity.parse()?,
            success: self.success,
            user_id: self.user_id.map(UserId::from_uuid),
            societe_id: self.societe_id.map(SocieteId::from_uuid),
            session_id: self.session_id.map(SessionId::from_uuid),
            resource: self.resource,
            action: self.action,
            ip: self.ip,
            user_agent: self.user_agent,
            message: self.message,
        })
    }
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    email: String,
    acronym: String,
    nom: String,
    prenom: String,
    global_role: String,
    is_active: bool,
    last_login_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl UserRow {
    fn into_user(self) -> User {
        User {
            id: UserId::from_uuid(self.id),
            email: Email::from_db(self.email),
            acronym: Acronym::from_db(self.acronym),
            nom: self.nom,
            prenom: self.prenom,
            global_role: GlobalRole::from_code_or_user(&self.global_role),
            is_active: self.is_active,
            last_login_at: self.last_login_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct CredentialsRow {
    user_id: Uuid,
    password_hash: String,
    totp_secret: Option<String>,
    totp_enabled: bool,
    backup_codes: Vec<String>,
    failed_attempts: i16,
    last_failed_at: Option<DateTime<Utc>>,
    locked_until: Option<DateTime<Utc>>,
    password_changed_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl CredentialsRow {
    fn into_credentials(self) -> AuthResult<Credentials> {
        let totp_secret = self.totp_secret.map(TotpSecret::from_base32).transpose()?;

        Ok(Credentials {
            user_id: UserId::from_uuid(self.user_id),
            password_hash: UserPassword::from_phc_string(self.password_hash)?,
            totp_secret,
            totp_enabled: self.totp_enabled,
            backup_codes: BackupCodes::from_hashes(self.backup_codes),
            failed_attempts: self.failed_attempts.max(0) as u16,
            last_failed_at: self.last_failed_at,
            locked_until: self.locked_until,
            password_changed_at: self.password_changed_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SocieteRow {
    id: Uuid,
    nom: String,
    code: String,
    database_name: String,
    is_active: bool,
    created_at: DateTime<Utc>,
}

impl SocieteRow {
    fn into_societe(self, sites: Vec<Site>) -> Societe {
        Societe {
            id: SocieteId::from_uuid(self.id),
            nom: self.nom,
            code: self.code,
            database_name: self.database_name,
            is_active: self.is_active,
            sites,
            created_at: self.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct SiteRow {
    id: Uuid,
    societe_id: Uuid,
    nom: String,
    code: String,
    is_principal: bool,
    is_active: bool,
}

impl SiteRow {
    fn into_site(self) -> Site {
        Site {
            id: SiteId::from_uuid(self.id),
            societe_id: SocieteId::from_uuid(self.societe_id),
            nom: self.nom,
            code: self.code,
            is_principal: self.is_principal,
            is_active: self.is_active,
        }
    }
}

#[derive(sqlx::FromRow)]
struct MembershipRow {
    user_id: Uuid,
    societe_id: Uuid,
    role_type: String,
    role_id: Option<Uuid>,
    is_default: bool,
    additional_permissions: Vec<String>,
    restricted_permissions: Vec<String>,
    allowed_site_ids: Vec<Uuid>,
    granted_by: Option<Uuid>,
    granted_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    is_active: bool,
}

impl MembershipRow {
    fn into_membership(self) -> AuthResult<Membership> {
        Ok(Membership {
            user_id: UserId::from_uuid(self.user_id),
            societe_id: SocieteId::from_uuid(self.societe_id),
            role_type: self.role_type.parse()?,
            role_id: self.role_id.map(RoleDefinitionId::from_uuid),
            is_default: self.is_default,
            additional_permissions: self.additional_permissions,
            restricted_permissions: self.restricted_permissions,
            allowed_site_ids: self.allowed_site_ids.into_iter().map(SiteId::from_uuid).collect(),
            granted_by: self.granted_by.map(UserId::from_uuid),
            granted_at: self.granted_at,
            expires_at: self.expires_at,
            is_active: self.is_active,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RoleDefinitionRow {
    id: Uuid,
    societe_id: Uuid,
    parent_role_type: String,
    name: String,
    is_active: bool,
}

#[derive(sqlx::FromRow)]
struct RoleGrantRow {
    permission_key: String,
    access_level: String,
    is_granted: bool,
    is_active: bool,
}

impl RoleDefinitionRow {
    fn into_definition(self, grants: Vec<RoleGrantRow>) -> AuthResult<RoleDefinition> {
        let mut parsed = Vec::with_capacity(grants.len());
        for grant in grants {
            let Ok(key) = PermissionKey::parse(&grant.permission_key) else {
                tracing::warn!(
                    role_id = %self.id,
                    key = %grant.permission_key,
                    "Skipping malformed permission key"
                );
                continue;
            };
            parsed.push(RoleGrant {
                key,
                level: grant.access_level.parse()?,
                granted: grant.is_granted,
                active: grant.is_active,
            });
        }

        Ok(RoleDefinition {
            id: RoleDefinitionId::from_uuid(self.id),
            societe_id: SocieteId::from_uuid(self.societe_id),
            parent_role_type: self.parent_role_type.parse()?,
            name: self.name,
            is_active: self.is_active,
            grants: parsed,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: Uuid,
    user_id: Uuid,
    societe_id: Option<Uuid>,
    site_id: Option<Uuid>,
    refresh_token_hash: String,
    ip: Option<String>,
    user_agent: Option<String>,
    login_at: DateTime<Utc>,
    last_activity_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    status: String,
    ended_at: Option<DateTime<Utc>>,
    ended_by: Option<Uuid>,
    logout_reason: Option<String>,
}

impl SessionRow {
    fn into_session(self) -> AuthResult<UserSession> {
        Ok(UserSession {
            id: SessionId::from_uuid(self.id),
            user_id: UserId::from_uuid(self.user_id),
            societe_id: self.societe_id.map(SocieteId::from_uuid),
            site_id: self.site_id.map(SiteId::from_uuid),
            refresh_token_hash: self.refresh_token_hash,
            ip: self.ip,
            user_agent: self.user_agent,
            login_at: self.login_at,
            last_activity_at: self.last_activity_at,
            expires_at: self.expires_at,
            status: self.status.parse()?,
            ended_at: self.ended_at,
            ended_by: self.ended_by.map(UserId::from_uuid),
            logout_reason: self.logout_reason,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ChallengeRow {
    id: Uuid,
    user_id: Uuid,
    token_hash: String,
    status: String,
    attempts: i16,
    max_attempts: i16,
    ip: Option<String>,
    user_agent: Option<String>,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    verified_at: Option<DateTime<Utc>>,
}

impl ChallengeRow {
    fn into_challenge(self) -> AuthResult<MfaChallenge> {
        Ok(MfaChallenge {
            id: MfaChallengeId::from_uuid(self.id),
            user_id: UserId::from_uuid(self.user_id),
            token_hash: self.token_hash,
            status: self.status.parse()?,
            attempts: self.attempts.clamp(0, u8::MAX as i16) as u8,
            max_attempts: self.max_attempts.clamp(0, u8::MAX as i16) as u8,
            ip: self.ip,
            user_agent: self.user_agent,
            created_at: self.created_at,
            expires_at: self.expires_at,
            verified_at: self.verified_at,
        })
    }
}
