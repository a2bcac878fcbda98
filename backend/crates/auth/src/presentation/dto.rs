//! API DTOs (Data Transfer Objects)

use chrono::{DateTime, Utc};
use kernel::id::{AuditEventId, SessionId, SiteId, SocieteId, UserId};
use serde::{Deserialize, Serialize};

use crate::application::verify_mfa::MfaMethod;
use crate::application::{SocieteAccess, TenantContext, TokenPair};
use crate::domain::entity::{AuditEvent, AuditEventType, Site, User, UserSession};
use crate::domain::repository::{AuditFilter, AuditPage};
use crate::domain::service::PermissionSummary;
use crate::domain::value_object::{GlobalRole, SocieteRole};
use crate::error::AuthResult;

// ============================================================================
// Register
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub email: String,
    pub acronym: String,
    pub password: String,
    pub nom: String,
    pub prenom: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    pub user_id: UserId,
    pub email: String,
    pub acronym: String,
}

// ============================================================================
// Login
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    /// Email or acronym
    #[serde(alias = "email", alias = "login")]
    pub identifier: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: UserId,
    pub email: String,
    pub acronym: String,
    pub nom: String,
    pub prenom: String,
    pub role: GlobalRole,
}

impl From<&User> for UserResponse {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.to_string(),
            acronym: user.acronym.to_string(),
            nom: user.nom.clone(),
            prenom: user.prenom.clone(),
            role: user.global_role,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum LoginResponse {
    #[serde(rename_all = "camelCase")]
    Authenticated {
        user: UserResponse,
        session_id: SessionId,
        tokens: TokenPair,
    },
    #[serde(rename_all = "camelCase")]
    MfaRequired {
        requires_mfa: bool,
        challenge_token: String,
        methods: Vec<&'static str>,
        expires_in: i64,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyMfaRequest {
    pub challenge_token: String,
    pub code: String,
    #[serde(default)]
    pub method: Option<MfaMethod>,
}

// ============================================================================
// Refresh / logout
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub tokens: TokenPair,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant: Option<TenantContext>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogoutQuery {
    #[serde(default)]
    pub all: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndedSessionsResponse {
    pub ended_sessions: u64,
}

// ============================================================================
// Sociétés
// ============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteResponse {
    pub id: SiteId,
    pub nom: String,
    pub code: String,
    pub is_principal: bool,
}

impl From<&Site> for SiteResponse {
    fn from(site: &Site) -> Self {
        Self {
            id: site.id,
            nom: site.nom.clone(),
            code: site.code.clone(),
            is_principal: site.is_principal,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SocieteResponse {
    pub id: SocieteId,
    pub nom: String,
    pub code: String,
    pub role: String,
    pub is_default: bool,
    pub sites: Vec<SiteResponse>,
}

impl From<&SocieteAccess> for SocieteResponse {
    fn from(access: &SocieteAccess) -> Self {
        Self {
            id: access.societe.id,
            nom: access.societe.nom.clone(),
            code: access.societe.code.clone(),
            role: access.role.clone(),
            is_default: access.is_default,
            sites: access.sites.iter().map(SiteResponse::from).collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectSocieteRequest {
    pub societe_id: SocieteId,
    #[serde(default)]
    pub site_id: Option<SiteId>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectSocieteResponse {
    pub tokens: TokenPair,
    pub tenant: TenantContext,
    pub societe_nom: String,
    pub permissions: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefaultSocieteRequest {
    pub societe_id: SocieteId,
}

// ============================================================================
// Permissions
// ============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionsResponse {
    pub societe_id: SocieteId,
    pub site_id: Option<SiteId>,
    pub societe_role: SocieteRole,
    pub permissions: Vec<String>,
    pub summary: PermissionSummary,
}

// ============================================================================
// Password / TOTP
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
    #[serde(default)]
    pub mfa_code: Option<String>,
}

/// TOTP setup response
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TotpSetupResponse {
    /// QR code as base64-encoded PNG
    pub qr_code: String,
    /// Secret for manual entry
    pub secret: String,
    /// otpauth:// URL
    pub otpauth_url: String,
}

/// Code for TOTP verify / disable
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TotpCodeRequest {
    pub code: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TotpEnabledResponse {
    /// Shown once
    pub backup_codes: Vec<String>,
}

// ============================================================================
// Audit trail
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditQuery {
    #[serde(default)]
    pub from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub to: Option<DateTime<Utc>>,
    #[serde(default)]
    pub user_id: Option<UserId>,
    #[serde(default)]
    pub societe_id: Option<SocieteId>,
    /// Comma separated codes, e.g. `LOGIN_FAILED,ACCOUNT_LOCKED`
    #[serde(default)]
    pub event_types: Option<String>,
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub offset: Option<u32>,
}

impl AuditQuery {
    pub const DEFAULT_LIMIT: u32 = 100;

    pub fn into_filter(self) -> AuthResult<AuditFilter> {
        let event_types = self
            .event_types
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|code| !code.is_empty())
            .map(str::parse::<AuditEventType>)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(AuditFilter {
            from: self.from,
            to: self.to,
            user_id: self.user_id,
            societe_id: self.societe_id,
            event_types,
            success: self.success,
            limit: self.limit.unwrap_or(Self::DEFAULT_LIMIT),
            offset: self.offset.unwrap_or(0),
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditStatsQuery {
    #[serde(default)]
    pub from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub to: Option<DateTime<Utc>>,
    #[serde(default)]
    pub societe_id: Option<SocieteId>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEventResponse {
    pub id: AuditEventId,
    pub occurred_at: DateTime<Utc>,
    pub event_type: String,
    pub severity: String,
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

impl From<AuditEvent> for AuditEventResponse {
    fn from(event: AuditEvent) -> Self {
        Self {
            id: event.id,
            occurred_at: event.occurred_at,
            event_type: event.event_type.to_string(),
            severity: event.severity.to_string(),
            success: event.success,
            user_id: event.user_id,
            societe_id: event.societe_id,
            session_id: event.session_id,
            resource: event.resource,
            action: event.action,
            ip: event.ip,
            user_agent: event.user_agent,
            message: event.message,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditPageResponse {
    pub events: Vec<AuditEventResponse>,
    pub total: u64,
}

impl From<AuditPage> for AuditPageResponse {
    fn from(page: AuditPage) -> Self {
        Self {
            events: page.events.into_iter().map(Into::into).collect(),
            total: page.total,
        }
    }
}

// ============================================================================
// Session administration
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionsQuery {
    #[serde(default)]
    pub user_id: Option<UserId>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForceLogoutRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub id: SessionId,
    pub user_id: UserId,
    pub societe_id: Option<SocieteId>,
    pub site_id: Option<SiteId>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub login_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: String,
    pub ended_at: Option<DateTime<Utc>>,
    pub ended_by: Option<UserId>,
    pub logout_reason: Option<String>,
}

impl From<UserSession> for SessionResponse {
    fn from(session: UserSession) -> Self {
        Self {
            id: session.id,
            user_id: session.user_id,
            societe_id: session.societe_id,
            site_id: session.site_id,
            ip: session.ip,
            user_agent: session.user_agent,
            login_at: session.login_at,
            last_activity_at: session.last_activity_at,
            expires_at: session.expires_at,
            status: session.status.to_string(),
            ended_at: session.ended_at,
            ended_by: session.ended_by,
            logout_reason: session.logout_reason,
        }
    }
}
