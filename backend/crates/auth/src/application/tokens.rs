//! Access / refresh token claims and issuing
//!
//! Access tokens carry the identity (`sub`, `email`, `role`, `sid`) and, after
//! a société has been selected, the tenant context and the effective
//! permission list. Refresh tokens only carry `sub` / `sid` plus a random
//! `jti`; the tenant context of a refreshed pair comes from the session row.

use chrono::{DateTime, Duration, Utc};
use kernel::id::{SessionId, SiteId, SocieteId, UserId};
use platform::crypto::{random_token, sha256_hex};
use serde::{Deserialize, Serialize};

use crate::application::config::AuthConfig;
use crate::domain::entity::{Societe, User};
use crate::domain::value_object::{GlobalRole, SocieteRole};
use crate::error::{AuthError, AuthResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

/// Tenant part of an access token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantContext {
    pub societe_id: SocieteId,
    pub societe_code: String,
    pub site_id: Option<SiteId>,
    pub tenant_database: String,
    pub societe_role: SocieteRole,
}

impl TenantContext {
    pub fn new(societe: &Societe, site_id: Option<SiteId>, societe_role: SocieteRole) -> Self {
        Self {
            societe_id: societe.id,
            societe_code: societe.code.clone(),
            site_id,
            tenant_database: societe.database_name.clone(),
            societe_role,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: UserId,
    pub email: String,
    pub role: GlobalRole,
    pub sid: SessionId,
    pub typ: TokenType,
    pub iat: i64,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub societe_id: Option<SocieteId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub societe_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_id: Option<SiteId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_database: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub societe_role: Option<SocieteRole>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permissions: Vec<String>,
}

impl AccessClaims {
    /// Tenant context, when the token was issued for a société
    pub fn tenant(&self) -> Option<TenantContext> {
        Some(TenantContext {
            societe_id: self.societe_id?,
            societe_code: self.societe_code.clone()?,
            site_id: self.site_id,
            tenant_database: self.tenant_database.clone()?,
            societe_role: self.societe_role?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshClaims {
    pub sub: UserId,
    pub sid: SessionId,
    pub typ: TokenType,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

/// Tokens as returned to clients
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    /// Access token lifetime in seconds
    pub expires_in: i64,
    pub refresh_expires_in: i64,
}

/// A freshly signed pair plus what the session row must remember
#[derive(Debug, Clone)]
pub struct IssuedTokens {
    pub pair: TokenPair,
    /// SHA-256 hex of the refresh token
    pub refresh_token_hash: String,
    pub refresh_expires_at: DateTime<Utc>,
}

pub fn hash_refresh_token(token: &str) -> String {
    sha256_hex(token.as_bytes())
}

/// Sign an access + refresh pair for `session_id`
pub fn issue_tokens(
    config: &AuthConfig,
    user: &User,
    session_id: SessionId,
    tenant: Option<&TenantContext>,
    permissions: Vec<String>,
    now: DateTime<Utc>,
) -> AuthResult<IssuedTokens> {
    let iat = now.timestamp();
    let access_exp = now + config.access_token_ttl;
    let refresh_exp = now + config.refresh_token_ttl;

    let access = AccessClaims {
        sub: user.id,
        email: user.email.as_str().to_string(),
        role: user.global_role,
        sid: session_id,
        typ: TokenType::Access,
        iat,
        exp: access_exp.timestamp(),
        societe_id: tenant.map(|t| t.societe_id),
        societe_code: tenant.map(|t| t.societe_code.clone()),
        site_id: tenant.and_then(|t| t.site_id),
        tenant_database: tenant.map(|t| t.tenant_database.clone()),
        societe_role: tenant.map(|t| t.societe_role),
        permissions: if tenant.is_some() { permissions } else { Vec::new() },
    };

    let refresh = RefreshClaims {
        sub: user.id,
        sid: session_id,
        typ: TokenType::Refresh,
        iat,
        exp: refresh_exp.timestamp(),
        jti: random_token(16),
    };

    let access_token = config.access_keys.encode(&access).map_err(AuthError::from)?;
    let refresh_token = config.refresh_keys.encode(&refresh).map_err(AuthError::from)?;

    Ok(IssuedTokens {
        refresh_token_hash: hash_refresh_token(&refresh_token),
        refresh_expires_at: refresh_exp,
        pair: TokenPair {
            access_token,
            refresh_token,
            token_type: "Bearer",
            expires_in: config.access_token_ttl_secs(),
            refresh_expires_in: config.refresh_token_ttl_secs(),
        },
    })
}

pub fn decode_access_token(
    config: &AuthConfig,
    token: &str,
    now: DateTime<Utc>,
) -> AuthResult<AccessClaims> {
    let claims: AccessClaims = config.access_keys.decode(token, now)?;
    if claims.typ != TokenType::Access {
        return Err(AuthError::SessionInvalid);
    }
    Ok(claims)
}

pub fn decode_refresh_token(
    config: &AuthConfig,
    token: &str,
    now: DateTime<Utc>,
) -> AuthResult<RefreshClaims> {
    let claims: RefreshClaims = config.refresh_keys.decode(token, now)?;
    if claims.typ != TokenType::Refresh {
        return Err(AuthError::SessionInvalid);
    }
    Ok(claims)
}

/// Seconds left before `exp`, never negative
pub fn seconds_until(exp: i64, now: DateTime<Utc>) -> i64 {
    (exp - now.timestamp()).max(0)
}

/// Session lifetime matching the refresh token
pub fn session_ttl(config: &AuthConfig) -> Duration {
    config.refresh_token_ttl
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value_object::{Acronym, Email};

    fn user() -> User {
        User::new(
            Email::new("marie.martin@topsteel.fr").unwrap(),
            Acronym::new("MMA").unwrap(),
            "Martin".into(),
            "Marie".into(),
        )
    }

    #[test]
    fn test_base_tokens_have_no_tenant() {
        let config = AuthConfig::development();
        let user = user();
        let sid = SessionId::new();
        let now = Utc::now();

        let issued = issue_tokens(&config, &user, sid, None, vec!["x:y".into()], now).unwrap();
        let claims = decode_access_token(&config, &issued.pair.access_token, now).unwrap();

        assert_eq!(claims.sub, user.id);
        assert_eq!(claims.sid, sid);
        assert_eq!(claims.role, GlobalRole::User);
        assert!(claims.tenant().is_none());
        assert!(claims.permissions.is_empty());
        assert_eq!(issued.refresh_token_hash, hash_refresh_token(&issued.pair.refresh_token));
    }

    #[test]
    fn test_tenant_tokens_carry_context() {
        let config = AuthConfig::development();
        let user = user();
        let now = Utc::now();
        let mut societe = Societe::new("TopSteel Nord", "TSN");
        let site = societe.add_site("Lille", "LIL");
        let tenant = TenantContext::new(&societe, Some(site), SocieteRole::Gestionnaire);

        let issued = issue_tokens(
            &config,
            &user,
            SessionId::new(),
            Some(&tenant),
            vec!["articles:read".into()],
            now,
        )
        .unwrap();
        let claims = decode_access_token(&config, &issued.pair.access_token, now).unwrap();

        assert_eq!(claims.tenant(), Some(tenant));
        assert_eq!(claims.tenant_database.as_deref(), Some("erp_topsteel_tsn"));
        assert_eq!(claims.permissions, ["articles:read"]);
    }

    #[test]
    fn test_access_and_refresh_keys_are_not_interchangeable() {
        let config = AuthConfig::development();
        let now = Utc::now();
        let issued = issue_tokens(&config, &user(), SessionId::new(), None, Vec::new(), now).unwrap();

        assert!(decode_refresh_token(&config, &issued.pair.access_token, now).is_err());
        assert!(decode_access_token(&config, &issued.pair.refresh_token, now).is_err());
        assert!(decode_refresh_token(&config, &issued.pair.refresh_token, now).is_ok());
    }

    #[test]
    fn test_expired_access_token() {
        let config = AuthConfig::development();
        let now = Utc::now();
        let issued_at = now - config.access_token_ttl - Duration::seconds(5);
        let issued =
            issue_tokens(&config, &user(), SessionId::new(), None, Vec::new(), issued_at).unwrap();

        assert!(matches!(
            decode_access_token(&config, &issued.pair.access_token, now),
            Err(AuthError::TokenExpired)
        ));
    }
}
