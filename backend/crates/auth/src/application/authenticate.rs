//! Authenticate Use Case
//!
//! Validates an access token against its session and builds the
//! [`AuthContext`] handlers work with.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use kernel::id::{SessionId, UserId};
use serde::Serialize;

use crate::application::config::AuthConfig;
use crate::application::tokens::{TenantContext, decode_access_token};
use crate::domain::repository::{SessionRepository, UserRepository};
use crate::domain::value_object::GlobalRole;
use crate::error::{AuthError, AuthResult};

/// Sessions are not touched more often than this
const TOUCH_INTERVAL_SECS: i64 = 60;

/// Authenticated caller, stored in request extensions
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthContext {
    pub user_id: UserId,
    pub email: String,
    pub role: GlobalRole,
    pub session_id: SessionId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant: Option<TenantContext>,
    pub permissions: Vec<String>,
    pub expires_at: DateTime<Utc>,
}

impl AuthContext {
    pub fn has_role(&self, min: GlobalRole) -> bool {
        self.role >= min
    }
}

pub struct AuthenticateUseCase<R>
where
    R: UserRepository + SessionRepository + Send + Sync + 'static,
{
    repo: Arc<R>,
    config: Arc<AuthConfig>,
}

impl<R> AuthenticateUseCase<R>
where
    R: UserRepository + SessionRepository + Send + Sync + 'static,
{
    pub fn new(repo: Arc<R>, config: Arc<AuthConfig>) -> Self {
        Self { repo, config }
    }

    pub async fn execute(&self, access_token: &str) -> AuthResult<AuthContext> {
        let now = Utc::now();
        let claims = decode_access_token(&self.config, access_token, now)?;

        let session = self
            .repo
            .find_session(claims.sid)
            .await?
            .filter(|s| s.user_id == claims.sub && s.is_usable(now))
            .ok_or(AuthError::SessionInvalid)?;

        let user = self
            .repo
            .find_user_by_id(claims.sub)
            .await?
            .ok_or(AuthError::SessionInvalid)?;
        if !user.is_active {
            return Err(AuthError::AccountDisabled);
        }

        if now - session.last_activity_at > Duration::seconds(TOUCH_INTERVAL_SECS) {
            let repo = self.repo.clone();
            let session_id = session.id;
            tokio::spawn(async move {
                if let Err(e) = repo.touch_session(session_id, now).await {
                    tracing::debug!(session_id = %session_id, error = %e, "Session touch failed");
                }
            });
        }

        let tenant = claims.tenant();
        Ok(AuthContext {
            user_id: user.id,
            email: user.email.to_string(),
            // role from the database so demotions apply immediately
            role: user.global_role,
            session_id: session.id,
            tenant,
            permissions: claims.permissions,
            expires_at: DateTime::from_timestamp(claims.exp, 0).unwrap_or(now),
        })
    }
}
