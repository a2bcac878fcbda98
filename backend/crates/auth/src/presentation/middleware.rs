//! Auth Middleware
//!
//! Layers for protected routes. [`require_auth`] resolves the bearer token
//! (or the access cookie) into an [`AuthContext`] stored in the request
//! extensions; the other layers assume it is present.

use axum::body::Body;
use axum::extract::{FromRequestParts, State};
use axum::http::request::Parts;
use axum::http::{Request, header};
use axum::middleware::Next;
use axum::response::Response;

use chrono::Utc;

use crate::application::audit::record_audit;
use crate::application::{AuthContext, AuthenticateUseCase};
use crate::domain::entity::{AuditEvent, AuditEventType};
use crate::domain::repository::AuthStore;
use crate::domain::value_object::{AccessLevel, GlobalRole};
use crate::error::{AuthError, AuthResult};
use crate::presentation::handlers::AuthAppState;

/// Require a valid access token bound to a live session
pub async fn require_auth<R: AuthStore>(
    State(state): State<AuthAppState<R>>,
    mut req: Request<Body>,
    next: Next,
) -> AuthResult<Response> {
    let token = bearer_token(req.headers())
        .or_else(|| platform::cookie::extract_cookie(req.headers(), &state.config.access_cookie_name))
        .ok_or(AuthError::TokenMissing)?;

    let use_case = AuthenticateUseCase::new(state.repo.clone(), state.config.clone());
    let ctx = use_case.execute(&token).await?;

    req.extensions_mut().insert(ctx);
    Ok(next.run(req).await)
}

/// Require a société to be selected on the session
pub async fn require_tenant(req: Request<Body>, next: Next) -> AuthResult<Response> {
    let has_tenant = req
        .extensions()
        .get::<AuthContext>()
        .ok_or(AuthError::TokenMissing)?
        .tenant
        .is_some();
    if !has_tenant {
        return Err(AuthError::TenantRequired);
    }
    Ok(next.run(req).await)
}

/// Require a minimum global role
pub async fn require_global_role(
    State(min): State<GlobalRole>,
    req: Request<Body>,
    next: Next,
) -> AuthResult<Response> {
    let ctx = req
        .extensions()
        .get::<AuthContext>()
        .ok_or(AuthError::TokenMissing)?;
    if !ctx.has_role(min) {
        tracing::warn!(
            user_id = %ctx.user_id,
            role = %ctx.role,
            required = %min,
            "Insufficient global role"
        );
        return Err(AuthError::InsufficientRole);
    }
    Ok(next.run(req).await)
}

/// Permission requirement checked by [`require_permission`]
pub struct PermissionGuard<R: AuthStore> {
    pub app: AuthAppState<R>,
    pub resource: &'static str,
    pub action: &'static str,
    pub level: AccessLevel,
}

impl<R: AuthStore> PermissionGuard<R> {
    pub fn new(
        app: AuthAppState<R>,
        resource: &'static str,
        action: &'static str,
        level: AccessLevel,
    ) -> Self {
        Self {
            app,
            resource,
            action,
            level,
        }
    }
}

impl<R: AuthStore> Clone for PermissionGuard<R> {
    fn clone(&self) -> Self {
        Self {
            app: self.app.clone(),
            resource: self.resource,
            action: self.action,
            level: self.level,
        }
    }
}

/// Require a resolved permission in the selected société
pub async fn require_permission<R: AuthStore>(
    State(guard): State<PermissionGuard<R>>,
    req: Request<Body>,
    next: Next,
) -> AuthResult<Response> {
    let ctx = req
        .extensions()
        .get::<AuthContext>()
        .ok_or(AuthError::TokenMissing)?;
    let tenant = ctx.tenant.as_ref().ok_or(AuthError::TenantRequired)?;

    let allowed = guard
        .app
        .permission_service()
        .has_permission(
            ctx.user_id,
            tenant.societe_id,
            tenant.site_id,
            guard.resource,
            guard.action,
            guard.level,
        )
        .await?;

    if !allowed {
        let permission = format!("{}:{}", guard.resource, guard.action);
        tracing::warn!(
            user_id = %ctx.user_id,
            societe_id = %tenant.societe_id,
            permission = %permission,
            level = %guard.level,
            "Permission denied"
        );
        record_audit(
            &*guard.app.repo,
            AuditEvent::new(AuditEventType::AccessDenied, Utc::now())
                .user(ctx.user_id)
                .societe(Some(tenant.societe_id))
                .session(ctx.session_id)
                .target(guard.resource, guard.action)
                .message(format!("required level {}", guard.level))
                .failed(),
        )
        .await;
        return Err(AuthError::PermissionDenied(permission));
    }
    Ok(next.run(req).await)
}

impl<S> FromRequestParts<S> for AuthContext
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .ok_or(AuthError::TokenMissing)
    }
}

fn bearer_token(headers: &axum::http::HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}
