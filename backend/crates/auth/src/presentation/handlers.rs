//! HTTP Handlers

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::IntoResponse;
use chrono::Utc;
use kernel::error::app_error::ResultExt;
use kernel::error::kind::ErrorKind;
use kernel::id::{SessionId, UserId};
use platform::client::{ClientFingerprint, extract_client_ip, extract_fingerprint};
use platform::cookie::{CookieConfig, extract_cookie};
use platform::rate_limit::{InMemoryRateLimitStore, RateLimitConfig, RateLimitStore};
use serde::de::DeserializeOwned;

use crate::application::config::AuthConfig;
use crate::application::{
    AuditUseCase, AuthContext, ChangePasswordInput, ChangePasswordUseCase, DefaultSocieteUseCase,
    ListSocietesUseCase, LoginInput, MfaStatus, LoginOutcome, LoginSuccess, LoginUseCase, LogoutUseCase,
    PermissionService, RefreshTokenUseCase, RegisterInput, RegisterUseCase, SelectSocieteInput,
    SelectSocieteUseCase, SessionAdminUseCase, TokenPair, TotpUseCase, VerifyMfaInput,
    VerifyMfaUseCase,
};
use crate::domain::repository::{AuditStatistics, AuthStore, SessionStats};
use crate::error::{AuthError, AuthResult};
use crate::infra::permission_cache::PermissionCache;
use crate::presentation::dto::{
    AuditPageResponse, AuditQuery, AuditStatsQuery, ChangePasswordRequest, DefaultSocieteRequest, EndedSessionsResponse, ForceLogoutRequest,
    HistoryQuery, LoginRequest, LoginResponse, LogoutQuery, PermissionsResponse, RefreshRequest,
    RefreshResponse, RegisterRequest, RegisterResponse, SelectSocieteRequest,
    SelectSocieteResponse, SessionResponse, SessionsQuery, SocieteResponse, TotpCodeRequest,
    TotpEnabledResponse, TotpSetupResponse, UserResponse, VerifyMfaRequest,
};

/// Shared state for auth handlers
pub struct AuthAppState<R>
where
    R: AuthStore,
{
    pub repo: Arc<R>,
    pub config: Arc<AuthConfig>,
    pub permissions: Arc<PermissionCache>,
    pub rate_limiter: Arc<InMemoryRateLimitStore>,
}

impl<R: AuthStore> AuthAppState<R> {
    pub fn new(repo: R, config: AuthConfig) -> Self {
        Self {
            permissions: Arc::new(PermissionCache::new(config.permission_cache_ttl)),
            rate_limiter: Arc::new(InMemoryRateLimitStore::new()),
            repo: Arc::new(repo),
            config: Arc::new(config),
        }
    }

    pub fn permission_service(&self) -> PermissionService<R> {
        PermissionService::new(self.repo.clone(), self.permissions.clone())
    }
}

impl<R: AuthStore> Clone for AuthAppState<R> {
    fn clone(&self) -> Self {
        Self {
            repo: self.repo.clone(),
            config: self.config.clone(),
            permissions: self.permissions.clone(),
            rate_limiter: self.rate_limiter.clone(),
        }
    }
}

// ============================================================================
// Register
// ============================================================================

/// POST /api/auth/register
pub async fn register<R: AuthStore>(
    State(state): State<AuthAppState<R>>,
    Json(req): Json<RegisterRequest>,
) -> AuthResult<impl IntoResponse> {
    let use_case = RegisterUseCase::new(state.repo.clone(), state.config.clone());

    let output = use_case
        .execute(RegisterInput {
            email: req.email,
            acronym: req.acronym,
            password: req.password,
            nom: req.nom,
            prenom: req.prenom,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            user_id: output.user_id,
            email: output.email,
            acronym: output.acronym,
        }),
    ))
}

// ============================================================================
// Login
// ============================================================================

/// POST /api/auth/login
pub async fn login<R: AuthStore>(
    State(state): State<AuthAppState<R>>,
    headers: HeaderMap,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(req): Json<LoginRequest>,
) -> AuthResult<impl IntoResponse> {
    let fingerprint = fingerprint(&state.config, &headers, addr)?;
    let ip_key = fingerprint.rate_limit_key("login");
    let account_key = format!("login:account:{}", req.identifier.trim().to_lowercase());
    enforce_rate_limit(&state.rate_limiter, &ip_key, &state.config.login_ip_rate_limit).await?;
    enforce_rate_limit(&state.rate_limiter, &account_key, &state.config.login_rate_limit).await?;

    let use_case = LoginUseCase::new(state.repo.clone(), state.config.clone());
    let outcome = use_case
        .execute(
            LoginInput {
                identifier: req.identifier,
                password: req.password,
            },
            &fingerprint,
        )
        .await?;

    // The per-IP window is left untouched
    state.rate_limiter.reset(&account_key).await?;

    match outcome {
        LoginOutcome::Authenticated(success) => {
            Ok(login_response(&state.config, success).into_response())
        }
        LoginOutcome::MfaRequired {
            challenge_token,
            methods,
            expires_in,
        } => Ok(Json(LoginResponse::MfaRequired {
            requires_mfa: true,
            challenge_token,
            methods,
            expires_in,
        })
        .into_response()),
    }
}

/// POST /api/auth/login/mfa
pub async fn verify_mfa<R: AuthStore>(
    State(state): State<AuthAppState<R>>,
    headers: HeaderMap,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(req): Json<VerifyMfaRequest>,
) -> AuthResult<impl IntoResponse> {
    let fingerprint = fingerprint(&state.config, &headers, addr)?;
    let limit_key = fingerprint.rate_limit_key("mfa");
    enforce_rate_limit(&state.rate_limiter, &limit_key, &state.config.mfa_rate_limit).await?;

    let use_case = VerifyMfaUseCase::new(state.repo.clone(), state.config.clone());
    let success = use_case
        .execute(
            VerifyMfaInput {
                challenge_token: req.challenge_token,
                code: req.code,
                method: req.method,
            },
            &fingerprint,
        )
        .await?;

    Ok(login_response(&state.config, success))
}

fn login_response(config: &AuthConfig, success: LoginSuccess) -> (HeaderMap, Json<LoginResponse>) {
    let cookies = token_cookies(config, &success.tokens);
    (
        cookies,
        Json(LoginResponse::Authenticated {
            user: UserResponse::from(&success.user),
            session_id: success.session_id,
            tokens: success.tokens,
        }),
    )
}

// ============================================================================
// Refresh / logout / me
// ============================================================================

/// POST /api/auth/refresh
///
/// The refresh token is read from the JSON body, or from the refresh cookie.
pub async fn refresh<R: AuthStore>(
    State(state): State<AuthAppState<R>>,
    headers: HeaderMap,
    body: Bytes,
) -> AuthResult<impl IntoResponse> {
    let req: RefreshRequest = optional_json(&body)?;
    let token = req
        .refresh_token
        .filter(|t| !t.is_empty())
        .or_else(|| extract_cookie(&headers, &state.config.refresh_cookie_name))
        .ok_or(AuthError::TokenMissing)?;

    let use_case =
        RefreshTokenUseCase::new(state.repo.clone(), state.config.clone(), state.permissions.clone());
    let output = use_case.execute(&token).await?;

    Ok((
        token_cookies(&state.config, &output.tokens),
        Json(RefreshResponse {
            tokens: output.tokens,
            tenant: output.tenant,
        }),
    ))
}

/// POST /api/auth/logout
pub async fn logout<R: AuthStore>(
    State(state): State<AuthAppState<R>>,
    ctx: AuthContext,
    Query(query): Query<LogoutQuery>,
) -> AuthResult<impl IntoResponse> {
    let use_case = LogoutUseCase::new(state.repo.clone());

    let ended_sessions = if query.all {
        use_case.execute_all(ctx.user_id).await?
    } else {
        use_case.execute(ctx.user_id, ctx.session_id).await?;
        1
    };
    state.permissions.invalidate_user(ctx.user_id, None).await;

    Ok((
        clear_token_cookies(&state.config),
        Json(EndedSessionsResponse { ended_sessions }),
    ))
}

/// GET /api/auth/me
pub async fn me(ctx: AuthContext) -> Json<AuthContext> {
    Json(ctx)
}

// ============================================================================
// Sociétés
// ============================================================================

/// GET /api/auth/societes
pub async fn list_societes<R: AuthStore>(
    State(state): State<AuthAppState<R>>,
    ctx: AuthContext,
) -> AuthResult<Json<Vec<SocieteResponse>>> {
    let societes = ListSocietesUseCase::new(state.repo.clone())
        .execute(ctx.user_id)
        .await?;

    Ok(Json(societes.iter().map(SocieteResponse::from).collect()))
}

/// POST /api/auth/login-societe
pub async fn login_societe<R: AuthStore>(
    State(state): State<AuthAppState<R>>,
    ctx: AuthContext,
    Json(req): Json<SelectSocieteRequest>,
) -> AuthResult<impl IntoResponse> {
    let use_case =
        SelectSocieteUseCase::new(state.repo.clone(), state.config.clone(), state.permissions.clone());

    let output = use_case
        .execute(SelectSocieteInput {
            user_id: ctx.user_id,
            session_id: ctx.session_id,
            societe_id: req.societe_id,
            site_id: req.site_id,
        })
        .await?;

    Ok((
        token_cookies(&state.config, &output.tokens),
        Json(SelectSocieteResponse {
            tokens: output.tokens,
            tenant: output.tenant,
            societe_nom: output.societe_nom,
            permissions: output.permissions,
        }),
    ))
}

/// GET /api/auth/default-societe
pub async fn get_default_societe<R: AuthStore>(
    State(state): State<AuthAppState<R>>,
    ctx: AuthContext,
) -> AuthResult<Json<Option<SocieteResponse>>> {
    let current = DefaultSocieteUseCase::new(state.repo.clone())
        .get(ctx.user_id)
        .await?;

    Ok(Json(current.as_ref().map(SocieteResponse::from)))
}

/// PUT /api/auth/default-societe
pub async fn set_default_societe<R: AuthStore>(
    State(state): State<AuthAppState<R>>,
    ctx: AuthContext,
    Json(req): Json<DefaultSocieteRequest>,
) -> AuthResult<StatusCode> {
    DefaultSocieteUseCase::new(state.repo.clone())
        .set(ctx.user_id, req.societe_id)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/auth/permissions
pub async fn permissions<R: AuthStore>(
    State(state): State<AuthAppState<R>>,
    ctx: AuthContext,
) -> AuthResult<Json<PermissionsResponse>> {
    let tenant = ctx.tenant.as_ref().ok_or(AuthError::TenantRequired)?;
    let effective = state
        .permission_service()
        .resolve(ctx.user_id, tenant.societe_id, tenant.site_id)
        .await?;

    Ok(Json(PermissionsResponse {
        societe_id: effective.societe_id,
        site_id: effective.site_id,
        societe_role: effective.societe_role,
        permissions: effective.permission_strings(),
        summary: effective.summary(),
    }))
}

// ============================================================================
// Password and TOTP
// ============================================================================

/// POST /api/auth/password
pub async fn change_password<R: AuthStore>(
    State(state): State<AuthAppState<R>>,
    ctx: AuthContext,
    Json(req): Json<ChangePasswordRequest>,
) -> AuthResult<Json<EndedSessionsResponse>> {
    let use_case = ChangePasswordUseCase::new(state.repo.clone(), state.config.clone());

    let ended_sessions = use_case
        .execute(ChangePasswordInput {
            user_id: ctx.user_id,
            current_session: ctx.session_id,
            current_password: req.current_password,
            new_password: req.new_password,
            mfa_code: req.mfa_code,
        })
        .await?;

    Ok(Json(EndedSessionsResponse { ended_sessions }))
}

/// POST /api/auth/mfa/totp/setup
pub async fn totp_setup<R: AuthStore>(
    State(state): State<AuthAppState<R>>,
    ctx: AuthContext,
) -> AuthResult<Json<TotpSetupResponse>> {
    let output = TotpUseCase::new(state.repo.clone(), state.config.clone())
        .setup(ctx.user_id)
        .await?;

    Ok(Json(TotpSetupResponse {
        qr_code: output.qr_code,
        secret: output.secret,
        otpauth_url: output.otpauth_url,
    }))
}

/// POST /api/auth/mfa/totp/verify
pub async fn totp_verify<R: AuthStore>(
    State(state): State<AuthAppState<R>>,
    ctx: AuthContext,
    Json(req): Json<TotpCodeRequest>,
) -> AuthResult<Json<TotpEnabledResponse>> {
    let backup_codes = TotpUseCase::new(state.repo.clone(), state.config.clone())
        .verify(ctx.user_id, &req.code)
        .await?;

    Ok(Json(TotpEnabledResponse { backup_codes }))
}

/// GET /api/auth/mfa/status
pub async fn mfa_status<R: AuthStore>(
    State(state): State<AuthAppState<R>>,
    ctx: AuthContext,
) -> AuthResult<Json<MfaStatus>> {
    let status = TotpUseCase::new(state.repo.clone(), state.config.clone())
        .status(ctx.user_id)
        .await?;

    Ok(Json(status))
}

/// POST /api/auth/mfa/totp/backup-codes/regenerate
pub async fn regenerate_backup_codes<R: AuthStore>(
    State(state): State<AuthAppState<R>>,
    ctx: AuthContext,
    Json(req): Json<TotpCodeRequest>,
) -> AuthResult<Json<TotpEnabledResponse>> {
    let backup_codes = TotpUseCase::new(state.repo.clone(), state.config.clone())
        .regenerate_backup_codes(ctx.user_id, &req.code)
        .await?;

    Ok(Json(TotpEnabledResponse { backup_codes }))
}

/// POST /api/auth/mfa/totp/disable
pub async fn totp_disable<R: AuthStore>(
    State(state): State<AuthAppState<R>>,
    ctx: AuthContext,
    Json(req): Json<TotpCodeRequest>,
) -> AuthResult<StatusCode> {
    TotpUseCase::new(state.repo.clone(), state.config.clone())
        .disable(ctx.user_id, &req.code)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Session administration (ADMIN+)
// ============================================================================

/// GET /api/auth/admin/sessions
pub async fn admin_list_sessions<R: AuthStore>(
    State(state): State<AuthAppState<R>>,
    Query(query): Query<SessionsQuery>,
) -> AuthResult<Json<Vec<SessionResponse>>> {
    let sessions = SessionAdminUseCase::new(state.repo.clone())
        .list_active(query.user_id)
        .await?;

    Ok(Json(sessions.into_iter().map(SessionResponse::from).collect()))
}

/// GET /api/auth/admin/sessions/stats
pub async fn admin_session_stats<R: AuthStore>(
    State(state): State<AuthAppState<R>>,
) -> AuthResult<Json<SessionStats>> {
    Ok(Json(SessionAdminUseCase::new(state.repo.clone()).stats().await?))
}

/// GET /api/auth/admin/users/{id}/sessions
pub async fn admin_user_history<R: AuthStore>(
    State(state): State<AuthAppState<R>>,
    Path(user_id): Path<UserId>,
    Query(query): Query<HistoryQuery>,
) -> AuthResult<Json<Vec<SessionResponse>>> {
    let sessions = SessionAdminUseCase::new(state.repo.clone())
        .user_history(user_id, query.limit.unwrap_or(50))
        .await?;

    Ok(Json(sessions.into_iter().map(SessionResponse::from).collect()))
}

/// POST /api/auth/admin/users/{id}/logout
pub async fn admin_logout_user<R: AuthStore>(
    State(state): State<AuthAppState<R>>,
    ctx: AuthContext,
    Path(user_id): Path<UserId>,
    body: Bytes,
) -> AuthResult<Json<EndedSessionsResponse>> {
    let req: ForceLogoutRequest = optional_json(&body)?;
    let ended_sessions = SessionAdminUseCase::new(state.repo.clone())
        .force_logout_user(ctx.user_id, user_id, req.reason)
        .await?;
    state.permissions.invalidate_user(user_id, None).await;

    Ok(Json(EndedSessionsResponse { ended_sessions }))
}

/// POST /api/auth/admin/sessions/{id}/logout
pub async fn admin_logout_session<R: AuthStore>(
    State(state): State<AuthAppState<R>>,
    ctx: AuthContext,
    Path(session_id): Path<SessionId>,
    body: Bytes,
) -> AuthResult<StatusCode> {
    let req: ForceLogoutRequest = optional_json(&body)?;
    SessionAdminUseCase::new(state.repo.clone())
        .force_logout_session(ctx.user_id, session_id, req.reason)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/auth/admin/users/{id}/mfa/reset
pub async fn admin_reset_mfa<R: AuthStore>(
    State(state): State<AuthAppState<R>>,
    ctx: AuthContext,
    Path(user_id): Path<UserId>,
) -> AuthResult<StatusCode> {
    SessionAdminUseCase::new(state.repo.clone())
        .reset_mfa(ctx.user_id, ctx.role, user_id)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Audit trail (ADMIN+)
// ============================================================================

/// GET /api/auth/admin/audit
pub async fn admin_audit_events<R: AuthStore>(
    State(state): State<AuthAppState<R>>,
    Query(query): Query<AuditQuery>,
) -> AuthResult<Json<AuditPageResponse>> {
    let page = AuditUseCase::new(state.repo.clone())
        .search(query.into_filter()?)
        .await?;

    Ok(Json(page.into()))
}

/// GET /api/auth/admin/audit/stats
pub async fn admin_audit_stats<R: AuthStore>(
    State(state): State<AuthAppState<R>>,
    Query(query): Query<AuditStatsQuery>,
) -> AuthResult<Json<AuditStatistics>> {
    let stats = AuditUseCase::new(state.repo.clone())
        .statistics(query.from, query.to, query.societe_id)
        .await?;

    Ok(Json(stats))
}

// ============================================================================
// Helper Functions
// ============================================================================

fn fingerprint(
    config: &AuthConfig,
    headers: &HeaderMap,
    addr: SocketAddr,
) -> AuthResult<ClientFingerprint> {
    let client_ip = extract_client_ip(headers, Some(addr.ip()), &config.trusted_proxies);
    Ok(extract_fingerprint(headers, client_ip)?)
}

async fn enforce_rate_limit(
    store: &InMemoryRateLimitStore,
    key: &str,
    config: &RateLimitConfig,
) -> AuthResult<()> {
    let result = store.check_and_increment(key, config).await?;
    if !result.allowed {
        return Err(AuthError::RateLimited {
            retry_after_secs: result.retry_after_secs(Utc::now().timestamp_millis()),
        });
    }
    Ok(())
}

/// Parse an optional JSON body; an empty body yields the default value
fn optional_json<T: DeserializeOwned + Default>(body: &Bytes) -> AuthResult<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    Ok(serde_json::from_slice(body).map_app_err(ErrorKind::BadRequest, "Invalid JSON body")?)
}

fn access_cookie(config: &AuthConfig) -> CookieConfig {
    CookieConfig::http_only(&config.access_cookie_name, "/", config.cookie_secure)
        .with_same_site(config.cookie_same_site)
        .with_max_age(config.access_token_ttl_secs())
}

fn refresh_cookie(config: &AuthConfig) -> CookieConfig {
    CookieConfig::http_only(
        &config.refresh_cookie_name,
        &config.refresh_cookie_path,
        config.cookie_secure,
    )
    .with_same_site(config.cookie_same_site)
    .with_max_age(config.refresh_token_ttl_secs())
}

fn token_cookies(config: &AuthConfig, tokens: &TokenPair) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let values = [
        access_cookie(config).set_header(&tokens.access_token),
        refresh_cookie(config).set_header(&tokens.refresh_token),
    ];
    for value in values.into_iter().flatten() {
        headers.append(header::SET_COOKIE, value);
    }
    headers
}

fn clear_token_cookies(config: &AuthConfig) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let values = [
        access_cookie(config).delete_header(),
        refresh_cookie(config).delete_header(),
    ];
    for value in values.into_iter().flatten() {
        headers.append(header::SET_COOKIE, value);
    }
    headers
}
