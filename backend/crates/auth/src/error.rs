//! Auth Error Types
//!
//! This module provides auth-specific error variants that integrate
//! with the unified `kernel::error::AppError` system.

use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use kernel::error::{app_error::AppError, kind::ErrorKind};
use platform::jwt::JwtError;
use thiserror::Error;

/// Auth-specific result type alias
pub type AuthResult<T> = Result<T, AuthError>;

/// Auth-specific error variants
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("User not found")]
    UserNotFound,

    #[error("Email is already registered")]
    EmailTaken,

    #[error("Acronym is already taken")]
    AcronymTaken,

    /// Wrong password or unknown login; the message never says which
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Account is temporarily locked")]
    AccountLocked { until: DateTime<Utc> },

    #[error("Account is disabled")]
    AccountDisabled,

    // ------------------------------------------------------------------------
    // Tokens and sessions
    // ------------------------------------------------------------------------
    #[error("Authentication required")]
    TokenMissing,

    #[error("Token has expired")]
    TokenExpired,

    #[error("Invalid token: {0}")]
    TokenInvalid(JwtError),

    #[error("Session not found or expired")]
    SessionInvalid,

    /// A refresh token that was already rotated out was presented again
    #[error("Refresh token reuse detected")]
    RefreshTokenReused,

    // ------------------------------------------------------------------------
    // MFA
    // ------------------------------------------------------------------------
    #[error("Multi-factor authentication required")]
    MfaRequired,

    #[error("Invalid verification code")]
    InvalidMfaCode,

    #[error("MFA challenge is invalid or expired")]
    MfaChallengeInvalid,

    #[error("Multi-factor authentication is not set up")]
    MfaNotSetup,

    #[error("Multi-factor authentication is already enabled")]
    MfaAlreadyEnabled,

    #[error("Administrators cannot disable multi-factor authentication")]
    MfaDisableForbidden,

    // ------------------------------------------------------------------------
    // Tenancy and authorization
    // ------------------------------------------------------------------------
    #[error("Company not found")]
    SocieteNotFound,

    #[error("No access to this company")]
    NoSocieteAccess,

    #[error("No access to this site")]
    SiteAccessDenied,

    #[error("A company must be selected")]
    TenantRequired,

    #[error("Insufficient role")]
    InsufficientRole,

    #[error("Missing permission: {0}")]
    PermissionDenied(String),

    #[error("Too many requests")]
    RateLimited { retry_after_secs: u64 },

    // ------------------------------------------------------------------------
    // Input and infrastructure
    // ------------------------------------------------------------------------
    #[error("Missing required header: {0}")]
    MissingHeader(String),

    #[error("Password validation failed: {0}")]
    PasswordValidation(String),

    /// Domain validation or infrastructure error already classified
    #[error(transparent)]
    App(AppError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.kind().status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// Get the ErrorKind for this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            AuthError::UserNotFound | AuthError::SocieteNotFound => ErrorKind::NotFound,
            AuthError::EmailTaken | AuthError::AcronymTaken | AuthError::MfaAlreadyEnabled => {
                ErrorKind::Conflict
            }
            AuthError::InvalidCredentials
            | AuthError::TokenMissing
            | AuthError::TokenExpired
            | AuthError::TokenInvalid(_)
            | AuthError::SessionInvalid
            | AuthError::RefreshTokenReused
            | AuthError::InvalidMfaCode
            | AuthError::MfaChallengeInvalid => ErrorKind::Unauthorized,
            AuthError::AccountLocked { .. } => ErrorKind::Locked,
            AuthError::AccountDisabled
            | AuthError::MfaDisableForbidden
            | AuthError::NoSocieteAccess
            | AuthError::SiteAccessDenied
            | AuthError::TenantRequired
            | AuthError::InsufficientRole
            | AuthError::PermissionDenied(_) => ErrorKind::Forbidden,
            AuthError::MfaRequired => ErrorKind::PreconditionRequired,
            AuthError::MfaNotSetup => ErrorKind::PreconditionFailed,
            AuthError::RateLimited { .. } => ErrorKind::TooManyRequests,
            AuthError::MissingHeader(_) | AuthError::PasswordValidation(_) => ErrorKind::BadRequest,
            AuthError::App(e) => e.kind(),
            AuthError::Database(_) | AuthError::Internal(_) => ErrorKind::InternalServerError,
        }
    }

    /// Convert to AppError. Server-side details stay in the logs.
    pub fn to_app_error(&self) -> AppError {
        let err = match self {
            AuthError::Database(_) | AuthError::Internal(_) => {
                AppError::new(self.kind(), "Internal server error")
            }
            AuthError::App(e) if e.is_server_error() => AppError::new(e.kind(), "Service unavailable"),
            AuthError::App(e) => {
                let err = AppError::new(e.kind(), e.message().to_string());
                match e.action() {
                    Some(action) => err.with_action(action.to_string()),
                    None => err,
                }
            }
            _ => AppError::new(self.kind(), self.to_string()),
        };

        match self {
            AuthError::TokenExpired => err.with_action("Refresh the session"),
            AuthError::MfaRequired => err.with_action("Complete multi-factor verification"),
            AuthError::AccountLocked { until } => {
                err.with_action(format!("Retry after {}", until.to_rfc3339()))
            }
            _ => err,
        }
    }

    /// Log the error with appropriate level
    fn log(&self) {
        match self {
            AuthError::Database(e) => {
                tracing::error!(error = %e, "Auth database error");
            }
            AuthError::Internal(msg) => {
                tracing::error!(message = %msg, "Auth internal error");
            }
            AuthError::App(e) if e.is_server_error() => {
                tracing::error!(error = ?e, "Auth dependency error");
            }
            AuthError::InvalidCredentials => {
                tracing::warn!("Invalid login attempt");
            }
            AuthError::AccountLocked { until } => {
                tracing::warn!(locked_until = %until, "Login attempt on locked account");
            }
            AuthError::RefreshTokenReused => {
                tracing::warn!("Refresh token reuse rejected");
            }
            AuthError::RateLimited { retry_after_secs } => {
                tracing::warn!(retry_after_secs, "Rate limit exceeded");
            }
            _ => {
                tracing::debug!(error = %self, "Auth error");
            }
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        self.log();

        let mut response = self.to_app_error().into_response();
        let headers = response.headers_mut();
        match &self {
            AuthError::RateLimited { retry_after_secs } => {
                headers.insert(header::RETRY_AFTER, HeaderValue::from(*retry_after_secs));
            }
            _ if self.kind() == ErrorKind::Unauthorized => {
                headers.insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
            }
            _ => {}
        }
        response
    }
}

impl From<AppError> for AuthError {
    fn from(err: AppError) -> Self {
        AuthError::App(err)
    }
}

impl From<JwtError> for AuthError {
    fn from(err: JwtError) -> Self {
        match err {
            JwtError::Expired => AuthError::TokenExpired,
            JwtError::Serialization(_) | JwtError::WeakSecret { .. } => {
                AuthError::Internal(err.to_string())
            }
            other => AuthError::TokenInvalid(other),
        }
    }
}

impl From<platform::client::FingerprintError> for AuthError {
    fn from(err: platform::client::FingerprintError) -> Self {
        match err {
            platform::client::FingerprintError::MissingHeader(header) => {
                AuthError::MissingHeader(header.to_string())
            }
        }
    }
}

impl From<platform::rate_limit::RateLimitError> for AuthError {
    fn from(err: platform::rate_limit::RateLimitError) -> Self {
        AuthError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(AuthError::InvalidCredentials.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            AuthError::AccountLocked { until: Utc::now() }.status_code(),
            StatusCode::LOCKED
        );
        assert_eq!(AuthError::MfaRequired.status_code(), StatusCode::PRECONDITION_REQUIRED);
        assert_eq!(AuthError::NoSocieteAccess.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(
            AuthError::RateLimited { retry_after_secs: 3 }.status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            AuthError::Internal("boom".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_app_error_keeps_its_kind() {
        let err: AuthError = AppError::bad_request("Invalid email format").into();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.to_app_error().message(), "Invalid email format");
    }

    #[test]
    fn test_internal_details_are_not_rendered() {
        let err = AuthError::Internal("pool exhausted at 10.0.0.3".into());
        assert_eq!(err.to_app_error().message(), "Internal server error");
    }

    #[test]
    fn test_jwt_expired_maps_to_token_expired() {
        assert!(matches!(AuthError::from(JwtError::Expired), AuthError::TokenExpired));
        assert!(matches!(
            AuthError::from(JwtError::InvalidSignature),
            AuthError::TokenInvalid(JwtError::InvalidSignature)
        ));
    }

    #[test]
    fn test_unauthorized_response_has_bearer_challenge() {
        let response = AuthError::TokenMissing.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()[header::WWW_AUTHENTICATE], "Bearer");

        let response = AuthError::RateLimited { retry_after_secs: 42 }.into_response();
        assert_eq!(response.headers()[header::RETRY_AFTER], "42");
    }
}
