//! Application Layer
//!
//! Use cases and application services.

pub mod audit;
pub mod authenticate;
pub mod change_password;
pub mod config;
pub mod login;
pub mod logout;
pub mod mfa_policy;
pub mod permissions;
pub mod refresh;
pub mod register;
pub mod session_admin;
pub mod societes;
pub mod tokens;
pub mod totp;
pub mod verify_mfa;


// Re-exports
pub use audit::AuditUseCase;
pub use authenticate::{AuthContext, AuthenticateUseCase};
pub use change_password::{ChangePasswordInput, ChangePasswordUseCase};
pub use config::AuthConfig;
pub use login::{LoginInput, LoginOutcome, LoginSuccess, LoginUseCase};
pub use logout::LogoutUseCase;
pub use mfa_policy::{SensitiveAction, requires_mfa_for_action, verify_step_up};
pub use permissions::PermissionService;
pub use refresh::{RefreshOutput, RefreshTokenUseCase};
pub use register::{RegisterInput, RegisterOutput, RegisterUseCase};
pub use session_admin::{CleanupReport, SessionAdminUseCase};
pub use societes::{
    DefaultSocieteUseCase, ListSocietesUseCase, SelectSocieteInput, SelectSocieteOutput,
    SelectSocieteUseCase, SocieteAccess,
};
pub use tokens::{TenantContext, TokenPair};
pub use totp::{MfaStatus, TotpSetupOutput, TotpUseCase};
pub use verify_mfa::{MfaMethod, VerifyMfaInput, VerifyMfaUseCase};
