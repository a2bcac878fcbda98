//! Entities

pub mod audit_event;
pub mod credentials;
pub mod membership;
pub mod mfa_challenge;
pub mod role_definition;
pub mod session;
pub mod societe;
pub mod user;

pub use audit_event::{AuditEvent, AuditEventType, AuditSeverity};
pub use credentials::Credentials;
pub use membership::Membership;
pub use mfa_challenge::{ChallengeStatus, MfaChallenge};
pub use role_definition::{RoleDefinition, RoleGrant};
pub use session::{SessionStatus, UserSession};
pub use societe::{Site, Societe};
pub use user::User;
