//! Domain Layer
//!
//! Contains entities, value objects, repository traits and the permission
//! calculator.

pub mod entity;
pub mod repository;
pub mod service;
pub mod value_object;

// Re-exports
pub use entity::{Credentials, Membership, MfaChallenge, Societe, User, UserSession};
pub use repository::{
    AuthStore, CredentialsRepository, MembershipRepository, MfaChallengeRepository,
    RoleDefinitionRepository, SessionRepository, SessionStats, SocieteRepository, UserRepository,
};
pub use service::{EffectivePermissions, PermissionCalculator};
