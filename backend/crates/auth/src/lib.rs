//! Auth (Authentication / Authorization) Backend Module
//!
//! Clean Architecture structure:
//! - `domain/` - Entities, value objects, permission calculation, repository traits
//! - `application/` - Use cases and application services
//! - `infra/` - PostgreSQL and in-memory stores, permission cache
//! - `presentation/` - HTTP handlers, DTOs, middleware, router
//!
//! ## Features
//! - Login by email or acronym, with optional TOTP second factor
//! - JWT access / refresh tokens bound to server-side sessions
//! - Multi-société tenancy: a user selects a société (and site) after login
//! - Role-based access: global roles plus per-société roles with
//!   customisable permission grants
//! - Session administration (listing, forced logout, statistics)
//!
//! ## Security Model
//! - Passwords hashed with Argon2id, optional server-side pepper
//! - Refresh tokens rotate on every use; a replayed token revokes the session
//! - Automatic lockout after repeated failed logins
//! - Admin+ roles cannot turn their second factor off

pub mod application;
pub mod domain;
pub mod error;
pub mod infra;
pub mod presentation;

// Re-exports for convenience
pub use application::AuthContext;
pub use application::config::AuthConfig;
pub use error::{AuthError, AuthResult};
pub use infra::{InMemoryAuthRepository, PgAuthRepository};
pub use presentation::router::{auth_router, auth_router_generic};

// Re-export kernel error types for unified error handling
pub use kernel::error::{
    app_error::{AppError, AppResult},
    kind::ErrorKind,
};

// Convenience re-exports
pub mod config {
    pub use crate::application::config::*;
}

pub mod models {
    pub use crate::domain::entity::*;
    pub use crate::domain::value_object::*;
    pub use crate::presentation::dto::*;
}

pub mod store {
    pub use crate::domain::repository::AuthStore;
    pub use crate::infra::memory::InMemoryAuthRepository;
    pub use crate::infra::postgres::PgAuthRepository;
}

pub mod middleware {
    pub use crate::presentation::middleware::*;
}
