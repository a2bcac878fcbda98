//! Presentation Layer
//!
//! HTTP handlers, DTOs, router, and middleware.

pub mod dto;
pub mod handlers;
pub mod middleware;
pub mod router;

pub use handlers::AuthAppState;
pub use middleware::{
    PermissionGuard, require_auth, require_global_role, require_permission, require_tenant,
};
pub use router::{auth_router, auth_router_generic, auth_routes};
