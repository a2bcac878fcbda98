//! Infrastructure Layer
//!
//! Database implementations and the in-process permission cache.

pub mod memory;
pub mod permission_cache;
pub mod postgres;

pub use memory::InMemoryAuthRepository;
pub use permission_cache::PermissionCache;
pub use postgres::PgAuthRepository;
