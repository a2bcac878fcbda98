//! Platform Crate - Technical Infrastructure
//!
//! Shared technical foundations with no knowledge of users or companies:
//! - Cryptographic utilities (SHA-256, random tokens, Base64)
//! - Password hashing (Argon2id, NIST SP 800-63B policy)
//! - HS256 JWT encoding/verification with signing-key rotation
//! - Cookie and client identification helpers
//! - Rate limiting

pub mod client;
pub mod cookie;
pub mod crypto;
pub mod jwt;
pub mod password;
pub mod rate_limit;
