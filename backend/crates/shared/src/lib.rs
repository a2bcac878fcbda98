//! Shared Kernel - Domain-crossing minimal core
//!
//! This crate contains the "smallest core" of vocabulary used by every
//! other crate of the ERP backend:
//! - Common error types and result aliases
//! - Typed identifiers for users, companies (societes), sites and sessions
//!
//! Only things with a consistent meaning across all domains belong here.

pub mod error {
    pub mod app_error;
    pub mod conversions;
    pub mod kind;
}
pub mod id;

pub use error::app_error::{AppError, AppResult};
pub use error::kind::ErrorKind;
