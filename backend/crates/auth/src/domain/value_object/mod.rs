//! Value Object Module

pub mod access_level;
pub mod acronym;
pub mod backup_codes;
pub mod email;
pub mod global_role;
pub mod permission_key;
pub mod societe_role;
pub mod totp_secret;
pub mod user_password;

pub use access_level::AccessLevel;
pub use acronym::{Acronym, LoginIdentifier};
pub use backup_codes::BackupCodes;
pub use email::Email;
pub use global_role::GlobalRole;
pub use permission_key::PermissionKey;
pub use societe_role::SocieteRole;
pub use totp_secret::TotpSecret;
pub use user_password::{RawPassword, UserPassword};
