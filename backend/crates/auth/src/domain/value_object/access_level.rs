//! Access level attached to a permission entry
//!
//! Total order: `Blocked < Read < Write < Delete < Admin`.

use kernel::error::app_error::AppError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccessLevel {
    Blocked,
    #[default]
    Read,
    Write,
    Delete,
    Admin,
}

impl AccessLevel {
    pub const fn code(&self) -> &'static str {
        match self {
            AccessLevel::Blocked => "BLOCKED",
            AccessLevel::Read => "READ",
            AccessLevel::Write => "WRITE",
            AccessLevel::Delete => "DELETE",
            AccessLevel::Admin => "ADMIN",
        }
    }

    /// `self` is sufficient for an operation requiring `required`
    #[inline]
    pub fn satisfies(&self, required: AccessLevel) -> bool {
        *self != AccessLevel::Blocked && *self >= required
    }
}

impl FromStr for AccessLevel {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BLOCKED" => Ok(AccessLevel::Blocked),
            "READ" => Ok(AccessLevel::Read),
            "WRITE" => Ok(AccessLevel::Write),
            "DELETE" => Ok(AccessLevel::Delete),
            "ADMIN" => Ok(AccessLevel::Admin),
            other => Err(AppError::bad_request(format!("Unknown access level: {}", other))),
        }
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}
