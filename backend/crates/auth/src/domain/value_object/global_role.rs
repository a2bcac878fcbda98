//! Global (platform-wide) role
//!
//! Ordered by privilege: `Guest < User < Manager < Admin < SuperAdmin`.

use kernel::error::app_error::AppError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GlobalRole {
    Guest,
    #[default]
    User,
    Manager,
    Admin,
    SuperAdmin,
}

impl GlobalRole {
    pub const ALL: [GlobalRole; 5] = [
        GlobalRole::Guest,
        GlobalRole::User,
        GlobalRole::Manager,
        GlobalRole::Admin,
        GlobalRole::SuperAdmin,
    ];

    #[inline]
    pub const fn code(&self) -> &'static str {
        use GlobalRole::*;
        match self {
            Guest => "GUEST",
            User => "USER",
            Manager => "MANAGER",
            Admin => "ADMIN",
            SuperAdmin => "SUPER_ADMIN",
        }
    }

    #[inline]
    pub fn is_admin_or_higher(&self) -> bool {
        *self >= GlobalRole::Admin
    }

    #[inline]
    pub const fn is_super_admin(&self) -> bool {
        matches!(self, GlobalRole::SuperAdmin)
    }

    /// Lenient parse for stored values: unknown codes fall back to `User`.
    pub fn from_code_or_user(code: &str) -> Self {
        code.parse().unwrap_or_else(|_| {
            tracing::warn!(role = %code, "Unknown global role code, treating as USER");
            GlobalRole::User
        })
    }
}

impl FromStr for GlobalRole {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        GlobalRole::ALL
            .into_iter()
            .find(|r| r.code().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| AppError::bad_request(format!("Unknown global role: {}", s)))
    }
}

impl fmt::Display for GlobalRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_role_ordering() {
        assert!(GlobalRole::SuperAdmin > GlobalRole::Admin);
        assert!(GlobalRole::Admin > GlobalRole::Manager);
        assert!(GlobalRole::Manager > GlobalRole::User);
        assert!(GlobalRole::User > GlobalRole::Guest);
        assert!(GlobalRole::Admin.is_admin_or_higher());
        assert!(!GlobalRole::Manager.is_admin_or_higher());
    }

    #[test]
    fn test_global_role_parse() {
        assert_eq!("SUPER_ADMIN".parse::<GlobalRole>().unwrap(), GlobalRole::SuperAdmin);
        assert_eq!("manager".parse::<GlobalRole>().unwrap(), GlobalRole::Manager);
        assert!("ROOT".parse::<GlobalRole>().is_err());
        assert_eq!(GlobalRole::from_code_or_user("ROOT"), GlobalRole::User);
    }

    #[test]
    fn test_global_role_serde() {
        assert_eq!(
            serde_json::to_string(&GlobalRole::SuperAdmin).unwrap(),
            "\"SUPER_ADMIN\""
        );
        for role in GlobalRole::ALL {
            assert_eq!(role.to_string(), role.code());
        }
    }
}
