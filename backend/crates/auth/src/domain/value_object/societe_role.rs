//! Role a user holds inside one société (tenant)

use kernel::error::app_error::AppError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SocieteRole {
    Owner,
    Admin,
    Manager,
    Gestionnaire,
    Facturier,
    Superviseur,
    Expediteur,
    OperateurProduction,
    User,
    Viewer,
    Invite,
}

impl SocieteRole {
    pub const ALL: [SocieteRole; 11] = [
        SocieteRole::Owner,
        SocieteRole::Admin,
        SocieteRole::Manager,
        SocieteRole::Gestionnaire,
        SocieteRole::Facturier,
        SocieteRole::Superviseur,
        SocieteRole::Expediteur,
        SocieteRole::OperateurProduction,
        SocieteRole::User,
        SocieteRole::Viewer,
        SocieteRole::Invite,
    ];

    pub const fn code(&self) -> &'static str {
        use SocieteRole::*;
        match self {
            Owner => "OWNER",
            Admin => "ADMIN",
            Manager => "MANAGER",
            Gestionnaire => "GESTIONNAIRE",
            Facturier => "FACTURIER",
            Superviseur => "SUPERVISEUR",
            Expediteur => "EXPEDITEUR",
            OperateurProduction => "OPERATEUR_PRODUCTION",
            User => "USER",
            Viewer => "VIEWER",
            Invite => "INVITE",
        }
    }
}

impl FromStr for SocieteRole {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SocieteRole::ALL
            .into_iter()
            .find(|r| r.code().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| AppError::bad_request(format!("Unknown societe role: {}", s)))
    }
}

impl fmt::Display for SocieteRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_societe_role_codes_roundtrip_through_parse() {
        for role in SocieteRole::ALL {
            assert_eq!(role.code().parse::<SocieteRole>().unwrap(), role);
        }
        assert!("CHEF".parse::<SocieteRole>().is_err());
    }

    #[test]
    fn test_societe_role_serde_matches_code() {
        assert_eq!(
            serde_json::to_string(&SocieteRole::OperateurProduction).unwrap(),
            "\"OPERATEUR_PRODUCTION\""
        );
    }
}
