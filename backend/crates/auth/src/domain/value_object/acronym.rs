//! Acronym Value Object
//!
//! Short upper-case trigram-style login handle ("JDU", "ADMIN1").
//! Login accepts either an email or an acronym.

use kernel::error::app_error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const ACRONYM_MIN_LENGTH: usize = 2;
pub const ACRONYM_MAX_LENGTH: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Acronym(String);

impl Acronym {
    pub fn new(acronym: impl AsRef<str>) -> AppResult<Self> {
        let acronym = acronym.as_ref().trim().to_ascii_uppercase();
        let len = acronym.chars().count();

        if !(ACRONYM_MIN_LENGTH..=ACRONYM_MAX_LENGTH).contains(&len) {
            return Err(AppError::bad_request(format!(
                "Acronym must be {}-{} characters",
                ACRONYM_MIN_LENGTH, ACRONYM_MAX_LENGTH
            )));
        }
        if !acronym.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(AppError::bad_request(
                "Acronym may only contain letters and digits",
            ));
        }

        Ok(Self(acronym))
    }

    pub fn from_db(acronym: impl Into<String>) -> Self {
        Self(acronym.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Acronym {
    type Error = AppError;

    fn try_from(value: String) -> AppResult<Self> {
        Acronym::new(value)
    }
}

impl From<Acronym> for String {
    fn from(acronym: Acronym) -> Self {
        acronym.0
    }
}

impl fmt::Display for Acronym {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a user typed in the login field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginIdentifier {
    Email(super::email::Email),
    Acronym(Acronym),
}

impl LoginIdentifier {
    /// Anything containing `@` is treated as an email.
    pub fn parse(input: &str) -> AppResult<Self> {
        if input.contains('@') {
            super::email::Email::new(input).map(Self::Email)
        } else {
            Acronym::new(input).map(Self::Acronym)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acronym_uppercased() {
        assert_eq!(Acronym::new(" jdu ").unwrap().as_str(), "JDU");
    }

    #[test]
    fn test_acronym_bounds() {
        assert!(Acronym::new("A").is_err());
        assert!(Acronym::new("AB").is_ok());
        assert!(Acronym::new("ABCDEFGHIJ").is_ok());
        assert!(Acronym::new("ABCDEFGHIJK").is_err());
        assert!(Acronym::new("J-DU").is_err());
    }

    #[test]
    fn test_login_identifier() {
        assert!(matches!(
            LoginIdentifier::parse("jdu@topsteel.fr").unwrap(),
            LoginIdentifier::Email(_)
        ));
        assert_eq!(
            LoginIdentifier::parse("jdu").unwrap(),
            LoginIdentifier::Acronym(Acronym::new("JDU").unwrap())
        );
        assert!(LoginIdentifier::parse("x").is_err());
    }
}
