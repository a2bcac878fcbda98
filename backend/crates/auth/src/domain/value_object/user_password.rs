//! User Password Value Objects
//!
//! Domain wrappers over `platform::password` that translate policy and
//! hashing failures into user-facing [`AppError`]s.
//!
//! ```rust,ignore
//! let raw = RawPassword::new("Acier-Inox-316L!".to_string())?;
//! let stored = UserPassword::from_raw(&raw, None)?;
//! assert!(stored.verify(&raw, None));
//! ```

use kernel::error::app_error::{AppError, AppResult};
use platform::password::{
    ClearTextPassword, HashedPassword, PasswordPolicyError, Pepper, dummy_verify,
};
use std::fmt;

// ============================================================================
// Raw Password (User Input)
// ============================================================================

/// Password as typed by the user. Zeroized on drop.
pub struct RawPassword(ClearTextPassword);

impl RawPassword {
    /// A new password being set: the full policy applies.
    pub fn new(raw: String) -> AppResult<Self> {
        ClearTextPassword::new(raw)
            .map(Self)
            .map_err(policy_error)
    }

    /// A password presented for verification: no policy, only normalisation.
    pub fn for_login(raw: String) -> Self {
        Self(ClearTextPassword::for_verification(raw))
    }

    /// Reject a new password that embeds the account's email or acronym.
    pub fn ensure_not_containing(&self, identifiers: &[&str]) -> AppResult<()> {
        self.0.ensure_not_containing(identifiers).map_err(policy_error)
    }

    /// Spend the same work as a real verification (unknown account path).
    pub fn burn_verification(&self) {
        dummy_verify(&self.0);
    }
}

fn policy_error(e: PasswordPolicyError) -> AppError {
    let action = match &e {
        PasswordPolicyError::TooShort { .. } => "Choose a longer password",
        PasswordPolicyError::TooLong { .. } => "Choose a shorter password",
        PasswordPolicyError::EmptyOrWhitespace => "Enter a password",
        PasswordPolicyError::InvalidCharacter => "Remove control characters",
        PasswordPolicyError::CommonPattern => "Choose a less predictable password",
        PasswordPolicyError::ContainsIdentity => "Do not reuse your email or acronym",
    };
    AppError::bad_request(e.to_string()).with_action(action)
}

impl fmt::Debug for RawPassword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RawPassword").field(&"[REDACTED]").finish()
    }
}

// ============================================================================
// User Password (Hashed, for storage)
// ============================================================================

#[derive(Clone, PartialEq, Eq)]
pub struct UserPassword(HashedPassword);

impl UserPassword {
    pub fn from_raw(raw: &RawPassword, pepper: Option<&Pepper>) -> AppResult<Self> {
        raw.0
            .hash(pepper)
            .map(Self)
            .map_err(|e| AppError::internal("Password hashing failed").with_source(e))
    }

    pub fn from_phc_string(phc: impl Into<String>) -> AppResult<Self> {
        HashedPassword::from_phc_string(phc)
            .map(Self)
            .map_err(|e| AppError::internal("Invalid password hash in database").with_source(e))
    }

    pub fn as_phc_string(&self) -> &str {
        self.0.as_phc_string()
    }

    pub fn verify(&self, raw: &RawPassword, pepper: Option<&Pepper>) -> bool {
        self.0.verify(&raw.0, pepper)
    }

    pub fn needs_rehash(&self) -> bool {
        self.0.needs_rehash()
    }
}

impl fmt::Debug for UserPassword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("UserPassword").field(&"[HASH]").finish()
    }
}
