//! Password Hashing and Verification
//!
//! NIST SP 800-63B style password handling:
//! - Argon2id hashing (PHC string storage)
//! - Optional application-wide pepper
//! - Zeroization of clear text on drop
//! - Dummy verification for unknown accounts, so that a login for a
//!   non-existent user costs the same as a wrong password

use std::fmt;
use std::sync::OnceLock;

use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString};
use rand::rngs::OsRng;
use thiserror::Error;
use unicode_normalization::UnicodeNormalization;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// NIST: SHALL be at least 8
pub const MIN_PASSWORD_LENGTH: usize = 8;

/// NIST: SHOULD permit at least 64
pub const MAX_PASSWORD_LENGTH: usize = 128;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PasswordPolicyError {
    #[error("Password must be at least {min} characters (got {actual})")]
    TooShort { min: usize, actual: usize },

    #[error("Password must be at most {max} characters (got {actual})")]
    TooLong { max: usize, actual: usize },

    #[error("Password cannot be empty or contain only whitespace")]
    EmptyOrWhitespace,

    #[error("Password contains invalid control characters")]
    InvalidCharacter,

    #[error("Password is too common or follows a predictable pattern")]
    CommonPattern,

    #[error("Password must not contain the account email or acronym")]
    ContainsIdentity,
}

#[derive(Debug, Error)]
pub enum PasswordHashError {
    #[error("Password hashing failed: {0}")]
    HashingFailed(String),

    #[error("Invalid password hash format")]
    InvalidHashFormat,
}

// ============================================================================
// Pepper
// ============================================================================

/// Application-wide secret appended to every password before hashing.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Pepper(Vec<u8>);

impl Pepper {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Pepper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Pepper([REDACTED])")
    }
}

// ============================================================================
// Clear Text Password (Zeroized on drop)
// ============================================================================

/// Clear text password, NFKC-normalised and wiped on drop.
///
/// Not `Clone`; `Debug` is redacted.
///
/// ```rust
/// use platform::password::ClearTextPassword;
///
/// let password = ClearTextPassword::new("Tr3sor-Atelier-42".to_string()).unwrap();
/// let hashed = password.hash(None).unwrap();
/// assert!(hashed.verify(&password, None));
/// ```
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct ClearTextPassword(String);

impl ClearTextPassword {
    /// Validate and wrap a password chosen by a user.
    pub fn new(raw: String) -> Result<Self, PasswordPolicyError> {
        let raw = Zeroizing::new(raw);
        let normalized: String = raw.nfkc().collect();
        let candidate = Self(normalized);

        if candidate.0.trim().is_empty() {
            return Err(PasswordPolicyError::EmptyOrWhitespace);
        }

        // NIST counts code points, not bytes
        let char_count = candidate.0.chars().count();
        if char_count < MIN_PASSWORD_LENGTH {
            return Err(PasswordPolicyError::TooShort {
                min: MIN_PASSWORD_LENGTH,
                actual: char_count,
            });
        }
        if char_count > MAX_PASSWORD_LENGTH {
            return Err(PasswordPolicyError::TooLong {
                max: MAX_PASSWORD_LENGTH,
                actual: char_count,
            });
        }

        if candidate
            .0
            .chars()
            .any(|ch| ch.is_control() && ch != '\t' && ch != '\n')
        {
            return Err(PasswordPolicyError::InvalidCharacter);
        }

        if is_common_pattern(&candidate.0) {
            return Err(PasswordPolicyError::CommonPattern);
        }

        Ok(candidate)
    }

    /// Wrap a password presented at login. Only normalisation is applied:
    /// policy is enforced when a password is set, not when it is checked.
    pub fn for_verification(raw: String) -> Self {
        let raw = Zeroizing::new(raw);
        Self(raw.nfkc().collect())
    }

    /// Reject passwords that embed one of the account identifiers
    /// (email local part, acronym). Identifiers shorter than 3 chars are ignored.
    pub fn ensure_not_containing(&self, identifiers: &[&str]) -> Result<(), PasswordPolicyError> {
        let lower = Zeroizing::new(self.0.to_lowercase());
        for identifier in identifiers {
            let ident = identifier.split('@').next().unwrap_or_default().to_lowercase();
            if ident.chars().count() >= 3 && lower.contains(&ident) {
                return Err(PasswordPolicyError::ContainsIdentity);
            }
        }
        Ok(())
    }

    fn peppered(&self, pepper: Option<&Pepper>) -> Zeroizing<Vec<u8>> {
        let mut bytes = self.0.as_bytes().to_vec();
        if let Some(p) = pepper {
            bytes.extend_from_slice(p.as_bytes());
        }
        Zeroizing::new(bytes)
    }

    /// Hash with Argon2id (OWASP defaults: m=19 MiB, t=2, p=1).
    pub fn hash(&self, pepper: Option<&Pepper>) -> Result<HashedPassword, PasswordHashError> {
        let salt = SaltString::generate(OsRng);
        let hash = Argon2::default()
            .hash_password(&self.peppered(pepper), &salt)
            .map_err(|e| PasswordHashError::HashingFailed(e.to_string()))?;

        Ok(HashedPassword {
            hash: hash.to_string(),
        })
    }
}

impl fmt::Debug for ClearTextPassword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ClearTextPassword")
            .field(&"[REDACTED]")
            .finish()
    }
}

// ============================================================================
// Hashed Password (Safe to store)
// ============================================================================

/// Argon2 hash in PHC string format (algorithm, version, params, salt, hash).
#[derive(Clone, PartialEq, Eq)]
pub struct HashedPassword {
    hash: String,
}

impl HashedPassword {
    /// Load a stored PHC string, rejecting anything unparsable.
    pub fn from_phc_string(s: impl Into<String>) -> Result<Self, PasswordHashError> {
        let hash = s.into();
        PasswordHash::new(&hash).map_err(|_| PasswordHashError::InvalidHashFormat)?;
        Ok(Self { hash })
    }

    pub fn as_phc_string(&self) -> &str {
        &self.hash
    }

    /// Constant-time verification (argon2 compares internally).
    pub fn verify(&self, password: &ClearTextPassword, pepper: Option<&Pepper>) -> bool {
        let Ok(parsed) = PasswordHash::new(&self.hash) else {
            return false;
        };
        Argon2::default()
            .verify_password(&password.peppered(pepper), &parsed)
            .is_ok()
    }

    /// True when the stored hash is not Argon2id with the current defaults.
    pub fn needs_rehash(&self) -> bool {
        let Ok(parsed) = PasswordHash::new(&self.hash) else {
            return true;
        };
        if parsed.algorithm != argon2::Algorithm::Argon2id.ident() {
            return true;
        }
        let defaults = argon2::Params::default();
        match argon2::Params::try_from(&parsed) {
            Ok(params) => {
                params.m_cost() < defaults.m_cost()
                    || params.t_cost() < defaults.t_cost()
                    || params.p_cost() < defaults.p_cost()
            }
            Err(_) => true,
        }
    }
}

impl fmt::Debug for HashedPassword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashedPassword")
            .field("hash", &"[HASH]")
            .finish()
    }
}

/// Burn one Argon2 verification against a fixed hash.
///
/// Called when the account does not exist so the response time does not
/// reveal which emails are registered.
pub fn dummy_verify(password: &ClearTextPassword) {
    static DUMMY: OnceLock<Option<HashedPassword>> = OnceLock::new();
    let dummy = DUMMY.get_or_init(|| {
        ClearTextPassword::for_verification("dummy-password-for-timing".to_string())
            .hash(None)
            .ok()
    });
    if let Some(hash) = dummy {
        let _ = hash.verify(password, None);
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn is_common_pattern(password: &str) -> bool {
    let lower = Zeroizing::new(password.to_lowercase());

    // "aaaaaaaa"
    let mut chars = lower.chars();
    if let Some(first) = chars.next() {
        if chars.all(|c| c == first) {
            return true;
        }
    }

    if is_sequential_numbers(&lower) {
        return true;
    }

    const KEYBOARD_PATTERNS: &[&str] = &[
        "qwerty", "azerty", "asdfgh", "qsdfgh", "zxcvbn", "wxcvbn", "qazwsx", "1qaz2wsx",
    ];
    if KEYBOARD_PATTERNS.iter().any(|p| lower.contains(p)) {
        return true;
    }

    const COMMON_PASSWORDS: &[&str] = &[
        "password",
        "password1",
        "password123",
        "motdepasse",
        "motdepasse1",
        "12345678",
        "123456789",
        "1234567890",
        "abcdefgh",
        "letmein1",
        "welcome1",
        "bienvenue",
        "admin123",
        "administrateur",
        "iloveyou",
        "soleil123",
        "trustno1",
    ];
    COMMON_PASSWORDS.contains(&lower.as_str())
}

/// Pure digit runs like "12345678" or "98765432"
fn is_sequential_numbers(s: &str) -> bool {
    if !s.chars().all(|c| c.is_ascii_digit()) {
        return false;
    }
    let digits: Vec<u32> = s.chars().filter_map(|c| c.to_digit(10)).collect();
    if digits.len() < 4 {
        return false;
    }
    let ascending = digits.windows(2).all(|w| w[1] == (w[0] + 1) % 10);
    let descending = digits.windows(2).all(|w| w[0] == (w[1] + 1) % 10);
    ascending || descending
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_length_bounds() {
        assert!(matches!(
            ClearTextPassword::new("short".to_string()),
            Err(PasswordPolicyError::TooShort { min: 8, actual: 5 })
        ));
        assert!(matches!(
            ClearTextPassword::new("ab".repeat(65)),
            Err(PasswordPolicyError::TooLong { .. })
        ));
    }

    #[test]
    fn test_password_whitespace_only() {
        assert!(matches!(
            ClearTextPassword::new("        ".to_string()),
            Err(PasswordPolicyError::EmptyOrWhitespace)
        ));
    }

    #[test]
    fn test_password_control_character() {
        assert!(matches!(
            ClearTextPassword::new("abc\u{0007}defghij".to_string()),
            Err(PasswordPolicyError::InvalidCharacter)
        ));
    }

    #[test]
    fn test_password_common_pattern() {
        for weak in ["password123", "azertyuiop", "12345678", "98765432", "zzzzzzzzzz"] {
            assert!(
                matches!(
                    ClearTextPassword::new(weak.to_string()),
                    Err(PasswordPolicyError::CommonPattern)
                ),
                "{weak} should be rejected"
            );
        }
    }

    #[test]
    fn test_valid_passwords() {
        assert!(ClearTextPassword::new("Acier-Inox-316L!".to_string()).is_ok());
        assert!(ClearTextPassword::new("Sécurité d'abord 2024".to_string()).is_ok());
    }

    #[test]
    fn test_contains_identity() {
        let password = ClearTextPassword::new("jdupont-Atelier9".to_string()).unwrap();
        assert_eq!(
            password.ensure_not_containing(&["jdupont@topsteel.fr"]),
            Err(PasswordPolicyError::ContainsIdentity)
        );
        assert!(password.ensure_not_containing(&["JD"]).is_ok());
    }

    #[test]
    fn test_hash_and_verify_with_pepper() {
        let password = ClearTextPassword::new("Acier-Inox-316L!".to_string()).unwrap();
        let pepper = Pepper::new(b"server-side-pepper".to_vec());
        let hashed = password.hash(Some(&pepper)).unwrap();

        assert!(hashed.verify(&password, Some(&pepper)));
        assert!(!hashed.verify(&password, None));

        let wrong = ClearTextPassword::for_verification("Acier-Inox-304L!".to_string());
        assert!(!hashed.verify(&wrong, Some(&pepper)));
    }

    #[test]
    fn test_phc_string_reload() {
        let password = ClearTextPassword::new("Acier-Inox-316L!".to_string()).unwrap();
        let hashed = password.hash(None).unwrap();

        let restored = HashedPassword::from_phc_string(hashed.as_phc_string()).unwrap();
        assert!(restored.verify(&password, None));
        assert!(!restored.needs_rehash());

        assert!(HashedPassword::from_phc_string("not_a_valid_hash").is_err());
    }

    #[test]
    fn test_debug_redaction() {
        let password = ClearTextPassword::for_verification("secret-value".to_string());
        let debug_output = format!("{:?}", password);
        assert!(debug_output.contains("REDACTED"));
        assert!(!debug_output.contains("secret"));
        assert!(!format!("{:?}", Pepper::new(b"pep".to_vec())).contains("pep\""));
    }
}
