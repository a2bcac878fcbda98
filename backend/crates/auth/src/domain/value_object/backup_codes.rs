//! MFA backup (recovery) codes
//!
//! Ten single-use codes shown once to the user. Only their SHA-256 hex
//! digests are stored; a code is removed from the set when consumed.

use platform::crypto::{constant_time_eq, sha256_hex};
use rand::Rng;
use serde::{Deserialize, Serialize};

pub const BACKUP_CODE_COUNT: usize = 10;
const BACKUP_CODE_LENGTH: usize = 8;
// no 0/O, 1/I/L
const ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";

/// Stored digests of the unused codes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackupCodes(Vec<String>);

impl BackupCodes {
    /// Generate a fresh set. Returns the stored form and the clear codes
    /// (formatted `XXXX-XXXX`) to display once.
    pub fn generate() -> (Self, Vec<String>) {
        let mut rng = rand::rng();
        let clear: Vec<String> = (0..BACKUP_CODE_COUNT)
            .map(|_| {
                let raw: String = (0..BACKUP_CODE_LENGTH)
                    .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
                    .collect();
                format!("{}-{}", &raw[..4], &raw[4..])
            })
            .collect();
        let hashes = clear.iter().map(|c| digest(c)).collect();
        (Self(hashes), clear)
    }

    pub fn from_hashes(hashes: Vec<String>) -> Self {
        Self(hashes)
    }

    pub fn hashes(&self) -> &[String] {
        &self.0
    }

    pub fn remaining(&self) -> usize {
        self.0.len()
    }

    /// Consume `code` if it is one of the unused codes.
    pub fn consume(&mut self, code: &str) -> bool {
        let candidate = digest(code);
        let position = self
            .0
            .iter()
            .position(|h| constant_time_eq(h.as_bytes(), candidate.as_bytes()));
        match position {
            Some(i) => {
                self.0.swap_remove(i);
                true
            }
            None => false,
        }
    }
}

/// Codes are compared case-insensitively, ignoring dashes and spaces.
fn digest(code: &str) -> String {
    let normalized: String = code
        .chars()
        .filter(|c| !matches!(c, '-' | ' '))
        .map(|c| c.to_ascii_uppercase())
        .collect();
    sha256_hex(normalized.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate() {
        let (stored, clear) = BackupCodes::generate();
        assert_eq!(stored.remaining(), BACKUP_CODE_COUNT);
        assert_eq!(clear.len(), BACKUP_CODE_COUNT);
        assert!(clear.iter().all(|c| c.len() == 9 && c.as_bytes()[4] == b'-'));
        // digests only
        assert!(stored.hashes().iter().all(|h| h.len() == 64));
        assert!(!stored.hashes().contains(&clear[0]));
    }

    #[test]
    fn test_consume_once() {
        let (mut stored, clear) = BackupCodes::generate();

        assert!(stored.consume(&clear[3].to_lowercase().replace('-', "")));
        assert_eq!(stored.remaining(), BACKUP_CODE_COUNT - 1);
        assert!(!stored.consume(&clear[3]));
        assert!(!stored.consume("AAAA-AAAA"));
    }
}
