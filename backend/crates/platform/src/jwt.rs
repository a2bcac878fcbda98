//! HS256 JSON Web Tokens with key rotation
//!
//! Thin layer over `jsonwebtoken`. Every token names the key that signed it
//! in the `kid` header so that a [`KeyRing`] can keep accepting tokens
//! signed by a retired key for a grace period after rotation.
//!
//! Only the registered time claims (`exp`, `nbf`) are validated here;
//! everything else in the payload is the caller's business.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind as JwtErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;
use zeroize::Zeroizing;

use crate::crypto::{from_base64, random_bytes, random_token};

/// The only accepted `alg`
pub const ALGORITHM: Algorithm = Algorithm::HS256;

/// Minimum HMAC secret length in bytes (RFC 7518 §3.2)
pub const MIN_SECRET_LENGTH: usize = 32;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JwtError {
    #[error("Token is malformed")]
    Malformed,

    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Token was signed with an unknown or expired key: {0}")]
    UnknownKey(String),

    #[error("Token signature is invalid")]
    InvalidSignature,

    #[error("Token has expired")]
    Expired,

    #[error("Token is not valid yet")]
    NotYetValid,

    #[error("Token serialization failed: {0}")]
    Serialization(String),

    #[error("Signing secret must be at least {min} bytes (got {actual})")]
    WeakSecret { min: usize, actual: usize },
}

// ============================================================================
// Keys
// ============================================================================

/// An HMAC secret with its key id. The secret is wiped on drop.
#[derive(Clone)]
pub struct SigningKey {
    kid: String,
    secret: Zeroizing<Vec<u8>>,
}

impl SigningKey {
    pub fn new(kid: impl Into<String>, secret: Vec<u8>) -> Result<Self, JwtError> {
        if secret.len() < MIN_SECRET_LENGTH {
            return Err(JwtError::WeakSecret {
                min: MIN_SECRET_LENGTH,
                actual: secret.len(),
            });
        }
        Ok(Self {
            kid: kid.into(),
            secret: Zeroizing::new(secret),
        })
    }

    /// Decode a standard base64 secret (the format used in env variables)
    pub fn from_base64(kid: impl Into<String>, encoded: &str) -> Result<Self, JwtError> {
        let secret = from_base64(encoded.trim()).map_err(|_| JwtError::Malformed)?;
        Self::new(kid, secret)
    }

    /// Fresh random 512-bit key with a random kid
    pub fn generate() -> Self {
        Self {
            kid: random_token(9),
            secret: Zeroizing::new(random_bytes(64)),
        }
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    fn encoding_key(&self) -> EncodingKey {
        EncodingKey::from_secret(&self.secret)
    }

    fn decoding_key(&self) -> DecodingKey {
        DecodingKey::from_secret(&self.secret)
    }
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Clone)]
struct RetiredKey {
    key: SigningKey,
    retired_at: DateTime<Utc>,
}

/// Active signing key plus retired keys still accepted for verification.
#[derive(Debug, Clone)]
pub struct KeyRing {
    active: SigningKey,
    retired: Vec<RetiredKey>,
    grace_period: Duration,
    leeway: Duration,
}

impl KeyRing {
    pub fn new(active: SigningKey, grace_period: Duration) -> Self {
        Self {
            active,
            retired: Vec::new(),
            grace_period,
            leeway: Duration::zero(),
        }
    }

    /// Clock skew tolerated on `exp` and `nbf`
    pub fn with_leeway(mut self, leeway: Duration) -> Self {
        self.leeway = leeway;
        self
    }

    pub fn active(&self) -> &SigningKey {
        &self.active
    }

    pub fn leeway(&self) -> Duration {
        self.leeway
    }

    /// Make `new_key` the signing key. The previous key keeps verifying
    /// tokens until `rotated_at + grace_period`.
    pub fn rotate(&mut self, new_key: SigningKey, rotated_at: DateTime<Utc>) {
        let previous = std::mem::replace(&mut self.active, new_key);
        tracing::info!(
            retired_kid = %previous.kid(),
            active_kid = %self.active.kid(),
            rotated_at = %rotated_at,
            grace_hours = self.grace_period.num_hours(),
            "JWT signing key rotated"
        );
        self.retired.push(RetiredKey {
            key: previous,
            retired_at: rotated_at,
        });
    }

    fn find(&self, kid: &str, now: DateTime<Utc>) -> Option<&SigningKey> {
        if self.active.kid() == kid {
            return Some(&self.active);
        }
        self.retired
            .iter()
            .find(|r| r.key.kid() == kid && r.retired_at + self.grace_period > now)
            .map(|r| &r.key)
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(ALGORITHM);
        validation.leeway = u64::try_from(self.leeway.num_seconds()).unwrap_or(0);
        validation.validate_nbf = true;
        validation
    }

    pub fn encode<C: Serialize>(&self, claims: &C) -> Result<String, JwtError> {
        encode(claims, &self.active)
    }

    pub fn decode<C: DeserializeOwned>(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<C, JwtError> {
        decode(token, self, now)
    }
}

// ============================================================================
// Codec
// ============================================================================

/// Sign `claims` with `key`. The claims must carry a numeric `exp`
/// for the token to be decodable later.
pub fn encode<C: Serialize>(claims: &C, key: &SigningKey) -> Result<String, JwtError> {
    let mut header = Header::new(ALGORITHM);
    header.kid = Some(key.kid().to_string());
    jsonwebtoken::encode(&header, claims, &key.encoding_key())
        .map_err(|e| JwtError::Serialization(e.to_string()))
}

/// Verify `token` against `keyring` and deserialize its claims.
///
/// The key is picked from the `kid` header; `now` decides whether a retired
/// key is still inside its grace window. `exp` and `nbf` are checked by
/// `jsonwebtoken` against the system clock with the ring's leeway.
pub fn decode<C: DeserializeOwned>(
    token: &str,
    keyring: &KeyRing,
    now: DateTime<Utc>,
) -> Result<C, JwtError> {
    let header = jsonwebtoken::decode_header(token).map_err(|_| JwtError::Malformed)?;
    if header.alg != ALGORITHM {
        return Err(JwtError::UnsupportedAlgorithm(format!("{:?}", header.alg)));
    }

    let kid = header.kid.unwrap_or_default();
    let key = keyring
        .find(&kid, now)
        .ok_or_else(|| JwtError::UnknownKey(kid.clone()))?;

    jsonwebtoken::decode::<C>(token, &key.decoding_key(), &keyring.validation())
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            JwtErrorKind::InvalidSignature => JwtError::InvalidSignature,
            JwtErrorKind::ExpiredSignature => JwtError::Expired,
            JwtErrorKind::ImmatureSignature => JwtError::NotYetValid,
            JwtErrorKind::InvalidAlgorithm => {
                JwtError::UnsupportedAlgorithm(format!("{:?}", header.alg))
            }
            _ => JwtError::Malformed,
        })
}

#[cfg(test)]
mod tests {
    use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Claims {
        sub: String,
        exp: i64,
        iat: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        nbf: Option<i64>,
    }

    fn key(kid: &str, byte: u8) -> SigningKey {
        SigningKey::new(kid, vec![byte; 32]).unwrap()
    }

    fn claims_at(now: DateTime<Utc>, ttl_secs: i64) -> Claims {
        Claims {
            sub: "user-1".to_string(),
            exp: now.timestamp() + ttl_secs,
            iat: now.timestamp(),
            nbf: None,
        }
    }

    #[test]
    fn test_encode_decode() {
        let now = Utc::now();
        let ring = KeyRing::new(key("k1", 1), Duration::hours(4));
        let token = ring.encode(&claims_at(now, 60)).unwrap();
        assert_eq!(token.split('.').count(), 3);

        let header = jsonwebtoken::decode_header(&token).unwrap();
        assert_eq!(header.kid.as_deref(), Some("k1"));

        let decoded: Claims = ring.decode(&token, now).unwrap();
        assert_eq!(decoded, claims_at(now, 60));
    }

    #[test]
    fn test_weak_secret_rejected() {
        let err = SigningKey::new("k", vec![0u8; 16]).unwrap_err();
        assert_eq!(err, JwtError::WeakSecret { min: 32, actual: 16 });
    }

    #[test]
    fn test_expired_token() {
        let now = Utc::now();
        let ring = KeyRing::new(key("k1", 1), Duration::hours(4));
        // expired 30 seconds ago
        let token = ring.encode(&claims_at(now - Duration::seconds(90), 60)).unwrap();
        assert_eq!(
            ring.decode::<Claims>(&token, now).unwrap_err(),
            JwtError::Expired
        );

        let lenient = ring.clone().with_leeway(Duration::seconds(120));
        assert_eq!(lenient.leeway(), Duration::seconds(120));
        assert!(lenient.decode::<Claims>(&token, now).is_ok());
    }

    #[test]
    fn test_not_before_enforced() {
        let now = Utc::now();
        let ring = KeyRing::new(key("k1", 1), Duration::hours(4));
        let token = ring
            .encode(&Claims {
                nbf: Some(now.timestamp() + 600),
                ..claims_at(now, 3600)
            })
            .unwrap();
        assert_eq!(
            ring.decode::<Claims>(&token, now).unwrap_err(),
            JwtError::NotYetValid
        );
    }

    #[test]
    fn test_tampered_payload() {
        let now = Utc::now();
        let ring = KeyRing::new(key("k1", 1), Duration::hours(4));
        let token = ring.encode(&claims_at(now, 60)).unwrap();

        let parts: Vec<&str> = token.split('.').collect();
        let forged_payload = URL_SAFE_NO_PAD.encode(
            serde_json::to_vec(&Claims {
                sub: "admin".to_string(),
                ..claims_at(now, 60)
            })
            .unwrap(),
        );
        let forged = format!("{}.{}.{}", parts[0], forged_payload, parts[2]);
        assert_eq!(
            ring.decode::<Claims>(&forged, now).unwrap_err(),
            JwtError::InvalidSignature
        );
    }

    #[test]
    fn test_wrong_algorithm() {
        let now = Utc::now();
        let ring = KeyRing::new(key("k1", 1), Duration::hours(4));

        // same secret and kid, different HMAC variant
        let mut header = Header::new(Algorithm::HS512);
        header.kid = Some("k1".to_string());
        let hs512 = jsonwebtoken::encode(
            &header,
            &claims_at(now, 60),
            &EncodingKey::from_secret(&[1u8; 32]),
        )
        .unwrap();
        assert!(matches!(
            ring.decode::<Claims>(&hs512, now),
            Err(JwtError::UnsupportedAlgorithm(alg)) if alg == "HS512"
        ));

        // `alg: none` is not even a parseable header
        let token = ring.encode(&claims_at(now, 60)).unwrap();
        let parts: Vec<&str> = token.split('.').collect();
        let none_header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT","kid":"k1"}"#);
        let forged = format!("{}.{}.", none_header, parts[1]);
        assert_eq!(
            ring.decode::<Claims>(&forged, now).unwrap_err(),
            JwtError::Malformed
        );
    }

    #[test]
    fn test_malformed() {
        let ring = KeyRing::new(key("k1", 1), Duration::hours(4));
        for token in ["", "a.b", "a.b.c.d", "!!!.???.***"] {
            assert_eq!(
                ring.decode::<Claims>(token, Utc::now()).unwrap_err(),
                JwtError::Malformed
            );
        }
    }

    #[test]
    fn test_rotation_grace_period() {
        let now = Utc::now();
        let mut ring = KeyRing::new(key("old", 1), Duration::hours(4));
        let old_token = ring.encode(&claims_at(now, 86_400)).unwrap();

        ring.rotate(key("new", 2), now);
        assert_eq!(ring.active().kid(), "new");
        let new_token = ring.encode(&claims_at(now, 86_400)).unwrap();

        // still accepted within the grace period
        let within = now + Duration::hours(3);
        assert!(ring.decode::<Claims>(&old_token, within).is_ok());

        // rejected after it, even though the token itself is unexpired
        let after = now + Duration::hours(5);
        assert!(matches!(
            ring.decode::<Claims>(&old_token, after),
            Err(JwtError::UnknownKey(kid)) if kid == "old"
        ));
        assert!(ring.decode::<Claims>(&new_token, after).is_ok());
    }

    #[test]
    fn test_token_from_other_ring_rejected() {
        let now = Utc::now();
        let access = KeyRing::new(key("shared-kid", 1), Duration::hours(4));
        let refresh = KeyRing::new(key("shared-kid", 2), Duration::hours(4));
        let token = access.encode(&claims_at(now, 60)).unwrap();
        assert_eq!(
            refresh.decode::<Claims>(&token, now).unwrap_err(),
            JwtError::InvalidSignature
        );
    }
}
