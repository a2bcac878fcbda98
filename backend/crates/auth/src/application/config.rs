//! Application Configuration
//!
//! Configuration for the Auth application layer.

use std::env;
use std::net::IpAddr;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use platform::crypto::{from_base64, sha256_hex};
use platform::jwt::{JwtError, KeyRing, SigningKey};
use platform::password::Pepper;
use platform::rate_limit::RateLimitConfig;
use thiserror::Error;

/// Re-export SameSite from platform
pub use platform::cookie::SameSite;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{var} is invalid: {reason}")]
    Invalid { var: &'static str, reason: String },

    #[error("{var}: {source}")]
    Key {
        var: &'static str,
        #[source]
        source: JwtError,
    },
}

/// Auth application configuration
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Access token keys (`JWT_SECRET`)
    pub access_keys: KeyRing,
    /// Refresh token keys (`JWT_REFRESH_SECRET`), never shared with access tokens
    pub refresh_keys: KeyRing,
    pub access_token_ttl: Duration,
    pub refresh_token_ttl: Duration,
    pub access_cookie_name: String,
    pub refresh_cookie_name: String,
    /// Path the refresh cookie is scoped to
    pub refresh_cookie_path: String,
    /// Whether to require Secure cookie
    pub cookie_secure: bool,
    /// SameSite policy
    pub cookie_same_site: SameSite,
    /// Password pepper (optional, application-wide secret)
    pub password_pepper: Option<Pepper>,
    /// Issuer shown by authenticator apps
    pub totp_issuer: String,
    /// Lets SUPER_ADMIN accounts skip the second factor
    pub mfa_emergency_bypass: bool,
    /// Password attempts per login identifier, cleared by a successful login
    pub login_rate_limit: RateLimitConfig,
    /// Password attempts per client IP, never cleared
    pub login_ip_rate_limit: RateLimitConfig,
    /// Second-factor attempts per client IP
    pub mfa_rate_limit: RateLimitConfig,
    /// Reverse proxies allowed to set `X-Forwarded-For` / `X-Real-IP`
    pub trusted_proxies: Vec<IpAddr>,
    pub permission_cache_ttl: StdDuration,
    /// Audit events older than this are purged by the cleanup job
    pub audit_retention: Duration,
}

impl AuthConfig {
    pub const DEFAULT_ACCESS_TTL_SECS: i64 = 24 * 3600;
    pub const DEFAULT_REFRESH_TTL_SECS: i64 = 7 * 24 * 3600;
    pub const DEFAULT_GRACE_PERIOD_HOURS: i64 = 4;
    pub const DEFAULT_LEEWAY_SECS: i64 = 0;
    pub const DEFAULT_AUDIT_RETENTION_DAYS: i64 = 90;

    /// Production defaults around the given key rings
    pub fn new(access_keys: KeyRing, refresh_keys: KeyRing) -> Self {
        Self {
            access_keys,
            refresh_keys,
            access_token_ttl: Duration::seconds(Self::DEFAULT_ACCESS_TTL_SECS),
            refresh_token_ttl: Duration::seconds(Self::DEFAULT_REFRESH_TTL_SECS),
            access_cookie_name: "access_token".to_string(),
            refresh_cookie_name: "refresh_token".to_string(),
            refresh_cookie_path: "/api/auth".to_string(),
            cookie_secure: true,
            cookie_same_site: SameSite::Lax,
            password_pepper: None,
            totp_issuer: "TopSteel ERP".to_string(),
            mfa_emergency_bypass: false,
            login_rate_limit: RateLimitConfig::new(10, 15 * 60),
            login_ip_rate_limit: RateLimitConfig::new(50, 15 * 60),
            mfa_rate_limit: RateLimitConfig::new(10, 5 * 60),
            trusted_proxies: Vec::new(),
            permission_cache_ttl: StdDuration::from_secs(300),
            audit_retention: Duration::days(Self::DEFAULT_AUDIT_RETENTION_DAYS),
        }
    }

    /// Create config with random signing keys
    pub fn with_random_secrets() -> Self {
        let grace = Duration::hours(Self::DEFAULT_GRACE_PERIOD_HOURS);
        Self::new(
            KeyRing::new(SigningKey::generate(), grace),
            KeyRing::new(SigningKey::generate(), grace),
        )
    }

    /// Create config for development (random secrets, insecure cookie)
    pub fn development() -> Self {
        Self {
            cookie_secure: false,
            ..Self::with_random_secrets()
        }
    }

    /// Read the configuration from the process environment.
    ///
    /// Debug builds fall back to random secrets when `JWT_SECRET` /
    /// `JWT_REFRESH_SECRET` are unset; release builds refuse to start.
    /// A `*_PREVIOUS` secret requires `JWT_ROTATED_AT` (RFC 3339), the
    /// instant the grace period is counted from.
    pub fn from_env() -> Result<Self, ConfigError> {
        let grace = Duration::hours(parse_var(
            "JWT_GRACE_PERIOD_HOURS",
            Self::DEFAULT_GRACE_PERIOD_HOURS,
        )?);
        let leeway = Duration::seconds(parse_var("JWT_LEEWAY_SECS", Self::DEFAULT_LEEWAY_SECS)?);
        if leeway < Duration::zero() {
            return Err(ConfigError::Invalid {
                var: "JWT_LEEWAY_SECS",
                reason: "must not be negative".to_string(),
            });
        }
        let rotated_at = parse_timestamp("JWT_ROTATED_AT")?;

        let access_keys =
            key_ring_from_env("JWT_SECRET", "JWT_SECRET_PREVIOUS", grace, rotated_at)?
                .with_leeway(leeway);
        let refresh_keys = key_ring_from_env(
            "JWT_REFRESH_SECRET",
            "JWT_REFRESH_SECRET_PREVIOUS",
            grace,
            rotated_at,
        )?
        .with_leeway(leeway);

        let mut config = Self::new(access_keys, refresh_keys);
        config.access_token_ttl =
            Duration::seconds(parse_var("JWT_EXPIRES_IN_SECS", Self::DEFAULT_ACCESS_TTL_SECS)?);
        config.refresh_token_ttl = Duration::seconds(parse_var(
            "JWT_REFRESH_EXPIRES_IN_SECS",
            Self::DEFAULT_REFRESH_TTL_SECS,
        )?);
        config.cookie_secure = parse_var("COOKIE_SECURE", true)?;
        config.mfa_emergency_bypass = parse_var("MFA_EMERGENCY_BYPASS_ENABLED", false)?;
        let retention_days =
            parse_var("AUDIT_RETENTION_DAYS", Self::DEFAULT_AUDIT_RETENTION_DAYS)?;
        if retention_days < 1 {
            return Err(ConfigError::Invalid {
                var: "AUDIT_RETENTION_DAYS",
                reason: "must be at least 1".to_string(),
            });
        }
        config.audit_retention = Duration::days(retention_days);
        if let Ok(raw) = env::var("TRUSTED_PROXIES") {
            config.trusted_proxies = parse_ip_list("TRUSTED_PROXIES", &raw)?;
        }

        if let Ok(pepper) = env::var("PASSWORD_PEPPER") {
            let bytes = from_base64(pepper.trim()).map_err(|e| ConfigError::Invalid {
                var: "PASSWORD_PEPPER",
                reason: e.to_string(),
            })?;
            config.password_pepper = Some(Pepper::new(bytes));
        }

        if config.mfa_emergency_bypass {
            tracing::warn!("MFA emergency bypass is enabled for SUPER_ADMIN accounts");
        }

        Ok(config)
    }

    pub fn pepper(&self) -> Option<&Pepper> {
        self.password_pepper.as_ref()
    }

    pub fn access_token_ttl_secs(&self) -> i64 {
        self.access_token_ttl.num_seconds()
    }

    pub fn refresh_token_ttl_secs(&self) -> i64 {
        self.refresh_token_ttl.num_seconds()
    }
}

fn parse_var<T>(var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(var) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            reason: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

fn parse_timestamp(var: &'static str) -> Result<Option<DateTime<Utc>>, ConfigError> {
    match env::var(var) {
        Ok(raw) => DateTime::parse_from_rfc3339(raw.trim())
            .map(|t| Some(t.with_timezone(&Utc)))
            .map_err(|e| ConfigError::Invalid {
                var,
                reason: e.to_string(),
            }),
        Err(_) => Ok(None),
    }
}

fn parse_ip_list(var: &'static str, raw: &str) -> Result<Vec<IpAddr>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse().map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
                var,
                reason: format!("{s}: {e}"),
            })
        })
        .collect()
}

/// Kid derived from the secret so that every instance agrees on it
fn key_from_base64(var: &'static str, encoded: &str) -> Result<SigningKey, ConfigError> {
    let kid = sha256_hex(encoded.trim().as_bytes())[..12].to_string();
    SigningKey::from_base64(kid, encoded).map_err(|source| ConfigError::Key { var, source })
}

fn key_ring_from_env(
    var: &'static str,
    previous_var: &'static str,
    grace: Duration,
    rotated_at: Option<DateTime<Utc>>,
) -> Result<KeyRing, ConfigError> {
    let current = match env::var(var) {
        Ok(encoded) => key_from_base64(var, &encoded)?,
        Err(_) if cfg!(debug_assertions) => {
            tracing::warn!(var, "Signing secret not set, using a random key");
            SigningKey::generate()
        }
        Err(_) => return Err(ConfigError::Missing(var)),
    };

    let previous = match env::var(previous_var) {
        Ok(encoded) => Some(key_from_base64(previous_var, &encoded)?),
        Err(_) => None,
    };
    key_ring(current, previous, rotated_at, grace)
}

/// A previous key stays valid until `rotated_at + grace`. The rotation time
/// is configured rather than taken at startup so that restarts do not
/// extend the window.
fn key_ring(
    current: SigningKey,
    previous: Option<SigningKey>,
    rotated_at: Option<DateTime<Utc>>,
    grace: Duration,
) -> Result<KeyRing, ConfigError> {
    let Some(previous) = previous else {
        return Ok(KeyRing::new(current, grace));
    };
    let rotated_at = rotated_at.ok_or(ConfigError::Missing("JWT_ROTATED_AT"))?;
    let mut ring = KeyRing::new(previous, grace);
    ring.rotate(current, rotated_at);
    Ok(ring)
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::*;

    fn claims(exp_in_secs: i64) -> Value {
        json!({ "sub": "user-1", "exp": Utc::now().timestamp() + exp_in_secs })
    }

    #[test]
    fn test_defaults() {
        let config = AuthConfig::development();
        assert_eq!(config.access_token_ttl_secs(), 86_400);
        assert_eq!(config.refresh_token_ttl_secs(), 604_800);
        assert_eq!(config.totp_issuer, "TopSteel ERP");
        assert!(!config.cookie_secure);
        assert!(!config.mfa_emergency_bypass);
        assert_eq!(config.audit_retention, Duration::days(90));
        assert_ne!(config.access_keys.active().kid(), config.refresh_keys.active().kid());
    }

    #[test]
    fn test_kid_is_stable_for_a_secret() {
        let secret = platform::crypto::to_base64(&[7u8; 32]);
        let a = key_from_base64("JWT_SECRET", &secret).unwrap();
        let b = key_from_base64("JWT_SECRET", &secret).unwrap();
        assert_eq!(a.kid(), b.kid());
    }

    #[test]
    fn test_short_secret_is_rejected() {
        let secret = platform::crypto::to_base64(&[7u8; 16]);
        assert!(matches!(
            key_from_base64("JWT_SECRET", &secret),
            Err(ConfigError::Key { var: "JWT_SECRET", .. })
        ));
    }

    #[test]
    fn test_previous_key_requires_rotation_time() {
        let grace = Duration::hours(4);
        let ring = key_ring(SigningKey::generate(), Some(SigningKey::generate()), None, grace);
        assert!(matches!(ring, Err(ConfigError::Missing("JWT_ROTATED_AT"))));

        assert!(key_ring(SigningKey::generate(), None, None, grace).is_ok());
    }

    #[test]
    fn test_previous_key_rejected_after_grace() {
        let now = Utc::now();
        let grace = Duration::hours(4);
        let previous = SigningKey::generate();
        let old_token = KeyRing::new(previous.clone(), grace)
            .encode(&claims(86_400))
            .unwrap();

        // rotated an hour ago: still inside the window
        let recent = key_ring(
            SigningKey::generate(),
            Some(previous.clone()),
            Some(now - Duration::hours(1)),
            grace,
        )
        .unwrap();
        assert!(recent.decode::<Value>(&old_token, now).is_ok());

        // rotated five hours ago: a restart now must not revive the old key
        let stale = key_ring(
            SigningKey::generate(),
            Some(previous.clone()),
            Some(now - Duration::hours(5)),
            grace,
        )
        .unwrap();
        assert!(matches!(
            stale.decode::<Value>(&old_token, now),
            Err(JwtError::UnknownKey(kid)) if kid == previous.kid()
        ));
    }

    #[test]
    fn test_leeway_accepts_recently_expired_tokens() {
        let strict = KeyRing::new(SigningKey::generate(), Duration::hours(4));
        let lenient = strict.clone().with_leeway(Duration::seconds(60));
        let token = strict.encode(&claims(-10)).unwrap();

        assert!(matches!(
            strict.decode::<Value>(&token, Utc::now()),
            Err(JwtError::Expired)
        ));
        assert!(lenient.decode::<Value>(&token, Utc::now()).is_ok());
    }

    #[test]
    fn test_trusted_proxy_list() {
        let proxies = parse_ip_list("TRUSTED_PROXIES", "10.0.0.1, ::1,").unwrap();
        assert_eq!(proxies.len(), 2);
        assert_eq!(proxies[0], "10.0.0.1".parse::<IpAddr>().unwrap());

        assert!(matches!(
            parse_ip_list("TRUSTED_PROXIES", "10.0.0.1,proxy.local"),
            Err(ConfigError::Invalid { var: "TRUSTED_PROXIES", .. })
        ));
    }
}
