//! Client identification utilities
//!
//! Who is calling: peer IP (aware of trusted proxies) and a User-Agent fingerprint that is
//! stored alongside each session.

use axum::http::{HeaderMap, header};
use std::net::IpAddr;

use crate::crypto::sha256_hex;

/// Longest User-Agent kept verbatim on a session row
pub const MAX_USER_AGENT_LENGTH: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientFingerprint {
    /// Hex SHA-256 of the User-Agent header
    pub ua_hash: String,
    pub ip: Option<IpAddr>,
    /// Truncated User-Agent, for session listings
    pub user_agent: Option<String>,
}

impl ClientFingerprint {
    /// Fingerprint for callers that are not HTTP requests (tests, jobs)
    pub fn anonymous() -> Self {
        Self {
            ua_hash: sha256_hex(b""),
            ip: None,
            user_agent: None,
        }
    }

    pub fn ip_string(&self) -> Option<String> {
        self.ip.map(|ip| ip.to_string())
    }

    /// Key used by per-client rate limiting
    pub fn rate_limit_key(&self, scope: &str) -> String {
        match self.ip {
            Some(ip) => format!("{}:{}", scope, ip),
            None => format!("{}:ua:{}", scope, self.ua_hash),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum FingerprintError {
    #[error("Missing required header: {0}")]
    MissingHeader(&'static str),
}

/// Fingerprint a request; the User-Agent header is mandatory.
pub fn extract_fingerprint(
    headers: &HeaderMap,
    client_ip: Option<IpAddr>,
) -> Result<ClientFingerprint, FingerprintError> {
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .filter(|ua| !ua.trim().is_empty())
        .ok_or(FingerprintError::MissingHeader("User-Agent"))?;

    let truncated: String = user_agent.chars().take(MAX_USER_AGENT_LENGTH).collect();

    Ok(ClientFingerprint {
        ua_hash: sha256_hex(user_agent.as_bytes()),
        ip: client_ip,
        user_agent: Some(truncated),
    })
}

/// Client IP as seen through the reverse proxies in `trusted_proxies`.
///
/// Forwarding headers are only honoured when the direct peer is a trusted
/// proxy. `X-Forwarded-For` is walked right to left, skipping trusted hops,
/// so a client cannot choose its address by prepending entries. `X-Real-IP`
/// is the fallback, then the peer address itself.
pub fn extract_client_ip(
    headers: &HeaderMap,
    direct_ip: Option<IpAddr>,
    trusted_proxies: &[IpAddr],
) -> Option<IpAddr> {
    let direct = direct_ip?;
    if !trusted_proxies.contains(&direct) {
        return Some(direct);
    }

    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|xff| {
            let hops: Vec<IpAddr> = xff
                .split(',')
                .filter_map(|hop| hop.trim().parse::<IpAddr>().ok())
                .collect();
            hops.iter()
                .rev()
                .find(|ip| !trusted_proxies.contains(ip))
                .or_else(|| hops.first())
                .copied()
        });

    let real_ip = || {
        headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<IpAddr>().ok())
    };

    forwarded.or_else(real_ip).or(Some(direct))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_extract_fingerprint() {
        let mut headers = HeaderMap::new();
        headers.insert(header::USER_AGENT, HeaderValue::from_static("Mozilla/5.0 Test"));

        let fp = extract_fingerprint(&headers, None).unwrap();
        assert_eq!(fp.ua_hash.len(), 64);
        assert_eq!(fp.user_agent.as_deref(), Some("Mozilla/5.0 Test"));
    }

    #[test]
    fn test_extract_fingerprint_missing_ua() {
        let result = extract_fingerprint(&HeaderMap::new(), None);
        assert!(matches!(result, Err(FingerprintError::MissingHeader("User-Agent"))));
    }

    #[test]
    fn test_forwarding_headers_ignored_from_untrusted_peer() {
        let direct: IpAddr = "203.0.113.9".parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("1.2.3.4"));
        headers.insert("x-real-ip", HeaderValue::from_static("5.6.7.8"));

        assert_eq!(extract_client_ip(&headers, Some(direct), &[]), Some(direct));
        let other_proxy: IpAddr = "10.0.0.1".parse().unwrap();
        assert_eq!(
            extract_client_ip(&headers, Some(direct), &[other_proxy]),
            Some(direct)
        );
        assert_eq!(extract_client_ip(&headers, None, &[]), None);
    }

    #[test]
    fn test_extract_client_ip_behind_trusted_proxy() {
        let proxy: IpAddr = "127.0.0.1".parse().unwrap();
        let trusted = [proxy, "10.0.0.1".parse().unwrap()];
        let mut headers = HeaderMap::new();
        assert_eq!(extract_client_ip(&headers, Some(proxy), &trusted), Some(proxy));

        headers.insert("x-real-ip", HeaderValue::from_static("10.1.1.1"));
        assert_eq!(
            extract_client_ip(&headers, Some(proxy), &trusted),
            Some("10.1.1.1".parse().unwrap())
        );

        // spoofed left-most entry, then the real client, then our own proxy
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("6.6.6.6, 192.168.1.1, 10.0.0.1"),
        );
        assert_eq!(
            extract_client_ip(&headers, Some(proxy), &trusted),
            Some("192.168.1.1".parse().unwrap())
        );
    }

    #[test]
    fn test_rate_limit_key() {
        let mut fp = ClientFingerprint::anonymous();
        assert!(fp.rate_limit_key("login").starts_with("login:ua:"));
        fp.ip = Some("10.0.0.7".parse().unwrap());
        assert_eq!(fp.rate_limit_key("login"), "login:10.0.0.7");
    }
}
