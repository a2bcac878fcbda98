//! Cookie Management Infrastructure
//!
//! Building `Set-Cookie` values for the token cookies and reading them back.

use axum::http::{HeaderMap, HeaderValue, header};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SameSite {
    Strict,
    #[default]
    Lax,
    None,
}

impl SameSite {
    pub fn as_str(&self) -> &'static str {
        match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
            SameSite::None => "None",
        }
    }
}

/// Attributes of one named cookie
#[derive(Debug, Clone)]
pub struct CookieConfig {
    pub name: String,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: SameSite,
    pub path: String,
    pub max_age_secs: Option<i64>,
}

impl CookieConfig {
    /// HttpOnly, SameSite=Lax cookie scoped to `path`
    pub fn http_only(name: impl Into<String>, path: impl Into<String>, secure: bool) -> Self {
        Self {
            name: name.into(),
            secure,
            http_only: true,
            same_site: SameSite::Lax,
            path: path.into(),
            max_age_secs: None,
        }
    }

    pub fn with_max_age(mut self, secs: i64) -> Self {
        self.max_age_secs = Some(secs);
        self
    }

    pub fn with_same_site(mut self, same_site: SameSite) -> Self {
        self.same_site = same_site;
        self
    }

    pub fn build_set_cookie(&self, value: &str) -> String {
        let mut cookie = format!("{}={}", self.name, value);
        self.push_attributes(&mut cookie);
        if let Some(max_age) = self.max_age_secs {
            cookie.push_str(&format!("; Max-Age={}", max_age));
        }
        cookie
    }

    /// Expire the cookie. Attributes must match the ones it was set with
    /// or browsers keep the original.
    pub fn build_delete_cookie(&self) -> String {
        let mut cookie = format!("{}=", self.name);
        self.push_attributes(&mut cookie);
        cookie.push_str("; Max-Age=0");
        cookie
    }

    fn push_attributes(&self, cookie: &mut String) {
        if self.http_only {
            cookie.push_str("; HttpOnly");
        }
        // SameSite=None is only honoured together with Secure
        if self.secure || self.same_site == SameSite::None {
            cookie.push_str("; Secure");
        }
        cookie.push_str(&format!("; SameSite={}", self.same_site.as_str()));
        cookie.push_str(&format!("; Path={}", self.path));
    }

    pub fn set_header(&self, value: &str) -> Option<HeaderValue> {
        HeaderValue::from_str(&self.build_set_cookie(value)).ok()
    }

    pub fn delete_header(&self) -> Option<HeaderValue> {
        HeaderValue::from_str(&self.build_delete_cookie()).ok()
    }
}

/// Read a cookie value from the `Cookie` request headers.
/// Empty values are treated as absent.
pub fn extract_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .find_map(|pair| {
            let (key, value) = pair.trim().split_once('=')?;
            (key == name && !value.is_empty()).then(|| value.to_string())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_set_cookie() {
        let config = CookieConfig::http_only("refresh_token", "/api/auth", true).with_max_age(604_800);

        let cookie = config.build_set_cookie("abc.def.ghi");
        assert_eq!(
            cookie,
            "refresh_token=abc.def.ghi; HttpOnly; Secure; SameSite=Lax; Path=/api/auth; Max-Age=604800"
        );
    }

    #[test]
    fn test_build_delete_cookie_keeps_attributes() {
        let config = CookieConfig::http_only("access_token", "/", false)
            .with_same_site(SameSite::Strict)
            .with_max_age(3600);
        assert_eq!(
            config.build_delete_cookie(),
            "access_token=; HttpOnly; SameSite=Strict; Path=/; Max-Age=0"
        );
    }

    #[test]
    fn test_same_site_none_forces_secure() {
        let config = CookieConfig::http_only("a", "/", false).with_same_site(SameSite::None);
        assert!(config.build_set_cookie("v").contains("; Secure"));
    }

    #[test]
    fn test_extract_cookie() {
        let mut headers = HeaderMap::new();
        headers.append(
            header::COOKIE,
            HeaderValue::from_static("foo=bar; access_token=abc123"),
        );
        headers.append(header::COOKIE, HeaderValue::from_static("refresh_token=; other=x"));

        assert_eq!(extract_cookie(&headers, "access_token"), Some("abc123".to_string()));
        assert_eq!(extract_cookie(&headers, "other"), Some("x".to_string()));
        assert_eq!(extract_cookie(&headers, "refresh_token"), None);
        assert_eq!(extract_cookie(&headers, "missing"), None);
    }
}
