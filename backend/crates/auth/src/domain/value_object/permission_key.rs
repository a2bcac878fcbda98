//! `resource:action` permission key
//!
//! `*` in either position is a wildcard when matching.

use serde::{Deserialize, Serialize};
use std::fmt;

pub const WILDCARD: &str = "*";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PermissionKey {
    resource: String,
    action: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Malformed permission key: {0:?} (expected \"resource:action\")")]
pub struct MalformedPermissionKey(pub String);

impl PermissionKey {
    pub fn new(resource: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            action: action.into(),
        }
    }

    /// Parse `"resource:action"`. Both halves must be non-empty.
    pub fn parse(s: &str) -> Result<Self, MalformedPermissionKey> {
        let (resource, action) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| MalformedPermissionKey(s.to_string()))?;
        let (resource, action) = (resource.trim(), action.trim());
        if resource.is_empty() || action.is_empty() || action.contains(':') {
            return Err(MalformedPermissionKey(s.to_string()));
        }
        Ok(Self::new(resource, action))
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    /// Keys that grant `self`, most specific first:
    /// `r:a`, `r:*`, `*:a`, `*:*`.
    pub fn candidates(&self) -> [PermissionKey; 4] {
        [
            self.clone(),
            PermissionKey::new(self.resource.as_str(), WILDCARD),
            PermissionKey::new(WILDCARD, self.action.as_str()),
            PermissionKey::new(WILDCARD, WILDCARD),
        ]
    }
}

impl TryFrom<String> for PermissionKey {
    type Error = MalformedPermissionKey;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        PermissionKey::parse(&value)
    }
}

impl From<PermissionKey> for String {
    fn from(key: PermissionKey) -> Self {
        key.to_string()
    }
}

impl fmt::Display for PermissionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resource, self.action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let key = PermissionKey::parse("factures:write").unwrap();
        assert_eq!(key.resource(), "factures");
        assert_eq!(key.action(), "write");
        assert_eq!(key.to_string(), "factures:write");
    }

    #[test]
    fn test_parse_malformed() {
        for bad in ["", "factures", ":write", "factures:", "a:b:c"] {
            assert!(PermissionKey::parse(bad).is_err(), "{bad:?}");
        }
    }

    #[test]
    fn test_candidates() {
        let names: Vec<String> = PermissionKey::new("orders", "read")
            .candidates()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(names, ["orders:read", "orders:*", "*:read", "*:*"]);
    }
}
