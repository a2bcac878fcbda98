//! In-process cache of computed permission sets
//!
//! Keys follow `permissions:{user}:{societe}:{site|all}` so a user's
//! entries, or a user's entries for one société, can be dropped by prefix.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use kernel::id::{SiteId, SocieteId, UserId};
use tokio::sync::RwLock;

use crate::domain::service::EffectivePermissions;

struct CachedPermissions {
    value: EffectivePermissions,
    stored_at: Instant,
}

pub struct PermissionCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, CachedPermissions>>,
}

impl PermissionCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn key(user_id: UserId, societe_id: SocieteId, site_id: Option<SiteId>) -> String {
        match site_id {
            Some(site) => format!("permissions:{}:{}:{}", user_id, societe_id, site),
            None => format!("permissions:{}:{}:all", user_id, societe_id),
        }
    }

    pub async fn get(&self, key: &str) -> Option<EffectivePermissions> {
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|cached| cached.stored_at.elapsed() < self.ttl)
            .map(|cached| cached.value.clone())
    }

    pub async fn insert(&self, key: String, value: EffectivePermissions) {
        let mut entries = self.entries.write().await;
        let ttl = self.ttl;
        entries.retain(|_, cached| cached.stored_at.elapsed() < ttl);
        entries.insert(
            key,
            CachedPermissions {
                value,
                stored_at: Instant::now(),
            },
        );
    }

    /// Drop a user's entries, optionally only those of one société.
    /// Returns how many were removed.
    pub async fn invalidate_user(&self, user_id: UserId, societe_id: Option<SocieteId>) -> usize {
        let prefix = match societe_id {
            Some(societe) => format!("permissions:{}:{}:", user_id, societe),
            None => format!("permissions:{}:", user_id),
        };
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(&prefix));
        before - entries.len()
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}
