//! Audit trail
//!
//! Security events are recorded on a best-effort basis: a failing audit
//! write is logged and never fails the request that produced it.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use kernel::error::app_error::AppError;
use kernel::id::SocieteId;

use crate::domain::entity::AuditEvent;
use crate::domain::repository::{AuditFilter, AuditPage, AuditRepository, AuditStatistics};
use crate::error::{AuthError, AuthResult};

/// Largest page an audit search returns
pub const MAX_AUDIT_PAGE: u32 = 500;

pub(crate) async fn record_audit<R: AuditRepository>(repo: &R, event: AuditEvent) {
    if let Err(e) = repo.record_audit_event(&event).await {
        tracing::warn!(
            error = %e,
            event_type = %event.event_type,
            "Failed to record audit event"
        );
    }
}

fn inverted_range() -> AuthError {
    AppError::bad_request("`from` must not be after `to`").into()
}

pub struct AuditUseCase<R>
where
    R: AuditRepository,
{
    repo: Arc<R>,
}

impl<R> AuditUseCase<R>
where
    R: AuditRepository,
{
    pub fn new(repo: Arc<R>) -> Self {
        Self { repo }
    }

    pub async fn search(&self, mut filter: AuditFilter) -> AuthResult<AuditPage> {
        if let (Some(from), Some(to)) = (filter.from, filter.to) {
            if from > to {
                return Err(inverted_range());
            }
        }
        filter.limit = filter.limit.clamp(1, MAX_AUDIT_PAGE);
        self.repo.search_audit_events(&filter).await
    }

    /// Counters over `[from, to]`; defaults to the last 24 hours
    pub async fn statistics(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        societe_id: Option<SocieteId>,
    ) -> AuthResult<AuditStatistics> {
        let to = to.unwrap_or_else(Utc::now);
        let from = from.unwrap_or(to - Duration::hours(24));
        if from > to {
            return Err(inverted_range());
        }
        self.repo.audit_statistics(from, to, societe_id).await
    }

    /// Drop events older than `retention`
    pub async fn purge(&self, now: DateTime<Utc>, retention: Duration) -> AuthResult<u64> {
        let purged = self.repo.purge_audit_events(now - retention).await?;
        if purged > 0 {
            tracing::info!(purged, retention_days = retention.num_days(), "Audit log purged");
        }
        Ok(purged)
    }
}
